//! Utility functions for CLI commands.

use clap::Args;
use mqttws::{ClientConfig, QoS};

use crate::Cli;
use crate::config::{Store, load_config};

/// Connection overrides shared by `sub` and `pub`.
#[derive(Args, Debug, Default)]
pub struct ConnArgs {
    /// Use a preset broker instead of the stored one
    #[arg(long)]
    pub preset: Option<String>,

    /// Broker host
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port
    #[arg(long)]
    pub port: Option<u16>,

    /// Client identifier
    #[arg(long)]
    pub client_id: Option<String>,
}

impl ConnArgs {
    /// Apply the overrides on top of `base`.
    pub fn apply(&self, mut base: ClientConfig) -> anyhow::Result<ClientConfig> {
        if let Some(name) = &self.preset {
            let preset = mqttws::config::preset(name)
                .ok_or_else(|| anyhow::anyhow!("unknown preset '{}'", name))?;
            base = base.with_preset(preset);
        }
        if let Some(host) = &self.host {
            base.host = host.clone();
        }
        if let Some(port) = self.port {
            base.port = port;
        }
        if let Some(id) = &self.client_id {
            base.client_id = id.clone();
        }
        base.validate()?;
        Ok(base)
    }
}

/// Gets the stored configuration.
pub fn get_config(cli: &Cli) -> anyhow::Result<Store> {
    load_config(cli.config.as_deref())
}

/// Resolves the client config for a connecting command.
pub fn client_config(cli: &Cli, conn: &ConnArgs) -> anyhow::Result<ClientConfig> {
    let store = get_config(cli)?;
    conn.apply(store.client)
}

/// Parses a QoS level from the command line.
pub fn parse_qos(level: u8) -> anyhow::Result<QoS> {
    QoS::from_u8(level).ok_or_else(|| anyhow::anyhow!("qos must be 0, 1 or 2, got {}", level))
}

/// Prints verbose output if enabled.
pub fn print_verbose(cli: &Cli, msg: &str) {
    if cli.verbose {
        eprintln!("[verbose] {}", msg);
    }
}

/// Prints success message.
pub fn print_success(msg: &str) {
    eprintln!("\x1b[32m✓\x1b[0m {}", msg);
}
