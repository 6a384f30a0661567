//! Configuration management commands.

use std::time::Duration;

use clap::{Args, Subcommand};
use mqttws::config::{preset, presets};
use mqttws::{ClientConfig, Scheme};

use super::{get_config, print_success};
use crate::Cli;
use crate::config::mask_secret;

/// Manage the stored broker configuration.
///
/// Configuration is stored in ~/.mqttws/config.yaml
#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// View the current configuration
    Show,
    /// Update configuration fields
    Set(SetArgs),
    /// Restore the default configuration
    Reset,
    /// List preset public brokers
    Presets,
}

#[derive(Args, Debug, Default)]
struct SetArgs {
    /// Start from a preset broker
    #[arg(long)]
    preset: Option<String>,
    /// Broker host
    #[arg(long)]
    host: Option<String>,
    /// Broker port
    #[arg(long)]
    port: Option<u16>,
    /// WebSocket scheme (ws or wss)
    #[arg(long)]
    scheme: Option<String>,
    /// URL path of the WebSocket endpoint
    #[arg(long)]
    path: Option<String>,
    /// Client identifier
    #[arg(long)]
    client_id: Option<String>,
    /// Username
    #[arg(long)]
    username: Option<String>,
    /// Password
    #[arg(long)]
    password: Option<String>,
    /// Keep alive interval in seconds (0 disables)
    #[arg(long)]
    keep_alive: Option<u16>,
    /// Clean session flag
    #[arg(long)]
    clean_session: Option<bool>,
    /// Reconnect delay in milliseconds (0 disables reconnecting)
    #[arg(long)]
    reconnect_ms: Option<u64>,
    /// Remove stored credentials
    #[arg(long, conflicts_with_all = ["username", "password"])]
    clear_credentials: bool,
}

impl SetArgs {
    fn apply(&self, mut config: ClientConfig) -> anyhow::Result<ClientConfig> {
        if let Some(name) = &self.preset {
            let preset =
                preset(name).ok_or_else(|| anyhow::anyhow!("unknown preset '{}'", name))?;
            config = config.with_preset(preset);
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(scheme) = &self.scheme {
            config.scheme = scheme.parse::<Scheme>()?;
        }
        if let Some(path) = &self.path {
            config.path = path.clone();
        }
        if let Some(id) = &self.client_id {
            config.client_id = id.clone();
        }
        if let Some(username) = &self.username {
            config.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if self.clear_credentials {
            config.username = None;
            config.password = None;
        }
        if let Some(keep_alive) = self.keep_alive {
            config.keep_alive = keep_alive;
        }
        if let Some(clean) = self.clean_session {
            config.clean_session = clean;
        }
        if let Some(ms) = self.reconnect_ms {
            config.reconnect_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

impl ConfigCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.command {
            ConfigSubcommand::Show => {
                let store = get_config(cli)?;
                let mut shown = store.client.clone();
                shown.password = shown.password.as_deref().map(mask_secret);

                println!("# {}", store.path().display());
                println!("# server url: {}", store.client.server_url());
                print!("{}", serde_yaml::to_string(&shown)?);
                Ok(())
            }

            ConfigSubcommand::Set(args) => {
                let mut store = get_config(cli)?;
                store.client = args.apply(store.client.clone())?;
                store.save()?;
                print_success(&format!("Saved, server url {}", store.client.server_url()));
                Ok(())
            }

            ConfigSubcommand::Reset => {
                let mut store = get_config(cli)?;
                store.reset()?;
                print_success("Configuration reset to defaults");
                Ok(())
            }

            ConfigSubcommand::Presets => {
                println!("{:<12} {:<40} {}", "NAME", "URL", "DESCRIPTION");
                for p in presets() {
                    let url = format!("{}://{}:{}/mqtt", p.scheme, p.host, p.port);
                    println!("{:<12} {:<40} {}", p.name, url, p.description);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_args() {
        let base = ClientConfig::new("localhost", "c1").with_credentials("u", "p");

        let args = SetArgs {
            preset: Some("mosquitto".to_string()),
            path: Some("/ws".to_string()),
            keep_alive: Some(30),
            reconnect_ms: Some(0),
            ..Default::default()
        };
        let config = args.apply(base.clone()).unwrap();
        assert_eq!(config.server_url(), "wss://test.mosquitto.org:8081/ws");
        assert_eq!(config.keep_alive, 30);
        assert!(config.reconnect_delay.is_zero());
        assert_eq!(config.username.as_deref(), Some("u"));

        let args = SetArgs {
            scheme: Some("ws".to_string()),
            clear_credentials: true,
            ..Default::default()
        };
        let config = args.apply(base.clone()).unwrap();
        assert_eq!(config.scheme, Scheme::Ws);
        assert_eq!(config.username, None);
        assert_eq!(config.password, None);

        let args = SetArgs {
            scheme: Some("http".to_string()),
            ..Default::default()
        };
        assert!(args.apply(base).is_err());
    }
}
