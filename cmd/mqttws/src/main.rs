//! mqttws CLI - publish and subscribe over MQTT on WebSocket.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{ConfigCommand, PubCommand, SubCommand};

/// mqttws CLI - publish and subscribe over MQTT on WebSocket.
///
/// The broker to talk to is stored in ~/.mqttws/config.yaml and managed with
/// `mqttws config`. Presets for public test brokers are available through
/// `mqttws config presets`.
#[derive(Parser)]
#[command(name = "mqttws")]
#[command(about = "MQTT over WebSocket CLI tool")]
#[command(version)]
pub struct Cli {
    /// Config file (default is ~/.mqttws/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the stored broker configuration
    Config(ConfigCommand),
    /// Subscribe to topics and print incoming messages
    Sub(SubCommand),
    /// Publish one message
    Pub(PubCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; --verbose raises the default to debug.
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Config(cmd) => cmd.run(&cli).await,
        Commands::Sub(cmd) => cmd.run(&cli).await,
        Commands::Pub(cmd) => cmd.run(&cli).await,
    }
}
