//! Publish command.

use anyhow::Context;
use clap::Args;
use mqttws::{Client, WebSocketTransport};

use super::{ConnArgs, client_config, parse_qos, print_success, print_verbose};
use crate::Cli;

/// Publish one message and disconnect.
#[derive(Args)]
pub struct PubCommand {
    /// Topic to publish to
    topic: String,

    /// Message payload
    message: String,

    /// QoS bits to set on the PUBLISH (0, 1 or 2)
    #[arg(short, long, default_value_t = 0)]
    qos: u8,

    #[command(flatten)]
    conn: ConnArgs,
}

impl PubCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = client_config(cli, &self.conn)?;
        let qos = parse_qos(self.qos)?;
        let url = config.server_url();
        print_verbose(cli, &format!("connecting to {} as {}", url, config.client_id));

        let client = Client::new(WebSocketTransport::new());
        client
            .connect(config)
            .await
            .with_context(|| format!("connect to {}", url))?;

        client
            .publish(self.topic.clone(), self.message.clone(), qos)
            .await
            .with_context(|| format!("publish to {}", self.topic))?;
        client.disconnect().await?;

        print_success(&format!(
            "Published {} bytes to \"{}\"",
            self.message.len(),
            self.topic
        ));
        Ok(())
    }
}
