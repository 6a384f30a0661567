//! Subscribe command.

use std::time::UNIX_EPOCH;

use anyhow::Context;
use clap::Args;
use mqttws::{Client, Message, WebSocketTransport};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{ConnArgs, client_config, parse_qos, print_success, print_verbose};
use crate::Cli;

/// Subscribe to topic filters and print messages until Ctrl-C.
///
/// The client reconnects on its own and restores the subscriptions after
/// every reconnect.
#[derive(Args)]
pub struct SubCommand {
    /// Topic filters to subscribe to
    #[arg(required = true)]
    topics: Vec<String>,

    /// Requested QoS (0, 1 or 2)
    #[arg(short, long, default_value_t = 0)]
    qos: u8,

    /// Exit after this many messages
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Print messages as JSON lines
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    conn: ConnArgs,
}

impl SubCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = client_config(cli, &self.conn)?;
        let qos = parse_qos(self.qos)?;
        let url = config.server_url();
        print_verbose(cli, &format!("connecting to {} as {}", url, config.client_id));

        let client = Client::new(WebSocketTransport::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        client.on_message(move |msg| {
            let _ = tx.send(msg.clone());
        });
        client.on_connect(|ok| {
            if ok {
                info!("connected");
            } else {
                warn!("connection attempt failed");
            }
        });
        client.on_disconnect(|| warn!("connection lost"));

        client
            .connect(config)
            .await
            .with_context(|| format!("connect to {}", url))?;
        for topic in &self.topics {
            client
                .subscribe(topic.as_str(), qos)
                .await
                .with_context(|| format!("subscribe to {}", topic))?;
        }
        print_success(&format!("Subscribed to {}", self.topics.join(", ")));

        let mut received = 0usize;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.print_message(&msg)?;
                    received += 1;
                    if self.count.is_some_and(|n| received >= n) {
                        break;
                    }
                }
            }
        }

        client.disconnect().await?;
        print_verbose(cli, &format!("received {} messages", received));
        Ok(())
    }

    fn print_message(&self, msg: &Message) -> anyhow::Result<()> {
        if self.json {
            let received_at = msg
                .received_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default();
            let line = json!({
                "topic": msg.topic,
                "payload": String::from_utf8_lossy(&msg.payload),
                "qos": msg.qos,
                "received_at": received_at,
            });
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!("[{}] {}", msg.topic, String::from_utf8_lossy(&msg.payload));
        }
        Ok(())
    }
}
