//! MQTT 3.1.1 client over message-framed transports.
//!
//! The client speaks MQTT 3.1.1 over any link that delivers whole packets as
//! discrete messages, such as WebSocket. It covers the lightweight profile
//! used by browser-style and embedded front ends:
//!
//! - **Connect**: CONNECT/CONNACK with timeouts and credential support
//! - **Subscribe**: a topic registry replayed after every reconnect
//! - **Publish**: fire-and-forget delivery, QoS bits carried but no acks
//! - **Keepalive**: periodic PINGREQ at the keep-alive interval
//! - **Reconnect**: automatic, with a fixed delay and an optional attempt cap
//!
//! ## Components
//!
//! - [`Client`]: handle to a session running on its own Tokio task
//! - [`Transport`]: the link abstraction; [`WebSocketTransport`] with the
//!   `websocket` feature
//! - [`protocol`]: packet encoders and decoders
//!
//! ## Example
//!
//! ```no_run
//! use mqttws::{Client, ClientConfig, QoS, WebSocketTransport};
//!
//! #[tokio::main]
//! async fn main() -> mqttws::Result<()> {
//!     let client = Client::new(WebSocketTransport::new());
//!     client.on_message(|msg| {
//!         println!("{}: {}", msg.topic, msg.payload_str().unwrap_or("<binary>"));
//!     });
//!
//!     client.connect(ClientConfig::new("broker.emqx.io", "mqttws-demo")).await?;
//!     client.subscribe("mqttws/demo", QoS::AtMostOnce).await?;
//!     client.publish("mqttws/demo", "hello", QoS::AtMostOnce).await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     client.disconnect().await
//! }
//! ```

mod client;
pub mod config;
mod dispatch;
mod error;
pub mod protocol;
mod session;
mod subscription;
mod timer;
pub mod transport;
mod types;

pub use client::Client;
pub use config::{ClientConfig, Scheme, ServerPreset};
pub use error::{Error, Result};
pub use subscription::{PacketIds, SubscriptionRegistry};
pub use timer::{Clock, SystemClock};
pub use transport::{EventSink, Transport, TransportEvent};
pub use types::{ConnectReturnCode, ConnectionState, FixedHeader, Message, PacketType, QoS};

#[cfg(feature = "websocket")]
pub use transport::WebSocketTransport;
