//! MQTT client handle.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::{Command, Session, Shared};
use crate::timer::{Clock, SystemClock};
use crate::transport::Transport;
use crate::types::{ConnectionState, Message, QoS};

/// Handle to an MQTT session.
///
/// The session runs on its own Tokio task, spawned by [`Client::new`]. Clones
/// share the session; it shuts down and closes the link when the last clone
/// is dropped.
///
/// # Example
///
/// ```no_run
/// # use mqttws::{Client, ClientConfig, QoS, WebSocketTransport};
/// # async fn demo() -> mqttws::Result<()> {
/// let client = Client::new(WebSocketTransport::new());
/// client.on_message(|msg| println!("{}: {:?}", msg.topic, msg.payload_str()));
///
/// client.connect(ClientConfig::new("broker.emqx.io", "c1")).await?;
/// client.subscribe("sensors/#", QoS::AtMostOnce).await?;
/// client.publish("sensors/t1", "23.5", QoS::AtMostOnce).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Client {
    /// Create a client over `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::with_clock(transport, SystemClock)
    }

    /// Create a client that stamps received messages with `clock`.
    pub fn with_clock<T: Transport, C: Clock>(transport: T, clock: C) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let session = Session::new(transport, shared.clone(), Arc::new(clock), rx);
        tokio::spawn(session.run());
        Self { commands, shared }
    }

    /// Connect to the broker described by `config`.
    ///
    /// Resolves when the broker accepts the connection, or with the error
    /// that ended this attempt. Automatic reconnects after a failure do not
    /// resolve anything; watch [`Client::on_connect`] for them.
    pub async fn connect(&self, config: ClientConfig) -> Result<()> {
        self.request(|reply| Command::Connect {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    /// Close the connection and stop automatic reconnects.
    ///
    /// Safe in any state. A `connect()` still in flight fails with
    /// [`Error::Cancelled`].
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Stop automatic reconnects without closing an active connection.
    pub async fn cancel_reconnect(&self) -> Result<()> {
        self.request(|reply| Command::CancelReconnect { reply }).await
    }

    /// Allow automatic reconnects again after `disconnect()` or
    /// `cancel_reconnect()`.
    pub async fn reset_reconnect_flag(&self) -> Result<()> {
        self.request(|reply| Command::ResetReconnectFlag { reply }).await
    }

    /// Subscribe to a topic filter.
    ///
    /// Subscribing to a filter already held succeeds without sending anything.
    /// The filter is remembered and subscribed again after every reconnect.
    pub async fn subscribe(&self, topic: impl Into<String>, qos: QoS) -> Result<()> {
        let topic = topic.into();
        self.request(|reply| Command::Subscribe { topic, qos, reply })
            .await?
    }

    /// Unsubscribe from a topic filter. Unknown filters are ignored.
    pub async fn unsubscribe(&self, topic: impl Into<String>) -> Result<()> {
        let topic = topic.into();
        self.request(|reply| Command::Unsubscribe { topic, reply })
            .await?
    }

    /// Publish a message.
    ///
    /// Resolves once the frame is handed to the transport.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> Result<()> {
        let topic = topic.into();
        let payload = payload.into();
        self.request(|reply| Command::Publish {
            topic,
            payload,
            qos,
            reply,
        })
        .await?
    }

    /// Register a connection handler.
    ///
    /// Called with `true` when the broker accepts a connection (including
    /// reconnects) and `false` when an attempt fails before that.
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_connect(Arc::new(handler));
    }

    /// Register a handler for the loss of an established connection.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_disconnect(Arc::new(handler));
    }

    /// Register a message handler.
    ///
    /// Handlers run on the session task and should return quickly.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_message(Arc::new(handler));
    }

    /// Returns true while the broker connection is established.
    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Subscribed topic filters, in subscription order.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.shared.subscriptions.read().topics()
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("subscriptions", &self.subscribed_topics())
            .finish()
    }
}
