//! Connection state machine.
//!
//! One task owns the session: the transport, the timers and every state
//! transition. Client handles, the transport link and the timers reach it
//! through the `select!` loop in [`Session::run`], which handles transport
//! events first, then commands, then expired deadlines, one at a time.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::v4::{self, Packet};
use crate::subscription::{PacketIds, SubscriptionRegistry};
use crate::timer::{Clock, TimerKind, Timers, deadline, sleep_until};
use crate::transport::{EventSink, Transport, TransportEvent};
use crate::types::{ConnectReturnCode, ConnectionState, Message, QoS};

/// Requests from client handles.
pub(crate) enum Command {
    Connect {
        config: Box<ClientConfig>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    CancelReconnect {
        reply: oneshot::Sender<()>,
    },
    ResetReconnectFlag {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        topic: String,
        qos: QoS,
        reply: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// State readable from client handles without a round trip.
#[derive(Default)]
pub(crate) struct Shared {
    pub state: RwLock<ConnectionState>,
    pub subscriptions: RwLock<SubscriptionRegistry>,
    pub dispatcher: Dispatcher,
}

pub(crate) struct Session<T: Transport> {
    transport: T,
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,

    /// Config of the last `connect()`, reused by reconnects.
    config: Option<ClientConfig>,
    /// Incremented for every link opened; events from older links are dropped.
    attempt: u64,
    link_open: bool,
    timers: Timers,
    pending_connect: Option<oneshot::Sender<Result<()>>>,
    /// Set by `disconnect()` and `cancel_reconnect()`; suppresses reconnects.
    stopped: bool,
    reconnect_attempts: u32,
    packet_ids: PacketIds,
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        shared: Arc<Shared>,
        clock: Arc<dyn Clock>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            transport,
            shared,
            clock,
            commands,
            events,
            events_tx,
            config: None,
            attempt: 0,
            link_open: false,
            timers: Timers::default(),
            pending_connect: None,
            stopped: false,
            reconnect_attempts: 0,
            packet_ids: PacketIds::new(),
        }
    }

    /// Run until every client handle is dropped.
    pub async fn run(mut self) {
        loop {
            let next_timer = self.timers.next();

            tokio::select! {
                biased;

                Some((attempt, event)) = self.events.recv() => {
                    self.handle_event(attempt, event);
                }

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },

                _ = sleep_until(next_timer.map(|(at, _)| at)) => {
                    if let Some((_, kind)) = next_timer {
                        self.handle_timer(kind);
                    }
                }
            }
        }

        debug!("all client handles dropped, stopping session");
        self.timers.cancel_all();
        if self.state() == ConnectionState::Connected {
            let _ = self.transport.send(v4::encode_disconnect());
        }
        self.close_link();
        self.set_state(ConnectionState::Idle);
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.shared.state.write();
        if *current != state {
            debug!("state {} -> {}", *current, state);
            *current = state;
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { config, reply } => self.connect(*config, reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::CancelReconnect { reply } => {
                self.cancel_reconnect();
                let _ = reply.send(());
            }
            Command::ResetReconnectFlag { reply } => {
                debug!("reconnect flag reset");
                self.stopped = false;
                let _ = reply.send(());
            }
            Command::Subscribe { topic, qos, reply } => {
                let _ = reply.send(self.subscribe(&topic, qos));
            }
            Command::Unsubscribe { topic, reply } => {
                let _ = reply.send(self.unsubscribe(&topic));
            }
            Command::Publish {
                topic,
                payload,
                qos,
                reply,
            } => {
                let _ = reply.send(self.publish(&topic, &payload, qos));
            }
        }
    }

    fn connect(&mut self, config: ClientConfig, reply: oneshot::Sender<Result<()>>) {
        match self.state() {
            ConnectionState::Idle | ConnectionState::ReconnectPending => {}
            ConnectionState::Connected => {
                let _ = reply.send(Err(Error::AlreadyConnected));
                return;
            }
            ConnectionState::Connecting
            | ConnectionState::AwaitingAck
            | ConnectionState::Disconnecting => {
                let _ = reply.send(Err(Error::AlreadyConnecting));
                return;
            }
        }

        if let Err(e) = config.validate() {
            let _ = reply.send(Err(e));
            return;
        }

        self.config = Some(config);
        self.reconnect_attempts = 0;
        self.pending_connect = Some(reply);
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        self.timers.reconnect = None;
        let Some(config) = &self.config else {
            return;
        };
        let url = config.server_url();
        let connect_timeout = config.connect_timeout;

        self.attempt += 1;
        self.set_state(ConnectionState::Connecting);
        info!("connecting to {} (attempt {})", url, self.attempt);

        let sink = EventSink::new(self.attempt, self.events_tx.clone());
        match self.transport.open(&url, sink) {
            Ok(()) => {
                self.link_open = true;
                self.timers.connect = Some(deadline(connect_timeout));
            }
            Err(e) => self.fail(Error::TransportOpenFailed(e.to_string())),
        }
    }

    fn disconnect(&mut self) {
        self.stopped = true;
        self.timers.cancel_all();

        let was_connected = self.state() == ConnectionState::Connected;
        if self.link_open {
            self.set_state(ConnectionState::Disconnecting);
            if was_connected {
                if let Err(e) = self.transport.send(v4::encode_disconnect()) {
                    debug!("failed to send DISCONNECT: {}", e);
                }
            }
            self.close_link();
        }
        self.set_state(ConnectionState::Idle);
        info!("disconnected");

        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(Error::Cancelled));
        }
        if was_connected {
            self.shared.dispatcher.notify_disconnect();
        }
    }

    fn cancel_reconnect(&mut self) {
        self.stopped = true;
        if self.timers.reconnect.take().is_some() {
            debug!("pending reconnect cancelled");
        }
        if self.state() == ConnectionState::ReconnectPending {
            self.set_state(ConnectionState::Idle);
        }
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        if self.shared.subscriptions.read().contains(topic) {
            debug!("already subscribed to {}", topic);
            return Ok(());
        }
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        self.send_subscribe(topic, qos)?;
        self.shared.subscriptions.write().insert(topic, qos);
        Ok(())
    }

    fn send_subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        let pkid = self.packet_ids.next_id();
        let frame = v4::encode_subscribe(pkid, topic, qos)?;
        self.send(frame)?;
        debug!("SUBSCRIBE {} qos={:?} pkid={}", topic, qos, pkid);
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        if !self.shared.subscriptions.read().contains(topic) {
            return Ok(());
        }
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        let pkid = self.packet_ids.next_id();
        let frame = v4::encode_unsubscribe(pkid, topic)?;
        self.send(frame)?;
        debug!("UNSUBSCRIBE {} pkid={}", topic, pkid);

        self.shared.subscriptions.write().remove(topic);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        let frame = v4::encode_publish(topic, payload, qos)?;
        self.send(frame)?;
        debug!("PUBLISH {} ({} bytes) qos={:?}", topic, payload.len(), qos);
        Ok(())
    }

    fn send(&mut self, frame: Bytes) -> Result<()> {
        self.transport
            .send(frame)
            .map_err(|e| Error::SendFailed(e.to_string()))
    }

    // ========================================================================
    // Transport events
    // ========================================================================

    fn handle_event(&mut self, attempt: u64, event: TransportEvent) {
        if attempt != self.attempt || !self.link_open {
            trace!("ignoring {:?} from closed link {}", event, attempt);
            return;
        }

        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(frame) => self.on_frame(frame),
            TransportEvent::Error(reason) => self.on_link_down(Error::Transport(reason)),
            TransportEvent::Closed => self.on_link_down(Error::ConnectionClosed),
        }
    }

    fn on_opened(&mut self) {
        if self.state() != ConnectionState::Connecting {
            return;
        }
        let Some(config) = &self.config else {
            return;
        };
        let connack_timeout = config.connack_timeout;

        let sent = v4::encode_connect(config);
        if let Err(e) = sent.and_then(|frame| self.send(frame)) {
            self.fail(e);
            return;
        }

        debug!("CONNECT sent");
        self.timers.connack = Some(deadline(connack_timeout));
        self.set_state(ConnectionState::AwaitingAck);
    }

    fn on_link_down(&mut self, err: Error) {
        match self.state() {
            ConnectionState::Connecting
            | ConnectionState::AwaitingAck
            | ConnectionState::Connected => self.fail(err),
            state => debug!("link down while {}: {}", state, err),
        }
    }

    fn on_frame(&mut self, frame: Bytes) {
        let raw = match v4::decode(&frame) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("dropping incomplete frame ({} bytes)", frame.len());
                return;
            }
            Err(e) => {
                warn!("dropping frame: {}", e);
                return;
            }
        };

        let packet = match Packet::parse(&raw) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("dropping {:?} frame: {}", raw.packet_type, e);
                return;
            }
        };

        match packet {
            Packet::ConnAck(ack) => {
                if self.state() == ConnectionState::AwaitingAck {
                    self.on_connack(ack.code);
                } else {
                    warn!("unexpected CONNACK while {}", self.state());
                }
            }
            Packet::Publish(publish) => {
                if self.state() != ConnectionState::Connected {
                    debug!("dropping PUBLISH on {} while {}", publish.topic, self.state());
                    return;
                }
                let msg = Message {
                    topic: publish.topic,
                    payload: publish.payload,
                    qos: publish.qos,
                    received_at: self.clock.now(),
                };
                debug!("message on {} ({} bytes)", msg.topic, msg.payload.len());
                self.shared.dispatcher.notify_message(&msg);
            }
            Packet::PingResp => trace!("PINGRESP"),
            Packet::SubAck(ack) => debug!("SUBACK pkid={} codes={:?}", ack.pkid, ack.return_codes),
            Packet::UnsubAck(ack) => debug!("UNSUBACK pkid={}", ack.pkid),
            other => debug!("ignoring {:?}", other),
        }
    }

    fn on_connack(&mut self, code: ConnectReturnCode) {
        if code != ConnectReturnCode::Accepted {
            self.fail(Error::ConnectionRejected(code));
            return;
        }

        self.timers.connect = None;
        self.timers.connack = None;
        self.reconnect_attempts = 0;
        self.set_state(ConnectionState::Connected);
        info!("connected");

        let keep_alive = self.config.as_ref().map_or(0, |c| c.keep_alive);
        if keep_alive > 0 {
            self.timers.keepalive = Some(deadline(keepalive_interval(keep_alive)));
        }

        let entries = self.shared.subscriptions.read().entries();
        for (topic, qos) in entries {
            if let Err(e) = self.send_subscribe(&topic, qos) {
                warn!("failed to restore subscription {}: {}", topic, e);
            }
        }

        self.shared.dispatcher.notify_connect(true);
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Ok(()));
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Connect => {
                self.timers.connect = None;
                warn!("no CONNACK within the connect timeout");
                self.fail(Error::ConnectionTimeout);
            }
            TimerKind::ConnAck => {
                self.timers.connack = None;
                warn!("no CONNACK within the CONNACK timeout");
                self.fail(Error::ConnAckTimeout);
            }
            TimerKind::KeepAlive => {
                self.timers.keepalive = None;
                self.keepalive();
            }
            TimerKind::Reconnect => {
                self.timers.reconnect = None;
                self.reconnect_attempts += 1;
                info!("reconnecting (try {})", self.reconnect_attempts);
                self.start_attempt();
            }
        }
    }

    fn keepalive(&mut self) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        if let Err(e) = self.send(v4::encode_pingreq()) {
            self.fail(e);
            return;
        }
        trace!("PINGREQ");

        let keep_alive = self.config.as_ref().map_or(0, |c| c.keep_alive);
        if keep_alive > 0 {
            self.timers.keepalive = Some(deadline(keepalive_interval(keep_alive)));
        }
    }

    // ========================================================================
    // Failure path
    // ========================================================================

    fn fail(&mut self, err: Error) {
        let was_connected = self.state() == ConnectionState::Connected;
        warn!("connection failed: {}", err);

        self.timers.cancel_session();
        self.close_link();
        self.set_state(ConnectionState::Idle);
        self.schedule_reconnect();

        if was_connected {
            self.shared.dispatcher.notify_disconnect();
        } else {
            self.shared.dispatcher.notify_connect(false);
        }

        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(err));
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.stopped {
            return;
        }
        let Some(config) = &self.config else {
            return;
        };
        if config.reconnect_delay.is_zero() {
            return;
        }
        if config
            .max_reconnect_attempts
            .is_some_and(|max| self.reconnect_attempts >= max)
        {
            info!("giving up after {} reconnect attempts", self.reconnect_attempts);
            return;
        }

        info!("reconnecting in {:?}", config.reconnect_delay);
        self.timers.reconnect = Some(deadline(config.reconnect_delay));
        self.set_state(ConnectionState::ReconnectPending);
    }

    fn close_link(&mut self) {
        if self.link_open {
            self.transport.close();
            self.link_open = false;
        }
    }
}

fn keepalive_interval(seconds: u16) -> std::time::Duration {
    std::time::Duration::from_secs(u64::from(seconds))
}
