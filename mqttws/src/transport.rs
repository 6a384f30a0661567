//! Transport abstraction for message-framed links.
//!
//! A transport carries whole MQTT packets: every message it delivers is one
//! complete packet and every frame handed to [`Transport::send`] goes out as
//! one message. Opening is asynchronous; the outcome and everything that
//! happens on the link afterwards is reported through the [`EventSink`]
//! passed to [`Transport::open`].

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

#[cfg(feature = "websocket")]
pub use self::websocket::WebSocketTransport;

/// Something that happened on a transport link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link is open and frames may be sent.
    Opened,
    /// One complete frame arrived.
    Message(Bytes),
    /// The link failed.
    Error(String),
    /// The peer closed the link.
    Closed,
}

/// Event channel tagged with the connection attempt it belongs to.
///
/// The session ignores events carrying an attempt number other than the
/// current one, so a link that is being torn down cannot disturb its
/// successor.
#[derive(Debug, Clone)]
pub struct EventSink {
    attempt: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(attempt: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { attempt, tx }
    }

    /// Attempt number this sink reports for.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Report the link as open.
    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    /// Deliver one frame.
    pub fn message(&self, frame: Bytes) {
        self.emit(TransportEvent::Message(frame));
    }

    /// Report a link failure.
    pub fn error(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Error(reason.into()));
    }

    /// Report that the peer closed the link.
    pub fn closed(&self) {
        self.emit(TransportEvent::Closed);
    }

    /// Returns true once the session is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: TransportEvent) {
        // The session is gone; nobody is listening.
        let _ = self.tx.send((self.attempt, event));
    }
}

/// A message-framed link to the broker.
///
/// The session owns its transport and drives it from a single task, so
/// methods take `&mut self` and never block. Implementations spawn whatever
/// background work the link needs and report back through the sink.
pub trait Transport: Send + 'static {
    /// Start opening a link to `url`.
    ///
    /// An `Err` means the attempt could not even start (bad URL, no runtime).
    /// Failures after that are reported as [`TransportEvent::Error`].
    fn open(&mut self, url: &str, sink: EventSink) -> io::Result<()>;

    /// Queue one frame for sending.
    fn send(&mut self, frame: Bytes) -> io::Result<()>;

    /// Close the current link, if any. Frames already queued are flushed
    /// first. No events are reported for a link closed this way.
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, url: &str, sink: EventSink) -> io::Result<()> {
        (**self).open(url, sink)
    }

    fn send(&mut self, frame: Bytes) -> io::Result<()> {
        (**self).send(frame)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

#[cfg(feature = "websocket")]
mod websocket {
    use std::io;

    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::handshake::client::Request;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::connect_async;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, trace, warn};

    use super::{EventSink, Transport};

    /// WebSocket sub-protocol requested from the broker.
    const SUBPROTOCOL: &str = "mqtt";

    struct Link {
        outgoing: mpsc::UnboundedSender<Bytes>,
        cancel: CancellationToken,
    }

    /// MQTT over WebSocket (`ws://`) or WebSocket over TLS (`wss://`).
    ///
    /// TLS uses rustls with the webpki root set. Only binary messages carry
    /// MQTT packets; text messages are dropped.
    #[derive(Default)]
    pub struct WebSocketTransport {
        link: Option<Link>,
    }

    impl WebSocketTransport {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Transport for WebSocketTransport {
        fn open(&mut self, url: &str, sink: EventSink) -> io::Result<()> {
            self.close();

            let mut request = url
                .into_client_request()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static(SUBPROTOCOL),
            );

            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|e| io::Error::other(e.to_string()))?;

            let (outgoing, rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            debug!("opening websocket link to {} (attempt {})", url, sink.attempt());
            runtime.spawn(run_link(request, rx, cancel.clone(), sink));

            self.link = Some(Link { outgoing, cancel });
            Ok(())
        }

        fn send(&mut self, frame: Bytes) -> io::Result<()> {
            let link = self
                .link
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no open link"))?;
            link.outgoing
                .send(frame)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "link task stopped"))
        }

        fn close(&mut self) {
            if let Some(link) = self.link.take() {
                link.cancel.cancel();
            }
        }
    }

    impl Drop for WebSocketTransport {
        fn drop(&mut self) {
            self.close();
        }
    }

    async fn run_link(
        request: Request,
        mut outgoing: mpsc::UnboundedReceiver<Bytes>,
        cancel: CancellationToken,
        sink: EventSink,
    ) {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(request) => result,
        };

        let stream = match connected {
            Ok((stream, response)) => {
                debug!(
                    "websocket link up, sub-protocol {:?}",
                    response.headers().get("Sec-WebSocket-Protocol")
                );
                stream
            }
            Err(e) => {
                sink.error(format!("websocket connect: {e}"));
                return;
            }
        };

        sink.opened();
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Flush what was queued before the close was requested.
                    while let Ok(frame) = outgoing.try_recv() {
                        if write.send(Message::Binary(frame)).await.is_err() {
                            break;
                        }
                    }
                    let _ = write.close().await;
                    return;
                }

                frame = outgoing.recv() => {
                    let Some(frame) = frame else {
                        let _ = write.close().await;
                        return;
                    };
                    if let Err(e) = write.send(Message::Binary(frame)).await {
                        sink.error(format!("websocket write: {e}"));
                        return;
                    }
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Binary(data))) => sink.message(data),
                    Some(Ok(Message::Ping(_))) => {
                        trace!("websocket ping");
                        // The pong is queued by tungstenite; push it out.
                        if let Err(e) = write.flush().await {
                            sink.error(format!("websocket write: {e}"));
                            return;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        warn!("dropping {} byte text message", text.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("websocket closed by broker: {:?}", frame);
                        sink.closed();
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        sink.error(format!("websocket read: {e}"));
                        return;
                    }
                    None => {
                        sink.closed();
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);

        sink.opened();
        sink.message(Bytes::from_static(&[0xD0, 0x00]));
        sink.error("reset");
        sink.closed();

        assert_eq!(rx.try_recv().unwrap(), (7, TransportEvent::Opened));
        assert_eq!(
            rx.try_recv().unwrap(),
            (7, TransportEvent::Message(Bytes::from_static(&[0xD0, 0x00])))
        );
        assert_eq!(rx.try_recv().unwrap(), (7, TransportEvent::Error("reset".into())));
        assert_eq!(rx.try_recv().unwrap(), (7, TransportEvent::Closed));
    }

    #[test]
    fn test_sink_after_session_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(1, tx);
        drop(rx);
        assert!(sink.is_closed());
        sink.opened();
    }

    #[cfg(feature = "websocket")]
    #[tokio::test]
    async fn test_websocket_rejects_bad_url() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WebSocketTransport::new();
        assert!(transport.open("not a url", EventSink::new(1, tx)).is_err());
        assert!(transport.send(Bytes::from_static(&[0xC0, 0x00])).is_err());
    }

    #[cfg(feature = "websocket")]
    #[tokio::test]
    async fn test_websocket_reports_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WebSocketTransport::new();
        transport
            .open(&format!("ws://127.0.0.1:{port}/mqtt"), EventSink::new(3, tx))
            .unwrap();

        let (attempt, event) = rx.recv().await.unwrap();
        assert_eq!(attempt, 3);
        assert!(matches!(event, TransportEvent::Error(_)));
    }

    #[cfg(feature = "websocket")]
    #[tokio::test]
    async fn test_websocket_exchanges_binary_frames() {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;
        use tokio_tungstenite::tungstenite::handshake::server::{
            ErrorResponse, Request, Response,
        };
        use tokio_tungstenite::tungstenite::http::HeaderValue;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let accept = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                assert_eq!(req.headers().get("Sec-WebSocket-Protocol").unwrap(), "mqtt");
                resp.headers_mut()
                    .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mqtt"));
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, accept)
                .await
                .unwrap();

            let received = ws.next().await.unwrap().unwrap();
            ws.send(Message::text("ignored")).await.unwrap();
            ws.send(Message::binary(Bytes::from_static(&[0xD0, 0x00])))
                .await
                .unwrap();
            received
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WebSocketTransport::new();
        transport
            .open(&format!("ws://127.0.0.1:{port}/mqtt"), EventSink::new(5, tx))
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), (5, TransportEvent::Opened));
        transport.send(Bytes::from_static(&[0xC0, 0x00])).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            (5, TransportEvent::Message(Bytes::from_static(&[0xD0, 0x00])))
        );
        assert_eq!(
            broker.await.unwrap(),
            Message::binary(Bytes::from_static(&[0xC0, 0x00]))
        );
        transport.close();
    }
}
