//! Network infrastructure for the client.
//!
//! Architecture:
//! - [`CurrencyClient`] owns a [`LineCommandConnection`] over a TCP socket and
//!   drives it with the tokio readiness helpers, one event at a time.
//! - The connection's delegate, [`ResponseCollector`], reassembles response
//!   lines and forwards [`ClientEvent`]s on an `mpsc` channel.
//! - [`CurrencyClient::next_exchange`] drains that channel, pairing each
//!   response with the oldest unanswered request.

use std::net::SocketAddr;
use std::rc::Rc;

use linecmd_core::stream::tcp::{self, TaskContext};
use linecmd_core::{
    ConnectionConfig, ConnectionError, ErrorKind, LineCommandConnection, LineConfig, LineDelegate,
    LineSink, LineWriter, Response, ResponseAssembler, ResponseError,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::requests::{Exchange, RequestTracker};

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{host} did not resolve to any address")]
    NoAddress { host: String },

    #[error("failed to connect to server at {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not open connection: {0}")]
    Open(#[source] ConnectionError),

    /// Requests are single lines; CR and LF cannot be sent.
    #[error("request contains a line break: {0:?}")]
    InvalidRequest(String),

    #[error("not connected")]
    NotConnected,

    #[error("server sent a malformed response: {0}")]
    MalformedResponse(#[from] ResponseError),

    #[error("connection closed with {pending} unanswered request(s) (error: {error:?})")]
    Closed {
        pending: usize,
        error: Option<ErrorKind>,
    },
}

/// Events emitted by the connection delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A complete response arrived.
    Response(Response),
    /// A line arrived that is not part of any valid response.
    Malformed(ResponseError),
    /// The connection closed by itself; `None` means the server hung up.
    Closed(Option<ErrorKind>),
}

/// Line delegate that turns response lines into [`ClientEvent`]s.
pub struct ResponseCollector {
    assembler: ResponseAssembler,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ResponseCollector {
    pub fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            assembler: ResponseAssembler::new(),
            events,
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("client dropped; event discarded");
        }
    }
}

impl LineDelegate for ResponseCollector {
    fn did_receive_line(&mut self, writer: &mut LineWriter<'_>, line: &str) {
        match self.assembler.push_line(line) {
            Ok(Some(response)) => self.emit(ClientEvent::Response(response)),
            Ok(None) => {}
            Err(e) => {
                warn!(connection = %writer.name(), "{e}");
                self.emit(ClientEvent::Malformed(e));
            }
        }
    }

    fn did_receive_malformed_line(
        &mut self,
        writer: &mut LineWriter<'_>,
        bytes: &[u8],
        error: &ConnectionError,
    ) {
        warn!(connection = %writer.name(), "{error}");
        self.emit(ClientEvent::Malformed(ResponseError {
            line: String::from_utf8_lossy(bytes).into_owned(),
        }));
    }

    fn will_close_with_error(&mut self, error: Option<&ConnectionError>) {
        match error {
            None => info!("server closed the connection"),
            Some(e) => warn!("connection closed: {e}"),
        }
        self.emit(ClientEvent::Closed(error.map(ConnectionError::kind)));
    }
}

/// A connection to a currency server.
///
/// Not `Send`: use it from a current-thread runtime or a `LocalSet`.
pub struct CurrencyClient {
    conn: LineCommandConnection<ResponseCollector>,
    socket: Rc<TcpStream>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    tracker: RequestTracker,
}

impl CurrencyClient {
    /// Resolves `host` and connects to the first address it yields.
    ///
    /// # Errors
    ///
    /// [`ClientError::Resolve`] / [`ClientError::NoAddress`] if the name does
    /// not resolve, otherwise as [`connect_addr`](Self::connect_addr).
    pub async fn connect(host: &str, port: u16, line_config: LineConfig) -> Result<Self, ClientError> {
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| ClientError::Resolve {
                host: host.to_string(),
                source,
            })?;
        let addr = addrs.next().ok_or_else(|| ClientError::NoAddress {
            host: host.to_string(),
        })?;
        Self::connect_addr(addr, line_config).await
    }

    /// Connects to `addr` and opens the line connection.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectFailed`] if the TCP connect fails,
    /// [`ClientError::Open`] if the connection was already used, and
    /// [`ClientError::Closed`] if an endpoint fails to open.
    pub async fn connect_addr(addr: SocketAddr, line_config: LineConfig) -> Result<Self, ClientError> {
        let socket = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::ConnectFailed { addr, source })?;
        info!("connected to server at {addr}");

        let (socket, input, output) = tcp::endpoints(socket);
        let (tx, events) = mpsc::unbounded_channel();
        let context: Rc<TaskContext> = TaskContext::new();
        let mut conn = LineCommandConnection::new(
            input,
            output,
            context,
            ConnectionConfig::named(addr.to_string()),
            line_config,
            ResponseCollector::new(tx),
        );
        conn.open().map_err(ClientError::Open)?;
        if !conn.is_open() {
            return Err(ClientError::Closed {
                pending: 0,
                error: conn.error().map(ConnectionError::kind),
            });
        }

        Ok(Self {
            conn,
            socket,
            events,
            tracker: RequestTracker::new(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// Requests sent but not yet answered.
    pub fn pending(&self) -> usize {
        self.tracker.pending()
    }

    /// Sends one request line.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidRequest`] if `request` contains CR or LF,
    /// [`ClientError::NotConnected`] if the connection is already closed, and
    /// [`ClientError::Closed`] if sending closed it (for example a request
    /// longer than the line limit).
    pub fn send_request(&mut self, request: &str) -> Result<(), ClientError> {
        if request.contains(['\r', '\n']) {
            return Err(ClientError::InvalidRequest(request.to_string()));
        }
        if !self.conn.is_open() {
            return Err(ClientError::NotConnected);
        }
        self.conn.send_line(request);
        if !self.conn.is_open() {
            return Err(ClientError::Closed {
                pending: self.tracker.pending(),
                error: self.conn.error().map(ConnectionError::kind),
            });
        }
        debug!(request, "sent");
        self.tracker.record(request);
        Ok(())
    }

    /// Waits for the next response and pairs it with its request.
    ///
    /// Returns `Ok(None)` once the connection has closed cleanly with no
    /// request outstanding.
    ///
    /// # Errors
    ///
    /// [`ClientError::MalformedResponse`] for a line that fits no response
    /// shape, and [`ClientError::Closed`] if the connection closed with an
    /// error or with requests still unanswered.
    pub async fn next_exchange(&mut self) -> Result<Option<Exchange>, ClientError> {
        loop {
            while let Ok(event) = self.events.try_recv() {
                match event {
                    ClientEvent::Response(response) => {
                        return Ok(Some(self.tracker.complete(response)));
                    }
                    ClientEvent::Malformed(e) => return Err(e.into()),
                    ClientEvent::Closed(error) => debug!(?error, "close event"),
                }
            }
            if !self.conn.is_open() {
                let error = self.conn.error().map(ConnectionError::kind);
                if error.is_none() && self.tracker.is_idle() {
                    return Ok(None);
                }
                return Err(ClientError::Closed {
                    pending: self.tracker.pending(),
                    error,
                });
            }
            let ready = self.socket.ready(tcp::interest(&self.conn)).await;
            tcp::dispatch(&mut self.conn, ready);
        }
    }

    /// Sends `request` and waits for its response.
    ///
    /// # Errors
    ///
    /// As [`send_request`](Self::send_request) and
    /// [`next_exchange`](Self::next_exchange); a clean close before the
    /// response arrives is reported as [`ClientError::Closed`].
    pub async fn round_trip(&mut self, request: &str) -> Result<Exchange, ClientError> {
        self.send_request(request)?;
        match self.next_exchange().await? {
            Some(exchange) => Ok(exchange),
            None => Err(ClientError::Closed {
                pending: self.tracker.pending(),
                error: None,
            }),
        }
    }

    /// Closes the connection.  Unanswered requests are abandoned.
    pub fn close(&mut self) {
        self.conn.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use linecmd_core::stream::memory::{ManualRunLoop, Pipe};
    use linecmd_core::{StreamEvent, StreamEventTarget};

    fn collector() -> (
        Pipe,
        LineCommandConnection<ResponseCollector>,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let incoming = Pipe::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conn = LineCommandConnection::new(
            incoming.reader(),
            Pipe::new().writer(),
            ManualRunLoop::new(),
            ConnectionConfig::named("client-test"),
            LineConfig::default(),
            ResponseCollector::new(tx),
        );
        conn.open().unwrap();
        (incoming, conn, rx)
    }

    #[test]
    fn test_collector_reassembles_multi_line_response() {
        // Arrange
        let (incoming, mut conn, mut rx) = collector();

        // Act
        incoming.feed(b"  goodbye\r\n  hello\r\n+ OK\r\n");
        conn.handle_stream_event(StreamEvent::Readable);

        // Assert
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Response(Response::Success {
                comment: "OK".to_string(),
                lines: vec!["goodbye".to_string(), "hello".to_string()],
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_collector_reports_garbage_line() {
        let (incoming, mut conn, mut rx) = collector();

        incoming.feed(b"garbage\r\n");
        conn.handle_stream_event(StreamEvent::Readable);

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Malformed(ResponseError {
                line: "garbage".to_string()
            })
        );
        assert!(conn.is_open());
    }

    #[test]
    fn test_collector_reports_non_utf8_line() {
        let (incoming, mut conn, mut rx) = collector();

        incoming.feed(b"+ \xff\r\n");
        conn.handle_stream_event(StreamEvent::Readable);

        assert!(matches!(rx.try_recv().unwrap(), ClientEvent::Malformed(_)));
    }

    #[test]
    fn test_collector_reports_server_hang_up() {
        let (incoming, mut conn, mut rx) = collector();

        incoming.feed(b"+ Goodbye\r\n");
        incoming.close_write();
        conn.handle_stream_event(StreamEvent::Readable);

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Response(Response::ok("Goodbye"))
        );
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Closed(None));
    }
}
