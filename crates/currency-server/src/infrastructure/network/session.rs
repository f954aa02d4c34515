//! One client connection on the server side.

use std::rc::Rc;

use linecmd_core::stream::tcp::{self, TaskContext};
use linecmd_core::{
    ConnectionConfig, ConnectionError, ErrorKind, LineCommandConnection, LineConfig, LineDelegate,
    LineWriter, Response, ResponseSink,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::commands::{handle_line, FollowUp, Reply};
use crate::application::rates::ExchangeRates;

/// Events sent from sessions (and stop handles) to the server loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A client sent `stop`, or a [`super::StopHandle`] was used.
    StopRequested { id: Uuid },
    /// A connection closed by itself (EOF, transport or protocol error).
    ConnectionClosed { id: Uuid, error: Option<ErrorKind> },
    /// A session task finished, for whatever reason.
    SessionEnded { id: Uuid },
}

/// Line delegate serving the currency command set.
pub struct CurrencySession {
    id: Uuid,
    rates: Rc<dyn ExchangeRates>,
    events: mpsc::UnboundedSender<ServerEvent>,
    requests: u64,
}

impl CurrencySession {
    pub fn new(
        id: Uuid,
        rates: Rc<dyn ExchangeRates>,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            rates,
            events,
            requests: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Requests handled so far, malformed ones included.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    fn respond(&mut self, writer: &mut LineWriter<'_>, reply: Reply) {
        match &reply.response {
            Response::Success { comment, lines } => writer.send_response_lines(comment, lines),
            Response::Failure { comment, .. } => writer.send_error(comment),
        }
        match reply.follow_up {
            FollowUp::KeepOpen => {}
            FollowUp::Close => {
                debug!(connection = %writer.name(), "closing after goodbye");
                writer.close_when_flushed();
            }
            FollowUp::StopServer => {
                info!(connection = %writer.name(), "client requested server stop");
                self.emit(ServerEvent::StopRequested { id: self.id });
            }
        }
    }

    fn emit(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            debug!(id = %self.id, "server loop gone; event dropped");
        }
    }
}

impl LineDelegate for CurrencySession {
    fn did_receive_line(&mut self, writer: &mut LineWriter<'_>, line: &str) {
        self.requests += 1;
        debug!(connection = %writer.name(), request = line, "request");
        let reply = handle_line(line, &*self.rates);
        self.respond(writer, reply);
    }

    fn did_receive_malformed_line(
        &mut self,
        writer: &mut LineWriter<'_>,
        bytes: &[u8],
        error: &ConnectionError,
    ) {
        self.requests += 1;
        warn!(connection = %writer.name(), len = bytes.len(), "{error}");
        self.respond(writer, Reply::malformed());
    }

    fn will_close_with_error(&mut self, error: Option<&ConnectionError>) {
        match error {
            None => info!(id = %self.id, "client disconnected"),
            Some(e) => warn!(id = %self.id, "connection closed: {e}"),
        }
        self.emit(ServerEvent::ConnectionClosed {
            id: self.id,
            error: error.map(ConnectionError::kind),
        });
    }
}

/// Serves one accepted socket until it closes or `shutdown` fires.
///
/// On shutdown (or if the sender is dropped) the connection is closed
/// explicitly, so the delegate is not notified.  `SessionEnded` is always
/// sent last.
pub async fn run_session(
    socket: TcpStream,
    id: Uuid,
    mut config: ConnectionConfig,
    line_config: LineConfig,
    rates: Rc<dyn ExchangeRates>,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: oneshot::Receiver<()>,
) {
    if let Ok(peer) = socket.peer_addr() {
        config.name = peer.to_string();
    }
    let (handle, input, output) = tcp::endpoints(socket);
    let context = TaskContext::new();
    let session = CurrencySession::new(id, rates, events.clone());
    let mut conn = LineCommandConnection::new(
        input,
        output,
        context.clone(),
        config,
        line_config,
        session,
    );

    match conn.open() {
        Ok(()) => {
            let stopped = tokio::select! {
                _ = tcp::drive(&mut conn, &handle, &context) => false,
                _ = shutdown => true,
            };
            if stopped {
                debug!(connection = %conn.name(), "closing for server shutdown");
                conn.close();
            }
        }
        Err(e) => warn!(id = %id, "failed to open connection: {e}"),
    }

    debug!(
        connection = %conn.name(),
        requests = conn.delegate().requests(),
        "session finished"
    );
    let _ = events.send(ServerEvent::SessionEnded { id });
}
