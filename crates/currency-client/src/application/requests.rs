//! Pairing responses with the requests they answer.

use std::collections::VecDeque;

use linecmd_core::Response;

/// A request and the response that answered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// `None` when the server sent a response nobody asked for.
    pub request: Option<String>,
    pub response: Response,
}

/// FIFO of requests still waiting for their response.
#[derive(Debug, Default)]
pub struct RequestTracker {
    outstanding: VecDeque<String>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request that has just been sent.
    pub fn record(&mut self, request: impl Into<String>) {
        self.outstanding.push_back(request.into());
    }

    /// Pairs `response` with the oldest outstanding request.
    pub fn complete(&mut self, response: Response) -> Exchange {
        Exchange {
            request: self.outstanding.pop_front(),
            response,
        }
    }

    /// Requests sent but not yet answered.
    pub fn pending(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Text lines to show for one exchange.
///
/// A success shows its data lines followed by its comment; a failure shows
/// `error: <comment>`, preceded by any data lines.
pub fn render(exchange: &Exchange) -> Vec<String> {
    let mut out: Vec<String> = exchange.response.lines().to_vec();
    if exchange.response.is_success() {
        out.push(exchange.response.comment().to_string());
    } else {
        out.push(format!("error: {}", exchange.response.comment()));
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
