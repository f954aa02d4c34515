//! Encoding and reassembly of multi-line responses.

use thiserror::Error;

use crate::line::LineSink;

/// Prefix of a data line.
pub const DATA_PREFIX: &str = "  ";
/// Prefix of a success status line.
pub const SUCCESS_PREFIX: &str = "+ ";
/// Prefix of a failure status line.
pub const FAILURE_PREFIX: &str = "- ";

/// One complete response: its data lines and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `"+ "` status.
    Success { comment: String, lines: Vec<String> },
    /// `"- "` status.
    Failure { comment: String, lines: Vec<String> },
}

impl Response {
    /// A success response without data lines.
    pub fn ok(comment: impl Into<String>) -> Self {
        Self::Success {
            comment: comment.into(),
            lines: Vec::new(),
        }
    }

    /// A failure response without data lines.
    pub fn error(comment: impl Into<String>) -> Self {
        Self::Failure {
            comment: comment.into(),
            lines: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn comment(&self) -> &str {
        match self {
            Self::Success { comment, .. } | Self::Failure { comment, .. } => comment,
        }
    }

    pub fn lines(&self) -> &[String] {
        match self {
            Self::Success { lines, .. } | Self::Failure { lines, .. } => lines,
        }
    }

    /// The wire lines for this response, without CR LF.
    pub fn to_wire_lines(&self) -> Vec<String> {
        let prefix = if self.is_success() {
            SUCCESS_PREFIX
        } else {
            FAILURE_PREFIX
        };
        let mut out: Vec<String> = self
            .lines()
            .iter()
            .map(|line| format!("{DATA_PREFIX}{line}"))
            .collect();
        out.push(format!("{prefix}{}", self.comment()));
        out
    }
}

/// A received line that fits none of the response line shapes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed response line: {line:?}")]
pub struct ResponseError {
    pub line: String,
}

/// Collects data lines until a status line completes a [`Response`].
///
/// Responses arrive in request order, so each completed response answers
/// the oldest request that has not been answered yet.
///
/// # Examples
///
/// ```rust
/// use linecmd_core::{Response, ResponseAssembler};
///
/// let mut asm = ResponseAssembler::new();
/// assert_eq!(asm.push_line("  goodbye").unwrap(), None);
/// let response = asm.push_line("+ OK").unwrap().unwrap();
/// assert_eq!(
///     response,
///     Response::Success { comment: "OK".into(), lines: vec!["goodbye".into()] }
/// );
/// ```
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    pending: Vec<String>,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data lines received since the last status line.
    pub fn pending_lines(&self) -> &[String] {
        &self.pending
    }

    /// Feeds one received line (without CR LF).
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError`] for a line that is neither a data line nor a
    /// status line.  Pending data lines are kept, so the caller may choose to
    /// carry on.
    pub fn push_line(&mut self, line: &str) -> Result<Option<Response>, ResponseError> {
        if let Some(data) = line.strip_prefix(DATA_PREFIX) {
            self.pending.push(data.to_string());
            return Ok(None);
        }
        let lines = std::mem::take(&mut self.pending);
        if let Some(comment) = line.strip_prefix(SUCCESS_PREFIX) {
            return Ok(Some(Response::Success {
                comment: comment.to_string(),
                lines,
            }));
        }
        if let Some(comment) = line.strip_prefix(FAILURE_PREFIX) {
            return Ok(Some(Response::Failure {
                comment: comment.to_string(),
                lines,
            }));
        }
        self.pending = lines;
        Err(ResponseError {
            line: line.to_string(),
        })
    }

    /// Discards any pending data lines.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Server-side helpers for writing responses to any [`LineSink`].
pub trait ResponseSink: LineSink {
    /// Sends `"+ " + comment`.
    fn send_response(&mut self, comment: &str) {
        self.send_line(&format!("{SUCCESS_PREFIX}{comment}"));
    }

    /// Sends each of `lines` prefixed by two spaces, then `"+ " + comment`.
    /// With no lines this is the same as [`send_response`](Self::send_response).
    fn send_response_lines<S: AsRef<str>>(&mut self, comment: &str, lines: &[S]) {
        let response = Response::Success {
            comment: comment.to_string(),
            lines: lines.iter().map(|l| l.as_ref().to_string()).collect(),
        };
        self.send_lines(&response.to_wire_lines());
    }

    /// Sends `"- " + comment`.
    fn send_error(&mut self, comment: &str) {
        self.send_line(&format!("{FAILURE_PREFIX}{comment}"));
    }
}

impl<T: LineSink> ResponseSink for T {}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects lines instead of sending them.
    #[derive(Default)]
    struct Collect(Vec<String>);

    impl LineSink for Collect {
        fn send_line(&mut self, line: &str) {
            self.0.push(line.to_string());
        }

        fn send_lines<S: AsRef<str>>(&mut self, lines: &[S]) {
            self.0.extend(lines.iter().map(|l| l.as_ref().to_string()));
        }
    }

    #[test]
    fn test_status_only_success() {
        let mut asm = ResponseAssembler::new();

        let response = asm.push_line("+ OK").unwrap();

        assert_eq!(response, Some(Response::ok("OK")));
    }

    #[test]
    fn test_failure_keeps_data_lines() {
        // Arrange
        let mut asm = ResponseAssembler::new();
        asm.push_line("  detail").unwrap();

        // Act
        let response = asm.push_line("- Unknown command").unwrap().unwrap();

        // Assert
        assert!(!response.is_success());
        assert_eq!(response.comment(), "Unknown command");
        assert_eq!(response.lines(), ["detail".to_string()]);
    }

    #[test]
    fn test_data_line_keeps_inner_spaces() {
        let mut asm = ResponseAssembler::new();
        asm.push_line("    indented").unwrap();
        let response = asm.push_line("+ OK").unwrap().unwrap();
        assert_eq!(response.lines(), ["  indented".to_string()]);
    }

    #[test]
    fn test_unrecognised_line_is_rejected_and_pending_kept() {
        let mut asm = ResponseAssembler::new();
        asm.push_line("  kept").unwrap();

        let err = asm.push_line("garbage").unwrap_err();

        assert_eq!(err.line, "garbage");
        assert_eq!(asm.pending_lines(), ["kept".to_string()]);
    }

    #[test]
    fn test_consecutive_responses_are_independent() {
        let mut asm = ResponseAssembler::new();
        asm.push_line("  a").unwrap();
        let first = asm.push_line("+ one").unwrap().unwrap();
        let second = asm.push_line("+ two").unwrap().unwrap();

        assert_eq!(first.lines().len(), 1);
        assert!(second.lines().is_empty());
    }

    #[test]
    fn test_to_wire_lines_prefixes_data_and_status() {
        let response = Response::Success {
            comment: "OK".to_string(),
            lines: vec!["hello".to_string(), "help".to_string()],
        };

        assert_eq!(
            response.to_wire_lines(),
            vec!["  hello".to_string(), "  help".to_string(), "+ OK".to_string()]
        );
    }

    #[test]
    fn test_response_sink_helpers() {
        // Arrange
        let mut sink = Collect::default();

        // Act
        sink.send_response("Hello");
        sink.send_response_lines("OK", &["goodbye", "hello"]);
        sink.send_response_lines::<&str>("Empty", &[]);
        sink.send_error("Syntax error");

        // Assert
        assert_eq!(
            sink.0,
            vec!["+ Hello", "  goodbye", "  hello", "+ OK", "+ Empty", "- Syntax error"]
        );
    }

    #[test]
    fn test_status_prefix_requires_space() {
        let mut asm = ResponseAssembler::new();
        assert!(asm.push_line("+OK").is_err());
    }
}
