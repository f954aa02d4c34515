//! The currency server's command set.
//!
//! A request is one line; its first whitespace-separated word names the
//! command (case-insensitive) and the rest are arguments:
//!
//! | Request                              | Reply                          |
//! |--------------------------------------|--------------------------------|
//! | *(empty)*                            | `+ OK`                         |
//! | `help`                               | one data line per command, `+ OK` |
//! | `hello`                              | `+ Hello`                      |
//! | `goodbye`                            | `+ Goodbye`, then close        |
//! | `stop`                               | `+ Stopping`, then stop server |
//! | `convert <from> <value> to <to>`     | `+ <value to 2 decimals>`      |
//!
//! Anything else gets `- Unknown command`.  Arguments after `hello`,
//! `goodbye`, `help` and `stop` are ignored.

use linecmd_core::Response;
use thiserror::Error;

use super::rates::{convert, ExchangeRates, RateError};

/// Data lines of the `help` reply, in order.
pub const HELP_LINES: [&str; 5] = [
    "convert <name> <value> to <name>",
    "goodbye",
    "hello",
    "help",
    "stop",
];

/// One parsed request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Help,
    Hello,
    Goodbye,
    Stop,
    Convert {
        from: String,
        amount: f64,
        to: String,
    },
}

/// Why a request line could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),

    #[error("syntax error")]
    Syntax,
}

impl CommandError {
    /// Comment of the failure status line sent for this error.
    pub fn reply_comment(&self) -> &'static str {
        match self {
            Self::Unknown(_) => "Unknown command",
            Self::Syntax => "Syntax error",
        }
    }
}

impl Command {
    /// Parses one request line (terminator already stripped).
    ///
    /// # Errors
    ///
    /// [`CommandError::Unknown`] for an unrecognised command word and
    /// [`CommandError::Syntax`] for a `convert` with bad arguments.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Self::Empty);
        };
        match verb.to_ascii_lowercase().as_str() {
            "help" => Ok(Self::Help),
            "hello" => Ok(Self::Hello),
            "goodbye" => Ok(Self::Goodbye),
            "stop" => Ok(Self::Stop),
            "convert" => parse_convert(words.collect()),
            _ => Err(CommandError::Unknown(verb.to_string())),
        }
    }
}

fn parse_convert(args: Vec<&str>) -> Result<Command, CommandError> {
    let [from, value, keyword, to] = args.as_slice() else {
        return Err(CommandError::Syntax);
    };
    if !keyword.eq_ignore_ascii_case("to") {
        return Err(CommandError::Syntax);
    }
    let amount: f64 = value.parse().map_err(|_| CommandError::Syntax)?;
    if !amount.is_finite() {
        return Err(CommandError::Syntax);
    }
    Ok(Command::Convert {
        from: from.to_string(),
        amount,
        to: to.to_string(),
    })
}

/// What the connection does once the reply has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    KeepOpen,
    /// Close this connection.
    Close,
    /// Stop accepting and close every live connection.
    StopServer,
}

/// The response to one request plus the follow-up action.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub response: Response,
    pub follow_up: FollowUp,
}

impl Reply {
    fn ok(comment: impl Into<String>) -> Self {
        Self {
            response: Response::ok(comment),
            follow_up: FollowUp::KeepOpen,
        }
    }

    fn error(comment: impl Into<String>) -> Self {
        Self {
            response: Response::error(comment),
            follow_up: FollowUp::KeepOpen,
        }
    }

    /// Reply to a line that was not valid UTF-8.
    pub fn malformed() -> Self {
        Self::error("Malformed command")
    }
}

/// Executes a parsed command against `rates`.
pub fn execute<R>(command: &Command, rates: &R) -> Reply
where
    R: ExchangeRates + ?Sized,
{
    match command {
        Command::Empty => Reply::ok("OK"),
        Command::Help => Reply {
            response: Response::Success {
                comment: "OK".to_string(),
                lines: HELP_LINES.iter().map(|l| l.to_string()).collect(),
            },
            follow_up: FollowUp::KeepOpen,
        },
        Command::Hello => Reply::ok("Hello"),
        Command::Goodbye => Reply {
            follow_up: FollowUp::Close,
            ..Reply::ok("Goodbye")
        },
        Command::Stop => Reply {
            follow_up: FollowUp::StopServer,
            ..Reply::ok("Stopping")
        },
        Command::Convert { from, amount, to } => match convert(rates, from, *amount, to) {
            Ok(value) => Reply::ok(format!("{value:.2}")),
            Err(RateError::OutOfRange { .. }) => Reply::error("Value out of range"),
            Err(_) => Reply::error("Unknown currency"),
        },
    }
}

/// Parses and executes one request line.
pub fn handle_line<R>(line: &str, rates: &R) -> Reply
where
    R: ExchangeRates + ?Sized,
{
    match Command::parse(line) {
        Ok(command) => execute(&command, rates),
        Err(e) => Reply::error(e.reply_comment()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::rates::{MockExchangeRates, RateTable};

    fn table() -> RateTable {
        let mut table = RateTable::new("USD").unwrap();
        table.insert("EUR", 1.25).unwrap();
        table.insert("GBP", 2.0).unwrap();
        table
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_parse_empty_and_blank_lines() {
        assert_eq!(Command::parse(""), Ok(Command::Empty));
        assert_eq!(Command::parse("   \t "), Ok(Command::Empty));
    }

    #[test]
    fn test_parse_command_word_is_case_insensitive() {
        assert_eq!(Command::parse("HeLLo"), Ok(Command::Hello));
        assert_eq!(Command::parse("  STOP  "), Ok(Command::Stop));
    }

    #[test]
    fn test_parse_ignores_arguments_of_simple_commands() {
        assert_eq!(Command::parse("goodbye now"), Ok(Command::Goodbye));
    }

    #[test]
    fn test_parse_convert() {
        // Arrange / Act
        let command = Command::parse("convert usd 10.5 TO eur").unwrap();

        // Assert
        assert_eq!(
            command,
            Command::Convert {
                from: "usd".to_string(),
                amount: 10.5,
                to: "eur".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_convert_syntax_errors() {
        for line in [
            "convert",
            "convert USD 1",
            "convert USD 1 into EUR",
            "convert USD one to EUR",
            "convert USD 1 to EUR extra",
            "convert USD inf to EUR",
            "convert USD NaN to EUR",
        ] {
            assert_eq!(Command::parse(line), Err(CommandError::Syntax), "{line:?}");
        }
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(
            Command::parse("launch rockets"),
            Err(CommandError::Unknown("launch".to_string()))
        );
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    #[test]
    fn test_empty_line_replies_ok() {
        let reply = handle_line("", &table());
        assert_eq!(reply.response.to_wire_lines(), vec!["+ OK"]);
        assert_eq!(reply.follow_up, FollowUp::KeepOpen);
    }

    #[test]
    fn test_help_lists_commands_then_ok() {
        let reply = handle_line("help", &table());

        assert_eq!(
            reply.response.to_wire_lines(),
            vec![
                "  convert <name> <value> to <name>",
                "  goodbye",
                "  hello",
                "  help",
                "  stop",
                "+ OK",
            ]
        );
    }

    #[test]
    fn test_hello_goodbye_stop_replies_and_follow_ups() {
        let rates = table();

        let hello = handle_line("hello", &rates);
        let goodbye = handle_line("goodbye", &rates);
        let stop = handle_line("stop", &rates);

        assert_eq!(hello.response, Response::ok("Hello"));
        assert_eq!(hello.follow_up, FollowUp::KeepOpen);
        assert_eq!(goodbye.response, Response::ok("Goodbye"));
        assert_eq!(goodbye.follow_up, FollowUp::Close);
        assert_eq!(stop.response, Response::ok("Stopping"));
        assert_eq!(stop.follow_up, FollowUp::StopServer);
    }

    #[test]
    fn test_convert_formats_two_decimals() {
        let reply = handle_line("convert EUR 8 to GBP", &table());
        assert_eq!(reply.response, Response::ok("5.00"));
    }

    #[test]
    fn test_convert_rounds_to_two_decimals() {
        let reply = handle_line("convert usd 1 to eur", &table());
        assert_eq!(reply.response, Response::ok("0.80"));
    }

    #[test]
    fn test_convert_unknown_currency() {
        let reply = handle_line("convert USD 1 to XYZ", &table());
        assert_eq!(reply.response, Response::error("Unknown currency"));
        assert_eq!(reply.follow_up, FollowUp::KeepOpen);
    }

    #[test]
    fn test_convert_overflow_replies_out_of_range() {
        let reply = handle_line("convert EUR 1.5e308 to USD", &table());
        assert_eq!(reply.response, Response::error("Value out of range"));
        assert_eq!(reply.follow_up, FollowUp::KeepOpen);
    }

    #[test]
    fn test_bad_convert_replies_syntax_error() {
        let reply = handle_line("convert USD lots to EUR", &table());
        assert_eq!(reply.response, Response::error("Syntax error"));
    }

    #[test]
    fn test_unknown_command_reply() {
        let reply = handle_line("fly", &table());
        assert_eq!(reply.response.to_wire_lines(), vec!["- Unknown command"]);
    }

    #[test]
    fn test_malformed_reply() {
        assert_eq!(Reply::malformed().response, Response::error("Malformed command"));
    }

    #[test]
    fn test_only_convert_consults_the_rate_source() {
        // Arrange: any rate lookup would violate `times(0)`.
        let mut rates = MockExchangeRates::new();
        rates.expect_rate().times(0);

        // Act
        for line in ["", "help", "hello", "goodbye", "stop", "nonsense"] {
            let _ = handle_line(line, &rates);
        }
    }

    #[test]
    fn test_convert_with_mocked_rates() {
        let mut rates = MockExchangeRates::new();
        rates.expect_rate().returning(|code| match code {
            "BTC" => Some(50_000.0),
            "USD" => Some(1.0),
            _ => None,
        });

        let reply = handle_line("convert BTC 0.5 to USD", &rates);

        assert_eq!(reply.response, Response::ok("25000.00"));
    }
}
