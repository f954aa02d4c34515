//! Remote currency client entry point.
//!
//! # Usage
//!
//! ```text
//! currency-client [OPTIONS] [REQUEST]...
//!
//! Options:
//!       --host <HOST>   Server host [env: CURRENCY_HOST] [default: 127.0.0.1]
//!   -p, --port <PORT>   Server port [env: CURRENCY_PORT] [default: 12345]
//! ```
//!
//! With requests on the command line, all of them are sent at once and the
//! replies printed in order.  Without, requests are read from stdin one per
//! line until EOF or until the server closes the connection.

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use currency_client::application::requests::{render, Exchange};
use currency_client::infrastructure::network::CurrencyClient;
use linecmd_core::LineConfig;

/// Remote currency conversion client.
#[derive(Debug, Parser)]
#[command(
    name = "currency-client",
    about = "Sends requests to a currency server and prints the replies",
    version
)]
struct Cli {
    #[arg(long, env = "CURRENCY_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, env = "CURRENCY_PORT", default_value_t = 12345)]
    port: u16,

    /// Requests to send, for example `"convert EUR 10 to USD"`.
    requests: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Quiet by default so replies are the only thing on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the Tokio runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut client = CurrencyClient::connect(&cli.host, cli.port, LineConfig::default())
        .await
        .with_context(|| format!("connecting to {}:{}", cli.host, cli.port))?;

    if cli.requests.is_empty() {
        interactive(&mut client).await?;
    } else {
        for request in &cli.requests {
            client.send_request(request)?;
        }
        while client.pending() > 0 {
            match client.next_exchange().await? {
                Some(exchange) => print_exchange(&exchange),
                None => break,
            }
        }
    }
    client.close();
    Ok(())
}

enum Step {
    Input(Option<String>),
    Reply(Option<Exchange>),
}

async fn interactive(client: &mut CurrencyClient) -> anyhow::Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_done = false;

    loop {
        let step = tokio::select! {
            line = stdin.next_line(), if !stdin_done => Step::Input(line.context("reading stdin")?),
            reply = client.next_exchange() => Step::Reply(reply?),
        };
        match step {
            Step::Input(Some(line)) => client.send_request(line.trim_end())?,
            Step::Input(None) => stdin_done = true,
            Step::Reply(Some(exchange)) => print_exchange(&exchange),
            Step::Reply(None) => break,
        }
        if stdin_done && client.pending() == 0 {
            break;
        }
    }
    Ok(())
}

fn print_exchange(exchange: &Exchange) {
    for line in render(exchange) {
        println!("{line}");
    }
}
