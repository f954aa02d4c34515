//! Remote currency server entry point.
//!
//! Loads the TOML configuration, applies command-line overrides, and serves
//! the currency command set on a single-threaded Tokio runtime.
//!
//! # Usage
//!
//! ```text
//! currency-server [OPTIONS]
//!
//! Options:
//!   -c, --config <PATH>   Configuration file [env: CURRENCY_SERVER_CONFIG]
//!   -p, --port <PORT>     Listening port, overrides the file [env: CURRENCY_SERVER_PORT]
//!       --bind <ADDR>     Bind address, overrides the file [env: CURRENCY_SERVER_BIND]
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML file or defaults
//!  └─ LocalSet (current-thread runtime)
//!       ├─ CurrencyServer::run()   accept loop + live connection table
//!       │    └─ run_session() per connection (line connection + tcp driver)
//!       └─ Ctrl-C watcher          StopHandle::stop()
//! ```

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use currency_server::infrastructure::network::{CurrencyServer, ServerSettings};
use currency_server::infrastructure::storage::config::{
    default_config_path, load_config, AppConfig,
};

/// Remote currency conversion server.
#[derive(Debug, Parser)]
#[command(
    name = "currency-server",
    about = "Serves currency conversions over a CR LF line protocol",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `server.toml` in the platform config directory.  A missing
    /// file means built-in defaults.
    #[arg(short, long, env = "CURRENCY_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port to listen on (0 picks a free port).
    #[arg(short, long, env = "CURRENCY_SERVER_PORT")]
    port: Option<u16>,

    /// IP address to bind to.
    #[arg(long, env = "CURRENCY_SERVER_BIND")]
    bind: Option<String>,
}

impl Cli {
    /// Loads the configuration file and applies the overrides.
    fn into_config(self) -> anyhow::Result<AppConfig> {
        let mut config = match self.config.or_else(default_config_path) {
            Some(path) => load_config(&path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => AppConfig::default(),
        };
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(bind) = self.bind {
            config.network.bind_address = bind;
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    // Level comes from the config file unless `RUST_LOG` is set.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building the Tokio runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, serve(config))
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let rates = config.rates.to_table().context("building the rate table")?;
    let addr = config.network.socket_addr()?;
    info!(
        base = rates.base(),
        currencies = rates.len(),
        "rate table loaded"
    );

    let server = CurrencyServer::bind(addr, ServerSettings::from(&config), Rc::new(rates)).await?;
    info!("currency server listening on {}", server.local_addr()?);

    let stop = server.stop_handle();
    tokio::task::spawn_local(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                stop.stop();
            }
            Err(e) => warn!("cannot listen for Ctrl-C: {e}"),
        }
    });

    let stats = server.run().await;
    info!(accepted = stats.accepted, "currency server stopped");
    Ok(())
}
