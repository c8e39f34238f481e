//! MCC Relay
//!
//! Polls the Mobile Comm Center and relays encrypted device requests to the
//! internal API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use mcc_relay::exchange::MccClient;
use mcc_relay::pipeline::JobProcessor;
use mcc_relay::poller::Poller;
use mcc_relay::session::SessionManager;
use mcc_relay::storage::RelayDatabase;
use mcc_relay::upstream::ApiClient;
use mcc_relay::users::RelayUsers;
use mcc_relay_core::config::{MissingPacketPolicy, RelayConfig, load_config};
use mcc_relay_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "mcc-relay")]
#[command(version, about = "MCC relay - encrypted request relay between devices and the API")]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long, env = "RELAY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Exchange base URL.
    #[arg(long)]
    mcc_url: Option<String>,

    /// Internal API base URL.
    #[arg(long)]
    api_url: Option<String>,

    /// Poll period in milliseconds.
    #[arg(long)]
    poll_frequency: Option<u64>,

    /// Number of parallel dispatch lanes.
    #[arg(long)]
    parallel: Option<usize>,

    /// What to do with jobs missing a packet (deliver or drop).
    #[arg(long)]
    missing_packets: Option<MissingPacketPolicy>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the exchange until interrupted (default).
    Run,
    /// Create a relay user for a site account and register it with the exchange.
    RegisterUser {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        site_user: String,
        /// Replace the user's existing RSA key pair.
        #[arg(long)]
        overwrite_keys: bool,
    },
}

impl Args {
    fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(url) = &self.mcc_url {
            config.mcc.url.clone_from(url);
        }
        if let Some(url) = &self.api_url {
            config.api.url.clone_from(url);
        }
        if let Some(ms) = self.poll_frequency {
            config.mcc.poll_frequency_ms = ms;
        }
        if let Some(n) = self.parallel {
            config.mcc.num_parallel_requests = n;
        }
        if let Some(policy) = self.missing_packets {
            config.missing_packets = policy;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("mcc_relay=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mcc = %config.mcc.url,
        api = %config.api.url,
        "Starting mcc-relay"
    );

    let db_path = match &args.db_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening relay database");
    let db = RelayDatabase::open(&db_path).await?;

    let exchange = Arc::new(MccClient::new(&config.mcc)?);

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, db, exchange).await,
        Command::RegisterUser {
            tenant,
            site_user,
            overwrite_keys,
        } => {
            let users = RelayUsers::new(db, exchange);
            let init = users.register(&tenant, &site_user, overwrite_keys).await?;
            info!(
                tenant = %tenant,
                site_user = %site_user,
                mcc_user = %init.user.mcc_user,
                "Relay user ready"
            );
            print_registration_token(&init.registration_token);
            Ok(())
        }
    }
}

/// The token is single-use and goes to the operator only, never to the logs.
#[allow(clippy::print_stdout)]
fn print_registration_token(token: &str) {
    println!();
    println!("  Registration token (single use, hand it to the device):");
    println!("    {token}");
    println!();
}

async fn run(
    config: RelayConfig,
    db: RelayDatabase,
    exchange: Arc<MccClient>,
) -> anyhow::Result<()> {
    if !config.enabled {
        warn!("Relay is disabled; polling will be idle");
    }

    let upstream = Arc::new(ApiClient::new(
        &config.api,
        Duration::from_secs(config.mcc.request_timeout_secs),
    )?);
    let session = Arc::new(SessionManager::new(upstream.clone()));
    let processor = Arc::new(JobProcessor::new(
        db.clone(),
        exchange.clone(),
        upstream,
        session,
        &config.mcc,
    ));
    let poller = Arc::new(Poller::new(config, db, exchange, processor));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_task = tokio::spawn(poller.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    poll_task.await?;

    info!("mcc-relay stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".mcc-relay").join("relay.db"))
}
