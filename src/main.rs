use anyhow::{Context, Result};
use bridge_relayer::connector::RpcChainConnector;
use bridge_relayer::delivery::DeliveryClient;
use bridge_relayer::relayer::Relayer;
use bridge_relayer::schema::EventSchema;
use bridge_relayer::{units, RelayerConfig};
use clap::{Parser, Subcommand};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "bridge-relayer", version)]
#[command(about = "Relays TokensLocked bridge events to a downstream relayer API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the bridge contract and relay every TokensLocked event
    Run {
        /// TOML config file; settings come from the environment when omitted
        #[arg(short, long)]
        config: Option<String>,
        /// Decode and log events without posting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Load and validate the configuration, then exit
    CheckConfig {
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Convert an amount between denominations (wei, gwei, ether, ...)
    Convert {
        #[arg(allow_hyphen_values = true)]
        value: String,
        from: String,
        to: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, dry_run } => run(config.as_deref(), dry_run).await,
        Commands::CheckConfig { config } => check_config(config.as_deref()),
        Commands::Convert { value, from, to } => {
            let converted = units::convert(&value, &from, &to)?;
            println!("{converted}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&str>) -> Result<RelayerConfig> {
    let config = match path {
        Some(path) => RelayerConfig::load(path),
        None => RelayerConfig::from_env(),
    };
    config.context("Configuration error, relayer not started")
}

async fn run(config_path: Option<&str>, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;

    let endpoint = config.chain_endpoint(EventSchema::tokens_locked());
    let delivery = DeliveryClient::new(config.relayer_url()?, config.delivery_settings())
        .context("Failed to build HTTP client")?;
    let connector = RpcChainConnector::new(config.connector_settings());
    let mut relayer = Relayer::new(connector, endpoint, delivery, config.relay_settings(dry_run));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let signal = shutdown_signal()?;
    tokio::spawn(async move {
        let name = signal.await;
        info!(signal = name, "Shutting down relayer gracefully");
        shutdown.cancel();
    });

    relayer.run(cancel).await;
    Ok(())
}

/// Resolves on the first stop request. Handlers are installed before returning
/// so a signal sent right after startup is not lost.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        "Ctrl-C"
    })
}

fn check_config(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("✅ Configuration is valid");
    println!("  node:            {}", redact(&config.chain.node_url));
    println!("  contract:        {}", config.chain.contract_address);
    println!("  relayer:         {}", redact(&config.relayer.api_url));
    println!("  request timeout: {}s", config.relayer.timeout_seconds);
    println!(
        "  retry:           {} attempts, {}s base delay, x{} backoff, {}s cap",
        config.retry.max_attempts,
        config.retry.base_delay_seconds,
        config.retry.backoff_multiplier,
        config.retry.max_delay_seconds
    );
    println!(
        "  polling:         every {}s, {}s reconnect cooldown",
        config.polling.poll_interval_seconds, config.polling.reconnect_cooldown_seconds
    );
    Ok(())
}

/// Node URLs often embed API keys in the path or query.
fn redact(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}://{}:{}/…", url.scheme(), host, port),
            (Some(host), None) => format!("{}://{}/…", url.scheme(), host),
            _ => url.scheme().to_string(),
        },
        Err(_) => "<invalid>".to_string(),
    }
}
