// src/main.rs
//! Background host entry point.
//! Speaks newline-delimited JSON with the browser shell on stdin/stdout.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use luckyou_wallet::background::{BackgroundCoordinator, CoordinatorDeps};
use luckyou_wallet::blockchain::{HttpChainRpc, NetworkRegistry};
use luckyou_wallet::core::BridgeConfig;
use luckyou_wallet::runtime::{stdio, StdioHost};
use luckyou_wallet::storage::{AuthorizedSites, SqliteStore, StoreHandle};
use luckyou_wallet::wallet::{LocalWalletCore, WalletCore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "luckyou-wallet")]
#[command(about = "LuckYou Wallet background host")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "CONFIG_PATH", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background coordinator over stdin/stdout (default)
    Serve,
    /// List known networks and the current selection
    Networks,
    /// Inspect or revoke site authorizations
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },
}

#[derive(Subcommand)]
enum SitesAction {
    /// List authorized hostnames
    List,
    /// Revoke the grant for a hostname
    Revoke { host: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let config = BridgeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let store = StoreHandle::new(Arc::new(
        SqliteStore::new_with_url(&config.storage.database_url).await?,
    ));

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, store).await,
        Commands::Networks => list_networks(config, store).await,
        Commands::Sites { action } => sites(action, store).await,
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the host protocol
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_wallet() -> Result<LocalWalletCore> {
    match (std::env::var("LUCKYOU_PRIVATE_KEY"), std::env::var("LUCKYOU_PASSWORD")) {
        (Ok(key), Ok(password)) => Ok(LocalWalletCore::from_private_key(key.trim(), &password)?),
        (Ok(_), Err(_)) => anyhow::bail!("LUCKYOU_PRIVATE_KEY is set but LUCKYOU_PASSWORD is not"),
        _ => {
            warn!("no wallet configured; account and signing requests will fail with -32001");
            Ok(LocalWalletCore::empty())
        }
    }
}

async fn serve(config: BridgeConfig, store: StoreHandle) -> Result<()> {
    info!("Starting LuckYou Wallet host v{}", env!("CARGO_PKG_VERSION"));

    let wallet: Arc<dyn WalletCore> = Arc::new(load_wallet()?);
    let networks = NetworkRegistry::new(store.clone(), config.networks.clone());
    let host = Arc::new(StdioHost::new(tokio::io::stdout()));
    let coordinator = BackgroundCoordinator::new(
        config.coordinator.clone(),
        CoordinatorDeps {
            store,
            networks,
            wallet,
            chain: Arc::new(HttpChainRpc::new()?),
            host: host.clone(),
        },
    );

    let (runtime, inbox) = mpsc::unbounded_channel();
    let task = coordinator.spawn(inbox);
    let result = stdio::serve(BufReader::new(tokio::io::stdin()), host.as_ref(), runtime).await;

    info!("stdin closed, shutting down");
    coordinator.shutdown();
    let _ = task.await;
    Ok(result?)
}

async fn list_networks(config: BridgeConfig, store: StoreHandle) -> Result<()> {
    let registry = NetworkRegistry::new(store, config.networks);
    let current = registry.current_network().await?;
    for network in registry.all_networks().await? {
        let marker = if network.key == current.key { "*" } else { " " };
        let kind = if network.is_custom { "custom" } else { "built-in" };
        println!(
            "{marker} {:<24} chain {:<10} {:<8} {} ({kind})",
            network.name, network.chain_id, network.currency_symbol, network.rpc_url
        );
    }
    Ok(())
}

async fn sites(action: SitesAction, store: StoreHandle) -> Result<()> {
    let sites = AuthorizedSites::new(store);
    match action {
        SitesAction::List => {
            for site in sites.list().await? {
                println!("{site}");
            }
        }
        SitesAction::Revoke { host } => {
            if sites.revoke(&host).await? {
                println!("revoked {host}");
            } else {
                println!("{host} was not authorized");
            }
        }
    }
    Ok(())
}
