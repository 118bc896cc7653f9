use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dexowl::config::Config;
use dexowl::core::TradingWallet;
use dexowl::execution::{CycleRunner, TradingAccount};
use dexowl::ingest::{CmcClient, CmcPairSource, DataCenter};
use dexowl::scout::PoolScanner;
use dexowl::trading::{JupiterClient, SwapVenue};
use dexowl::transport::{AlertBus, Notifier, NotifierSet, WebhookNotifier};
use dexowl::util::{BinancePriceFeed, KlineStore};

#[derive(Parser, Debug)]
#[command(name = "dexowl", about = "Signal-driven DEX position manager")]
struct Cli {
    #[arg(short, long, default_value = "dexowl.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trading loop
    Trade {
        /// Run immediately instead of waiting for the next interval, skip the data-flag wait
        #[arg(long)]
        debug: bool,
        /// Exit after a single cycle
        #[arg(long)]
        once: bool,
    },
    /// Run the data refresh loop (pools, pair addresses, klines)
    Refresh {
        #[arg(long)]
        debug: bool,
        #[arg(long)]
        once: bool,
    },
}

fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "dexowl.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .json()
        .with_current_span(false)
        .with_span_list(true);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    Ok(guard)
}

fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    let webhook = WebhookNotifier::new(config.webhook_url())?;
    Ok(Arc::new(NotifierSet::new(vec![
        Box::new(AlertBus::new()),
        Box::new(webhook),
    ])))
}

fn build_trader(config: &Config, notifier: Arc<dyn Notifier>) -> Result<CycleRunner> {
    let mut accounts = Vec::with_capacity(config.accounts.len());
    for account in &config.accounts {
        let trade = config
            .trade_for(&account.chain)
            .cloned()
            .with_context(|| format!("no trade settings for chain {}", account.chain))?;
        let wallet = TradingWallet::from_env(&account.private_key_env, &account.address)
            .with_context(|| format!("loading wallet for {}", account.name))?;
        let venue: Arc<dyn SwapVenue> = Arc::new(JupiterClient::new(&config.endpoints.jupiter, wallet)?);
        info!(account = %account.name, chain = %account.chain, strategy = %account.strategy_name, "👛 Account ready");
        accounts.push(TradingAccount::new(account.clone(), trade, venue, notifier.clone()));
    }

    let prices = Arc::new(BinancePriceFeed::new(&config.endpoints.binance)?);
    let series = Arc::new(KlineStore::new(&config.data_dir));
    Ok(CycleRunner::new(config, accounts, series, prices, notifier))
}

fn build_data_center(config: &Config, notifier: Arc<dyn Notifier>) -> Result<DataCenter> {
    let cmc = CmcClient::new(&config.endpoints.cmc, config.cmc_api_keys()).with_context(|| {
        format!(
            "CMC API keys are read from {:?}",
            config.refresh.cmc_api_key_envs
        )
    })?;
    let pair_source = Arc::new(CmcPairSource::new(cmc, config.refresh.kline_page_size));
    let scanner = Arc::new(PoolScanner::new(&config.endpoints.gmgn, config.proxy.as_deref())?);
    Ok(DataCenter::new(config, scanner, pair_source, notifier))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load_from_file(&cli.config)?;
    let _guard = init_tracing(&config.log_dir)?;
    info!(config = %cli.config.display(), accounts = config.accounts.len(), "🦉 dexowl starting");

    let notifier = build_notifier(&config)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 Shutdown signal received, stopping after the current cycle");
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let outcome = match cli.command {
        Command::Trade { debug, once } => {
            let runner = build_trader(&config, notifier)?;
            runner.run(shutdown_rx, debug, once).await
        }
        Command::Refresh { debug, once } => {
            let center = build_data_center(&config, notifier)?;
            center.run(shutdown_rx, debug, once).await
        }
    };

    match &outcome {
        Ok(()) => info!("👋 dexowl shutdown complete"),
        Err(e) => error!(error = %format!("{:#}", e), "dexowl stopped with an error"),
    }
    outcome
}
