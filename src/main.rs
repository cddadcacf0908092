use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use medicube_watcher::config::AppConfig;
use medicube_watcher::{CatalogScraper, CurrencyConverter, Monitor, ProductStore, TelegramBot};

/// New-product monitor for the Medicube Korea storefront.
///
/// Scrapes the catalog, diffs it against the known-product ledger and
/// notifies Telegram subscribers about anything new.
#[derive(Parser, Debug)]
#[command(name = "medicube-watcher", version, about)]
struct Cli {
    /// Run continuously on a schedule
    #[arg(short, long)]
    daemon: bool,

    /// Run a single check now (sends the summary even on a first run)
    #[arg(short, long)]
    check: bool,

    /// Run interactive setup (verify token, discover chat IDs)
    #[arg(short, long)]
    setup: bool,

    /// Print ledger status and exit
    #[arg(long)]
    status: bool,

    /// Check interval in hours (daemon mode)
    #[arg(short, long)]
    interval: Option<f64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Telegram bot token (or set MEDICUBE_TELEGRAM__TOKEN)
    #[arg(short, long)]
    token: Option<String>,

    /// Telegram chat ID(s) to notify (can be used multiple times)
    #[arg(long = "chat-id")]
    chat_ids: Vec<String>,

    /// Data directory for the ledger, subscribers and history
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load().context("loading configuration")?;
    if let Some(token) = cli.token {
        config.telegram.token = token;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(interval) = cli.interval {
        config.monitor.interval_hours = interval;
    }
    config.validate().context("validating configuration")?;

    let _log_guard = init_logging(&config.data_dir, cli.verbose)?;

    let store = ProductStore::new(&config.data_dir)?;

    let chat_ids = if cli.chat_ids.is_empty() {
        store.chat_ids()
    } else {
        cli.chat_ids.clone()
    };
    let mut bot = TelegramBot::new(&config.telegram, chat_ids)?;

    // Auto-discover subscribers when none are configured yet.
    if bot.chat_ids.is_empty() {
        info!("No chat IDs configured, trying to discover...");
        let discovered = bot.discover_chat_ids().await;
        if discovered.is_empty() {
            warn!("No chat IDs found! Send /start to the bot first, then run with --setup");
            if !cli.setup {
                warn!("Continuing without notifications (scrape-only mode)");
            }
        } else {
            store.save_chat_ids(&discovered)?;
            info!("Discovered {} chat(s)", discovered.len());
            bot.chat_ids = discovered;
        }
    }

    let scraper = CatalogScraper::new(config.scraper.clone())?;
    let converter = CurrencyConverter::new(&config.currency)?;
    let mut monitor = Monitor::new(scraper, store, bot, converter, config.monitor.clone());

    if cli.setup {
        monitor.run_setup().await?;
    } else if cli.status {
        monitor.print_status()?;
    } else if cli.daemon {
        monitor.run_daemon().await?;
    } else if cli.check {
        monitor.run_check(false).await?;
    } else {
        monitor.run_check(true).await?;
    }

    Ok(())
}

/// Log to stdout and to `<data_dir>/monitor.log`. The returned guard must
/// stay alive for the non-blocking writer to flush.
fn init_logging(data_dir: &str, verbose: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(data_dir)?;
    let file_appender = tracing_appender::rolling::never(data_dir, "monitor.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_directives = if verbose {
        "info,medicube_watcher=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    Ok(guard)
}
