//! Volume Scanner
//!
//! `volscan serve` probes the configured exchanges, runs the scan loop in the
//! background and serves the latest results over HTTP. The other subcommands
//! run a single pass and print JSON.
//!
//! Usage:
//!   volscan serve
//!   volscan scan --top 20 --sort-by composite_score
//!   volscan analyze BTC/USDT --timeframe 4h
//!   volscan init-config volscan.toml

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volscan_backend::api::{create_router, AppState};
use volscan_backend::chart::ChartService;
use volscan_backend::config::ScannerConfig;
use volscan_backend::registry::ExchangeRegistry;
use volscan_backend::scanner::Scanner;
use volscan_backend::scheduler::{ScanScheduler, SnapshotReader};
use volscan_backend::scoring::SortKey;

/// Multi-exchange volume anomaly scanner
#[derive(Parser, Debug)]
#[command(name = "volscan")]
#[command(about = "Scan crypto markets for abnormal trading volume")]
struct Cli {
    /// Path to the TOML config
    #[arg(short, long, global = true, env = "VOLSCAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the background scanner and HTTP API (default)
    Serve,

    /// Run one scan cycle and print the ranked opportunities
    Scan {
        /// Number of opportunities to keep
        #[arg(short, long)]
        top: Option<usize>,

        /// volume_ratio | composite_score | current_volume | price_change_24h | current_price
        #[arg(short, long)]
        sort_by: Option<String>,
    },

    /// Analyze a single symbol on its owning exchange
    Analyze {
        /// Unified symbol, e.g. BTC/USDT
        symbol: String,

        #[arg(short, long)]
        timeframe: Option<String>,
    },

    /// Write the default config template
    InitConfig {
        #[arg(default_value = "volscan.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::InitConfig { path } => init_config(&path),
        Commands::Serve => {
            let config = ScannerConfig::from_env(cli.config.as_deref())?;
            serve(config).await
        }
        Commands::Scan { top, sort_by } => {
            let config = ScannerConfig::from_env(cli.config.as_deref())?;
            scan_once(config, top, sort_by.as_deref()).await
        }
        Commands::Analyze { symbol, timeframe } => {
            let mut config = ScannerConfig::from_env(cli.config.as_deref())?;
            if let Some(tf) = timeframe {
                config.data.timeframe = tf;
            }
            analyze(config, &symbol).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "volscan=info,volscan_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    ScannerConfig::default().save(path)?;
    info!("📝 Wrote default config to {}", path.display());
    Ok(())
}

async fn serve(config: ScannerConfig) -> Result<()> {
    info!(
        exchanges = config.exchanges.iter().filter(|e| e.enabled).count(),
        timeframe = %config.data.timeframe,
        "🚀 Volume scanner starting"
    );

    let registry = Arc::new(ExchangeRegistry::probe(&config).await);
    if registry.is_empty() {
        warn!("No exchange available; the API will serve empty results");
    }

    let scanner = Arc::new(Scanner::new(registry.clone(), &config));
    let scheduler = ScanScheduler::new(scanner.clone(), &config);
    let snapshots = scheduler.reader();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scan_task = scheduler.spawn(shutdown_rx);

    let charts = Arc::new(ChartService::new(registry, snapshots.clone(), &config));
    let app = create_router(AppState {
        snapshots,
        scanner,
        charts,
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
            }
            info!("🛑 Shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("Server error")?;

    if let Err(e) = scan_task.await {
        warn!(error = %e, "Scan task ended abnormally");
    }
    Ok(())
}

async fn scan_once(config: ScannerConfig, top: Option<usize>, sort_by: Option<&str>) -> Result<()> {
    let limit = top.unwrap_or(config.data.top_n);
    let sort_key = SortKey::parse_lenient(sort_by.unwrap_or(&config.data.default_sort));

    let registry = Arc::new(ExchangeRegistry::probe(&config).await);
    let scanner = Scanner::new(registry, &config);
    let (_tx, rx) = watch::channel(false);
    let outcome = scanner.run_cycle(limit, sort_key, &rx).await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn analyze(config: ScannerConfig, symbol: &str) -> Result<()> {
    let symbol = symbol.trim().to_uppercase();
    let registry = Arc::new(ExchangeRegistry::probe(&config).await);
    let scanner = Scanner::new(registry.clone(), &config);
    let charts = ChartService::new(registry, SnapshotReader::default(), &config);

    let exchange = charts
        .resolve_exchange(&symbol)
        .map(|c| c.id().to_string())
        .context("no exchange available")?;

    let opportunity = match scanner.analyze(&exchange, &symbol).await {
        Ok(opp) => json!(opp),
        Err(reason) => json!({ "skipped": reason.kind(), "reason": reason.to_string() }),
    };
    let chart = match charts.series(&symbol, None, None).await {
        Ok(series) => json!(series.as_ref()),
        Err(e) => json!({ "error": e.to_string() }),
    };

    let report = json!({
        "symbol": symbol,
        "exchange": exchange,
        "timeframe": config.data.timeframe,
        "opportunity": opportunity,
        "chart": chart,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
