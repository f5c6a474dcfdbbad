use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use portfolio_tracker::api::{explorer, CoinGeckoClient, ExplorerClient};
use portfolio_tracker::chain::ChainClient;
use portfolio_tracker::cli::Cli;
use portfolio_tracker::config::Config;
use portfolio_tracker::history::{series, HistoryStore};
use portfolio_tracker::portfolio::PortfolioTracker;
use portfolio_tracker::pricing::PriceResolver;
use portfolio_tracker::utils::queue::RequestQueue;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from {:?}: {}", path, e);
                return Err(anyhow::anyhow!("Configuration loading failed: {}", e));
            }
        },
        None => Config::default(),
    };
    info!(
        "Using chain {} via {}",
        config.network.chain_id, config.network.rpc_url
    );

    // One queue per session: every outbound call shares its pacing.
    let queue = RequestQueue::new(Duration::from_millis(
        config.refresh.min_request_interval_ms,
    ));
    let retry_delay = Duration::from_millis(config.refresh.retry_base_delay_ms);

    let explorer_client = ExplorerClient::new(&config.network.explorer_url, queue.clone());
    let chain = Arc::new(ChainClient::new(
        &config.network.rpc_url,
        &config.pricing.pool_factory,
        queue.clone(),
        config.refresh.price_retry_attempts,
        retry_delay,
    )?);
    let coingecko = CoinGeckoClient::new(
        &config.pricing.price_api_url,
        config.pricing.coingecko_ids.clone(),
        queue,
    );
    let resolver = PriceResolver::new(
        coingecko,
        chain.clone(),
        config.pricing.stable_symbols.clone(),
        config.pricing.non_usd_stable.clone(),
        config.pricing.reference_stable.clone(),
        config.pricing.reference_stable_decimals,
        Duration::from_secs(config.pricing.price_cache_ttl_secs),
        Duration::from_millis(config.refresh.token_pacing_ms),
        config.refresh.price_retry_attempts,
        retry_delay,
    );
    let history = HistoryStore::open(Path::new(&config.storage.history_path))?;

    let tracker = PortfolioTracker::new(
        explorer_client,
        chain,
        resolver,
        history,
        Duration::from_millis(config.refresh.token_pacing_ms),
        config.refresh.explorer_retry_attempts,
        retry_delay,
    );

    match cli.watch {
        Some(secs) => {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = refresh_and_render(&tracker, &cli).await {
                    error!("Refresh failed: {}", e);
                }
            }
        }
        None => refresh_and_render(&tracker, &cli).await,
    }
}

async fn refresh_and_render(tracker: &PortfolioTracker, cli: &Cli) -> Result<()> {
    let progress = |index: usize, total: usize, symbol: &str| {
        info!("Pricing token {}/{}: {}", index + 1, total, symbol);
    };
    let snapshot = tracker.refresh(&cli.wallet, Some(&progress)).await?;

    println!(
        "\nPortfolio for {} (updated {})",
        snapshot.wallet,
        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "{:<10} {:>28} {:>14} {:>14}  {}",
        "SYMBOL", "BALANCE", "PRICE", "VALUE", "SOURCE"
    );
    for token in &snapshot.tokens {
        let symbol = if token.symbol.is_empty() {
            "?"
        } else {
            token.symbol.as_str()
        };
        println!(
            "{:<10} {:>28} {:>14.6} {:>14.2}  {}",
            symbol, token.balance, token.price, token.value, token.price_source
        );
    }
    println!("{:>55} {:>14.2}", "TOTAL", snapshot.total_value);

    if let Some(delta) = tracker
        .history()
        .value_delta(&snapshot.wallet, None, snapshot.total_value, 24)
    {
        println!(
            "24h change: {:+.2} USD ({:+.2}%)",
            delta.absolute, delta.percentage
        );
    }

    let samples: Vec<(i64, f64)> = tracker
        .history()
        .load_portfolio_history(&snapshot.wallet)
        .iter()
        .map(|entry| (entry.timestamp, entry.total_value))
        .collect();
    let points = series::build_series(
        &samples,
        snapshot.total_value,
        24 * 3600,
        900,
        Utc::now().timestamp(),
    );
    println!("\n24h value trend:");
    for point in points.iter().filter(|p| p.label.is_some()) {
        println!(
            "  {}  {:>14.2}",
            point.label.as_deref().unwrap_or(""),
            point.value
        );
    }

    // Transaction history is best-effort display; its failure never
    // blanks the dashboard.
    match tracker.explorer().transactions(&snapshot.wallet).await {
        Ok(txs) => {
            let page = explorer::paginate(&txs, 0, cli.tx_page_size);
            println!(
                "\nRecent transactions ({} of {}):",
                page.len(),
                txs.len()
            );
            for tx in page {
                println!(
                    "  {}  value {}  {}",
                    &tx.hash,
                    tx.value,
                    if tx.is_error == "1" { "FAILED" } else { "ok" }
                );
            }
        }
        Err(e) => warn!("Transaction list unavailable: {}", e),
    }
    Ok(())
}
