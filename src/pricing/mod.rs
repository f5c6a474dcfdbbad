use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info};

use crate::api::CoinGeckoClient;
use crate::chain::ChainClient;
use crate::models::PriceSource;
use crate::utils::cache::Cache;
use crate::utils::retry::retry_with_backoff;

/// Progress callback for batch resolution: (current index, total,
/// current symbol).
pub type ProgressFn = dyn Fn(usize, usize, &str) + Send + Sync;

#[derive(Debug, Clone, Copy)]
pub struct ResolvedPrice {
    pub price: f64,
    pub source: PriceSource,
    pub resolved_at: chrono::DateTime<Utc>,
}

impl ResolvedPrice {
    fn new(price: f64, source: PriceSource) -> Self {
        Self {
            price,
            source,
            resolved_at: Utc::now(),
        }
    }
}

/// One token to price in a batch.
#[derive(Debug, Clone)]
pub struct PriceQuery {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

/// Best-effort USD price resolution for one token, trying sources in a
/// strict order and short-circuiting on the first success:
/// fixed stable list → external price API → on-chain pool reserves →
/// unknown. Oracle and pool results are memoized for a short TTL so a
/// refresh burst does not hammer the same source twice.
pub struct PriceResolver {
    coingecko: CoinGeckoClient,
    chain: Arc<ChainClient>,
    cache: Cache<f64>,
    stable_symbols: HashSet<String>,
    non_usd_stable: String,
    reference_stable: String,
    reference_decimals: u8,
    token_delay: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl PriceResolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coingecko: CoinGeckoClient,
        chain: Arc<ChainClient>,
        stable_symbols: Vec<String>,
        non_usd_stable: String,
        reference_stable: String,
        reference_decimals: u8,
        cache_ttl: Duration,
        token_delay: Duration,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            coingecko,
            chain,
            cache: Cache::new(cache_ttl),
            stable_symbols: stable_symbols
                .into_iter()
                .map(|s| s.to_uppercase())
                .collect(),
            non_usd_stable: non_usd_stable.to_uppercase(),
            reference_stable: reference_stable.to_lowercase(),
            reference_decimals,
            token_delay,
            max_attempts,
            retry_delay,
        }
    }

    fn is_fixed_stable(&self, symbol_upper: &str, address: &str) -> bool {
        if address.to_lowercase() == self.reference_stable {
            return true;
        }
        self.stable_symbols.contains(symbol_upper) && symbol_upper != self.non_usd_stable
    }

    pub async fn resolve(&self, query: &PriceQuery) -> ResolvedPrice {
        let symbol_upper = query.symbol.to_uppercase();

        if self.is_fixed_stable(&symbol_upper, &query.address) {
            debug!("{} priced 1.00 from the stable list", query.symbol);
            return ResolvedPrice::new(1.0, PriceSource::Fixed);
        }

        if let Some(price) = self.oracle_price(&symbol_upper).await {
            return ResolvedPrice::new(price, PriceSource::Oracle);
        }

        if let Some(price) = self.onchain_price(query).await {
            return ResolvedPrice::new(price, PriceSource::OnChain);
        }

        debug!("No price source for {} ({})", query.symbol, query.address);
        ResolvedPrice::new(0.0, PriceSource::Unknown)
    }

    async fn oracle_price(&self, symbol_upper: &str) -> Option<f64> {
        self.coingecko.coin_id(symbol_upper)?;

        let key = format!("oracle:{}", symbol_upper);
        if let Some(price) = self.cache.get(&key).await {
            debug!("Cached oracle price for {}", symbol_upper);
            return Some(price);
        }

        let price = retry_with_backoff(self.max_attempts, self.retry_delay, || {
            self.coingecko.simple_price(symbol_upper)
        })
        .await
        .filter(|price| *price > 0.0)?;

        self.cache.set(key, price).await;
        Some(price)
    }

    async fn onchain_price(&self, query: &PriceQuery) -> Option<f64> {
        let key = format!("pool:{}", query.address.to_lowercase());
        if let Some(price) = self.cache.get(&key).await {
            debug!("Cached pool price for {}", query.address);
            return Some(price);
        }

        let price = retry_with_backoff(self.max_attempts, self.retry_delay, || {
            self.chain.pool_price(
                &query.address,
                query.decimals,
                &self.reference_stable,
                self.reference_decimals,
            )
        })
        .await
        .flatten()
        .filter(|price| *price > 0.0)?;

        self.cache.set(key, price).await;
        Some(price)
    }

    /// Resolves the whole batch in order, pacing between tokens so a
    /// large wallet does not burst the price API. Order is deterministic
    /// given identical upstream responses.
    pub async fn resolve_batch(
        &self,
        queries: &[PriceQuery],
        progress: Option<&ProgressFn>,
    ) -> Vec<ResolvedPrice> {
        let total = queries.len();
        let mut resolved = Vec::with_capacity(total);
        for (index, query) in queries.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.token_delay).await;
            }
            if let Some(report) = progress {
                report(index, total, &query.symbol);
            }
            resolved.push(self.resolve(query).await);
        }
        info!("Resolved prices for {} tokens", total);
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::queue::RequestQueue;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const USDC: &str = "0x07865c6e87b9f70255377e024ace6630c1eaa37f";

    fn resolver() -> PriceResolver {
        // No mapped ids and an unreachable RPC endpoint: the oracle and
        // pool sources can never succeed, which is the point of these
        // tests.
        let queue = RequestQueue::new(Duration::from_millis(1));
        let coingecko = CoinGeckoClient::new(
            "http://127.0.0.1:9/api/v3",
            HashMap::new(),
            queue.clone(),
        );
        let chain = Arc::new(
            ChainClient::new(
                "http://127.0.0.1:9",
                "0x0000000000000000000000000000000000000001",
                queue,
                2,
                Duration::from_millis(1),
            )
            .unwrap(),
        );
        PriceResolver::new(
            coingecko,
            chain,
            vec![
                "USDC".to_string(),
                "USDT".to_string(),
                "DAI".to_string(),
                "EURS".to_string(),
            ],
            "EURS".to_string(),
            USDC.to_string(),
            6,
            Duration::from_secs(30),
            Duration::from_millis(1),
            2,
            Duration::from_millis(1),
        )
    }

    fn query(symbol: &str, address: &str) -> PriceQuery {
        PriceQuery {
            symbol: symbol.to_string(),
            address: address.to_string(),
            decimals: 18,
        }
    }

    #[tokio::test]
    async fn usdc_symbol_is_fixed_regardless_of_sources() {
        let resolved = resolver()
            .resolve(&query("usdc", "0x00000000000000000000000000000000000000aa"))
            .await;
        assert_eq!(resolved.price, 1.0);
        assert_eq!(resolved.source, PriceSource::Fixed);
    }

    #[tokio::test]
    async fn usdc_address_is_fixed_even_with_wrong_symbol() {
        let resolved = resolver().resolve(&query("WRONG", USDC)).await;
        assert_eq!(resolved.price, 1.0);
        assert_eq!(resolved.source, PriceSource::Fixed);
    }

    #[tokio::test]
    async fn allow_listed_stables_are_fixed() {
        for symbol in ["USDT", "DAI"] {
            let resolved = resolver()
                .resolve(&query(symbol, "0x00000000000000000000000000000000000000bb"))
                .await;
            assert_eq!(resolved.price, 1.0, "{} should be fixed", symbol);
            assert_eq!(resolved.source, PriceSource::Fixed);
        }
    }

    #[tokio::test]
    async fn non_usd_stable_is_excluded_from_the_fixed_list() {
        let resolved = resolver()
            .resolve(&query("EURS", "0x00000000000000000000000000000000000000cc"))
            .await;
        // Falls through the (unreachable) oracle and pool sources.
        assert_eq!(resolved.price, 0.0);
        assert_eq!(resolved.source, PriceSource::Unknown);
    }

    #[tokio::test]
    async fn unmapped_token_with_no_pool_is_unknown() {
        let resolved = resolver()
            .resolve(&query("XYZ", "0x00000000000000000000000000000000000000dd"))
            .await;
        assert_eq!(resolved.price, 0.0);
        assert_eq!(resolved.source, PriceSource::Unknown);
    }

    #[tokio::test]
    async fn batch_reports_progress_in_order() {
        let resolver = resolver();
        let queries = vec![
            query("USDC", "0x00000000000000000000000000000000000000aa"),
            query("DAI", "0x00000000000000000000000000000000000000bb"),
        ];
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_cb = seen.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_cb = calls.clone();

        let progress = move |index: usize, total: usize, symbol: &str| {
            calls_in_cb.fetch_add(1, Ordering::SeqCst);
            seen_in_cb
                .lock()
                .unwrap()
                .push((index, total, symbol.to_string()));
        };
        let resolved = resolver
            .resolve_batch(&queries, Some(&progress))
            .await;

        assert_eq!(resolved.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (0, 2, "USDC".to_string()));
        assert_eq!(seen[1], (1, 2, "DAI".to_string()));
    }
}
