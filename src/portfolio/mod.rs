use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::RwLock;

use crate::api::explorer::TokenListing;
use crate::api::ExplorerClient;
use crate::chain::{ChainClient, DEFAULT_DECIMALS};
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::models::{PortfolioSnapshot, Token, TokenValueBreakdown};
use crate::pricing::{PriceQuery, PriceResolver, ProgressFn, ResolvedPrice};
use crate::utils::retry::retry_with_backoff;

/// Orchestrates one full wallet refresh: explorer discovery → balances →
/// prices → valuation → history append. Owns the latest applied snapshot
/// and the one it superseded.
///
/// Overlapping refreshes are resolved with a request generation: each
/// refresh captures a monotonically increasing generation at the start
/// and only the latest one issued may publish its results. A superseded
/// refresh still returns its snapshot to its caller, but the shared
/// state and history are untouched.
pub struct PortfolioTracker {
    explorer: ExplorerClient,
    chain: Arc<ChainClient>,
    resolver: PriceResolver,
    history: HistoryStore,
    current: RwLock<Option<PortfolioSnapshot>>,
    previous: RwLock<Option<PortfolioSnapshot>>,
    generation: AtomicU64,
    token_delay: Duration,
    list_attempts: u32,
    retry_delay: Duration,
}

/// Last known figures for a token whose balance read failed outright.
/// The explorer still lists it, so the token stays, at its previous
/// balance and decimals, or zero and the default decimals when it was
/// never seen before.
fn fallback_balance(prior: Option<&PortfolioSnapshot>, address: &str) -> (String, u8) {
    prior
        .and_then(|snapshot| snapshot.token(address))
        .map(|token| (token.balance.clone(), token.decimals))
        .unwrap_or_else(|| ("0".to_string(), DEFAULT_DECIMALS))
}

/// Valuation of one discovered token from its fetched balance and
/// resolved price. Tokens with a broken symbol or name still format;
/// only the address is trusted as identity.
fn assemble_tokens(
    listings: &[TokenListing],
    balances: &[(String, u8)],
    prices: &[ResolvedPrice],
    now: DateTime<Utc>,
) -> Vec<Token> {
    let mut tokens: Vec<Token> = listings
        .iter()
        .zip(balances)
        .zip(prices)
        .map(|((listing, (balance, decimals)), resolved)| {
            let mut token = Token {
                address: listing.contract_address.to_lowercase(),
                name: listing.name.clone(),
                symbol: listing.symbol.clone(),
                balance: balance.clone(),
                decimals: *decimals,
                price: resolved.price,
                value: 0.0,
                price_source: resolved.source,
                price_updated_at: now,
            };
            token.value = token.balance_f64() * token.price;
            token
        })
        .collect();

    // Stable sort: ties keep discovery order.
    tokens.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    tokens
}

impl PortfolioTracker {
    pub fn new(
        explorer: ExplorerClient,
        chain: Arc<ChainClient>,
        resolver: PriceResolver,
        history: HistoryStore,
        token_delay: Duration,
        list_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            explorer,
            chain,
            resolver,
            history,
            current: RwLock::new(None),
            previous: RwLock::new(None),
            generation: AtomicU64::new(0),
            token_delay,
            list_attempts,
            retry_delay,
        }
    }

    pub async fn snapshot(&self) -> Option<PortfolioSnapshot> {
        self.current.read().await.clone()
    }

    /// The snapshot replaced by the most recent refresh, kept for
    /// previous-vs-current delta display.
    pub async fn previous(&self) -> Option<PortfolioSnapshot> {
        self.previous.read().await.clone()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn explorer(&self) -> &ExplorerClient {
        &self.explorer
    }

    /// One full refresh for `wallet`. Explorer-list failure after
    /// retries is the only hard error; a single token's balance or
    /// price failure degrades that token to defaults.
    pub async fn refresh(
        &self,
        wallet: &str,
        progress: Option<&ProgressFn>,
    ) -> Result<PortfolioSnapshot> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let wallet = wallet.to_lowercase();
        info!("Refreshing portfolio for {} (generation {})", wallet, generation);

        let listings = retry_with_backoff(self.list_attempts, self.retry_delay, || {
            self.explorer.token_list(&wallet)
        })
        .await
        .ok_or_else(|| {
            Error::ExplorerError("token list unavailable after retries".to_string())
        })?;

        let prior = self.current.read().await.clone();

        let mut balances = Vec::with_capacity(listings.len());
        for (index, listing) in listings.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.token_delay).await;
            }
            let address = listing.contract_address.to_lowercase();
            let pair = match self.chain.token_balance(&wallet, &address).await {
                Some(pair) => pair,
                None => fallback_balance(prior.as_ref(), &address),
            };
            balances.push(pair);
        }

        let queries: Vec<PriceQuery> = listings
            .iter()
            .zip(&balances)
            .map(|(listing, (_, decimals))| PriceQuery {
                symbol: listing.symbol.clone(),
                address: listing.contract_address.to_lowercase(),
                decimals: *decimals,
            })
            .collect();
        let prices = self.resolver.resolve_batch(&queries, progress).await;

        let now = Utc::now();
        let tokens = assemble_tokens(&listings, &balances, &prices, now);
        let total_value = tokens.iter().map(|t| t.value).sum();
        let snapshot = PortfolioSnapshot {
            wallet: wallet.clone(),
            tokens,
            total_value,
            updated_at: now,
        };

        if self.publish_if_latest(generation, &snapshot).await {
            self.record_history(&snapshot);
        } else {
            warn!(
                "Refresh generation {} for {} superseded, results discarded",
                generation, wallet
            );
        }
        Ok(snapshot)
    }

    /// Applies the snapshot only when `generation` is still the latest
    /// issued. Returns whether it was applied.
    async fn publish_if_latest(&self, generation: u64, snapshot: &PortfolioSnapshot) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        let mut current = self.current.write().await;
        *self.previous.write().await = current.take();
        *current = Some(snapshot.clone());
        true
    }

    fn record_history(&self, snapshot: &PortfolioSnapshot) {
        let timestamp = snapshot.updated_at.timestamp();
        for token in &snapshot.tokens {
            if let Err(e) = self.history.append_price_sample(
                &snapshot.wallet,
                &token.address,
                token.price,
                token.value,
                timestamp,
            ) {
                warn!("Failed to store price sample for {}: {}", token.address, e);
            }
        }
        let breakdown = snapshot
            .tokens
            .iter()
            .map(|token| TokenValueBreakdown {
                address: token.address.clone(),
                value: token.value,
                price: token.price,
            })
            .collect();
        if let Err(e) = self.history.append_portfolio_sample(
            &snapshot.wallet,
            snapshot.total_value,
            timestamp,
            breakdown,
        ) {
            warn!("Failed to store portfolio sample: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CoinGeckoClient;
    use crate::models::PriceSource;
    use crate::utils::queue::RequestQueue;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn listing(address: &str, symbol: &str) -> TokenListing {
        TokenListing {
            contract_address: address.to_string(),
            name: format!("{} Token", symbol),
            symbol: symbol.to_string(),
            decimals: None,
            balance: None,
        }
    }

    fn resolved(price: f64, source: PriceSource) -> ResolvedPrice {
        ResolvedPrice {
            price,
            source,
            resolved_at: Utc::now(),
        }
    }

    fn tracker(dir: &tempfile::TempDir) -> PortfolioTracker {
        let queue = RequestQueue::new(Duration::from_millis(1));
        let explorer = ExplorerClient::new("http://127.0.0.1:9", queue.clone());
        let chain = Arc::new(
            ChainClient::new(
                "http://127.0.0.1:9",
                "0x0000000000000000000000000000000000000001",
                queue.clone(),
                1,
                Duration::from_millis(1),
            )
            .unwrap(),
        );
        let coingecko =
            CoinGeckoClient::new("http://127.0.0.1:9", HashMap::new(), queue);
        let resolver = PriceResolver::new(
            coingecko,
            chain.clone(),
            vec!["USDC".to_string()],
            "EURS".to_string(),
            "0x07865c6e87b9f70255377e024ace6630c1eaa37f".to_string(),
            6,
            Duration::from_secs(30),
            Duration::from_millis(1),
            1,
            Duration::from_millis(1),
        );
        let history = HistoryStore::open(dir.path()).unwrap();
        PortfolioTracker::new(
            explorer,
            chain,
            resolver,
            history,
            Duration::from_millis(1),
            1,
            Duration::from_millis(1),
        )
    }

    #[test]
    fn valuation_sorts_by_value_and_tolerates_unknown_prices() {
        let listings = vec![
            listing("0x00000000000000000000000000000000000000bb", "XYZ"),
            listing("0x00000000000000000000000000000000000000aa", "USDC"),
        ];
        let balances = vec![("50".to_string(), 18), ("100".to_string(), 6)];
        let prices = vec![
            resolved(0.0, PriceSource::Unknown),
            resolved(1.0, PriceSource::Fixed),
        ];

        let tokens = assemble_tokens(&listings, &balances, &prices, Utc::now());
        assert_eq!(tokens[0].symbol, "USDC");
        assert_eq!(tokens[0].value, 100.0);
        assert_eq!(tokens[0].price_source, PriceSource::Fixed);
        assert_eq!(tokens[1].symbol, "XYZ");
        assert_eq!(tokens[1].value, 0.0);
        assert_eq!(tokens[1].price_source, PriceSource::Unknown);

        let total: f64 = tokens.iter().map(|t| t.value).sum();
        assert_eq!(total, 100.0);
    }

    #[test]
    fn value_ties_keep_discovery_order() {
        let listings = vec![
            listing("0x00000000000000000000000000000000000000aa", "AAA"),
            listing("0x00000000000000000000000000000000000000bb", "BBB"),
            listing("0x00000000000000000000000000000000000000cc", "CCC"),
        ];
        let balances = vec![
            ("1".to_string(), 18),
            ("1".to_string(), 18),
            ("1".to_string(), 18),
        ];
        let prices = vec![
            resolved(0.0, PriceSource::Unknown),
            resolved(0.0, PriceSource::Unknown),
            resolved(0.0, PriceSource::Unknown),
        ];

        let tokens = assemble_tokens(&listings, &balances, &prices, Utc::now());
        let symbols: Vec<&str> = tokens.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn unparseable_balance_values_at_zero() {
        let listings = vec![listing("0x00000000000000000000000000000000000000aa", "BAD")];
        let balances = vec![("not-a-number".to_string(), 18)];
        let prices = vec![resolved(5.0, PriceSource::Oracle)];

        let tokens = assemble_tokens(&listings, &balances, &prices, Utc::now());
        assert_eq!(tokens[0].value, 0.0);
    }

    fn held_token(address: &str, balance: &str, decimals: u8) -> Token {
        Token {
            address: address.to_string(),
            name: "Held Token".to_string(),
            symbol: "HELD".to_string(),
            balance: balance.to_string(),
            decimals,
            price: 0.0,
            value: 0.0,
            price_source: PriceSource::Unknown,
            price_updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failed_balance_read_keeps_last_known_figures() {
        let dir = tempdir().unwrap();
        let tracker = tracker(&dir);
        let address = "0x00000000000000000000000000000000000000aa";

        // A prior refresh saw the token with a real balance.
        let prior = PortfolioSnapshot {
            wallet: "0xabc".to_string(),
            tokens: vec![held_token(address, "123.456789", 6)],
            total_value: 0.0,
            updated_at: Utc::now(),
        };
        let generation = tracker.generation.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(tracker.publish_if_latest(generation, &prior).await);

        // The chain read fails outright: the token survives with its
        // previous figures, not zero/default.
        let snapshot = tracker.snapshot().await;
        let (balance, decimals) = fallback_balance(snapshot.as_ref(), address);
        assert_eq!(balance, "123.456789");
        assert_eq!(decimals, 6);

        // Address matching is the identity, case-insensitively.
        let upper = address.to_uppercase().replacen("0X", "0x", 1);
        let (balance, _) = fallback_balance(snapshot.as_ref(), &upper);
        assert_eq!(balance, "123.456789");
    }

    #[test]
    fn failed_balance_read_defaults_without_prior_snapshot() {
        let address = "0x00000000000000000000000000000000000000aa";
        assert_eq!(fallback_balance(None, address), ("0".to_string(), 18));

        // A prior snapshot that never held this token is the same as
        // no snapshot at all.
        let prior = PortfolioSnapshot {
            wallet: "0xabc".to_string(),
            tokens: vec![held_token("0x00000000000000000000000000000000000000bb", "5", 18)],
            total_value: 0.0,
            updated_at: Utc::now(),
        };
        assert_eq!(
            fallback_balance(Some(&prior), address),
            ("0".to_string(), 18)
        );
    }

    #[tokio::test]
    async fn stale_generation_does_not_publish() {
        let dir = tempdir().unwrap();
        let tracker = tracker(&dir);

        let snapshot = PortfolioSnapshot {
            wallet: "0xabc".to_string(),
            tokens: Vec::new(),
            total_value: 0.0,
            updated_at: Utc::now(),
        };

        // Generation 1 issued, then generation 2: the first may no
        // longer publish.
        let first = tracker.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let second = tracker.generation.fetch_add(1, Ordering::SeqCst) + 1;

        assert!(!tracker.publish_if_latest(first, &snapshot).await);
        assert!(tracker.snapshot().await.is_none());

        assert!(tracker.publish_if_latest(second, &snapshot).await);
        assert!(tracker.snapshot().await.is_some());
    }

    #[tokio::test]
    async fn publishing_rotates_the_previous_snapshot() {
        let dir = tempdir().unwrap();
        let tracker = tracker(&dir);

        let older = PortfolioSnapshot {
            wallet: "0xabc".to_string(),
            tokens: Vec::new(),
            total_value: 10.0,
            updated_at: Utc::now(),
        };
        let newer = PortfolioSnapshot {
            total_value: 20.0,
            ..older.clone()
        };

        let g1 = tracker.generation.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(tracker.publish_if_latest(g1, &older).await);
        let g2 = tracker.generation.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(tracker.publish_if_latest(g2, &newer).await);

        assert_eq!(tracker.snapshot().await.unwrap().total_value, 20.0);
        assert_eq!(tracker.previous().await.unwrap().total_value, 10.0);
    }

    #[tokio::test]
    async fn explorer_failure_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let tracker = tracker(&dir);

        let result = tracker
            .refresh("0x1111111111111111111111111111111111111111", None)
            .await;
        assert!(matches!(result, Err(Error::ExplorerError(_))));
        assert!(tracker.snapshot().await.is_none());
    }
}
