pub mod series;

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Delta, PortfolioHistoryEntry, PriceHistoryEntry, TokenValueBreakdown};

/// Samples older than this are pruned on every write.
const RETENTION_SECS: i64 = 30 * 24 * 3600;
/// Cap on stored samples per (wallet, token).
const PRICE_CAP: usize = 100;
/// Cap on stored portfolio samples per wallet.
const PORTFOLIO_CAP: usize = 500;

/// Local, per-wallet persistence of price/value series backed by an
/// embedded key-value store. Values are JSON; missing or corrupt data
/// always loads as an empty series, never an error.
pub struct HistoryStore {
    price_tree: sled::Tree,
    portfolio_tree: sled::Tree,
}

fn load_series<T: DeserializeOwned>(tree: &sled::Tree, key: &str) -> Vec<T> {
    match tree.get(key) {
        Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            // Treated as absent; the next successful write resets it.
            warn!("Discarding corrupt history under {}: {}", key, e);
            Vec::new()
        }),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("History read failed for {}: {}", key, e);
            Vec::new()
        }
    }
}

fn store_series<T: Serialize>(tree: &sled::Tree, key: &str, series: &[T]) -> Result<()> {
    let bytes = serde_json::to_vec(series)?;
    tree.insert(key, bytes)?;
    Ok(())
}

/// Rolling retention: drops samples older than the 30-day window
/// (anchored at the newest timestamp) and keeps only the most recent
/// `cap` entries. Series are stored in append order, oldest first.
fn prune<T>(series: &mut Vec<T>, anchor: i64, cap: usize, timestamp: impl Fn(&T) -> i64) {
    let cutoff = anchor - RETENTION_SECS;
    series.retain(|entry| timestamp(entry) >= cutoff);
    if series.len() > cap {
        let excess = series.len() - cap;
        series.drain(..excess);
    }
}

fn compute_delta(baseline: f64, current: f64) -> Option<Delta> {
    if baseline == 0.0 {
        if current == 0.0 {
            return None;
        }
        return Some(Delta {
            absolute: current,
            percentage: 100.0,
        });
    }
    Some(Delta {
        absolute: current - baseline,
        percentage: (current - baseline) / baseline * 100.0,
    })
}

/// Latest sample at or before the cutoff; when none is old enough, the
/// oldest available sample serves as the baseline so a short history
/// still yields a delta instead of "no data".
fn baseline_value(samples: &[(i64, f64)], cutoff: i64) -> Option<f64> {
    samples
        .iter()
        .rev()
        .find(|(ts, _)| *ts <= cutoff)
        .or_else(|| samples.first())
        .map(|(_, value)| *value)
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            price_tree: db.open_tree("price_history")?,
            portfolio_tree: db.open_tree("portfolio_history")?,
        })
    }

    fn price_key(wallet: &str, token: &str) -> String {
        format!("{}:{}", wallet.to_lowercase(), token.to_lowercase())
    }

    pub fn append_price_sample(
        &self,
        wallet: &str,
        token: &str,
        price: f64,
        value: f64,
        timestamp: i64,
    ) -> Result<()> {
        let key = Self::price_key(wallet, token);
        let mut series: Vec<PriceHistoryEntry> = load_series(&self.price_tree, &key);
        series.push(PriceHistoryEntry {
            price,
            value,
            timestamp,
        });
        prune(&mut series, timestamp, PRICE_CAP, |e| e.timestamp);
        store_series(&self.price_tree, &key, &series)?;
        debug!("Stored price sample for {} ({} kept)", key, series.len());
        Ok(())
    }

    pub fn append_portfolio_sample(
        &self,
        wallet: &str,
        total_value: f64,
        timestamp: i64,
        tokens: Vec<TokenValueBreakdown>,
    ) -> Result<()> {
        let key = wallet.to_lowercase();
        let mut series: Vec<PortfolioHistoryEntry> = load_series(&self.portfolio_tree, &key);
        series.push(PortfolioHistoryEntry {
            total_value,
            timestamp,
            tokens,
        });
        prune(&mut series, timestamp, PORTFOLIO_CAP, |e| e.timestamp);
        store_series(&self.portfolio_tree, &key, &series)?;
        Ok(())
    }

    pub fn load_token_price_history(&self, wallet: &str, token: &str) -> Vec<PriceHistoryEntry> {
        load_series(&self.price_tree, &Self::price_key(wallet, token))
    }

    /// All per-token series for one wallet, keyed by token address.
    pub fn load_price_history(&self, wallet: &str) -> HashMap<String, Vec<PriceHistoryEntry>> {
        let prefix = format!("{}:", wallet.to_lowercase());
        let mut history = HashMap::new();
        for item in self.price_tree.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = match item {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("History scan failed: {}", e);
                    continue;
                }
            };
            let token = String::from_utf8_lossy(&key)
                .trim_start_matches(&prefix)
                .to_string();
            let series: Vec<PriceHistoryEntry> =
                serde_json::from_slice(&bytes).unwrap_or_default();
            history.insert(token, series);
        }
        history
    }

    pub fn load_portfolio_history(&self, wallet: &str) -> Vec<PortfolioHistoryEntry> {
        load_series(&self.portfolio_tree, &wallet.to_lowercase())
    }

    /// Delta of a holding value (or the portfolio total when `token` is
    /// `None`) against the sample nearest to `window_hours` ago.
    pub fn value_delta(
        &self,
        wallet: &str,
        token: Option<&str>,
        current_value: f64,
        window_hours: u64,
    ) -> Option<Delta> {
        self.value_delta_at(wallet, token, current_value, window_hours, Utc::now().timestamp())
    }

    fn value_delta_at(
        &self,
        wallet: &str,
        token: Option<&str>,
        current_value: f64,
        window_hours: u64,
        now: i64,
    ) -> Option<Delta> {
        let samples: Vec<(i64, f64)> = match token {
            Some(token) => self
                .load_token_price_history(wallet, token)
                .iter()
                .map(|e| (e.timestamp, e.value))
                .collect(),
            None => self
                .load_portfolio_history(wallet)
                .iter()
                .map(|e| (e.timestamp, e.total_value))
                .collect(),
        };
        let cutoff = now - (window_hours as i64) * 3600;
        let baseline = baseline_value(&samples, cutoff)?;
        compute_delta(baseline, current_value)
    }

    /// Delta of the unit price rather than the holding value.
    pub fn price_oscillation(
        &self,
        wallet: &str,
        token: &str,
        current_price: f64,
        window_hours: u64,
    ) -> Option<Delta> {
        self.price_oscillation_at(wallet, token, current_price, window_hours, Utc::now().timestamp())
    }

    fn price_oscillation_at(
        &self,
        wallet: &str,
        token: &str,
        current_price: f64,
        window_hours: u64,
        now: i64,
    ) -> Option<Delta> {
        let samples: Vec<(i64, f64)> = self
            .load_token_price_history(wallet, token)
            .iter()
            .map(|e| (e.timestamp, e.price))
            .collect();
        let cutoff = now - (window_hours as i64) * 3600;
        let baseline = baseline_value(&samples, cutoff)?;
        compute_delta(baseline, current_price)
    }
}
