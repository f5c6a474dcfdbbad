use std::collections::HashMap;

use log::{info, warn};
use reqwest::Client;

use crate::error::{Error, Result};
use crate::utils::queue::RequestQueue;

/// Client for the external price API (`/simple/price`). Only symbols in
/// the configured symbol→id table are ever queried; everything else
/// skips this source entirely.
#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    ids: HashMap<String, String>,
    queue: RequestQueue,
}

impl CoinGeckoClient {
    pub fn new(base_url: &str, ids: HashMap<String, String>, queue: RequestQueue) -> Self {
        // Lookups are by upper-cased symbol.
        let ids = ids
            .into_iter()
            .map(|(symbol, id)| (symbol.to_uppercase(), id))
            .collect();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            ids,
            queue,
        }
    }

    /// Mapped API id for a symbol, if the symbol is allow-listed.
    pub fn coin_id(&self, symbol: &str) -> Option<&str> {
        self.ids.get(&symbol.to_uppercase()).map(String::as_str)
    }

    /// Spot USD price for one mapped symbol. A missing mapping is a
    /// validation error at this level; callers check `coin_id` first.
    pub async fn simple_price(&self, symbol: &str) -> Result<f64> {
        let id = self
            .coin_id(symbol)
            .ok_or_else(|| Error::ValidationError(format!("no price API id for {}", symbol)))?
            .to_string();

        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url, id
        );
        let client = self.client.clone();
        let body: HashMap<String, HashMap<String, f64>> = self
            .queue
            .enqueue(async move {
                let response = client.get(&url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    warn!("Price API returned status {}", status);
                    return Err(Error::ApiError(format!(
                        "price API returned status {}",
                        status
                    )));
                }
                Ok(response.json().await?)
            })
            .await?;

        let price = body
            .get(&id)
            .and_then(|quote| quote.get("usd"))
            .copied()
            .ok_or_else(|| {
                Error::ApiInvalidFormat(format!("price API response missing {}", id))
            })?;
        info!("Price API quote {} = {:.6} USD", symbol, price);
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client_with_ids() -> CoinGeckoClient {
        let mut ids = HashMap::new();
        ids.insert("weth".to_string(), "ethereum".to_string());
        ids.insert("WBTC".to_string(), "wrapped-bitcoin".to_string());
        CoinGeckoClient::new(
            "https://price.example/api/v3/",
            ids,
            RequestQueue::new(Duration::from_millis(1)),
        )
    }

    #[test]
    fn coin_id_lookup_is_case_insensitive() {
        let client = client_with_ids();
        assert_eq!(client.coin_id("WETH"), Some("ethereum"));
        assert_eq!(client.coin_id("wbtc"), Some("wrapped-bitcoin"));
        assert_eq!(client.coin_id("XYZ"), None);
    }

    #[tokio::test]
    async fn unmapped_symbol_is_rejected_without_a_request() {
        let client = client_with_ids();
        let result = client.simple_price("XYZ").await;
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }
}
