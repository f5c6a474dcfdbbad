use log::{info, warn};
use reqwest::Client;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::utils::queue::RequestQueue;

/// Most recent transactions kept per wallet; the explorer returns far
/// more than the dashboard ever shows.
const TX_CAP: usize = 50;

/// Etherscan-style envelope. `result` is an array on success and a bare
/// string on most errors, so it is parsed in a second step.
#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

/// One row of the token-list endpoint. All numeric fields arrive as
/// strings; `decimals` and `balance` are frequently absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenListing {
    pub contract_address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub decimals: Option<String>,
    #[serde(default)]
    pub balance: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub value: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub gas_price: String,
    pub time_stamp: String,
    #[serde(default)]
    pub is_error: String,
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub input: String,
}

fn request_url(base_url: &str, action: &str, address: &str, params: &str) -> String {
    format!(
        "{}/api?module=account&action={}&address={}{}",
        base_url, action, address, params
    )
}

/// Client for the block-explorer REST API. All requests are dispatched
/// through the shared rate-limited queue.
#[derive(Clone)]
pub struct ExplorerClient {
    client: Client,
    base_url: String,
    queue: RequestQueue,
}

impl ExplorerClient {
    pub fn new(base_url: &str, queue: RequestQueue) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            queue,
        }
    }

    async fn fetch(&self, action: &str, address: &str, params: &str) -> Result<ExplorerResponse> {
        let url = request_url(&self.base_url, action, address, params);
        let client = self.client.clone();
        self.queue
            .enqueue(async move {
                let response = client.get(&url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::ExplorerError(format!(
                        "explorer returned status {}",
                        status
                    )));
                }
                Ok(response.json::<ExplorerResponse>().await?)
            })
            .await
    }

    /// Tokens the explorer has seen the wallet hold. An explicit
    /// "No tokens found" reply is a valid empty result, not an error.
    pub async fn token_list(&self, wallet: &str) -> Result<Vec<TokenListing>> {
        let wallet = wallet.to_lowercase();
        let response = self.fetch("tokenlist", &wallet, "").await?;

        if response.status == "1" {
            let listings: Vec<TokenListing> = serde_json::from_value(response.result)?;
            info!("Explorer listed {} tokens for {}", listings.len(), wallet);
            return Ok(listings);
        }
        if response.message.eq_ignore_ascii_case("No tokens found") {
            info!("Explorer reports no tokens for {}", wallet);
            return Ok(Vec::new());
        }
        warn!("Token list request failed: {}", response.message);
        Err(Error::ExplorerError(response.message))
    }

    /// Most recent transactions, newest first, capped to 50.
    pub async fn transactions(&self, wallet: &str) -> Result<Vec<Transaction>> {
        let wallet = wallet.to_lowercase();
        let response = self.fetch("txlist", &wallet, "&sort=desc").await?;

        if response.status == "1" {
            let mut txs: Vec<Transaction> = serde_json::from_value(response.result)?;
            txs.truncate(TX_CAP);
            return Ok(txs);
        }
        if response.message.eq_ignore_ascii_case("No transactions found") {
            return Ok(Vec::new());
        }
        warn!("Transaction list request failed: {}", response.message);
        Err(Error::ExplorerError(response.message))
    }
}

/// Fixed-size client-side page over an already-fetched transaction list.
/// Pages are zero-indexed; a page past the end is empty.
pub fn paginate(txs: &[Transaction], page: usize, page_size: usize) -> &[Transaction] {
    if page_size == 0 {
        return &[];
    }
    let start = page.saturating_mul(page_size);
    if start >= txs.len() {
        return &[];
    }
    let end = (start + page_size).min(txs.len());
    &txs[start..end]
}
