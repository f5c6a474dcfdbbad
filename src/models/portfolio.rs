use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Provenance tag for a token's unit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSource {
    /// Allow-listed stable asset, hardcoded 1.00.
    Fixed,
    /// External price API quote.
    Oracle,
    /// Derived from liquidity-pool reserves.
    OnChain,
    /// No source produced a usable price.
    Unknown,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            PriceSource::Fixed => "fixed",
            PriceSource::Oracle => "oracle",
            PriceSource::OnChain => "on-chain",
            PriceSource::Unknown => "unknown",
        };
        write!(f, "{}", tag)
    }
}

/// One token holding inside a snapshot. The contract address (lowercase)
/// is the only stable identity; name and symbol come from the explorer
/// and may be empty or wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub address: String,
    pub name: String,
    pub symbol: String,
    /// Scaled balance kept as a decimal string to preserve full precision
    /// until display formatting.
    pub balance: String,
    pub decimals: u8,
    /// Unit price in USD. 0.0 when no source resolved.
    pub price: f64,
    /// balance × price, in USD.
    pub value: f64,
    pub price_source: PriceSource,
    pub price_updated_at: DateTime<Utc>,
}

impl Token {
    /// Balance parsed for arithmetic. Display formatting keeps the string.
    pub fn balance_f64(&self) -> f64 {
        self.balance.parse().unwrap_or(0.0)
    }
}

/// One complete, consistent valuation of a wallet's holdings at a point
/// in time. Superseded, never mutated, by the next snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub wallet: String,
    pub tokens: Vec<Token>,
    pub total_value: f64,
    pub updated_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn token(&self, address: &str) -> Option<&Token> {
        let address = address.to_lowercase();
        self.tokens.iter().find(|t| t.address == address)
    }
}

/// Stored per (wallet, token): one price/value observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub price: f64,
    pub value: f64,
    pub timestamp: i64,
}

/// Per-token contribution recorded inside a portfolio sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenValueBreakdown {
    pub address: String,
    pub value: f64,
    pub price: f64,
}

/// Stored per wallet: one portfolio-total observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioHistoryEntry {
    pub total_value: f64,
    pub timestamp: i64,
    pub tokens: Vec<TokenValueBreakdown>,
}

/// Change between a current value and a historical baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    pub absolute: f64,
    pub percentage: f64,
}
