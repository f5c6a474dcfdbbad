use std::sync::Arc;
use std::time::Duration;

use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use ethers::utils::format_units;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::utils::queue::RequestQueue;
use crate::utils::retry::retry_with_backoff;

/// Decimals assumed when a token's `decimals()` accessor fails; many
/// tokens do not implement it reliably.
pub const DEFAULT_DECIMALS: u8 = 18;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) view returns (uint256)
        function decimals() view returns (uint8)
        function symbol() view returns (string)
        function name() view returns (string)
    ]"#,
);

abigen!(
    PoolFactory,
    r#"[
        function getPool(address tokenA, address tokenB) view returns (address)
    ]"#,
);

// The network carries two pool generations with incompatible reserve
// ordering accessors. Which one a pool speaks is detected per pool,
// never assumed.
abigen!(
    Pool,
    r#"[
        function getReserves() view returns (uint256, uint256)
        function tokenA() view returns (address)
        function tokenB() view returns (address)
    ]"#,
);

abigen!(
    PoolV2,
    r#"[
        function getReserves() view returns (uint256 reserve0, uint256 reserve1, uint32 blockTimestampLast)
        function token0() view returns (address)
        function token1() view returns (address)
    ]"#,
);

pub fn parse_address(value: &str) -> Result<Address> {
    value
        .parse::<Address>()
        .map_err(|e| Error::ParseError(format!("invalid address {}: {}", value, e)))
}

/// Scales a raw reserve by its token's decimals.
fn normalize_units(raw: U256, decimals: u8) -> f64 {
    format_units(raw, decimals as i32)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

/// Reference-per-token price from normalized reserves. An empty token
/// reserve prices at 0, never a division error.
fn reserves_price(token_reserve: f64, reference_reserve: f64) -> f64 {
    if token_reserve <= 0.0 {
        return 0.0;
    }
    reference_reserve / token_reserve
}

/// Read-only JSON-RPC access to the network. All calls go through the
/// shared rate-limited queue; per-call resilience is the retry wrapper.
pub struct ChainClient {
    provider: Arc<Provider<Http>>,
    factory: Address,
    queue: RequestQueue,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ChainClient {
    pub fn new(
        rpc_url: &str,
        factory: &str,
        queue: RequestQueue,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| Error::ConfigError(format!("invalid RPC URL {}: {}", rpc_url, e)))?;
        Ok(Self {
            provider: Arc::new(provider),
            factory: parse_address(factory)?,
            queue,
            max_attempts,
            retry_delay,
        })
    }

    async fn call_balance(&self, wallet: Address, token: Address) -> Result<U256> {
        let provider = self.provider.clone();
        self.queue
            .enqueue(async move {
                Erc20::new(token, provider)
                    .balance_of(wallet)
                    .call()
                    .await
                    .map_err(|e| Error::RpcError(e.to_string()))
            })
            .await
    }

    async fn call_decimals(&self, token: Address) -> Result<u8> {
        let provider = self.provider.clone();
        self.queue
            .enqueue(async move {
                Erc20::new(token, provider)
                    .decimals()
                    .call()
                    .await
                    .map_err(|e| Error::RpcError(e.to_string()))
            })
            .await
    }

    /// Balance and decimals for one token, retried per call. Returns the
    /// scaled balance as a full-precision decimal string. `None` means
    /// the balance could not be read at all; the caller falls back to
    /// its last known figures.
    pub async fn token_balance(&self, wallet: &str, token: &str) -> Option<(String, u8)> {
        let wallet = parse_address(wallet).ok()?;
        let token_addr = match parse_address(token) {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Skipping balance read: {}", e);
                return None;
            }
        };

        let raw = retry_with_backoff(self.max_attempts, self.retry_delay, || {
            self.call_balance(wallet, token_addr)
        })
        .await?;

        let decimals = retry_with_backoff(self.max_attempts, self.retry_delay, || {
            self.call_decimals(token_addr)
        })
        .await
        .unwrap_or(DEFAULT_DECIMALS);

        let balance = format_units(raw, decimals as i32).unwrap_or_else(|_| "0".to_string());
        debug!("Balance {} = {} (decimals {})", token, balance, decimals);
        Some((balance, decimals))
    }

    async fn call_pool_address(&self, token: Address, reference: Address) -> Result<Address> {
        let provider = self.provider.clone();
        let factory = self.factory;
        self.queue
            .enqueue(async move {
                PoolFactory::new(factory, provider)
                    .get_pool(token, reference)
                    .call()
                    .await
                    .map_err(|e| Error::RpcError(e.to_string()))
            })
            .await
    }

    /// Reads the pool pairing `token` with the reference stable asset and
    /// derives a unit price from its reserves. `Ok(None)` means no pool
    /// exists; RPC failures surface as errors so the caller's retry
    /// wrapper can act on them.
    pub async fn pool_price(
        &self,
        token: &str,
        token_decimals: u8,
        reference: &str,
        reference_decimals: u8,
    ) -> Result<Option<f64>> {
        let token_addr = parse_address(token)?;
        let reference_addr = parse_address(reference)?;

        let pool = self.call_pool_address(token_addr, reference_addr).await?;
        if pool == Address::zero() {
            debug!("No pool for {} against reference asset", token);
            return Ok(None);
        }

        let (token_reserve, reference_reserve) =
            self.read_reserves(pool, token_addr).await?;

        let price = reserves_price(
            normalize_units(token_reserve, token_decimals),
            normalize_units(reference_reserve, reference_decimals),
        );
        info!("Pool price for {}: {:.6} USD", token, price);
        Ok(Some(price))
    }

    /// Returns `(token_reserve, reference_reserve)` using whichever
    /// ordering convention the pool contract exposes.
    async fn read_reserves(&self, pool: Address, token: Address) -> Result<(U256, U256)> {
        let provider = self.provider.clone();
        let token_a = self
            .queue
            .enqueue(async move {
                Pool::new(pool, provider)
                    .token_a()
                    .call()
                    .await
                    .map_err(|e| Error::RpcError(e.to_string()))
            })
            .await;

        match token_a {
            Ok(token_a) => {
                let provider = self.provider.clone();
                let (reserve_a, reserve_b) = self
                    .queue
                    .enqueue(async move {
                        Pool::new(pool, provider)
                            .get_reserves()
                            .call()
                            .await
                            .map_err(|e| Error::RpcError(e.to_string()))
                    })
                    .await?;
                if token_a == token {
                    Ok((reserve_a, reserve_b))
                } else {
                    Ok((reserve_b, reserve_a))
                }
            }
            Err(_) => {
                // Older V2-style pool: token0/token1 ordering.
                debug!("Pool {:?} lacks tokenA accessor, trying token0", pool);
                let provider = self.provider.clone();
                let token_0 = self
                    .queue
                    .enqueue(async move {
                        PoolV2::new(pool, provider)
                            .token_0()
                            .call()
                            .await
                            .map_err(|e| Error::RpcError(e.to_string()))
                    })
                    .await?;
                let provider = self.provider.clone();
                let (reserve_0, reserve_1, _) = self
                    .queue
                    .enqueue(async move {
                        PoolV2::new(pool, provider)
                            .get_reserves()
                            .call()
                            .await
                            .map_err(|e| Error::RpcError(e.to_string()))
                    })
                    .await?;
                if token_0 == token {
                    Ok((reserve_0, reserve_1))
                } else {
                    Ok((reserve_1, reserve_0))
                }
            }
        }
    }
}
