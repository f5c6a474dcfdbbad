pub mod coingecko;
pub mod explorer;

pub use coingecko::CoinGeckoClient;
pub use explorer::{ExplorerClient, TokenListing, Transaction};
