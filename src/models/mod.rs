pub mod portfolio;

pub use portfolio::{
    Delta, PortfolioHistoryEntry, PortfolioSnapshot, PriceHistoryEntry, PriceSource, Token,
    TokenValueBreakdown,
};
