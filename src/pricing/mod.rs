pub mod cache;
pub mod oracle;

pub use cache::{RateCache, RateRefresher};
pub use oracle::{MarketDataClient, RateSource};
