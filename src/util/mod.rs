pub mod price_feed;
pub mod retry;
pub mod schedule;
pub mod time_series;

pub use price_feed::{BinancePriceFeed, PriceSource};
pub use retry::RetryPolicy;
pub use time_series::{KlineStore, SeriesSource};
