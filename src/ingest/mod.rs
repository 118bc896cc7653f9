pub mod cmc_client;
pub mod data_center;
pub mod klines;

pub use cmc_client::{CmcClient, CmcPairSource, FetchWindow, PairDataSource};
pub use data_center::DataCenter;
pub use klines::{KlineUpdater, RefreshSummary, TrackedToken};
