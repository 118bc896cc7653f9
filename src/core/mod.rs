pub mod types;
pub mod constants;
pub mod error;
pub mod wallet_management;

pub use types::*;
pub use constants::*;
pub use error::{EngineError, EngineResult};
pub use wallet_management::TradingWallet;
