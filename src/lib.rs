// Core types, errors and wallet
pub mod core;

// Configuration and signal computation
pub mod config;
pub mod algo;

// Data refresh: pool discovery, pair resolution, klines
pub mod scout;
pub mod ingest;

// Position lifecycle and its collaborators
pub mod execution;
pub mod trading;
pub mod transport;

pub mod util;

// Re-export commonly used types for convenience
pub use core::*;
pub use config::Config;
pub use execution::{CycleRunner, TradingAccount};
pub use ingest::DataCenter;
