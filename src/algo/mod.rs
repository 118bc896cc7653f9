/// Signal computation over kline series

pub mod math_calculations;
pub mod signal_processor;
pub mod sma;
pub mod bollinger;

pub use signal_processor::{dedup_signals, SignalStrategy};
