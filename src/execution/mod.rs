/// Position lifecycle: signals, risk, allocation, execution and the ledger

pub mod allocation;
pub mod monitor;
pub mod position;
pub mod recorder;
pub mod risk;
pub mod strategy;
pub mod trading;

pub use allocation::CapitalAllocator;
pub use monitor::{AccountReport, CycleRunner, TradingAccount};
pub use position::PositionStore;
pub use recorder::{apply_results, LedgerContext, LedgerUpdate, LifecycleRecorder};
pub use risk::{RiskEvaluator, RiskOutcome};
pub use strategy::{AccountScope, FreshSignal, SignalEngine};
pub use trading::ExecutionGateway;
