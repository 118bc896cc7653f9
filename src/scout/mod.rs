pub mod pools;
pub mod scanner;

pub use pools::PoolStore;
pub use scanner::{PoolScanner, PoolSource};
