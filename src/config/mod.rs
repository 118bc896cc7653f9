/// Configuration loaded once at startup

pub mod strategy;

pub use strategy::*;
