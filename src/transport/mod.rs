pub mod alert_bus;

pub use alert_bus::*;
