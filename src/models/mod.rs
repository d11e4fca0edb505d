pub mod anomaly;
pub mod log;
