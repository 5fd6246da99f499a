pub mod config;
pub mod errors;
pub mod gateway;
pub mod metrics;
pub mod optimize;
pub mod stack;
pub mod telemetry;
