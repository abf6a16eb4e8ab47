pub mod alerts;
pub mod config;
pub mod http;
pub mod metrics;
pub mod mqtt;
pub mod pipeline;
pub mod shutdown;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub mod test_support;
