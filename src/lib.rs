pub mod addressing;
pub mod bus;
pub mod config;
pub mod constants;
pub mod drivers;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod idempotency;
pub mod logging;
pub mod metrics;
pub mod producer;
pub mod schema;
pub mod store;
