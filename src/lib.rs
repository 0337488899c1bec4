pub mod api;
pub mod config;
pub mod election;
pub mod engine;
pub mod error;
pub mod keys;
pub mod policy;
pub mod proxy;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod store;

/// Crate version reported by the HTTP index.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
