pub mod backend;
pub mod funnel_impl;
pub mod metadata_impl;
pub mod queries;
pub mod schema;
pub mod session;
pub mod website;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `funnelflow_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
