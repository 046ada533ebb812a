/// Re-export `Config` from `funnelflow-core` for use within this crate.
///
/// All environment-variable parsing lives in `funnelflow-core` so it can be
/// shared with integration tests and future crates without depending on the
/// full server.
pub use funnelflow_core::config::Config;
