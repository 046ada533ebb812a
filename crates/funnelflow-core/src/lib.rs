pub mod config;
pub mod dispatch;
pub mod error;
pub mod funnel;
pub mod gate;
pub mod matcher;
pub mod track;

pub use config::Config;
pub use funnel::FunnelBackend;
