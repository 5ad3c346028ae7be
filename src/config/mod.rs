//! Configuration
//!
//! Figment-merged settings: defaults, global file, project file, then
//! `UPSHOT_`-prefixed environment variables.

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{Config, PipelineConfig, RealtimeConfig, RetryConfig, StoreConfig};
