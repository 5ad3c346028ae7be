//! Application-wide Constants
//!
//! Grouped by concern. The retry numbers are shared by every pipeline task;
//! stage-specific tuning goes through config, not here.

/// Shared retry policy applied to every queue task
pub mod retry {
    /// Total attempts per task (first try plus retries)
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Exponential backoff multiplier between attempts
    pub const BACKOFF_FACTOR: f32 = 1.8;
    /// Delay floor before the first retry
    pub const MIN_DELAY_MS: u64 = 500;
    /// Delay ceiling regardless of attempt count
    pub const MAX_DELAY_SECS: u64 = 30;
}

/// Batch pipeline execution
pub mod pipeline {
    /// Per-attempt max duration for a batch stage
    pub const STAGE_TIMEOUT_SECS: u64 = 600;
}

/// Real-time incremental extraction
pub mod realtime {
    /// Hard per-batch deadline; a live session cannot wait longer
    pub const BATCH_TIMEOUT_SECS: u64 = 120;
}

/// Provider HTTP defaults
pub mod network {
    pub const REQUEST_TIMEOUT_SECS: u64 = 300;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
}
