//! Configuration Types
//!
//! Serde-backed config merged by the figment loader. The attribution
//! feature flag (`pipeline.persona_analysis`) lives here: it decides at
//! pipeline construction whether answers get attributed at all.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants;
use crate::provider::ProviderConfig;
use crate::queue::RetryPolicy;
use crate::types::{Result, UpshotError};

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub realtime: RealtimeConfig,
}

/// Record store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: ".upshot/upshot.db".to_string(),
        }
    }
}

/// Shared retry policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub factor: f32,
    pub min_delay_ms: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::retry::MAX_ATTEMPTS,
            factor: constants::retry::BACKOFF_FACTOR,
            min_delay_ms: constants::retry::MIN_DELAY_MS,
            max_delay_secs: constants::retry::MAX_DELAY_SECS,
        }
    }
}

/// Batch pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-attempt max duration for a batch stage
    pub stage_timeout_secs: u64,
    /// Attribution feature flag; off selects the no-op attributor
    pub persona_analysis: bool,
    /// Optional guidance forwarded to insight synthesis
    pub custom_instructions: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: constants::pipeline::STAGE_TIMEOUT_SECS,
            persona_analysis: false,
            custom_instructions: None,
        }
    }
}

/// Real-time incremental path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Hard per-batch deadline
    pub batch_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            batch_timeout_secs: constants::realtime::BATCH_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Validate merged configuration before use.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(UpshotError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.factor < 1.0 {
            return Err(UpshotError::Config(
                "retry.factor must be >= 1.0".to_string(),
            ));
        }
        if self.pipeline.stage_timeout_secs == 0 {
            return Err(UpshotError::Config(
                "pipeline.stage_timeout_secs must be positive".to_string(),
            ));
        }
        if self.realtime.batch_timeout_secs == 0 {
            return Err(UpshotError::Config(
                "realtime.batch_timeout_secs must be positive".to_string(),
            ));
        }
        if self.store.path.is_empty() {
            return Err(UpshotError::Config("store.path must be set".to_string()));
        }
        Ok(())
    }

    /// Retry policy shared by all queue tasks.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            factor: self.retry.factor,
            min_delay: Duration::from_millis(self.retry.min_delay_ms),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.stage_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.realtime.batch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert!((config.retry.factor - 1.8).abs() < f32::EPSILON);
        assert_eq!(config.retry.min_delay_ms, 500);
        assert_eq!(config.retry.max_delay_secs, 30);
        assert!(!config.pipeline.persona_analysis);
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_sub_one_factor() {
        let mut config = Config::default();
        config.retry.factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_mapping() {
        let config = Config::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.min_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
