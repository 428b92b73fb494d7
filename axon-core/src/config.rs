//! Ambient runtime configuration.
//!
//! `RuntimeConfig` holds values the executor needs to start an execution
//! that are not part of the compiled program: none of this is read from a
//! file or from CLI arguments (both explicitly out of scope) — only
//! environment-variable overrides with documented defaults.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Effort level bound by a `run` statement (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffortLevel {
    Low,
    Medium,
    High,
    Max,
}

impl Default for EffortLevel {
    fn default() -> Self {
        EffortLevel::Medium
    }
}

/// Backoff policy shared by the retry engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackoffPolicy {
    None,
    Linear { increment_ms: u64 },
    Exponential { base_ms: u64 },
}

impl BackoffPolicy {
    /// Delay before the given 1-indexed attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::None => Duration::from_millis(0),
            BackoffPolicy::Linear { increment_ms } => {
                Duration::from_millis(increment_ms * attempt as u64)
            }
            BackoffPolicy::Exponential { base_ms } => {
                Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))))
            }
        }
    }
}

/// Ambient execution defaults, distinct from the compiled IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Confidence value to assume when a model client response omits one and
    /// no floor is in scope from any anchor, context, or persona.
    pub default_confidence: f64,
    /// Effort level assumed when a `run` statement does not specify one.
    pub default_effort: EffortLevel,
    /// Default timeout for a tool invocation that does not declare its own.
    pub default_tool_timeout: Duration,
    /// Default backoff policy for a `refine` block that does not specify one.
    pub default_backoff: BackoffPolicy,
    /// Default maximum refine attempts.
    pub default_max_attempts: u32,
    /// How often the executor polls for a host cancellation signal.
    pub cancellation_poll_interval: Duration,
}

impl RuntimeConfig {
    /// Centralizes the sane defaults so callers don't hardcode policy
    /// per effort level.
    pub fn default_for_effort(effort: EffortLevel) -> Self {
        let mut config = Self::default();
        config.default_effort = effort;
        match effort {
            EffortLevel::Low => {
                config.default_max_attempts = 1;
                config.default_tool_timeout = Duration::from_secs(5);
            }
            EffortLevel::Medium => {
                config.default_max_attempts = 2;
                config.default_tool_timeout = Duration::from_secs(15);
            }
            EffortLevel::High => {
                config.default_max_attempts = 3;
                config.default_tool_timeout = Duration::from_secs(30);
            }
            EffortLevel::Max => {
                config.default_max_attempts = 5;
                config.default_tool_timeout = Duration::from_secs(60);
            }
        }
        config
    }

    /// Validate the configuration.
    ///
    /// Validates: `default_confidence` in `[0.0, 1.0]`, all durations
    /// positive, `default_max_attempts` >= 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.default_confidence) {
            return Err(ConfigError {
                field: "default_confidence".to_string(),
                value: self.default_confidence.to_string(),
                reason: "default_confidence must be between 0.0 and 1.0".to_string(),
            });
        }

        if self.default_tool_timeout.is_zero() {
            return Err(ConfigError {
                field: "default_tool_timeout".to_string(),
                value: format!("{:?}", self.default_tool_timeout),
                reason: "default_tool_timeout must be positive".to_string(),
            });
        }

        if self.cancellation_poll_interval.is_zero() {
            return Err(ConfigError {
                field: "cancellation_poll_interval".to_string(),
                value: format!("{:?}", self.cancellation_poll_interval),
                reason: "cancellation_poll_interval must be positive".to_string(),
            });
        }

        if self.default_max_attempts < 1 {
            return Err(ConfigError {
                field: "default_max_attempts".to_string(),
                value: self.default_max_attempts.to_string(),
                reason: "default_max_attempts must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Build from environment-variable overrides, falling back to
    /// documented defaults. This is ambient defaulting, not file-based
    /// configuration loading.
    ///
    /// Environment variables:
    /// - `AXON_DEFAULT_CONFIDENCE` (default: 0.5)
    /// - `AXON_DEFAULT_TOOL_TIMEOUT_MS` (default: 15000)
    /// - `AXON_CANCELLATION_POLL_INTERVAL_MS` (default: 50)
    /// - `AXON_DEFAULT_MAX_ATTEMPTS` (default: 2)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_confidence: std::env::var("AXON_DEFAULT_CONFIDENCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_confidence),
            default_effort: defaults.default_effort,
            default_tool_timeout: std::env::var("AXON_DEFAULT_TOOL_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_tool_timeout),
            default_backoff: defaults.default_backoff,
            default_max_attempts: std::env::var("AXON_DEFAULT_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_attempts),
            cancellation_poll_interval: std::env::var("AXON_CANCELLATION_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.cancellation_poll_interval),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_confidence: 0.5,
            default_effort: EffortLevel::Medium,
            default_tool_timeout: Duration::from_secs(15),
            default_backoff: BackoffPolicy::Linear { increment_ms: 200 },
            default_max_attempts: 2,
            cancellation_poll_interval: Duration::from_millis(50),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_config_validates() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let mut config = RuntimeConfig::default();
        config.default_confidence = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "default_confidence");
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = RuntimeConfig::default();
        config.default_tool_timeout = Duration::from_secs(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "default_tool_timeout");
    }

    #[test]
    fn rejects_zero_max_attempts() {
        let mut config = RuntimeConfig::default();
        config.default_max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "default_max_attempts");
    }

    #[test]
    fn backoff_none_is_immediate() {
        assert_eq!(
            BackoffPolicy::None.delay_for_attempt(3),
            Duration::from_millis(0)
        );
    }

    #[test]
    fn backoff_linear_scales_with_attempt() {
        let policy = BackoffPolicy::Linear { increment_ms: 100 };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn backoff_exponential_doubles() {
        let policy = BackoffPolicy::Exponential { base_ms: 100 };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn default_for_effort_scales_attempts_and_timeout() {
        let low = RuntimeConfig::default_for_effort(EffortLevel::Low);
        let max = RuntimeConfig::default_for_effort(EffortLevel::Max);
        assert!(low.default_max_attempts < max.default_max_attempts);
        assert!(low.default_tool_timeout < max.default_tool_timeout);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Linear and exponential backoff never produce a shorter delay for
        /// a later attempt than an earlier one, whatever the increment/base.
        #[test]
        fn prop_backoff_delay_is_nondecreasing_in_attempt_number(
            increment_ms in 1u64..10_000,
            base_ms in 1u64..10_000,
            attempt in 1u32..20,
        ) {
            let linear = BackoffPolicy::Linear { increment_ms };
            prop_assert!(linear.delay_for_attempt(attempt) <= linear.delay_for_attempt(attempt + 1));

            let exponential = BackoffPolicy::Exponential { base_ms };
            prop_assert!(exponential.delay_for_attempt(attempt) <= exponential.delay_for_attempt(attempt + 1));
        }

        /// `BackoffPolicy::None` is always an immediate retry, regardless
        /// of which attempt number is asked about.
        #[test]
        fn prop_no_backoff_is_always_zero(attempt in 1u32..1000) {
            prop_assert_eq!(BackoffPolicy::None.delay_for_attempt(attempt), Duration::from_millis(0));
        }
    }
}
