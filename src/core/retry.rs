//! Retry policy and backoff computation.

use std::sync::OnceLock;
use std::time::Duration;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use super::task::TaskStatus;

/// How a failed or timed-out task is retried.
///
/// `max_attempts` counts handler starts, so `1` means "never retry".
/// `retry_error_patterns` are regular expressions matched against the raw
/// error text of the failure; an empty list matches every error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum handler starts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_seconds: f64,
    /// Upper bound for any delay.
    pub max_delay_seconds: f64,
    /// Growth factor between retries.
    pub backoff_multiplier: f64,
    /// Retry tasks that hit their timeout.
    pub retry_on_timeout: bool,
    /// Retry tasks whose handler failed.
    pub retry_on_error: bool,
    /// Error patterns eligible for retry.
    pub retry_error_patterns: Vec<String>,
    /// `retry_error_patterns` compiled on first match.
    #[serde(skip)]
    compiled: OnceLock<RegexSet>,
}

impl PartialEq for RetryPolicy {
    fn eq(&self, other: &Self) -> bool {
        self.max_attempts == other.max_attempts
            && self.initial_delay_seconds == other.initial_delay_seconds
            && self.max_delay_seconds == other.max_delay_seconds
            && self.backoff_multiplier == other.backoff_multiplier
            && self.retry_on_timeout == other.retry_on_timeout
            && self.retry_on_error == other.retry_on_error
            && self.retry_error_patterns == other.retry_error_patterns
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_seconds: 1.0,
            max_delay_seconds: 300.0,
            backoff_multiplier: 2.0,
            retry_on_timeout: true,
            retry_on_error: true,
            retry_error_patterns: Vec::new(),
            compiled: OnceLock::new(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Exponential backoff with up to `max_attempts` handler starts.
    #[must_use]
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Set the initial and maximum delay in seconds.
    #[must_use]
    pub fn with_delays(mut self, initial_seconds: f64, max_seconds: f64) -> Self {
        self.initial_delay_seconds = initial_seconds;
        self.max_delay_seconds = max_seconds;
        self
    }

    /// Restrict error retries to failures matching `pattern`.
    #[must_use]
    pub fn retry_on_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.retry_error_patterns.push(pattern.into());
        self.compiled = OnceLock::new();
        self
    }

    /// Validate numeric bounds and pattern syntax.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        for (name, value) in [
            ("initial_delay_seconds", self.initial_delay_seconds),
            ("max_delay_seconds", self.max_delay_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number"));
            }
        }
        if self.max_delay_seconds < self.initial_delay_seconds {
            return Err("max_delay_seconds must be >= initial_delay_seconds".into());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be >= 1.0".into());
        }
        RegexSet::new(&self.retry_error_patterns).map_err(|e| format!("invalid retry pattern: {e}"))?;
        Ok(())
    }

    /// Delay before the retry that follows attempt number `attempts`:
    /// `min(max_delay, initial_delay * multiplier^(attempts - 1))`.
    #[must_use]
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.initial_delay_seconds * self.backoff_multiplier.powi(exponent);
        let secs = raw.min(self.max_delay_seconds).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
            Duration::try_from_secs_f64(self.max_delay_seconds.max(0.0)).unwrap_or_default()
        })
    }

    /// Whether `error` is eligible for retry under the pattern list.
    #[must_use]
    pub fn matches_error(&self, error: &str) -> bool {
        if self.retry_error_patterns.is_empty() {
            return true;
        }
        if let Some(set) = self.compiled.get() {
            if set.patterns() == self.retry_error_patterns.as_slice() {
                return set.is_match(error);
            }
        }
        // Patterns were validated at submission; a policy that skipped
        // validation and does not compile matches nothing.
        match RegexSet::new(&self.retry_error_patterns) {
            Ok(set) => {
                let matched = set.is_match(error);
                let _ = self.compiled.set(set);
                matched
            }
            Err(_) => false,
        }
    }

    /// Decide whether a task that just ended in `status` after `attempts`
    /// handler starts should be retried.
    #[must_use]
    pub fn should_retry(&self, attempts: u32, status: TaskStatus, error: &str) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }
        match status {
            TaskStatus::Timeout => self.retry_on_timeout,
            TaskStatus::Failed => self.retry_on_error && self.matches_error(error),
            _ => false,
        }
    }
}
