//! Engine configuration
//!
//! Plain serde structures with defaults for every field, so an empty
//! document yields a working engine. Loading (files, environment variables)
//! is left to the embedding application.

use crate::audit::AuditConfig;
use crate::engine::ReplanConfig;
use crate::error::{Error, Result};
use crate::executor::ExecutorConfig;
use crate::report::ReportConfig;
use crate::retry::RetryConfig;
use crate::safety::SafetyPolicy;
use kubediag_tools::RunnerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduling, retries and confirmations
    #[serde(default)]
    pub executor: ExecutorSettings,
    /// Tool call timeouts
    #[serde(default)]
    pub invoker: InvokerSettings,
    /// Replan ceiling
    #[serde(default)]
    pub replan: ReplanConfig,
    /// Safety gate policy
    #[serde(default)]
    pub safety: SafetyPolicy,
    /// Report synthesis
    #[serde(default)]
    pub report: ReportConfig,
    /// Audit log
    #[serde(default)]
    pub audit: AuditConfig,
    /// Session retention
    #[serde(default)]
    pub sessions: SessionSettings,
}

/// Session section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Finished sessions kept for queries; the oldest are evicted first.
    /// Running sessions are never evicted.
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
}

fn default_max_retained() -> usize {
    100
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_retained: default_max_retained(),
        }
    }
}

/// Executor section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Maximum concurrently running steps
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Attempt ceiling for transient failures, first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Retry delay cap
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// How long a confirmation request waits for an operator
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

fn default_max_in_flight() -> usize {
    3
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_confirmation_timeout_secs() -> u64 {
    300
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
        }
    }
}

impl ExecutorSettings {
    /// Executor configuration with the retry policy filled in
    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_in_flight: self.max_in_flight,
            retry: RetryConfig::new()
                .with_max_attempts(self.max_attempts)
                .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
                .with_max_delay(Duration::from_millis(self.max_backoff_ms)),
        }
    }

    /// Confirmation timeout
    #[must_use]
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Invoker section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokerSettings {
    /// Per-call timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound any per-call timeout is clamped to
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_timeout_secs() -> u64 {
    300
}

impl Default for InvokerSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
        }
    }
}

impl InvokerSettings {
    /// Tool runner configuration
    #[must_use]
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new(Duration::from_secs(self.timeout_secs))
            .with_max_timeout(Duration::from_secs(self.max_timeout_secs))
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let executor = &self.executor;
        if executor.max_in_flight == 0 {
            return Err(Error::Configuration(
                "executor.max_in_flight must be at least 1".to_string(),
            ));
        }
        if executor.max_attempts == 0 {
            return Err(Error::Configuration(
                "executor.max_attempts must be at least 1".to_string(),
            ));
        }
        if executor.initial_backoff_ms > executor.max_backoff_ms {
            return Err(Error::Configuration(format!(
                "executor.initial_backoff_ms ({}) exceeds executor.max_backoff_ms ({})",
                executor.initial_backoff_ms, executor.max_backoff_ms
            )));
        }
        if executor.confirmation_timeout_secs <= self.invoker.timeout_secs {
            return Err(Error::Configuration(
                "executor.confirmation_timeout_secs must exceed invoker.timeout_secs".to_string(),
            ));
        }
        if self.sessions.max_retained == 0 {
            return Err(Error::Configuration(
                "sessions.max_retained must be at least 1".to_string(),
            ));
        }
        if self.invoker.timeout_secs == 0 {
            return Err(Error::Configuration(
                "invoker.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
