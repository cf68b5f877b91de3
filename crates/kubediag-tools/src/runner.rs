//! Runner - Tool execution engine
//!
//! The runner resolves a tool binding, applies the per-call timeout and
//! reports the outcome. It never retries: retry policy belongs to the caller,
//! which knows whether a step may be repeated.

use crate::error::{Error, Result};
use crate::registry::{ToolContext, ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Configuration for the tool runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Default timeout for tool execution
    pub default_timeout: Duration,
    /// Maximum timeout allowed
    pub max_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300),
        }
    }
}

impl RunnerConfig {
    /// Create a new configuration with default timeout
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            ..Default::default()
        }
    }

    /// Set the maximum timeout
    #[must_use]
    pub fn with_max_timeout(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = max_timeout;
        self
    }

    /// Timeout actually applied to a call
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        self.default_timeout.min(self.max_timeout)
    }
}

/// Tool runner for executing bound tools under a timeout
#[derive(Clone)]
pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
    config: RunnerConfig,
}

impl std::fmt::Debug for ToolRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRunner")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl ToolRunner {
    /// Create a new tool runner
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, config: RunnerConfig) -> Self {
        Self { registry, config }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(registry: Arc<ToolRegistry>) -> Self {
        Self::new(registry, RunnerConfig::default())
    }

    /// Get the registry
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Execute a tool by name
    #[instrument(skip(self, input, ctx), fields(tool = %tool_name, env = %ctx.environment))]
    pub async fn execute(
        &self,
        tool_name: &str,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult> {
        if !self.registry.has(tool_name) {
            return Err(Error::NotFound(tool_name.to_string()));
        }
        let tool = self.registry.binding(tool_name).ok_or_else(|| {
            Error::NotFound(format!("{} (no implementation bound)", tool_name))
        })?;

        let execution_timeout = self.config.effective_timeout();
        let start = Instant::now();
        debug!(timeout_ms = %execution_timeout.as_millis(), "Executing tool");

        match timeout(execution_timeout, tool.invoke(input, ctx)).await {
            Ok(Ok(output)) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(duration_ms, "Tool execution completed");
                Ok(ToolResult {
                    output,
                    duration_ms,
                })
            }
            Ok(Err(e)) => {
                warn!(error = %e, transient = e.is_transient(), "Tool execution failed");
                Err(e)
            }
            Err(_) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                warn!(timeout_ms = %execution_timeout.as_millis(), "Tool execution timed out");
                Err(Error::Timeout(duration_ms))
            }
        }
    }
}
