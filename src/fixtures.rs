//! Recorded-observation tool bindings
//!
//! Replays tool outputs captured from a cluster so a diagnosis can run
//! without cluster access. A recording maps tool names to entries; the
//! first entry whose `when` params all match the call answers it.
//!
//! ```yaml
//! get_pod_logs:
//!   - when: { previous: true }
//!     reply: "OOMKilled"
//!   - reply: "starting payments service"
//! get_events:
//!   - error: { kind: unavailable, message: "apiserver throttled" }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use kubediag_tools::{Tool, ToolContext, ToolRegistry};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure to replay instead of an output
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Execution,
    PermissionDenied,
    Timeout,
    Network,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordedFailure {
    pub kind: FailureKind,
    #[serde(default)]
    pub message: String,
}

impl RecordedFailure {
    fn to_error(&self) -> kubediag_tools::Error {
        let message = self.message.clone();
        match self.kind {
            FailureKind::Execution => kubediag_tools::Error::Execution(message),
            FailureKind::PermissionDenied => kubediag_tools::Error::PermissionDenied(message),
            FailureKind::Timeout => kubediag_tools::Error::Timeout(0),
            FailureKind::Network => kubediag_tools::Error::Network(message),
            FailureKind::Unavailable => kubediag_tools::Error::Unavailable(message),
        }
    }
}

/// One recorded answer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Observation {
    /// Params the call must carry, compared by equality
    #[serde(default)]
    pub when: Map<String, Value>,
    #[serde(default)]
    pub reply: Option<Value>,
    #[serde(default)]
    pub error: Option<RecordedFailure>,
}

impl Observation {
    fn matches(&self, params: &Value) -> bool {
        self.when
            .iter()
            .all(|(key, expected)| params.get(key) == Some(expected))
    }
}

/// Replays the recorded observations of one tool
#[derive(Debug)]
pub struct FixtureTool {
    name: String,
    observations: Vec<Observation>,
}

impl FixtureTool {
    pub fn new(name: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            name: name.into(),
            observations,
        }
    }
}

#[async_trait]
impl Tool for FixtureTool {
    async fn invoke(&self, params: Value, ctx: &ToolContext) -> kubediag_tools::Result<Value> {
        let Some(observation) = self.observations.iter().find(|o| o.matches(&params)) else {
            warn!(tool = %self.name, environment = %ctx.environment, "No recorded observation matches");
            return Err(kubediag_tools::Error::Execution(format!(
                "no recorded observation for {} with params {}",
                self.name, params
            )));
        };

        debug!(tool = %self.name, environment = %ctx.environment, "Replaying observation");
        match (&observation.error, &observation.reply) {
            (Some(failure), _) => Err(failure.to_error()),
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Ok(Value::String(String::new())),
        }
    }
}

/// A recording: tool name to its observations
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Recording {
    tools: BTreeMap<String, Vec<Observation>>,
}

impl Recording {
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid observation recording")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read observations from {}", path.display()))?;
        Self::parse(&content)
    }

    /// Bind every recorded tool into the registry; returns how many were bound
    pub fn bind_all(self, registry: &mut ToolRegistry) -> Result<usize> {
        let mut bound = 0;
        for (name, observations) in self.tools {
            let tool: Arc<dyn Tool> = Arc::new(FixtureTool::new(name.clone(), observations));
            registry
                .bind(&name, tool)
                .with_context(|| format!("Observations recorded for unknown tool '{name}'"))?;
            bound += 1;
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RECORDING: &str = r#"
get_pod_logs:
  - when: { previous: true }
    reply: "Killed: out of memory"
  - reply: "starting payments service"
get_events:
  - error: { kind: unavailable, message: "apiserver throttled" }
describe_pod:
  - when: { pod_name: payments-7f9 }
    reply: { phase: Running, restarts: 4 }
"#;

    fn ctx() -> ToolContext {
        ToolContext {
            environment: "staging".to_string(),
            connection_ref: "kind-staging".to_string(),
        }
    }

    fn tool(recording: &Recording, name: &str) -> FixtureTool {
        FixtureTool::new(name, recording.tools[name].clone())
    }

    #[tokio::test]
    async fn test_first_matching_observation_answers() {
        let recording = Recording::parse(RECORDING).unwrap();
        let logs = tool(&recording, "get_pod_logs");

        let previous = logs
            .invoke(json!({"namespace": "payments", "previous": true}), &ctx())
            .await
            .unwrap();
        assert_eq!(previous, json!("Killed: out of memory"));

        let current = logs
            .invoke(json!({"namespace": "payments"}), &ctx())
            .await
            .unwrap();
        assert_eq!(current, json!("starting payments service"));
    }

    #[tokio::test]
    async fn test_recorded_failure_keeps_its_class() {
        let recording = Recording::parse(RECORDING).unwrap();
        let err = tool(&recording, "get_events")
            .invoke(json!({"namespace": "payments"}), &ctx())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(
            err,
            kubediag_tools::Error::Unavailable("apiserver throttled".to_string())
        );
    }

    #[tokio::test]
    async fn test_unmatched_call_fails_permanently() {
        let recording = Recording::parse(RECORDING).unwrap();
        let err = tool(&recording, "describe_pod")
            .invoke(json!({"namespace": "payments", "pod_name": "other-1"}), &ctx())
            .await
            .unwrap_err();

        assert!(matches!(err, kubediag_tools::Error::Execution(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_bind_all_into_builtin_registry() {
        let mut registry = ToolRegistry::with_builtins();
        let bound = Recording::parse(RECORDING)
            .unwrap()
            .bind_all(&mut registry)
            .unwrap();

        assert_eq!(bound, 3);
        assert!(registry.is_bound("get_pod_logs"));
        assert!(!registry.is_bound("restart_pod"));
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let mut registry = ToolRegistry::with_builtins();
        let recording = Recording::parse("kubectl_everything:\n  - reply: ok\n").unwrap();
        assert!(recording.bind_all(&mut registry).is_err());
    }
}
