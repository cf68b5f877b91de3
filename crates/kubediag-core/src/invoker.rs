//! Step Invoker - runs one authorized step against its bound tool
//!
//! The invoker marshals params (skill fixed params merged over the step's),
//! delegates to the timeout-bounded [`ToolRunner`], classifies the outcome
//! and writes the audit record. It never retries and never consults the
//! safety policy: both belong to the executor.

use crate::audit::{AuditLogger, Severity};
use crate::catalog::ResolvedAction;
use crate::environment::Environment;
use crate::plan::Step;
use crate::safety::SafetyViolation;
use kubediag_tools::ToolRunner;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Classified tool failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolInvocationError {
    /// May succeed if repeated (timeout, throttling, network)
    #[error("transient: {0}")]
    Transient(String),
    /// Will fail again (not found, bad input, permission)
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ToolInvocationError {
    /// Whether a retry may help
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Error text without the classification prefix
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

impl From<kubediag_tools::Error> for ToolInvocationError {
    fn from(e: kubediag_tools::Error) -> Self {
        if e.is_transient() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

/// Executes single steps for one session
#[derive(Debug, Clone)]
pub struct StepInvoker {
    runner: ToolRunner,
    audit: Option<Arc<AuditLogger>>,
    session_id: Option<Uuid>,
}

impl StepInvoker {
    /// Create an invoker without audit logging
    #[must_use]
    pub fn new(runner: ToolRunner) -> Self {
        Self {
            runner,
            audit: None,
            session_id: None,
        }
    }

    /// Write every invocation to this audit log
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Tag audit records with a session
    #[must_use]
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Run one step. The caller has already authorized it.
    #[instrument(skip_all, fields(step_id = step.step_id, action = %step.action, tool = %action.tool.name))]
    pub async fn invoke(
        &self,
        step: &Step,
        action: &ResolvedAction,
        environment: &Environment,
    ) -> Result<Value, ToolInvocationError> {
        let params = action.effective_params(&step.params);
        let ctx = environment.tool_context();

        let outcome = self
            .runner
            .execute(&action.tool.name, params.clone(), &ctx)
            .await;

        match outcome {
            Ok(result) => {
                debug!(duration_ms = result.duration_ms, "Step invocation succeeded");
                if let Some(audit) = &self.audit {
                    let text = output_text(&result.output);
                    audit
                        .log_invocation(
                            self.session_id,
                            &environment.name,
                            &action.tool.name,
                            &params,
                            true,
                            Some(&text),
                        )
                        .await;
                }
                Ok(result.output)
            }
            Err(e) => {
                let error = ToolInvocationError::from(e);
                debug!(error = %error, "Step invocation failed");
                if let Some(audit) = &self.audit {
                    audit
                        .log_invocation(
                            self.session_id,
                            &environment.name,
                            &action.tool.name,
                            &params,
                            false,
                            Some(error.message()),
                        )
                        .await;
                }
                Err(error)
            }
        }
    }

    /// Audit a safety denial
    pub async fn record_denial(
        &self,
        step: &Step,
        environment: &Environment,
        violation: &SafetyViolation,
    ) {
        if let Some(audit) = &self.audit {
            audit
                .log_security_event(
                    self.session_id,
                    violation.code(),
                    Severity::Warning,
                    json!({
                        "step_id": step.step_id,
                        "action": step.action,
                        "environment": environment.name,
                        "params": Value::Object(step.params.clone()),
                        "reason": violation.to_string(),
                    }),
                )
                .await;
        }
    }

    /// Audit an operator decision
    pub async fn record_confirmation(&self, step: &Step, tool: &str, outcome: &str) {
        if let Some(audit) = &self.audit {
            audit
                .log_confirmation(self.session_id, step.step_id, tool, outcome)
                .await;
        }
    }
}

/// Text form of a tool output
pub(crate) fn output_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditRecord;
    use crate::catalog::Catalog;
    use crate::environment::EnvironmentSpec;
    use kubediag_skills::SkillRegistry;
    use kubediag_tools::{Tool, ToolContext, ToolRegistry};
    use std::sync::Mutex;

    struct RecordingTool {
        seen: Mutex<Vec<Value>>,
        reply: kubediag_tools::Result<Value>,
    }

    #[async_trait::async_trait]
    impl Tool for RecordingTool {
        async fn invoke(&self, params: Value, _ctx: &ToolContext) -> kubediag_tools::Result<Value> {
            self.seen.lock().unwrap().push(params);
            self.reply.clone()
        }
    }

    fn setup(reply: kubediag_tools::Result<Value>) -> (Arc<RecordingTool>, Catalog, ToolRunner) {
        setup_for("get_pod_logs", reply)
    }

    fn setup_for(
        name: &str,
        reply: kubediag_tools::Result<Value>,
    ) -> (Arc<RecordingTool>, Catalog, ToolRunner) {
        let tool = Arc::new(RecordingTool {
            seen: Mutex::new(Vec::new()),
            reply,
        });
        let mut tools = ToolRegistry::with_builtins();
        tools.bind(name, tool.clone()).unwrap();
        let skills = SkillRegistry::builtin(&tools).unwrap();
        let tools = Arc::new(tools);
        let catalog = Catalog::new(Arc::clone(&tools), Arc::new(skills));
        (tool, catalog, ToolRunner::with_defaults(tools))
    }

    fn environment() -> Environment {
        Environment::from_spec(EnvironmentSpec {
            id: "staging".to_string(),
            display_name: None,
            namespace_patterns: vec!["*".to_string()],
            connection_ref: "ctx-staging".to_string(),
            description: None,
            default_namespace: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_skill_fixed_params_reach_tool() {
        let (tool, catalog, runner) = setup(Ok(json!("OOMKilled")));
        let step = Step::new(2, "get_previous_logs")
            .with_param("namespace", "payments")
            .with_param("pod_name", "payments-7f9");
        let action = catalog.resolve(&step.action).unwrap();

        let output = StepInvoker::new(runner)
            .invoke(&step, &action, &environment())
            .await
            .unwrap();

        assert_eq!(output, json!("OOMKilled"));
        let seen = tool.seen.lock().unwrap();
        assert_eq!(seen[0]["previous"], json!(true));
        assert_eq!(seen[0]["pod_name"], json!("payments-7f9"));
    }

    #[tokio::test]
    async fn test_templated_command_reaches_tool() {
        let (tool, catalog, runner) = setup_for("exec_in_pod", Ok(json!("Filesystem Size")));
        let step = Step::new(1, "check_filesystem")
            .with_param("namespace", "payments")
            .with_param("pod_name", "payments-7f9")
            .with_param("path", "/var/lib/data");
        let action = catalog.resolve(&step.action).unwrap();

        StepInvoker::new(runner)
            .invoke(&step, &action, &environment())
            .await
            .unwrap();

        let seen = tool.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            json!({
                "namespace": "payments",
                "pod_name": "payments-7f9",
                "command": "df -h /var/lib/data && ls -la /var/lib/data"
            })
        );
    }

    #[tokio::test]
    async fn test_errors_are_classified() {
        let (_, catalog, runner) = setup(Err(kubediag_tools::Error::Unavailable(
            "apiserver throttled".to_string(),
        )));
        let step = Step::new(1, "get_pod_logs").with_param("namespace", "payments");
        let action = catalog.resolve(&step.action).unwrap();
        let err = StepInvoker::new(runner.clone())
            .invoke(&step, &action, &environment())
            .await
            .unwrap_err();
        assert!(err.is_transient());

        // describe_pod has no binding
        let step = Step::new(3, "describe_pod").with_param("namespace", "payments");
        let action = catalog.resolve(&step.action).unwrap();
        let err = StepInvoker::new(runner)
            .invoke(&step, &action, &environment())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_invocation_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLogger::at_path(dir.path().join("audit.jsonl")));
        let (_, catalog, runner) = setup(Ok(json!("ready")));
        let step = Step::new(1, "get_pod_logs").with_param("namespace", "payments");
        let action = catalog.resolve(&step.action).unwrap();

        let invoker = StepInvoker::new(runner)
            .with_audit(Arc::clone(&audit))
            .with_session(Uuid::nil());
        invoker.invoke(&step, &action, &environment()).await.unwrap();
        invoker
            .record_denial(
                &step,
                &environment(),
                &SafetyViolation::BlockedNamespace("kube-system".to_string()),
            )
            .await;

        let records = audit.recent(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            &records[0],
            AuditRecord::ToolInvocation { session_id: Some(id), success: true, .. } if id.is_nil()
        ));
        assert!(matches!(
            &records[1],
            AuditRecord::SecurityEvent { event_type, .. } if event_type == "namespace_blocked"
        ));
    }
}
