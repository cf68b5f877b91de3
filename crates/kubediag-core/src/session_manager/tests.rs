use super::*;
use crate::audit::{AuditConfig, AuditRecord};
use crate::confirmation::ConfirmationStatus;
use crate::error::UserFriendlyError;
use crate::executor::StepStatus;
use crate::catalog::ActionSummary;
use crate::plan::Step;
use crate::planner::{PlanningContext, PriorRound, RuleBasedPlanner};
use crate::test_support::{self, ScriptedTool, DESCRIBE_OOM, LOGS_OK};
use async_trait::async_trait;
use tokio::sync::broadcast;

const ENVIRONMENTS: &str = r#"
- id: staging
  connection_ref: ctx-staging
  namespace_patterns: ["payments", "batch-*"]
  default_namespace: payments
"#;

/// Always proposes the same plan
struct FixedPlanner(Plan);

#[async_trait]
impl PlanningCollaborator for FixedPlanner {
    async fn propose_plan(
        &self,
        _problem: &str,
        _context: &PlanningContext,
        _available: &[ActionSummary],
    ) -> Result<Plan> {
        Ok(self.0.clone())
    }

    async fn replan(&self, _problem: &str, _prior: &PriorRound) -> Result<Plan> {
        Err(Error::Planning("no alternatives".to_string()))
    }
}

fn restart_plan() -> Plan {
    Plan::new("payments-7f9 is wedged", "crash loop").with_step(
        Step::new(1, "restart_workload_pod")
            .with_param("namespace", "payments")
            .with_param("pod_name", "payments-7f9"),
    )
}

fn quiet_config() -> EngineConfig {
    EngineConfig {
        audit: AuditConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn manager(
    config: EngineConfig,
    planner: Arc<dyn PlanningCollaborator>,
    bindings: &[(&str, Arc<ScriptedTool>)],
) -> SessionManager {
    let (catalog, _) = test_support::catalog_with(bindings);
    let environments = Arc::new(EnvironmentRegistry::from_yaml(ENVIRONMENTS).unwrap());
    SessionManager::new(config, environments, catalog, planner).unwrap()
}

async fn next_confirmation(rx: &mut broadcast::Receiver<DiagnosisEvent>) -> (Uuid, StepId) {
    loop {
        if let DiagnosisEvent::ConfirmationRequired {
            session_id,
            step_id,
            ..
        } = rx.recv().await.unwrap()
        {
            return (session_id, step_id);
        }
    }
}

#[tokio::test]
async fn test_unknown_environment_is_fatal() {
    let manager = manager(
        quiet_config(),
        Arc::new(RuleBasedPlanner::new().unwrap()),
        &[],
    );
    let err = manager
        .start_diagnosis("prod-eu", "pod payments-7f9 in CrashLoopBackOff")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EnvironmentNotFound(ref id) if id == "prod-eu"));
    assert!(manager.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_crashloop_session_end_to_end() {
    let manager = manager(
        quiet_config(),
        Arc::new(RuleBasedPlanner::new().unwrap()),
        &[
            ("get_pod_logs", ScriptedTool::replying(LOGS_OK)),
            ("describe_pod", ScriptedTool::replying(DESCRIBE_OOM)),
        ],
    );
    let mut rx = manager.events().subscribe();

    let id = manager
        .start_diagnosis("staging", "pod payments-7f9 in CrashLoopBackOff")
        .await
        .unwrap();
    let report = manager.wait_for_report(id).await.unwrap();

    assert_eq!(report.hypothesis_status, HypothesisStatus::Confirmed);
    assert_eq!(report.matched_signature.as_deref(), Some("oom_killed"));

    let state = manager.get_status(id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.plan.map(|p| p.steps.len()), Some(3));
    assert_eq!(state.step_results.len(), 3);
    assert!(state
        .step_results
        .iter()
        .all(|r| r.status == StepStatus::Succeeded));
    assert!(state.pending_confirmations.is_empty());
    assert!(matches!(
        manager.get_report(id).await.unwrap(),
        ReportState::Ready(ref r) if r.hypothesis_status == HypothesisStatus::Confirmed
    ));

    let first = rx.recv().await.unwrap();
    assert!(matches!(first, DiagnosisEvent::SessionStarted { session_id, .. } if session_id == id));
    loop {
        if let DiagnosisEvent::SessionCompleted {
            hypothesis_status, ..
        } = rx.recv().await.unwrap()
        {
            assert_eq!(hypothesis_status, HypothesisStatus::Confirmed);
            break;
        }
    }

    let sessions = manager.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].environment, "staging");
    assert_eq!(sessions[0].hypothesis_status, Some(HypothesisStatus::Confirmed));
}

#[tokio::test]
async fn test_operator_approves_blocked_step() {
    let restart = ScriptedTool::replying("pod \"payments-7f9\" deleted");
    let manager = manager(
        quiet_config(),
        Arc::new(FixedPlanner(restart_plan())),
        &[("restart_pod", restart.clone())],
    );
    let mut rx = manager.events().subscribe();

    let id = manager.start_diagnosis("staging", "payments-7f9 is wedged").await.unwrap();
    let (session_id, step_id) = next_confirmation(&mut rx).await;
    assert_eq!((session_id, step_id), (id, 1));

    assert_eq!(manager.get_report(id).await.unwrap(), ReportState::Pending);
    let pending = manager.get_status(id).await.unwrap().pending_confirmations;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].tool, "restart_pod");
    assert_eq!(restart.calls(), 0);

    manager
        .resolve_confirmation(id, 1, Decision::Approve)
        .await
        .unwrap();
    let report = manager.wait_for_report(id).await.unwrap();

    assert_eq!(restart.calls(), 1);
    assert_eq!(report.evidence[0].status, StepStatus::Succeeded);

    // a settled request cannot be resolved twice
    let err = manager
        .resolve_confirmation(id, 1, Decision::Deny)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ConfirmationAlreadyResolved {
            step_id: 1,
            status: ConfirmationStatus::Approved
        }
    ));
    assert!(err.user_message().contains("already settled"));
}

#[tokio::test]
async fn test_cancel_skips_blocked_step() {
    let restart = ScriptedTool::replying("deleted");
    let manager = manager(
        quiet_config(),
        Arc::new(FixedPlanner(restart_plan())),
        &[("restart_pod", restart.clone())],
    );
    let mut rx = manager.events().subscribe();

    let id = manager.start_diagnosis("staging", "payments-7f9 is wedged").await.unwrap();
    next_confirmation(&mut rx).await;
    manager.cancel(id).await.unwrap();
    let report = manager.wait_for_report(id).await.unwrap();

    assert_eq!(restart.calls(), 0);
    assert_eq!(report.evidence[0].status, StepStatus::Skipped);
    let state = manager.get_status(id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Cancelled);
    assert!(state.pending_confirmations.is_empty());

    loop {
        match rx.recv().await.unwrap() {
            DiagnosisEvent::SessionCancelled { session_id } => {
                assert_eq!(session_id, id);
                break;
            }
            DiagnosisEvent::SessionCompleted { .. } => panic!("cancelled session reported completion"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_unknown_session() {
    let manager = manager(
        quiet_config(),
        Arc::new(RuleBasedPlanner::new().unwrap()),
        &[],
    );
    let id = Uuid::new_v4();

    assert!(matches!(
        manager.get_status(id).await,
        Err(Error::SessionNotFound(missing)) if missing == id
    ));
    assert!(manager.get_report(id).await.is_err());
    assert!(manager.cancel(id).await.is_err());
    assert!(manager.delete_session(id).await.is_err());
    assert!(manager
        .resolve_confirmation(id, 1, Decision::Approve)
        .await
        .is_err());
}

#[tokio::test]
async fn test_delete_running_session_cancels_it() {
    let restart = ScriptedTool::replying("deleted");
    let manager = manager(
        quiet_config(),
        Arc::new(FixedPlanner(restart_plan())),
        &[("restart_pod", restart.clone())],
    );
    let mut rx = manager.events().subscribe();

    let id = manager.start_diagnosis("staging", "payments-7f9 is wedged").await.unwrap();
    next_confirmation(&mut rx).await;
    manager.delete_session(id).await.unwrap();

    assert!(matches!(
        manager.get_status(id).await,
        Err(Error::SessionNotFound(missing)) if missing == id
    ));
    assert!(manager.list_sessions().await.is_empty());
    assert!(matches!(
        manager.delete_session(id).await,
        Err(Error::SessionNotFound(_))
    ));

    loop {
        if let DiagnosisEvent::SessionCancelled { session_id } = rx.recv().await.unwrap() {
            assert_eq!(session_id, id);
            break;
        }
    }
    assert_eq!(restart.calls(), 0);
}

#[tokio::test]
async fn test_finished_sessions_evicted_oldest_first() {
    let mut config = quiet_config();
    config.sessions.max_retained = 1;
    let manager = manager(
        config,
        Arc::new(FixedPlanner(restart_plan())),
        &[("restart_pod", ScriptedTool::replying("deleted"))],
    );
    let mut rx = manager.events().subscribe();

    let first = manager.start_diagnosis("staging", "payments-7f9 is wedged").await.unwrap();
    assert_eq!(next_confirmation(&mut rx).await.0, first);
    let second = manager.start_diagnosis("staging", "payments-7f9 is wedged").await.unwrap();
    assert_eq!(next_confirmation(&mut rx).await.0, second);

    // both still running, nothing to evict
    assert_eq!(manager.list_sessions().await.len(), 2);

    manager
        .resolve_confirmation(first, 1, Decision::Approve)
        .await
        .unwrap();
    manager.wait_for_report(first).await.unwrap();
    let third = manager.start_diagnosis("staging", "payments-7f9 is wedged").await.unwrap();

    assert!(matches!(
        manager.get_status(first).await,
        Err(Error::SessionNotFound(_))
    ));
    let remaining: Vec<Uuid> = manager.list_sessions().await.iter().map(|s| s.id).collect();
    assert_eq!(remaining, vec![second, third]);

    manager.delete_session(second).await.unwrap();
    manager.delete_session(third).await.unwrap();
    assert!(manager.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut config = quiet_config();
    config.executor.max_in_flight = 0;
    let (catalog, _) = test_support::catalog_with(&[]);
    let result = SessionManager::new(
        config,
        Arc::new(EnvironmentRegistry::default()),
        catalog,
        Arc::new(RuleBasedPlanner::new().unwrap()),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_invocations_and_denials_audited() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quiet_config();
    config.audit = AuditConfig {
        enabled: true,
        path: dir.path().join("audit.jsonl"),
    };
    let plan = Plan::new("pods are unhappy", "").with_step(
        Step::new(1, "list_pods").with_param("namespace", "kube-system"),
    );
    let manager = manager(
        config,
        Arc::new(FixedPlanner(plan)),
        &[("list_pods", ScriptedTool::replying("coredns-1 Running"))],
    );

    let id = manager.start_diagnosis("staging", "pods are unhappy").await.unwrap();
    manager.wait_for_report(id).await.unwrap();

    let records = manager.audit().unwrap().recent(10).await.unwrap();
    assert!(records.iter().any(|r| matches!(
        r,
        AuditRecord::SecurityEvent { event_type, session_id, .. }
            if event_type == "namespace_blocked" && *session_id == Some(id)
    )));
}
