use super::*;
use crate::catalog::ActionSummary;
use crate::confirmation::{ConfirmationManager, Decision};
use crate::error::{Error, Result};
use crate::executor::StepStatus;
use crate::plan::Step;
use crate::test_support::{self, ScriptedTool, DESCRIBE_OOM, LOGS_OK};
use async_trait::async_trait;
use kubediag_tools::ToolRunner;
use mockall::mock;

mock! {
    pub Planner {}

    #[async_trait]
    impl PlanningCollaborator for Planner {
        async fn propose_plan(
            &self,
            problem: &str,
            context: &PlanningContext,
            available: &[ActionSummary],
        ) -> Result<Plan>;

        async fn replan(&self, problem: &str, prior: &PriorRound) -> Result<Plan>;
    }
}

const PROBLEM: &str = "pod payments-7f9 in CrashLoopBackOff";

fn crashloop_plan() -> Plan {
    let pod = |id: u32, action: &str| {
        Step::new(id, action)
            .with_param("namespace", "payments")
            .with_param("pod_name", "payments-7f9")
    };
    Plan::new(PROBLEM, "OOM kill")
        .with_step(pod(1, "get_pod_logs"))
        .with_step(pod(2, "get_previous_logs").depends_on([1]))
        .with_step(pod(3, "describe_pod").depends_on([1]))
}

fn events_plan(namespace: &str) -> Plan {
    Plan::new(PROBLEM, "OOM kill").with_step(
        Step::new(1, "namespace_events")
            .with_param("namespace", namespace)
            .with_reason("look for warning events"),
    )
}

fn engine(planner: MockPlanner, catalog: Arc<Catalog>, runner: ToolRunner) -> DiagnosisEngine {
    DiagnosisEngine::new(
        catalog,
        Arc::new(planner),
        test_support::executor(runner, Arc::new(ConfirmationManager::default()), 3),
        Arc::new(Synthesizer::new(&Default::default()).unwrap()),
        ReplanConfig::default(),
    )
}

fn crashloop_tools() -> (Arc<Catalog>, ToolRunner) {
    test_support::catalog_with(&[
        ("get_pod_logs", ScriptedTool::replying(LOGS_OK)),
        ("describe_pod", ScriptedTool::replying(DESCRIBE_OOM)),
    ])
}

#[tokio::test]
async fn test_confirmed_without_replanning() {
    let mut planner = MockPlanner::new();
    planner
        .expect_propose_plan()
        .withf(|problem, context, available| {
            problem == PROBLEM
                && context.default_namespace.as_deref() == Some("payments")
                && available.iter().any(|a| a.action == "get_previous_logs")
        })
        .times(1)
        .returning(|_, _, _| Ok(crashloop_plan()));
    planner.expect_replan().never();
    let (catalog, runner) = crashloop_tools();

    let outcome = engine(planner, catalog, runner)
        .diagnose(PROBLEM, test_support::environment(&["payments"]), None)
        .await;

    assert_eq!(outcome.report.hypothesis_status, HypothesisStatus::Confirmed);
    assert_eq!(outcome.plans_proposed, 1);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.report.evidence.len(), 3);
}

#[tokio::test]
async fn test_rejected_plan_consumes_a_round() {
    let mut planner = MockPlanner::new();
    planner.expect_propose_plan().times(1).returning(|_, _, _| {
        Ok(Plan::new(PROBLEM, "OOM kill").with_step(Step::new(1, "drain_node")))
    });
    planner
        .expect_replan()
        .withf(|_, prior| {
            prior.round == 0
                && prior.results.is_empty()
                && prior.rejection.as_deref().is_some_and(|r| r.contains("drain_node"))
        })
        .times(1)
        .returning(|_, _| Ok(crashloop_plan()));
    let (catalog, runner) = crashloop_tools();
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let session_id = Uuid::new_v4();
    let (plan_tx, plan_rx) = watch::channel(None);

    let outcome = engine(planner, catalog, runner)
        .with_events(bus, session_id)
        .with_plan_channel(plan_tx)
        .diagnose(PROBLEM, test_support::environment(&["payments"]), None)
        .await;

    assert_eq!(outcome.report.hypothesis_status, HypothesisStatus::Confirmed);
    assert_eq!(outcome.plans_proposed, 2);
    assert_eq!(plan_rx.borrow().as_ref().map(|p| p.steps.len()), Some(3));

    let mut plan_events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            DiagnosisEvent::PlanRejected { round, .. } => plan_events.push(("rejected", round)),
            DiagnosisEvent::ReplanRequested { round, .. } => plan_events.push(("replan", round)),
            DiagnosisEvent::PlanAccepted { round, steps, .. } => {
                assert_eq!(steps, 3);
                plan_events.push(("accepted", round));
            }
            _ => {}
        }
    }
    assert_eq!(
        plan_events,
        vec![("rejected", 0), ("replan", 1), ("accepted", 1)]
    );
}

#[tokio::test]
async fn test_safety_denial_routes_to_replan() {
    let mut planner = MockPlanner::new();
    planner
        .expect_propose_plan()
        .returning(|_, _, _| Ok(events_plan("kube-system")));
    planner
        .expect_replan()
        .withf(|_, prior| {
            prior.results.len() == 1 && prior.results[0].status == StepStatus::Denied
        })
        .times(1)
        .returning(|_, _| Ok(events_plan("payments")));
    let events = ScriptedTool::replying("Warning  OOMKilled  pod/payments-7f9");
    let (catalog, runner) = test_support::catalog_with(&[("get_events", events.clone())]);

    let outcome = engine(planner, catalog, runner)
        .diagnose(PROBLEM, test_support::environment(&["*"]), None)
        .await;

    assert_eq!(outcome.report.hypothesis_status, HypothesisStatus::Confirmed);
    assert_eq!(outcome.plans_proposed, 2);
    // the denied call never reached the tool
    assert_eq!(events.calls(), 1);
}

#[tokio::test]
async fn test_replan_ceiling_ends_inconclusive() {
    let mut planner = MockPlanner::new();
    planner
        .expect_propose_plan()
        .returning(|_, _, _| Ok(events_plan("payments")));
    planner
        .expect_replan()
        .times(2)
        .returning(|_, _| Ok(events_plan("payments")));
    let events = ScriptedTool::failing(kubediag_tools::Error::PermissionDenied(
        "events is forbidden".to_string(),
    ));
    let (catalog, runner) = test_support::catalog_with(&[("get_events", events.clone())]);

    let outcome = engine(planner, catalog, runner)
        .diagnose(PROBLEM, test_support::environment(&["payments"]), None)
        .await;

    let report = &outcome.report;
    assert_eq!(report.hypothesis_status, HypothesisStatus::Inconclusive);
    assert_eq!(outcome.plans_proposed, 3);
    assert_eq!(events.calls(), 3);
    let rounds: Vec<u32> = report.evidence.iter().map(|r| r.round).collect();
    assert_eq!(rounds, vec![0, 1, 2]);
    assert!(report.evidence.iter().all(|r| r.status == StepStatus::Failed));
    assert!(report.narrative.contains("Error (step 1, permanent)"));
    for round in 0..3 {
        assert!(report
            .narrative
            .contains(&format!("Round {round} / Step 1 [namespace_events] failed")));
    }
    assert_eq!(report.narrative.matches("Reason: look for warning events").count(), 3);
    assert!(report
        .narrative
        .ends_with("Note: replan limit of 2 rounds reached\n"));
}

#[tokio::test]
async fn test_inconclusive_without_failures_does_not_replan() {
    let mut planner = MockPlanner::new();
    planner
        .expect_propose_plan()
        .returning(|_, _, _| Ok(events_plan("payments")));
    planner.expect_replan().never();
    let (catalog, runner) =
        test_support::catalog_with(&[("get_events", ScriptedTool::replying("No resources found"))]);

    let outcome = engine(planner, catalog, runner)
        .diagnose(PROBLEM, test_support::environment(&["payments"]), None)
        .await;

    assert_eq!(outcome.report.hypothesis_status, HypothesisStatus::Inconclusive);
    assert_eq!(outcome.plans_proposed, 1);
}

#[tokio::test]
async fn test_planner_failure_is_inconclusive() {
    let mut planner = MockPlanner::new();
    planner
        .expect_propose_plan()
        .returning(|_, _, _| Err(Error::Planning("model unavailable".to_string())));
    let (catalog, runner) = crashloop_tools();

    let outcome = engine(planner, catalog, runner)
        .diagnose(
            PROBLEM,
            test_support::environment(&["payments"]),
            Some("memory leak".to_string()),
        )
        .await;

    let report = &outcome.report;
    assert_eq!(report.hypothesis_status, HypothesisStatus::Inconclusive);
    assert_eq!(outcome.plans_proposed, 0);
    assert!(report.evidence.is_empty());
    assert_eq!(report.initial_hypothesis, "memory leak");
    assert!(report.narrative.contains("planning failed in round 0"));
}

#[tokio::test]
async fn test_cancelled_session_does_not_replan() {
    let mut planner = MockPlanner::new();
    planner
        .expect_propose_plan()
        .returning(|_, _, _| Ok(events_plan("payments")));
    planner.expect_replan().never();
    let (catalog, runner) = test_support::catalog_with(&[(
        "get_events",
        ScriptedTool::replying("No resources found"),
    )]);
    let engine = engine(planner, catalog, runner);
    engine.executor.cancellation().cancel();

    let outcome = engine
        .diagnose(PROBLEM, test_support::environment(&["payments"]), None)
        .await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.report.evidence[0].status, StepStatus::Skipped);
    assert!(outcome.report.narrative.contains("session cancelled"));
}

#[tokio::test]
async fn test_settled_confirmations_cleared_before_replan() {
    let mut planner = MockPlanner::new();
    planner.expect_propose_plan().returning(|_, _, _| {
        Ok(Plan::new(PROBLEM, "OOM kill")
            .with_step(
                Step::new(1, "restart_workload_pod")
                    .with_param("namespace", "payments")
                    .with_param("pod_name", "payments-7f9"),
            )
            .with_step(Step::new(2, "namespace_events").with_param("namespace", "payments")))
    });
    planner
        .expect_replan()
        .times(1)
        .returning(|_, _| Err(Error::Planning("no alternatives".to_string())));
    let (catalog, runner) = test_support::catalog_with(&[
        ("restart_pod", ScriptedTool::replying("pod deleted")),
        (
            "get_events",
            ScriptedTool::failing(kubediag_tools::Error::PermissionDenied(
                "events is forbidden".to_string(),
            )),
        ),
    ]);
    let confirmations = Arc::new(ConfirmationManager::default());
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let session_id = Uuid::new_v4();
    let executor = test_support::executor(runner, Arc::clone(&confirmations), 3)
        .with_events(bus.clone(), session_id);
    let engine = DiagnosisEngine::new(
        catalog,
        Arc::new(planner),
        executor,
        Arc::new(Synthesizer::new(&Default::default()).unwrap()),
        ReplanConfig::default(),
    );

    let operator = {
        let confirmations = Arc::clone(&confirmations);
        tokio::spawn(async move {
            loop {
                if let DiagnosisEvent::ConfirmationRequired {
                    step_id,
                    request_id,
                    ..
                } = rx.recv().await.unwrap()
                {
                    confirmations.resolve(step_id, Decision::Approve).await.unwrap();
                    return request_id;
                }
            }
        })
    };

    let outcome = engine
        .diagnose(PROBLEM, test_support::environment(&["payments"]), None)
        .await;
    let request_id = operator.await.unwrap();

    assert_eq!(outcome.plans_proposed, 1);
    assert_eq!(outcome.report.evidence[0].status, StepStatus::Succeeded);
    assert!(confirmations.get(request_id).await.is_none());
}
