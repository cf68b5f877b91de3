//! Dependency-Graph Executor
//!
//! A single coordinator walks a [`ValidatedPlan`] and owns the step result
//! table. Step dispatches run as independent tokio tasks, at most
//! `max_in_flight` at a time. Confirmation waits run in their own tasks and
//! do not hold a dispatch slot.
//!
//! Per-step state machine:
//!
//! ```text
//! pending -> ready -> running -> succeeded | failed
//!            ready -> blocked -> ready | denied | skipped
//!            ready -> denied
//! pending -> skipped   (a dependency failed, was denied or skipped)
//! ```
//!
//! Every dispatched step has passed the [`SafetyGate`].

use crate::confirmation::{ConfirmationManager, ConfirmationOutcome};
use crate::environment::Environment;
use crate::event_bus::{DiagnosisEvent, EventBus};
use crate::invoker::{StepInvoker, ToolInvocationError};
use crate::plan::{Step, StepId, ValidatedPlan};
use crate::retry::{retry_with_backoff, Attempted, RetryConfig, RetryError};
use crate::safety::{Authorization, SafetyGate};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Executor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Maximum concurrently running steps
    pub max_in_flight: usize,
    /// Retry policy for transient tool failures
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 3,
            retry: RetryConfig::default(),
        }
    }
}

/// Status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting on dependencies
    Pending,
    /// Dependencies succeeded and the gate passed (or an operator approved)
    Ready,
    /// Awaiting an operator decision
    Blocked,
    /// Tool call in progress
    Running,
    /// Tool call succeeded
    Succeeded,
    /// Tool call failed
    Failed,
    /// Not run: a dependency did not succeed, or the session was cancelled
    Skipped,
    /// Refused by the safety gate or the operator
    Denied,
}

impl StepStatus {
    /// Whether the status is final
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Denied
        )
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Denied => "denied",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step ended without succeeding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Safety gate denied the step
    SafetyViolation,
    /// Operator denied the step
    ConfirmationDenied,
    /// Nobody answered the confirmation in time
    ConfirmationTimeout,
    /// Transient failure that exhausted the attempt ceiling
    Transient,
    /// Permanent tool failure
    Permanent,
    /// A dependency did not succeed
    DependencyFailed,
    /// Session cancelled before the step ran
    Cancelled,
}

impl StepErrorKind {
    /// Whether this failure may be fixed by a different plan
    #[must_use]
    pub fn is_routable(&self) -> bool {
        matches!(
            self,
            Self::Permanent | Self::Transient | Self::SafetyViolation
        )
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SafetyViolation => "safety_violation",
            Self::ConfirmationDenied => "confirmation_denied",
            Self::ConfirmationTimeout => "confirmation_timeout",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::DependencyFailed => "dependency_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Terminal error of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Classification
    pub kind: StepErrorKind,
    /// Detail
    pub message: String,
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Step lifecycle timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTimestamps {
    /// When the result entry was created
    pub created_at: DateTime<Utc>,
    /// When the first attempt started
    pub started_at: Option<DateTime<Utc>>,
    /// When the step became terminal
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of one step in one plan execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step
    pub step_id: StepId,
    /// Planning round of the plan the step belongs to, starting at 0
    #[serde(default)]
    pub round: u32,
    /// Action as written in the plan
    pub action: String,
    /// Current status
    pub status: StepStatus,
    /// Tool output on success
    pub output: Option<Value>,
    /// Error when failed, denied or skipped
    pub error: Option<StepError>,
    /// Tool calls made
    pub attempt_count: u32,
    /// Timestamps
    pub timestamps: StepTimestamps,
}

impl StepResult {
    /// Fresh pending result for a step
    #[must_use]
    pub fn pending(step: &Step) -> Self {
        Self {
            step_id: step.step_id,
            round: 0,
            action: step.action.clone(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            attempt_count: 0,
            timestamps: StepTimestamps {
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
        }
    }

    /// Whether the step ended with a routable failure
    #[must_use]
    pub fn is_routable_failure(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.kind.is_routable())
    }
}

/// All step results of one plan execution, in topological order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    /// Results
    pub results: Vec<StepResult>,
    /// Whether the run was cancelled
    pub cancelled: bool,
}

impl ExecutionOutcome {
    /// Look up one result
    #[must_use]
    pub fn get(&self, step_id: StepId) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }

    /// Whether any step failed for a reason a new plan could avoid
    #[must_use]
    pub fn has_routable_failure(&self) -> bool {
        self.results.iter().any(StepResult::is_routable_failure)
    }

    /// Count results with a given status
    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

type StepRun = Result<Attempted<Value>, RetryError<ToolInvocationError>>;
type Running = FuturesUnordered<BoxFuture<'static, (StepId, Result<StepRun, tokio::task::JoinError>)>>;
type Waiting = FuturesUnordered<BoxFuture<'static, (StepId, ConfirmationOutcome)>>;

enum Wake {
    Finished(StepId, Result<StepRun, tokio::task::JoinError>),
    Confirmed(StepId, ConfirmationOutcome),
    Cancelled,
}

/// Runs validated plans
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    gate: Arc<SafetyGate>,
    invoker: StepInvoker,
    confirmations: Arc<ConfirmationManager>,
    config: ExecutorConfig,
    events: Option<EventBus>,
    session_id: Uuid,
    cancel: CancellationToken,
    results_tx: Option<watch::Sender<Vec<StepResult>>>,
}

impl PlanExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(
        gate: Arc<SafetyGate>,
        invoker: StepInvoker,
        confirmations: Arc<ConfirmationManager>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            gate,
            invoker,
            confirmations,
            config,
            events: None,
            session_id: Uuid::nil(),
            cancel: CancellationToken::new(),
            results_tx: None,
        }
    }

    /// Publish step transitions on an event bus
    #[must_use]
    pub fn with_events(mut self, events: EventBus, session_id: Uuid) -> Self {
        self.events = Some(events);
        self.session_id = session_id;
        self
    }

    /// Observe this token for cancellation
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish result table snapshots on a watch channel
    #[must_use]
    pub fn with_results_channel(mut self, tx: watch::Sender<Vec<StepResult>>) -> Self {
        self.results_tx = Some(tx);
        self
    }

    /// Cancellation token in use
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Confirmation manager steps block on
    #[must_use]
    pub fn confirmations(&self) -> &Arc<ConfirmationManager> {
        &self.confirmations
    }

    /// Execute a validated plan until every step is terminal
    pub async fn run(&self, plan: &ValidatedPlan, environment: Arc<Environment>) -> ExecutionOutcome {
        self.run_round(plan, environment, 0).await
    }

    /// Execute the plan of a planning round; results carry the round
    pub async fn run_round(
        &self,
        plan: &ValidatedPlan,
        environment: Arc<Environment>,
        round: u32,
    ) -> ExecutionOutcome {
        info!(
            session_id = %self.session_id,
            environment = %environment.name,
            round,
            steps = plan.len(),
            "Executing plan"
        );

        let mut coordinator = Coordinator {
            exec: self,
            plan,
            environment,
            table: plan
                .steps_in_order()
                .map(|s| {
                    let mut result = StepResult::pending(s);
                    result.round = round;
                    (s.step_id, result)
                })
                .collect(),
            ready: VecDeque::new(),
            cancelled: false,
        };
        let mut running: Running = FuturesUnordered::new();
        let mut waiting: Waiting = FuturesUnordered::new();
        let max_in_flight = self.config.max_in_flight.max(1);
        coordinator.snapshot();

        loop {
            if !coordinator.cancelled && self.cancel.is_cancelled() {
                coordinator.cancel_remaining().await;
            }
            if !coordinator.cancelled {
                coordinator.promote(&mut waiting).await;
                while running.len() < max_in_flight {
                    let Some(step_id) = coordinator.ready.pop_front() else {
                        break;
                    };
                    coordinator.dispatch(step_id, &mut running);
                }
            }
            coordinator.snapshot();

            if running.is_empty() && waiting.is_empty() {
                break;
            }

            let wake = tokio::select! {
                Some((id, joined)) = running.next(), if !running.is_empty() => Wake::Finished(id, joined),
                Some((id, outcome)) = waiting.next(), if !waiting.is_empty() => Wake::Confirmed(id, outcome),
                _ = self.cancel.cancelled(), if !coordinator.cancelled => Wake::Cancelled,
                else => break,
            };

            match wake {
                Wake::Finished(id, joined) => coordinator.finish_run(id, joined),
                Wake::Confirmed(id, outcome) => coordinator.apply_confirmation(id, outcome).await,
                Wake::Cancelled => coordinator.cancel_remaining().await,
            }
        }

        coordinator.snapshot();
        let outcome = ExecutionOutcome {
            results: coordinator.ordered_results(),
            cancelled: coordinator.cancelled,
        };
        info!(
            session_id = %self.session_id,
            succeeded = outcome.count(StepStatus::Succeeded),
            failed = outcome.count(StepStatus::Failed),
            denied = outcome.count(StepStatus::Denied),
            skipped = outcome.count(StepStatus::Skipped),
            "Plan execution finished"
        );
        outcome
    }
}

struct Coordinator<'a> {
    exec: &'a PlanExecutor,
    plan: &'a ValidatedPlan,
    environment: Arc<Environment>,
    table: HashMap<StepId, StepResult>,
    ready: VecDeque<StepId>,
    cancelled: bool,
}

impl Coordinator<'_> {
    fn status(&self, step_id: StepId) -> Option<StepStatus> {
        self.table.get(&step_id).map(|r| r.status)
    }

    fn transition(&mut self, step_id: StepId, status: StepStatus) {
        let Some(result) = self.table.get_mut(&step_id) else {
            return;
        };
        result.status = status;
        match status {
            StepStatus::Running => result.timestamps.started_at = Some(Utc::now()),
            s if s.is_terminal() => result.timestamps.finished_at = Some(Utc::now()),
            _ => {}
        }
        debug!(step_id, status = %status, "Step transition");
        if let Some(events) = &self.exec.events {
            events.publish(DiagnosisEvent::StepStatusChanged {
                session_id: self.exec.session_id,
                step_id,
                status,
            });
        }
    }

    fn fail(&mut self, step_id: StepId, status: StepStatus, kind: StepErrorKind, message: String) {
        if let Some(result) = self.table.get_mut(&step_id) {
            result.error = Some(StepError { kind, message });
        }
        self.transition(step_id, status);
    }

    /// Move pending steps forward, in topological order so skips cascade in
    /// one pass.
    async fn promote(&mut self, waiting: &mut Waiting) {
        let plan = self.plan;
        for step in plan.steps_in_order() {
            let step_id = step.step_id;
            if self.status(step_id) != Some(StepStatus::Pending) {
                continue;
            }

            let mut blocked_by = None;
            let mut all_succeeded = true;
            for dep in &step.depends_on {
                match self.status(*dep) {
                    Some(StepStatus::Succeeded) => {}
                    Some(s @ (StepStatus::Failed | StepStatus::Denied | StepStatus::Skipped)) => {
                        blocked_by = Some((*dep, s));
                        break;
                    }
                    _ => all_succeeded = false,
                }
            }

            if let Some((dep, status)) = blocked_by {
                self.fail(
                    step_id,
                    StepStatus::Skipped,
                    StepErrorKind::DependencyFailed,
                    format!("dependency step {} {}", dep, status),
                );
                continue;
            }
            if !all_succeeded {
                continue;
            }

            self.transition(step_id, StepStatus::Ready);
            self.authorize(step, waiting).await;
        }
    }

    async fn authorize(&mut self, step: &Step, waiting: &mut Waiting) {
        let step_id = step.step_id;
        let plan = self.plan;
        let Some(action) = plan.action(step_id) else {
            self.fail(
                step_id,
                StepStatus::Denied,
                StepErrorKind::SafetyViolation,
                format!("unknown action '{}'", step.action),
            );
            return;
        };

        match self
            .exec
            .gate
            .authorize_resolved(step, action, &self.environment)
        {
            Authorization::Authorized => self.ready.push_back(step_id),
            Authorization::Denied(violation) => {
                warn!(step_id, action = %step.action, %violation, "Step denied by safety gate");
                self.exec
                    .invoker
                    .record_denial(step, &self.environment, &violation)
                    .await;
                self.fail(
                    step_id,
                    StepStatus::Denied,
                    StepErrorKind::SafetyViolation,
                    violation.to_string(),
                );
            }
            Authorization::NeedsConfirmation { rationale } => {
                self.transition(step_id, StepStatus::Blocked);
                let params = action.effective_params(&step.params);
                let (request, rx) = self
                    .exec
                    .confirmations
                    .create(step_id, action.tool.name.clone(), params, rationale)
                    .await;
                if let Some(events) = &self.exec.events {
                    events.publish(DiagnosisEvent::ConfirmationRequired {
                        session_id: self.exec.session_id,
                        step_id,
                        request_id: request.id,
                        tool: request.tool.clone(),
                    });
                }
                let confirmations = Arc::clone(&self.exec.confirmations);
                waiting.push(
                    async move { (step_id, confirmations.wait(request.id, rx).await) }.boxed(),
                );
            }
        }
    }

    fn dispatch(&mut self, step_id: StepId, running: &mut Running) {
        let plan = self.plan;
        let (Some(step), Some(action)) = (plan.step(step_id), plan.action(step_id)) else {
            return;
        };
        let step = step.clone();
        let action = action.clone();
        let environment = Arc::clone(&self.environment);
        let invoker = self.exec.invoker.clone();
        let retry = self.exec.config.retry.clone();

        self.transition(step_id, StepStatus::Running);
        let handle = tokio::spawn(async move {
            retry_with_backoff(
                &retry,
                || invoker.invoke(&step, &action, &environment),
                ToolInvocationError::is_transient,
            )
            .await
        });
        running.push(async move { (step_id, handle.await) }.boxed());
    }

    fn finish_run(&mut self, step_id: StepId, joined: Result<StepRun, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(done)) => {
                if let Some(result) = self.table.get_mut(&step_id) {
                    result.output = Some(done.value);
                    result.attempt_count = done.attempts;
                }
                self.transition(step_id, StepStatus::Succeeded);
            }
            Ok(Err(e)) => {
                if let Some(result) = self.table.get_mut(&step_id) {
                    result.attempt_count = e.attempts;
                }
                let kind = if e.exhausted {
                    StepErrorKind::Transient
                } else {
                    StepErrorKind::Permanent
                };
                warn!(step_id, attempts = e.attempts, error = %e.last_error, "Step failed");
                self.fail(
                    step_id,
                    StepStatus::Failed,
                    kind,
                    e.last_error.message().to_string(),
                );
            }
            Err(join_error) => {
                self.fail(
                    step_id,
                    StepStatus::Failed,
                    StepErrorKind::Permanent,
                    format!("step task aborted: {}", join_error),
                );
            }
        }
    }

    async fn apply_confirmation(&mut self, step_id: StepId, outcome: ConfirmationOutcome) {
        if self.status(step_id) != Some(StepStatus::Blocked) {
            return;
        }
        let (label, next) = match outcome {
            ConfirmationOutcome::Approved => ("approved", None),
            ConfirmationOutcome::Denied => (
                "denied",
                Some((
                    StepStatus::Denied,
                    StepErrorKind::ConfirmationDenied,
                    "operator denied the step",
                )),
            ),
            ConfirmationOutcome::TimedOut => (
                "expired",
                Some((
                    StepStatus::Denied,
                    StepErrorKind::ConfirmationTimeout,
                    "confirmation timed out",
                )),
            ),
            ConfirmationOutcome::Cancelled => (
                "cancelled",
                Some((
                    StepStatus::Skipped,
                    StepErrorKind::Cancelled,
                    "confirmation cancelled",
                )),
            ),
        };

        let plan = self.plan;
        if let (Some(step), Some(action)) = (plan.step(step_id), plan.action(step_id)) {
            self.exec
                .invoker
                .record_confirmation(step, &action.tool.name, label)
                .await;
        }
        info!(step_id, outcome = label, "Confirmation settled");

        match next {
            None => {
                self.transition(step_id, StepStatus::Ready);
                self.ready.push_back(step_id);
            }
            Some((status, kind, message)) => {
                self.fail(step_id, status, kind, message.to_string());
            }
        }
    }

    /// Skip everything not yet dispatched. In-flight calls drain.
    async fn cancel_remaining(&mut self) {
        self.cancelled = true;
        self.ready.clear();
        let plan = self.plan;
        for step_id in plan.order() {
            if matches!(
                self.status(*step_id),
                Some(StepStatus::Pending | StepStatus::Ready | StepStatus::Blocked)
            ) {
                self.fail(
                    *step_id,
                    StepStatus::Skipped,
                    StepErrorKind::Cancelled,
                    "session cancelled".to_string(),
                );
            }
        }
        let dropped = self.exec.confirmations.cancel_pending().await;
        info!(session_id = %self.exec.session_id, dropped, "Execution cancelled");
    }

    fn ordered_results(&self) -> Vec<StepResult> {
        self.plan
            .order()
            .iter()
            .filter_map(|id| self.table.get(id).cloned())
            .collect()
    }

    fn snapshot(&self) {
        if let Some(tx) = &self.exec.results_tx {
            tx.send_replace(self.ordered_results());
        }
    }
}
