//! Session Lifecycle Manager
//!
//! Starts diagnosis sessions as background tasks and exposes their live
//! state: the plan in force, the step result table, pending confirmations
//! and, once finished, the report.
//!
//! Each session gets its own confirmation manager, cancellation token and
//! watch channels. The engine task is the only writer of those channels.

use crate::audit::AuditLogger;
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::confirmation::{ConfirmationError, ConfirmationManager, ConfirmationRequest, Decision};
use crate::engine::{DiagnosisEngine, DiagnosisOutcome};
use crate::environment::{Environment, EnvironmentRegistry};
use crate::error::{Error, Result};
use crate::event_bus::{DiagnosisEvent, EventBus};
use crate::executor::{PlanExecutor, StepResult};
use crate::invoker::StepInvoker;
use crate::plan::{Plan, StepId};
use crate::planner::PlanningCollaborator;
use crate::report::{DiagnosisReport, HypothesisStatus, Synthesizer};
use crate::safety::SafetyGate;
use chrono::{DateTime, Utc};
use kubediag_tools::ToolRunner;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Status of a managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The engine is planning or executing
    Running,
    /// A report is available
    Completed,
    /// Cancelled by the operator; a partial report is available
    Cancelled,
}

/// Summary view of a session (for list endpoints).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Session ID
    pub id: Uuid,
    /// Environment name
    pub environment: String,
    /// Problem statement
    pub problem_description: String,
    /// Current status
    pub status: SessionStatus,
    /// Verdict, once finished
    pub hypothesis_status: Option<HypothesisStatus>,
    /// When the session was started
    pub created_at: DateTime<Utc>,
}

/// Live state of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    /// Session ID
    pub id: Uuid,
    /// Current status
    pub status: SessionStatus,
    /// Plan currently in force
    pub plan: Option<Plan>,
    /// Step results of the current plan execution
    pub step_results: Vec<StepResult>,
    /// Confirmations waiting for an operator
    pub pending_confirmations: Vec<ConfirmationRequest>,
}

/// Report availability
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "report", rename_all = "lowercase")]
pub enum ReportState {
    /// Session still running
    Pending,
    /// Final report
    Ready(DiagnosisReport),
}

struct ManagedSession {
    id: Uuid,
    environment: Arc<Environment>,
    problem: String,
    created_at: DateTime<Utc>,
    plan: watch::Receiver<Option<Plan>>,
    results: watch::Receiver<Vec<StepResult>>,
    outcome: watch::Receiver<Option<DiagnosisOutcome>>,
    confirmations: Arc<ConfirmationManager>,
    cancel: CancellationToken,
}

impl ManagedSession {
    fn status(&self) -> SessionStatus {
        match &*self.outcome.borrow() {
            None => SessionStatus::Running,
            Some(outcome) if outcome.cancelled => SessionStatus::Cancelled,
            Some(_) => SessionStatus::Completed,
        }
    }

    fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            environment: self.environment.name.clone(),
            problem_description: self.problem.clone(),
            status: self.status(),
            hypothesis_status: self
                .outcome
                .borrow()
                .as_ref()
                .map(|o| o.report.hypothesis_status),
            created_at: self.created_at,
        }
    }
}

/// Session Manager - runs diagnosis sessions and answers queries about them.
pub struct SessionManager {
    environments: Arc<EnvironmentRegistry>,
    catalog: Arc<Catalog>,
    planner: Arc<dyn PlanningCollaborator>,
    runner: ToolRunner,
    gate: Arc<SafetyGate>,
    synthesizer: Arc<Synthesizer>,
    audit: Option<Arc<AuditLogger>>,
    config: EngineConfig,
    events: EventBus,
    sessions: RwLock<HashMap<Uuid, ManagedSession>>,
}

impl SessionManager {
    /// Create a session manager. Fails on an unusable configuration.
    pub fn new(
        config: EngineConfig,
        environments: Arc<EnvironmentRegistry>,
        catalog: Arc<Catalog>,
        planner: Arc<dyn PlanningCollaborator>,
    ) -> Result<Self> {
        config.validate()?;
        let gate = Arc::new(SafetyGate::new(config.safety.clone())?);
        let synthesizer = Arc::new(Synthesizer::new(&config.report)?);
        let runner = ToolRunner::new(Arc::clone(catalog.tools()), config.invoker.runner_config());
        let audit = config
            .audit
            .enabled
            .then(|| Arc::new(AuditLogger::new(config.audit.clone())));

        Ok(Self {
            environments,
            catalog,
            planner,
            runner,
            gate,
            synthesizer,
            audit,
            config,
            events: EventBus::default(),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Publish on this event bus instead of a private one
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Event bus sessions publish on
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Audit logger, when auditing is enabled
    #[must_use]
    pub fn audit(&self) -> Option<&Arc<AuditLogger>> {
        self.audit.as_ref()
    }

    /// Start a diagnosis in the named environment
    pub async fn start_diagnosis(&self, environment_id: &str, problem: &str) -> Result<Uuid> {
        self.start_diagnosis_with_hypothesis(environment_id, problem, None)
            .await
    }

    /// Start a diagnosis, passing an operator hint to the planner
    pub async fn start_diagnosis_with_hypothesis(
        &self,
        environment_id: &str,
        problem: &str,
        hypothesis_context: Option<String>,
    ) -> Result<Uuid> {
        let environment = self.environments.select(environment_id)?;
        let id = Uuid::new_v4();

        let confirmations = Arc::new(ConfirmationManager::new(
            self.config.executor.confirmation_timeout(),
        ));
        let cancel = CancellationToken::new();
        let (plan_tx, plan_rx) = watch::channel(None);
        let (results_tx, results_rx) = watch::channel(Vec::new());
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let mut invoker = StepInvoker::new(self.runner.clone()).with_session(id);
        if let Some(audit) = &self.audit {
            invoker = invoker.with_audit(Arc::clone(audit));
        }
        let executor = PlanExecutor::new(
            Arc::clone(&self.gate),
            invoker,
            Arc::clone(&confirmations),
            self.config.executor.executor_config(),
        )
        .with_events(self.events.clone(), id)
        .with_cancellation(cancel.clone())
        .with_results_channel(results_tx);
        let engine = DiagnosisEngine::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.planner),
            executor,
            Arc::clone(&self.synthesizer),
            self.config.replan,
        )
        .with_events(self.events.clone(), id)
        .with_plan_channel(plan_tx);

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                id,
                ManagedSession {
                    id,
                    environment: Arc::clone(&environment),
                    problem: problem.to_string(),
                    created_at: Utc::now(),
                    plan: plan_rx,
                    results: results_rx,
                    outcome: outcome_rx,
                    confirmations,
                    cancel,
                },
            );
            evict_finished(&mut sessions, self.config.sessions.max_retained);
        }

        info!(session_id = %id, environment = %environment.name, "Diagnosis session started");
        self.events.publish(DiagnosisEvent::SessionStarted {
            session_id: id,
            environment: environment.name.clone(),
        });

        let events = self.events.clone();
        let problem = problem.to_string();
        tokio::spawn(async move {
            let outcome = engine
                .diagnose(&problem, environment, hypothesis_context)
                .await;
            let event = if outcome.cancelled {
                DiagnosisEvent::SessionCancelled { session_id: id }
            } else {
                DiagnosisEvent::SessionCompleted {
                    session_id: id,
                    hypothesis_status: outcome.report.hypothesis_status,
                }
            };
            outcome_tx.send_replace(Some(outcome));
            events.publish(event);
        });

        Ok(id)
    }

    /// Live state of a session
    pub async fn get_status(&self, session_id: Uuid) -> Result<SessionState> {
        let (state, confirmations) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&session_id)
                .ok_or(Error::SessionNotFound(session_id))?;
            let state = SessionState {
                id: session.id,
                status: session.status(),
                plan: session.plan.borrow().clone(),
                step_results: session.results.borrow().clone(),
                pending_confirmations: Vec::new(),
            };
            (state, Arc::clone(&session.confirmations))
        };

        Ok(SessionState {
            pending_confirmations: confirmations.pending().await,
            ..state
        })
    }

    /// Approve or deny a blocked step
    pub async fn resolve_confirmation(
        &self,
        session_id: Uuid,
        step_id: StepId,
        decision: Decision,
    ) -> Result<ConfirmationRequest> {
        let confirmations = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&session_id)
                .ok_or(Error::SessionNotFound(session_id))?;
            Arc::clone(&session.confirmations)
        };

        confirmations
            .resolve(step_id, decision)
            .await
            .map_err(|e| {
                warn!(session_id = %session_id, step_id, error = %e, "Confirmation not applied");
                match e {
                    ConfirmationError::NotFound => Error::ConfirmationNotFound { step_id },
                    ConfirmationError::AlreadyResolved(status) => {
                        Error::ConfirmationAlreadyResolved { step_id, status }
                    }
                }
            })
    }

    /// Report of a session, or pending while it runs
    pub async fn get_report(&self, session_id: Uuid) -> Result<ReportState> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        let state = match &*session.outcome.borrow() {
            Some(outcome) => ReportState::Ready(outcome.report.clone()),
            None => ReportState::Pending,
        };
        Ok(state)
    }

    /// Wait until a session has a report
    pub async fn wait_for_report(&self, session_id: Uuid) -> Result<DiagnosisReport> {
        let mut outcome = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&session_id)
                .ok_or(Error::SessionNotFound(session_id))?
                .outcome
                .clone()
        };

        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::SessionAborted(session_id))?;
        finished
            .as_ref()
            .map(|o| o.report.clone())
            .ok_or(Error::SessionAborted(session_id))
    }

    /// Cancel a session. Blocked and undispatched steps are skipped;
    /// in-flight tool calls run to completion.
    pub async fn cancel(&self, session_id: Uuid) -> Result<()> {
        let (cancel, confirmations) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&session_id)
                .ok_or(Error::SessionNotFound(session_id))?;
            (session.cancel.clone(), Arc::clone(&session.confirmations))
        };

        cancel.cancel();
        let dropped = confirmations.cancel_pending().await;
        info!(session_id = %session_id, dropped_confirmations = dropped, "Session cancel requested");
        Ok(())
    }

    /// Forget a session. A running session is cancelled first; its engine
    /// task winds down in the background.
    pub async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;

        let was_running = session.status() == SessionStatus::Running;
        if was_running {
            session.cancel.cancel();
            session.confirmations.cancel_pending().await;
        }
        info!(session_id = %session_id, was_running, "Session deleted");
        Ok(())
    }

    /// All sessions, oldest first
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<_> = sessions.values().map(ManagedSession::to_summary).collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }
}

/// Drop the oldest finished sessions until at most `max_retained` remain
fn evict_finished(sessions: &mut HashMap<Uuid, ManagedSession>, max_retained: usize) {
    if sessions.len() <= max_retained {
        return;
    }
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = sessions
        .values()
        .filter(|s| s.status() != SessionStatus::Running)
        .map(|s| (s.created_at, s.id))
        .collect();
    finished.sort();

    let excess = sessions.len() - max_retained;
    for (_, id) in finished.into_iter().take(excess) {
        sessions.remove(&id);
        debug!(session_id = %id, "Finished session evicted");
    }
}

#[cfg(test)]
mod tests;
