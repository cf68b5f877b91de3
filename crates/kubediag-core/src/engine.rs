//! Diagnosis Engine - plan, validate, execute, synthesize, replan
//!
//! One [`DiagnosisEngine::diagnose`] call drives a whole session:
//!
//! 1. ask the planning collaborator for a plan
//! 2. validate it (a rejected plan consumes a round)
//! 3. execute it and synthesize a report
//! 4. replan while the verdict is inconclusive, some step failed for a
//!    routable reason, and rounds remain
//!
//! Running out of rounds, or a planner that gives up, ends the session with
//! an inconclusive report carrying the evidence gathered so far.

use crate::catalog::Catalog;
use crate::environment::Environment;
use crate::event_bus::{DiagnosisEvent, EventBus};
use crate::executor::PlanExecutor;
use crate::plan::Plan;
use crate::planner::{PlanningCollaborator, PlanningContext, PriorRound};
use crate::report::{DiagnosisReport, HypothesisStatus, RoundEvidence, Synthesizer};
use crate::validator::validate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Replan settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplanConfig {
    /// Replan rounds after the initial plan
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

fn default_max_rounds() -> u32 {
    2
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

/// How a diagnosis ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisOutcome {
    /// Final report
    pub report: DiagnosisReport,
    /// Plans proposed, including rejected ones
    pub plans_proposed: u32,
    /// Whether the session was cancelled
    pub cancelled: bool,
}

/// Drives the plan-execute-replan loop for one session
pub struct DiagnosisEngine {
    catalog: Arc<Catalog>,
    planner: Arc<dyn PlanningCollaborator>,
    executor: PlanExecutor,
    synthesizer: Arc<Synthesizer>,
    replan: ReplanConfig,
    events: Option<EventBus>,
    session_id: Uuid,
    plan_tx: Option<watch::Sender<Option<Plan>>>,
}

impl DiagnosisEngine {
    /// Create an engine
    pub fn new(
        catalog: Arc<Catalog>,
        planner: Arc<dyn PlanningCollaborator>,
        executor: PlanExecutor,
        synthesizer: Arc<Synthesizer>,
        replan: ReplanConfig,
    ) -> Self {
        Self {
            catalog,
            planner,
            executor,
            synthesizer,
            replan,
            events: None,
            session_id: Uuid::nil(),
            plan_tx: None,
        }
    }

    /// Publish plan events on an event bus
    #[must_use]
    pub fn with_events(mut self, events: EventBus, session_id: Uuid) -> Self {
        self.events = Some(events);
        self.session_id = session_id;
        self
    }

    /// Publish the plan in force on a watch channel
    #[must_use]
    pub fn with_plan_channel(mut self, tx: watch::Sender<Option<Plan>>) -> Self {
        self.plan_tx = Some(tx);
        self
    }

    fn emit(&self, event: DiagnosisEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Run the session to a report
    #[instrument(skip_all, fields(session_id = %self.session_id, environment = %environment.name))]
    pub async fn diagnose(
        &self,
        problem: &str,
        environment: Arc<Environment>,
        hypothesis_context: Option<String>,
    ) -> DiagnosisOutcome {
        let context = PlanningContext {
            environment: environment.name.clone(),
            namespace_patterns: environment.namespace_patterns.clone(),
            default_namespace: environment.default_namespace.clone(),
            hypothesis_context: hypothesis_context.clone(),
        };
        let available = self.catalog.summaries();
        let cancel = self.executor.cancellation().clone();

        let mut hypothesis = hypothesis_context.unwrap_or_default();
        let mut rounds: Vec<RoundEvidence> = Vec::new();
        let mut round: u32 = 0;
        let mut proposal = self.planner.propose_plan(problem, &context, &available).await;

        loop {
            let plan = match proposal {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(round, error = %e, "Planning collaborator gave up");
                    let note = format!("planning failed in round {}: {}", round, e);
                    return self.finish(problem, &hypothesis, &rounds, &note, round, false);
                }
            };
            if !plan.initial_hypothesis.is_empty() {
                hypothesis = plan.initial_hypothesis.clone();
            }

            let prior = match validate(plan.clone(), &self.catalog) {
                Ok(validated) => {
                    info!(round, steps = validated.len(), "Plan accepted");
                    self.emit(DiagnosisEvent::PlanAccepted {
                        session_id: self.session_id,
                        round,
                        steps: validated.len(),
                    });
                    if let Some(tx) = &self.plan_tx {
                        tx.send_replace(Some(plan.clone()));
                    }

                    let outcome = self
                        .executor
                        .run_round(&validated, Arc::clone(&environment), round)
                        .await;
                    let report = self.synthesizer.synthesize(&validated, &outcome.results);

                    if outcome.cancelled {
                        let report = report.with_note("session cancelled before all steps ran");
                        return self.complete(report, round + 1, true);
                    }
                    if report.hypothesis_status != HypothesisStatus::Inconclusive
                        || !outcome.has_routable_failure()
                    {
                        return self.complete(report, round + 1, false);
                    }

                    debug!(round, "Inconclusive with routable failures");
                    rounds.push(RoundEvidence {
                        plan: validated,
                        results: outcome.results.clone(),
                    });
                    PriorRound {
                        round,
                        plan: Some(plan),
                        results: outcome.results,
                        rejection: None,
                    }
                }
                Err(err) => {
                    warn!(round, error = %err, "Plan rejected");
                    self.emit(DiagnosisEvent::PlanRejected {
                        session_id: self.session_id,
                        round,
                        reason: err.to_string(),
                    });
                    PriorRound {
                        round,
                        plan: Some(plan),
                        results: Vec::new(),
                        rejection: Some(err.to_string()),
                    }
                }
            };

            if cancel.is_cancelled() {
                return self.finish(problem, &hypothesis, &rounds, "session cancelled", round + 1, true);
            }
            if round >= self.replan.max_rounds {
                let note = format!("replan limit of {} rounds reached", self.replan.max_rounds);
                return self.finish(problem, &hypothesis, &rounds, &note, round + 1, false);
            }

            // step ids repeat across plans
            self.executor.confirmations().clear_settled().await;
            round += 1;
            info!(round, "Requesting replan");
            self.emit(DiagnosisEvent::ReplanRequested {
                session_id: self.session_id,
                round,
            });
            proposal = self.planner.replan(problem, &prior).await;
        }
    }

    fn finish(
        &self,
        problem: &str,
        hypothesis: &str,
        rounds: &[RoundEvidence],
        note: &str,
        plans_proposed: u32,
        cancelled: bool,
    ) -> DiagnosisOutcome {
        let report = self
            .synthesizer
            .inconclusive(problem, hypothesis, rounds, note);
        self.complete(report, plans_proposed, cancelled)
    }

    fn complete(&self, report: DiagnosisReport, plans_proposed: u32, cancelled: bool) -> DiagnosisOutcome {
        info!(
            hypothesis_status = %report.hypothesis_status,
            plans_proposed,
            cancelled,
            "Diagnosis finished"
        );
        DiagnosisOutcome {
            report,
            plans_proposed,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests;
