//! `diagnose` command
//!
//! Runs one session against recorded observations, prompting the operator
//! for every step that needs confirmation.

use crate::config::AppConfig;
use crate::fixtures::Recording;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use inquire::Confirm;
use kubediag_core::{
    format_error_for_cli, parse_plan_document, ActionSummary, Decision, DiagnosisEvent,
    DiagnosisReport, EnvironmentRegistry, HypothesisStatus, Plan, PlanningCollaborator,
    PlanningContext, PriorRound, RuleBasedPlanner, SessionManager, StepId,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

pub struct DiagnoseArgs {
    pub environment: String,
    pub problem: String,
    pub observations: PathBuf,
    pub plan: Option<PathBuf>,
    pub hypothesis: Option<String>,
    pub json: bool,
}

/// Proposes a plan read from disk and has nothing to offer on replan
struct PlanFilePlanner {
    plan: Plan,
}

#[async_trait]
impl PlanningCollaborator for PlanFilePlanner {
    async fn propose_plan(
        &self,
        problem: &str,
        _context: &PlanningContext,
        _available: &[ActionSummary],
    ) -> kubediag_core::Result<Plan> {
        let mut plan = self.plan.clone();
        if plan.problem_description.is_empty() {
            plan.problem_description = problem.to_string();
        }
        Ok(plan)
    }

    async fn replan(&self, _problem: &str, prior: &PriorRound) -> kubediag_core::Result<Plan> {
        Err(kubediag_core::Error::Planning(format!(
            "plan file has no alternative after round {}",
            prior.round
        )))
    }
}

pub async fn run(config: AppConfig, args: DiagnoseArgs) -> Result<()> {
    let recording = Recording::from_path(&args.observations)?;
    let catalog = super::build_catalog(&config, Some(recording))?;
    let environments_path = &config.catalog.environments_path;
    let environments = Arc::new(
        EnvironmentRegistry::from_path(environments_path).with_context(|| {
            format!("Failed to load environments from {}", environments_path.display())
        })?,
    );

    let planner: Arc<dyn PlanningCollaborator> = match &args.plan {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read plan from {}", path.display()))?;
            Arc::new(PlanFilePlanner {
                plan: parse_plan_document(&text)?,
            })
        }
        None => Arc::new(RuleBasedPlanner::new()?),
    };

    let manager = Arc::new(SessionManager::new(
        config.engine(),
        environments,
        catalog,
        planner,
    )?);
    let events = manager.events().subscribe();

    let session_id = match manager
        .start_diagnosis_with_hypothesis(&args.environment, &args.problem, args.hypothesis.clone())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            eprintln!("{}", format_error_for_cli(&e));
            bail!("diagnosis could not start");
        }
    };
    if !args.json {
        println!("🔎 Diagnosing in {} (session {session_id})", args.environment);
    }

    let follower = tokio::spawn(follow_session(
        Arc::clone(&manager),
        session_id,
        events,
        !args.json,
    ));

    let report = tokio::select! {
        report = manager.wait_for_report(session_id) => report?,
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("🛑 Cancelling session...");
            manager.cancel(session_id).await?;
            manager.wait_for_report(session_id).await?
        }
    };
    follower.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Print progress and answer confirmation requests until the session ends
async fn follow_session(
    manager: Arc<SessionManager>,
    session_id: Uuid,
    mut events: broadcast::Receiver<DiagnosisEvent>,
    verbose: bool,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        if event.session_id() != session_id {
            continue;
        }

        match event {
            DiagnosisEvent::PlanAccepted { round, steps, .. } if verbose => {
                println!("📋 Plan accepted (round {round}, {steps} steps)");
            }
            DiagnosisEvent::PlanRejected { round, reason, .. } if verbose => {
                println!("⚠️  Plan rejected in round {round}: {reason}");
            }
            DiagnosisEvent::ReplanRequested { round, .. } if verbose => {
                println!("🔁 Replanning (round {round})");
            }
            DiagnosisEvent::StepStatusChanged {
                step_id, status, ..
            } if verbose => {
                println!("   step {step_id}: {status}");
            }
            DiagnosisEvent::ConfirmationRequired { step_id, .. } => {
                let decision = ask_operator(&manager, session_id, step_id).await;
                if let Err(e) = manager
                    .resolve_confirmation(session_id, step_id, decision)
                    .await
                {
                    // expired or cancelled while the prompt was open
                    warn!(step_id, error = %e, "Decision not applied");
                }
            }
            DiagnosisEvent::SessionCompleted { .. } | DiagnosisEvent::SessionCancelled { .. } => {
                return
            }
            _ => {}
        }
    }
}

async fn ask_operator(manager: &SessionManager, session_id: Uuid, step_id: StepId) -> Decision {
    let request = match manager.get_status(session_id).await {
        Ok(state) => state
            .pending_confirmations
            .into_iter()
            .find(|r| r.step_id == step_id),
        Err(_) => None,
    };
    let Some(request) = request else {
        return Decision::Deny;
    };

    println!();
    println!("🔒 Step {step_id} wants to run {} with {}", request.tool, request.params);
    println!("   {}", request.rationale);

    if !std::io::stdin().is_terminal() {
        println!("   Not an interactive terminal: denied");
        info!(step_id, "Confirmation denied without a terminal");
        return Decision::Deny;
    }

    let prompt = format!("Allow step {step_id} ({})?", request.tool);
    let answer = tokio::task::spawn_blocking(move || {
        Confirm::new(&prompt)
            .with_default(false)
            .with_help_message("Unanswered requests are denied when they expire")
            .prompt()
    })
    .await;

    match answer {
        Ok(Ok(true)) => Decision::Approve,
        Ok(Ok(false)) => Decision::Deny,
        Ok(Err(e)) => {
            warn!(step_id, error = %e, "Confirmation prompt failed");
            Decision::Deny
        }
        Err(e) => {
            warn!(step_id, error = %e, "Confirmation prompt task failed");
            Decision::Deny
        }
    }
}

fn print_report(report: &DiagnosisReport) {
    let icon = match report.hypothesis_status {
        HypothesisStatus::Confirmed => "✅",
        HypothesisStatus::Refuted => "❌",
        HypothesisStatus::Inconclusive => "❓",
    };

    println!();
    println!("════════════════════════════════════════");
    println!("{icon} Hypothesis {}", report.hypothesis_status.as_str());
    println!("════════════════════════════════════════");
    println!();
    println!("Problem:    {}", report.problem_description);
    println!("Hypothesis: {}", report.initial_hypothesis);
    if let Some(signature) = &report.matched_signature {
        println!("Matched:    {signature}");
    }
    println!();
    println!("{}", report.narrative);

    if !report.recommendations.is_empty() {
        println!();
        println!("💡 Recommendations");
        for recommendation in &report.recommendations {
            println!("   • {recommendation}");
        }
    }
}
