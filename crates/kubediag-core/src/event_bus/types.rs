use crate::executor::StepStatus;
use crate::plan::StepId;
use crate::report::HypothesisStatus;
use serde::Serialize;
use uuid::Uuid;

/// Events emitted during a diagnosis session.
///
/// Events carry ids and statuses only. Tool outputs and params are fetched
/// through the session API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosisEvent {
    /// Session has started
    SessionStarted {
        /// Session identifier
        session_id: Uuid,
        /// Selected environment
        environment: String,
    },
    /// A proposed plan passed validation
    PlanAccepted {
        /// Session identifier
        session_id: Uuid,
        /// Planning round, starting at 0
        round: u32,
        /// Number of steps
        steps: usize,
    },
    /// A proposed plan failed validation
    PlanRejected {
        /// Session identifier
        session_id: Uuid,
        /// Planning round
        round: u32,
        /// Validation error
        reason: String,
    },
    /// A step moved to a new status
    StepStatusChanged {
        /// Session identifier
        session_id: Uuid,
        /// Step
        step_id: StepId,
        /// New status
        status: StepStatus,
    },
    /// A step is blocked on an operator
    ConfirmationRequired {
        /// Session identifier
        session_id: Uuid,
        /// Step
        step_id: StepId,
        /// Confirmation request ID
        request_id: Uuid,
        /// Tool that would run
        tool: String,
    },
    /// The engine asked the planner for a new plan
    ReplanRequested {
        /// Session identifier
        session_id: Uuid,
        /// Round the new plan belongs to
        round: u32,
    },
    /// Session finished with a report
    SessionCompleted {
        /// Session identifier
        session_id: Uuid,
        /// Final hypothesis classification
        hypothesis_status: HypothesisStatus,
    },
    /// Session was cancelled
    SessionCancelled {
        /// Session identifier
        session_id: Uuid,
    },
}

impl DiagnosisEvent {
    /// Get the session_id from any event variant.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::PlanAccepted { session_id, .. }
            | Self::PlanRejected { session_id, .. }
            | Self::StepStatusChanged { session_id, .. }
            | Self::ConfirmationRequired { session_id, .. }
            | Self::ReplanRequested { session_id, .. }
            | Self::SessionCompleted { session_id, .. }
            | Self::SessionCancelled { session_id } => *session_id,
        }
    }
}
