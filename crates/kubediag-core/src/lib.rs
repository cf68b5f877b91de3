//! kubediag Core - Plan-Execute Diagnostic Engine
//!
//! This crate turns a problem statement into a validated, dependency-ordered
//! plan of read-mostly cluster queries, runs it under a safety policy and
//! synthesizes the evidence into a diagnosis:
//! - Planning: the collaborator seam plus a rule-based planner
//! - Validation: structural checks and topological ordering
//! - Safety: namespace policy, command whitelist, confirmations
//! - Execution: concurrent dependency-graph scheduling with retries
//! - Reporting: hypothesis classification against failure signatures
//! - Sessions: background diagnosis sessions, events and audit log

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod catalog;
pub mod config;
pub mod confirmation;
pub mod engine;
pub mod environment;
pub mod error;
pub mod event_bus;
pub mod executor;
pub mod invoker;
pub mod plan;
pub mod planner;
pub mod report;
pub mod retry;
pub mod safety;
pub mod session_manager;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit::{mask_sensitive, AuditConfig, AuditLogger, AuditRecord, Severity};
pub use catalog::{ActionSummary, Catalog, ResolvedAction};
pub use config::{EngineConfig, ExecutorSettings, InvokerSettings, SessionSettings};
pub use confirmation::{
    ConfirmationError, ConfirmationManager, ConfirmationOutcome, ConfirmationRequest,
    ConfirmationStatus, Decision,
};
pub use engine::{DiagnosisEngine, DiagnosisOutcome, ReplanConfig};
pub use environment::{Environment, EnvironmentRegistry, EnvironmentSpec};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError};
pub use event_bus::{DiagnosisEvent, EventBus};
pub use executor::{
    ExecutionOutcome, ExecutorConfig, PlanExecutor, StepError, StepErrorKind, StepResult,
    StepStatus, StepTimestamps,
};
pub use invoker::{StepInvoker, ToolInvocationError};
pub use plan::{parse_plan_document, Plan, Step, StepId, ValidatedPlan};
pub use planner::{PlanningCollaborator, PlanningContext, PriorRound, RuleBasedPlanner};
pub use report::{
    builtin_signatures, DiagnosisReport, FailureSignature, HypothesisStatus, ReportConfig,
    Synthesizer,
};
pub use retry::{retry_with_backoff, Attempted, RetryConfig, RetryError};
pub use safety::{Authorization, SafetyGate, SafetyPolicy, SafetyViolation, SensitiveResource};
pub use session_manager::{
    ReportState, SessionManager, SessionState, SessionStatus, SessionSummary,
};
pub use validator::{validate, ValidationError, ValidationErrorKind};
