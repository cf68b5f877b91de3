//! Planner - problem statement to candidate diagnostic plan
//!
//! The [`PlanningCollaborator`] trait is the seam to whatever produces plans
//! (an LLM service, a human, a fixture). Its output is untrusted and always
//! goes through the validator.
//!
//! [`RuleBasedPlanner`] is a deterministic collaborator that maps common
//! symptoms to fixed step sequences.

use crate::catalog::ActionSummary;
use crate::error::{Error, Result};
use crate::executor::{StepResult, StepStatus};
use crate::plan::{Plan, Step};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Session context a planner may use
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningContext {
    /// Environment name
    pub environment: String,
    /// Namespace globs the session may touch
    pub namespace_patterns: Vec<String>,
    /// Namespace to use when the problem names none
    pub default_namespace: Option<String>,
    /// Operator-supplied hint about the likely cause
    pub hypothesis_context: Option<String>,
}

/// What happened in the previous planning round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorRound {
    /// Round number of the prior plan, starting at 0
    pub round: u32,
    /// The prior plan
    pub plan: Option<Plan>,
    /// Its step results (empty when the plan was rejected)
    pub results: Vec<StepResult>,
    /// Validation error, when the plan was rejected
    pub rejection: Option<String>,
}

/// Produces candidate plans
#[async_trait]
pub trait PlanningCollaborator: Send + Sync {
    /// First plan for a problem
    async fn propose_plan(
        &self,
        problem: &str,
        context: &PlanningContext,
        available: &[ActionSummary],
    ) -> Result<Plan>;

    /// Replacement plan after a round that was rejected or failed
    async fn replan(&self, problem: &str, prior: &PriorRound) -> Result<Plan>;
}

/// Words that follow "namespace" in prose but are not namespace names
const STOP_WORDS: &[&str] = &[
    "is", "are", "in", "the", "a", "an", "has", "have", "was", "were", "not", "does", "name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symptom {
    CrashLoop,
    ImagePull,
    Pending,
    JobFailure,
    Connection,
    Unknown,
}

/// Deterministic symptom-driven planner
#[derive(Debug)]
pub struct RuleBasedPlanner {
    namespace_patterns: Vec<Regex>,
    pod_pattern: Regex,
    job_pattern: Regex,
    target_pattern: Regex,
}

impl RuleBasedPlanner {
    /// Create a planner
    pub fn new() -> Result<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| Error::Configuration(format!("planner pattern: {}", e)))
        };
        Ok(Self {
            namespace_patterns: vec![
                compile(r"(?i)\bin\s+(?:the\s+)?([a-z0-9][a-z0-9-]{0,62})\s+namespace\b")?,
                compile(r"(?i)(?:^|\s)-n\s+([a-z0-9][a-z0-9-]{0,62})")?,
                compile(r"(?i)\b(?:namespace|ns)[\s:=]+([a-z0-9][a-z0-9-]{0,62})")?,
            ],
            pod_pattern: compile(r"(?i)\bpods?[\s:/=]+([a-z0-9][a-z0-9.-]*[a-z0-9])")?,
            job_pattern: compile(r"(?i)\bjobs?[\s:/=]+([a-z0-9][a-z0-9.-]*[a-z0-9])")?,
            target_pattern: compile(
                r"(?i)\b(?:reach|resolve|connect(?:ing)?\s+to)\s+([a-z0-9][a-z0-9.-]*[a-z0-9])(?::(\d{1,5})\b)?",
            )?,
        })
    }

    fn extract_namespace(&self, problem: &str) -> Option<String> {
        self.namespace_patterns
            .iter()
            .filter_map(|re| re.captures(problem))
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .find(|ns| !STOP_WORDS.contains(&ns.as_str()))
    }

    /// Generated pod and job names carry a hyphen or a digit; plain words
    /// after "pod" ("the pod is crashing") do not.
    fn extract_name(pattern: &Regex, problem: &str) -> Option<String> {
        pattern
            .captures_iter(problem)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .find(|name| name.contains('-') || name.chars().any(|c| c.is_ascii_digit()))
    }

    /// Host (and port) a connection problem names, e.g. "cannot reach postgres:5432"
    fn extract_target(&self, problem: &str) -> Option<(String, Option<u16>)> {
        let captures = self.target_pattern.captures(problem)?;
        let host = captures.get(1)?.as_str().to_lowercase();
        if STOP_WORDS.contains(&host.as_str()) {
            return None;
        }
        let port = captures.get(2).and_then(|m| m.as_str().parse().ok());
        Some((host, port))
    }

    fn symptom(problem: &str, job: Option<&str>) -> Symptom {
        let p = problem.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| p.contains(n));

        if has(&["crashloop", "crash loop", "crashing", "restarting", "oomkilled"]) {
            Symptom::CrashLoop
        } else if has(&["imagepull", "errimagepull", "image pull", "pull image", "pulling image"]) {
            Symptom::ImagePull
        } else if has(&["pending", "unschedulable", "failedscheduling"]) {
            Symptom::Pending
        } else if job.is_some() || has(&[" job", "cronjob"]) || p.starts_with("job") {
            Symptom::JobFailure
        } else if has(&[
            "connection",
            "timeout",
            "timed out",
            "refused",
            "dns",
            "cannot reach",
            "can't reach",
            "unreachable",
        ]) {
            Symptom::Connection
        } else {
            Symptom::Unknown
        }
    }

    fn survey(problem: &str, namespace: &str, hypothesis: &str) -> Plan {
        Plan::new(problem, hypothesis)
            .with_step(
                Step::new(1, "list_pods")
                    .with_param("namespace", namespace)
                    .with_reason("find pods that are not Running or keep restarting")
                    .with_expected_outcome("pod phases and restart counts"),
            )
            .with_step(
                Step::new(2, "namespace_events")
                    .with_param("namespace", namespace)
                    .with_reason("recent warnings explain most workload failures")
                    .with_expected_outcome("Warning events such as BackOff or FailedScheduling"),
            )
    }

    fn strategy(&self, problem: &str, namespace: &str) -> Plan {
        let pod = Self::extract_name(&self.pod_pattern, problem);
        let job = Self::extract_name(&self.job_pattern, problem);
        let symptom = Self::symptom(problem, job.as_deref());
        debug!(?symptom, namespace, pod = ?pod, job = ?job, "Planning from symptom");

        let pod_step = |id: u32, action: &str, pod: &str| {
            Step::new(id, action)
                .with_param("namespace", namespace)
                .with_param("pod_name", pod)
        };

        match (symptom, pod.as_deref(), job.as_deref()) {
            (Symptom::CrashLoop, Some(pod), _) => {
                Plan::new(problem, "OOM kill: the container exceeds its memory limit")
                    .with_step(
                        pod_step(1, "get_pod_logs", pod)
                            .with_reason("application output of the current container")
                            .with_expected_outcome("startup errors or a stack trace"),
                    )
                    .with_step(
                        pod_step(2, "get_previous_logs", pod)
                            .with_reason("output of the instance that crashed")
                            .with_expected_outcome("the last lines before the container died")
                            .depends_on([1]),
                    )
                    .with_step(
                        pod_step(3, "describe_pod", pod)
                            .with_reason("last termination state and exit code")
                            .with_expected_outcome("Last State: Terminated, Reason: OOMKilled")
                            .depends_on([1]),
                    )
            }
            (Symptom::Pending, Some(pod), _) => {
                Plan::new(problem, "insufficient cluster resources block scheduling")
                    .with_step(
                        pod_step(1, "describe_pod", pod)
                            .with_reason("scheduling conditions and requested resources")
                            .with_expected_outcome("PodScheduled=False with a reason"),
                    )
                    .with_step(
                        Step::new(2, "get_events")
                            .with_param("namespace", namespace)
                            .with_param("involved_object", pod)
                            .with_reason("scheduler events name the blocking constraint")
                            .with_expected_outcome("FailedScheduling: Insufficient cpu or memory"),
                    )
            }
            (Symptom::ImagePull, Some(pod), _) => Plan::new(
                problem,
                "image pull failure: wrong image reference or missing registry credentials",
            )
            .with_step(
                pod_step(1, "describe_pod", pod)
                    .with_reason("image reference and container waiting reason")
                    .with_expected_outcome("Reason: ImagePullBackOff or ErrImagePull"),
            )
            .with_step(
                Step::new(2, "get_events")
                    .with_param("namespace", namespace)
                    .with_param("involved_object", pod)
                    .with_reason("kubelet events carry the registry error")
                    .with_expected_outcome("Failed to pull image with the registry response"),
            ),
            (Symptom::JobFailure, _, Some(job)) => {
                let job_step = |id: u32, action: &str| {
                    Step::new(id, action)
                        .with_param("namespace", namespace)
                        .with_param("job_name", job)
                };
                Plan::new(problem, "job pods crash: the job command exits with an error")
                    .with_step(
                        job_step(1, "describe_job")
                            .with_reason("completion status and failed pod count")
                            .with_expected_outcome("Pods Statuses with failures"),
                    )
                    .with_step(
                        job_step(2, "get_job_logs")
                            .with_reason("output of the failing job pods")
                            .with_expected_outcome("the error that ended the job")
                            .depends_on([1]),
                    )
                    .with_step(
                        Step::new(3, "namespace_events")
                            .with_param("namespace", namespace)
                            .with_reason("BackoffLimitExceeded and pod-level events")
                            .with_expected_outcome("job and pod warnings"),
                    )
            }
            (Symptom::JobFailure, _, None) => Plan::new(problem, "a job in the namespace fails")
                .with_step(
                    Step::new(1, "list_jobs")
                        .with_param("namespace", namespace)
                        .with_reason("find the failing job")
                        .with_expected_outcome("jobs with failed completions"),
                )
                .with_step(
                    Step::new(2, "namespace_events")
                        .with_param("namespace", namespace)
                        .with_reason("job controller events")
                        .with_expected_outcome("BackoffLimitExceeded"),
                ),
            (Symptom::Connection, Some(pod), _) => {
                let target = self.extract_target(problem);
                let hostname = target
                    .as_ref()
                    .map_or("kubernetes.default", |(host, _)| host.as_str());
                let plan = Plan::new(
                    problem,
                    "connection failure: wrong target address or broken DNS resolution",
                )
                .with_step(
                    pod_step(1, "inspect_container_env", pod)
                        .with_reason("target host and port come from the environment")
                        .with_expected_outcome("database or service URL variables"),
                )
                .with_step(
                    pod_step(2, "check_dns_resolution", pod)
                        .with_param("hostname", hostname)
                        .with_reason("the target name must resolve from inside the pod")
                        .with_expected_outcome(format!("an address for {hostname}")),
                )
                .with_step(
                    Step::new(3, "list_pods")
                        .with_param("namespace", namespace)
                        .with_reason("the target service's pods must be Running")
                        .with_expected_outcome("target pods Ready"),
                );
                match target {
                    Some((host, Some(port))) => plan.with_step(
                        pod_step(4, "check_network_connectivity", pod)
                            .with_param("target_host", host)
                            .with_param("target_port", port)
                            .with_reason("a resolvable host may still refuse the port")
                            .with_expected_outcome("the TCP connection succeeds")
                            .depends_on([2]),
                    ),
                    _ => plan,
                }
            }
            _ => Self::survey(problem, namespace, "no specific failure mode recognized"),
        }
    }
}

/// Drop steps whose action is not on offer, and dependencies on them
fn retain_available(mut plan: Plan, available: &[ActionSummary]) -> Plan {
    let offered: HashSet<&str> = available.iter().map(|a| a.action.as_str()).collect();
    plan.steps.retain(|s| offered.contains(s.action.as_str()));
    let kept: HashSet<u32> = plan.steps.iter().map(|s| s.step_id).collect();
    for step in &mut plan.steps {
        step.depends_on.retain(|d| kept.contains(d));
    }
    plan
}

fn first_namespace(plan: &Plan) -> Option<String> {
    plan.steps
        .iter()
        .find_map(|s| s.namespace().map(str::to_string))
}

#[async_trait]
impl PlanningCollaborator for RuleBasedPlanner {
    async fn propose_plan(
        &self,
        problem: &str,
        context: &PlanningContext,
        available: &[ActionSummary],
    ) -> Result<Plan> {
        let namespace = self
            .extract_namespace(problem)
            .or_else(|| context.default_namespace.clone())
            .unwrap_or_else(|| "default".to_string());

        let mut plan = retain_available(self.strategy(problem, &namespace), available);
        if let Some(hint) = context.hypothesis_context.as_deref().filter(|h| !h.is_empty()) {
            plan.initial_hypothesis = hint.to_string();
        }
        if plan.steps.is_empty() {
            return Err(Error::Planning(
                "none of the planned actions are available".to_string(),
            ));
        }
        Ok(plan)
    }

    async fn replan(&self, problem: &str, prior: &PriorRound) -> Result<Plan> {
        let namespace = prior
            .plan
            .as_ref()
            .and_then(first_namespace)
            .or_else(|| self.extract_namespace(problem))
            .unwrap_or_else(|| "default".to_string());
        let hypothesis = prior
            .plan
            .as_ref()
            .map(|p| p.initial_hypothesis.clone())
            .unwrap_or_default();

        let failed: HashSet<&str> = prior
            .results
            .iter()
            .filter(|r| matches!(r.status, StepStatus::Failed | StepStatus::Denied))
            .map(|r| r.action.as_str())
            .collect();

        let mut plan = Self::survey(problem, &namespace, &hypothesis);
        plan.steps.retain(|s| !failed.contains(s.action.as_str()));
        if plan.steps.is_empty() {
            return Err(Error::Planning(format!(
                "no untried actions left after round {}",
                prior.round
            )));
        }
        debug!(round = prior.round + 1, steps = plan.steps.len(), "Replanned with broader queries");
        Ok(plan)
    }
}
