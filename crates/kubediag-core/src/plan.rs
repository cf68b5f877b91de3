//! Plan model
//!
//! A [`Plan`] is untrusted input from a planning collaborator. It becomes a
//! [`ValidatedPlan`] only through [`crate::validator::validate`], and is never
//! mutated afterwards: replanning produces a new plan.

use crate::catalog::ResolvedAction;
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Step identifier, unique within a plan
pub type StepId = u32;

/// One diagnostic step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step id
    pub step_id: StepId,
    /// Skill id or tool name
    pub action: String,
    /// Parameters for the action
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Map<String, Value>,
    /// Why the step is in the plan
    #[serde(default)]
    pub reason: String,
    /// What the planner expects to observe
    #[serde(default)]
    pub expected_outcome: String,
    /// Steps that must succeed first
    #[serde(default, deserialize_with = "lenient_depends_on")]
    pub depends_on: Vec<StepId>,
}

impl Step {
    /// Create a step with no params and no dependencies
    #[must_use]
    pub fn new(step_id: StepId, action: impl Into<String>) -> Self {
        Self {
            step_id,
            action: action.into(),
            params: Map::new(),
            reason: String::new(),
            expected_outcome: String::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set a parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the reason
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the expected outcome
    #[must_use]
    pub fn with_expected_outcome(mut self, expected: impl Into<String>) -> Self {
        self.expected_outcome = expected.into();
        self
    }

    /// Set dependencies
    #[must_use]
    pub fn depends_on(mut self, deps: impl IntoIterator<Item = StepId>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    /// The `namespace` param, if present and a string
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.params.get("namespace").and_then(Value::as_str)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependsOn {
    One(StepId),
    Many(Vec<StepId>),
}

fn lenient_depends_on<'de, D>(deserializer: D) -> std::result::Result<Vec<StepId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<DependsOn>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(DependsOn::One(id)) => vec![id],
        Some(DependsOn::Many(ids)) => ids,
    })
}

/// A candidate diagnostic plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Problem statement the plan addresses
    #[serde(default)]
    pub problem_description: String,
    /// Hypothesis the plan sets out to confirm or refute
    #[serde(default)]
    pub initial_hypothesis: String,
    /// Steps in declaration order
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Create an empty plan
    #[must_use]
    pub fn new(problem_description: impl Into<String>, hypothesis: impl Into<String>) -> Self {
        Self {
            problem_description: problem_description.into(),
            initial_hypothesis: hypothesis.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Find a step by id
    #[must_use]
    pub fn step(&self, step_id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// Parse a plan document.
///
/// Accepts a bare JSON object or one wrapped in a fenced code block.
pub fn parse_plan_document(text: &str) -> Result<Plan> {
    let body = strip_code_fence(text.trim());
    serde_json::from_str(body).map_err(|e| Error::PlanDocument(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the info string (```json)
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// A plan that passed validation, with its execution order and resolved
/// actions
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    plan: Plan,
    order: Vec<StepId>,
    positions: HashMap<StepId, usize>,
    actions: HashMap<StepId, ResolvedAction>,
}

impl ValidatedPlan {
    pub(crate) fn new(
        plan: Plan,
        order: Vec<StepId>,
        actions: HashMap<StepId, ResolvedAction>,
    ) -> Self {
        let positions = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.step_id, i))
            .collect();
        Self {
            plan,
            order,
            positions,
            actions,
        }
    }

    /// The underlying plan
    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Topological order; ties follow declaration order
    #[must_use]
    pub fn order(&self) -> &[StepId] {
        &self.order
    }

    /// Look up a step
    #[must_use]
    pub fn step(&self, step_id: StepId) -> Option<&Step> {
        self.positions
            .get(&step_id)
            .and_then(|&i| self.plan.steps.get(i))
    }

    /// Steps in topological order
    pub fn steps_in_order(&self) -> impl Iterator<Item = &Step> + '_ {
        self.order.iter().filter_map(move |id| self.step(*id))
    }

    /// The catalog entry a step's action resolved to
    #[must_use]
    pub fn action(&self, step_id: StepId) -> Option<&ResolvedAction> {
        self.actions.get(&step_id)
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.plan.steps.len()
    }

    /// Whether the plan has no steps (never true for a validated plan)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plan.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depends_on_forms() {
        let doc = r#"{
            "problem_description": "pod payments-7f9 in CrashLoopBackOff",
            "initial_hypothesis": "OOM kill",
            "steps": [
                {"step_id": 1, "action": "get_pod_logs", "params": {"namespace": "payments"}},
                {"step_id": 2, "action": "get_previous_logs", "depends_on": 1},
                {"step_id": 3, "action": "describe_pod", "depends_on": [1, 2]},
                {"step_id": 4, "action": "get_events", "depends_on": null, "params": null}
            ]
        }"#;
        let plan = parse_plan_document(doc).unwrap();
        assert_eq!(plan.steps[0].depends_on, Vec::<StepId>::new());
        assert_eq!(plan.steps[1].depends_on, vec![1]);
        assert_eq!(plan.steps[2].depends_on, vec![1, 2]);
        assert!(plan.steps[3].depends_on.is_empty());
        assert!(plan.steps[3].params.is_empty());
        assert_eq!(plan.steps[0].namespace(), Some("payments"));
    }

    #[test]
    fn test_fenced_document() {
        let doc = "```json\n{\"problem_description\": \"x\", \"steps\": [{\"step_id\": 7, \"action\": \"list_pods\"}]}\n```";
        let plan = parse_plan_document(doc).unwrap();
        assert_eq!(plan.steps[0].step_id, 7);
        assert_eq!(plan.initial_hypothesis, "");
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            parse_plan_document("the pod is broken"),
            Err(Error::PlanDocument(_))
        ));
        assert!(matches!(
            parse_plan_document(r#"{"steps": [{"step_id": "one", "action": "x"}]}"#),
            Err(Error::PlanDocument(_))
        ));
    }

    #[test]
    fn test_step_builder() {
        let step = Step::new(2, "describe_pod")
            .with_param("namespace", "payments")
            .with_param("pod_name", "payments-7f9")
            .with_reason("inspect last termination state")
            .depends_on([1]);
        assert_eq!(step.params.len(), 2);
        assert_eq!(step.depends_on, vec![1]);
    }
}
