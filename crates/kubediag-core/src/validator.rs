//! Plan Validator
//!
//! Checks run in a fixed order and stop at the first violation:
//!
//! 1. the plan has steps and step ids are unique
//! 2. every dependency exists and no step depends on itself
//! 3. dependencies are acyclic (Kahn's algorithm)
//! 4. every action resolves to a skill or tool
//! 5. params conform to the action's schema, and values substituted into
//!    skill command templates are plain words

use crate::catalog::{Catalog, ResolvedAction};
use crate::plan::{Plan, StepId, ValidatedPlan};
use kubediag_tools::SchemaViolation;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// What is wrong with a plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationErrorKind {
    /// Plan has no steps
    #[error("plan has no steps")]
    EmptyPlan,
    /// Two steps share an id
    #[error("duplicate step_id")]
    DuplicateStepId,
    /// A dependency names a step that does not exist
    #[error("depends on unknown step {0}")]
    UnknownDependency(StepId),
    /// A step depends on itself
    #[error("depends on itself")]
    SelfDependency,
    /// Dependencies form a cycle through these steps
    #[error("dependency cycle among steps {0:?}")]
    Cycle(Vec<StepId>),
    /// Action is neither a skill nor a tool
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    /// Params do not match the schema
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

/// A rejected plan: the offending step (if any) and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Offending step
    pub step_id: Option<StepId>,
    /// Reason
    pub kind: ValidationErrorKind,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step_id {
            Some(id) => write!(f, "step {}: {}", id, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    fn at(step_id: StepId, kind: ValidationErrorKind) -> Self {
        Self {
            step_id: Some(step_id),
            kind,
        }
    }
}

/// Validate a candidate plan against the catalog. All-or-nothing.
pub fn validate(plan: Plan, catalog: &Catalog) -> Result<ValidatedPlan, ValidationError> {
    if plan.steps.is_empty() {
        return Err(ValidationError {
            step_id: None,
            kind: ValidationErrorKind::EmptyPlan,
        });
    }

    check_unique_ids(&plan)?;
    check_dependency_refs(&plan)?;
    let order = topological_order(&plan)?;
    let actions = resolve_actions(&plan, catalog)?;

    debug!(steps = plan.steps.len(), order = ?order, "Plan validated");
    Ok(ValidatedPlan::new(plan, order, actions))
}

fn check_unique_ids(plan: &Plan) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.step_id) {
            return Err(ValidationError::at(
                step.step_id,
                ValidationErrorKind::DuplicateStepId,
            ));
        }
    }
    Ok(())
}

fn check_dependency_refs(plan: &Plan) -> Result<(), ValidationError> {
    let ids: HashSet<StepId> = plan.steps.iter().map(|s| s.step_id).collect();
    for step in &plan.steps {
        for dep in &step.depends_on {
            if *dep == step.step_id {
                return Err(ValidationError::at(
                    step.step_id,
                    ValidationErrorKind::SelfDependency,
                ));
            }
            if !ids.contains(dep) {
                return Err(ValidationError::at(
                    step.step_id,
                    ValidationErrorKind::UnknownDependency(*dep),
                ));
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm; among ready steps the earliest declared goes first.
fn topological_order(plan: &Plan) -> Result<Vec<StepId>, ValidationError> {
    let index: HashMap<StepId, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.step_id, i))
        .collect();

    let mut in_degree = vec![0usize; plan.steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); plan.steps.len()];
    for (i, step) in plan.steps.iter().enumerate() {
        // repeated entries in depends_on count once
        let deps: BTreeSet<StepId> = step.depends_on.iter().copied().collect();
        in_degree[i] = deps.len();
        for dep in deps {
            dependents[index[&dep]].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(plan.steps.len());

    while let Some(Reverse(i)) = ready.pop() {
        order.push(plan.steps[i].step_id);
        for &j in &dependents[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() < plan.steps.len() {
        let unresolved: Vec<StepId> = plan
            .steps
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, s)| s.step_id)
            .collect();
        return Err(ValidationError {
            step_id: unresolved.first().copied(),
            kind: ValidationErrorKind::Cycle(unresolved),
        });
    }

    Ok(order)
}

fn resolve_actions(
    plan: &Plan,
    catalog: &Catalog,
) -> Result<HashMap<StepId, ResolvedAction>, ValidationError> {
    let mut actions = HashMap::with_capacity(plan.steps.len());
    for step in &plan.steps {
        let resolved = catalog.resolve(&step.action).ok_or_else(|| {
            ValidationError::at(
                step.step_id,
                ValidationErrorKind::UnknownAction(step.action.clone()),
            )
        })?;
        actions.insert(step.step_id, resolved);
    }

    for step in &plan.steps {
        let resolved = &actions[&step.step_id];
        resolved
            .params_schema
            .validate_object(&step.params)
            .map_err(|v: SchemaViolation| {
                ValidationError::at(
                    step.step_id,
                    ValidationErrorKind::InvalidParams(v.to_string()),
                )
            })?;
        if let Some(skill) = &resolved.skill {
            skill.check_template_args(&step.params).map_err(|reason| {
                ValidationError::at(step.step_id, ValidationErrorKind::InvalidParams(reason))
            })?;
        }
    }

    Ok(actions)
}
