//! Validator property tests

use kubediag_core::{validate, Catalog, Plan, Step, StepId, ValidationErrorKind};
use kubediag_skills::SkillRegistry;
use kubediag_tools::ToolRegistry;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

fn catalog() -> Catalog {
    let tools = ToolRegistry::with_builtins();
    let skills = SkillRegistry::builtin(&tools).unwrap();
    Catalog::new(Arc::new(tools), Arc::new(skills))
}

/// Plan over steps 1..=n with the given dependency sets
fn plan_from(deps: &HashMap<StepId, BTreeSet<StepId>>, n: StepId) -> Plan {
    (1..=n).fold(Plan::new("pods restarting", ""), |plan, id| {
        let step = Step::new(id, "list_pods")
            .with_param("namespace", "payments")
            .depends_on(deps.get(&id).into_iter().flatten().copied());
        plan.with_step(step)
    })
}

/// Forward-only edges: a step may depend on any lower id
fn dag(n: StepId, edges: &[(StepId, StepId)]) -> HashMap<StepId, BTreeSet<StepId>> {
    let mut deps: HashMap<StepId, BTreeSet<StepId>> = HashMap::new();
    for &(a, b) in edges {
        let (a, b) = (a % n + 1, b % n + 1);
        if a != b {
            deps.entry(a.max(b)).or_default().insert(a.min(b));
        }
    }
    deps
}

proptest! {
    /// Property: graphs with an injected cycle are always rejected as cyclic.
    #[test]
    fn prop_injected_cycle_rejected(
        n in 2u32..12,
        edges in prop::collection::vec((0u32..64, 0u32..64), 0..24),
        members in prop::collection::btree_set(0u32..64, 2..6),
    ) {
        let mut deps = dag(n, &edges);
        let cycle: Vec<StepId> = members
            .into_iter()
            .map(|m| m % n + 1)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        prop_assume!(cycle.len() >= 2);
        // each member depends on the next, the last on the first
        for (i, id) in cycle.iter().enumerate() {
            let next = cycle[(i + 1) % cycle.len()];
            deps.entry(*id).or_default().insert(next);
        }

        let err = validate(plan_from(&deps, n), &catalog()).unwrap_err();
        prop_assert!(matches!(err.kind, ValidationErrorKind::Cycle(_)), "got {:?}", err);
    }

    /// Property: forward-only graphs are accepted and ordered dependencies-first.
    #[test]
    fn prop_dag_accepted_in_dependency_order(
        n in 1u32..12,
        edges in prop::collection::vec((0u32..64, 0u32..64), 0..24),
    ) {
        let deps = dag(n, &edges);
        let validated = validate(plan_from(&deps, n), &catalog()).unwrap();

        let position: HashMap<StepId, usize> = validated
            .order()
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        prop_assert_eq!(position.len(), n as usize);
        for (step, requires) in &deps {
            for dep in requires {
                prop_assert!(position[dep] < position[step]);
            }
        }
    }
}
