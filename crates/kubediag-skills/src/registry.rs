//! Skill registry
//!
//! The registry is built once from a [`SkillCatalog`] against a
//! [`ToolRegistry`] and is read-only afterwards; share it behind an `Arc`.
//! Building fails on the first inconsistent skill, so a registry that exists
//! is always consistent with its tools.

use crate::error::{Error, Result};
use crate::skill::{template_names, Skill, SkillCatalog, SkillSpec};
use kubediag_tools::{ParamSpec, ParamType, ParamsSchema, ToolRegistry};
use std::collections::HashMap;
use tracing::debug;

/// Immutable skill lookup
#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Skill>,
    /// Declaration order, for stable listings
    order: Vec<String>,
}

impl SkillRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a catalog, checking every skill against the tool registry
    pub fn from_catalog(catalog: SkillCatalog, tools: &ToolRegistry) -> Result<Self> {
        let mut registry = Self::new();
        for spec in catalog.skills {
            let skill = resolve_spec(spec, tools)?;
            if registry.skills.contains_key(&skill.id) {
                return Err(Error::Validation {
                    skill: skill.id,
                    reason: "duplicate skill id".to_string(),
                });
            }
            debug!(skill = %skill.id, tool = %skill.tool, "Registered skill");
            registry.order.push(skill.id.clone());
            registry.skills.insert(skill.id.clone(), skill);
        }
        Ok(registry)
    }

    /// Build from the built-in catalog
    pub fn builtin(tools: &ToolRegistry) -> Result<Self> {
        Self::from_catalog(SkillCatalog::builtin()?, tools)
    }

    /// Get a skill by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Skill> {
        self.skills.get(id)
    }

    /// Check if a skill exists
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    /// All skills, in declaration order
    #[must_use]
    pub fn list(&self) -> Vec<&Skill> {
        self.order.iter().filter_map(|id| self.skills.get(id)).collect()
    }

    /// Skills wrapping a given tool
    #[must_use]
    pub fn for_tool(&self, tool: &str) -> Vec<&Skill> {
        self.list().into_iter().filter(|s| s.tool == tool).collect()
    }

    /// Get skill count
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

fn resolve_spec(spec: SkillSpec, tools: &ToolRegistry) -> Result<Skill> {
    let invalid = |reason: String| Error::Validation {
        skill: spec.id.clone(),
        reason,
    };

    let descriptor = tools.get(&spec.tool).ok_or_else(|| Error::UnknownTool {
        skill: spec.id.clone(),
        tool: spec.tool.clone(),
    })?;

    if descriptor.safety_level.requires_confirmation() {
        if spec.safe {
            return Err(invalid(format!(
                "tool '{}' is confirm_required; skill cannot be declared safe",
                spec.tool
            )));
        }
        if !spec.requires_confirmation {
            return Err(invalid(format!(
                "tool '{}' is confirm_required; skill must require confirmation",
                spec.tool
            )));
        }
    }

    for key in spec.fixed_params.keys() {
        if !descriptor.input_schema.declares(key) {
            return Err(invalid(format!(
                "fixed param '{}' is not declared by tool '{}'",
                key, spec.tool
            )));
        }
    }

    let placeholders = template_names(&spec.fixed_params);
    for name in &placeholders {
        if descriptor.input_schema.declares(name) {
            return Err(invalid(format!(
                "placeholder '{{{{{}}}}}' shadows a param of tool '{}'",
                name, spec.tool
            )));
        }
    }

    let params = match spec.params {
        Some(params) => {
            for name in &placeholders {
                if !params.declares(name) {
                    return Err(invalid(format!(
                        "placeholder '{{{{{}}}}}' is not a declared param",
                        name
                    )));
                }
            }
            for param in params.params() {
                if placeholders.contains(&param.name) {
                    continue;
                }
                if !descriptor.input_schema.declares(&param.name) {
                    return Err(invalid(format!(
                        "param '{}' is not declared by tool '{}'",
                        param.name, spec.tool
                    )));
                }
                if spec.fixed_params.contains_key(&param.name) {
                    return Err(invalid(format!(
                        "param '{}' is both fixed and planner-supplied",
                        param.name
                    )));
                }
            }
            params
        }
        None => {
            let inherited = descriptor
                .input_schema
                .without(spec.fixed_params.keys().map(String::as_str));
            let mut specs = inherited.params().to_vec();
            specs.extend(
                placeholders
                    .iter()
                    .map(|name| ParamSpec::required(name.as_str(), ParamType::String)),
            );
            ParamsSchema::new(specs)
        }
    };

    Ok(Skill {
        name: spec.name.unwrap_or_else(|| spec.id.clone()),
        id: spec.id,
        description: spec.description,
        tool: spec.tool,
        params,
        fixed_params: spec.fixed_params,
        safe: spec.safe,
        requires_confirmation: spec.requires_confirmation,
        examples: spec.examples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> ToolRegistry {
        ToolRegistry::with_builtins()
    }

    fn catalog(yaml: &str) -> SkillCatalog {
        SkillCatalog::parse(yaml).unwrap()
    }

    #[test]
    fn test_builtin_registry() {
        let registry = SkillRegistry::builtin(&tools()).unwrap();
        let skill = registry.get("get_previous_logs").unwrap();
        assert_eq!(skill.tool, "get_pod_logs");
        assert!(!skill.params.declares("previous"));
        assert!(skill.params.declares("pod_name"));
        assert!(!registry.for_tool("get_pod_logs").is_empty());
    }

    #[test]
    fn test_rejects_unknown_tool() {
        let err = SkillRegistry::from_catalog(
            catalog("skills:\n  - id: drain\n    tool: drain_node\n"),
            &tools(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownTool { ref tool, .. } if tool == "drain_node"));
    }

    #[test]
    fn test_rejects_safe_skill_over_gated_tool() {
        let err = SkillRegistry::from_catalog(
            catalog("skills:\n  - id: bounce\n    tool: restart_pod\n    safe: true\n    requires_confirmation: true\n"),
            &tools(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        let err = SkillRegistry::from_catalog(
            catalog("skills:\n  - id: bounce\n    tool: restart_pod\n    safe: false\n"),
            &tools(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_rejects_undeclared_fixed_param() {
        let err = SkillRegistry::from_catalog(
            catalog("skills:\n  - id: logs\n    tool: get_pod_logs\n    fixed_params:\n      follow: true\n"),
            &tools(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref reason, .. } if reason.contains("follow")));
    }

    #[test]
    fn test_templated_skills() {
        let registry = SkillRegistry::builtin(&tools()).unwrap();

        let dns = registry.get("check_dns_resolution").unwrap();
        assert_eq!(dns.template_params(), vec!["hostname"]);
        assert!(dns.params.get("hostname").unwrap().required);
        assert!(dns.params.declares("pod_name"));
        assert!(!dns.params.declares("command"));

        let tcp = registry.get("check_network_connectivity").unwrap();
        assert_eq!(
            tcp.params.get("target_port").unwrap().kind,
            ParamType::Integer
        );
        for id in ["check_processes", "check_memory", "check_filesystem"] {
            assert_eq!(registry.get(id).unwrap().tool, "exec_in_pod", "{id}");
        }

        let err = SkillRegistry::from_catalog(
            catalog("skills:\n  - id: ping\n    tool: exec_in_pod\n    fixed_params:\n      command: \"ping {{pod_name}}\"\n"),
            &tools(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref reason, .. } if reason.contains("shadows")));

        let err = SkillRegistry::from_catalog(
            catalog("skills:\n  - id: ping\n    tool: exec_in_pod\n    params:\n      - name: namespace\n        type: string\n    fixed_params:\n      command: \"ping {{host}}\"\n"),
            &tools(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref reason, .. } if reason.contains("{{host}}")));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = SkillRegistry::from_catalog(
            catalog("skills:\n  - id: pods\n    tool: list_pods\n  - id: pods\n    tool: list_pods\n"),
            &tools(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_list_preserves_declaration_order() {
        let registry = SkillRegistry::from_catalog(
            catalog("skills:\n  - id: zeta\n    tool: list_pods\n  - id: alpha\n    tool: get_events\n"),
            &tools(),
        )
        .unwrap();
        let ids: Vec<_> = registry.list().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert_eq!(registry.get("zeta").unwrap().name, "zeta");
    }
}
