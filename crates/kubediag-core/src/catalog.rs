//! Catalog - unified lookup over skills and tools
//!
//! Plans name an `action`, which is either a skill id or a tool name. Skills
//! win when both exist.

use kubediag_skills::{Skill, SkillRegistry};
use kubediag_tools::{ParamsSchema, ToolCategory, ToolDescriptor, ToolRegistry};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// What an action resolved to
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    /// The action as written in the plan
    pub action: String,
    /// Underlying tool
    pub tool: ToolDescriptor,
    /// Wrapping skill, if the action named one
    pub skill: Option<Skill>,
    /// Schema the planner's params must satisfy
    pub params_schema: ParamsSchema,
    /// Whether each use needs operator approval
    pub requires_confirmation: bool,
}

impl ResolvedAction {
    /// Params actually sent to the tool: step params with skill-fixed params
    /// merged over them
    #[must_use]
    pub fn effective_params(&self, params: &Map<String, Value>) -> Value {
        let params = Value::Object(params.clone());
        match &self.skill {
            Some(skill) => skill.merge_params(&params),
            None => params,
        }
    }

    /// Tool category
    #[must_use]
    pub fn category(&self) -> ToolCategory {
        self.tool.category
    }
}

/// Planner-facing summary of one action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSummary {
    /// Action name to use in a plan
    pub action: String,
    /// Description
    pub description: String,
    /// Underlying tool category
    pub category: ToolCategory,
    /// JSON Schema of the params
    pub params: Value,
    /// Whether operator approval is needed
    pub requires_confirmation: bool,
}

/// Immutable view over the tool and skill registries
#[derive(Debug, Clone)]
pub struct Catalog {
    tools: Arc<ToolRegistry>,
    skills: Arc<SkillRegistry>,
}

impl Catalog {
    /// Create a catalog
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>, skills: Arc<SkillRegistry>) -> Self {
        Self { tools, skills }
    }

    /// Tool registry
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Skill registry
    #[must_use]
    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    /// Resolve an action name
    #[must_use]
    pub fn resolve(&self, action: &str) -> Option<ResolvedAction> {
        if let Some(skill) = self.skills.get(action) {
            let tool = self.tools.get(&skill.tool)?.clone();
            return Some(ResolvedAction {
                action: action.to_string(),
                requires_confirmation: skill.requires_confirmation
                    || tool.safety_level.requires_confirmation(),
                params_schema: skill.params.clone(),
                skill: Some(skill.clone()),
                tool,
            });
        }

        let tool = self.tools.get(action)?.clone();
        Some(ResolvedAction {
            action: action.to_string(),
            requires_confirmation: tool.safety_level.requires_confirmation(),
            params_schema: tool.input_schema.clone(),
            skill: None,
            tool,
        })
    }

    /// Every action a planner may use: skills first, then tools
    #[must_use]
    pub fn summaries(&self) -> Vec<ActionSummary> {
        let skills = self.skills.list().into_iter().filter_map(|skill| {
            let resolved = self.resolve(&skill.id)?;
            Some(ActionSummary {
                action: skill.id.clone(),
                description: skill.description.clone(),
                category: resolved.category(),
                params: resolved.params_schema.to_json_schema(),
                requires_confirmation: resolved.requires_confirmation,
            })
        });
        let tools = self.tools.list().into_iter().map(|tool| ActionSummary {
            action: tool.name.clone(),
            description: tool.description.clone(),
            category: tool.category,
            params: tool.input_schema.to_json_schema(),
            requires_confirmation: tool.safety_level.requires_confirmation(),
        });
        skills.chain(tools).collect()
    }
}
