//! Skill definitions and catalog documents

use crate::error::Result;
use kubediag_tools::ParamsSchema;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::LazyLock;

/// Built-in catalog shipped with the crate
pub const DEFAULT_CATALOG: &str = include_str!("../catalog/default.yaml");

/// A named wrapper around a tool with fixed intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Unique skill id (what plans reference as `action`)
    pub id: String,
    /// Display name
    pub name: String,
    /// What the skill is for
    pub description: String,
    /// Tool this skill invokes
    pub tool: String,
    /// Parameters the planner must (or may) supply
    pub params: ParamsSchema,
    /// Parameters merged over the step's params at invocation
    pub fixed_params: Map<String, Value>,
    /// Whether the skill is side-effect free
    pub safe: bool,
    /// Whether each use needs operator approval
    pub requires_confirmation: bool,
    /// Example problem statements the skill fits
    pub examples: Vec<String>,
}

impl Skill {
    /// Merge fixed params over step-supplied params.
    ///
    /// A fixed string may carry `{{name}}` placeholders. They are filled from
    /// the step params, and the params they consume are not passed on to
    /// the tool.
    #[must_use]
    pub fn merge_params(&self, params: &Value) -> Value {
        let empty = Map::new();
        let args = params.as_object().unwrap_or(&empty);
        let mut merged = args.clone();
        for (key, value) in &self.fixed_params {
            let value = match value {
                Value::String(template) => Value::String(render(template, args)),
                other => other.clone(),
            };
            merged.insert(key.clone(), value);
        }
        for name in self.template_params() {
            merged.remove(&name);
        }
        Value::Object(merged)
    }

    /// Names of the placeholders in fixed params, in first-use order
    #[must_use]
    pub fn template_params(&self) -> Vec<String> {
        template_names(&self.fixed_params)
    }

    /// Reject placeholder values that could smuggle shell syntax into a
    /// rendered command. Absent values are left to the schema.
    pub fn check_template_args(
        &self,
        params: &Map<String, Value>,
    ) -> std::result::Result<(), String> {
        for name in self.template_params() {
            let Some(value) = params.get(&name) else {
                continue;
            };
            match argument_text(value) {
                Some(text) if is_safe_argument(&text) => {}
                Some(_) => {
                    return Err(format!(
                        "param '{}' may only hold letters, digits and . _ : / - (no leading -)",
                        name
                    ))
                }
                None => return Err(format!("param '{}' must be a string or a number", name)),
            }
        }
        Ok(())
    }
}

/// Placeholder names across the string values of `fixed`, deduplicated
pub(crate) fn template_names(fixed: &Map<String, Value>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for value in fixed.values() {
        if let Value::String(template) = value {
            for name in placeholders(template) {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names
}

/// `{{name}}` placeholder in a fixed string
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is a valid regex")
});

fn placeholders(template: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
}

fn render(template: &str, args: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            args.get(&caps[1])
                .and_then(argument_text)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn argument_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Host names, IPs, ports and absolute paths; nothing a shell would expand
fn is_safe_argument(text: &str) -> bool {
    !text.is_empty()
        && text.len() <= 253
        && !text.starts_with('-')
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-'))
}

/// One skill as written in a catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSpec {
    /// Unique skill id
    pub id: String,
    /// Display name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Referenced tool
    pub tool: String,
    /// Declared params; omitted means "the tool's schema minus fixed params"
    #[serde(default)]
    pub params: Option<ParamsSchema>,
    /// Fixed params
    #[serde(default)]
    pub fixed_params: Map<String, Value>,
    /// Side-effect free
    #[serde(default = "default_true")]
    pub safe: bool,
    /// Needs operator approval
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Example problem statements
    #[serde(default)]
    pub examples: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Skill catalog document (YAML or JSON)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillCatalog {
    /// Declared skills, in document order
    #[serde(default)]
    pub skills: Vec<SkillSpec>,
}

impl SkillCatalog {
    /// Parse a catalog document. JSON is accepted as a subset of YAML.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a catalog file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// The built-in catalog
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_CATALOG)
    }

    /// Append the skills of another catalog
    pub fn extend(&mut self, other: SkillCatalog) {
        self.skills.extend(other.skills);
    }
}
