//! Registry - Tool catalog and bindings
//!
//! The registry holds two things: the read-only [`ToolDescriptor`] catalog
//! that planners and validators reason about, and the [`Tool`] bindings
//! supplied by a cluster backend that actually perform the calls. A
//! descriptor may exist without a binding (the plan can still be validated);
//! invoking an unbound tool fails permanently.

use crate::error::{Error, Result};
use crate::schema::ParamsSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What a tool does to the target cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// Read resource state
    Query,
    /// Read container logs
    Logs,
    /// Run a whitelisted read-only command inside a workload
    Debug,
    /// Mutate the cluster
    Operate,
}

impl ToolCategory {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Logs => "logs",
            Self::Debug => "debug",
            Self::Operate => "operate",
        }
    }

    /// Whether tools of this category have side effects on the cluster
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        matches!(self, Self::Operate)
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safety classification of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// May run without operator involvement
    Safe,
    /// Needs an explicit operator approval per step
    ConfirmRequired,
}

impl SafetyLevel {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::ConfirmRequired => "confirm_required",
        }
    }

    /// Check if confirmation is required for this level
    #[must_use]
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::ConfirmRequired)
    }
}

/// Tool metadata and schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Tool category
    pub category: ToolCategory,
    /// Declared input parameters
    #[serde(default)]
    pub input_schema: ParamsSchema,
    /// Safety classification
    pub safety_level: SafetyLevel,
}

impl ToolDescriptor {
    /// Create a descriptor; the safety level follows the category
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
    ) -> Self {
        let safety_level = if category.has_side_effects() {
            SafetyLevel::ConfirmRequired
        } else {
            SafetyLevel::Safe
        };
        Self {
            name: name.into(),
            description: description.into(),
            category,
            input_schema: ParamsSchema::default(),
            safety_level,
        }
    }

    /// Set the input schema
    #[must_use]
    pub fn with_schema(mut self, schema: ParamsSchema) -> Self {
        self.input_schema = schema;
        self
    }

    /// Override the safety level
    #[must_use]
    pub fn with_safety_level(mut self, safety_level: SafetyLevel) -> Self {
        self.safety_level = safety_level;
        self
    }

    /// Enforce the tool collaborator contract: read categories are safe,
    /// `operate` is confirm-required.
    pub fn check_contract(&self) -> Result<()> {
        match (self.category, self.safety_level) {
            (ToolCategory::Operate, SafetyLevel::ConfirmRequired) => Ok(()),
            (ToolCategory::Operate, SafetyLevel::Safe) => Err(Error::Registration(format!(
                "operate tool '{}' must be confirm_required",
                self.name
            ))),
            (_, SafetyLevel::Safe) => Ok(()),
            (category, SafetyLevel::ConfirmRequired) => Err(Error::Registration(format!(
                "{} tool '{}' is side-effect free and must be declared safe",
                category, self.name
            ))),
        }
    }
}

/// Session context handed to every tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    /// Environment name the call targets
    pub environment: String,
    /// Opaque connection reference (kubeconfig path, context name, ...)
    pub connection_ref: String,
}

/// Result of a successful tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Observation returned by the tool (text or structured)
    pub output: serde_json::Value,
    /// Execution duration in milliseconds
    pub duration_ms: u64,
}

/// Tool collaborator: performs one call against the target cluster
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with given params
    async fn invoke(&self, params: serde_json::Value, ctx: &ToolContext)
        -> Result<serde_json::Value>;
}

/// Registry for tool descriptors and their bindings
#[derive(Default)]
pub struct ToolRegistry {
    descriptors: HashMap<String, ToolDescriptor>,
    bindings: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("descriptors", &self.descriptors.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in Kubernetes descriptors
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in crate::builtins::descriptors() {
            // built-in descriptors satisfy the contract by construction
            if let Err(e) = registry.register_descriptor(descriptor) {
                tracing::error!(error = %e, "Skipping invalid built-in descriptor");
            }
        }
        registry
    }

    /// Register a descriptor
    pub fn register_descriptor(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        descriptor.check_contract()?;
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(Error::Registration(format!(
                "tool '{}' already registered",
                descriptor.name
            )));
        }
        debug!(tool = %descriptor.name, category = %descriptor.category, "Registering tool");
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Bind an implementation to a registered descriptor
    pub fn bind(&mut self, name: &str, tool: Arc<dyn Tool>) -> Result<()> {
        if !self.descriptors.contains_key(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        debug!(tool = %name, "Binding tool implementation");
        self.bindings.insert(name.to_string(), tool);
        Ok(())
    }

    /// Get a tool descriptor by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.get(name)
    }

    /// Get a tool binding by name
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.bindings.get(name).cloned()
    }

    /// Check if a tool exists
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Whether a descriptor has an implementation bound
    #[must_use]
    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// List all descriptors, sorted by name
    #[must_use]
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        let mut all: Vec<_> = self.descriptors.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// List tools by category
    #[must_use]
    pub fn list_by_category(&self, category: ToolCategory) -> Vec<&ToolDescriptor> {
        self.list()
            .into_iter()
            .filter(|d| d.category == category)
            .collect()
    }

    /// Get tool count
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
