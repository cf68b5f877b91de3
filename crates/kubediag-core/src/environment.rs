//! Environments - target cluster scope of a diagnosis session
//!
//! An environment is loaded once, selected once per session and then shared
//! read-only as `Arc<Environment>`.

use crate::error::{Error, Result};
use glob::Pattern;
use kubediag_tools::ToolContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One environment as written in the registry document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Unique environment id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Namespace globs the session may touch; omitted means every namespace
    #[serde(default = "default_patterns")]
    pub namespace_patterns: Vec<String>,
    /// Opaque connection reference for tool bindings
    pub connection_ref: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Namespace planners fall back to when the problem names none
    #[serde(default)]
    pub default_namespace: Option<String>,
}

fn default_patterns() -> Vec<String> {
    vec!["*".to_string()]
}

/// A resolved, immutable environment
#[derive(Debug, Clone)]
pub struct Environment {
    /// Environment id
    pub name: String,
    /// Display name
    pub display_name: String,
    /// Connection reference
    pub connection_ref: String,
    /// Namespace globs as written
    pub namespace_patterns: Vec<String>,
    /// Description
    pub description: Option<String>,
    /// Default namespace
    pub default_namespace: Option<String>,
    compiled: Vec<Pattern>,
}

impl Environment {
    /// Build from a spec, compiling the namespace globs
    pub fn from_spec(spec: EnvironmentSpec) -> Result<Self> {
        let compiled = spec
            .namespace_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    Error::Configuration(format!(
                        "environment '{}': invalid namespace pattern '{}': {}",
                        spec.id, p, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            display_name: spec.display_name.unwrap_or_else(|| spec.id.clone()),
            name: spec.id,
            connection_ref: spec.connection_ref,
            namespace_patterns: spec.namespace_patterns,
            description: spec.description,
            default_namespace: spec.default_namespace,
            compiled,
        })
    }

    /// Whether a namespace falls inside this environment's scope.
    /// An empty pattern list allows nothing.
    #[must_use]
    pub fn allows_namespace(&self, namespace: &str) -> bool {
        self.compiled.iter().any(|p| p.matches(namespace))
    }

    /// Context handed to tool bindings
    #[must_use]
    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            environment: self.name.clone(),
            connection_ref: self.connection_ref.clone(),
        }
    }
}

/// Immutable set of known environments
#[derive(Debug, Clone, Default)]
pub struct EnvironmentRegistry {
    environments: HashMap<String, Arc<Environment>>,
    order: Vec<String>,
}

impl EnvironmentRegistry {
    /// Build from parsed specs
    pub fn from_specs(specs: Vec<EnvironmentSpec>) -> Result<Self> {
        let mut registry = Self::default();
        for spec in specs {
            if registry.environments.contains_key(&spec.id) {
                return Err(Error::Configuration(format!(
                    "duplicate environment id '{}'",
                    spec.id
                )));
            }
            let env = Environment::from_spec(spec)?;
            debug!(environment = %env.name, patterns = ?env.namespace_patterns, "Loaded environment");
            registry.order.push(env.name.clone());
            registry.environments.insert(env.name.clone(), Arc::new(env));
        }
        Ok(registry)
    }

    /// Parse a YAML registry document (a list of environments)
    pub fn from_yaml(content: &str) -> Result<Self> {
        let specs: Vec<EnvironmentSpec> = serde_yaml::from_str(content)
            .map_err(|e| Error::Configuration(format!("environment registry: {}", e)))?;
        Self::from_specs(specs)
    }

    /// Read and parse a registry file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Select the environment for a session
    pub fn select(&self, id: &str) -> Result<Arc<Environment>> {
        self.environments
            .get(id)
            .cloned()
            .ok_or_else(|| Error::EnvironmentNotFound(id.to_string()))
    }

    /// All environments in document order
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Environment>> {
        self.order
            .iter()
            .filter_map(|id| self.environments.get(id).cloned())
            .collect()
    }

    /// Number of environments
    #[must_use]
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}
