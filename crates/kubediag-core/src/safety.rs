//! Safety Gate - the single authority on whether a step may run.
//!
//! Evaluation order:
//! 1. namespace (required when the tool takes one, not a system namespace,
//!    inside the environment's patterns)
//! 2. debug commands (whitelisted base command, no dangerous constructs)
//! 3. sensitive resources
//! 4. confirmation for operate tools and confirmation-gated skills
//!
//! Denials are decided before confirmation, so a blocked namespace never
//! produces a confirmation request.

use crate::catalog::{Catalog, ResolvedAction};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::plan::Step;
use kubediag_tools::ToolCategory;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reason a step was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyViolation {
    /// Action is not in the catalog
    UnknownAction(String),
    /// Tool takes a namespace but the step gave none
    MissingNamespace,
    /// Namespace is a protected system namespace
    BlockedNamespace(String),
    /// Namespace is outside the environment's patterns
    NamespaceOutOfScope {
        /// Requested namespace
        namespace: String,
        /// Environment name
        environment: String,
    },
    /// Debug tool called without a command
    MissingCommand,
    /// Base command is not whitelisted
    CommandNotAllowed(String),
    /// Command contains a dangerous construct
    DangerousCommand(String),
    /// Resource is configured as sensitive
    SensitiveResource {
        /// Tool
        tool: String,
        /// Resource name
        name: String,
    },
}

impl std::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAction(a) => write!(f, "unknown action '{}'", a),
            Self::MissingNamespace => write!(f, "namespace is required"),
            Self::BlockedNamespace(ns) => write!(f, "namespace '{}' is blocked", ns),
            Self::NamespaceOutOfScope {
                namespace,
                environment,
            } => write!(
                f,
                "namespace '{}' is outside environment '{}'",
                namespace, environment
            ),
            Self::MissingCommand => write!(f, "command is required"),
            Self::CommandNotAllowed(cmd) => write!(f, "command '{}' is not whitelisted", cmd),
            Self::DangerousCommand(pattern) => {
                write!(f, "command matches dangerous pattern '{}'", pattern)
            }
            Self::SensitiveResource { tool, name } => {
                write!(f, "{} on '{}' touches a sensitive resource", tool, name)
            }
        }
    }
}

impl std::error::Error for SafetyViolation {}

impl SafetyViolation {
    /// Short machine-readable name, used for audit security events
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownAction(_) => "unknown_action",
            Self::MissingNamespace => "namespace_missing",
            Self::BlockedNamespace(_) => "namespace_blocked",
            Self::NamespaceOutOfScope { .. } => "namespace_out_of_scope",
            Self::MissingCommand => "command_missing",
            Self::CommandNotAllowed(_) => "command_rejected",
            Self::DangerousCommand(_) => "command_dangerous",
            Self::SensitiveResource { .. } => "sensitive_resource",
        }
    }
}

/// A resource that must never be read by a diagnosis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveResource {
    /// Tool name
    pub tool: String,
    /// Value of the tool's `name` param; `*` matches every name
    pub name: String,
}

/// Safety policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyPolicy {
    /// System namespaces no step may touch
    #[serde(default = "default_blocked_namespaces")]
    pub blocked_namespaces: Vec<String>,
    /// Base commands debug tools may run
    #[serde(default = "default_exec_commands")]
    pub allowed_exec_commands: Vec<String>,
    /// Regexes that deny a debug command outright
    #[serde(default = "default_dangerous_patterns")]
    pub dangerous_patterns: Vec<String>,
    /// Resources that are always denied
    #[serde(default = "default_sensitive_resources")]
    pub sensitive_resources: Vec<SensitiveResource>,
}

fn default_blocked_namespaces() -> Vec<String> {
    ["kube-system", "kube-public", "kube-node-lease"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_exec_commands() -> Vec<String> {
    [
        "env", "ps", "cat", "ls", "df", "free", "netstat", "ping", "nslookup", "nc", "curl",
        "wget", "top",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_dangerous_patterns() -> Vec<String> {
    [
        r"\|\s*rm\b",
        r"\|\s*dd\b",
        r"&&\s*rm\b",
        r";\s*rm\b",
        r">\s*/etc/",
        r">\s*/var/",
        r">\s*/usr/",
        r"\$\(",
        "`",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_sensitive_resources() -> Vec<SensitiveResource> {
    vec![
        SensitiveResource {
            tool: "get_secret".to_string(),
            name: "*".to_string(),
        },
        SensitiveResource {
            tool: "get_configmap".to_string(),
            name: "kubeconfig".to_string(),
        },
    ]
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            blocked_namespaces: default_blocked_namespaces(),
            allowed_exec_commands: default_exec_commands(),
            dangerous_patterns: default_dangerous_patterns(),
            sensitive_resources: default_sensitive_resources(),
        }
    }
}

/// Result of a gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Step may be dispatched
    Authorized,
    /// Step must not run
    Denied(SafetyViolation),
    /// Step may run once an operator approves it
    NeedsConfirmation {
        /// Why approval is needed
        rationale: String,
    },
}

/// Compiled safety gate
#[derive(Debug, Clone)]
pub struct SafetyGate {
    policy: SafetyPolicy,
    dangerous: Vec<(String, Regex)>,
}

impl SafetyGate {
    /// Compile a policy
    pub fn new(policy: SafetyPolicy) -> Result<Self> {
        let dangerous = policy
            .dangerous_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map(|re| (p.clone(), re))
                    .map_err(|e| {
                        Error::Configuration(format!("invalid dangerous pattern '{}': {}", p, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { policy, dangerous })
    }

    /// The policy in force
    #[must_use]
    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Decide whether a step may run in an environment
    #[must_use]
    pub fn authorize(&self, step: &Step, environment: &Environment, catalog: &Catalog) -> Authorization {
        match catalog.resolve(&step.action) {
            Some(action) => self.authorize_resolved(step, &action, environment),
            None => Authorization::Denied(SafetyViolation::UnknownAction(step.action.clone())),
        }
    }

    /// Same as [`authorize`](Self::authorize) with the action already resolved
    #[must_use]
    pub fn authorize_resolved(
        &self,
        step: &Step,
        action: &ResolvedAction,
        environment: &Environment,
    ) -> Authorization {
        let params = action.effective_params(&step.params);

        if let Err(violation) = self
            .check_namespace(&params, action, environment)
            .and_then(|()| self.check_command(&params, action))
            .and_then(|()| self.check_sensitive(&params, action))
        {
            return Authorization::Denied(violation);
        }

        if action.requires_confirmation {
            let why = if action.category() == ToolCategory::Operate {
                format!("'{}' changes cluster state", action.tool.name)
            } else {
                format!("skill '{}' requires confirmation", action.action)
            };
            let rationale = if step.reason.is_empty() {
                why
            } else {
                format!("{}: {}", why, step.reason)
            };
            return Authorization::NeedsConfirmation { rationale };
        }

        Authorization::Authorized
    }

    fn check_namespace(
        &self,
        params: &Value,
        action: &ResolvedAction,
        environment: &Environment,
    ) -> std::result::Result<(), SafetyViolation> {
        if !action.tool.input_schema.declares("namespace") {
            return Ok(());
        }
        let namespace = params
            .get("namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .ok_or(SafetyViolation::MissingNamespace)?;

        if self.policy.blocked_namespaces.iter().any(|b| b == namespace) {
            return Err(SafetyViolation::BlockedNamespace(namespace.to_string()));
        }
        if !environment.allows_namespace(namespace) {
            return Err(SafetyViolation::NamespaceOutOfScope {
                namespace: namespace.to_string(),
                environment: environment.name.clone(),
            });
        }
        Ok(())
    }

    fn check_command(
        &self,
        params: &Value,
        action: &ResolvedAction,
    ) -> std::result::Result<(), SafetyViolation> {
        if action.category() != ToolCategory::Debug {
            return Ok(());
        }
        let command = params
            .get("command")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(SafetyViolation::MissingCommand)?;

        let base = base_command(command);
        if !self.policy.allowed_exec_commands.iter().any(|c| c == base) {
            return Err(SafetyViolation::CommandNotAllowed(base.to_string()));
        }

        if let Some((pattern, _)) = self.dangerous.iter().find(|(_, re)| re.is_match(command)) {
            return Err(SafetyViolation::DangerousCommand(pattern.clone()));
        }
        Ok(())
    }

    fn check_sensitive(
        &self,
        params: &Value,
        action: &ResolvedAction,
    ) -> std::result::Result<(), SafetyViolation> {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let hit = self
            .policy
            .sensitive_resources
            .iter()
            .find(|r| r.tool == action.tool.name && (r.name == "*" || r.name == name));
        match hit {
            Some(resource) => Err(SafetyViolation::SensitiveResource {
                tool: resource.tool.clone(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// First token of a command line, reduced to its basename
fn base_command(command: &str) -> &str {
    let first = command.split_whitespace().next().unwrap_or("");
    first.rsplit('/').next().unwrap_or(first)
}
