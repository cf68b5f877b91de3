//! Audit log - append-only JSONL record of tool calls and security events
//!
//! Write failures are logged and swallowed: a broken audit sink never fails
//! a diagnostic step.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Argument keys whose values are masked
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "key", "credential"];

/// Longest result text kept in a record
pub const MAX_RESULT_CHARS: usize = 1000;

/// Audit sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether records are written at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// JSONL file path
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

fn default_enabled() -> bool {
    true
}

fn default_path() -> PathBuf {
    PathBuf::from("./logs/audit.jsonl")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: default_path(),
        }
    }
}

/// Severity of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Info,
    /// Blocked or suspicious request
    Warning,
    /// Policy breach
    Error,
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    /// A tool was called
    ToolInvocation {
        /// When
        timestamp: DateTime<Utc>,
        /// Session, if any
        session_id: Option<Uuid>,
        /// Environment name
        environment: String,
        /// Tool name
        tool: String,
        /// Masked arguments
        arguments: Value,
        /// Whether the call succeeded
        success: bool,
        /// Truncated output or error text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    /// The safety gate refused something
    SecurityEvent {
        /// When
        timestamp: DateTime<Utc>,
        /// Session, if any
        session_id: Option<Uuid>,
        /// Short event name (e.g. `namespace_blocked`)
        event_type: String,
        /// Severity
        severity: Severity,
        /// Event details
        details: Value,
    },
    /// An operator answered a confirmation
    Confirmation {
        /// When
        timestamp: DateTime<Utc>,
        /// Session, if any
        session_id: Option<Uuid>,
        /// Step id
        step_id: u32,
        /// Tool
        tool: String,
        /// Final status (approved, denied, expired, cancelled)
        outcome: String,
    },
}

/// Append-only audit logger
#[derive(Debug)]
pub struct AuditLogger {
    config: AuditConfig,
    lock: Mutex<()>,
}

impl AuditLogger {
    /// Create a logger
    #[must_use]
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    /// Logger writing to `path`
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::new(AuditConfig {
            enabled: true,
            path: path.into(),
        })
    }

    /// Whether records are written
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Log file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Record a tool invocation
    pub async fn log_invocation(
        &self,
        session_id: Option<Uuid>,
        environment: &str,
        tool: &str,
        arguments: &Value,
        success: bool,
        result: Option<&str>,
    ) {
        if success {
            info!(tool, environment, "AUDIT: tool invoked");
        } else {
            warn!(tool, environment, "AUDIT: tool invocation failed");
        }
        self.append(AuditRecord::ToolInvocation {
            timestamp: Utc::now(),
            session_id,
            environment: environment.to_string(),
            tool: tool.to_string(),
            arguments: mask_sensitive(arguments),
            success,
            result: result.map(|r| truncate_chars(r, MAX_RESULT_CHARS)),
        })
        .await;
    }

    /// Record a security event
    pub async fn log_security_event(
        &self,
        session_id: Option<Uuid>,
        event_type: &str,
        severity: Severity,
        details: Value,
    ) {
        match severity {
            Severity::Error => error!(event_type, %details, "SECURITY"),
            Severity::Warning => warn!(event_type, %details, "SECURITY"),
            Severity::Info => info!(event_type, %details, "SECURITY"),
        }
        self.append(AuditRecord::SecurityEvent {
            timestamp: Utc::now(),
            session_id,
            event_type: event_type.to_string(),
            severity,
            details: mask_sensitive(&details),
        })
        .await;
    }

    /// Record an operator decision
    pub async fn log_confirmation(
        &self,
        session_id: Option<Uuid>,
        step_id: u32,
        tool: &str,
        outcome: &str,
    ) {
        self.append(AuditRecord::Confirmation {
            timestamp: Utc::now(),
            session_id,
            step_id,
            tool: tool.to_string(),
            outcome: outcome.to_string(),
        })
        .await;
    }

    async fn append(&self, record: AuditRecord) {
        if !self.config.enabled {
            return;
        }
        if let Err(e) = self.write_line(&record).await {
            error!(path = %self.config.path.display(), error = %e, "Failed to write audit record");
        }
    }

    async fn write_line(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Last `count` records; unparseable lines are skipped
    pub async fn recent(&self, count: usize) -> Result<Vec<AuditRecord>> {
        let _guard = self.lock.lock().await;
        let content = match tokio::fs::read_to_string(&self.config.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(count);
        Ok(lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

/// Replace the values of sensitive keys with `***`, recursively
#[must_use]
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let masked: Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let lower = k.to_lowercase();
                    let sensitive = SENSITIVE_KEYS.iter().any(|s| lower.contains(s));
                    let v = if sensitive && !is_blank(v) {
                        Value::String("***".to_string())
                    } else {
                        mask_sensitive(v)
                    };
                    (k.clone(), v)
                })
                .collect();
            Value::Object(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        other => other.clone(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        _ => false,
    }
}

/// Cut `text` to `max` chars, marking the cut
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}
