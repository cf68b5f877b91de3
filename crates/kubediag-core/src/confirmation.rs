//! Confirmation - operator approval for gated steps
//!
//! Each blocked step gets one [`ConfirmationRequest`] and one `oneshot`
//! resolver. The executor awaits the receiver in its own task; the operator
//! resolves through [`ConfirmationManager::resolve`]. A request is resolved
//! exactly once. An expired request counts as denied.

use crate::plan::StepId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Operator decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Let the step run
    Approve,
    /// Refuse the step
    Deny,
}

/// Status of a confirmation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    /// Waiting for the operator
    Pending,
    /// Operator approved
    Approved,
    /// Operator denied
    Denied,
    /// Nobody answered in time
    Expired,
    /// Session was cancelled while waiting
    Cancelled,
}

/// How a wait for a decision ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Approved
    Approved,
    /// Denied
    Denied,
    /// Timed out
    TimedOut,
    /// Resolver dropped (session cancelled)
    Cancelled,
}

/// A confirmation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Unique request ID
    pub id: Uuid,
    /// Step awaiting the decision
    pub step_id: StepId,
    /// Tool that would run
    pub tool: String,
    /// Effective params it would run with
    pub params: serde_json::Value,
    /// Why approval is needed
    pub rationale: String,
    /// Current status
    pub status: ConfirmationStatus,
    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// When the request expires
    pub expires_at: DateTime<Utc>,
    /// When it was resolved
    pub responded_at: Option<DateTime<Utc>>,
}

impl ConfirmationRequest {
    /// Create a new pending request
    #[must_use]
    pub fn new(
        step_id: StepId,
        tool: impl Into<String>,
        params: serde_json::Value,
        rationale: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            id: Uuid::new_v4(),
            step_id,
            tool: tool.into(),
            params,
            rationale: rationale.into(),
            status: ConfirmationStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            responded_at: None,
        }
    }

    /// Check if the request is still pending
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ConfirmationStatus::Pending
    }

    fn settle(&mut self, status: ConfirmationStatus) {
        if self.is_pending() {
            self.status = status;
            self.responded_at = Some(Utc::now());
        }
    }
}

/// Error from confirmation resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationError {
    /// No request for this step
    NotFound,
    /// Request already resolved, expired or cancelled
    AlreadyResolved(ConfirmationStatus),
}

impl std::fmt::Display for ConfirmationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "confirmation request not found"),
            Self::AlreadyResolved(status) => {
                write!(f, "confirmation request already settled ({:?})", status)
            }
        }
    }
}

impl std::error::Error for ConfirmationError {}

/// Manager for confirmation requests of one session
#[derive(Debug)]
pub struct ConfirmationManager {
    requests: RwLock<HashMap<Uuid, ConfirmationRequest>>,
    resolvers: RwLock<HashMap<Uuid, oneshot::Sender<Decision>>>,
    timeout: Duration,
}

impl Default for ConfirmationManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl ConfirmationManager {
    /// Create a manager whose requests expire after `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            resolvers: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a request. The receiver yields the operator's decision.
    pub async fn create(
        &self,
        step_id: StepId,
        tool: impl Into<String>,
        params: serde_json::Value,
        rationale: impl Into<String>,
    ) -> (ConfirmationRequest, oneshot::Receiver<Decision>) {
        let request = ConfirmationRequest::new(step_id, tool, params, rationale, self.timeout);
        let (tx, rx) = oneshot::channel();

        self.requests
            .write()
            .await
            .insert(request.id, request.clone());
        self.resolvers.write().await.insert(request.id, tx);

        info!(step_id, tool = %request.tool, request_id = %request.id, "Confirmation required");
        (request, rx)
    }

    /// Resolve the pending request of a step
    pub async fn resolve(
        &self,
        step_id: StepId,
        decision: Decision,
    ) -> std::result::Result<ConfirmationRequest, ConfirmationError> {
        let mut requests = self.requests.write().await;

        let mut settled = None;
        let mut pending = None;
        for request in requests.values_mut().filter(|r| r.step_id == step_id) {
            if request.is_pending() {
                pending = Some(request);
                break;
            }
            settled = Some(request.status);
        }

        let request = match (pending, settled) {
            (Some(request), _) => request,
            (None, Some(status)) => return Err(ConfirmationError::AlreadyResolved(status)),
            (None, None) => return Err(ConfirmationError::NotFound),
        };

        request.settle(match decision {
            Decision::Approve => ConfirmationStatus::Approved,
            Decision::Deny => ConfirmationStatus::Denied,
        });
        let resolved = request.clone();
        drop(requests);

        if let Some(tx) = self.resolvers.write().await.remove(&resolved.id) {
            let _ = tx.send(decision);
        }
        debug!(step_id, ?decision, "Confirmation resolved");
        Ok(resolved)
    }

    /// Wait for a decision, treating timeout as denial.
    pub async fn wait(
        &self,
        request_id: Uuid,
        rx: oneshot::Receiver<Decision>,
    ) -> ConfirmationOutcome {
        let outcome = tokio::select! {
            result = rx => match result {
                Ok(Decision::Approve) => ConfirmationOutcome::Approved,
                Ok(Decision::Deny) => ConfirmationOutcome::Denied,
                Err(_) => ConfirmationOutcome::Cancelled,
            },
            _ = tokio::time::sleep(self.timeout) => ConfirmationOutcome::TimedOut,
        };

        if outcome != ConfirmationOutcome::TimedOut {
            return outcome;
        }

        // an answer may have landed between the deadline and this lock
        let mut requests = self.requests.write().await;
        self.resolvers.write().await.remove(&request_id);
        match requests.get_mut(&request_id) {
            Some(request) if request.status == ConfirmationStatus::Approved => {
                ConfirmationOutcome::Approved
            }
            Some(request) if request.status == ConfirmationStatus::Denied => {
                ConfirmationOutcome::Denied
            }
            Some(request) => {
                request.settle(ConfirmationStatus::Expired);
                ConfirmationOutcome::TimedOut
            }
            None => ConfirmationOutcome::TimedOut,
        }
    }

    /// Cancel every pending request; waiters observe `Cancelled`
    pub async fn cancel_pending(&self) -> usize {
        let mut requests = self.requests.write().await;
        let mut resolvers = self.resolvers.write().await;
        let mut count = 0;
        for request in requests.values_mut().filter(|r| r.is_pending()) {
            request.settle(ConfirmationStatus::Cancelled);
            resolvers.remove(&request.id);
            count += 1;
        }
        count
    }

    /// Pending requests, oldest first
    pub async fn pending(&self) -> Vec<ConfirmationRequest> {
        let requests = self.requests.read().await;
        let mut pending: Vec<_> = requests.values().filter(|r| r.is_pending()).cloned().collect();
        pending.sort_by_key(|r| (r.created_at, r.step_id));
        pending
    }

    /// Look up a request by id
    pub async fn get(&self, request_id: Uuid) -> Option<ConfirmationRequest> {
        self.requests.read().await.get(&request_id).cloned()
    }

    /// Forget every settled request (between plan executions)
    pub async fn clear_settled(&self) {
        self.requests.write().await.retain(|_, r| r.is_pending());
    }
}

#[cfg(test)]
mod tests;
