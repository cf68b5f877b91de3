use super::*;
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_new_request_is_pending() {
    let request = ConfirmationRequest::new(
        4,
        "restart_pod",
        json!({"namespace": "payments", "pod_name": "payments-7f9"}),
        "'restart_pod' changes cluster state",
        Duration::from_secs(300),
    );
    assert!(request.is_pending());
    assert_eq!((request.expires_at - request.created_at).num_seconds(), 300);
    assert!(request.responded_at.is_none());
}

#[tokio::test]
async fn test_approve_wakes_waiter() {
    let manager = Arc::new(ConfirmationManager::new(Duration::from_secs(300)));
    let (request, rx) = manager.create(4, "restart_pod", json!({}), "why").await;

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.wait(request.id, rx).await })
    };

    let resolved = manager.resolve(4, Decision::Approve).await.unwrap();
    assert_eq!(resolved.status, ConfirmationStatus::Approved);
    assert!(resolved.responded_at.is_some());
    assert_eq!(waiter.await.unwrap(), ConfirmationOutcome::Approved);
    assert!(manager.pending().await.is_empty());
}

#[tokio::test]
async fn test_resolved_exactly_once() {
    let manager = ConfirmationManager::default();
    let (_request, _rx) = manager.create(2, "restart_pod", json!({}), "why").await;

    manager.resolve(2, Decision::Deny).await.unwrap();
    assert_eq!(
        manager.resolve(2, Decision::Approve).await.unwrap_err(),
        ConfirmationError::AlreadyResolved(ConfirmationStatus::Denied)
    );
    assert_eq!(
        manager.resolve(9, Decision::Approve).await.unwrap_err(),
        ConfirmationError::NotFound
    );
}

#[tokio::test]
async fn test_deny_outcome() {
    let manager = ConfirmationManager::default();
    let (request, rx) = manager.create(1, "restart_pod", json!({}), "why").await;
    manager.resolve(1, Decision::Deny).await.unwrap();
    assert_eq!(manager.wait(request.id, rx).await, ConfirmationOutcome::Denied);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_expires_request() {
    let manager = ConfirmationManager::new(Duration::from_secs(300));
    let (request, rx) = manager.create(3, "restart_pod", json!({}), "why").await;

    assert_eq!(manager.wait(request.id, rx).await, ConfirmationOutcome::TimedOut);
    assert_eq!(
        manager.get(request.id).await.unwrap().status,
        ConfirmationStatus::Expired
    );
    assert!(matches!(
        manager.resolve(3, Decision::Approve).await,
        Err(ConfirmationError::AlreadyResolved(ConfirmationStatus::Expired))
    ));
}

#[tokio::test]
async fn test_cancel_pending_releases_waiters() {
    let manager = Arc::new(ConfirmationManager::default());
    let (first, rx1) = manager.create(1, "restart_pod", json!({}), "why").await;
    let (_second, _rx2) = manager.create(2, "restart_pod", json!({}), "why").await;
    assert_eq!(manager.pending().await.len(), 2);

    assert_eq!(manager.cancel_pending().await, 2);
    assert_eq!(manager.wait(first.id, rx1).await, ConfirmationOutcome::Cancelled);
    assert_eq!(
        manager.get(first.id).await.unwrap().status,
        ConfirmationStatus::Cancelled
    );

    manager.clear_settled().await;
    assert!(manager.get(first.id).await.is_none());
}
