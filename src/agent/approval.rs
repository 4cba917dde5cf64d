//! Approval gate for tool calls that need a human decision.
//!
//! The run registers a pending request per call id before announcing it on
//! the event stream, then waits on it. Whoever holds a
//! [`RunController`](super::RunController) resolves it. A request that is not
//! resolved within the timeout is denied.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reason recorded when no decision arrives in time.
pub const TIMEOUT_REASON: &str = "timeout";
/// Reason recorded when the run is cancelled while waiting.
pub const CANCELLED_REASON: &str = "cancelled";

/// Outcome of an approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
}

impl ApprovalDecision {
    pub fn denied(reason: &str) -> Self {
        ApprovalDecision::Denied {
            reason: reason.to_string(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved)
    }

    /// Denial reason, if denied.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ApprovalDecision::Approved => None,
            ApprovalDecision::Denied { reason } => Some(reason),
        }
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalDecision::Approved => write!(f, "approved"),
            ApprovalDecision::Denied { reason } => write!(f, "denied ({})", reason),
        }
    }
}

/// Pending approval requests of one run, keyed by call id.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use agentrun::agent::{ApprovalDecision, ApprovalGate};
///
/// # tokio_test::block_on(async {
/// let gate = ApprovalGate::new();
/// let pending = gate.register("call_1");
/// assert!(gate.resolve("call_1", ApprovalDecision::Approved));
///
/// let decision = gate
///     .wait("call_1", pending, Duration::from_secs(5), &CancellationToken::new())
///     .await;
/// assert!(decision.is_approved());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct ApprovalGate {
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<ApprovalDecision>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a request for `call_id`. Must happen before the request is
    /// announced so an immediate decision is never lost.
    pub fn register(&self, call_id: &str) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending().insert(call_id.to_string(), tx);
        rx
    }

    /// Deliver a decision. Returns `false` if no request is pending for
    /// `call_id` (already decided, timed out, or never requested).
    pub fn resolve(&self, call_id: &str, decision: ApprovalDecision) -> bool {
        let Some(tx) = self.pending().remove(call_id) else {
            debug!(call_id = %call_id, "No pending approval request");
            return false;
        };
        info!(call_id = %call_id, decision = %decision, "Approval decision received");
        tx.send(decision).is_ok()
    }

    /// Call ids currently awaiting a decision, sorted.
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait for the decision on `call_id`.
    ///
    /// A decision that already arrived wins over an expired timeout or a
    /// cancelled run. Timeout resolves to a denial with reason
    /// [`TIMEOUT_REASON`], cancellation to a denial with reason
    /// [`CANCELLED_REASON`]. The request is closed on return.
    pub async fn wait(
        &self,
        call_id: &str,
        receiver: oneshot::Receiver<ApprovalDecision>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let decision = tokio::select! {
            biased;
            decision = receiver => decision.unwrap_or_else(|_| ApprovalDecision::denied(CANCELLED_REASON)),
            _ = cancel.cancelled() => ApprovalDecision::denied(CANCELLED_REASON),
            _ = tokio::time::sleep(timeout) => {
                info!(call_id = %call_id, timeout_secs = timeout.as_secs_f64(), "Approval timed out");
                ApprovalDecision::denied(TIMEOUT_REASON)
            }
        };
        self.pending().remove(call_id);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_decision_before_wait_is_kept() {
        let gate = ApprovalGate::new();
        let rx = gate.register("c1");
        assert!(gate.resolve("c1", ApprovalDecision::denied("no")));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let decision = gate.wait("c1", rx, Duration::ZERO, &cancel).await;
        assert_eq!(decision, ApprovalDecision::denied("no"));
    }

    #[tokio::test]
    async fn test_timeout_denies() {
        let gate = ApprovalGate::new();
        let rx = gate.register("c1");
        let decision = gate
            .wait("c1", rx, Duration::from_millis(10), &CancellationToken::new())
            .await;

        assert_eq!(decision.reason(), Some(TIMEOUT_REASON));
        assert!(gate.pending_ids().is_empty());
        // Late decisions are rejected
        assert!(!gate.resolve("c1", ApprovalDecision::Approved));
    }

    #[tokio::test]
    async fn test_cancel_denies() {
        let gate = ApprovalGate::new();
        let rx = gate.register("c1");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let decision = gate.wait("c1", rx, Duration::from_secs(30), &cancel).await;
        assert_eq!(decision.reason(), Some(CANCELLED_REASON));
    }

    #[tokio::test]
    async fn test_resolve_from_another_task() {
        let gate = Arc::new(ApprovalGate::new());
        let rx = gate.register("c1");
        assert_eq!(gate.pending_ids(), vec!["c1".to_string()]);

        let remote = gate.clone();
        tokio::spawn(async move {
            remote.resolve("c1", ApprovalDecision::Approved);
        });

        let decision = gate
            .wait("c1", rx, Duration::from_secs(30), &CancellationToken::new())
            .await;
        assert!(decision.is_approved());
    }

    #[test]
    fn test_unknown_call_id() {
        let gate = ApprovalGate::new();
        assert!(!gate.resolve("nope", ApprovalDecision::Approved));
    }

    #[test]
    fn test_decision_serde() {
        assert_eq!(
            serde_json::to_string(&ApprovalDecision::Approved).unwrap(),
            r#""approved""#
        );
        assert_eq!(
            serde_json::to_string(&ApprovalDecision::denied("timeout")).unwrap(),
            r#"{"denied":{"reason":"timeout"}}"#
        );
        assert_eq!(ApprovalDecision::denied("x").to_string(), "denied (x)");
    }
}
