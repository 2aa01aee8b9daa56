//! The persisted-state contract shared by the coordinator and the callback
//! verifier: the `ApprovalRequest` row and its status lifecycle.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending)
    }
}

/// A single outstanding (or resolved) approval decision, one row per
/// dangerous command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub command: String,
    pub danger_reason: String,
    pub severity: Severity,
    pub cwd: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub machine_id: String,
}

impl ApprovalRequest {
    /// Constructs the row as it should look the instant before insertion:
    /// `created_at` is left for the store to stamp, but we need a value to
    /// satisfy the struct, so callers insert this and then trust the
    /// server-returned row (or a locally recorded `Utc::now()` at the call
    /// site — the store is the source of truth either way).
    pub fn new_pending(
        id: Uuid,
        command: String,
        danger_reason: String,
        severity: Severity,
        cwd: String,
        machine_id: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            command,
            danger_reason,
            severity,
            cwd,
            status: Status::Pending,
            created_at,
            resolved_at: None,
            resolved_by: None,
            machine_id,
        }
    }

    /// Row invariant from spec §3: `status = pending` iff both resolution
    /// fields are unset.
    pub fn invariant_holds(&self) -> bool {
        match self.status {
            Status::Pending => self.resolved_at.is_none() && self.resolved_by.is_none(),
            _ => self.resolved_at.is_some(),
        }
    }
}

/// `(identifier, created_at)` rate-limit event rows, keyed by caller
/// identifier (e.g. the webhook caller's IP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEvent {
    pub identifier: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_row_satisfies_invariant() {
        let row = ApprovalRequest::new_pending(
            Uuid::new_v4(),
            "rm -rf /".into(),
            "Recursive force delete from root directory".into(),
            Severity::Critical,
            "/home/dev".into(),
            "a".repeat(16),
            Utc::now(),
        );
        assert!(row.invariant_holds());
    }

    #[test]
    fn resolved_row_without_timestamp_violates_invariant() {
        let mut row = ApprovalRequest::new_pending(
            Uuid::new_v4(),
            "rm -rf /".into(),
            "x".into(),
            Severity::Critical,
            "/".into(),
            "a".repeat(16),
            Utc::now(),
        );
        row.status = Status::Approved;
        assert!(!row.invariant_holds());
    }
}
