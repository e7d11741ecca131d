//! Approval gate domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::ExecutionId;

/// Pending or resolved manual approval tied to one Approval action instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub pipeline_id: Uuid,
    pub stage: String,
    pub action: String,
    pub state: ApprovalState,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    /// `None` means the request never expires
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub comment: Option<String>,
}

impl ApprovalRequest {
    /// Whether the request is past its deadline at `now`
    pub fn is_expired_at(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self.state {
            ApprovalState::Expired => true,
            ApprovalState::Pending => self.expires_at.is_some_and(|deadline| now >= deadline),
            _ => false,
        }
    }

    /// Time left before expiry, `None` when the request never expires
    pub fn remaining(&self, now: chrono::DateTime<chrono::Utc>) -> Option<std::time::Duration> {
        self.expires_at
            .map(|deadline| (deadline - now).to_std().unwrap_or_default())
    }
}

/// `Pending -> Approved | Rejected | Expired`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalState::Pending => write!(f, "Pending"),
            ApprovalState::Approved => write!(f, "Approved"),
            ApprovalState::Rejected => write!(f, "Rejected"),
            ApprovalState::Expired => write!(f, "Expired"),
        }
    }
}

/// Decision submitted through the resolution API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Rejected,
}

impl From<Decision> for ApprovalState {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => ApprovalState::Approved,
            Decision::Rejected => ApprovalState::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn request(expires_in: Option<Duration>) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            id: Uuid::new_v4(),
            execution_id: 1,
            pipeline_id: Uuid::new_v4(),
            stage: "Approval".to_string(),
            action: "Manual".to_string(),
            state: ApprovalState::Pending,
            requested_at: now,
            expires_at: expires_in.map(|d| now + d),
            resolved_at: None,
            comment: None,
        }
    }

    #[test]
    fn test_pending_request_expires_after_deadline() {
        let req = request(Some(Duration::seconds(10)));
        assert!(!req.is_expired_at(req.requested_at));
        assert!(req.is_expired_at(req.requested_at + Duration::seconds(10)));
    }

    #[test]
    fn test_request_without_deadline_never_expires() {
        let req = request(None);
        assert!(!req.is_expired_at(req.requested_at + Duration::days(365)));
        assert!(req.remaining(Utc::now()).is_none());
    }

    #[test]
    fn test_resolved_request_is_not_expired() {
        let mut req = request(Some(Duration::seconds(1)));
        req.state = ApprovalState::Approved;
        assert!(!req.is_expired_at(req.requested_at + Duration::seconds(5)));
    }

    #[test]
    fn test_remaining_saturates_at_zero() {
        let req = request(Some(Duration::seconds(1)));
        let later = req.requested_at + Duration::seconds(30);
        assert_eq!(req.remaining(later), Some(std::time::Duration::ZERO));
    }
}
