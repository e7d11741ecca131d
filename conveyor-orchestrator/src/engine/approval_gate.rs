//! Approval Gate
//!
//! Blocks an Approval action until a human approves, rejects, or the request
//! expires. Requests are persisted so that a pending approval survives a
//! restart; the in-memory waiter map only wakes the blocked action early.

use conveyor_core::domain::approval::{ApprovalRequest, ApprovalState, Decision};
use conveyor_core::domain::pipeline::Action;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::engine::handler::RunContext;
use crate::repository::approval_repository;

/// Comment recorded when the owning execution ends before a decision
pub const EXECUTION_STOPPED: &str = "execution stopped";

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval request {0} not found")]
    NotFound(Uuid),

    #[error("approval request {0} has expired")]
    Expired(Uuid),

    #[error("approval request {id} is already {state}")]
    AlreadyResolved { id: Uuid, state: ApprovalState },

    #[error("approval database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of waiting on a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Approved,
    Denied { request_id: Uuid, state: ApprovalState },
    Cancelled,
}

pub struct ApprovalGate {
    pool: SqlitePool,
    default_timeout: Option<Duration>,
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<ApprovalState>>>,
}

impl ApprovalGate {
    pub fn new(pool: SqlitePool, default_timeout: Option<Duration>) -> Self {
        Self {
            pool,
            default_timeout,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Raise (or reattach to) the request of an approval action and block
    /// until it is decided, expires, or the execution is cancelled.
    pub async fn request(
        &self,
        run: &RunContext,
        stage: &str,
        action: &Action,
        timeout: Option<Duration>,
    ) -> Result<GateOutcome, ApprovalError> {
        let request = match approval_repository::find_for_action(
            &self.pool,
            run.execution_id,
            stage,
            &action.name,
        )
        .await?
        {
            Some(existing) => {
                tracing::info!(
                    execution_id = run.execution_id,
                    request_id = %existing.id,
                    "Reattaching to approval request ({})",
                    existing.state
                );
                existing
            }
            None => self.create(run, stage, action, timeout).await?,
        };

        let (tx, rx) = oneshot::channel();
        self.register(request.id, tx);

        // Re-read after registering so a decision made in between is not lost
        let current = approval_repository::find_by_id(&self.pool, request.id)
            .await?
            .ok_or(ApprovalError::NotFound(request.id))?;
        if current.state.is_terminal() {
            self.unregister(request.id);
            return Ok(outcome(current.id, current.state));
        }

        let remaining = current.remaining(chrono::Utc::now());
        let expiry = async {
            match remaining {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            decision = rx => match decision {
                Ok(state) => Ok(outcome(current.id, state)),
                Err(_) => self.settled_state(current.id).await.map(|s| outcome(current.id, s)),
            },
            _ = expiry => {
                self.finish(current.id, ApprovalState::Expired, None)
                    .await
                    .map(|s| outcome(current.id, s))
            }
            _ = run.cancel.cancelled() => {
                self.finish(current.id, ApprovalState::Rejected, Some(EXECUTION_STOPPED))
                    .await
                    .map(|_| GateOutcome::Cancelled)
            }
        };

        self.unregister(current.id);
        result
    }

    /// Record a human decision on a pending request
    pub async fn resolve(
        &self,
        id: Uuid,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let request = approval_repository::find_by_id(&self.pool, id)
            .await?
            .ok_or(ApprovalError::NotFound(id))?;

        match request.state {
            ApprovalState::Pending => {}
            ApprovalState::Expired => return Err(ApprovalError::Expired(id)),
            state => return Err(ApprovalError::AlreadyResolved { id, state }),
        }

        if request.is_expired_at(chrono::Utc::now()) {
            // Deadline passed before the waiter noticed
            if approval_repository::resolve(&self.pool, id, ApprovalState::Expired, None).await? {
                self.notify(id, ApprovalState::Expired);
            }
            return Err(ApprovalError::Expired(id));
        }

        let state = ApprovalState::from(decision);
        if !approval_repository::resolve(&self.pool, id, state, comment.as_deref()).await? {
            // Lost a race with another resolution or the expiry timer
            let current = self.settled_state(id).await?;
            return Err(match current {
                ApprovalState::Expired => ApprovalError::Expired(id),
                state => ApprovalError::AlreadyResolved { id, state },
            });
        }

        tracing::info!(request_id = %id, "Approval request {}", state);
        self.notify(id, state);

        approval_repository::find_by_id(&self.pool, id)
            .await?
            .ok_or(ApprovalError::NotFound(id))
    }

    pub async fn get(&self, id: Uuid) -> Result<ApprovalRequest, ApprovalError> {
        approval_repository::find_by_id(&self.pool, id)
            .await?
            .ok_or(ApprovalError::NotFound(id))
    }

    pub async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        Ok(approval_repository::list_pending(&self.pool).await?)
    }

    async fn create(
        &self,
        run: &RunContext,
        stage: &str,
        action: &Action,
        timeout: Option<Duration>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let now = chrono::Utc::now();
        let timeout = timeout.or(self.default_timeout);
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            execution_id: run.execution_id,
            pipeline_id: run.pipeline_id,
            stage: stage.to_string(),
            action: action.name.clone(),
            state: ApprovalState::Pending,
            requested_at: now,
            expires_at: timeout
                .and_then(|t| chrono::Duration::from_std(t).ok())
                .map(|t| now + t),
            resolved_at: None,
            comment: None,
        };

        approval_repository::create(&self.pool, &request).await?;

        tracing::info!(
            execution_id = run.execution_id,
            request_id = %request.id,
            stage = %stage,
            action = %action.name,
            "Approval requested"
        );

        Ok(request)
    }

    /// Move a pending request to `state`, or report whatever won the race
    async fn finish(
        &self,
        id: Uuid,
        state: ApprovalState,
        comment: Option<&str>,
    ) -> Result<ApprovalState, ApprovalError> {
        if approval_repository::resolve(&self.pool, id, state, comment).await? {
            tracing::info!(request_id = %id, "Approval request {}", state);
            return Ok(state);
        }
        self.settled_state(id).await
    }

    async fn settled_state(&self, id: Uuid) -> Result<ApprovalState, ApprovalError> {
        approval_repository::find_by_id(&self.pool, id)
            .await?
            .map(|r| r.state)
            .ok_or(ApprovalError::NotFound(id))
    }

    fn register(&self, id: Uuid, tx: oneshot::Sender<ApprovalState>) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.insert(id, tx);
        }
    }

    fn unregister(&self, id: Uuid) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&id);
        }
    }

    fn notify(&self, id: Uuid, state: ApprovalState) {
        let waiter = self.waiters.lock().ok().and_then(|mut w| w.remove(&id));
        if let Some(tx) = waiter {
            let _ = tx.send(state);
        }
    }
}

fn outcome(request_id: Uuid, state: ApprovalState) -> GateOutcome {
    match state {
        ApprovalState::Approved => GateOutcome::Approved,
        state => GateOutcome::Denied { request_id, state },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use conveyor_core::domain::pipeline::ActionKind;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn gate(default_timeout: Option<Duration>) -> Arc<ApprovalGate> {
        let pool = db::create_memory_pool().await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        Arc::new(ApprovalGate::new(pool, default_timeout))
    }

    fn run(execution_id: i64) -> RunContext {
        RunContext {
            execution_id,
            pipeline_id: Uuid::new_v4(),
            pipeline_name: "demo".to_string(),
            revision: "r1".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    fn action() -> Action {
        Action::new("Manual", ActionKind::Approval)
    }

    async fn pending_id(gate: &ApprovalGate) -> Uuid {
        loop {
            if let Some(request) = gate.list_pending().await.unwrap().first() {
                return request.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_approve_unblocks_waiter() {
        let gate = gate(None).await;
        let ctx = run(1);

        let waiter = {
            let gate = gate.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { gate.request(&ctx, "Approval", &action(), None).await })
        };

        let id = pending_id(&gate).await;
        let resolved = gate
            .resolve(id, Decision::Approved, Some("ship it".to_string()))
            .await
            .unwrap();

        assert_eq!(resolved.state, ApprovalState::Approved);
        assert_eq!(resolved.comment.as_deref(), Some("ship it"));
        assert_eq!(waiter.await.unwrap().unwrap(), GateOutcome::Approved);
    }

    #[tokio::test]
    async fn test_reject_denies_and_second_resolution_conflicts() {
        let gate = gate(None).await;
        let ctx = run(2);

        let waiter = {
            let gate = gate.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { gate.request(&ctx, "Approval", &action(), None).await })
        };

        let id = pending_id(&gate).await;
        gate.resolve(id, Decision::Rejected, None).await.unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            GateOutcome::Denied {
                request_id: id,
                state: ApprovalState::Rejected
            }
        );

        let again = gate.resolve(id, Decision::Approved, None).await.unwrap_err();
        assert!(matches!(
            again,
            ApprovalError::AlreadyResolved {
                state: ApprovalState::Rejected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_request_expires_and_late_resolution_fails() {
        let gate = gate(None).await;
        let ctx = run(3);

        let outcome = gate
            .request(&ctx, "Approval", &action(), Some(Duration::from_millis(50)))
            .await
            .unwrap();

        let GateOutcome::Denied { request_id, state } = outcome else {
            panic!("expected denial, got {:?}", outcome);
        };
        assert_eq!(state, ApprovalState::Expired);

        let err = gate
            .resolve(request_id, Decision::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::Expired(_)));
    }

    #[tokio::test]
    async fn test_cancel_rejects_pending_request() {
        let gate = gate(None).await;
        let ctx = run(4);

        let waiter = {
            let gate = gate.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { gate.request(&ctx, "Approval", &action(), None).await })
        };

        let id = pending_id(&gate).await;
        ctx.cancel.cancel();

        assert_eq!(waiter.await.unwrap().unwrap(), GateOutcome::Cancelled);
        let request = gate.get(id).await.unwrap();
        assert_eq!(request.state, ApprovalState::Rejected);
        assert_eq!(request.comment.as_deref(), Some(EXECUTION_STOPPED));
    }

    #[tokio::test]
    async fn test_reattach_uses_existing_decision() {
        let gate = gate(None).await;
        let ctx = run(5);

        let waiter = {
            let gate = gate.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { gate.request(&ctx, "Approval", &action(), None).await })
        };
        let id = pending_id(&gate).await;
        gate.resolve(id, Decision::Approved, None).await.unwrap();
        waiter.await.unwrap().unwrap();

        // Same action of the same execution asks again, e.g. after a restart
        let outcome = gate.request(&ctx, "Approval", &action(), None).await.unwrap();
        assert_eq!(outcome, GateOutcome::Approved);
        assert!(gate.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_request() {
        let gate = gate(None).await;
        let err = gate
            .resolve(Uuid::new_v4(), Decision::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound(_)));
    }
}
