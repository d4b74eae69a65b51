//! Stateful business-object session strategy.
//!
//! The ERP session is not reentrant and supports one transaction at a time.
//! [`SessionContext`] owns it behind an async mutex: callers wait for the
//! mutex without a timeout, then connect, begin, mutate and commit or roll
//! back while holding it. The blocking session calls run on the blocking
//! pool with the owned guard moved in.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{CommitError, RemoteFault, RollbackOutcome};
use crate::object::{BusinessObject, CommitOutcome, CommittedDocument};
use crate::strategy::CommitStrategy;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connected,
    InTransaction,
}

#[derive(Debug, Clone, Error)]
pub enum SessionFault {
    #[error("session disconnected: {0}")]
    Disconnected(String),

    /// Last error code and description reported by the session.
    #[error("{0}")]
    Remote(RemoteFault),
}

impl From<SessionFault> for CommitError {
    fn from(value: SessionFault) -> Self {
        match value {
            SessionFault::Disconnected(msg) => CommitError::TransientConnection(msg),
            SessionFault::Remote(fault) => CommitError::remote(fault),
        }
    }
}

/// Synchronous business-object session API of the ERP.
pub trait BusinessObjectSession: Send + 'static {
    fn state(&self) -> SessionState;

    /// Connect if not connected yet. Calling it on a connected session is a no-op.
    fn connect(&mut self) -> Result<(), SessionFault>;

    fn begin(&mut self) -> Result<(), SessionFault>;

    fn commit(&mut self) -> Result<(), SessionFault>;

    fn rollback(&mut self) -> Result<(), SessionFault>;

    /// Create a new object and return the key the ERP assigned.
    fn add(&mut self, object: &BusinessObject) -> Result<CommittedDocument, SessionFault>;

    /// Update an existing object in place.
    fn update(&mut self, object: &BusinessObject) -> Result<(), SessionFault>;
}

/// Explicit owner of the single shared session.
pub struct SessionContext<S> {
    session: Arc<Mutex<S>>,
}

impl<S> Clone for SessionContext<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<S: BusinessObjectSession> SessionContext<S> {
    pub fn new(session: S) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Whether no caller currently holds the session.
    pub fn is_idle(&self) -> bool {
        self.session.try_lock().is_ok()
    }

    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state()
    }

    /// Run `work` inside one session transaction.
    ///
    /// Waits for the session without a timeout. On success the transaction
    /// is committed; on any failure, or if `work` panics, it is rolled back
    /// before the session is released.
    pub async fn run_in_transaction<F, T>(&self, work: F) -> Result<T, CommitError>
    where
        F: FnOnce(&mut S) -> Result<T, CommitError> + Send + 'static,
        T: Send + 'static,
    {
        let guard = Arc::clone(&self.session).lock_owned().await;

        tokio::task::spawn_blocking(move || {
            let mut transaction = Transaction::open(guard)?;
            match work(transaction.session()) {
                Ok(value) => transaction.commit().map(|()| value),
                Err(err) => Err(transaction.abort(err)),
            }
        })
        .await
        .map_err(|e| CommitError::Internal(e.to_string()))?
    }
}

/// An open transaction holding the session guard.
///
/// Dropping it while the session is still in a transaction rolls back, so
/// rollback always precedes the guard release.
struct Transaction<S: BusinessObjectSession> {
    guard: OwnedMutexGuard<S>,
}

impl<S: BusinessObjectSession> Transaction<S> {
    fn open(mut guard: OwnedMutexGuard<S>) -> Result<Self, CommitError> {
        if guard.state() == SessionState::Disconnected {
            debug!("connecting business-object session");
            guard.connect()?;
        }
        if guard.state() == SessionState::InTransaction {
            warn!("session still in a transaction from an earlier caller; rolling back");
            guard.rollback()?;
        }
        guard.begin()?;
        Ok(Self { guard })
    }

    fn session(&mut self) -> &mut S {
        &mut self.guard
    }

    fn commit(mut self) -> Result<(), CommitError> {
        match self.guard.commit() {
            Ok(()) => Ok(()),
            Err(fault) => Err(self.abort(fault.into())),
        }
    }

    fn abort(mut self, err: CommitError) -> CommitError {
        let outcome = self.rollback();
        warn!(error = %err, rollback = %outcome, "session transaction aborted");
        err.with_rollback(outcome)
    }

    fn rollback(&mut self) -> RollbackOutcome {
        if self.guard.state() != SessionState::InTransaction {
            return RollbackOutcome::RolledBack;
        }
        match self.guard.rollback() {
            Ok(()) => RollbackOutcome::RolledBack,
            Err(fault) => RollbackOutcome::Failed(fault.to_string()),
        }
    }
}

impl<S: BusinessObjectSession> Drop for Transaction<S> {
    fn drop(&mut self) {
        if self.guard.state() == SessionState::InTransaction {
            let outcome = self.rollback();
            warn!(rollback = %outcome, "transaction abandoned before completion");
        }
    }
}

/// Commits through the single shared stateful session.
pub struct StatefulSessionStrategy<S> {
    context: SessionContext<S>,
}

impl<S: BusinessObjectSession> StatefulSessionStrategy<S> {
    pub fn new(context: SessionContext<S>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &SessionContext<S> {
        &self.context
    }
}

#[async_trait]
impl<S: BusinessObjectSession> CommitStrategy for StatefulSessionStrategy<S> {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn commit(&self, objects: Vec<BusinessObject>) -> Result<CommitOutcome, CommitError> {
        if objects.is_empty() {
            return Ok(CommitOutcome::default());
        }

        let outcome = self
            .context
            .run_in_transaction(move |session| {
                let mut outcome = CommitOutcome::default();
                for object in &objects {
                    debug!(object = %object.describe(), "writing business object");
                    if object.is_creation() {
                        outcome.created.push(session.add(object)?);
                    } else {
                        session.update(object)?;
                        outcome.updated += 1;
                    }
                }
                Ok(outcome)
            })
            .await?;

        debug!(
            created = outcome.created.len(),
            updated = outcome.updated,
            "session transaction committed"
        );
        Ok(outcome)
    }
}
