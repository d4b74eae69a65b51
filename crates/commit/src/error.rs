//! Commit-side error model.
//!
//! Coded validation outcomes never appear here; they travel as
//! `ValidationResult` values. Everything below is an infrastructure or
//! remote fault, and the remote description is always kept verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scanbridge_allocation::GroupKey;
use scanbridge_core::DomainError;
use scanbridge_documents::{CatalogError, DocumentSetValidation, ValidationResult};

use crate::object::CommittedDocument;

/// Error reported by the ERP, as the ERP worded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub code: i64,
    pub description: String,
}

impl RemoteFault {
    pub fn new(code: i64, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl core::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}) {}", self.code, self.description)
    }
}

/// What happened to the open transaction after a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackOutcome {
    RolledBack,
    Failed(String),
}

impl core::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RollbackOutcome::RolledBack => f.write_str("rolled back"),
            RollbackOutcome::Failed(msg) => write!(f, "rollback failed: {msg}"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CommitError {
    /// The entity a write refers to does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Session not connected, transport unreachable (retryable).
    #[error("connection unavailable: {0}")]
    TransientConnection(String),

    /// The ERP refused the write. Never retried automatically.
    #[error("remote system rejected the operation: {}", .fault.description)]
    RemoteRejected {
        fault: RemoteFault,
        rollback: Option<RollbackOutcome>,
    },

    /// The ERP answered with something that could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The draft handed to the strategy is not postable.
    #[error("invalid draft: {0}")]
    InvalidDraft(#[from] DomainError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The ERP applied the write but its reply lacks the created
    /// identifiers. The write must not be repeated.
    #[error("applied without readable identifiers: {0}")]
    AppliedWithoutIdentifiers(String),

    /// The blocking session task did not run to completion.
    #[error("session task failed: {0}")]
    Internal(String),

    /// A failure inside a session transaction and the rollback that followed.
    #[error("{source} ({rollback})")]
    AfterRollback {
        source: Box<CommitError>,
        rollback: RollbackOutcome,
    },
}

impl CommitError {
    pub fn remote(fault: RemoteFault) -> Self {
        Self::RemoteRejected {
            fault,
            rollback: None,
        }
    }

    /// The failure itself, without any rollback wrapper.
    pub fn root(&self) -> &CommitError {
        match self {
            CommitError::AfterRollback { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self.root() {
            CommitError::TransientConnection(_) => true,
            CommitError::Catalog(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the ERP state changed despite the error.
    pub fn was_applied(&self) -> bool {
        matches!(self.root(), CommitError::AppliedWithoutIdentifiers(_))
    }

    /// Original ERP error text, unmodified.
    pub fn remote_description(&self) -> Option<&str> {
        match self.root() {
            CommitError::RemoteRejected { fault, .. } => Some(&fault.description),
            _ => None,
        }
    }

    /// Record the rollback that followed this failure.
    pub fn with_rollback(self, outcome: RollbackOutcome) -> Self {
        match self {
            CommitError::RemoteRejected { fault, .. } => CommitError::RemoteRejected {
                fault,
                rollback: Some(outcome),
            },
            CommitError::AfterRollback { source, .. } => CommitError::AfterRollback {
                source,
                rollback: outcome,
            },
            other => CommitError::AfterRollback {
                source: Box::new(other),
                rollback: outcome,
            },
        }
    }

    pub fn rollback(&self) -> Option<&RollbackOutcome> {
        match self {
            CommitError::RemoteRejected { rollback, .. } => rollback.as_ref(),
            CommitError::AfterRollback { rollback, .. } => Some(rollback),
            _ => None,
        }
    }
}

/// One group that was posted before a workflow stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCommit {
    pub group: GroupKey,
    pub document: CommittedDocument,
}

#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// A scan or pick failed an admission check; nothing was written.
    #[error("rejected with code {}: {}", .0.code().code(), .0.message())]
    Rejected(ValidationResult),

    /// The declared document set failed classification; nothing was written.
    #[error("declared document set rejected")]
    DocumentSetRejected(DocumentSetValidation),

    /// Nothing was written.
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// `applied_group` was written but its identifiers are unknown, so the
    /// workflow stopped there. Never re-run that group blindly.
    #[error("group {applied_group} was applied without identifiers after {} group(s) were committed: {source}", .committed.len())]
    UnconfirmedCommit {
        committed: Vec<GroupCommit>,
        applied_group: GroupKey,
        #[source]
        source: CommitError,
    },

    /// Earlier groups were posted before a later group failed. They are not
    /// compensated: reconcile manually or re-run only the failed groups.
    #[error("group {failed_group} failed after {} group(s) were committed: {source}", .committed.len())]
    PartialBatchFailure {
        committed: Vec<GroupCommit>,
        failed_group: GroupKey,
        #[source]
        source: CommitError,
    },
}

impl From<CatalogError> for WorkflowError {
    fn from(value: CatalogError) -> Self {
        WorkflowError::Commit(CommitError::Catalog(value))
    }
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        WorkflowError::Commit(CommitError::InvalidDraft(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_description_is_preserved_verbatim() {
        let raw = "  (-5002) Quantity falls into negative inventory  [DLN1.Quantity][line: 1]";
        let err = CommitError::remote(RemoteFault::new(-5002, raw))
            .with_rollback(RollbackOutcome::RolledBack);

        assert_eq!(err.remote_description(), Some(raw));
        assert!(err.to_string().ends_with(raw));
        assert_eq!(err.rollback(), Some(&RollbackOutcome::RolledBack));
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_connection_faults_are_retryable() {
        assert!(CommitError::TransientConnection("down".into()).is_retryable());
        assert!(CommitError::Catalog(CatalogError::Unavailable("x".into())).is_retryable());
        assert!(!CommitError::Catalog(CatalogError::Query("x".into())).is_retryable());
        assert!(!CommitError::MalformedResponse("x".into()).is_retryable());
    }

    #[test]
    fn every_failure_keeps_its_rollback_outcome() {
        for err in [
            CommitError::NotFound("item SKU9".into()),
            CommitError::MalformedResponse("x".into()),
            CommitError::InvalidDraft(DomainError::validation("no lines")),
            CommitError::Internal("join".into()),
            CommitError::TransientConnection("reset".into()),
        ] {
            let wrapped = err
                .clone()
                .with_rollback(RollbackOutcome::Failed("still locked".into()));

            assert_eq!(
                wrapped.rollback(),
                Some(&RollbackOutcome::Failed("still locked".into()))
            );
            assert_eq!(wrapped.root().to_string(), err.to_string());
            assert_eq!(wrapped.is_retryable(), err.is_retryable());
            assert!(wrapped.to_string().contains("rollback failed: still locked"));
        }
    }

    #[test]
    fn applied_writes_are_flagged() {
        let err = CommitError::AppliedWithoutIdentifiers("no DocNum".into())
            .with_rollback(RollbackOutcome::RolledBack);
        assert!(err.was_applied());
        assert!(!CommitError::MalformedResponse("x".into()).was_applied());
    }
}
