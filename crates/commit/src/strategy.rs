use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CommitError;
use crate::object::{BusinessObject, CommitOutcome, CommittedDocument, DocumentDraft};

/// Backend-agnostic write boundary.
///
/// One call is one atomic unit: either every object is applied or none is.
#[async_trait]
pub trait CommitStrategy: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn commit(&self, objects: Vec<BusinessObject>) -> Result<CommitOutcome, CommitError>;

    /// Create a single document and return its identifiers.
    async fn commit_document(
        &self,
        draft: DocumentDraft,
    ) -> Result<CommittedDocument, CommitError> {
        draft.validate()?;
        let kind = draft.kind;
        self.commit(vec![BusinessObject::Document(draft)])
            .await?
            .first_created()
            .ok_or_else(|| {
                CommitError::AppliedWithoutIdentifiers(format!(
                    "no identifiers returned for {kind}"
                ))
            })
    }
}

#[async_trait]
impl<T> CommitStrategy for Arc<T>
where
    T: CommitStrategy + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn commit(&self, objects: Vec<BusinessObject>) -> Result<CommitOutcome, CommitError> {
        (**self).commit(objects).await
    }

    async fn commit_document(
        &self,
        draft: DocumentDraft,
    ) -> Result<CommittedDocument, CommitError> {
        (**self).commit_document(draft).await
    }
}
