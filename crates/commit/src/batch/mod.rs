//! Atomic batch strategy.
//!
//! The whole unit of work is sent as one batch request that the ERP applies
//! all-or-nothing. Only the top-level success flag decides the outcome;
//! sub-responses are read solely to pick up created identifiers.

mod payload;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use scanbridge_core::DocEntry;

use crate::error::{CommitError, RemoteFault};
use crate::object::{BusinessObject, CommitOutcome, CommittedDocument};
use crate::strategy::CommitStrategy;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl BatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchMethod::Get => "GET",
            BatchMethod::Post => "POST",
            BatchMethod::Patch => "PATCH",
            BatchMethod::Delete => "DELETE",
        }
    }
}

/// One request inside a batch, addressed relative to the service root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub method: BatchMethod,
    /// `Resource` or `Resource(key)`.
    pub path: String,
    pub body: Option<Value>,
}

impl BatchOperation {
    pub fn new(method: BatchMethod, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    /// Operation that writes `object`.
    pub fn for_object(object: &BusinessObject) -> Self {
        payload::operation_for(object)
    }

    /// Resource name without the key segment.
    pub fn resource(&self) -> &str {
        self.path
            .split_once('(')
            .map_or(self.path.as_str(), |(resource, _)| resource)
    }
}

/// Ordered, non-empty list of operations submitted as one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    operations: Vec<BatchOperation>,
}

impl Batch {
    pub fn new(operations: Vec<BatchOperation>) -> Result<Self, CommitError> {
        if operations.is_empty() {
            return Err(CommitError::InvalidDraft(
                scanbridge_core::DomainError::validation("batch has no operations"),
            ));
        }
        Ok(Self { operations })
    }

    pub fn from_objects(objects: &[BusinessObject]) -> Result<Self, CommitError> {
        Self::new(objects.iter().map(BatchOperation::for_object).collect())
    }

    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Status and body of one sub-operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl SubResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Whether the batch as a whole was applied.
    pub success: bool,
    /// First error the ERP reported, when the batch failed.
    pub error: Option<RemoteFault>,
    /// One entry per submitted operation, in submission order.
    pub responses: Vec<SubResponse>,
}

/// Remote endpoint that applies a batch atomically.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Submit `batch`. Errors are reserved for transport failures; a batch
    /// the ERP refused is an `Ok` response with `success == false`.
    async fn submit(&self, batch: &Batch) -> Result<BatchResponse, CommitError>;
}

#[async_trait]
impl<T> BatchTransport for Arc<T>
where
    T: BatchTransport + ?Sized,
{
    async fn submit(&self, batch: &Batch) -> Result<BatchResponse, CommitError> {
        (**self).submit(batch).await
    }
}

/// Commits by submitting one atomic batch per unit of work.
///
/// Stateless per call; unrelated commits may run concurrently. A failed
/// batch is not retried: resubmitting it is not idempotent.
pub struct BatchStrategy<T> {
    transport: T,
}

impl<T: BatchTransport> BatchStrategy<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: BatchTransport> CommitStrategy for BatchStrategy<T> {
    fn name(&self) -> &'static str {
        "batch"
    }

    async fn commit(&self, objects: Vec<BusinessObject>) -> Result<CommitOutcome, CommitError> {
        if objects.is_empty() {
            return Ok(CommitOutcome::default());
        }

        let batch = Batch::from_objects(&objects)?;
        debug!(operations = batch.len(), "submitting batch");
        let response = self.transport.submit(&batch).await?;

        if !response.success {
            let Some(fault) = response.error else {
                return Err(CommitError::MalformedResponse(
                    "batch failed without an error description".into(),
                ));
            };
            warn!(code = fault.code, description = %fault.description, "batch rejected");
            return Err(CommitError::remote(fault));
        }

        read_outcome(&batch, &response)
    }
}

/// Collect created identifiers from a successful batch.
///
/// The batch is already applied here, so unreadable identifiers are
/// reported as [`CommitError::AppliedWithoutIdentifiers`].
fn read_outcome(batch: &Batch, response: &BatchResponse) -> Result<CommitOutcome, CommitError> {
    if response.responses.len() != batch.len() {
        warn!(
            submitted = batch.len(),
            returned = response.responses.len(),
            "batch applied but response count differs"
        );
        return Err(CommitError::AppliedWithoutIdentifiers(format!(
            "{} operations submitted, {} responses returned",
            batch.len(),
            response.responses.len()
        )));
    }

    let mut outcome = CommitOutcome::default();
    for (operation, sub) in batch.operations().iter().zip(&response.responses) {
        match operation.method {
            BatchMethod::Post => outcome.created.push(created_document(operation, sub)?),
            BatchMethod::Patch | BatchMethod::Delete => outcome.updated += 1,
            BatchMethod::Get => {}
        }
    }
    Ok(outcome)
}

fn created_document(
    operation: &BatchOperation,
    sub: &SubResponse,
) -> Result<CommittedDocument, CommitError> {
    let body = sub.body.as_ref();
    let field = |name: &str| body.and_then(|b| b.get(name)).and_then(Value::as_i64);

    match (field("DocEntry"), field("DocNum")) {
        (Some(entry), Some(num)) => Ok(CommittedDocument {
            doc_entry: DocEntry::new(entry),
            doc_num: num,
        }),
        _ => Err(CommitError::AppliedWithoutIdentifiers(format!(
            "{} response ({}) carries no DocEntry/DocNum",
            operation.path, sub.status
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::{InMemoryBatchTransport, InMemoryErp};
    use crate::object::{BarcodeUpdate, DocumentDraft, DraftLine, TargetDocumentKind};
    use scanbridge_allocation::BinAllocations;
    use scanbridge_core::{ItemCode, UnitOfMeasure, WarehouseCode};
    use serde_json::json;

    fn receipt() -> BusinessObject {
        let mut draft = DocumentDraft::new(TargetDocumentKind::GoodsReceipt);
        draft.push_line(DraftLine {
            item_code: ItemCode::from("SKU1"),
            warehouse: Some(WarehouseCode::from("WH1")),
            quantity: 3,
            unit: UnitOfMeasure::Base,
            base_line: None,
            bins: BinAllocations::new(),
        });
        draft.into()
    }

    fn barcode() -> BusinessObject {
        BarcodeUpdate {
            item_code: ItemCode::from("SKU1"),
            barcode: "123".into(),
        }
        .into()
    }

    /// Transport returning a canned response.
    struct Canned(BatchResponse);

    #[async_trait]
    impl BatchTransport for Canned {
        async fn submit(&self, _batch: &Batch) -> Result<BatchResponse, CommitError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(Batch::new(Vec::new()), Err(CommitError::InvalidDraft(_))));
    }

    #[test]
    fn resource_strips_key() {
        let op = BatchOperation::new(BatchMethod::Patch, "PickLists(12)", None);
        assert_eq!(op.resource(), "PickLists");
        let op = BatchOperation::new(BatchMethod::Post, "DeliveryNotes", None);
        assert_eq!(op.resource(), "DeliveryNotes");
    }

    #[tokio::test]
    async fn successful_batch_yields_created_identifiers() {
        let erp = InMemoryErp::new();
        let strategy = BatchStrategy::new(InMemoryBatchTransport::new(erp.clone()));

        let outcome = strategy.commit(vec![receipt(), barcode()]).await.unwrap();

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].doc_num, 100_001);
        assert_eq!(outcome.updated, 1);
        assert_eq!(erp.records().len(), 2);
    }

    #[tokio::test]
    async fn failed_batch_applies_nothing_and_keeps_description() {
        let erp = InMemoryErp::new();
        erp.reject_resource("Items", RemoteFault::new(-1116, "Barcode already exists"));
        let strategy = BatchStrategy::new(InMemoryBatchTransport::new(erp.clone()));

        let err = strategy.commit(vec![receipt(), barcode()]).await.unwrap_err();

        assert_eq!(err.remote_description(), Some("Barcode already exists"));
        assert!(erp.records().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_ignores_sub_response_codes() {
        let strategy = BatchStrategy::new(Canned(BatchResponse {
            success: false,
            error: Some(RemoteFault::new(-5002, "Quantity falls into negative inventory")),
            responses: vec![SubResponse::new(201, Some(json!({ "DocEntry": 9, "DocNum": 9 })))],
        }));

        let err = strategy.commit(vec![receipt()]).await.unwrap_err();
        assert!(matches!(err, CommitError::RemoteRejected { .. }));
    }

    #[tokio::test]
    async fn missing_identifiers_are_reported_as_applied() {
        let strategy = BatchStrategy::new(Canned(BatchResponse {
            success: true,
            error: None,
            responses: vec![SubResponse::new(201, Some(json!({ "DocEntry": 9 })))],
        }));

        let err = strategy.commit(vec![receipt()]).await.unwrap_err();
        assert!(matches!(err, CommitError::AppliedWithoutIdentifiers(_)));
        assert!(err.was_applied());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn failure_without_description_is_not_applied() {
        let strategy = BatchStrategy::new(Canned(BatchResponse {
            success: false,
            error: None,
            responses: Vec::new(),
        }));

        let err = strategy.commit(vec![receipt()]).await.unwrap_err();
        assert!(matches!(err, CommitError::MalformedResponse(_)));
        assert!(!err.was_applied());
    }

    #[tokio::test]
    async fn response_count_mismatch_is_reported_as_applied() {
        let strategy = BatchStrategy::new(Canned(BatchResponse {
            success: true,
            error: None,
            responses: Vec::new(),
        }));

        let err = strategy.commit(vec![barcode()]).await.unwrap_err();
        assert!(matches!(err, CommitError::AppliedWithoutIdentifiers(_)));
    }

    #[tokio::test]
    async fn unreachable_transport_is_retryable() {
        let erp = InMemoryErp::new();
        erp.set_reachable(false);
        let strategy = BatchStrategy::new(InMemoryBatchTransport::new(erp));

        let err = strategy.commit(vec![receipt()]).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
