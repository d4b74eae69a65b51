//! Transactional commit of allocated warehouse work into the ERP.
//!
//! Two interchangeable [`CommitStrategy`] implementations write the same
//! [`BusinessObject`]s:
//!
//! - [`StatefulSessionStrategy`]: a single-writer, mutex-guarded stateful
//!   session (connect, begin, mutate, commit or rollback).
//! - [`BatchStrategy`]: one atomic multi-operation batch request.
//!
//! The [`workflow`] module wires validation, resolution, grouping and commit
//! together for receipts, issues, picking, counting and barcode registration.

pub mod batch;
pub mod error;
pub mod in_memory;
pub mod object;
pub mod session;
pub mod strategy;
pub mod workflow;

pub use batch::{
    Batch, BatchMethod, BatchOperation, BatchResponse, BatchStrategy, BatchTransport, SubResponse,
};
pub use error::{CommitError, GroupCommit, RemoteFault, RollbackOutcome, WorkflowError};
pub use in_memory::{ErpRecord, InMemoryBatchTransport, InMemoryErp, InMemorySession};
pub use object::{
    BarcodeUpdate, BaseLine, BusinessObject, CommitOutcome, CommittedDocument, DocumentDraft,
    DraftLine, PickLineUpdate, PickListUpdate, TargetDocumentKind,
};
pub use session::{
    BusinessObjectSession, SessionContext, SessionFault, SessionState, StatefulSessionStrategy,
};
pub use strategy::CommitStrategy;
pub use workflow::{
    BarcodeWorkflow, CountEntry, CountingRequest, CountingWorkflow, GoodsReceiptRequest,
    GoodsReceiptWorkflow, IssueRequest, IssueWorkflow, PickEntry, PickRequest, PickingWorkflow,
    ReceiptScan,
};
