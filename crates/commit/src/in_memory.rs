//! In-memory ERP backends for tests and local runs.
//!
//! [`InMemoryErp`] is a shared, inspectable stand-in for the system of
//! record. [`InMemorySession`] and [`InMemoryBatchTransport`] write to it
//! with the same transactional behaviour as their real counterparts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use scanbridge_core::DocEntry;

use crate::batch::{Batch, BatchMethod, BatchOperation, BatchResponse, BatchTransport, SubResponse};
use crate::error::{CommitError, RemoteFault};
use crate::object::{BusinessObject, CommittedDocument};
use crate::session::{BusinessObjectSession, SessionFault, SessionState};

/// One object the ERP accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ErpRecord {
    pub resource: String,
    /// Assigned identifiers for created documents.
    pub document: Option<CommittedDocument>,
    pub payload: Value,
}

#[derive(Debug)]
struct ErpState {
    next_entry: i64,
    records: Vec<ErpRecord>,
    rejections: Vec<(String, RemoteFault)>,
    commit_fault: Option<RemoteFault>,
    rollback_fault: Option<String>,
    reachable: bool,
    latency: Option<Duration>,
    journal: Vec<String>,
    open_transactions: usize,
    max_open_transactions: usize,
}

impl Default for ErpState {
    fn default() -> Self {
        Self {
            next_entry: 1,
            records: Vec::new(),
            rejections: Vec::new(),
            commit_fault: None,
            rollback_fault: None,
            reachable: true,
            latency: None,
            journal: Vec::new(),
            open_transactions: 0,
            max_open_transactions: 0,
        }
    }
}

impl ErpState {
    fn rejection(&self, resource: &str) -> Option<RemoteFault> {
        self.rejections
            .iter()
            .find(|(r, _)| r == resource)
            .map(|(_, fault)| fault.clone())
    }

    fn assign(&mut self) -> CommittedDocument {
        let entry = self.next_entry;
        self.next_entry += 1;
        CommittedDocument {
            doc_entry: DocEntry::new(entry),
            doc_num: 100_000 + entry,
        }
    }
}

/// Shared in-memory system of record.
#[derive(Debug, Clone, Default)]
pub struct InMemoryErp {
    state: Arc<Mutex<ErpState>>,
}

impl InMemoryErp {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ErpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject every write to `resource` (for example `"DeliveryNotes"`).
    pub fn reject_resource(&self, resource: &str, fault: RemoteFault) {
        self.state().rejections.push((resource.to_string(), fault));
    }

    pub fn fail_commit(&self, fault: RemoteFault) {
        self.state().commit_fault = Some(fault);
    }

    pub fn fail_rollback(&self, reason: &str) {
        self.state().rollback_fault = Some(reason.to_string());
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Delay applied to every session write.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    pub fn records(&self) -> Vec<ErpRecord> {
        self.state().records.clone()
    }

    pub fn records_for(&self, resource: &str) -> Vec<ErpRecord> {
        self.state()
            .records
            .iter()
            .filter(|r| r.resource == resource)
            .cloned()
            .collect()
    }

    /// Session calls in the order they were made.
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub fn max_concurrent_transactions(&self) -> usize {
        self.state().max_open_transactions
    }

    fn log(&self, event: &str) {
        self.state().journal.push(event.to_string());
    }
}

/// Stateful session over an [`InMemoryErp`].
///
/// Writes are staged and become visible in the ERP only on commit.
#[derive(Debug)]
pub struct InMemorySession {
    erp: InMemoryErp,
    state: SessionState,
    staged: Vec<ErpRecord>,
}

impl InMemorySession {
    pub fn new(erp: InMemoryErp) -> Self {
        Self {
            erp,
            state: SessionState::Disconnected,
            staged: Vec::new(),
        }
    }

    fn require_transaction(&self) -> Result<(), SessionFault> {
        match self.state {
            SessionState::InTransaction => Ok(()),
            _ => Err(SessionFault::Remote(RemoteFault::new(
                -1,
                "no transaction is active",
            ))),
        }
    }

    fn end_transaction(&mut self) {
        self.staged.clear();
        self.state = SessionState::Connected;
        let mut erp = self.erp.state();
        erp.open_transactions = erp.open_transactions.saturating_sub(1);
    }

    fn stage(
        &mut self,
        object: &BusinessObject,
        action: &str,
    ) -> Result<Option<CommittedDocument>, SessionFault> {
        self.require_transaction()?;
        let operation = BatchOperation::for_object(object);
        let resource = operation.resource().to_string();

        let (latency, rejection) = {
            let erp = self.erp.state();
            (erp.latency, erp.rejection(&resource))
        };
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        if let Some(fault) = rejection {
            self.erp.log(&format!("{action}-failed"));
            return Err(SessionFault::Remote(fault));
        }

        let document = object.is_creation().then(|| self.erp.state().assign());
        self.staged.push(ErpRecord {
            resource,
            document,
            payload: operation.body.unwrap_or(Value::Null),
        });
        self.erp.log(action);
        Ok(document)
    }
}

impl BusinessObjectSession for InMemorySession {
    fn state(&self) -> SessionState {
        self.state
    }

    fn connect(&mut self) -> Result<(), SessionFault> {
        if self.state != SessionState::Disconnected {
            return Ok(());
        }
        if !self.erp.state().reachable {
            return Err(SessionFault::Disconnected("ERP server unreachable".into()));
        }
        self.state = SessionState::Connected;
        self.erp.log("connect");
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SessionFault> {
        match self.state {
            SessionState::Disconnected => {
                return Err(SessionFault::Disconnected("not connected".into()));
            }
            SessionState::InTransaction => {
                return Err(SessionFault::Remote(RemoteFault::new(
                    -1,
                    "transaction already active",
                )));
            }
            SessionState::Connected => {}
        }
        self.state = SessionState::InTransaction;
        {
            let mut erp = self.erp.state();
            erp.open_transactions += 1;
            erp.max_open_transactions = erp.max_open_transactions.max(erp.open_transactions);
        }
        self.erp.log("begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SessionFault> {
        self.require_transaction()?;
        let fault = self.erp.state().commit_fault.clone();
        if let Some(fault) = fault {
            self.erp.log("commit-failed");
            return Err(SessionFault::Remote(fault));
        }
        let staged = std::mem::take(&mut self.staged);
        self.erp.state().records.extend(staged);
        self.end_transaction();
        self.erp.log("commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SessionFault> {
        self.require_transaction()?;
        self.end_transaction();
        let fault = self.erp.state().rollback_fault.clone();
        if let Some(reason) = fault {
            self.erp.log("rollback-failed");
            return Err(SessionFault::Disconnected(reason));
        }
        self.erp.log("rollback");
        Ok(())
    }

    fn add(&mut self, object: &BusinessObject) -> Result<CommittedDocument, SessionFault> {
        self.stage(object, "add")?.ok_or_else(|| {
            SessionFault::Remote(RemoteFault::new(-1, "object type cannot be added"))
        })
    }

    fn update(&mut self, object: &BusinessObject) -> Result<(), SessionFault> {
        self.stage(object, "update").map(|_| ())
    }
}

/// Atomic batch endpoint over an [`InMemoryErp`].
#[derive(Debug, Clone)]
pub struct InMemoryBatchTransport {
    erp: InMemoryErp,
}

impl InMemoryBatchTransport {
    pub fn new(erp: InMemoryErp) -> Self {
        Self { erp }
    }
}

#[async_trait]
impl BatchTransport for InMemoryBatchTransport {
    async fn submit(&self, batch: &Batch) -> Result<BatchResponse, CommitError> {
        let mut erp = self.erp.state();
        if !erp.reachable {
            return Err(CommitError::TransientConnection(
                "batch endpoint unreachable".into(),
            ));
        }

        let failure = batch
            .operations()
            .iter()
            .enumerate()
            .find_map(|(i, op)| erp.rejection(op.resource()).map(|fault| (i, fault)));

        if let Some((index, fault)) = failure {
            // Nothing is applied; the other parts report a failed dependency.
            let responses = batch
                .operations()
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    if i == index {
                        SubResponse::new(
                            400,
                            Some(json!({
                                "error": { "code": fault.code, "message": { "value": fault.description } }
                            })),
                        )
                    } else {
                        SubResponse::new(424, None)
                    }
                })
                .collect();
            return Ok(BatchResponse {
                success: false,
                error: Some(fault),
                responses,
            });
        }

        let mut responses = Vec::with_capacity(batch.len());
        for op in batch.operations() {
            let document = (op.method == BatchMethod::Post).then(|| erp.assign());
            erp.records.push(ErpRecord {
                resource: op.resource().to_string(),
                document,
                payload: op.body.clone().unwrap_or(Value::Null),
            });
            responses.push(match document {
                Some(doc) => SubResponse::new(
                    201,
                    Some(json!({ "DocEntry": doc.doc_entry.get(), "DocNum": doc.doc_num })),
                ),
                None => SubResponse::new(204, None),
            });
        }

        Ok(BatchResponse {
            success: true,
            error: None,
            responses,
        })
    }
}
