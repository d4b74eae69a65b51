//! End-to-end warehouse workflows.
//!
//! Each workflow runs `validate -> resolve -> allocate -> group -> commit`
//! against a [`DocumentCatalog`](scanbridge_documents::DocumentCatalog) and a
//! backend-agnostic [`CommitStrategy`]. Validation failures are returned as
//! [`WorkflowError::Rejected`] and never reach the write side.

mod barcode;
mod counting;
mod issue;
mod picking;
mod receipt;

pub use barcode::BarcodeWorkflow;
pub use counting::{CountEntry, CountingRequest, CountingWorkflow};
pub use issue::{IssueRequest, IssueWorkflow};
pub use picking::{PickEntry, PickRequest, PickingWorkflow};
pub use receipt::{GoodsReceiptRequest, GoodsReceiptWorkflow, ReceiptScan};

use tracing::{info, warn};

use scanbridge_allocation::GroupKey;

use crate::error::{GroupCommit, WorkflowError};
use crate::object::DocumentDraft;
use crate::strategy::CommitStrategy;

/// Commit one document per group, in group order.
///
/// Stops at the first failure. Groups committed before it stay committed
/// and are reported in the error, as is a group the ERP applied without
/// returning its identifiers.
async fn commit_groups(
    strategy: &dyn CommitStrategy,
    drafts: Vec<(GroupKey, DocumentDraft)>,
) -> Result<Vec<GroupCommit>, WorkflowError> {
    let mut committed: Vec<GroupCommit> = Vec::with_capacity(drafts.len());

    for (group, draft) in drafts {
        let kind = draft.kind;
        match strategy.commit_document(draft).await {
            Ok(document) => {
                info!(
                    %group,
                    %kind,
                    doc_entry = %document.doc_entry,
                    doc_num = document.doc_num,
                    backend = strategy.name(),
                    "document committed"
                );
                committed.push(GroupCommit { group, document });
            }
            Err(source) if source.was_applied() => {
                warn!(
                    %group,
                    committed = committed.len(),
                    error = %source,
                    "group applied without identifiers; stopping"
                );
                return Err(WorkflowError::UnconfirmedCommit {
                    committed,
                    applied_group: group,
                    source,
                });
            }
            Err(source) if committed.is_empty() => return Err(WorkflowError::Commit(source)),
            Err(source) => {
                warn!(
                    %group,
                    committed = committed.len(),
                    error = %source,
                    "group failed after earlier groups were committed"
                );
                return Err(WorkflowError::PartialBatchFailure {
                    committed,
                    failed_group: group,
                    source,
                });
            }
        }
    }

    Ok(committed)
}
