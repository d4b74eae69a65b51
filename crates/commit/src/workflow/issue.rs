use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use scanbridge_allocation::{DocumentLineAllocation, allocate_in_tiers, group_for_document_creation};
use scanbridge_core::{BinEntry, DomainError, ItemCode, WarehouseCode};
use scanbridge_documents::{
    DocumentCatalog, DocumentType, SourceDocumentResolver, ValidationCode, ValidationResult,
};

use super::commit_groups;
use crate::error::{GroupCommit, WorkflowError};
use crate::object::{DocumentDraft, TargetDocumentKind};
use crate::strategy::CommitStrategy;

/// Stock leaving a warehouse against open demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub item_code: ItemCode,
    pub warehouse: WarehouseCode,
    /// Base units.
    pub quantity: i64,
    pub bins: Vec<(BinEntry, i64)>,
}

/// Issues stock to reserve invoices, sales orders and transfer requests, in
/// that priority.
pub struct IssueWorkflow<C> {
    catalog: C,
    strategy: Arc<dyn CommitStrategy>,
    bin_tracking: bool,
}

impl<C> IssueWorkflow<C>
where
    C: DocumentCatalog + Clone,
{
    pub fn new(catalog: C, strategy: Arc<dyn CommitStrategy>) -> Self {
        Self {
            catalog,
            strategy,
            bin_tracking: false,
        }
    }

    pub fn with_bin_tracking(mut self, enabled: bool) -> Self {
        self.bin_tracking = enabled;
        self
    }

    /// Deliveries for invoice and order demand, stock transfers for transfer
    /// requests. Quantity beyond open demand is rejected with
    /// `ExceedsOpenQuantity`; nothing is written in that case.
    #[instrument(skip(self, request), fields(item = %request.item_code, warehouse = %request.warehouse))]
    pub async fn issue(&self, request: &IssueRequest) -> Result<Vec<GroupCommit>, WorkflowError> {
        if request.quantity <= 0 {
            return Err(DomainError::validation("issue quantity must be positive").into());
        }
        if self.catalog.item(&request.item_code).await?.is_none() {
            return Err(WorkflowError::Rejected(
                ValidationResult::new(ValidationCode::NotFound, "item not found")
                    .with("item", &request.item_code),
            ));
        }

        let resolver = SourceDocumentResolver::new(self.catalog.clone());
        let targets = resolver
            .resolve_issue_targets(&request.item_code, &request.warehouse)
            .await?;
        let allocation = allocate_in_tiers(&targets, request.quantity);
        if allocation.remainder > 0 {
            return Err(WorkflowError::Rejected(
                ValidationResult::new(
                    ValidationCode::ExceedsOpenQuantity,
                    "quantity exceeds open demand",
                )
                .with("requested", request.quantity)
                .with("open", allocation.allocated()),
            ));
        }
        debug!(links = allocation.links.len(), "issue allocated");

        let mut line = DocumentLineAllocation::new(
            request.item_code.clone(),
            request.warehouse.clone(),
            request.quantity,
        )
        .with_bins(request.bins.iter().copied());
        for link in allocation.links {
            line = line.linked_to(link);
        }
        line.validate(self.bin_tracking)?;

        let mut drafts = Vec::new();
        for (group, group_lines) in group_for_document_creation([line]) {
            let Some(source) = group.source() else {
                return Err(DomainError::invariant("issue line without demand document").into());
            };
            let draft = match source.doc_type {
                DocumentType::TransferRequest => DocumentDraft::from_group(
                    TargetDocumentKind::StockTransfer,
                    group,
                    &group_lines,
                )?,
                _ => {
                    let card_code = self
                        .catalog
                        .document_header(source.doc_type, source.doc_entry)
                        .await?
                        .and_then(|h| h.card_code);
                    DocumentDraft::from_group(TargetDocumentKind::Delivery, group, &group_lines)?
                        .with_card(card_code)
                }
            };
            drafts.push((group, draft));
        }

        commit_groups(self.strategy.as_ref(), drafts).await
    }
}
