use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use scanbridge_allocation::BinAllocations;
use scanbridge_core::{BinEntry, DomainError, ItemCode, UnitOfMeasure, WarehouseCode, units};
use scanbridge_documents::{DocumentCatalog, ValidationCode, ValidationResult};

use crate::error::WorkflowError;
use crate::object::{CommittedDocument, DocumentDraft, DraftLine, TargetDocumentKind};
use crate::strategy::CommitStrategy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub item_code: ItemCode,
    /// Counted quantity in `unit`; zero is a valid count.
    pub quantity: i64,
    pub unit: UnitOfMeasure,
    pub bin: Option<BinEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountingRequest {
    pub warehouse: WarehouseCode,
    pub counts: Vec<CountEntry>,
}

/// Posts a stock count as one inventory counting document.
pub struct CountingWorkflow<C> {
    catalog: C,
    strategy: Arc<dyn CommitStrategy>,
}

impl<C: DocumentCatalog> CountingWorkflow<C> {
    pub fn new(catalog: C, strategy: Arc<dyn CommitStrategy>) -> Self {
        Self { catalog, strategy }
    }

    /// Counted quantities are posted in base units, one line per item and bin.
    #[instrument(skip(self, request), fields(warehouse = %request.warehouse, counts = request.counts.len()))]
    pub async fn record(&self, request: &CountingRequest) -> Result<CommittedDocument, WorkflowError> {
        let mut draft = DocumentDraft::new(TargetDocumentKind::InventoryCounting);

        for count in &request.counts {
            if count.quantity < 0 {
                return Err(DomainError::validation(format!(
                    "{}: counted quantity cannot be negative",
                    count.item_code
                ))
                .into());
            }
            let Some(item) = self.catalog.item(&count.item_code).await? else {
                return Err(WorkflowError::Rejected(
                    ValidationResult::new(ValidationCode::NotFound, "item not found")
                        .with("item", &count.item_code),
                ));
            };
            let quantity = units::to_base(count.quantity, count.unit, &item.factors)?;

            let existing = draft
                .lines
                .iter_mut()
                .find(|l| l.item_code == count.item_code && l.bins.keys().next() == count.bin.as_ref());
            match existing {
                Some(line) => {
                    line.quantity += quantity;
                    if let Some(bin) = count.bin {
                        line.bins.insert(bin, line.quantity);
                    }
                }
                None => draft.push_line(DraftLine {
                    item_code: count.item_code.clone(),
                    warehouse: Some(request.warehouse.clone()),
                    quantity,
                    unit: UnitOfMeasure::Base,
                    base_line: None,
                    bins: count
                        .bin
                        .map(|bin| BinAllocations::from([(bin, quantity)]))
                        .unwrap_or_default(),
                }),
            }
        }

        if draft.lines.is_empty() {
            return Err(DomainError::validation("count has no lines").into());
        }
        Ok(self.strategy.commit_document(draft).await?)
    }
}
