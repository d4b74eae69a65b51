use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use scanbridge_allocation::{
    DocumentLineAllocation, GroupKey, allocate_in_whole_units, group_for_document_creation,
};
use scanbridge_core::{
    BinEntry, CardCode, DocEntry, DomainError, ItemCode, LineNum, UnitOfMeasure, WarehouseCode,
    units,
};
use scanbridge_documents::{
    DocumentCatalog, DocumentRef, DocumentType, ReceiptScope, ReceiptTarget,
    SourceDocumentResolver, ValidationChain,
};

use super::commit_groups;
use crate::error::{CommitError, GroupCommit, WorkflowError};
use crate::object::{DocumentDraft, TargetDocumentKind};
use crate::strategy::CommitStrategy;

/// One scanned receipt line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptScan {
    pub item_code: ItemCode,
    /// `None` when the item code was typed instead of scanned.
    pub barcode: Option<String>,
    /// Quantity in `unit` as entered by the operator.
    pub quantity: i64,
    pub unit: UnitOfMeasure,
    /// Bin deltas in base units.
    pub bins: Vec<(BinEntry, i64)>,
}

impl ReceiptScan {
    pub fn new(item_code: ItemCode, quantity: i64) -> Self {
        Self {
            item_code,
            barcode: None,
            quantity,
            unit: UnitOfMeasure::Base,
            bins: Vec::new(),
        }
    }

    pub fn scanned(mut self, barcode: &str) -> Self {
        self.barcode = Some(barcode.to_string());
        self
    }

    pub fn in_unit(mut self, unit: UnitOfMeasure) -> Self {
        self.unit = unit;
        self
    }

    pub fn into_bin(mut self, bin: BinEntry, quantity: i64) -> Self {
        self.bins.push((bin, quantity));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptRequest {
    pub warehouse: WarehouseCode,
    pub scope: ReceiptScope,
    pub card_code: Option<CardCode>,
    /// Documents the operator selected; empty for an open receipt.
    pub declared: Vec<DocumentRef>,
    pub scans: Vec<ReceiptScan>,
}

impl GoodsReceiptRequest {
    pub fn target(&self) -> ReceiptTarget {
        ReceiptTarget {
            scope: self.scope,
            card_code: self.card_code.clone(),
            documents: self.declared.iter().map(|d| d.doc_entry).collect(),
        }
    }
}

/// Receives scanned goods against purchase documents.
pub struct GoodsReceiptWorkflow<C> {
    catalog: C,
    strategy: Arc<dyn CommitStrategy>,
    bin_tracking: bool,
}

impl<C> GoodsReceiptWorkflow<C>
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

    /// Require every line to be fully allocated to bins.
    pub fn with_bin_tracking(mut self, enabled: bool) -> Self {
        self.bin_tracking = enabled;
        self
    }

    /// Validate, allocate FIFO across source tiers and post one document per
    /// source document, plus one generic receipt for unmatched quantity.
    #[instrument(
        skip(self, request),
        fields(warehouse = %request.warehouse, scans = request.scans.len())
    )]
    pub async fn receive(
        &self,
        request: &GoodsReceiptRequest,
    ) -> Result<Vec<GroupCommit>, WorkflowError> {
        let resolver = SourceDocumentResolver::new(self.catalog.clone());
        let chain = ValidationChain::new(self.catalog.clone());
        let target = request.target();

        if !request.declared.is_empty() {
            let set = resolver
                .validate_document_set(&request.warehouse, request.scope, &request.declared)
                .await?;
            if !set.is_accepted() {
                return Err(WorkflowError::DocumentSetRejected(set));
            }
        }

        // Open quantity already claimed by earlier scans of this request.
        let mut claimed: HashMap<(DocumentType, DocEntry, LineNum), i64> = HashMap::new();
        let mut lines = Vec::with_capacity(request.scans.len());

        for scan in &request.scans {
            if scan.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "{}: quantity must be positive",
                    scan.item_code
                ))
                .into());
            }

            let verdict = chain
                .validate_add_item(
                    &scan.item_code,
                    scan.barcode.as_deref(),
                    &request.warehouse,
                    &target,
                )
                .await?;
            if !verdict.is_ok() {
                return Err(WorkflowError::Rejected(verdict));
            }

            let item = self
                .catalog
                .item(&scan.item_code)
                .await?
                .ok_or_else(|| CommitError::NotFound(scan.item_code.to_string()))?;
            let quantity = units::to_base(scan.quantity, scan.unit, &item.factors)?;

            let mut candidates = resolver
                .resolve_receipt_sources(
                    &scan.item_code,
                    &request.warehouse,
                    scan.unit,
                    request.scope,
                    request.card_code.as_ref(),
                    &target.documents,
                )
                .await?;
            for candidate in &mut candidates {
                let key = (candidate.doc_type, candidate.doc_entry, candidate.line_num);
                candidate.open_quantity -= claimed.get(&key).copied().unwrap_or(0);
            }
            candidates.retain(|c| c.open_quantity > 0);

            let allocation =
                allocate_in_whole_units(&candidates, quantity, item.factors.factor(scan.unit));
            debug!(
                item = %scan.item_code,
                quantity,
                allocated = allocation.allocated(),
                unmatched = allocation.remainder,
                "receipt line allocated"
            );

            let mut line = DocumentLineAllocation::new(
                scan.item_code.clone(),
                request.warehouse.clone(),
                quantity,
            )
            .in_unit(scan.unit, item.factors)
            .with_bins(scan.bins.iter().copied());
            for link in allocation.links {
                *claimed
                    .entry((link.doc_type, link.doc_entry, link.line_num))
                    .or_insert(0) += link.consumed;
                line = line.linked_to(link);
            }
            line.validate(self.bin_tracking)?;
            lines.push(line);
        }

        let mut drafts = Vec::new();
        for (group, group_lines) in group_for_document_creation(lines) {
            let draft = match group {
                GroupKey::Source(_) => {
                    DocumentDraft::from_group(TargetDocumentKind::GoodsReceiptPo, group, &group_lines)?
                        .with_card(request.card_code.clone())
                }
                GroupKey::NoSource => {
                    DocumentDraft::from_group(TargetDocumentKind::GoodsReceipt, group, &group_lines)?
                }
            };
            drafts.push((group, draft));
        }

        commit_groups(self.strategy.as_ref(), drafts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::{InMemoryErp, InMemorySession};
    use crate::session::{SessionContext, StatefulSessionStrategy};
    use chrono::{TimeZone, Utc};
    use scanbridge_core::ItemUnitFactors;
    use scanbridge_documents::{DocumentLineRecord, InMemoryCatalog, ItemMaster, ValidationCode};

    fn catalog() -> Arc<InMemoryCatalog> {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert_item(ItemMaster {
            item_code: ItemCode::from("SKU1"),
            primary_barcode: Some("4000001".into()),
            alternate_barcodes: Vec::new(),
            purchasable: true,
            factors: ItemUnitFactors::new(12, 6).unwrap(),
        });
        for (entry, minutes, qty) in [(500, 0, 8), (501, 10, 100)] {
            catalog.insert_line(
                DocumentLineRecord::open(
                    DocumentType::PurchaseOrder,
                    DocEntry::new(entry),
                    LineNum::new(0),
                    ItemCode::from("SKU1"),
                    WarehouseCode::from("WH1"),
                    qty,
                    Utc.with_ymd_and_hms(2024, 3, 1, 8, minutes, 0).unwrap(),
                )
                .with_card(CardCode::from("V100")),
            );
        }
        catalog
    }

    fn workflow(erp: &InMemoryErp) -> GoodsReceiptWorkflow<Arc<InMemoryCatalog>> {
        let strategy = StatefulSessionStrategy::new(SessionContext::new(InMemorySession::new(
            erp.clone(),
        )));
        GoodsReceiptWorkflow::new(catalog(), Arc::new(strategy))
    }

    fn request(scans: Vec<ReceiptScan>) -> GoodsReceiptRequest {
        GoodsReceiptRequest {
            warehouse: WarehouseCode::from("WH1"),
            scope: ReceiptScope::All,
            card_code: Some(CardCode::from("V100")),
            declared: Vec::new(),
            scans,
        }
    }

    #[tokio::test]
    async fn fifo_allocation_posts_one_document_per_purchase_order() {
        let erp = InMemoryErp::new();
        let committed = workflow(&erp)
            .receive(&request(vec![ReceiptScan::new(ItemCode::from("SKU1"), 10)]))
            .await
            .unwrap();

        assert_eq!(committed.len(), 2);
        let receipts = erp.records_for("PurchaseDeliveryNotes");
        assert_eq!(receipts[0].payload["DocumentLines"][0]["BaseEntry"], 500);
        assert_eq!(receipts[0].payload["DocumentLines"][0]["Quantity"], 8);
        assert_eq!(receipts[1].payload["DocumentLines"][0]["BaseEntry"], 501);
        assert_eq!(receipts[1].payload["DocumentLines"][0]["Quantity"], 2);
    }

    #[tokio::test]
    async fn repeated_scans_do_not_overclaim_a_source_line() {
        let erp = InMemoryErp::new();
        workflow(&erp)
            .receive(&request(vec![
                ReceiptScan::new(ItemCode::from("SKU1"), 6),
                ReceiptScan::new(ItemCode::from("SKU1"), 6),
            ]))
            .await
            .unwrap();

        let first_po: i64 = erp
            .records_for("PurchaseDeliveryNotes")
            .iter()
            .flat_map(|r| r.payload["DocumentLines"].as_array().cloned().unwrap_or_default())
            .filter(|l| l["BaseEntry"] == 500)
            .map(|l| l["Quantity"].as_i64().unwrap())
            .sum();
        assert_eq!(first_po, 8);
    }

    #[tokio::test]
    async fn surplus_posts_as_generic_receipt() {
        let erp = InMemoryErp::new();
        let committed = workflow(&erp)
            .receive(&request(vec![ReceiptScan::new(ItemCode::from("SKU1"), 120)]))
            .await
            .unwrap();

        assert_eq!(committed.len(), 3);
        assert_eq!(committed[2].group, GroupKey::NoSource);
        let generic = erp.records_for("InventoryGenEntries");
        assert_eq!(generic[0].payload["DocumentLines"][0]["Quantity"], 12);
    }

    #[tokio::test]
    async fn buy_units_are_split_across_orders_in_whole_units() {
        let erp = InMemoryErp::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert_item(ItemMaster {
            item_code: ItemCode::from("SKU1"),
            primary_barcode: None,
            alternate_barcodes: Vec::new(),
            purchasable: true,
            factors: ItemUnitFactors::new(12, 6).unwrap(),
        });
        for (entry, minutes, qty) in [(600, 0, 18), (601, 10, 120)] {
            catalog.insert_line(
                DocumentLineRecord::open(
                    DocumentType::PurchaseOrder,
                    DocEntry::new(entry),
                    LineNum::new(0),
                    ItemCode::from("SKU1"),
                    WarehouseCode::from("WH1"),
                    qty,
                    Utc.with_ymd_and_hms(2024, 3, 1, 8, minutes, 0).unwrap(),
                )
                .with_card(CardCode::from("V100"))
                .in_purchase_units(),
            );
        }
        let strategy = StatefulSessionStrategy::new(SessionContext::new(InMemorySession::new(
            erp.clone(),
        )));

        let committed = GoodsReceiptWorkflow::new(catalog, Arc::new(strategy))
            .receive(&request(vec![
                ReceiptScan::new(ItemCode::from("SKU1"), 2).in_unit(UnitOfMeasure::Buy),
            ]))
            .await
            .unwrap();

        assert_eq!(committed.len(), 2);
        let receipts = erp.records_for("PurchaseDeliveryNotes");
        assert_eq!(receipts[0].payload["DocumentLines"][0]["BaseEntry"], 600);
        assert_eq!(receipts[0].payload["DocumentLines"][0]["Quantity"], 1);
        assert_eq!(receipts[1].payload["DocumentLines"][0]["BaseEntry"], 601);
        assert_eq!(receipts[1].payload["DocumentLines"][0]["Quantity"], 1);
    }

    #[tokio::test]
    async fn barcode_mismatch_is_rejected_before_any_write() {
        let erp = InMemoryErp::new();
        let err = workflow(&erp)
            .receive(&request(vec![
                ReceiptScan::new(ItemCode::from("SKU1"), 1).scanned("999"),
            ]))
            .await
            .unwrap_err();

        match err {
            WorkflowError::Rejected(result) => {
                assert_eq!(result.code(), ValidationCode::BarcodeMismatch)
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }
        assert!(erp.journal().is_empty());
    }

    #[tokio::test]
    async fn later_group_failure_reports_committed_groups() {
        let erp = InMemoryErp::new();
        erp.reject_resource(
            "InventoryGenEntries",
            crate::error::RemoteFault::new(-10, "Enter a valid G/L account"),
        );

        let err = workflow(&erp)
            .receive(&request(vec![ReceiptScan::new(ItemCode::from("SKU1"), 120)]))
            .await
            .unwrap_err();

        match err {
            WorkflowError::PartialBatchFailure {
                committed,
                failed_group,
                source,
            } => {
                assert_eq!(committed.len(), 2);
                assert_eq!(failed_group, GroupKey::NoSource);
                assert_eq!(source.remote_description(), Some("Enter a valid G/L account"));
            }
            other => panic!("Expected PartialBatchFailure, got {other:?}"),
        }
        assert_eq!(erp.records_for("PurchaseDeliveryNotes").len(), 2);
    }

    #[tokio::test]
    async fn bin_tracking_requires_full_bin_allocation() {
        let erp = InMemoryErp::new();
        let err = workflow(&erp)
            .with_bin_tracking(true)
            .receive(&request(vec![
                ReceiptScan::new(ItemCode::from("SKU1"), 5).into_bin(BinEntry::new(1), 3),
            ]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Commit(CommitError::InvalidDraft(DomainError::InvariantViolation(_)))
        ));
    }
}
