//! Business objects written to the ERP.
//!
//! A [`BusinessObject`] is what both commit strategies receive: the stateful
//! session adds or updates it, the batch strategy turns it into one batch
//! operation.

use serde::{Deserialize, Serialize};

use scanbridge_allocation::{BinAllocations, DocumentLineAllocation, GroupKey};
use scanbridge_core::{
    CardCode, DocEntry, DomainError, DomainResult, ItemCode, LineNum, PickListId, UnitOfMeasure,
    WarehouseCode, units,
};
use scanbridge_documents::{DocumentRef, DocumentType, PickStatus};

/// Kind of ERP document a draft is posted as.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDocumentKind {
    /// Goods receipt copied from purchase documents.
    GoodsReceiptPo,
    /// Generic goods receipt without a source document.
    GoodsReceipt,
    Delivery,
    StockTransfer,
    InventoryCounting,
}

impl TargetDocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetDocumentKind::GoodsReceiptPo => "goods_receipt_po",
            TargetDocumentKind::GoodsReceipt => "goods_receipt",
            TargetDocumentKind::Delivery => "delivery",
            TargetDocumentKind::StockTransfer => "stock_transfer",
            TargetDocumentKind::InventoryCounting => "inventory_counting",
        }
    }

    /// Whether every line must copy from a base document line.
    pub fn requires_source(self) -> bool {
        matches!(
            self,
            TargetDocumentKind::GoodsReceiptPo | TargetDocumentKind::Delivery
        )
    }
}

impl core::fmt::Display for TargetDocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base document line a draft line copies from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseLine {
    pub doc_type: DocumentType,
    pub doc_entry: DocEntry,
    pub line_num: LineNum,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftLine {
    pub item_code: ItemCode,
    /// `None` lets the ERP take the warehouse from the base line.
    pub warehouse: Option<WarehouseCode>,
    /// Quantity in `unit`.
    pub quantity: i64,
    pub unit: UnitOfMeasure,
    pub base_line: Option<BaseLine>,
    /// Base units.
    pub bins: BinAllocations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub kind: TargetDocumentKind,
    pub source: Option<DocumentRef>,
    pub card_code: Option<CardCode>,
    pub from_warehouse: Option<WarehouseCode>,
    pub lines: Vec<DraftLine>,
}

impl DocumentDraft {
    pub fn new(kind: TargetDocumentKind) -> Self {
        Self {
            kind,
            source: None,
            card_code: None,
            from_warehouse: None,
            lines: Vec::new(),
        }
    }

    /// Build the draft for one group of allocated lines.
    ///
    /// Each source link becomes one draft line copying from its base line;
    /// unlinked quantity becomes a line without a base. Quantities are
    /// converted into the line's destination unit by integer division.
    pub fn from_group(
        kind: TargetDocumentKind,
        group: GroupKey,
        lines: &[DocumentLineAllocation],
    ) -> DomainResult<Self> {
        let mut draft = Self::new(kind);
        draft.source = group.source();
        if kind == TargetDocumentKind::StockTransfer {
            draft.from_warehouse = lines.first().map(|l| l.warehouse.clone());
        }

        for line in lines {
            for portion in line.portions() {
                let base_line = match (&portion.link, group.source()) {
                    (Some(link), Some(doc)) if link.document() == doc => Some(BaseLine {
                        doc_type: link.doc_type,
                        doc_entry: link.doc_entry,
                        line_num: link.line_num,
                    }),
                    (None, _) if !kind.requires_source() => None,
                    _ => {
                        return Err(DomainError::invariant(format!(
                            "{}: portion does not belong to group {group}",
                            line.item_code
                        )));
                    }
                };

                let quantity = units::from_base(portion.quantity, line.unit, &line.factors);
                if quantity <= 0 {
                    return Err(DomainError::validation(format!(
                        "{}: {} base units is less than one {:?} unit",
                        line.item_code, portion.quantity, line.unit
                    )));
                }

                let warehouse = if kind == TargetDocumentKind::StockTransfer && base_line.is_some() {
                    None
                } else {
                    Some(line.warehouse.clone())
                };

                draft.lines.push(DraftLine {
                    item_code: line.item_code.clone(),
                    warehouse,
                    quantity,
                    unit: line.unit,
                    base_line,
                    bins: portion.bins,
                });
            }
        }

        draft.validate()?;
        Ok(draft)
    }

    pub fn with_card(mut self, card_code: Option<CardCode>) -> Self {
        self.card_code = card_code;
        self
    }

    pub fn with_from_warehouse(mut self, warehouse: WarehouseCode) -> Self {
        self.from_warehouse = Some(warehouse);
        self
    }

    pub fn push_line(&mut self, line: DraftLine) {
        self.lines.push(line);
    }

    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::validation(format!("{} has no lines", self.kind)));
        }
        // A count of zero is a valid stock count.
        let minimum = i64::from(self.kind != TargetDocumentKind::InventoryCounting);
        if self.lines.iter().any(|l| l.quantity < minimum) {
            return Err(DomainError::validation(format!(
                "{} has a non-positive line quantity",
                self.kind
            )));
        }
        if self.kind == TargetDocumentKind::StockTransfer && self.from_warehouse.is_none() {
            return Err(DomainError::validation("stock transfer needs a source warehouse"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickLineUpdate {
    pub line_num: LineNum,
    pub released_quantity: i64,
    pub picked_quantity: i64,
    pub status: PickStatus,
    pub bins: BinAllocations,
}

/// Reconciled quantities for the touched lines of one pick list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickListUpdate {
    pub pick_list: PickListId,
    pub lines: Vec<PickLineUpdate>,
}

/// Alternate barcode to register on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeUpdate {
    pub item_code: ItemCode,
    pub barcode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum BusinessObject {
    Document(DocumentDraft),
    PickList(PickListUpdate),
    ItemBarcode(BarcodeUpdate),
}

impl BusinessObject {
    /// Documents are created; everything else updates an existing object.
    pub fn is_creation(&self) -> bool {
        matches!(self, BusinessObject::Document(_))
    }

    pub fn describe(&self) -> String {
        match self {
            BusinessObject::Document(d) => format!("{} ({} lines)", d.kind, d.lines.len()),
            BusinessObject::PickList(p) => format!("pick list {}", p.pick_list),
            BusinessObject::ItemBarcode(b) => format!("barcode for {}", b.item_code),
        }
    }
}

impl From<DocumentDraft> for BusinessObject {
    fn from(value: DocumentDraft) -> Self {
        BusinessObject::Document(value)
    }
}

impl From<PickListUpdate> for BusinessObject {
    fn from(value: PickListUpdate) -> Self {
        BusinessObject::PickList(value)
    }
}

impl From<BarcodeUpdate> for BusinessObject {
    fn from(value: BarcodeUpdate) -> Self {
        BusinessObject::ItemBarcode(value)
    }
}

/// Identifiers the ERP assigned to a created document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedDocument {
    pub doc_entry: DocEntry,
    pub doc_num: i64,
}

/// Result of one committed unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// Created documents, in submission order.
    pub created: Vec<CommittedDocument>,
    /// Number of updated objects.
    pub updated: usize,
}

impl CommitOutcome {
    pub fn first_created(&self) -> Option<CommittedDocument> {
        self.created.first().copied()
    }
}
