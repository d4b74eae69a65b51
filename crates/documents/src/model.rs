//! ERP document model as seen by the warehouse bridge.
//!
//! These are read-side snapshots of the external system of record. None of
//! them is persisted by the bridge; they are created per query and consumed
//! immediately.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scanbridge_core::{
    BinEntry, CardCode, DocEntry, ItemCode, ItemUnitFactors, LineNum, PickListId, WarehouseCode,
};

/// ERP document types the bridge reads from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    PurchaseOrder,
    PurchaseGoodsReceipt,
    ApInvoice,
    ReserveInvoice,
    SalesOrder,
    TransferRequest,
}

impl DocumentType {
    /// Numeric object type used by the ERP to reference base documents.
    pub fn object_type(self) -> i32 {
        match self {
            DocumentType::PurchaseOrder => 22,
            DocumentType::PurchaseGoodsReceipt => 20,
            DocumentType::ApInvoice => 18,
            DocumentType::ReserveInvoice => 13,
            DocumentType::SalesOrder => 17,
            DocumentType::TransferRequest => 1_250_000_001,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::PurchaseOrder => "purchase_order",
            DocumentType::PurchaseGoodsReceipt => "purchase_goods_receipt",
            DocumentType::ApInvoice => "ap_invoice",
            DocumentType::ReserveInvoice => "reserve_invoice",
            DocumentType::SalesOrder => "sales_order",
            DocumentType::TransferRequest => "transfer_request",
        }
    }
}

impl core::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one ERP document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub doc_type: DocumentType,
    pub doc_entry: DocEntry,
}

impl DocumentRef {
    pub fn new(doc_type: DocumentType, doc_entry: DocEntry) -> Self {
        Self { doc_type, doc_entry }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Open,
    Closed,
}

/// Header-level facts about an ERP document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub doc_type: DocumentType,
    pub doc_entry: DocEntry,
    pub doc_num: i64,
    pub card_code: Option<CardCode>,
    pub status: DocumentStatus,
    pub cancelled: bool,
    /// Reserve/"insured" flag; only meaningful for invoices.
    pub insured: bool,
    /// Service-type document (no stock lines of its own).
    pub service: bool,
    pub created_at: DateTime<Utc>,
}

/// One document line row as returned by the catalog.
///
/// Quantities are in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLineRecord {
    pub doc_type: DocumentType,
    pub doc_entry: DocEntry,
    pub line_num: LineNum,
    pub item_code: ItemCode,
    /// Destination warehouse of the line.
    pub warehouse: WarehouseCode,
    /// Source warehouse (transfer requests only).
    pub from_warehouse: Option<WarehouseCode>,
    pub card_code: Option<CardCode>,
    pub open_quantity: i64,
    /// Whether the line is kept in base units (as opposed to buy/pack units).
    pub uses_base_unit: bool,
    pub status: DocumentStatus,
    pub cancelled: bool,
    pub insured: bool,
    pub service: bool,
    pub created_at: DateTime<Utc>,
}

/// Item master data relevant to scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMaster {
    pub item_code: ItemCode,
    pub primary_barcode: Option<String>,
    pub alternate_barcodes: Vec<String>,
    pub purchasable: bool,
    pub factors: ItemUnitFactors,
}

impl ItemMaster {
    /// Whether `barcode` identifies this item.
    pub fn recognizes(&self, barcode: &str) -> bool {
        barcode == self.item_code.as_str()
            || self.primary_barcode.as_deref() == Some(barcode)
            || self.alternate_barcodes.iter().any(|b| b == barcode)
    }
}

/// Eligible source or target line, ranked by `tier`.
///
/// `open_quantity` is always strictly positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocumentCandidate {
    pub doc_type: DocumentType,
    pub doc_entry: DocEntry,
    pub line_num: LineNum,
    pub open_quantity: i64,
    pub tier: u8,
}

impl SourceDocumentCandidate {
    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(self.doc_type, self.doc_entry)
    }
}

/// Which documents a receipt may be applied against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptScope {
    /// Any open document of the vendor.
    All,
    /// Only the documents the operator declared.
    SelectedDocuments,
    /// Only the declared goods receipts / service invoices.
    SpecificReceipts,
}

/// Receipt target declared by the operator for a scanning session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptTarget {
    pub scope: ReceiptScope,
    pub card_code: Option<CardCode>,
    pub documents: Vec<DocEntry>,
}

impl ReceiptTarget {
    pub fn all(card_code: Option<CardCode>) -> Self {
        Self {
            scope: ReceiptScope::All,
            card_code,
            documents: Vec::new(),
        }
    }
}

/// Outcome of classifying one declared document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentClassification {
    /// No such document.
    Error,
    /// Receipt mode does not match the invoice's insurance flag.
    Rejected,
    /// Nothing left open in this warehouse.
    Warning,
    Open,
    Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickStatus {
    Released,
    PartiallyPicked,
    Picked,
    Closed,
}

/// One pick list line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickListLine {
    pub line_num: LineNum,
    pub source_type: DocumentType,
    pub source_entry: DocEntry,
    pub source_line: LineNum,
    pub item_code: ItemCode,
    pub card_code: Option<CardCode>,
    /// Open quantity of the underlying source line (base units).
    pub source_open_quantity: i64,
    pub released_quantity: i64,
    pub picked_quantity: i64,
    pub status: PickStatus,
    pub bins: BTreeMap<BinEntry, i64>,
}

impl PickListLine {
    /// Quantity that can still be picked against the source line.
    pub fn remaining(&self) -> i64 {
        (self.source_open_quantity - self.picked_quantity).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickList {
    pub id: PickListId,
    pub status: PickStatus,
    pub lines: Vec<PickListLine>,
}

impl PickList {
    pub fn is_closed(&self) -> bool {
        self.status == PickStatus::Closed
    }

    pub fn find_line(
        &self,
        source_type: DocumentType,
        source_entry: DocEntry,
        item_code: &ItemCode,
    ) -> Option<&PickListLine> {
        self.lines.iter().find(|l| {
            l.source_type == source_type && l.source_entry == source_entry && &l.item_code == item_code
        })
    }
}

impl DocumentLineRecord {
    /// Open, base-unit line with no partner or flags set.
    pub fn open(
        doc_type: DocumentType,
        doc_entry: DocEntry,
        line_num: LineNum,
        item_code: ItemCode,
        warehouse: WarehouseCode,
        open_quantity: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            doc_type,
            doc_entry,
            line_num,
            item_code,
            warehouse,
            from_warehouse: None,
            card_code: None,
            open_quantity,
            uses_base_unit: true,
            status: DocumentStatus::Open,
            cancelled: false,
            insured: false,
            service: false,
            created_at,
        }
    }

    pub fn with_card(mut self, card_code: CardCode) -> Self {
        self.card_code = Some(card_code);
        self
    }

    pub fn with_from_warehouse(mut self, warehouse: WarehouseCode) -> Self {
        self.from_warehouse = Some(warehouse);
        self
    }

    pub fn insured(mut self, insured: bool) -> Self {
        self.insured = insured;
        self
    }

    pub fn service(mut self) -> Self {
        self.service = true;
        self
    }

    pub fn in_purchase_units(mut self) -> Self {
        self.uses_base_unit = false;
        self
    }

    pub fn closed(mut self) -> Self {
        self.status = DocumentStatus::Closed;
        self
    }

    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(self.doc_type, self.doc_entry)
    }
}

impl DocumentHeader {
    /// Header matching a line row, numbered like its entry.
    pub fn for_line(row: &DocumentLineRecord) -> Self {
        Self {
            doc_type: row.doc_type,
            doc_entry: row.doc_entry,
            doc_num: row.doc_entry.get(),
            card_code: row.card_code.clone(),
            status: row.status,
            cancelled: row.cancelled,
            insured: row.insured,
            service: row.service,
            created_at: row.created_at,
        }
    }
}
