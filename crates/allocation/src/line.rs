use serde::{Deserialize, Serialize};

use scanbridge_core::{
    DocEntry, DomainError, DomainResult, ItemCode, ItemUnitFactors, LineNum, UnitOfMeasure,
    WarehouseCode,
};
use scanbridge_documents::{DocumentRef, DocumentType};

use crate::bins::{BinAllocations, bin_pool, merge_bin_allocation, take_bins};

/// Portion of a line applied against one ERP source/target line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub doc_type: DocumentType,
    pub doc_entry: DocEntry,
    pub line_num: LineNum,
    pub consumed: i64,
}

impl SourceLink {
    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(self.doc_type, self.doc_entry)
    }
}

/// Slice of a line that becomes one destination document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePortion {
    pub link: Option<SourceLink>,
    /// Base units.
    pub quantity: i64,
    pub bins: BinAllocations,
}

/// Warehouse-entered quantity of one item, shaped for an ERP document line.
///
/// Built by the caller, mutated only through allocation helpers and handed
/// once to a commit strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLineAllocation {
    pub item_code: ItemCode,
    pub warehouse: WarehouseCode,
    /// Base units.
    pub requested_quantity: i64,
    /// Unit the destination line is declared in.
    pub unit: UnitOfMeasure,
    pub factors: ItemUnitFactors,
    pub source_links: Vec<SourceLink>,
    pub bins: BinAllocations,
}

impl DocumentLineAllocation {
    pub fn new(item_code: ItemCode, warehouse: WarehouseCode, requested_quantity: i64) -> Self {
        Self {
            item_code,
            warehouse,
            requested_quantity,
            unit: UnitOfMeasure::Base,
            factors: ItemUnitFactors::base_only(),
            source_links: Vec::new(),
            bins: BinAllocations::new(),
        }
    }

    pub fn in_unit(mut self, unit: UnitOfMeasure, factors: ItemUnitFactors) -> Self {
        self.unit = unit;
        self.factors = factors;
        self
    }

    pub fn linked_to(mut self, link: SourceLink) -> Self {
        self.source_links.push(link);
        self
    }

    pub fn with_bins<I>(mut self, deltas: I) -> Self
    where
        I: IntoIterator<Item = (scanbridge_core::BinEntry, i64)>,
    {
        self.bins = merge_bin_allocation(std::mem::take(&mut self.bins), deltas);
        self
    }

    /// Document this line posts against; `None` for sourceless lines.
    pub fn source_document(&self) -> Option<DocumentRef> {
        self.source_links.first().map(SourceLink::document)
    }

    pub fn linked_quantity(&self) -> i64 {
        self.source_links.iter().map(|l| l.consumed).sum()
    }

    pub fn binned_quantity(&self) -> i64 {
        self.bins.values().sum()
    }

    /// One portion per source link, then the unlinked remainder if any.
    ///
    /// Bins are distributed in bin order; any surplus stays on the last portion.
    pub fn portions(&self) -> Vec<LinePortion> {
        let mut pool = bin_pool(&self.bins);
        let mut portions: Vec<LinePortion> = self
            .source_links
            .iter()
            .map(|link| LinePortion {
                link: Some(link.clone()),
                quantity: link.consumed,
                bins: take_bins(&mut pool, link.consumed),
            })
            .collect();

        let remainder = self.requested_quantity - self.linked_quantity();
        if remainder > 0 || portions.is_empty() {
            portions.push(LinePortion {
                link: None,
                quantity: remainder.max(0),
                bins: take_bins(&mut pool, remainder),
            });
        }
        if let Some(last) = portions.last_mut() {
            last.bins = merge_bin_allocation(std::mem::take(&mut last.bins), pool);
        }
        portions
    }

    /// Check the line before it is handed to a commit strategy.
    pub fn validate(&self, bin_tracking: bool) -> DomainResult<()> {
        if self.requested_quantity <= 0 {
            return Err(DomainError::validation(format!(
                "{}: requested quantity must be positive",
                self.item_code
            )));
        }
        if self.source_links.iter().any(|l| l.consumed <= 0) {
            return Err(DomainError::validation(format!(
                "{}: source links must consume a positive quantity",
                self.item_code
            )));
        }
        if self.linked_quantity() > self.requested_quantity {
            return Err(DomainError::invariant(format!(
                "{}: linked {} exceeds requested {}",
                self.item_code,
                self.linked_quantity(),
                self.requested_quantity
            )));
        }
        if self.bins.values().any(|q| *q <= 0) {
            return Err(DomainError::validation(format!(
                "{}: bin quantities must be positive",
                self.item_code
            )));
        }
        if bin_tracking && self.binned_quantity() != self.requested_quantity {
            return Err(DomainError::invariant(format!(
                "{}: bins hold {} but line requests {}",
                self.item_code,
                self.binned_quantity(),
                self.requested_quantity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanbridge_core::BinEntry;

    fn line(qty: i64) -> DocumentLineAllocation {
        DocumentLineAllocation::new(ItemCode::from("SKU1"), WarehouseCode::from("WH1"), qty)
    }

    #[test]
    fn bin_tracked_line_must_be_fully_binned() {
        let l = line(10).with_bins([(BinEntry::new(1), 6)]);
        assert!(l.validate(false).is_ok());
        match l.validate(true).unwrap_err() {
            DomainError::InvariantViolation(msg) if msg.contains("bins hold 6") => {}
            other => panic!("Expected InvariantViolation, got {other:?}"),
        }

        let l = l.with_bins([(BinEntry::new(2), 4)]);
        assert!(l.validate(true).is_ok());
    }

    #[test]
    fn over_linked_line_is_rejected() {
        let l = line(5).linked_to(SourceLink {
            doc_type: DocumentType::PurchaseOrder,
            doc_entry: DocEntry::new(1),
            line_num: LineNum::new(0),
            consumed: 6,
        });
        assert!(matches!(l.validate(false), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn portions_follow_links_then_remainder() {
        let link = |line_num: i32, consumed: i64| SourceLink {
            doc_type: DocumentType::PurchaseOrder,
            doc_entry: DocEntry::new(7),
            line_num: LineNum::new(line_num),
            consumed,
        };
        let l = line(10)
            .linked_to(link(0, 3))
            .linked_to(link(1, 4))
            .with_bins([(BinEntry::new(1), 5), (BinEntry::new(2), 5)]);

        let portions = l.portions();
        assert_eq!(portions.len(), 3);
        assert_eq!(portions[0].quantity, 3);
        assert_eq!(portions[0].bins, BinAllocations::from([(BinEntry::new(1), 3)]));
        assert_eq!(
            portions[1].bins,
            BinAllocations::from([(BinEntry::new(1), 2), (BinEntry::new(2), 2)])
        );
        assert!(portions[2].link.is_none());
        assert_eq!(portions[2].quantity, 3);
        assert_eq!(portions[2].bins, BinAllocations::from([(BinEntry::new(2), 3)]));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert!(matches!(line(0).validate(false), Err(DomainError::Validation(_))));
    }
}
