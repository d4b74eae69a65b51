//! Priority-ordered discovery of source/target document lines.
//!
//! Receipts are resolved by concatenating three independent sub-queries
//! (purchase orders, goods receipts, AP invoices), each ordered oldest-first.
//! Issues are resolved in three strict tiers (reserve invoices, sales orders,
//! transfer requests out of the warehouse).

use serde::{Deserialize, Serialize};
use tracing::debug;

use scanbridge_core::{CardCode, DocEntry, ItemCode, UnitOfMeasure, WarehouseCode};

use crate::catalog::{CatalogError, DocumentCatalog, LineQuery, StatusFilter};
use crate::model::{
    DocumentClassification, DocumentLineRecord, DocumentRef, DocumentStatus, DocumentType,
    ReceiptScope, SourceDocumentCandidate,
};

/// Per-document outcome of [`SourceDocumentResolver::validate_document_set`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSetValidation {
    pub documents: Vec<(DocumentRef, DocumentClassification)>,
}

impl DocumentSetValidation {
    /// The set is accepted only if every declared document is open.
    pub fn is_accepted(&self) -> bool {
        self.documents
            .iter()
            .all(|(_, c)| *c == DocumentClassification::Open)
    }

    /// First document that failed the set, if any.
    pub fn first_failure(&self) -> Option<(DocumentRef, DocumentClassification)> {
        self.documents
            .iter()
            .find(|(_, c)| *c != DocumentClassification::Open)
            .copied()
    }
}

/// Receipt sub-queries for an item, in tier order.
///
/// Shared with the validation chain so that "is the item on the declared
/// documents" and "which lines can this receipt consume" agree.
pub(crate) fn receipt_line_queries(
    item_code: &ItemCode,
    warehouse: &WarehouseCode,
    scope: ReceiptScope,
    card_code: Option<&CardCode>,
    explicit_docs: &[DocEntry],
) -> Vec<(u8, LineQuery)> {
    // Declared documents narrow every scope, including `All`.
    let restrict = |query: LineQuery| match scope {
        ReceiptScope::All if explicit_docs.is_empty() => query.card_code(card_code),
        ReceiptScope::All => query.card_code(card_code).entries(explicit_docs),
        _ => query.entries(explicit_docs),
    };

    let mut queries = Vec::with_capacity(3);

    queries.push((
        1,
        restrict(
            LineQuery::new(DocumentType::PurchaseOrder, StatusFilter::Open)
                .item(item_code)
                .warehouse(warehouse),
        ),
    ));

    if scope == ReceiptScope::SpecificReceipts && !explicit_docs.is_empty() {
        queries.push((
            2,
            LineQuery::new(DocumentType::PurchaseGoodsReceipt, StatusFilter::Open)
                .item(item_code)
                .warehouse(warehouse)
                .entries(explicit_docs),
        ));
    }

    let invoices = if scope == ReceiptScope::SpecificReceipts {
        LineQuery::new(DocumentType::ApInvoice, StatusFilter::NotCancelled)
            .insured(false)
            .service_only()
    } else {
        LineQuery::new(DocumentType::ApInvoice, StatusFilter::Open).insured(true)
    };
    queries.push((3, restrict(invoices.item(item_code).warehouse(warehouse))));

    queries
}

fn oldest_first(rows: &mut [DocumentLineRecord]) {
    rows.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.doc_entry.cmp(&b.doc_entry))
            .then(a.line_num.cmp(&b.line_num))
    });
}

fn natural_order(rows: &mut [DocumentLineRecord]) {
    rows.sort_by(|a, b| {
        a.doc_entry
            .cmp(&b.doc_entry)
            .then(a.line_num.cmp(&b.line_num))
    });
}

fn to_candidate(row: DocumentLineRecord, tier: u8) -> SourceDocumentCandidate {
    SourceDocumentCandidate {
        doc_type: row.doc_type,
        doc_entry: row.doc_entry,
        line_num: row.line_num,
        open_quantity: row.open_quantity,
        tier,
    }
}

/// Resolves eligible ERP document lines for a scanned item.
#[derive(Debug, Clone)]
pub struct SourceDocumentResolver<C> {
    catalog: C,
}

impl<C> SourceDocumentResolver<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }
}

impl<C: DocumentCatalog> SourceDocumentResolver<C> {
    /// Source lines a receipt of `item_code` into `warehouse` may consume.
    ///
    /// Tiers are concatenated without cross-tier reordering. Within a tier,
    /// lines are ordered oldest-first. Only lines with positive open quantity
    /// whose unit granularity matches `unit` are returned.
    pub async fn resolve_receipt_sources(
        &self,
        item_code: &ItemCode,
        warehouse: &WarehouseCode,
        unit: UnitOfMeasure,
        scope: ReceiptScope,
        card_code: Option<&CardCode>,
        explicit_docs: &[DocEntry],
    ) -> Result<Vec<SourceDocumentCandidate>, CatalogError> {
        let mut candidates = Vec::new();

        for (tier, query) in receipt_line_queries(item_code, warehouse, scope, card_code, explicit_docs) {
            let mut rows = self.catalog.document_lines(&query).await?;
            rows.retain(|r| r.open_quantity > 0 && r.uses_base_unit == unit.is_base());
            oldest_first(&mut rows);
            debug!(
                item = %item_code,
                warehouse = %warehouse,
                doc_type = %query.doc_type,
                tier,
                found = rows.len(),
                "resolved receipt tier"
            );
            candidates.extend(rows.into_iter().map(|r| to_candidate(r, tier)));
        }

        Ok(candidates)
    }

    /// Target lines an issue of `item_code` from `warehouse` must satisfy,
    /// in strict priority: reserve invoices, sales orders, then transfer
    /// requests sourced from this warehouse.
    pub async fn resolve_issue_targets(
        &self,
        item_code: &ItemCode,
        warehouse: &WarehouseCode,
    ) -> Result<Vec<SourceDocumentCandidate>, CatalogError> {
        let tiers = [
            (
                1u8,
                LineQuery::new(DocumentType::ReserveInvoice, StatusFilter::Open)
                    .item(item_code)
                    .warehouse(warehouse)
                    .insured(true),
            ),
            (
                2,
                LineQuery::new(DocumentType::SalesOrder, StatusFilter::Open)
                    .item(item_code)
                    .warehouse(warehouse),
            ),
            (
                3,
                LineQuery::new(DocumentType::TransferRequest, StatusFilter::Open)
                    .item(item_code)
                    .from_warehouse(warehouse),
            ),
        ];

        let mut candidates = Vec::new();
        for (tier, query) in tiers {
            let mut rows = self.catalog.document_lines(&query).await?;
            rows.retain(|r| r.open_quantity > 0);
            natural_order(&mut rows);
            debug!(item = %item_code, warehouse = %warehouse, tier, found = rows.len(), "resolved issue tier");
            candidates.extend(rows.into_iter().map(|r| to_candidate(r, tier)));
        }

        Ok(candidates)
    }

    /// Classify every declared document for a receipt into `warehouse`.
    ///
    /// Any classification other than `Open` fails the whole set.
    pub async fn validate_document_set(
        &self,
        warehouse: &WarehouseCode,
        scope: ReceiptScope,
        declared: &[DocumentRef],
    ) -> Result<DocumentSetValidation, CatalogError> {
        let mut documents = Vec::with_capacity(declared.len());
        for doc in declared {
            let classification = self.classify(warehouse, scope, *doc).await?;
            documents.push((*doc, classification));
        }

        let result = DocumentSetValidation { documents };
        if let Some((doc, classification)) = result.first_failure() {
            debug!(
                doc_type = %doc.doc_type,
                doc_entry = %doc.doc_entry,
                ?classification,
                "declared document set rejected"
            );
        }
        Ok(result)
    }

    async fn classify(
        &self,
        warehouse: &WarehouseCode,
        scope: ReceiptScope,
        doc: DocumentRef,
    ) -> Result<DocumentClassification, CatalogError> {
        let Some(header) = self.catalog.document_header(doc.doc_type, doc.doc_entry).await? else {
            return Ok(DocumentClassification::Error);
        };

        if doc.doc_type == DocumentType::ApInvoice {
            let expects_insured = scope != ReceiptScope::SpecificReceipts;
            if header.insured != expects_insured {
                return Ok(DocumentClassification::Rejected);
            }
        }

        if header.status == DocumentStatus::Closed || header.cancelled {
            return Ok(DocumentClassification::Closed);
        }

        let open = self
            .catalog
            .warehouse_open_quantity(doc.doc_type, doc.doc_entry, warehouse)
            .await?;

        if open == 0 {
            Ok(DocumentClassification::Warning)
        } else {
            Ok(DocumentClassification::Open)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use scanbridge_core::LineNum;
    use std::sync::Arc;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn sku() -> ItemCode {
        ItemCode::from("SKU1")
    }

    fn wh() -> WarehouseCode {
        WarehouseCode::from("WH1")
    }

    fn line(doc_type: DocumentType, entry: i64, line: i32, qty: i64, at: i64) -> DocumentLineRecord {
        DocumentLineRecord::open(
            doc_type,
            DocEntry::new(entry),
            LineNum::new(line),
            sku(),
            wh(),
            qty,
            t(at),
        )
    }

    fn resolver(lines: Vec<DocumentLineRecord>) -> SourceDocumentResolver<Arc<InMemoryCatalog>> {
        let catalog = Arc::new(InMemoryCatalog::new());
        for l in lines {
            catalog.insert_line(l);
        }
        SourceDocumentResolver::new(catalog)
    }

    #[tokio::test]
    async fn single_open_purchase_order_is_the_only_candidate() {
        let r = resolver(vec![line(DocumentType::PurchaseOrder, 500, 0, 100, 0)]);

        let found = r
            .resolve_receipt_sources(&sku(), &wh(), UnitOfMeasure::Base, ReceiptScope::All, None, &[])
            .await
            .unwrap();

        assert_eq!(
            found,
            vec![SourceDocumentCandidate {
                doc_type: DocumentType::PurchaseOrder,
                doc_entry: DocEntry::new(500),
                line_num: LineNum::new(0),
                open_quantity: 100,
                tier: 1,
            }]
        );
    }

    #[tokio::test]
    async fn purchase_orders_are_oldest_first_and_filtered_by_vendor() {
        let vendor = CardCode::from("V001");
        let r = resolver(vec![
            line(DocumentType::PurchaseOrder, 600, 0, 5, 30).with_card(vendor.clone()),
            line(DocumentType::PurchaseOrder, 700, 0, 5, 10).with_card(vendor.clone()),
            line(DocumentType::PurchaseOrder, 800, 0, 5, 0).with_card(CardCode::from("V002")),
        ]);

        let found = r
            .resolve_receipt_sources(&sku(), &wh(), UnitOfMeasure::Base, ReceiptScope::All, Some(&vendor), &[])
            .await
            .unwrap();

        let entries: Vec<i64> = found.iter().map(|c| c.doc_entry.get()).collect();
        assert_eq!(entries, vec![700, 600]);
    }

    #[tokio::test]
    async fn declared_documents_narrow_the_all_scope() {
        let vendor = CardCode::from("V001");
        let r = resolver(vec![
            line(DocumentType::PurchaseOrder, 600, 0, 5, 0).with_card(vendor.clone()),
            line(DocumentType::PurchaseOrder, 700, 0, 5, 10).with_card(vendor.clone()),
        ]);

        let found = r
            .resolve_receipt_sources(
                &sku(),
                &wh(),
                UnitOfMeasure::Base,
                ReceiptScope::All,
                Some(&vendor),
                &[DocEntry::new(700)],
            )
            .await
            .unwrap();

        let entries: Vec<i64> = found.iter().map(|c| c.doc_entry.get()).collect();
        assert_eq!(entries, vec![700]);
    }

    #[tokio::test]
    async fn unit_granularity_must_match() {
        let r = resolver(vec![
            line(DocumentType::PurchaseOrder, 1, 0, 10, 0),
            line(DocumentType::PurchaseOrder, 2, 0, 10, 1).in_purchase_units(),
        ]);

        let base = r
            .resolve_receipt_sources(&sku(), &wh(), UnitOfMeasure::Base, ReceiptScope::All, None, &[])
            .await
            .unwrap();
        let buy = r
            .resolve_receipt_sources(&sku(), &wh(), UnitOfMeasure::Buy, ReceiptScope::All, None, &[])
            .await
            .unwrap();

        assert_eq!(base.len(), 1);
        assert_eq!(base[0].doc_entry, DocEntry::new(1));
        assert_eq!(buy.len(), 1);
        assert_eq!(buy[0].doc_entry, DocEntry::new(2));
    }

    #[tokio::test]
    async fn specific_receipts_use_goods_receipts_and_service_invoices() {
        let r = resolver(vec![
            line(DocumentType::PurchaseGoodsReceipt, 40, 0, 8, 5),
            line(DocumentType::ApInvoice, 41, 0, 3, 0).service(),
            line(DocumentType::ApInvoice, 42, 0, 3, 0).insured(true),
            line(DocumentType::PurchaseGoodsReceipt, 99, 0, 8, 0),
        ]);

        let found = r
            .resolve_receipt_sources(
                &sku(),
                &wh(),
                UnitOfMeasure::Base,
                ReceiptScope::SpecificReceipts,
                None,
                &[DocEntry::new(40), DocEntry::new(41), DocEntry::new(42)],
            )
            .await
            .unwrap();

        let got: Vec<(DocumentType, i64, u8)> = found
            .iter()
            .map(|c| (c.doc_type, c.doc_entry.get(), c.tier))
            .collect();
        assert_eq!(
            got,
            vec![
                (DocumentType::PurchaseGoodsReceipt, 40, 2),
                (DocumentType::ApInvoice, 41, 3),
            ]
        );
    }

    #[tokio::test]
    async fn insured_invoices_follow_orders_when_not_specific() {
        let r = resolver(vec![
            line(DocumentType::ApInvoice, 10, 0, 4, 0).insured(true),
            line(DocumentType::PurchaseOrder, 20, 0, 4, 50),
            line(DocumentType::ApInvoice, 11, 0, 4, 0),
        ]);

        let found = r
            .resolve_receipt_sources(&sku(), &wh(), UnitOfMeasure::Base, ReceiptScope::All, None, &[])
            .await
            .unwrap();

        let got: Vec<(DocumentType, i64)> = found.iter().map(|c| (c.doc_type, c.doc_entry.get())).collect();
        assert_eq!(
            got,
            vec![(DocumentType::PurchaseOrder, 20), (DocumentType::ApInvoice, 10)]
        );
    }

    #[tokio::test]
    async fn no_applicable_tier_yields_empty() {
        let r = resolver(vec![]);
        let found = r
            .resolve_receipt_sources(
                &sku(),
                &wh(),
                UnitOfMeasure::Base,
                ReceiptScope::SelectedDocuments,
                None,
                &[],
            )
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn issue_targets_are_tiered() {
        let other = WarehouseCode::from("WH2");
        let r = resolver(vec![
            line(DocumentType::TransferRequest, 3, 0, 5, 0).with_from_warehouse(wh()),
            line(DocumentType::SalesOrder, 2, 1, 5, 0),
            line(DocumentType::SalesOrder, 2, 0, 5, 0),
            line(DocumentType::ReserveInvoice, 9, 0, 5, 0).insured(true),
            line(DocumentType::TransferRequest, 4, 0, 5, 0).with_from_warehouse(other),
        ]);

        let found = r.resolve_issue_targets(&sku(), &wh()).await.unwrap();
        let got: Vec<(u8, i64, i32)> = found
            .iter()
            .map(|c| (c.tier, c.doc_entry.get(), c.line_num.get()))
            .collect();
        assert_eq!(got, vec![(1, 9, 0), (2, 2, 0), (2, 2, 1), (3, 3, 0)]);
    }

    #[tokio::test]
    async fn document_set_classification() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert_line(line(DocumentType::PurchaseOrder, 1, 0, 10, 0));
        catalog.insert_line(line(DocumentType::PurchaseOrder, 2, 0, 0, 0));
        catalog.insert_line(line(DocumentType::PurchaseOrder, 3, 0, 10, 0).closed());
        catalog.insert_line(line(DocumentType::ApInvoice, 4, 0, 10, 0));
        let r = SourceDocumentResolver::new(catalog);

        let declared = [
            DocumentRef::new(DocumentType::PurchaseOrder, DocEntry::new(1)),
            DocumentRef::new(DocumentType::PurchaseOrder, DocEntry::new(2)),
            DocumentRef::new(DocumentType::PurchaseOrder, DocEntry::new(3)),
            DocumentRef::new(DocumentType::ApInvoice, DocEntry::new(4)),
            DocumentRef::new(DocumentType::PurchaseOrder, DocEntry::new(5)),
        ];
        let result = r
            .validate_document_set(&wh(), ReceiptScope::SelectedDocuments, &declared)
            .await
            .unwrap();

        let classes: Vec<DocumentClassification> = result.documents.iter().map(|(_, c)| *c).collect();
        assert_eq!(
            classes,
            vec![
                DocumentClassification::Open,
                DocumentClassification::Warning,
                DocumentClassification::Closed,
                DocumentClassification::Rejected,
                DocumentClassification::Error,
            ]
        );
        assert!(!result.is_accepted());
    }

    #[tokio::test]
    async fn all_open_set_is_accepted() {
        let r = resolver(vec![line(DocumentType::PurchaseOrder, 1, 0, 10, 0)]);
        let result = r
            .validate_document_set(
                &wh(),
                ReceiptScope::SelectedDocuments,
                &[DocumentRef::new(DocumentType::PurchaseOrder, DocEntry::new(1))],
            )
            .await
            .unwrap();
        assert!(result.is_accepted());
        assert_eq!(result.first_failure(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: no candidate ever carries a non-positive open quantity.
        #[test]
        fn receipt_candidates_are_strictly_positive(
            quantities in prop::collection::vec(-20i64..20i64, 0..12)
        ) {
            let lines = quantities
                .iter()
                .enumerate()
                .map(|(i, q)| line(DocumentType::PurchaseOrder, i as i64 + 1, 0, *q, i as i64))
                .collect();
            let r = resolver(lines);

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let found = rt
                .block_on(r.resolve_receipt_sources(&sku(), &wh(), UnitOfMeasure::Base, ReceiptScope::All, None, &[]))
                .unwrap();

            prop_assert!(found.iter().all(|c| c.open_quantity > 0));
            prop_assert_eq!(found.len(), quantities.iter().filter(|q| **q > 0).count());
        }
    }
}
