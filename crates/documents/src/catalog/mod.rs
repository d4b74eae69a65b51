//! Read boundary over the external document/inventory schema.
//!
//! Callers never build query text. They describe *what* they need with a
//! [`LineQuery`] and the backend binds every value as a parameter.

pub mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scanbridge_core::{CardCode, DocEntry, ItemCode, PickListId, WarehouseCode};

use crate::model::{DocumentHeader, DocumentLineRecord, DocumentType, ItemMaster, PickList};

pub use in_memory::InMemoryCatalog;

/// Line status filter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// Open lines on open, non-cancelled documents.
    Open,
    /// Any line on a non-cancelled document.
    NotCancelled,
}

/// Parameter object describing one document-line sub-query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuery {
    pub doc_type: DocumentType,
    pub status: StatusFilter,
    pub item_code: Option<ItemCode>,
    pub warehouse: Option<WarehouseCode>,
    pub from_warehouse: Option<WarehouseCode>,
    pub card_code: Option<CardCode>,
    /// Restrict to these entries. `Some(vec![])` matches nothing.
    pub doc_entries: Option<Vec<DocEntry>>,
    pub insured: Option<bool>,
    pub service_only: bool,
}

impl LineQuery {
    pub fn new(doc_type: DocumentType, status: StatusFilter) -> Self {
        Self {
            doc_type,
            status,
            item_code: None,
            warehouse: None,
            from_warehouse: None,
            card_code: None,
            doc_entries: None,
            insured: None,
            service_only: false,
        }
    }

    pub fn item(mut self, item_code: &ItemCode) -> Self {
        self.item_code = Some(item_code.clone());
        self
    }

    pub fn warehouse(mut self, warehouse: &WarehouseCode) -> Self {
        self.warehouse = Some(warehouse.clone());
        self
    }

    pub fn from_warehouse(mut self, warehouse: &WarehouseCode) -> Self {
        self.from_warehouse = Some(warehouse.clone());
        self
    }

    pub fn card_code(mut self, card_code: Option<&CardCode>) -> Self {
        self.card_code = card_code.cloned();
        self
    }

    pub fn entries(mut self, entries: &[DocEntry]) -> Self {
        self.doc_entries = Some(entries.to_vec());
        self
    }

    pub fn insured(mut self, insured: bool) -> Self {
        self.insured = Some(insured);
        self
    }

    pub fn service_only(mut self) -> Self {
        self.service_only = true;
        self
    }

    /// Whether a row satisfies every filter of this query.
    pub fn matches(&self, row: &DocumentLineRecord) -> bool {
        if row.doc_type != self.doc_type {
            return false;
        }
        let status_ok = match self.status {
            StatusFilter::Open => row.status == crate::model::DocumentStatus::Open && !row.cancelled,
            StatusFilter::NotCancelled => !row.cancelled,
        };
        if !status_ok {
            return false;
        }
        if self.item_code.as_ref().is_some_and(|i| i != &row.item_code) {
            return false;
        }
        if self.warehouse.as_ref().is_some_and(|w| w != &row.warehouse) {
            return false;
        }
        if let Some(from) = &self.from_warehouse {
            if row.from_warehouse.as_ref() != Some(from) {
                return false;
            }
        }
        if let Some(card) = &self.card_code {
            if row.card_code.as_ref() != Some(card) {
                return false;
            }
        }
        if self.doc_entries.as_ref().is_some_and(|e| !e.contains(&row.doc_entry)) {
            return false;
        }
        if self.insured.is_some_and(|i| i != row.insured) {
            return false;
        }
        if self.service_only && !row.service {
            return false;
        }
        true
    }
}

/// Catalog operation error.
///
/// These are **infrastructure errors**, as opposed to coded validation
/// outcomes which are returned as values.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The backing store could not be reached (retryable).
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// A query failed or returned rows that could not be decoded.
    #[error("catalog query failed: {0}")]
    Query(String),
}

impl CatalogError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_))
    }
}

/// Typed read access to ERP documents and master data.
///
/// Implementations must be safe to call concurrently; they never take part
/// in a write transaction.
#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    async fn item(&self, item_code: &ItemCode) -> Result<Option<ItemMaster>, CatalogError>;

    /// Rows matching `query`, in no particular order.
    async fn document_lines(
        &self,
        query: &LineQuery,
    ) -> Result<Vec<DocumentLineRecord>, CatalogError>;

    async fn document_header(
        &self,
        doc_type: DocumentType,
        doc_entry: DocEntry,
    ) -> Result<Option<DocumentHeader>, CatalogError>;

    /// Total open quantity of one document's open lines in `warehouse`.
    async fn warehouse_open_quantity(
        &self,
        doc_type: DocumentType,
        doc_entry: DocEntry,
        warehouse: &WarehouseCode,
    ) -> Result<i64, CatalogError> {
        let query = LineQuery::new(doc_type, StatusFilter::Open)
            .warehouse(warehouse)
            .entries(&[doc_entry]);
        Ok(self
            .document_lines(&query)
            .await?
            .iter()
            .map(|r| r.open_quantity.max(0))
            .sum())
    }

    async fn pick_list(&self, id: PickListId) -> Result<Option<PickList>, CatalogError>;

    /// Whether deliveries to this customer must be made in pack units.
    async fn customer_requires_pack_unit(&self, card_code: &CardCode)
    -> Result<bool, CatalogError>;
}

#[async_trait]
impl<C> DocumentCatalog for Arc<C>
where
    C: DocumentCatalog + ?Sized,
{
    async fn item(&self, item_code: &ItemCode) -> Result<Option<ItemMaster>, CatalogError> {
        (**self).item(item_code).await
    }

    async fn document_lines(
        &self,
        query: &LineQuery,
    ) -> Result<Vec<DocumentLineRecord>, CatalogError> {
        (**self).document_lines(query).await
    }

    async fn document_header(
        &self,
        doc_type: DocumentType,
        doc_entry: DocEntry,
    ) -> Result<Option<DocumentHeader>, CatalogError> {
        (**self).document_header(doc_type, doc_entry).await
    }

    async fn warehouse_open_quantity(
        &self,
        doc_type: DocumentType,
        doc_entry: DocEntry,
        warehouse: &WarehouseCode,
    ) -> Result<i64, CatalogError> {
        (**self).warehouse_open_quantity(doc_type, doc_entry, warehouse).await
    }

    async fn pick_list(&self, id: PickListId) -> Result<Option<PickList>, CatalogError> {
        (**self).pick_list(id).await
    }

    async fn customer_requires_pack_unit(
        &self,
        card_code: &CardCode,
    ) -> Result<bool, CatalogError> {
        (**self).customer_requires_pack_unit(card_code).await
    }
}
