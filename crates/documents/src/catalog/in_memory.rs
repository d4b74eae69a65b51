use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use scanbridge_core::{CardCode, DocEntry, ItemCode, PickListId};

use super::{CatalogError, DocumentCatalog, LineQuery};
use crate::model::{DocumentHeader, DocumentLineRecord, DocumentRef, DocumentType, ItemMaster, PickList};

#[derive(Debug, Default)]
struct CatalogState {
    items: HashMap<ItemCode, ItemMaster>,
    headers: HashMap<DocumentRef, DocumentHeader>,
    lines: Vec<DocumentLineRecord>,
    pick_lists: HashMap<PickListId, PickList>,
    pack_only_customers: HashSet<CardCode>,
}

/// In-memory document catalog.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, item: ItemMaster) {
        if let Ok(mut state) = self.state.write() {
            state.items.insert(item.item_code.clone(), item);
        }
    }

    /// Insert a line; a matching header is created if none exists yet.
    pub fn insert_line(&self, line: DocumentLineRecord) {
        if let Ok(mut state) = self.state.write() {
            state
                .headers
                .entry(line.document())
                .or_insert_with(|| DocumentHeader::for_line(&line));
            state.lines.push(line);
        }
    }

    pub fn insert_header(&self, header: DocumentHeader) {
        if let Ok(mut state) = self.state.write() {
            let key = DocumentRef::new(header.doc_type, header.doc_entry);
            state.headers.insert(key, header);
        }
    }

    pub fn insert_pick_list(&self, pick_list: PickList) {
        if let Ok(mut state) = self.state.write() {
            state.pick_lists.insert(pick_list.id, pick_list);
        }
    }

    pub fn require_pack_unit(&self, card_code: CardCode) {
        if let Ok(mut state) = self.state.write() {
            state.pack_only_customers.insert(card_code);
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, CatalogState>, CatalogError> {
        self.state
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl DocumentCatalog for InMemoryCatalog {
    async fn item(&self, item_code: &ItemCode) -> Result<Option<ItemMaster>, CatalogError> {
        Ok(self.read()?.items.get(item_code).cloned())
    }

    async fn document_lines(
        &self,
        query: &LineQuery,
    ) -> Result<Vec<DocumentLineRecord>, CatalogError> {
        let state = self.read()?;
        Ok(state
            .lines
            .iter()
            .filter(|row| query.matches(row))
            .cloned()
            .collect())
    }

    async fn document_header(
        &self,
        doc_type: DocumentType,
        doc_entry: DocEntry,
    ) -> Result<Option<DocumentHeader>, CatalogError> {
        let key = DocumentRef::new(doc_type, doc_entry);
        Ok(self.read()?.headers.get(&key).cloned())
    }

    async fn pick_list(&self, id: PickListId) -> Result<Option<PickList>, CatalogError> {
        Ok(self.read()?.pick_lists.get(&id).cloned())
    }

    async fn customer_requires_pack_unit(
        &self,
        card_code: &CardCode,
    ) -> Result<bool, CatalogError> {
        Ok(self.read()?.pack_only_customers.contains(card_code))
    }
}
