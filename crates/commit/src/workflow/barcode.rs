use std::sync::Arc;

use tracing::{debug, instrument};

use scanbridge_core::{DomainError, ItemCode};
use scanbridge_documents::{DocumentCatalog, ValidationCode, ValidationResult};

use crate::error::WorkflowError;
use crate::object::BarcodeUpdate;
use crate::strategy::CommitStrategy;

/// Registers alternate barcodes on items.
pub struct BarcodeWorkflow<C> {
    catalog: C,
    strategy: Arc<dyn CommitStrategy>,
}

impl<C: DocumentCatalog> BarcodeWorkflow<C> {
    pub fn new(catalog: C, strategy: Arc<dyn CommitStrategy>) -> Self {
        Self { catalog, strategy }
    }

    /// Returns `false` when the barcode already identifies the item and
    /// nothing was written.
    #[instrument(skip(self, item_code), fields(item = %item_code))]
    pub async fn register(&self, item_code: &ItemCode, barcode: &str) -> Result<bool, WorkflowError> {
        let barcode = barcode.trim();
        if barcode.is_empty() {
            return Err(DomainError::validation("barcode is blank").into());
        }

        let Some(item) = self.catalog.item(item_code).await? else {
            return Err(WorkflowError::Rejected(
                ValidationResult::new(ValidationCode::NotFound, "item not found")
                    .with("item", item_code),
            ));
        };
        if item.recognizes(barcode) {
            debug!(barcode, "barcode already registered");
            return Ok(false);
        }

        let update = BarcodeUpdate {
            item_code: item_code.clone(),
            barcode: barcode.to_string(),
        };
        self.strategy.commit(vec![update.into()]).await?;
        Ok(true)
    }
}
