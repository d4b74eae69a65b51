//! ERP document model and the read side of the bridge.
//!
//! - [`catalog`]: typed, parameterized query boundary over the ERP schema.
//! - [`resolver`]: priority-ordered discovery of source/target document lines.
//! - [`validation`]: coded admission checks for scans and pick lines.
//!
//! Everything here is read-only; writes go through `scanbridge-commit`.

pub mod catalog;
pub mod model;
pub mod resolver;
pub mod validation;

pub use catalog::{CatalogError, DocumentCatalog, InMemoryCatalog, LineQuery, StatusFilter};
pub use model::{
    DocumentClassification, DocumentHeader, DocumentLineRecord, DocumentRef, DocumentStatus,
    DocumentType, ItemMaster, PickList, PickListLine, PickStatus, ReceiptScope, ReceiptTarget,
    SourceDocumentCandidate,
};
pub use resolver::{DocumentSetValidation, SourceDocumentResolver};
pub use validation::{PickLineCheck, ValidationChain, ValidationCode, ValidationResult};
