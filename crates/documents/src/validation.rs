//! Coded admission checks.
//!
//! Every check returns a [`ValidationResult`]; a rejected scan is a normal
//! outcome, not an error. Only catalog faults surface as `Err`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use scanbridge_core::{BinEntry, DocEntry, ItemCode, PickListId, UnitOfMeasure, WarehouseCode};

use crate::catalog::{CatalogError, DocumentCatalog};
use crate::model::{DocumentType, ReceiptTarget};
use crate::resolver::receipt_line_queries;

/// Outcome codes shared with the handheld clients.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ValidationCode {
    Ok,
    NotFound,
    BarcodeMismatch,
    AlreadyPicked,
    ExceedsOpenQuantity,
    NotPermitted,
    DocumentUnavailable,
}

impl ValidationCode {
    pub fn code(self) -> i32 {
        match self {
            ValidationCode::Ok => 0,
            ValidationCode::NotFound => -1,
            ValidationCode::BarcodeMismatch => -2,
            ValidationCode::AlreadyPicked => -3,
            ValidationCode::ExceedsOpenQuantity => -4,
            ValidationCode::NotPermitted => -5,
            ValidationCode::DocumentUnavailable => -6,
        }
    }
}

impl From<ValidationCode> for i32 {
    fn from(value: ValidationCode) -> Self {
        value.code()
    }
}

impl TryFrom<i32> for ValidationCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ValidationCode::Ok,
            -1 => ValidationCode::NotFound,
            -2 => ValidationCode::BarcodeMismatch,
            -3 => ValidationCode::AlreadyPicked,
            -4 => ValidationCode::ExceedsOpenQuantity,
            -5 => ValidationCode::NotPermitted,
            -6 => ValidationCode::DocumentUnavailable,
            other => return Err(format!("unknown validation code {other}")),
        })
    }
}

/// Immutable outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    code: ValidationCode,
    message: String,
    context: BTreeMap<String, String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::new(ValidationCode::Ok, "ok")
    }

    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn code(&self) -> ValidationCode {
        self.code
    }

    pub fn is_ok(&self) -> bool {
        self.code == ValidationCode::Ok
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }
}

/// A pick to be checked against a pick list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickLineCheck {
    pub pick_list: PickListId,
    pub source_type: DocumentType,
    pub source_entry: DocEntry,
    pub item_code: ItemCode,
    /// Base units.
    pub quantity: i64,
    pub unit: UnitOfMeasure,
    pub bin: Option<BinEntry>,
}

/// First-match-wins admission rules.
#[derive(Debug, Clone)]
pub struct ValidationChain<C> {
    catalog: C,
}

impl<C> ValidationChain<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }
}

impl<C: DocumentCatalog> ValidationChain<C> {
    /// Admission of a scanned item into a receipt.
    ///
    /// `barcode` is `None` when the operator typed the item code.
    pub async fn validate_add_item(
        &self,
        item_code: &ItemCode,
        barcode: Option<&str>,
        warehouse: &WarehouseCode,
        target: &ReceiptTarget,
    ) -> Result<ValidationResult, CatalogError> {
        let Some(item) = self.catalog.item(item_code).await? else {
            return Ok(ValidationResult::new(ValidationCode::NotFound, "item not found")
                .with("item", item_code));
        };

        if let Some(barcode) = barcode {
            if !item.recognizes(barcode) {
                return Ok(ValidationResult::new(
                    ValidationCode::BarcodeMismatch,
                    "barcode does not belong to item",
                )
                .with("item", item_code)
                .with("barcode", barcode));
            }
        }

        if !item.purchasable {
            return Ok(
                ValidationResult::new(ValidationCode::NotPermitted, "item is not purchasable")
                    .with("item", item_code),
            );
        }

        if !target.documents.is_empty() {
            let queries = receipt_line_queries(
                item_code,
                warehouse,
                target.scope,
                target.card_code.as_ref(),
                &target.documents,
            );
            let mut on_documents = false;
            for (_, query) in queries {
                let rows = self.catalog.document_lines(&query).await?;
                if rows.iter().any(|r| r.open_quantity > 0) {
                    on_documents = true;
                    break;
                }
            }
            if !on_documents {
                let docs = target
                    .documents
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                return Ok(ValidationResult::new(
                    ValidationCode::DocumentUnavailable,
                    "item is not open on any of the selected documents",
                )
                .with("item", item_code)
                .with("documents", docs));
            }
        }

        Ok(ValidationResult::ok())
    }

    /// Admission of a pick against a pick list line.
    pub async fn validate_pick_line(
        &self,
        check: &PickLineCheck,
    ) -> Result<ValidationResult, CatalogError> {
        let Some(pick_list) = self.catalog.pick_list(check.pick_list).await? else {
            return Ok(ValidationResult::new(ValidationCode::NotFound, "pick list not found")
                .with("pick_list", check.pick_list));
        };

        if pick_list.is_closed() {
            return Ok(
                ValidationResult::new(ValidationCode::DocumentUnavailable, "pick list is closed")
                    .with("pick_list", check.pick_list),
            );
        }

        let Some(line) = pick_list.find_line(check.source_type, check.source_entry, &check.item_code)
        else {
            return Ok(ValidationResult::new(ValidationCode::NotFound, "pick line not found")
                .with("pick_list", check.pick_list)
                .with("source_entry", check.source_entry)
                .with("item", &check.item_code));
        };

        let remaining = line.remaining();
        if remaining == 0 {
            return Ok(
                ValidationResult::new(ValidationCode::AlreadyPicked, "line already fully picked")
                    .with("line", line.line_num),
            );
        }

        if check.quantity > remaining {
            return Ok(ValidationResult::new(
                ValidationCode::ExceedsOpenQuantity,
                "quantity exceeds remaining open quantity",
            )
            .with("line", line.line_num)
            .with("remaining", remaining)
            .with("requested", check.quantity));
        }

        if check.unit != UnitOfMeasure::Pack {
            if let Some(card) = &line.card_code {
                if self.catalog.customer_requires_pack_unit(card).await? {
                    return Ok(ValidationResult::new(
                        ValidationCode::NotPermitted,
                        "customer requires pack-unit fulfilment",
                    )
                    .with("customer", card)
                    .with("line", line.line_num));
                }
            }
        }

        let mut result = ValidationResult::ok().with("line", line.line_num);
        if let Some(bin) = check.bin {
            result = result.with("bin", bin);
        }
        Ok(result)
    }
}
