use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use scanbridge_allocation::{merge_bin_allocation, reconcile_picked_quantity};
use scanbridge_core::{
    BinEntry, DocEntry, DomainError, ItemCode, PickListId, UnitOfMeasure, units,
};
use scanbridge_documents::{
    DocumentCatalog, DocumentType, PickLineCheck, ValidationChain, ValidationCode,
    ValidationResult,
};

use crate::error::{CommitError, WorkflowError};
use crate::object::{PickLineUpdate, PickListUpdate};
use crate::strategy::CommitStrategy;

/// One scanned pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickEntry {
    pub source_type: DocumentType,
    pub source_entry: DocEntry,
    pub item_code: ItemCode,
    /// Quantity in `unit`.
    pub quantity: i64,
    pub unit: UnitOfMeasure,
    pub bin: Option<BinEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickRequest {
    pub pick_list: PickListId,
    pub entries: Vec<PickEntry>,
}

/// Picks for one pick list line, summed in base units.
struct LinePick {
    source_type: DocumentType,
    source_entry: DocEntry,
    item_code: ItemCode,
    quantity: i64,
    unit: UnitOfMeasure,
    bins: Vec<(BinEntry, i64)>,
}

/// Records picked quantities on a pick list.
pub struct PickingWorkflow<C> {
    catalog: C,
    strategy: Arc<dyn CommitStrategy>,
}

impl<C> PickingWorkflow<C>
where
    C: DocumentCatalog + Clone,
{
    pub fn new(catalog: C, strategy: Arc<dyn CommitStrategy>) -> Self {
        Self { catalog, strategy }
    }

    /// Validate every touched line, reconcile its quantities and bins, and
    /// commit them as one pick list update.
    #[instrument(skip(self, request), fields(pick_list = %request.pick_list, entries = request.entries.len()))]
    pub async fn record(&self, request: &PickRequest) -> Result<PickListUpdate, WorkflowError> {
        let picks = self.sum_per_line(&request.entries).await?;

        let chain = ValidationChain::new(self.catalog.clone());
        for pick in &picks {
            let check = PickLineCheck {
                pick_list: request.pick_list,
                source_type: pick.source_type,
                source_entry: pick.source_entry,
                item_code: pick.item_code.clone(),
                quantity: pick.quantity,
                unit: pick.unit,
                bin: pick.bins.first().map(|(bin, _)| *bin),
            };
            let verdict = chain.validate_pick_line(&check).await?;
            if !verdict.is_ok() {
                return Err(WorkflowError::Rejected(verdict));
            }
        }

        let mut pick_list = self
            .catalog
            .pick_list(request.pick_list)
            .await?
            .ok_or_else(|| CommitError::NotFound(format!("pick list {}", request.pick_list)))?;

        let mut update = PickListUpdate {
            pick_list: request.pick_list,
            lines: Vec::with_capacity(picks.len()),
        };
        for pick in picks {
            let line = pick_list
                .lines
                .iter_mut()
                .find(|l| {
                    l.source_type == pick.source_type
                        && l.source_entry == pick.source_entry
                        && l.item_code == pick.item_code
                })
                .ok_or_else(|| {
                    CommitError::NotFound(format!(
                        "pick line {}:{} {}",
                        pick.source_type, pick.source_entry, pick.item_code
                    ))
                })?;

            let reconciled = reconcile_picked_quantity(line, pick.quantity);
            line.bins = merge_bin_allocation(std::mem::take(&mut line.bins), pick.bins);
            debug!(
                line = %line.line_num,
                released = reconciled.released,
                picked = reconciled.picked,
                "pick line reconciled"
            );
            update.lines.push(PickLineUpdate {
                line_num: line.line_num,
                released_quantity: reconciled.released,
                picked_quantity: reconciled.picked,
                status: reconciled.status,
                bins: line.bins.clone(),
            });
        }

        self.strategy.commit(vec![update.clone().into()]).await?;
        Ok(update)
    }

    async fn sum_per_line(&self, entries: &[PickEntry]) -> Result<Vec<LinePick>, WorkflowError> {
        let mut picks: Vec<LinePick> = Vec::new();
        for entry in entries {
            if entry.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "{}: picked quantity must be positive",
                    entry.item_code
                ))
                .into());
            }
            let Some(item) = self.catalog.item(&entry.item_code).await? else {
                return Err(WorkflowError::Rejected(
                    ValidationResult::new(ValidationCode::NotFound, "item not found")
                        .with("item", &entry.item_code),
                ));
            };
            let quantity = units::to_base(entry.quantity, entry.unit, &item.factors)?;
            let bins = entry.bin.map(|bin| (bin, quantity));

            let existing = picks.iter_mut().find(|p| {
                p.source_type == entry.source_type
                    && p.source_entry == entry.source_entry
                    && p.item_code == entry.item_code
            });
            match existing {
                Some(pick) => {
                    pick.quantity += quantity;
                    // Pack-only checks apply if any pick was not in pack units.
                    if entry.unit != UnitOfMeasure::Pack {
                        pick.unit = entry.unit;
                    }
                    pick.bins.extend(bins);
                }
                None => picks.push(LinePick {
                    source_type: entry.source_type,
                    source_entry: entry.source_entry,
                    item_code: entry.item_code.clone(),
                    quantity,
                    unit: entry.unit,
                    bins: bins.into_iter().collect(),
                }),
            }
        }
        Ok(picks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::{InMemoryErp, InMemorySession};
    use crate::session::{SessionContext, StatefulSessionStrategy};
    use scanbridge_core::{CardCode, ItemUnitFactors, LineNum};
    use scanbridge_documents::{InMemoryCatalog, ItemMaster, PickList, PickListLine, PickStatus};
    use std::collections::BTreeMap;

    fn catalog(status: PickStatus, picked: i64) -> Arc<InMemoryCatalog> {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert_item(ItemMaster {
            item_code: ItemCode::from("SKU1"),
            primary_barcode: None,
            alternate_barcodes: Vec::new(),
            purchasable: true,
            factors: ItemUnitFactors::new(12, 6).unwrap(),
        });
        catalog.insert_pick_list(PickList {
            id: PickListId::new(7),
            status,
            lines: vec![PickListLine {
                line_num: LineNum::new(0),
                source_type: DocumentType::SalesOrder,
                source_entry: DocEntry::new(20),
                source_line: LineNum::new(0),
                item_code: ItemCode::from("SKU1"),
                card_code: Some(CardCode::from("C1")),
                source_open_quantity: 24,
                released_quantity: picked,
                picked_quantity: picked,
                status: PickStatus::Released,
                bins: if picked > 0 {
                    BTreeMap::from([(BinEntry::new(5), picked)])
                } else {
                    BTreeMap::new()
                },
            }],
        });
        catalog
    }

    fn workflow(
        catalog: Arc<InMemoryCatalog>,
        erp: &InMemoryErp,
    ) -> PickingWorkflow<Arc<InMemoryCatalog>> {
        let strategy = StatefulSessionStrategy::new(SessionContext::new(InMemorySession::new(
            erp.clone(),
        )));
        PickingWorkflow::new(catalog, Arc::new(strategy))
    }

    fn pick(quantity: i64, unit: UnitOfMeasure, bin: i32) -> PickEntry {
        PickEntry {
            source_type: DocumentType::SalesOrder,
            source_entry: DocEntry::new(20),
            item_code: ItemCode::from("SKU1"),
            quantity,
            unit,
            bin: Some(BinEntry::new(bin)),
        }
    }

    fn request(entries: Vec<PickEntry>) -> PickRequest {
        PickRequest {
            pick_list: PickListId::new(7),
            entries,
        }
    }

    #[tokio::test]
    async fn first_pick_sets_quantities() {
        let erp = InMemoryErp::new();
        let update = workflow(catalog(PickStatus::Released, 0), &erp)
            .record(&request(vec![pick(7, UnitOfMeasure::Base, 5)]))
            .await
            .unwrap();

        let line = &update.lines[0];
        assert_eq!((line.released_quantity, line.picked_quantity), (7, 7));
        assert_eq!(line.status, PickStatus::Picked);
        assert_eq!(erp.records_for("PickLists").len(), 1);
    }

    #[tokio::test]
    async fn later_pick_increments_and_merges_bins() {
        let erp = InMemoryErp::new();
        let update = workflow(catalog(PickStatus::PartiallyPicked, 7), &erp)
            .record(&request(vec![
                pick(1, UnitOfMeasure::Base, 5),
                pick(2, UnitOfMeasure::Base, 6),
            ]))
            .await
            .unwrap();

        let line = &update.lines[0];
        assert_eq!((line.released_quantity, line.picked_quantity), (10, 10));
        assert_eq!(
            line.bins,
            BTreeMap::from([(BinEntry::new(5), 8), (BinEntry::new(6), 2)])
        );
    }

    #[tokio::test]
    async fn entered_units_are_converted_before_validation() {
        let erp = InMemoryErp::new();
        let err = workflow(catalog(PickStatus::Released, 0), &erp)
            .record(&request(vec![pick(3, UnitOfMeasure::Buy, 5)]))
            .await
            .unwrap_err();

        match err {
            WorkflowError::Rejected(result) => {
                assert_eq!(result.code(), ValidationCode::ExceedsOpenQuantity);
                assert_eq!(result.context().get("requested").map(String::as_str), Some("36"));
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }
        assert!(erp.journal().is_empty());
    }

    #[tokio::test]
    async fn closed_pick_list_is_unavailable() {
        let erp = InMemoryErp::new();
        let err = workflow(catalog(PickStatus::Closed, 0), &erp)
            .record(&request(vec![pick(1, UnitOfMeasure::Base, 5)]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Rejected(ref r) if r.code() == ValidationCode::DocumentUnavailable
        ));
    }

    #[tokio::test]
    async fn pack_only_customer_needs_pack_units() {
        let erp = InMemoryErp::new();
        let catalog = catalog(PickStatus::Released, 0);
        catalog.require_pack_unit(CardCode::from("C1"));

        let err = workflow(Arc::clone(&catalog), &erp)
            .record(&request(vec![pick(6, UnitOfMeasure::Base, 5)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Rejected(ref r) if r.code() == ValidationCode::NotPermitted
        ));

        let update = workflow(catalog, &erp)
            .record(&request(vec![pick(1, UnitOfMeasure::Pack, 5)]))
            .await
            .unwrap();
        assert_eq!(update.lines[0].picked_quantity, 6);
    }
}
