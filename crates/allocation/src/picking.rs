use serde::{Deserialize, Serialize};

use scanbridge_documents::{PickListLine, PickStatus};

/// Quantities of a pick line after a pick was applied.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickReconciliation {
    pub released: i64,
    pub picked: i64,
    pub status: PickStatus,
}

/// Apply an incoming picked quantity to a pick list line.
///
/// On a line nothing was picked from yet, released and picked are both set
/// to `incoming`. Otherwise both are incremented by it. The line is marked
/// picked either way.
pub fn reconcile_picked_quantity(line: &mut PickListLine, incoming: i64) -> PickReconciliation {
    if line.picked_quantity == 0 {
        line.released_quantity = incoming;
        line.picked_quantity = incoming;
    } else {
        line.released_quantity += incoming;
        line.picked_quantity += incoming;
    }
    line.status = PickStatus::Picked;

    PickReconciliation {
        released: line.released_quantity,
        picked: line.picked_quantity,
        status: line.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanbridge_core::{DocEntry, ItemCode, LineNum};
    use scanbridge_documents::DocumentType;

    fn pick_line(released: i64, picked: i64) -> PickListLine {
        PickListLine {
            line_num: LineNum::new(0),
            source_type: DocumentType::SalesOrder,
            source_entry: DocEntry::new(1),
            source_line: LineNum::new(0),
            item_code: ItemCode::from("SKU1"),
            card_code: None,
            source_open_quantity: 50,
            released_quantity: released,
            picked_quantity: picked,
            status: PickStatus::Released,
            bins: Default::default(),
        }
    }

    #[test]
    fn first_pick_sets_then_later_picks_increment() {
        let mut line = pick_line(20, 0);

        let first = reconcile_picked_quantity(&mut line, 7);
        assert_eq!(
            first,
            PickReconciliation {
                released: 7,
                picked: 7,
                status: PickStatus::Picked
            }
        );

        let second = reconcile_picked_quantity(&mut line, 3);
        assert_eq!((second.released, second.picked), (10, 10));
        assert_eq!(second.status, PickStatus::Picked);
    }

    #[test]
    fn partially_picked_line_accumulates_on_both_sides() {
        let mut line = pick_line(12, 4);
        let r = reconcile_picked_quantity(&mut line, 5);
        assert_eq!((r.released, r.picked), (17, 9));
    }
}
