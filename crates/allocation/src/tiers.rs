use serde::{Deserialize, Serialize};

use scanbridge_documents::SourceDocumentCandidate;

use crate::line::SourceLink;

/// Result of consuming candidates for a quantity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TierAllocation {
    pub links: Vec<SourceLink>,
    /// Quantity no candidate could absorb.
    pub remainder: i64,
}

impl TierAllocation {
    pub fn allocated(&self) -> i64 {
        self.links.iter().map(|l| l.consumed).sum()
    }
}

/// Consume `quantity` from `candidates` strictly in the order given.
///
/// Each candidate is drained to its open quantity before the next one is
/// touched, so with resolver output a lower tier is only reached once every
/// candidate of the tiers above it is exhausted.
pub fn allocate_in_tiers(candidates: &[SourceDocumentCandidate], quantity: i64) -> TierAllocation {
    let mut remaining = quantity.max(0);
    let mut links = Vec::new();

    for candidate in candidates {
        if remaining == 0 {
            break;
        }
        let consumed = candidate.open_quantity.min(remaining);
        if consumed <= 0 {
            continue;
        }
        links.push(SourceLink {
            doc_type: candidate.doc_type,
            doc_entry: candidate.doc_entry,
            line_num: candidate.line_num,
            consumed,
        });
        remaining -= consumed;
    }

    TierAllocation {
        links,
        remainder: remaining,
    }
}

/// [`allocate_in_tiers`] in multiples of `unit_size` base units.
///
/// Each candidate only absorbs whole units, so every link converts to a
/// non-zero quantity in the entered unit. Open quantity below one unit is
/// skipped and the next candidate takes the unit instead.
pub fn allocate_in_whole_units(
    candidates: &[SourceDocumentCandidate],
    quantity: i64,
    unit_size: i64,
) -> TierAllocation {
    if unit_size <= 1 {
        return allocate_in_tiers(candidates, quantity);
    }
    let usable: Vec<SourceDocumentCandidate> = candidates
        .iter()
        .map(|c| SourceDocumentCandidate {
            open_quantity: c.open_quantity.max(0) / unit_size * unit_size,
            ..c.clone()
        })
        .collect();
    allocate_in_tiers(&usable, quantity)
}
