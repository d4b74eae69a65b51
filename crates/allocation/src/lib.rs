//! Allocation of warehouse-entered quantities onto ERP document lines.
//!
//! Pure, deterministic helpers (no IO): grouping lines into the documents
//! they will be posted as, merging bin allocations, consuming tiered
//! candidates and reconciling pick quantities. All quantities are base units.

pub mod bins;
pub mod grouping;
pub mod line;
pub mod picking;
pub mod tiers;

pub use bins::{BinAllocations, BinPool, bin_pool, merge_bin_allocation, take_bins};
pub use grouping::{DocumentGroups, GroupKey, group_for_document_creation, split_by_source};
pub use line::{DocumentLineAllocation, LinePortion, SourceLink};
pub use picking::{PickReconciliation, reconcile_picked_quantity};
pub use tiers::{TierAllocation, allocate_in_tiers, allocate_in_whole_units};
