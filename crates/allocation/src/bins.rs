use std::collections::{BTreeMap, VecDeque};

use scanbridge_core::BinEntry;

/// Quantity per bin, base units.
pub type BinAllocations = BTreeMap<BinEntry, i64>;

/// Accumulate bin deltas into an allocation map.
///
/// A bin already present is incremented, never overwritten; an absent bin is
/// inserted. Repeating the same delta applies it twice: callers must submit
/// each logical delta at most once.
pub fn merge_bin_allocation<I>(mut existing: BinAllocations, deltas: I) -> BinAllocations
where
    I: IntoIterator<Item = (BinEntry, i64)>,
{
    for (bin, qty) in deltas {
        *existing.entry(bin).or_insert(0) += qty;
    }
    existing
}

/// Bin quantities queued in bin order, handed out front to back.
pub type BinPool = VecDeque<(BinEntry, i64)>;

pub fn bin_pool(bins: &BinAllocations) -> BinPool {
    bins.iter().map(|(b, q)| (*b, *q)).collect()
}

/// Take up to `quantity` from the front of the pool.
pub fn take_bins(pool: &mut BinPool, mut quantity: i64) -> BinAllocations {
    let mut taken = BinAllocations::new();
    while quantity > 0 {
        let Some((bin, available)) = pool.front_mut() else {
            break;
        };
        let used = (*available).min(quantity);
        *taken.entry(*bin).or_insert(0) += used;
        *available -= used;
        quantity -= used;
        if *available == 0 {
            pool.pop_front();
        }
    }
    taken
}
