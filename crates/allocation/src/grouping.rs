//! Grouping of lines into the ERP documents they post as.
//!
//! The ERP requires every line that copies from one source document to be
//! posted in the same target document. Lines without a source post together
//! as one additional generic document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use scanbridge_documents::DocumentRef;

use crate::bins::{bin_pool, take_bins};
use crate::line::{DocumentLineAllocation, SourceLink};

/// Destination grouping key. Sourceless lines sort last.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    Source(DocumentRef),
    NoSource,
}

impl GroupKey {
    pub fn source(&self) -> Option<DocumentRef> {
        match self {
            GroupKey::Source(doc) => Some(*doc),
            GroupKey::NoSource => None,
        }
    }
}

impl core::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GroupKey::Source(doc) => write!(f, "{}:{}", doc.doc_type, doc.doc_entry),
            GroupKey::NoSource => f.write_str("no-source"),
        }
    }
}

pub type DocumentGroups = BTreeMap<GroupKey, Vec<DocumentLineAllocation>>;

/// Group lines by the document they will be created from.
///
/// Lines whose links span several source documents are split first, so
/// every group holds lines of exactly one source.
pub fn group_for_document_creation<I>(lines: I) -> DocumentGroups
where
    I: IntoIterator<Item = DocumentLineAllocation>,
{
    let mut groups = DocumentGroups::new();
    for line in lines {
        for part in split_by_source(line) {
            let key = part
                .source_document()
                .map_or(GroupKey::NoSource, GroupKey::Source);
            groups.entry(key).or_default().push(part);
        }
    }
    groups
}

/// Split a line into one line per source document plus, if some quantity
/// is not linked to any source, one sourceless line.
///
/// Bin allocations are handed out in bin order, filling each part in turn.
pub fn split_by_source(line: DocumentLineAllocation) -> Vec<DocumentLineAllocation> {
    let mut per_document: Vec<(DocumentRef, Vec<SourceLink>)> = Vec::new();
    for link in &line.source_links {
        let doc = link.document();
        match per_document.iter_mut().find(|(d, _)| *d == doc) {
            Some((_, links)) => links.push(link.clone()),
            None => per_document.push((doc, vec![link.clone()])),
        }
    }

    let remainder = (line.requested_quantity - line.linked_quantity()).max(0);
    if per_document.is_empty() || (per_document.len() == 1 && remainder == 0) {
        return vec![line];
    }

    let mut pool = bin_pool(&line.bins);
    let mut parts = Vec::with_capacity(per_document.len() + 1);

    for (_, links) in per_document {
        let quantity: i64 = links.iter().map(|l| l.consumed).sum();
        parts.push(DocumentLineAllocation {
            requested_quantity: quantity,
            source_links: links,
            bins: take_bins(&mut pool, quantity),
            ..line.clone()
        });
    }

    if remainder > 0 {
        parts.push(DocumentLineAllocation {
            requested_quantity: remainder,
            source_links: Vec::new(),
            bins: take_bins(&mut pool, remainder),
            ..line.clone()
        });
    }

    // Over-binned input keeps its surplus on the last part so totals survive.
    if let Some(last) = parts.last_mut() {
        for (bin, qty) in pool {
            *last.bins.entry(bin).or_insert(0) += qty;
        }
    }

    parts
}
