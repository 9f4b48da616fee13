//! Tree queries over the parent/child index.
//!
//! `ChildOf` operations arrange docs into a forest per (owner,
//! collection). The parent index is an acceleration structure only;
//! every hit is verified against the doc's merged `ChildOf` history
//! before it is reported, so stale entries from superseded re-parent
//! operations never surface.

use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::log::OpLog;
use crate::op::{merge_ops, OpKind, OpPayload};
use crate::types::Scope;
use crate::CrdtMerge;
use replidb_store::{ReadTxn, ScanRange};
use std::collections::BTreeSet;

/// Upper bound on tree depth walked by path and descendant queries.
/// A walk exceeding it reports a cycle instead of looping.
pub const MAX_TREE_DEPTH: usize = 64;

/// A verified child of a parent doc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    /// Display name under the parent.
    pub name: String,
    /// The child doc id.
    pub doc: String,
}

/// The doc's current (parent, name), from its merged `ChildOf` history.
/// `None` if the doc has no `ChildOf` record.
pub(crate) fn parent_of(
    txn: &dyn ReadTxn,
    scope: &Scope,
    doc: &str,
    crdt: &dyn CrdtMerge,
) -> CoreResult<Option<(Option<String>, String)>> {
    let records = OpLog::doc_ops(txn, OpKind::ChildOf, scope, doc)?;
    if records.is_empty() {
        return Ok(None);
    }
    let merged = merge_ops(&records, false, crdt)?;
    match merged.payload {
        OpPayload::ChildOf { parent, name, .. } => Ok(Some((parent, name))),
        _ => Ok(None),
    }
}

pub(crate) fn is_deleted(txn: &dyn ReadTxn, scope: &Scope, doc: &str) -> CoreResult<bool> {
    Ok(!OpLog::doc_ops(txn, OpKind::DeleteDoc, scope, doc)?.is_empty())
}

/// The verified, live children of `parent`, sorted by name.
pub(crate) fn children(
    txn: &dyn ReadTxn,
    scope: &Scope,
    parent: &str,
    crdt: &dyn CrdtMerge,
) -> CoreResult<Vec<ChildEntry>> {
    let prefix = keys::parent_prefix(&scope.owner, &scope.collection, parent);
    let mut entries = Vec::new();
    for (key, value) in txn.scan(&ScanRange::prefixed(prefix.clone()))? {
        let Some(name) = keys::name_from_parent_key(&key, prefix.len()) else {
            continue;
        };
        let doc = String::from_utf8(value)
            .map_err(|_| CoreError::corrupt_record(0, "non-utf8 doc id in parent index"))?;
        // Confirm against the merged history; a superseded re-parent may
        // have left this entry behind until the next compaction.
        match parent_of(txn, scope, &doc, crdt)? {
            Some((Some(current_parent), current_name))
                if current_parent == parent && current_name == name =>
            {
                if !is_deleted(txn, scope, &doc)? {
                    entries.push(ChildEntry { name, doc });
                }
            }
            _ => {}
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// The doc ids from the root down to `doc`, inclusive.
///
/// Fails with a cycle error if the walk revisits a doc or exceeds
/// [`MAX_TREE_DEPTH`]; concurrent re-parents on different replicas can
/// legitimately create a cycle until one side's operation loses.
pub(crate) fn path(
    txn: &dyn ReadTxn,
    scope: &Scope,
    doc: &str,
    crdt: &dyn CrdtMerge,
) -> CoreResult<Vec<String>> {
    let mut path = vec![doc.to_string()];
    let mut seen: BTreeSet<String> = BTreeSet::from([doc.to_string()]);
    let mut current = doc.to_string();
    loop {
        match parent_of(txn, scope, &current, crdt)? {
            Some((Some(parent), _)) => {
                if !seen.insert(parent.clone()) || path.len() >= MAX_TREE_DEPTH {
                    return Err(CoreError::TreeCycle { doc: doc.into() });
                }
                path.push(parent.clone());
                current = parent;
            }
            _ => break,
        }
    }
    path.reverse();
    Ok(path)
}

/// All docs below `doc`, breadth first. Does not include `doc` itself.
pub(crate) fn descendants(
    txn: &dyn ReadTxn,
    scope: &Scope,
    doc: &str,
    crdt: &dyn CrdtMerge,
) -> CoreResult<Vec<String>> {
    let mut result = Vec::new();
    let mut frontier = vec![(doc.to_string(), 0usize)];
    let mut seen: BTreeSet<String> = BTreeSet::from([doc.to_string()]);
    while let Some((current, depth)) = frontier.pop() {
        if depth >= MAX_TREE_DEPTH {
            return Err(CoreError::TreeCycle { doc: doc.into() });
        }
        for child in children(txn, scope, &current, crdt)? {
            if seen.insert(child.doc.clone()) {
                result.push(child.doc.clone());
                frontier.push((child.doc, depth + 1));
            }
        }
    }
    Ok(result)
}
