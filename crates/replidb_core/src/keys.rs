//! Key layout for the log and its derived indexes.
//!
//! All tables live in one keyspace, distinguished by a leading table
//! byte. Variable-length path components (collection, doc, parent, name)
//! are written with a 4-byte big-endian length prefix so that prefix
//! scans over a full component never match a sibling with a longer name.
//!
//! Tables:
//! - `0x00` meta (next local clock)
//! - `0x01` log: local clock → encoded record
//! - `0x02` scope index: (owner, collection, local clock) → ()
//! - `0x03` doc/kind index: (kind, owner, collection, doc, local clock) → ()
//! - `0x04` clock entries: (client, granularity, owner?, collection?) →
//!   (origin clock, local clock)
//! - `0x05` parent index: (owner, collection, parent, child name) → doc
//! - `0x06` pending permission: (owner, collection, doc) → ()
//! - `0x07` remote frontier: (client, granularity, …) → peer local clock

use crate::types::{ClientId, OwnerId};

pub(crate) const META_NEXT_CLOCK: &[u8] = &[0x00, 0x01];

pub(crate) const T_LOG: u8 = 0x01;
pub(crate) const T_SCOPE: u8 = 0x02;
pub(crate) const T_DOC_KIND: u8 = 0x03;
pub(crate) const T_CLOCK: u8 = 0x04;
pub(crate) const T_PARENT: u8 = 0x05;
pub(crate) const T_PENDING: u8 = 0x06;
pub(crate) const T_FRONTIER: u8 = 0x07;

pub(crate) fn put_component(key: &mut Vec<u8>, component: &str) {
    key.extend_from_slice(&(component.len() as u32).to_be_bytes());
    key.extend_from_slice(component.as_bytes());
}

pub(crate) fn log_key(local_clock: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(T_LOG);
    key.extend_from_slice(&local_clock.to_be_bytes());
    key
}

pub(crate) fn log_prefix() -> Vec<u8> {
    vec![T_LOG]
}

pub(crate) fn local_clock_from_log_key(key: &[u8]) -> Option<u64> {
    if key.len() != 9 || key[0] != T_LOG {
        return None;
    }
    Some(u64::from_be_bytes(key[1..9].try_into().ok()?))
}

pub(crate) fn scope_prefix(owner: &OwnerId, collection: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + 4 + collection.len());
    key.push(T_SCOPE);
    key.extend_from_slice(owner.as_bytes());
    put_component(&mut key, collection);
    key
}

pub(crate) fn scope_key(owner: &OwnerId, collection: &str, local_clock: u64) -> Vec<u8> {
    let mut key = scope_prefix(owner, collection);
    key.extend_from_slice(&local_clock.to_be_bytes());
    key
}

pub(crate) fn local_clock_from_index_key(key: &[u8]) -> Option<u64> {
    if key.len() < 8 {
        return None;
    }
    Some(u64::from_be_bytes(key[key.len() - 8..].try_into().ok()?))
}

pub(crate) fn doc_kind_prefix(kind: u8, owner: &OwnerId, collection: &str, doc: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + 32 + 8 + collection.len() + doc.len());
    key.push(T_DOC_KIND);
    key.push(kind);
    key.extend_from_slice(owner.as_bytes());
    put_component(&mut key, collection);
    put_component(&mut key, doc);
    key
}

pub(crate) fn doc_kind_key(
    kind: u8,
    owner: &OwnerId,
    collection: &str,
    doc: &str,
    local_clock: u64,
) -> Vec<u8> {
    let mut key = doc_kind_prefix(kind, owner, collection, doc);
    key.extend_from_slice(&local_clock.to_be_bytes());
    key
}

fn scoped_entry_key(table: u8, client: ClientId, scope: &crate::clocks::ClockScope) -> Vec<u8> {
    use crate::clocks::ClockScope;
    let mut key = Vec::with_capacity(48);
    key.push(table);
    key.extend_from_slice(&client.as_u32().to_be_bytes());
    match scope {
        ClockScope::Global => key.push(0),
        ClockScope::Owner(owner) => {
            key.push(1);
            key.extend_from_slice(owner.as_bytes());
        }
        ClockScope::Collection(owner, collection) => {
            key.push(2);
            key.extend_from_slice(owner.as_bytes());
            put_component(&mut key, collection);
        }
    }
    key
}

pub(crate) fn clock_key(client: ClientId, scope: &crate::clocks::ClockScope) -> Vec<u8> {
    scoped_entry_key(T_CLOCK, client, scope)
}

pub(crate) fn frontier_key(client: ClientId, scope: &crate::clocks::ClockScope) -> Vec<u8> {
    scoped_entry_key(T_FRONTIER, client, scope)
}

pub(crate) fn parent_prefix(owner: &OwnerId, collection: &str, parent: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + 8 + collection.len() + parent.len());
    key.push(T_PARENT);
    key.extend_from_slice(owner.as_bytes());
    put_component(&mut key, collection);
    put_component(&mut key, parent);
    key
}

pub(crate) fn parent_key(owner: &OwnerId, collection: &str, parent: &str, name: &str) -> Vec<u8> {
    let mut key = parent_prefix(owner, collection, parent);
    put_component(&mut key, name);
    key
}

pub(crate) fn name_from_parent_key(key: &[u8], prefix_len: usize) -> Option<String> {
    let rest = key.get(prefix_len..)?;
    if rest.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(rest[..4].try_into().ok()?) as usize;
    let bytes = rest.get(4..4 + len)?;
    String::from_utf8(bytes.to_vec()).ok()
}

pub(crate) fn pending_prefix(owner: &OwnerId, collection: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + 4 + collection.len());
    key.push(T_PENDING);
    key.extend_from_slice(owner.as_bytes());
    put_component(&mut key, collection);
    key
}

pub(crate) fn pending_key(owner: &OwnerId, collection: &str, doc: &str) -> Vec<u8> {
    let mut key = pending_prefix(owner, collection);
    put_component(&mut key, doc);
    key
}

/// Extracts the trailing length-prefixed doc component from a pending
/// key. Same layout as the name component of a parent key.
pub(crate) fn doc_from_pending_key(key: &[u8], prefix_len: usize) -> Option<String> {
    name_from_parent_key(key, prefix_len)
}
