//! In-memory store for tests and embedded use.

use crate::error::StoreResult;
use crate::txn::{KvStore, ReadTxn, ScanRange, WriteTxn};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// A `BTreeMap`-backed store.
///
/// Write transactions hold the single writer slot for their lifetime and
/// buffer their mutations; commit applies the buffer under the map's
/// write lock, so readers never observe a partial transaction.
///
/// # Example
///
/// ```rust
/// use replidb_store::{InMemoryStore, KvStore, ScanRange};
///
/// let store = InMemoryStore::new();
/// let mut txn = store.write().unwrap();
/// txn.put(b"k", b"v").unwrap();
/// txn.commit().unwrap();
///
/// let txn = store.read().unwrap();
/// assert_eq!(txn.get(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    map: Arc<RwLock<Map>>,
    writer: Arc<Mutex<()>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if no entries have been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

fn scan_map(map: &Map, range: &ScanRange) -> Vec<(Vec<u8>, Vec<u8>)> {
    let iter = map
        .iter()
        .filter(|(k, _)| range.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()));
    let mut entries: Vec<_> = iter.collect();
    if range.reverse {
        entries.reverse();
    }
    if let Some(limit) = range.limit {
        entries.truncate(limit);
    }
    entries
}

struct MemoryReadTxn {
    snapshot: Map,
}

impl ReadTxn for MemoryReadTxn {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key).cloned())
    }

    fn scan(&self, range: &ScanRange) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(scan_map(&self.snapshot, range))
    }
}

struct MemoryWriteTxn<'a> {
    map: Arc<RwLock<Map>>,
    // Staged writes: Some(value) = put, None = delete.
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    _writer: MutexGuard<'a, ()>,
}

impl MemoryWriteTxn<'_> {
    fn effective(&self) -> Map {
        let mut merged = self.map.read().clone();
        for (key, value) in &self.staged {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged
    }
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.map.read().get(key).cloned())
    }

    fn scan(&self, range: &ScanRange) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(scan_map(&self.effective(), range))
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.staged.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> StoreResult<()> {
        self.staged.insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut map = self.map.write();
        for (key, value) in self.staged {
            match value {
                Some(v) => {
                    map.insert(key, v);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

impl KvStore for InMemoryStore {
    fn read(&self) -> StoreResult<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(MemoryReadTxn {
            snapshot: self.map.read().clone(),
        }))
    }

    fn write(&self) -> StoreResult<Box<dyn WriteTxn + '_>> {
        let guard = self.writer.lock();
        Ok(Box::new(MemoryWriteTxn {
            map: Arc::clone(&self.map),
            staged: BTreeMap::new(),
            _writer: guard,
        }))
    }
}
