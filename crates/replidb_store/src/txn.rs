//! Store and transaction trait definitions.

use crate::error::StoreResult;

/// Bounds and options for an ordered range scan.
///
/// Keys are scanned in bytewise order. `start` is inclusive, `end` is
/// exclusive. `prefix` restricts the scan to keys beginning with the
/// given bytes and may be combined with `start` to resume mid-prefix.
#[derive(Debug, Clone, Default)]
pub struct ScanRange {
    /// Inclusive lower bound.
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound.
    pub end: Option<Vec<u8>>,
    /// Required key prefix.
    pub prefix: Option<Vec<u8>>,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Scan in descending key order.
    pub reverse: bool,
}

impl ScanRange {
    /// Creates an unbounded scan.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a scan over keys with the given prefix.
    #[must_use]
    pub fn prefixed(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Sets the inclusive lower bound.
    #[must_use]
    pub fn from(mut self, start: impl Into<Vec<u8>>) -> Self {
        self.start = Some(start.into());
        self
    }

    /// Sets the exclusive upper bound.
    #[must_use]
    pub fn until(mut self, end: impl Into<Vec<u8>>) -> Self {
        self.end = Some(end.into());
        self
    }

    /// Caps the number of returned entries.
    #[must_use]
    pub fn take(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reverses the scan direction.
    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Returns true if `key` falls inside this range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        if let Some(prefix) = &self.prefix {
            if !key.starts_with(prefix) {
                return false;
            }
        }
        if let Some(start) = &self.start {
            if key < start.as_slice() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if key >= end.as_slice() {
                return false;
            }
        }
        true
    }
}

/// Read access within a transaction.
pub trait ReadTxn {
    /// Returns the value for `key`, if present.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Scans entries in the given range, in key order.
    fn scan(&self, range: &ScanRange) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// A read-write transaction.
///
/// Writes are buffered and become visible to other transactions only
/// after [`WriteTxn::commit`]. Dropping a transaction without committing
/// discards its writes. Reads within the transaction see its own
/// uncommitted writes.
pub trait WriteTxn: ReadTxn {
    /// Sets `key` to `value`.
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Removes `key` if present.
    fn delete(&mut self, key: &[u8]) -> StoreResult<()>;

    /// Atomically applies all buffered writes.
    fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// A transactional key-value store.
///
/// Implementations must serialize writers: at most one write transaction
/// is active at a time. Readers may run concurrently with each other.
pub trait KvStore: Send + Sync + 'static {
    /// Begins a read-only transaction.
    fn read(&self) -> StoreResult<Box<dyn ReadTxn + '_>>;

    /// Begins a read-write transaction, blocking until the writer slot
    /// is free.
    fn write(&self) -> StoreResult<Box<dyn WriteTxn + '_>>;
}
