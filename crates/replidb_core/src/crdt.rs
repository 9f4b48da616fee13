//! The opaque commutative-merge collaborator for rich-content updates.

/// Commutative merge over opaque document updates.
///
/// `CrdtUpdate` payloads are produced and consumed by an external CRDT
/// engine. RepliDB never inspects them; it only needs a merge function
/// that is commutative over any set of updates, so that replicas
/// combining the same updates in different orders produce the same
/// bytes.
///
/// A Yjs-compatible engine satisfies this with its update-merge and
/// state-snapshot functions. Tests use [`DeltaConcat`].
pub trait CrdtMerge: Send + Sync {
    /// Merges a set of updates into a single equivalent update.
    ///
    /// Callers pass updates in a deterministic order; implementations
    /// must produce the same output for the same ordered input.
    fn merge(&self, updates: &[&[u8]]) -> Vec<u8>;

    /// Collapses a set of updates to the current state, discarding
    /// history ("gc" mode). Lossy but smaller.
    fn snapshot(&self, updates: &[&[u8]]) -> Vec<u8> {
        self.merge(updates)
    }
}

/// A lossless merge that concatenates length-prefixed deltas.
///
/// Suitable wherever the consuming engine can apply deltas one at a
/// time. Used by the test suite; deployments with a real CRDT engine
/// substitute it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeltaConcat;

impl DeltaConcat {
    /// Splits a merged update back into its deltas.
    #[must_use]
    pub fn split(merged: &[u8]) -> Vec<Vec<u8>> {
        let mut deltas = Vec::new();
        let mut reader = replidb_codec::WireReader::new(merged);
        while !reader.is_empty() {
            match reader.take_bytes() {
                Ok(delta) => deltas.push(delta.to_vec()),
                Err(_) => break,
            }
        }
        deltas
    }
}

impl CrdtMerge for DeltaConcat {
    fn merge(&self, updates: &[&[u8]]) -> Vec<u8> {
        let mut writer = replidb_codec::WireWriter::new();
        for update in updates {
            // A previously merged update is already a delta list; splice
            // its deltas instead of nesting.
            let deltas = Self::split(update);
            if deltas.is_empty() && !update.is_empty() {
                writer.put_bytes(update);
            } else {
                for delta in deltas {
                    writer.put_bytes(&delta);
                }
            }
        }
        writer.into_bytes()
    }
}
