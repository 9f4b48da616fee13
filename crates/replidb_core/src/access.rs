//! Authorization over remote operations.
//!
//! Access is derived from the merged `Perm` history of a document,
//! combined with the collection-wide wildcard document. The gate never
//! rejects a connection; unauthorized operations are dropped one at a
//! time by the apply engine.

use crate::log::OpLog;
use crate::op::{OpKind, OpPayload};
use crate::types::{AccessLevel, Scope, UserHash, WILDCARD_DOC};
use crate::{CoreResult, Op};
use replidb_store::ReadTxn;
use std::collections::BTreeSet;

/// Decides what a peer's user may do to local data.
///
/// Trusted users bypass permission lookups entirely; they are the
/// accounts this replica belongs to. Everyone else gets the per-user
/// maximum of the wildcard grant and the document grant.
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    trusted: BTreeSet<UserHash>,
}

impl AccessGate {
    /// Builds a gate trusting the given users.
    #[must_use]
    pub fn new(trusted: impl IntoIterator<Item = UserHash>) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
        }
    }

    /// Adds a trusted user.
    pub fn trust(&mut self, user: UserHash) {
        self.trusted.insert(user);
    }

    /// True if `user` bypasses permission lookups.
    #[must_use]
    pub fn is_trusted(&self, user: &UserHash) -> bool {
        self.trusted.contains(user)
    }

    /// The effective access level of `user` on (`scope`, `doc`).
    ///
    /// Owners hold admin on their own data. Otherwise the level is the
    /// maximum of the wildcard-document grant and the per-document
    /// grant, each taken from the merged `Perm` history.
    pub fn effective_level(
        &self,
        txn: &dyn ReadTxn,
        user: &UserHash,
        scope: &Scope,
        doc: &str,
    ) -> CoreResult<AccessLevel> {
        if self.is_trusted(user) || user.as_bytes() == scope.owner.as_bytes() {
            return Ok(AccessLevel::Admin);
        }
        let mut level = granted_level(txn, user, scope, WILDCARD_DOC)?;
        if doc != WILDCARD_DOC {
            level = level.max(granted_level(txn, user, scope, doc)?);
        }
        Ok(level)
    }

    /// True if `user` may read (`scope`, `doc`). Used by the outbound
    /// stream to decide between the real payload and a placeholder.
    pub fn can_read(
        &self,
        txn: &dyn ReadTxn,
        user: &UserHash,
        scope: &Scope,
        doc: &str,
    ) -> CoreResult<bool> {
        Ok(self.effective_level(txn, user, scope, doc)?.can_read())
    }

    /// True if `user` is authorized to apply `op` here.
    ///
    /// Permission changes require admin; everything else requires
    /// write access.
    pub fn permits(&self, txn: &dyn ReadTxn, user: &UserHash, op: &Op) -> CoreResult<bool> {
        let scope = Scope::new(op.owner, op.collection.clone());
        let level = self.effective_level(txn, user, &scope, &op.doc)?;
        Ok(match op.kind() {
            OpKind::Perm => level == AccessLevel::Admin,
            _ => level.can_write(),
        })
    }
}

/// The level granted to `user` by the merged `Perm` records of one doc.
fn granted_level(
    txn: &dyn ReadTxn,
    user: &UserHash,
    scope: &Scope,
    doc: &str,
) -> CoreResult<AccessLevel> {
    let records = OpLog::doc_ops(txn, OpKind::Perm, scope, doc)?;
    let mut best = 0u8;
    for record in &records {
        if let OpPayload::Perm { access } = &record.payload {
            if let Some(level) = access.get(user) {
                best = best.max(level % 4);
            }
        }
    }
    Ok(AccessLevel::from_wire(best))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientId, OwnerId};
    use replidb_store::{InMemoryStore, KvStore};
    use std::collections::BTreeMap;

    fn scope() -> Scope {
        Scope::new(OwnerId::new([7; 32]), "notes")
    }

    fn grant(store: &InMemoryStore, doc: &str, user: UserHash, level: u8) {
        let scope = scope();
        let mut op = Op {
            client: ClientId::new(1),
            clock: 1,
            local_clock: 0,
            owner: scope.owner,
            collection: scope.collection,
            doc: doc.into(),
            payload: OpPayload::Perm {
                access: BTreeMap::from([(user, level)]),
            },
        };
        let mut txn = store.write().unwrap();
        OpLog::append(txn.as_mut(), &mut op).unwrap();
        txn.commit().unwrap();
    }

    fn content_op(doc: &str) -> Op {
        let scope = scope();
        Op {
            client: ClientId::new(2),
            clock: 1,
            local_clock: 0,
            owner: scope.owner,
            collection: scope.collection,
            doc: doc.into(),
            payload: OpPayload::Lww {
                counter: 1,
                value: b"v".to_vec(),
            },
        }
    }

    #[test]
    fn unknown_user_has_no_access() {
        let store = InMemoryStore::new();
        let gate = AccessGate::default();
        let txn = store.read().unwrap();
        let level = gate
            .effective_level(txn.as_ref(), &UserHash::new([1; 32]), &scope(), "doc")
            .unwrap();
        assert_eq!(level, AccessLevel::None);
    }

    #[test]
    fn trusted_user_is_admin_everywhere() {
        let store = InMemoryStore::new();
        let user = UserHash::new([1; 32]);
        let gate = AccessGate::new([user]);
        let txn = store.read().unwrap();
        assert_eq!(
            gate.effective_level(txn.as_ref(), &user, &scope(), "doc")
                .unwrap(),
            AccessLevel::Admin
        );
    }

    #[test]
    fn owner_is_admin_on_own_data() {
        let store = InMemoryStore::new();
        let gate = AccessGate::default();
        let owner_user = UserHash::new([7; 32]); // matches scope owner
        let txn = store.read().unwrap();
        assert_eq!(
            gate.effective_level(txn.as_ref(), &owner_user, &scope(), "doc")
                .unwrap(),
            AccessLevel::Admin
        );
    }

    #[test]
    fn wildcard_and_doc_grants_combine_as_maximum() {
        let store = InMemoryStore::new();
        let user = UserHash::new([1; 32]);
        grant(&store, WILDCARD_DOC, user, 1);
        grant(&store, "doc", user, 2);

        let gate = AccessGate::default();
        let txn = store.read().unwrap();
        assert_eq!(
            gate.effective_level(txn.as_ref(), &user, &scope(), "doc")
                .unwrap(),
            AccessLevel::ReadWrite
        );
        // The wildcard alone applies to other docs.
        assert_eq!(
            gate.effective_level(txn.as_ref(), &user, &scope(), "other")
                .unwrap(),
            AccessLevel::Read
        );
    }

    #[test]
    fn later_lower_grant_does_not_revoke() {
        let store = InMemoryStore::new();
        let user = UserHash::new([1; 32]);
        grant(&store, "doc", user, 3);
        grant(&store, "doc", user, 1);

        let gate = AccessGate::default();
        let txn = store.read().unwrap();
        assert_eq!(
            gate.effective_level(txn.as_ref(), &user, &scope(), "doc")
                .unwrap(),
            AccessLevel::Admin
        );
    }

    #[test]
    fn permits_requires_write_for_content_admin_for_perms() {
        let store = InMemoryStore::new();
        let reader = UserHash::new([1; 32]);
        let writer = UserHash::new([2; 32]);
        let admin = UserHash::new([3; 32]);
        grant(&store, "doc", reader, 1);
        grant(&store, "doc", writer, 2);
        grant(&store, "doc", admin, 3);

        let gate = AccessGate::default();
        let txn = store.read().unwrap();
        let content = content_op("doc");
        assert!(!gate.permits(txn.as_ref(), &reader, &content).unwrap());
        assert!(gate.permits(txn.as_ref(), &writer, &content).unwrap());

        let mut perm_change = content_op("doc");
        perm_change.payload = OpPayload::Perm {
            access: BTreeMap::from([(reader, 2)]),
        };
        assert!(!gate.permits(txn.as_ref(), &writer, &perm_change).unwrap());
        assert!(gate.permits(txn.as_ref(), &admin, &perm_change).unwrap());
    }

    #[test]
    fn can_read_follows_effective_level() {
        let store = InMemoryStore::new();
        let user = UserHash::new([1; 32]);
        grant(&store, "doc", user, 1);

        let gate = AccessGate::default();
        let txn = store.read().unwrap();
        assert!(gate.can_read(txn.as_ref(), &user, &scope(), "doc").unwrap());
        assert!(!gate
            .can_read(txn.as_ref(), &user, &scope(), "other")
            .unwrap());
    }
}
