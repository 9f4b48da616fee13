//! Property-based generators for log operations.

use proptest::prelude::*;
use replidb_core::{ClientId, Op, OpPayload, OwnerId, Scope, UserHash};
use std::collections::BTreeMap;

/// Strategy for doc ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,16}"
}

/// Strategy for collection names.
pub fn collection_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}"
}

/// Strategy for scopes.
pub fn scope_strategy() -> impl Strategy<Value = Scope> {
    (any::<[u8; 32]>(), collection_strategy())
        .prop_map(|(owner, collection)| Scope::new(OwnerId::new(owner), collection))
}

/// Strategy covering every payload kind.
pub fn payload_strategy() -> impl Strategy<Value = OpPayload> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..128).prop_map(OpPayload::CrdtUpdate),
        (1u64..1_000, proptest::collection::vec(any::<u8>(), 0..128))
            .prop_map(|(counter, value)| OpPayload::Lww { counter, value }),
        (
            1u64..1_000,
            proptest::option::of(doc_id_strategy()),
            "[a-z ]{1,20}"
        )
            .prop_map(|(counter, parent, name)| OpPayload::ChildOf {
                counter,
                parent,
                name,
            }),
        proptest::collection::btree_map(any::<[u8; 32]>(), 0u8..8, 1..4).prop_map(|levels| {
            OpPayload::Perm {
                access: levels
                    .into_iter()
                    .map(|(hash, level)| (UserHash::new(hash), level))
                    .collect::<BTreeMap<_, _>>(),
            }
        }),
        Just(OpPayload::DeleteDoc),
        Just(OpPayload::NoPermission),
    ]
}

/// Strategy for full operations. `local_clock` is left at zero, as it
/// is for any op that has not been appended yet.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    (
        any::<u32>(),
        1u64..1_000_000,
        scope_strategy(),
        doc_id_strategy(),
        payload_strategy(),
    )
        .prop_map(|(client, clock, scope, doc, payload)| Op {
            client: ClientId::new(client),
            clock,
            local_clock: 0,
            owner: scope.owner,
            collection: scope.collection,
            doc,
            payload,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_ops_roundtrip(op in op_strategy()) {
            let decoded = Op::decode(&op.encode()).unwrap();
            prop_assert_eq!(decoded.payload, op.payload);
            prop_assert_eq!(decoded.doc, op.doc);
        }
    }
}
