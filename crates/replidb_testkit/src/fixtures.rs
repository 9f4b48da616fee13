//! Session and replica fixtures.
//!
//! Everything here runs on [`InMemoryStore`] and uses fixed client ids
//! so failures reproduce. Panicking on setup errors is fine in a test
//! utility.

use replidb_core::{AccessGate, ClientId, DeltaConcat, OwnerId, Scope};
use replidb_identity::{DeviceIdentity, UserIdentity};
use replidb_store::InMemoryStore;
use replidb_sync_engine::{RetryConfig, Session, SyncConfig};
use std::sync::Arc;

/// A sync config suitable for tests: small batches surface pagination
/// bugs, immediate retries keep tests fast.
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_batch_ops(8)
        .with_retry(RetryConfig::immediate())
}

fn open(client: u32, user: UserIdentity, gate: AccessGate) -> Session<InMemoryStore> {
    Session::open_with_client(
        InMemoryStore::new(),
        ClientId::new(client),
        user,
        DeviceIdentity::generate(),
        gate,
        Arc::new(DeltaConcat),
        test_config(),
    )
    .expect("open session")
}

/// One session with a fresh user, trusting no one.
pub fn solo_session(client: u32) -> Session<InMemoryStore> {
    open(client, UserIdentity::generate(), AccessGate::default())
}

/// Two sessions for the same user on different devices, as a phone and
/// a laptop would be. They accept each other because the user matches.
pub fn device_pair() -> (Session<InMemoryStore>, Session<InMemoryStore>) {
    let user = UserIdentity::generate();
    let twin = UserIdentity::from_seed(&user.to_seed());
    (
        open(1, user, AccessGate::default()),
        open(2, twin, AccessGate::default()),
    )
}

/// Two sessions for different users, each trusting the other globally.
pub fn trusted_pair() -> (Session<InMemoryStore>, Session<InMemoryStore>) {
    let user_a = UserIdentity::generate();
    let user_b = UserIdentity::generate();
    let hash_a = user_a.key().hash();
    let hash_b = user_b.key().hash();
    (
        open(1, user_a, AccessGate::new([hash_b])),
        open(2, user_b, AccessGate::new([hash_a])),
    )
}

/// A scope with a recognizable owner byte pattern.
pub fn scope(tag: u8, collection: &str) -> Scope {
    Scope::new(OwnerId::new([tag; 32]), collection)
}
