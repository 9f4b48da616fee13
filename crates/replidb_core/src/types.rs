//! Core type definitions for RepliDB.

use std::fmt;

/// The pseudo-doc id whose `Perm` records apply to every doc in a scope.
pub const WILDCARD_DOC: &str = "*";

/// Identifier of an origin replica.
///
/// Assigned randomly per process instance; identifies which replica
/// created an operation, not a user or device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u32);

impl ClientId {
    /// Creates a client id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Draws a random client id for a new process instance.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

/// Hash identifying a data-owning identity, the root of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId(pub [u8; 32]);

impl OwnerId {
    /// Creates an owner id from its hash bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…")
    }
}

/// Hash identifying a user, derived from their public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserHash(pub [u8; 32]);

impl UserHash {
    /// Creates a user hash from its bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// An (owner, collection) pair narrowing which operations a stream or
/// clock entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
    /// The owning identity.
    pub owner: OwnerId,
    /// The collection name under that owner.
    pub collection: String,
}

impl Scope {
    /// Creates a scope.
    pub fn new(owner: OwnerId, collection: impl Into<String>) -> Self {
        Self {
            owner,
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.collection)
    }
}

/// Access level a user holds on a doc or scope.
///
/// Wire values are taken modulo 4, so any historical encoding maps onto
/// one of the four levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    /// No access.
    None,
    /// Read only.
    Read,
    /// Read and write.
    ReadWrite,
    /// Read, write, and permission management.
    Admin,
}

impl AccessLevel {
    /// Decodes a wire level (`value mod 4`).
    #[must_use]
    pub fn from_wire(value: u8) -> Self {
        match value % 4 {
            0 => AccessLevel::None,
            1 => AccessLevel::Read,
            2 => AccessLevel::ReadWrite,
            _ => AccessLevel::Admin,
        }
    }

    /// Encodes to the wire value.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            AccessLevel::None => 0,
            AccessLevel::Read => 1,
            AccessLevel::ReadWrite => 2,
            AccessLevel::Admin => 3,
        }
    }

    /// Returns true if this level permits reading.
    #[must_use]
    pub fn can_read(self) -> bool {
        self >= AccessLevel::Read
    }

    /// Returns true if this level permits writing.
    #[must_use]
    pub fn can_write(self) -> bool {
        self >= AccessLevel::ReadWrite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_level_wire_roundtrip() {
        for level in [
            AccessLevel::None,
            AccessLevel::Read,
            AccessLevel::ReadWrite,
            AccessLevel::Admin,
        ] {
            assert_eq!(AccessLevel::from_wire(level.to_wire()), level);
        }
    }

    #[test]
    fn access_level_wraps_mod_four() {
        assert_eq!(AccessLevel::from_wire(4), AccessLevel::None);
        assert_eq!(AccessLevel::from_wire(5), AccessLevel::Read);
        assert_eq!(AccessLevel::from_wire(255), AccessLevel::Admin);
    }

    #[test]
    fn access_level_ordering() {
        assert!(AccessLevel::Admin > AccessLevel::ReadWrite);
        assert!(AccessLevel::ReadWrite.can_write());
        assert!(!AccessLevel::Read.can_write());
        assert!(AccessLevel::Read.can_read());
        assert!(!AccessLevel::None.can_read());
    }

    #[test]
    fn random_client_ids_differ() {
        // Not a strict guarantee, but a collision here is 2^-32.
        assert_ne!(ClientId::random(), ClientId::random());
    }

    #[test]
    fn scope_display() {
        let scope = Scope::new(OwnerId::new([0xab; 32]), "notes");
        assert!(format!("{scope}").contains("notes"));
    }
}
