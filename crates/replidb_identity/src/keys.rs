//! User and device key pairs.
//!
//! A *user* key identifies an account; its SHA-256 hash is the
//! [`UserHash`] that permission records and the owner namespace refer
//! to. A *device* key identifies one installation and signs challenge
//! answers; it is bound to a user by a [`crate::DeviceClaim`] signed
//! with the user key.

use crate::error::{IdentityError, IdentityResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use replidb_core::{OwnerId, UserHash};
use sha2::{Digest, Sha256};

fn hash_key(key: &VerifyingKey) -> [u8; 32] {
    let digest = Sha256::digest(key.as_bytes());
    digest.into()
}

/// A user's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserKey(VerifyingKey);

impl UserKey {
    /// Parses a public key from its 32 raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> IdentityResult<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| IdentityError::InvalidKey)
    }

    /// The raw key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// The hash identifying this user in permission records.
    #[must_use]
    pub fn hash(&self) -> UserHash {
        UserHash::new(hash_key(&self.0))
    }

    /// The owner namespace rooted at this user.
    #[must_use]
    pub fn owner_id(&self) -> OwnerId {
        OwnerId::new(hash_key(&self.0))
    }

    /// Verifies a signature made with the matching secret key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> IdentityResult<()> {
        self.0
            .verify(message, signature)
            .map_err(|_| IdentityError::InvalidSignature)
    }
}

/// A user's key pair.
pub struct UserIdentity(SigningKey);

impl UserIdentity {
    /// Generates a fresh user identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    /// Restores an identity from its 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// The seed bytes for persistence.
    #[must_use]
    pub fn to_seed(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// The public half.
    #[must_use]
    pub fn key(&self) -> UserKey {
        UserKey(self.0.verifying_key())
    }

    /// Signs a message with the user key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.0.sign(message)
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.0
    }
}

impl std::fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserIdentity")
            .field("user", &self.key().hash())
            .finish_non_exhaustive()
    }
}

/// A device's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceKey(VerifyingKey);

impl DeviceKey {
    /// Parses a public key from its 32 raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> IdentityResult<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| IdentityError::InvalidKey)
    }

    /// The raw key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Verifies a signature made with the matching secret key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> IdentityResult<()> {
        self.0
            .verify(message, signature)
            .map_err(|_| IdentityError::InvalidSignature)
    }
}

/// A device's key pair.
pub struct DeviceIdentity(SigningKey);

impl DeviceIdentity {
    /// Generates a fresh device identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    /// Restores an identity from its 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// The seed bytes for persistence.
    #[must_use]
    pub fn to_seed(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// The public half.
    #[must_use]
    pub fn key(&self) -> DeviceKey {
        DeviceKey(self.0.verifying_key())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.0
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity").finish_non_exhaustive()
    }
}
