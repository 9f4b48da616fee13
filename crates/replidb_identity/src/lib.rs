//! # RepliDB Identity
//!
//! Ed25519 identities and the signed material the sync handshake
//! exchanges.
//!
//! Two key pairs participate in authentication: the *user* key, which
//! names an account (its SHA-256 hash appears in permission records and
//! as the owner namespace), and the *device* key, one per installation.
//! A [`DeviceClaim`] signed by the user key binds a device key to the
//! account; during the handshake each side proves possession of its
//! device key by signing a random [`Challenge`] from the peer.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod keys;
mod token;

pub use error::{IdentityError, IdentityResult};
pub use keys::{DeviceIdentity, DeviceKey, UserIdentity, UserKey};
pub use token::{
    answer_challenge, random_challenge, verify_challenge_answer, Challenge, DeviceClaim,
    SignedToken, TokenClaims, CHALLENGE_LENGTH,
};
