//! Mutual authentication at connection start.
//!
//! Both sides open with an `Info` introducing their replica id, user
//! key, device claim, and a fresh challenge. Each side verifies the
//! peer's device claim, answers the peer's challenge with its device
//! key, and verifies the answer it gets back. Only once both answers
//! check out may op traffic flow; anything else arriving early is a
//! fatal protocol violation.

use crate::error::{SyncError, SyncResult};
use replidb_core::{ClientId, UserHash};
use replidb_identity::{
    answer_challenge, random_challenge, verify_challenge_answer, Challenge, DeviceClaim,
    DeviceIdentity, DeviceKey, SignedToken, UserIdentity, UserKey,
};
use replidb_sync_protocol::{Message, PeerInfo};

/// The key material and replica id this side presents.
#[derive(Debug)]
pub struct LocalIdentity {
    /// This replica's id.
    pub client: ClientId,
    /// The account key pair.
    pub user: UserIdentity,
    /// This installation's key pair.
    pub device: DeviceIdentity,
}

impl LocalIdentity {
    /// Bundles existing key material.
    #[must_use]
    pub fn new(client: ClientId, user: UserIdentity, device: DeviceIdentity) -> Self {
        Self {
            client,
            user,
            device,
        }
    }

    /// Generates fresh user and device keys, mainly for tests.
    #[must_use]
    pub fn generate(client: ClientId) -> Self {
        Self::new(client, UserIdentity::generate(), DeviceIdentity::generate())
    }

    /// The hash identifying this user in permission records.
    #[must_use]
    pub fn user_hash(&self) -> UserHash {
        self.user.key().hash()
    }

    fn info(&self, challenge: Challenge) -> PeerInfo {
        PeerInfo {
            client: self.client,
            user_key: self.user.key().to_bytes(),
            device_claim: DeviceClaim::issue(&self.user, &self.device.key()).encode(),
            challenge,
        }
    }
}

/// The verified identity of the peer, available once its `Info` has
/// been checked.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    /// The peer's replica id.
    pub client: ClientId,
    /// The peer's user key.
    pub user_key: UserKey,
    /// Hash of the user key, as permission records refer to it.
    pub user_hash: UserHash,
    /// The device key bound to the user by the peer's claim.
    pub device: DeviceKey,
}

/// Handshake progress for one connection.
///
/// Tracks three facts independently, since `Info` and answer messages
/// from the two sides interleave arbitrarily: whether the peer has
/// introduced itself, whether we answered its challenge, and whether
/// it answered ours.
#[derive(Debug)]
pub struct Handshake {
    challenge: Challenge,
    peer: Option<PeerIdentity>,
    local_answered: bool,
    remote_verified: bool,
}

impl Handshake {
    /// Starts a handshake, returning the `Info` to send first.
    #[must_use]
    pub fn initiate(local: &LocalIdentity) -> (Self, Message) {
        let challenge = random_challenge();
        let handshake = Self {
            challenge,
            peer: None,
            local_answered: false,
            remote_verified: false,
        };
        (handshake, Message::Info(local.info(challenge)))
    }

    /// Stable state name for diagnostics and violation errors.
    #[must_use]
    pub fn state(&self) -> &'static str {
        if self.is_authenticated() {
            "authenticated"
        } else if self.peer.is_some() {
            "challenge-answered"
        } else {
            "info-sent"
        }
    }

    /// True once both sides proved possession of their device keys.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.peer.is_some() && self.local_answered && self.remote_verified
    }

    /// The peer's verified identity, once its `Info` was accepted.
    #[must_use]
    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    /// Handles the peer's `Info`: verifies the device claim, consults
    /// `accept_user` with the peer's user hash, and answers the peer's
    /// challenge.
    ///
    /// A second `Info` on the same connection is a protocol violation.
    pub fn on_info(
        &mut self,
        local: &LocalIdentity,
        info: &PeerInfo,
        accept_user: impl FnOnce(&UserHash) -> bool,
    ) -> SyncResult<Message> {
        if self.peer.is_some() {
            return Err(SyncError::OutOfOrderMessage {
                message: "info",
                state: self.state(),
            });
        }
        let user_key = UserKey::from_bytes(&info.user_key)?;
        let claim = DeviceClaim::decode(&info.device_claim)?;
        let device = claim.verify(&user_key)?;
        let user_hash = user_key.hash();
        if !accept_user(&user_hash) {
            return Err(SyncError::UnknownUser);
        }
        let answer = answer_challenge(&local.device, &info.challenge);
        self.peer = Some(PeerIdentity {
            client: info.client,
            user_key,
            user_hash,
            device,
        });
        self.local_answered = true;
        Ok(Message::ChallengeAnswer {
            token: answer.encode(),
        })
    }

    /// Handles the peer's answer to our challenge.
    ///
    /// Requires the peer's `Info` first, since the answer is verified
    /// against the device key the claim bound. A second answer is a
    /// protocol violation.
    pub fn on_answer(&mut self, token: &str) -> SyncResult<()> {
        let Some(peer) = &self.peer else {
            return Err(SyncError::OutOfOrderMessage {
                message: "challenge-answer",
                state: self.state(),
            });
        };
        if self.remote_verified {
            return Err(SyncError::OutOfOrderMessage {
                message: "challenge-answer",
                state: self.state(),
            });
        }
        let answer = SignedToken::decode(token)?;
        verify_challenge_answer(&answer, &peer.device, &self.challenge)?;
        self.remote_verified = true;
        Ok(())
    }
}
