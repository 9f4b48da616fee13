//! Signed tokens, device claims, and challenge material.
//!
//! A token is a compact two-part string, `<claims>.<signature>`, both
//! halves base64url without padding. The claims carry the issuer's
//! public key and a subject string; the signature covers the claim
//! bytes under a fixed context prefix so tokens can never be confused
//! with other signed material.

use crate::error::{IdentityError, IdentityResult};
use crate::keys::{DeviceIdentity, DeviceKey, UserIdentity, UserKey};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey};
use replidb_codec::{WireReader, WireWriter};

const TOKEN_CONTEXT: &[u8] = b"replidb-token-v1";

/// Length of a handshake challenge in bytes.
pub const CHALLENGE_LENGTH: usize = 32;

/// Random material a peer must sign to prove key possession.
pub type Challenge = [u8; CHALLENGE_LENGTH];

/// Draws a fresh random challenge.
#[must_use]
pub fn random_challenge() -> Challenge {
    rand::random()
}

/// The signed statement inside a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Raw public key of the signer.
    pub issuer: [u8; 32],
    /// What is being attested.
    pub subject: String,
}

impl TokenClaims {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_fixed(&self.issuer);
        w.put_str(&self.subject);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> IdentityResult<Self> {
        let mut r = WireReader::new(bytes);
        let issuer: [u8; 32] = r
            .take_fixed(32)?
            .try_into()
            .map_err(|_| IdentityError::malformed("issuer key truncated"))?;
        let subject = r.take_str()?.to_string();
        r.expect_end()?;
        Ok(Self { issuer, subject })
    }

    fn message(&self) -> Vec<u8> {
        let mut message = TOKEN_CONTEXT.to_vec();
        message.extend_from_slice(&self.encode());
        message
    }
}

/// A claims + signature pair in transportable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    /// The signed claims.
    pub claims: TokenClaims,
    /// Ed25519 signature over the claim bytes.
    pub signature: Signature,
}

impl SignedToken {
    fn issue_with(key: &SigningKey, subject: impl Into<String>) -> Self {
        let claims = TokenClaims {
            issuer: key.verifying_key().to_bytes(),
            subject: subject.into(),
        };
        let signature = key.sign(&claims.message());
        Self { claims, signature }
    }

    /// Checks the signature against the embedded issuer key.
    pub fn verify(&self) -> IdentityResult<()> {
        let issuer = UserKey::from_bytes(&self.claims.issuer)?;
        issuer.verify(&self.claims.message(), &self.signature)
    }

    /// Serializes to the compact `<claims>.<signature>` form.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(self.claims.encode()),
            URL_SAFE_NO_PAD.encode(self.signature.to_bytes())
        )
    }

    /// Parses the compact form. Does not verify the signature.
    pub fn decode(token: &str) -> IdentityResult<Self> {
        let (claims_part, sig_part) = token
            .split_once('.')
            .ok_or_else(|| IdentityError::malformed("missing separator"))?;
        let claim_bytes = URL_SAFE_NO_PAD
            .decode(claims_part)
            .map_err(|_| IdentityError::malformed("claims not base64"))?;
        let sig_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|_| IdentityError::malformed("signature not base64"))?
            .try_into()
            .map_err(|_| IdentityError::malformed("signature must be 64 bytes"))?;
        Ok(Self {
            claims: TokenClaims::decode(&claim_bytes)?,
            signature: Signature::from_bytes(&sig_bytes),
        })
    }
}

/// A user-signed statement binding a device key to the user.
///
/// Presented during the handshake so a peer can check that the device
/// it is talking to really belongs to the user it claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClaim(SignedToken);

impl DeviceClaim {
    /// Issues a claim for `device`, signed by the user key.
    #[must_use]
    pub fn issue(user: &UserIdentity, device: &DeviceKey) -> Self {
        let subject = URL_SAFE_NO_PAD.encode(device.to_bytes());
        Self(SignedToken::issue_with(user.signing_key(), subject))
    }

    /// The user key that issued this claim. Unverified until
    /// [`DeviceClaim::verify`] is called.
    pub fn user_key(&self) -> IdentityResult<UserKey> {
        UserKey::from_bytes(&self.0.claims.issuer)
    }

    /// Verifies the claim and returns the bound device key.
    ///
    /// Fails if the claim was issued by a key other than
    /// `expected_user`, if the signature does not verify, or if the
    /// subject is not a valid device key.
    pub fn verify(&self, expected_user: &UserKey) -> IdentityResult<DeviceKey> {
        if self.0.claims.issuer != expected_user.to_bytes() {
            return Err(IdentityError::WrongIssuer);
        }
        self.0.verify()?;
        let device_bytes: [u8; 32] = URL_SAFE_NO_PAD
            .decode(&self.0.claims.subject)
            .map_err(|_| IdentityError::malformed("device key not base64"))?
            .try_into()
            .map_err(|_| IdentityError::malformed("device key must be 32 bytes"))?;
        DeviceKey::from_bytes(&device_bytes)
    }

    /// Serializes to the compact token form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.0.encode()
    }

    /// Parses the compact token form. Does not verify.
    pub fn decode(token: &str) -> IdentityResult<Self> {
        SignedToken::decode(token).map(Self)
    }
}

/// Signs a challenge with the device key. The token subject is the
/// base64 of the challenge itself.
#[must_use]
pub fn answer_challenge(device: &DeviceIdentity, challenge: &Challenge) -> SignedToken {
    SignedToken::issue_with(device.signing_key(), URL_SAFE_NO_PAD.encode(challenge))
}

/// Verifies a challenge answer: issued by `device`, subject matching
/// `challenge`, signature valid.
pub fn verify_challenge_answer(
    token: &SignedToken,
    device: &DeviceKey,
    challenge: &Challenge,
) -> IdentityResult<()> {
    if token.claims.issuer != device.to_bytes() {
        return Err(IdentityError::WrongIssuer);
    }
    if token.claims.subject != URL_SAFE_NO_PAD.encode(challenge) {
        return Err(IdentityError::SubjectMismatch);
    }
    token.verify()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip_and_verify() {
        let user = UserIdentity::generate();
        let token = SignedToken::issue_with(user.signing_key(), "subject");
        let decoded = SignedToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded, token);
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn tampered_claims_fail_verification() {
        let user = UserIdentity::generate();
        let mut token = SignedToken::issue_with(user.signing_key(), "subject");
        token.claims.subject = "other".into();
        assert!(matches!(token.verify(), Err(IdentityError::InvalidSignature)));
    }

    #[test]
    fn malformed_token_strings_rejected() {
        assert!(SignedToken::decode("no-separator").is_err());
        assert!(SignedToken::decode("!!!.!!!").is_err());
        assert!(SignedToken::decode("YQ.YQ").is_err());
    }

    #[test]
    fn device_claim_binds_device_to_user() {
        let user = UserIdentity::generate();
        let device = DeviceIdentity::generate();
        let claim = DeviceClaim::issue(&user, &device.key());

        assert_eq!(claim.user_key().unwrap(), user.key());
        let bound = claim.verify(&user.key()).unwrap();
        assert_eq!(bound, device.key());
    }

    #[test]
    fn device_claim_rejects_wrong_user() {
        let user = UserIdentity::generate();
        let impostor = UserIdentity::generate();
        let device = DeviceIdentity::generate();
        let claim = DeviceClaim::issue(&user, &device.key());
        assert!(matches!(
            claim.verify(&impostor.key()),
            Err(IdentityError::WrongIssuer)
        ));
    }

    #[test]
    fn device_claim_survives_transport() {
        let user = UserIdentity::generate();
        let device = DeviceIdentity::generate();
        let claim = DeviceClaim::issue(&user, &device.key());
        let decoded = DeviceClaim::decode(&claim.encode()).unwrap();
        assert_eq!(decoded.verify(&user.key()).unwrap(), device.key());
    }

    #[test]
    fn challenge_answer_verifies() {
        let device = DeviceIdentity::generate();
        let challenge = random_challenge();
        let answer = answer_challenge(&device, &challenge);
        assert!(verify_challenge_answer(&answer, &device.key(), &challenge).is_ok());
    }

    #[test]
    fn challenge_answer_rejects_wrong_challenge_or_device() {
        let device = DeviceIdentity::generate();
        let other = DeviceIdentity::generate();
        let challenge = random_challenge();
        let answer = answer_challenge(&device, &challenge);

        assert!(matches!(
            verify_challenge_answer(&answer, &other.key(), &challenge),
            Err(IdentityError::WrongIssuer)
        ));
        let different = random_challenge();
        assert!(matches!(
            verify_challenge_answer(&answer, &device.key(), &different),
            Err(IdentityError::SubjectMismatch)
        ));
    }

    #[test]
    fn challenges_are_unique() {
        assert_ne!(random_challenge(), random_challenge());
    }
}
