//! Signed session tokens.
//!
//! A token is `base64url(claims_json) "." base64url(ed25519_signature)`.
//! The signature covers the exact encoded claim bytes, so verification never
//! depends on re-serializing the claims. The signing key is derived from the
//! configured session secret with a BLAKE3 derive-key context, so every
//! server instance sharing the secret accepts the same tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::constants::KDF_CONTEXT_SESSION_KEY;
use crate::error::SessionError;
use crate::types::{Role, UserId};

/// What a session token asserts about its bearer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sub: UserId,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionClaims {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Issues and verifies session tokens.
#[derive(Clone)]
pub struct SessionSigner {
    signing_key: SigningKey,
}

impl SessionSigner {
    /// Derive the signing key from a secret string.
    pub fn from_secret(secret: &str) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SESSION_KEY);
        hasher.update(secret.as_bytes());
        let hash = hasher.finalize();
        Self {
            signing_key: SigningKey::from_bytes(hash.as_bytes()),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Issue a token for `user` valid for `ttl` from now.
    pub fn issue(&self, user: UserId, role: Role, ttl: Duration) -> String {
        let now = Utc::now();
        self.issue_claims(&SessionClaims {
            sub: user,
            role,
            issued_at: now,
            expires_at: now + ttl,
        })
    }

    pub fn issue_claims(&self, claims: &SessionClaims) -> String {
        // Serializing a plain struct of ids and timestamps cannot fail.
        let payload = serde_json::to_vec(claims).unwrap_or_default();
        let signature = self.signing_key.sign(&payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        )
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        verify_with_key(token, &self.verifying_key())
    }
}

pub fn verify_with_key(token: &str, key: &VerifyingKey) -> Result<SessionClaims, SessionError> {
    let (payload_b64, sig_b64) = token.trim().split_once('.').ok_or(SessionError::Malformed)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| SessionError::Malformed)?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| SessionError::Malformed)?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| SessionError::Malformed)?;

    key.verify(&payload, &signature)
        .map_err(|_| SessionError::BadSignature)?;

    let claims: SessionClaims =
        serde_json::from_slice(&payload).map_err(|_| SessionError::Malformed)?;

    if claims.is_expired() {
        return Err(SessionError::Expired);
    }

    Ok(claims)
}
