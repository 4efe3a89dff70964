use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use courier_core::{DisplayName, UserId};
use pasetors::{
    claims::{Claims, ClaimsValidationRules},
    keys::SymmetricKey,
    local,
    token::UntrustedToken,
    version4::V4,
    Local,
};

use super::{
    core::{AppState, IDENTITY_TOKEN_TTL_SECS},
    errors::ApiFailure,
};

const DISPLAY_NAME_CLAIM: &str = "name";

/// Identity of a user as vouched for by the account service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub display_name: DisplayName,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("credential is malformed")]
    Malformed,
    #[error("credential rejected: {0}")]
    Rejected(String),
    #[error("credential claims are invalid")]
    InvalidClaims,
}

/// Resolves an opaque client credential into a verified identity.
///
/// Chat upgrades and history reads go through this seam; the server never
/// trusts a raw client-supplied user id.
pub trait IdentityResolver: Send + Sync {
    /// # Errors
    /// Returns [`IdentityError`] when the credential cannot be verified.
    fn resolve(&self, credential: &str) -> Result<VerifiedIdentity, IdentityError>;
}

/// PASETO v4.local identity tokens shared with the account service.
pub struct IdentityTokens {
    key: SymmetricKey<V4>,
    ttl: Duration,
}

impl IdentityTokens {
    /// # Errors
    /// Returns an error if the key material is rejected by the PASETO backend.
    pub fn from_key_bytes(key_bytes: &[u8; 32]) -> anyhow::Result<Self> {
        let key = SymmetricKey::<V4>::from(key_bytes)
            .map_err(|e| anyhow!("token key init failed: {e}"))?;
        Ok(Self {
            key,
            ttl: Duration::from_secs(IDENTITY_TOKEN_TTL_SECS),
        })
    }

    /// Mint a token for `identity`. Used by the account service and tests.
    ///
    /// # Errors
    /// Returns an error if claims cannot be built or the token cannot be encrypted.
    pub fn issue(&self, identity: &VerifiedIdentity) -> anyhow::Result<String> {
        let mut claims =
            Claims::new_expires_in(&self.ttl).map_err(|e| anyhow!("claims init failed: {e}"))?;
        claims
            .subject(&identity.user_id.to_string())
            .map_err(|e| anyhow!("claim sub failed: {e}"))?;
        claims
            .add_additional(DISPLAY_NAME_CLAIM, identity.display_name.as_str())
            .map_err(|e| anyhow!("claim name failed: {e}"))?;

        local::encrypt(&self.key, &claims, None, None)
            .map_err(|e| anyhow!("identity token mint failed: {e}"))
    }
}

impl IdentityResolver for IdentityTokens {
    fn resolve(&self, credential: &str) -> Result<VerifiedIdentity, IdentityError> {
        let untrusted =
            UntrustedToken::<Local, V4>::try_from(credential).map_err(|_| IdentityError::Malformed)?;
        let validation_rules = ClaimsValidationRules::new();
        let trusted = local::decrypt(&self.key, &untrusted, &validation_rules, None, None)
            .map_err(|e| IdentityError::Rejected(e.to_string()))?;
        let claims = trusted.payload_claims().ok_or(IdentityError::InvalidClaims)?;

        let user_id = claims
            .get_claim("sub")
            .and_then(serde_json::Value::as_str)
            .ok_or(IdentityError::InvalidClaims)?;
        let user_id = UserId::try_from(user_id).map_err(|_| IdentityError::InvalidClaims)?;
        let display_name = claims
            .get_claim(DISPLAY_NAME_CLAIM)
            .and_then(serde_json::Value::as_str)
            .ok_or(IdentityError::InvalidClaims)?;
        let display_name = DisplayName::try_from(display_name.to_owned())
            .map_err(|_| IdentityError::InvalidClaims)?;

        Ok(VerifiedIdentity {
            user_id,
            display_name,
        })
    }
}

/// Decode a base64url (unpadded) 32-byte identity key.
///
/// # Errors
/// Returns an error if the value is not valid base64url or is not 32 bytes.
pub fn decode_identity_key(encoded: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .map_err(|e| anyhow!("identity key is not base64url: {e}"))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow!("identity key must be 32 bytes, got {}", bytes.len()))
}

pub(crate) fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<VerifiedIdentity, ApiFailure> {
    let credential = bearer_token(headers).ok_or(ApiFailure::Unauthorized)?;
    resolve_credential(state, credential, "http")
}

pub(crate) fn resolve_credential(
    state: &AppState,
    credential: &str,
    surface: &'static str,
) -> Result<VerifiedIdentity, ApiFailure> {
    state.identity.resolve(credential).map_err(|error| {
        tracing::warn!(event = "auth.resolve", outcome = "rejected", surface, %error);
        ApiFailure::Unauthorized
    })
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    header.strip_prefix("Bearer ")
}

pub(crate) fn now_unix() -> i64 {
    let now = SystemTime::now();
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}
