//! Credential primitives shared by key issuance and key verification.
//!
//! - Secrets are 32 bytes from the thread-local CSPRNG, hex encoded, with a
//!   short human-readable prefix (`kg_` by default) so leaked keys are easy
//!   to grep for.
//! - Only the SHA-256 digest of a secret is ever persisted.
//! - Digests are compared in constant time.
//! - Credentials are read from `Authorization: Bearer <token>` or `X-API-Key`.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// Dedicated header for API keys.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Default prefix prepended to generated secrets.
pub const DEFAULT_KEY_PREFIX: &str = "kg_";

/// Number of random bytes in a generated secret.
pub const SECRET_BYTES: usize = 32;

/// Number of leading secret characters kept for display.
pub const KEY_START_LEN: usize = 10;

/// Generate a fresh raw secret: `prefix` followed by hex-encoded random bytes.
pub fn generate_secret(prefix: &str) -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    format!("{prefix}{}", hex::encode(bytes))
}

/// One-way digest of a raw secret (lowercase hex SHA-256).
///
/// Deterministic: issuance and verification must agree on it.
pub fn digest_secret(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time equality for two digests.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Leading characters of a secret, safe to show in listings.
pub fn key_start(raw: &str) -> String {
    raw.chars().take(KEY_START_LEN).collect()
}

/// Pull the raw credential out of request headers.
///
/// Checks in order:
/// 1. `Authorization: Bearer <token>` (scheme matched case-insensitively)
/// 2. `X-API-Key: <token>`
///
/// An `Authorization` header with another scheme is ignored rather than
/// rejected, so a deployment that also uses cookies or Basic auth elsewhere
/// can still fall through to `X-API-Key`.
pub fn extract_credential(headers: &HeaderMap) -> Result<&str, AuthError> {
    if let Some(value) = headers.get(AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some((scheme, token)) = value.trim().split_once(' ')
        && scheme.eq_ignore_ascii_case("bearer")
    {
        let token = token.trim();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    if let Some(value) = headers.get(API_KEY_HEADER)
        && let Ok(value) = value.to_str()
    {
        let token = value.trim();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    Err(AuthError::MissingCredential)
}
