//! Signed-payload verification for federation metadata.
//!
//! The federation operator publishes the metadata document as a JWS in
//! compact serialization. Freshness is enforced at the signature layer: an
//! `exp` claim in the *protected header* (seconds since epoch) bounds how
//! long the signed bytes may be reused, so a stale cache file cannot
//! outlive its validity window.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use time::OffsetDateTime;

use crate::metadata::Metadata;

const SUPPORTED_ALGORITHMS: &[Algorithm; 8] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// An error that can arise verifying a signed metadata document.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// The JWK set cannot be parsed.
    #[error("failed to parse JWKS: {0}")]
    JwkSet(#[source] serde_json::Error),

    /// The signed bytes are not a parseable compact-serialization JWS.
    #[error("failed to parse JWS: {0}")]
    Jws(String),

    /// The `alg` protected header names an unsupported algorithm.
    #[error("algorithm in 'alg' header is not supported")]
    UnsupportedAlgorithm,

    /// No key in the JWK set verifies the signature.
    #[error("JWS signature cannot be verified by any key in the JWKS")]
    Untrusted,

    /// The protected header carries an `exp` that is in the past.
    #[error("metadata expired at {expired_at} (current time {now})")]
    Expired {
        /// The `exp` protected-header value, seconds since epoch.
        expired_at: i64,
        /// The wall clock at verification time, seconds since epoch.
        now: i64,
    },

    /// The verified payload does not decode as a metadata document.
    #[error("failed to decode metadata payload: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Verifies `signed` against the JWK set in `jwks` and decodes the payload.
///
/// Verification steps, in order:
///
/// 1. parse the JWK set,
/// 2. parse the compact JWS and check the `alg` header,
/// 3. verify the signature: the key matching the header `kid` if present,
///    otherwise every key in the set,
/// 4. if the protected header carries an `exp` claim (seconds since
///    epoch), fail when the wall clock is strictly past it; absence of
///    `exp` is permitted,
/// 5. JSON-decode the payload into [`Metadata`].
///
/// # Errors
///
/// Returns a [`VerifyError`] describing the first step that failed. Any
/// trust or signature failure is fatal for this payload.
pub fn verify(signed: &[u8], jwks: &[u8]) -> Result<Metadata, VerifyError> {
    let keyset: JwkSet = serde_json::from_slice(jwks).map_err(VerifyError::JwkSet)?;

    let token = std::str::from_utf8(signed)
        .map_err(|e| VerifyError::Jws(e.to_string()))?
        .trim();

    let header = jsonwebtoken::decode_header(token).map_err(|e| VerifyError::Jws(e.to_string()))?;

    if !SUPPORTED_ALGORITHMS.contains(&header.alg) {
        return Err(VerifyError::UnsupportedAlgorithm);
    }

    let candidates: Vec<&Jwk> = match header.kid.as_deref().and_then(|kid| keyset.find(kid)) {
        Some(key) => vec![key],
        None => keyset.keys.iter().collect(),
    };

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let mut payload: Option<serde_json::Value> = None;
    for jwk in candidates {
        let Ok(key) = DecodingKey::from_jwk(jwk) else {
            continue;
        };
        if let Ok(data) = jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation) {
            payload = Some(data.claims);
            break;
        }
    }

    let payload = payload.ok_or(VerifyError::Untrusted)?;

    if let Some(expired_at) = protected_header_exp(token)? {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if now > expired_at {
            return Err(VerifyError::Expired { expired_at, now });
        }
    }

    serde_json::from_value(payload).map_err(VerifyError::Payload)
}

/// Reads the `exp` claim from the JWS protected header, if present.
///
/// `jsonwebtoken`'s typed header has no slot for non-registered
/// parameters, so the first segment is decoded again as free-form JSON.
fn protected_header_exp(token: &str) -> Result<Option<i64>, VerifyError> {
    let first = token
        .split('.')
        .next()
        .ok_or_else(|| VerifyError::Jws("empty token".into()))?;

    let raw = URL_SAFE_NO_PAD
        .decode(first)
        .map_err(|e| VerifyError::Jws(e.to_string()))?;

    let header: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|e| VerifyError::Jws(e.to_string()))?;

    Ok(header.get("exp").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().map(|f| f.trunc() as i64))
    }))
}
