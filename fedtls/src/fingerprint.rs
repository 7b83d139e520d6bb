//! SPKI fingerprints for pin matching.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};

/// An error that can arise computing a certificate fingerprint.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FingerprintError {
    /// The input is not a parseable DER-encoded X.509 certificate.
    #[error("failed parsing certificate: {0}")]
    CertParse(String),
}

/// Returns the SHA-256 fingerprint of a certificate's SubjectPublicKeyInfo.
///
/// The digest is computed over the raw SPKI bytes exactly as carried in the
/// certificate (no re-serialization) and encoded with standard-alphabet
/// base64 including padding. Equality with a pin's `digest` constitutes a
/// pin match.
///
/// # Errors
///
/// Returns [`FingerprintError::CertParse`] if `cert_der` is not a valid
/// DER-encoded X.509 certificate.
pub fn fingerprint(cert_der: &[u8]) -> Result<String, FingerprintError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| FingerprintError::CertParse(format!("{e:?}")))?;

    let digest = Sha256::digest(cert.tbs_certificate.subject_pki.raw);
    Ok(STANDARD.encode(digest))
}
