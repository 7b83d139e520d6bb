//! Listener-side TLS configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::error::{Error, Result};
use crate::trust::TrustAnchors;
use crate::verifier::DynamicClientCertVerifier;

/// Builds the listener [`ServerConfig`].
///
/// The resulting configuration:
///
/// * presents the server keypair loaded once from `cert_path`/`key_path`
///   (PEM),
/// * accepts TLS 1.2 and newer only,
/// * requires and verifies a client certificate against the *current*
///   [`TrustAnchors`] snapshot at every handshake, so trust installed via
///   [`TrustAnchors::set_trusted`] takes effect without touching the
///   listening socket.
///
/// rustls always honours the server's cipher-suite preference order.
///
/// # Errors
///
/// Returns an error if the PEM files cannot be read or contain no usable
/// certificate/key material, or if rustls rejects the keypair.
pub fn server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
    anchors: TrustAnchors,
) -> Result<ServerConfig> {
    crate::crypto::ensure_crypto_provider_installed();

    let certs = load_certs(cert_path.as_ref())?;
    let key = load_key(key_path.as_ref())?;

    let verifier = Arc::new(DynamicClientCertVerifier::new(anchors));

    let config = ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ])
    .with_client_cert_verifier(verifier)
    .with_single_cert(certs, key)?;

    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(Error::NoServerCert(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| Error::NoServerKey(path.to_path_buf()))
}
