//! Process-default crypto provider handling.

/// Installs the `ring` provider as the process default if none is set.
///
/// Losing the installation race to another thread is fine; any installed
/// provider satisfies the builders in this crate.
pub(crate) fn ensure_crypto_provider_installed() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}
