//! The rustls client-certificate verifier consulted at every handshake.
//!
//! This module is internal to the crate. The verifier delegates all
//! cryptographic work to a `WebPkiClientVerifier` built from the current
//! [`TrustAnchors`] snapshot; rebuilding happens lazily when the trust
//! generation changes, so CA rotation takes effect per handshake without
//! touching the listener.

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex};

use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::error::{Error, Result};
use crate::trust::TrustAnchors;

fn other_err<E>(e: E) -> rustls::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rustls::Error::Other(rustls::OtherError(Arc::new(e)))
}

struct VerifierCache {
    generation: u64,
    verifier: Arc<dyn rustls::server::danger::ClientCertVerifier>,
    schemes: Vec<SignatureScheme>,
}

/// A `ClientCertVerifier` backed by the current [`TrustAnchors`] snapshot.
///
/// While the anchor set is empty the inner verifier cannot be built and
/// every handshake fails, which is the intended deny-all default before
/// the first metadata publish.
pub(crate) struct DynamicClientCertVerifier {
    anchors: TrustAnchors,
    cache: Mutex<Option<VerifierCache>>,
}

impl DynamicClientCertVerifier {
    pub(crate) fn new(anchors: TrustAnchors) -> Self {
        Self {
            anchors,
            cache: Mutex::new(None),
        }
    }

    fn get_or_build_inner(&self) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
        let snap = self.anchors.current();

        let mut guard = self
            .cache
            .lock()
            .map_err(|_| Error::Internal("client verifier cache mutex poisoned".into()))?;

        if let Some(cached) = guard.as_ref() {
            if cached.generation == snap.generation {
                return Ok(cached.verifier.clone());
            }
        }

        let built = WebPkiClientVerifier::builder(snap.roots.clone())
            .build()
            .map_err(|e| Error::VerifierBuilder(format!("{e:?}")))?;
        let schemes = built.supported_verify_schemes();

        *guard = Some(VerifierCache {
            generation: snap.generation,
            verifier: built.clone(),
            schemes,
        });

        Ok(built)
    }

    fn supported_schemes_cached(&self) -> Vec<SignatureScheme> {
        // Do not "fail open" to empty if we have a known-good cache.
        // Without one, attempt a build; on failure return empty (the
        // handshake will fail).
        if let Ok(guard) = self.cache.lock() {
            if let Some(cached) = guard.as_ref() {
                return cached.schemes.clone();
            }
        }

        self.get_or_build_inner()
            .map(|v| v.supported_verify_schemes())
            .unwrap_or_default()
    }
}

impl Debug for DynamicClientCertVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicClientCertVerifier").finish()
    }
}

impl rustls::server::danger::ClientCertVerifier for DynamicClientCertVerifier {
    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        // An empty hint list does not weaken verification; it only
        // affects what the peer might offer. Keeping this static avoids
        // lifetime/locking complexity across trust swaps.
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<rustls::server::danger::ClientCertVerified, rustls::Error> {
        let inner = self.get_or_build_inner().map_err(other_err)?;
        inner.verify_client_cert(end_entity, intermediates, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        let inner = self.get_or_build_inner().map_err(other_err)?;
        inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        let inner = self.get_or_build_inner().map_err(other_err)?;
        inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_schemes_cached()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rustls::server::danger::ClientCertVerifier as _;
    use rustls::RootCertStore;

    fn ensure_provider() {
        crate::crypto::ensure_crypto_provider_installed();
    }

    fn ca_and_client() -> (CertificateDer<'static>, CertificateDer<'static>) {
        let mut ca_params = rcgen::CertificateParams::default();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();
        let ca_der = ca_cert.der().clone();
        let issuer = rcgen::Issuer::new(ca_params, ca_key);

        let mut client_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        client_params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
        let client_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let client_cert = client_params.signed_by(&client_key, &issuer).unwrap();

        (ca_der, client_cert.der().clone())
    }

    #[test]
    fn empty_anchors_refuse_every_certificate() {
        ensure_provider();
        let (_, client) = ca_and_client();

        let verifier = DynamicClientCertVerifier::new(TrustAnchors::new());
        let result = verifier.verify_client_cert(&client, &[], UnixTime::now());
        assert!(result.is_err());
    }

    #[test]
    fn installed_ca_admits_its_clients() {
        ensure_provider();
        let (ca, client) = ca_and_client();

        let anchors = TrustAnchors::new();
        let mut roots = RootCertStore::empty();
        roots.add(ca).unwrap();
        anchors.set_trusted(roots);

        let verifier = DynamicClientCertVerifier::new(anchors);
        verifier
            .verify_client_cert(&client, &[], UnixTime::now())
            .expect("client chains to the installed CA");
    }

    #[test]
    fn trust_swap_takes_effect_on_the_next_verification() {
        ensure_provider();
        let (ca, client) = ca_and_client();
        let (other_ca, _) = ca_and_client();

        let anchors = TrustAnchors::new();
        let mut roots = RootCertStore::empty();
        roots.add(ca).unwrap();
        anchors.set_trusted(roots);

        let verifier = DynamicClientCertVerifier::new(anchors.clone());
        assert!(verifier
            .verify_client_cert(&client, &[], UnixTime::now())
            .is_ok());

        // Swap to an unrelated CA: the same client is now refused.
        let mut other_roots = RootCertStore::empty();
        other_roots.add(other_ca).unwrap();
        anchors.set_trusted(other_roots);

        assert!(verifier
            .verify_client_cert(&client, &[], UnixTime::now())
            .is_err());
    }

    #[test]
    fn verifier_is_cached_per_generation() {
        ensure_provider();
        let (ca, client) = ca_and_client();

        let anchors = TrustAnchors::new();
        let mut roots = RootCertStore::empty();
        roots.add(ca).unwrap();
        anchors.set_trusted(roots);

        let verifier = DynamicClientCertVerifier::new(anchors);

        // Two verifications at the same generation reuse the cache.
        verifier
            .verify_client_cert(&client, &[], UnixTime::now())
            .unwrap();
        let generation_before = verifier.cache.lock().unwrap().as_ref().unwrap().generation;
        verifier
            .verify_client_cert(&client, &[], UnixTime::now())
            .unwrap();
        let generation_after = verifier.cache.lock().unwrap().as_ref().unwrap().generation;

        assert_eq!(generation_before, generation_after);
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
