//! Test fixtures: a miniature federation with real certificates and a
//! signed metadata document.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::json;
use time::OffsetDateTime;

pub const KID: &str = "metadata-signing-1";

/// Client-side material for one federation entity.
pub struct EntityMaterial {
    pub ca_pem: String,
    pub client_chain: Vec<CertificateDer<'static>>,
    pub client_key: PrivateKeyDer<'static>,
    pub client_fingerprint: String,
}

/// Mints a client-auth CA and one client certificate issued by it.
pub fn entity_material() -> EntityMaterial {
    let mut ca_params = rcgen::CertificateParams::default();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .expect("generate CA key");
    let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign CA");
    let ca_pem = ca_cert.pem();
    let issuer = rcgen::Issuer::new(ca_params, ca_key);

    let mut client_params =
        rcgen::CertificateParams::new(Vec::<String>::new()).expect("client params");
    client_params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
    let client_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .expect("generate client key");
    let client_cert = client_params
        .signed_by(&client_key, &issuer)
        .expect("sign client cert");

    let client_fingerprint =
        fedtls::fingerprint(client_cert.der()).expect("fingerprint client cert");

    EntityMaterial {
        ca_pem,
        client_chain: vec![client_cert.der().clone()],
        client_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(client_key.serialize_der())),
        client_fingerprint,
    }
}

/// Server keypair PEM files (SAN `localhost`) written into `dir`.
pub fn server_material(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf, String) {
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .expect("generate server key");
    let cert = rcgen::CertificateParams::new(vec!["localhost".into()])
        .expect("server params")
        .self_signed(&key)
        .expect("self-sign server cert");

    let cert_path = dir.join("server.crt");
    let key_path = dir.join("server.key");
    std::fs::write(&cert_path, cert.pem()).expect("write server cert");
    std::fs::write(&key_path, key.serialize_pem()).expect("write server key");
    (cert_path, key_path, cert.pem())
}

/// A metadata document registering `entity_id` with the given issuer CA
/// and client pin.
pub fn metadata_doc(
    entity_id: &str,
    ca_pem: &str,
    digest: &str,
    cache_ttl: u64,
) -> serde_json::Value {
    json!({
        "cache_ttl": cache_ttl,
        "entities": [{
            "entity_id": entity_id,
            "organization": "Example Org",
            "issuers": [{"x509certificate": ca_pem}],
            "clients": [{"pins": [{"alg": "sha256", "digest": digest}]}]
        }]
    })
}

/// A signing key and the JWKS that trusts it.
pub fn keyset() -> (EncodingKey, String) {
    let key = jsonwebkey::Key::generate_p256();
    let encoding_key = EncodingKey::from_ec_der(&key.to_der());

    let mut jwk = jsonwebkey::JsonWebKey::new(key);
    jwk.set_algorithm(jsonwebkey::Algorithm::ES256)
        .expect("ES256 fits P-256");
    jwk.key_id = Some(KID.to_string());

    let jwk_json = serde_json::to_string(&jwk).expect("serializable JWK");
    (encoding_key, format!(r#"{{"keys":[{jwk_json}]}}"#))
}

/// Signs `payload` as a compact JWS valid for one hour.
pub fn sign(payload: &serde_json::Value, key: &EncodingKey) -> Vec<u8> {
    let exp = OffsetDateTime::now_utc().unix_timestamp() + 3600;
    let header = json!({"alg": "ES256", "kid": KID, "exp": exp});

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("header"));
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).expect("payload"));
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature = jsonwebtoken::crypto::sign(signing_input.as_bytes(), key, Algorithm::ES256)
        .expect("sign");

    format!("{signing_input}.{signature}").into_bytes()
}
