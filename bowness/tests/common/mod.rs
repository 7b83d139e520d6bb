//! End-to-end fixtures: certificates, signed metadata, and a backend
//! that echoes the request head it received.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const KID: &str = "metadata-signing-1";

/// One federation participant: an issuing CA plus a client certificate.
pub struct ClientMaterial {
    pub ca_pem: String,
    pub identity_pem: String,
    pub fingerprint: String,
}

/// Mints a CA and `count` client certificates issued by it.
pub fn clients_from_one_ca(count: usize) -> Vec<ClientMaterial> {
    let mut ca_params = rcgen::CertificateParams::default();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca_key =
        rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).expect("generate CA key");
    let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign CA");
    let ca_pem = ca_cert.pem();
    let issuer = rcgen::Issuer::new(ca_params, ca_key);

    (0..count)
        .map(|_| {
            let mut params =
                rcgen::CertificateParams::new(Vec::<String>::new()).expect("client params");
            params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
            let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
                .expect("generate client key");
            let cert = params.signed_by(&key, &issuer).expect("sign client cert");

            ClientMaterial {
                ca_pem: ca_pem.clone(),
                identity_pem: format!("{}{}", cert.pem(), key.serialize_pem()),
                fingerprint: fedtls::fingerprint(cert.der()).expect("fingerprint"),
            }
        })
        .collect()
}

/// Server keypair (SAN `localhost`) written as PEM files into `dir`.
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

/// Signs a one-entity metadata document, valid for an hour.
pub fn signed_metadata(entity_id: &str, ca_pem: &str, pins: &[&str]) -> (Vec<u8>, String) {
    let key = jsonwebkey::Key::generate_p256();
    let encoding_key = EncodingKey::from_ec_pem(key.try_to_pem().expect("EC key to PEM").as_bytes())
        .expect("valid EC encoding key");

    let mut jwk = jsonwebkey::JsonWebKey::new(key);
    jwk.set_algorithm(jsonwebkey::Algorithm::ES256)
        .expect("ES256 fits P-256");
    jwk.key_id = Some(KID.to_string());
    let jwk_json = serde_json::to_string(&jwk).expect("serializable JWK");
    let jwks = format!(r#"{{"keys":[{jwk_json}]}}"#);

    let pins: Vec<serde_json::Value> = pins
        .iter()
        .map(|digest| json!({"alg": "sha256", "digest": digest}))
        .collect();
    let payload = json!({
        "cache_ttl": 3600,
        "entities": [{
            "entity_id": entity_id,
            "organization": "Example Org",
            "organization_id": "SE123",
            "issuers": [{"x509certificate": ca_pem}],
            "clients": [{"pins": pins}]
        }]
    });

    let exp = OffsetDateTime::now_utc().unix_timestamp() + 3600;
    let header = json!({"alg": "ES256", "kid": KID, "exp": exp});

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("header"));
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).expect("payload"));
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature =
        jsonwebtoken::crypto::sign(signing_input.as_bytes(), &encoding_key, Algorithm::ES256)
            .expect("sign");

    (format!("{signing_input}.{signature}").into_bytes(), jwks)
}

/// A backend that answers every request with its own request head as the
/// response body, after an optional delay.
pub async fn echo_backend(delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };

            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            head.extend_from_slice(&buf[..n]);
                            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    head.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.write_all(&head).await;
                let _ = stream.flush().await;
            });
        }
    });

    addr
}
