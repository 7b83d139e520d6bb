//! Shared fixtures: JWS minting and a one-shot federation operator.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const TEST_KID: &str = "metadata-signing-1";

/// A fresh P-256 signing key plus the JWKS advertising its public half.
pub fn test_keyset() -> (EncodingKey, String) {
    let key = jsonwebkey::Key::generate_p256();
    let encoding_key = EncodingKey::from_ec_der(&key.to_der());

    let mut jwk = jsonwebkey::JsonWebKey::new(key);
    jwk.set_algorithm(jsonwebkey::Algorithm::ES256)
        .expect("ES256 fits a P-256 key");
    jwk.key_id = Some(TEST_KID.to_string());

    let jwk_json = serde_json::to_string(&jwk).expect("serializable JWK");
    (encoding_key, format!(r#"{{"keys":[{jwk_json}]}}"#))
}

/// Assembles a compact JWS with the given protected-header `exp`
/// (`None` omits the claim entirely).
pub fn sign_metadata(payload: &serde_json::Value, exp: Option<i64>, key: &EncodingKey) -> Vec<u8> {
    let mut header = json!({"alg": "ES256", "kid": TEST_KID});
    if let Some(exp) = exp {
        header["exp"] = json!(exp);
    }

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("header json"));
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).expect("payload json"));
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature = jsonwebtoken::crypto::sign(signing_input.as_bytes(), key, Algorithm::ES256)
        .expect("signing succeeds");

    format!("{signing_input}.{signature}").into_bytes()
}

/// A minimal metadata document with one entity and one client pin.
pub fn metadata_doc(entity_id: &str, digest: &str, cache_ttl: u64) -> serde_json::Value {
    json!({
        "cache_ttl": cache_ttl,
        "entities": [{
            "entity_id": entity_id,
            "organization": "Example Org",
            "organization_id": "SE123",
            "issuers": [],
            "clients": [{"pins": [{"alg": "sha256", "digest": digest}]}]
        }]
    })
}

/// Serves `body` to exactly one HTTP client, then exits.
///
/// Returns the URL to fetch. Good enough for the plain GET the store
/// issues; no TLS, no keep-alive.
pub async fn one_shot_http_server(body: Vec<u8>, status: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };

        // Small delay so tests can finish registering listeners before
        // the first publish lands.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        // Drain the request head.
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
            }
        }

        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/jose\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = stream.write_all(head.as_bytes()).await;
        let _ = stream.write_all(&body).await;
        let _ = stream.flush().await;
    });

    format!("http://{addr}/metadata.jws")
}

/// An address nothing listens on; connecting fails immediately.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}/metadata.jws")
}
