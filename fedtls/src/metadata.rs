//! Typed model of the federation metadata document.

use serde::{de, Deserialize, Deserializer, Serialize};

/// An RFC 7469-style pin directive: a digest of a client public key.
///
/// In this profile `alg` is always `sha256` and `digest` is the
/// standard-alphabet base64 SHA-256 of the client certificate's
/// SubjectPublicKeyInfo (see [`crate::fingerprint`]).
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Pin {
    /// Digest algorithm name.
    pub alg: String,
    /// Base64-encoded digest value.
    pub digest: String,
}

// Older federations published pins as {"name": ..., "value": ...}. Accept
// both spellings on decode; encoding always uses the canonical fields.
impl<'de> Deserialize<'de> for Pin {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawPin {
            alg: Option<String>,
            name: Option<String>,
            digest: Option<String>,
            value: Option<String>,
        }

        let raw = RawPin::deserialize(deserializer)?;

        let alg = raw
            .alg
            .or(raw.name)
            .ok_or_else(|| de::Error::custom("pin missing alg attribute"))?;

        let digest = raw
            .digest
            .or(raw.value)
            .ok_or_else(|| de::Error::custom("pin missing digest attribute"))?;

        Ok(Pin { alg, digest })
    }
}

/// A certificate issuer accepted for an entity's clients.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Issuer {
    /// PEM-encoded X.509 certificate trusted to issue client certificates.
    pub x509certificate: String,
}

/// A recognised client of an entity, identified by one or more SPKI pins.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Free-form description of the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// SPKI pins identifying the client's certificates.
    #[serde(default)]
    pub pins: Vec<Pin>,
}

/// One of the actors registered in the federation.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque entity identifier, used verbatim in identity headers and as
    /// the rate-limit bucket key.
    pub entity_id: String,
    /// Issuers whose client certificates this entity uses.
    #[serde(default)]
    pub issuers: Vec<Issuer>,
    /// Recognised clients of this entity.
    #[serde(default)]
    pub clients: Vec<Client>,
    /// Organization name, if registered. Absent and `null` are equivalent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Organization identifier, if registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

/// The complete federation metadata document (the signed payload).
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Suggested refresh interval in seconds. Zero means unspecified, in
    /// which case a store-level default applies.
    #[serde(default)]
    pub cache_ttl: u64,
    /// All entities registered in the federation.
    #[serde(default)]
    pub entities: Vec<Entity>,
}
