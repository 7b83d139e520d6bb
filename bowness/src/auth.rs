//! Per-connection authentication state and identity headers.
//!
//! A TLS connection's verified chain cannot change between requests, and
//! pin lookup is a linear scan over the whole federation, so the
//! authentication decision is computed once per connection and memoised
//! in a [`ConnectionAuth`] slot shared by all requests on that
//! connection.

use std::sync::OnceLock;

use fedtls::{ClientIdentity, LookupError};
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue};
use log::warn;

/// Header carrying the authenticated entity ID, always set.
pub const ENTITY_ID_HEADER: &str = "X-FedTLSAuth-Entity-ID";
/// Header carrying the entity's organization, set when registered.
pub const ORGANIZATION_HEADER: &str = "X-FedTLSAuth-Organization";
/// Header carrying the entity's organization ID, set when registered.
pub const ORGANIZATION_ID_HEADER: &str = "X-FedTLSAuth-Organization-ID";

/// The authentication outcome for one connection.
#[derive(Debug, Clone)]
pub struct AuthStatus {
    /// Whether the connection was successfully authenticated.
    pub granted: bool,
    /// The peer's entity ID when granted.
    pub entity_id: String,
    /// The entity's organization, when present in metadata.
    pub organization: Option<String>,
    /// The entity's organization ID, when present in metadata.
    pub organization_id: Option<String>,
    /// The lookup error message when not granted.
    pub error: Option<String>,
}

/// The per-connection authentication slot.
///
/// Concurrent first requests may race on the computation, but every
/// request observes the same final [`AuthStatus`].
#[derive(Debug, Default)]
pub struct ConnectionAuth {
    slot: OnceLock<AuthStatus>,
}

impl ConnectionAuth {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoised authentication status, computing it on the
    /// first request of the connection.
    pub fn resolve<F>(&self, lookup: F) -> &AuthStatus
    where
        F: FnOnce() -> Result<ClientIdentity, LookupError>,
    {
        self.slot.get_or_init(|| match lookup() {
            Ok(identity) => AuthStatus {
                granted: true,
                entity_id: identity.entity_id,
                organization: identity.organization,
                organization_id: identity.organization_id,
                error: None,
            },
            Err(e) => AuthStatus {
                granted: false,
                entity_id: String::new(),
                organization: None,
                organization_id: None,
                error: Some(e.to_string()),
            },
        })
    }
}

/// Stamps the authenticated identity into the upstream request headers.
///
/// The entity-ID header always overwrites whatever the client sent. The
/// organization headers are set when the value is registered and
/// *removed* otherwise, so a client cannot smuggle its own.
pub fn stamp_identity(headers: &mut HeaderMap, auth: &AuthStatus) {
    set_header(headers, ENTITY_ID_HEADER, &auth.entity_id);
    set_or_clear(headers, ORGANIZATION_HEADER, auth.organization.as_deref());
    set_or_clear(
        headers,
        ORGANIZATION_ID_HEADER,
        auth.organization_id.as_deref(),
    );
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    let name = header_name(name);
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            // Entity IDs are URIs in practice; a value that cannot be
            // carried in a header can only be cleared.
            warn!("identity value for {name} is not a valid header value; clearing");
            headers.remove(name);
        }
    }
}

fn set_or_clear(headers: &mut HeaderMap, name: &'static str, value: Option<&str>) {
    match value {
        Some(value) => set_header(headers, name, value),
        None => {
            headers.remove(header_name(name));
        }
    }
}

fn header_name(name: &'static str) -> HeaderName {
    // The constants above are statically known to be valid header names;
    // HeaderName normalises them to their lowercase wire form.
    HeaderName::from_bytes(name.as_bytes()).expect("valid header name")
}
