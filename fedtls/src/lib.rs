#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! Core building blocks for the Federated TLS Authentication profile.
//!
//! A federation operator publishes a signed metadata document (a JWS in
//! compact serialization) enumerating the participating entities, the
//! certificate issuers each entity accepts, and the SPKI pins of each
//! entity's recognised clients. This crate provides:
//!
//! * the typed [`metadata`] model with tolerant pin decoding,
//! * [`verify`]: JWS verification against a JWK set, including the
//!   protected-header `exp` freshness check,
//! * [`fingerprint`]: the SHA-256 SPKI fingerprint used for pin matching,
//! * [`MetadataStore`]: a self-refreshing, cache-backed view of the
//!   latest verified metadata with change notifications.
//!
//! ## Example
//!
//! ```no_run
//! use fedtls::{MetadataStore, MetadataStoreOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MetadataStore::new(
//!     "https://md.swefed.se/kontosynk/kontosynk-prod-1.jws",
//!     "/etc/bowness/jwks.json",
//!     "/var/cache/bowness/metadata.jws",
//!     MetadataStoreOptions::default(),
//! )
//! .await?;
//!
//! let snapshot = store.metadata();
//! println!("{} entities in federation", snapshot.entities.len());
//!
//! store.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod fingerprint;
pub mod metadata;
pub mod store;
pub mod verify;

pub use crate::fingerprint::{fingerprint, FingerprintError};
pub use crate::metadata::{Client, Entity, Issuer, Metadata, Pin};
pub use crate::store::{
    ClientIdentity, LookupError, MetadataStore, MetadataStoreError, MetadataStoreOptions,
};
pub use crate::verify::{verify, VerifyError};
