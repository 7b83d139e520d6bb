#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # fedtls-rustls
//!
//! Integrates [`rustls`] with a live [`fedtls::MetadataStore`].
//!
//! The listener-facing [`rustls::ServerConfig`] built here keeps a fixed
//! server keypair but verifies client certificates against a
//! [`TrustAnchors`] set that can be replaced at any time: **new TLS
//! handshakes pick up the updated client-CA pool without restarting the
//! listener or disturbing in-flight connections**.
//!
//! [`TrustBridge`] closes the loop: it subscribes to metadata change
//! notifications and rebuilds the CA pool from each entity's registered
//! issuer certificates on every successful refresh.
//!
//! Until the first metadata publish the anchor set is empty and every
//! handshake is refused, so a freshly started proxy admits nobody rather
//! than everybody.

mod bridge;
mod crypto;
mod error;
mod server;
mod trust;
mod verifier;

pub use bridge::TrustBridge;
pub use error::{Error, Result};
pub use server::server_config;
pub use trust::TrustAnchors;
