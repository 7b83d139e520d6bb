#![deny(unsafe_code)]
#![warn(clippy::all)]

//! Application library for the bowness reverse proxy.
//!
//! The binary in `main.rs` is a thin wiring layer; the actual proxy —
//! configuration, per-connection authentication, rate limiting, timeout
//! plumbing, and the TLS/HTTP serving loop — lives here so integration
//! tests can drive a fully assembled server in-process.

pub mod auth;
pub mod limiter;
pub mod proxy;
pub mod server;
pub mod settings;
pub mod timeouts;
