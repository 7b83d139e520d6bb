use std::path::PathBuf;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by `fedtls-rustls`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A PEM file on disk cannot be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The server certificate file contains no certificates.
    #[error("no certificates found in {0}")]
    NoServerCert(PathBuf),

    /// The server key file contains no usable private key.
    #[error("no private key found in {0}")]
    NoServerKey(PathBuf),

    /// Failed to build a rustls client-certificate verifier.
    #[error("rustls verifier builder error: {0}")]
    VerifierBuilder(String),

    /// A rustls error occurred.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}
