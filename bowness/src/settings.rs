//! Proxy configuration.
//!
//! Settings are read from a single YAML file. Key names are deliberately
//! spelled the way operators know them from the original deployment
//! guides (`JWKSPath`, `TargetURL`, ...); all durations are integer
//! seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fedtls::MetadataStoreOptions;
use serde::Deserialize;

/// An error that can arise loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The configuration file cannot be read.
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML or misses required keys.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// `APIKeyHeader` and `APIKeyValue` must be set together.
    #[error("APIKeyHeader and APIKeyValue must both be set or both be unset")]
    ApiKeyPairing,

    /// Rate-limit parameters must be positive when limiting is enabled.
    #[error("LimitRequestsPerSecond and LimitBurst must be positive when EnableLimiting is set")]
    BadLimitParams,
}

/// All proxy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Path to the JWK set used to verify federation metadata.
    #[serde(rename = "JWKSPath")]
    pub jwks_path: PathBuf,

    /// Path of the on-disk metadata cache file.
    #[serde(rename = "CachePath")]
    pub cache_path: PathBuf,

    /// Server certificate chain, PEM.
    #[serde(rename = "Cert")]
    pub cert: PathBuf,

    /// Server private key, PEM.
    #[serde(rename = "Key")]
    pub key: PathBuf,

    /// Backend base URL requests are proxied to.
    #[serde(rename = "TargetURL")]
    pub target_url: String,

    /// Address the TLS listener binds to, `host:port`.
    #[serde(rename = "ListenAddress")]
    pub listen_address: String,

    /// URL of the federation's signed metadata document.
    #[serde(rename = "MetadataURL", default = "default_metadata_url")]
    pub metadata_url: String,

    /// Refresh interval when the metadata carries no `cache_ttl`.
    #[serde(rename = "DefaultCacheTTL", default = "default_cache_ttl")]
    pub default_cache_ttl: u64,

    /// Retry interval after a failed metadata download.
    #[serde(rename = "NetworkRetry", default = "default_network_retry")]
    pub network_retry: u64,

    /// Retry interval after an unverifiable metadata document.
    #[serde(rename = "BadContentRetry", default = "default_bad_content_retry")]
    pub bad_content_retry: u64,

    /// Time allowed for a client to send its request headers.
    #[serde(rename = "ReadHeaderTimeout", default = "default_read_header_timeout")]
    pub read_header_timeout: u64,

    /// Deadline for reading a request body.
    #[serde(rename = "ReadTimeout", default = "default_read_timeout")]
    pub read_timeout: u64,

    /// Watchdog on stalled response writes.
    #[serde(rename = "WriteTimeout", default = "default_write_timeout")]
    pub write_timeout: u64,

    /// How long an idle keep-alive connection is kept open.
    #[serde(rename = "IdleTimeout", default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Overall deadline for the backend to produce a response. Values
    /// below one second disable the deadline.
    #[serde(rename = "BackendTimeout", default = "default_backend_timeout")]
    pub backend_timeout: u64,

    /// Whether per-entity rate limiting is applied.
    #[serde(rename = "EnableLimiting", default)]
    pub enable_limiting: bool,

    /// Steady per-entity request rate.
    #[serde(rename = "LimitRequestsPerSecond", default = "default_limit_rps")]
    pub limit_requests_per_second: f64,

    /// Per-entity burst allowance.
    #[serde(rename = "LimitBurst", default = "default_limit_burst")]
    pub limit_burst: u32,

    /// Optional header to attach to every proxied request.
    #[serde(rename = "APIKeyHeader", default)]
    pub api_key_header: Option<String>,

    /// Value of the optional API-key header.
    #[serde(rename = "APIKeyValue", default)]
    pub api_key_value: Option<String>,
}

fn default_metadata_url() -> String {
    "https://md.swefed.se/kontosynk/kontosynk-prod-1.jws".to_string()
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_network_retry() -> u64 {
    60
}
fn default_bad_content_retry() -> u64 {
    3600
}
fn default_read_header_timeout() -> u64 {
    5
}
fn default_read_timeout() -> u64 {
    20
}
fn default_write_timeout() -> u64 {
    40
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_backend_timeout() -> u64 {
    30
}
fn default_limit_rps() -> f64 {
    10.0
}
fn default_limit_burst() -> u32 {
    50
}

impl Settings {
    /// Loads and validates settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: Settings = serde_yaml::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.api_key_header.is_some() != self.api_key_value.is_some() {
            return Err(SettingsError::ApiKeyPairing);
        }

        if self.enable_limiting
            && (self.limit_requests_per_second <= 0.0 || self.limit_burst == 0)
        {
            return Err(SettingsError::BadLimitParams);
        }

        Ok(())
    }

    /// Metadata store options derived from the configured intervals.
    pub fn store_options(&self) -> MetadataStoreOptions {
        MetadataStoreOptions {
            default_cache_ttl: Duration::from_secs(self.default_cache_ttl),
            network_retry: Duration::from_secs(self.network_retry),
            bad_content_retry: Duration::from_secs(self.bad_content_retry),
        }
    }

    /// The backend deadline, or `None` when disabled (below one second).
    pub fn backend_deadline(&self) -> Option<Duration> {
        (self.backend_timeout >= 1).then(|| Duration::from_secs(self.backend_timeout))
    }

    /// The configured API-key header, if any.
    pub fn api_key(&self) -> Option<(&str, &str)> {
        match (&self.api_key_header, &self.api_key_value) {
            (Some(header), Some(value)) => Some((header, value)),
            _ => None,
        }
    }
}
