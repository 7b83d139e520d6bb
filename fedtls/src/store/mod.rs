//! The metadata store.
//!
//! A [`MetadataStore`] owns a background worker that regularly downloads
//! the federation's signed metadata, verifies it against a locally
//! configured JWK set, and publishes the parsed document as an atomically
//! replaceable snapshot. Verified raw bytes are cached on disk so that a
//! restart can serve traffic before the first fetch completes.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use log::{info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::fingerprint::{fingerprint, FingerprintError};
use crate::metadata::{Issuer, Metadata};
use crate::verify::verify;

mod worker;

/// Configuration options for a [`MetadataStore`].
#[derive(Debug, Clone, Copy)]
pub struct MetadataStoreOptions {
    /// Refresh interval used when the metadata has no `cache_ttl`.
    pub default_cache_ttl: Duration,
    /// Retry interval after a failed download from the federation operator.
    pub network_retry: Duration,
    /// Retry interval after a downloaded document fails verification.
    pub bad_content_retry: Duration,
}

impl Default for MetadataStoreOptions {
    fn default() -> Self {
        Self {
            default_cache_ttl: Duration::from_secs(3600),
            network_retry: Duration::from_secs(60),
            bad_content_retry: Duration::from_secs(3600),
        }
    }
}

/// An error that can arise constructing a [`MetadataStore`].
///
/// Both variants are bootstrap failures and are expected to be fatal to
/// the process; once a store is running, refresh failures are logged and
/// retried instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MetadataStoreError {
    /// The JWK set file cannot be read.
    #[error("failed to read from JWKS file ({path}): {source}")]
    ReadJwks {
        /// The configured JWK set path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The cache file exists but cannot be read.
    #[error("failed to read from metadata cache file ({path}): {source}")]
    ReadCache {
        /// The configured cache path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// An error that can arise resolving a client certificate to an entity.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LookupError {
    /// The peer presented no verified certificate chain.
    #[error("no verified certificate chain presented")]
    EmptyChain,

    /// The leaf certificate cannot be parsed.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    /// No entity in the current metadata has a matching client pin.
    #[error("failed to find client pin ({0}) in metadata")]
    UnknownPin(String),
}

/// The federation identity resolved from a client certificate.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientIdentity {
    /// The matched entity's identifier.
    pub entity_id: String,
    /// The entity's organization, if registered in metadata.
    pub organization: Option<String>,
    /// The entity's organization identifier, if registered in metadata.
    pub organization_id: Option<String>,
}

/// A self-refreshing view of the latest verified federation metadata.
///
/// The store publishes an immutable snapshot that is never null: before
/// the first successful load it is an empty document with zero entities,
/// which makes the TLS layer refuse all handshakes. Snapshot replacement
/// is atomic; readers observe either the old or the new document, never a
/// torn value.
///
/// Cloning is cheap and all clones share the same worker. Call
/// [`MetadataStore::shutdown`] to stop the worker; the call blocks until
/// any in-flight download has been observed and the worker has exited.
#[derive(Clone)]
pub struct MetadataStore {
    inner: Arc<Inner>,
}

struct Inner {
    // Atomically replaced, last-known-good metadata snapshot.
    snapshot: ArcSwap<Metadata>,

    // Listener registration is serialised through the worker's select
    // loop so it cannot race with notification fan-out.
    add_listener_tx: mpsc::Sender<mpsc::Sender<()>>,

    // Lifecycle / shutdown.
    cancel: CancellationToken,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataStore")
            .field("snapshot", &"<ArcSwap<Metadata>>")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MetadataStore {
    /// Creates a store and starts its background refresh worker.
    ///
    /// The JWK set at `jwks_path` is read once. If a readable cache file
    /// exists at `cache_path` and verifies exactly as a freshly fetched
    /// document would, its content is published immediately and the first
    /// download is scheduled at the cache file's modification time plus
    /// the effective TTL (clamped to now). An invalid cache file is
    /// logged and treated as absent; an absent cache file triggers an
    /// immediate download.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataStoreError::ReadJwks`] if the JWK set file
    /// cannot be read, or [`MetadataStoreError::ReadCache`] if the cache
    /// file exists but cannot be read. Both are bootstrap failures meant
    /// to be fatal to the process.
    pub async fn new(
        feed_url: impl Into<String>,
        jwks_path: impl AsRef<Path>,
        cache_path: impl Into<PathBuf>,
        options: MetadataStoreOptions,
    ) -> Result<Self, MetadataStoreError> {
        let jwks_path = jwks_path.as_ref();
        let cache_path = cache_path.into();

        let jwks = tokio::fs::read(jwks_path)
            .await
            .map_err(|source| MetadataStoreError::ReadJwks {
                path: jwks_path.to_path_buf(),
                source,
            })?;

        let mut initial = Metadata::default();
        let mut first_fetch_delay = Duration::ZERO;

        match tokio::fs::read(&cache_path).await {
            Ok(content) => match verify(&content, &jwks) {
                Ok(md) => {
                    let ttl = worker::effective_ttl(md.cache_ttl, options.default_cache_ttl);
                    first_fetch_delay = worker::refresh_delay(file_mtime_or_now(&cache_path), ttl);
                    info!(
                        "warm start from metadata cache file ({}), {} entities",
                        cache_path.display(),
                        md.entities.len()
                    );
                    initial = md;
                }
                Err(e) => warn!("failed to verify cached file: {e}"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(MetadataStoreError::ReadCache {
                    path: cache_path,
                    source,
                })
            }
        }

        let (add_listener_tx, add_listener_rx) = mpsc::channel(8);
        let inner = Arc::new(Inner {
            snapshot: ArcSwap::from_pointee(initial),
            add_listener_tx,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        let ctx = worker::WorkerContext {
            feed_url: feed_url.into(),
            jwks,
            cache_path,
            options,
        };

        let task_inner = Arc::clone(&inner);
        let handle =
            tokio::spawn(
                async move { worker::run(ctx, task_inner, add_listener_rx, first_fetch_delay).await },
            );
        *inner.worker.lock().await = Some(handle);

        Ok(Self { inner })
    }

    /// Returns the currently published metadata snapshot.
    pub fn metadata(&self) -> Arc<Metadata> {
        self.inner.snapshot.load_full()
    }

    /// Registers a change listener.
    ///
    /// Every successful publish after registration delivers exactly one
    /// `()` on the channel. Notifications carry no payload; re-read via
    /// [`MetadataStore::metadata`]. A listener that is slow to accept
    /// backpressures the refresh worker, so listeners are expected to
    /// drain promptly. Dropped listeners are skipped.
    pub async fn add_change_listener(&self, listener: mpsc::Sender<()>) {
        // Registration is ignored after shutdown; there is nothing left
        // to notify.
        let _ = self.inner.add_listener_tx.send(listener).await;
    }

    /// Returns each entity's issuer certificates, keyed by entity ID.
    ///
    /// The returned map is a copy taken from the current snapshot and is
    /// unaffected by later refreshes.
    pub fn issuers_per_entity(&self) -> HashMap<String, Vec<Issuer>> {
        let snapshot = self.inner.snapshot.load();
        snapshot
            .entities
            .iter()
            .map(|entity| (entity.entity_id.clone(), entity.issuers.clone()))
            .collect()
    }

    /// Resolves a verified client certificate chain to a federation entity.
    ///
    /// Computes the SPKI fingerprint of the chain's leaf (first)
    /// certificate and scans the current snapshot in entity, then client,
    /// then pin order, returning on the first digest match. The
    /// federation is expected to keep pins globally unique; on a
    /// collision the first entity in publication order wins.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownPin`] (naming the unmatched
    /// fingerprint) if no pin matches, [`LookupError::EmptyChain`] if no
    /// certificate was presented, or a fingerprint error if the leaf
    /// cannot be parsed.
    pub fn lookup_client<C: AsRef<[u8]>>(
        &self,
        verified_chain: &[C],
    ) -> Result<ClientIdentity, LookupError> {
        let leaf = verified_chain.first().ok_or(LookupError::EmptyChain)?;
        let fp = fingerprint(leaf.as_ref())?;

        let snapshot = self.inner.snapshot.load();
        for entity in &snapshot.entities {
            for client in &entity.clients {
                for pin in &client.pins {
                    if pin.digest == fp {
                        return Ok(ClientIdentity {
                            entity_id: entity.entity_id.clone(),
                            organization: entity.organization.clone(),
                            organization_id: entity.organization_id.clone(),
                        });
                    }
                }
            }
        }

        Err(LookupError::UnknownPin(fp))
    }

    /// Stops the refresh worker and waits for it to exit.
    ///
    /// Idempotent. The worker acknowledges only after any in-flight
    /// download has been observed, so no connection is left dangling.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        if let Some(handle) = self.inner.worker.lock().await.take() {
            if handle.await.is_err() {
                warn!("error joining metadata worker during shutdown");
            }
        }
    }
}

/// The cache file's modification time, or now if it cannot be determined.
fn file_mtime_or_now(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now())
}
