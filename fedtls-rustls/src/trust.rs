//! The hot-swappable client-CA anchor set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::RootCertStore;

/// Snapshot of the trusted client-CA roots at one point in time.
///
/// The generation number lets verifiers cache work keyed on it: equal
/// generations mean an identical root set.
#[derive(Debug, Clone)]
pub(crate) struct TrustSnapshot {
    pub(crate) generation: u64,
    pub(crate) roots: Arc<RootCertStore>,
}

/// An atomically replaceable set of trusted client-certificate issuers.
///
/// Starts empty (generation zero), which makes every client-certificate
/// verification fail: a listener built on a fresh `TrustAnchors` refuses
/// all handshakes until [`TrustAnchors::set_trusted`] installs a pool.
///
/// Cloning is cheap; all clones observe the same current snapshot.
/// Replacement is safe under concurrent handshakes: a handshake that
/// already captured the previous snapshot completes against it.
#[derive(Clone, Debug)]
pub struct TrustAnchors {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    snapshot: ArcSwap<TrustSnapshot>,
    generation: AtomicU64,
}

impl TrustAnchors {
    /// Creates an empty anchor set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                snapshot: ArcSwap::from_pointee(TrustSnapshot {
                    generation: 0,
                    roots: Arc::new(RootCertStore::empty()),
                }),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Replaces the trusted client-CA pool.
    ///
    /// In-flight handshakes keep the snapshot they captured; handshakes
    /// that begin after this call returns observe the new pool.
    pub fn set_trusted(&self, roots: RootCertStore) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.snapshot.store(Arc::new(TrustSnapshot {
            generation,
            roots: Arc::new(roots),
        }));
    }

    pub(crate) fn current(&self) -> Arc<TrustSnapshot> {
        self.inner.snapshot.load_full()
    }
}

impl Default for TrustAnchors {
    fn default() -> Self {
        Self::new()
    }
}
