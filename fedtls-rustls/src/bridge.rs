//! The metadata→trust bridge.

use std::collections::HashMap;

use fedtls::{Issuer, MetadataStore};
use log::{debug, info, warn};
use rustls::RootCertStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::trust::TrustAnchors;

/// Keeps a [`TrustAnchors`] set synchronized with a [`MetadataStore`].
///
/// On construction the bridge registers a change listener and performs
/// one synchronous rebuild, so a warm-started store populates the trust
/// pool before the listener starts accepting traffic. Afterwards a small
/// background task rebuilds and reinstalls the pool on every metadata
/// publish.
///
/// Dropping the bridge stops the task; the anchors keep their last
/// installed pool.
#[derive(Debug)]
pub struct TrustBridge {
    _guard: BridgeGuard,
}

#[derive(Debug)]
struct BridgeGuard {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        // Best-effort: stop the loop and abort if it's still running.
        self.cancel.cancel();
        self.task.abort();
    }
}

impl TrustBridge {
    /// Registers on `store`, installs the current trust pool, and starts
    /// the update task.
    pub async fn new(store: &MetadataStore, anchors: TrustAnchors) -> Self {
        let (tx, mut rx) = mpsc::channel(1);
        store.add_change_listener(tx).await;

        // Synchronous first rebuild: if the store warm-started from its
        // cache, trust is in place before any handshake is attempted.
        install(store, &anchors);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let store = store.clone();
        let task_anchors = anchors.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("trust bridge cancelled; stopping");
                        break;
                    }

                    changed = rx.recv() => {
                        if changed.is_none() {
                            info!("metadata change channel closed; stopping trust bridge");
                            break;
                        }
                        install(&store, &task_anchors);
                        info!("new metadata loaded");
                    }
                }
            }
        });

        Self {
            _guard: BridgeGuard { cancel, task },
        }
    }
}

fn install(store: &MetadataStore, anchors: &TrustAnchors) {
    anchors.set_trusted(ca_pool_from_issuers(&store.issuers_per_entity()));
}

/// Flattens each entity's issuer certificates into one client-CA pool.
///
/// Certificates are PEM blocks; unparseable material is skipped with a
/// per-entity warning and never aborts the rebuild.
fn ca_pool_from_issuers(issuers: &HashMap<String, Vec<Issuer>>) -> RootCertStore {
    let mut roots = RootCertStore::empty();

    for (entity_id, certs) in issuers {
        let mut added_any = false;

        for issuer in certs {
            let mut reader = std::io::Cursor::new(issuer.x509certificate.as_bytes());
            let ders: Vec<_> = rustls_pemfile::certs(&mut reader)
                .filter_map(std::result::Result::ok)
                .collect();

            let (added, _ignored) = roots.add_parsable_certificates(ders);
            if added > 0 {
                added_any = true;
            }
        }

        if !certs.is_empty() && !added_any {
            warn!("failed to add any certificates for issuer {entity_id}");
        }
    }

    roots
}
