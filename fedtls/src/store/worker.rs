//! The refresh worker behind a [`super::MetadataStore`].
//!
//! A single task multiplexes four event sources: shutdown, listener
//! registration, completed downloads, and the refresh timer. Downloads
//! run in a detached task so a slow federation operator never blocks
//! listener registration or shutdown; the result channel has capacity
//! one, so a download outcome is never lost and the fetch task never
//! blocks either.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt as _;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Inner, MetadataStoreOptions};
use crate::verify::verify;

pub(super) struct WorkerContext {
    pub(super) feed_url: String,
    pub(super) jwks: Vec<u8>,
    pub(super) cache_path: PathBuf,
    pub(super) options: MetadataStoreOptions,
}

pub(super) async fn run(
    ctx: WorkerContext,
    inner: Arc<Inner>,
    mut add_listener_rx: mpsc::Receiver<mpsc::Sender<()>>,
    first_fetch_delay: Duration,
) {
    let mut listeners: Vec<mpsc::Sender<()>> = Vec::new();
    let client = reqwest::Client::new();

    let (result_tx, mut result_rx) = mpsc::channel::<Result<Vec<u8>, reqwest::Error>>(1);
    let mut next_fetch = Instant::now() + first_fetch_delay;
    let mut in_flight = false;

    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => {
                if in_flight {
                    // Observe the outstanding download so its connection
                    // is fully consumed before we acknowledge shutdown.
                    let _ = result_rx.recv().await;
                }
                debug!("metadata worker cancelled; stopping");
                return;
            }

            Some(listener) = add_listener_rx.recv() => {
                listeners.push(listener);
            }

            Some(result) = result_rx.recv() => {
                in_flight = false;
                next_fetch = handle_fetch_result(result, &ctx, &inner, &mut listeners).await;
            }

            () = tokio::time::sleep_until(next_fetch), if !in_flight => {
                info!("fetching new metadata from {}", ctx.feed_url);
                in_flight = true;

                let client = client.clone();
                let url = ctx.feed_url.clone();
                let tx = result_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(fetch(&client, &url).await).await;
                });
            }
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let body = client.get(url).send().await?.bytes().await?;
    Ok(body.to_vec())
}

/// Applies one download outcome and returns the next fetch deadline.
async fn handle_fetch_result(
    result: Result<Vec<u8>, reqwest::Error>,
    ctx: &WorkerContext,
    inner: &Inner,
    listeners: &mut Vec<mpsc::Sender<()>>,
) -> Instant {
    let body = match result {
        Ok(body) => body,
        Err(e) => {
            warn!("failed to get metadata from federation operator: {e}");
            return Instant::now() + ctx.options.network_retry;
        }
    };

    match verify(&body, &ctx.jwks) {
        Err(e) => {
            warn!("failed to verify metadata: {e}");
            Instant::now() + ctx.options.bad_content_retry
        }
        Ok(md) => {
            info!(
                "successfully downloaded and verified new metadata, {} entities",
                md.entities.len()
            );

            let ttl = effective_ttl(md.cache_ttl, ctx.options.default_cache_ttl);
            inner.snapshot.store(Arc::new(md));
            notify_all(listeners).await;
            write_cache(&ctx.cache_path, &body).await;

            Instant::now() + ttl
        }
    }
}

/// Delivers one notification per registered listener.
///
/// `send().await` on a bounded channel backpressures the worker when a
/// listener is slow; metadata updates are infrequent and listeners are
/// expected to drain promptly. Listeners whose receiver has gone away
/// are dropped from the list.
async fn notify_all(listeners: &mut Vec<mpsc::Sender<()>>) {
    let mut alive = Vec::with_capacity(listeners.len());
    for listener in listeners.drain(..) {
        if listener.send(()).await.is_ok() {
            alive.push(listener);
        }
    }
    *listeners = alive;
}

/// Writes the verified raw bytes to the cache file, mode 0600.
///
/// Failures are logged, not fatal: the in-memory snapshot keeps serving.
async fn write_cache(path: &Path, body: &[u8]) {
    let result = async {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).await?;
        file.write_all(body).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        warn!("failed to write to cache file ({}): {e}", path.display());
    }
}

/// The refresh interval: the document's `cache_ttl` when non-zero,
/// otherwise the configured default.
pub(super) fn effective_ttl(cache_ttl_secs: u64, default: Duration) -> Duration {
    if cache_ttl_secs != 0 {
        Duration::from_secs(cache_ttl_secs)
    } else {
        default
    }
}

/// How long to wait before the next fetch, given when the current
/// document was obtained. A `last_fetch` in the future (e.g. a cache
/// file with a skewed modification time) is treated as now.
pub(super) fn refresh_delay(last_fetch: SystemTime, ttl: Duration) -> Duration {
    let now = SystemTime::now();
    let last_fetch = if last_fetch > now { now } else { last_fetch };

    (last_fetch + ttl)
        .duration_since(now)
        .unwrap_or(Duration::ZERO)
}
