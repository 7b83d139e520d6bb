//! bowness — a TLS-terminating reverse proxy implementing the Federated
//! TLS Authentication profile.
//!
//! Clients are authenticated by matching the SHA-256 SPKI fingerprint of
//! their leaf certificate against signed federation metadata. Recognised
//! clients are forwarded to a fixed backend with identity headers
//! attached; everyone else is refused at the TLS or authorisation layer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use fedtls::MetadataStore;
use fedtls_rustls::{server_config, TrustAnchors, TrustBridge};
use log::info;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use bowness::limiter::EntityRateLimiter;
use bowness::proxy::ReverseProxy;
use bowness::server::{self, ServerContext};
use bowness::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "bowness",
    about = "Reverse proxy implementing Federated TLS Authentication",
    disable_version_flag = true
)]
struct Args {
    /// Display program version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Path to the YAML configuration file.
    #[arg(value_name = "config-file", required_unless_present = "version")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.version {
        println!("bowness reverse proxy ({})", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some(config_path) = args.config else {
        anyhow::bail!("missing configuration file path");
    };
    let settings = Settings::load(&config_path)?;

    let store = MetadataStore::new(
        &settings.metadata_url,
        &settings.jwks_path,
        &settings.cache_path,
        settings.store_options(),
    )
    .await?;

    // Trust wiring: the bridge performs one synchronous rebuild before
    // returning, so a warm-started store populates the client-CA pool
    // before the listener accepts its first handshake.
    let anchors = TrustAnchors::new();
    let tls_config = server_config(&settings.cert, &settings.key, anchors.clone())
        .context("failed to create TLS configuration")?;
    let bridge = TrustBridge::new(&store, anchors).await;

    let proxy = ReverseProxy::new(&settings.target_url, settings.api_key())
        .context("failed to set up reverse proxy")?;

    let limiter = settings.enable_limiting.then(|| {
        EntityRateLimiter::new(settings.limit_requests_per_second, settings.limit_burst)
    });

    let ctx = Arc::new(ServerContext {
        store: store.clone(),
        proxy,
        limiter,
        backend_deadline: settings.backend_deadline(),
        body_deadline: Duration::from_secs(settings.read_timeout),
        header_timeout: Duration::from_secs(settings.read_header_timeout),
        idle_timeout: Duration::from_secs(settings.idle_timeout),
        write_timeout: Duration::from_secs(settings.write_timeout),
    });

    let listener = TcpListener::bind(&settings.listen_address)
        .await
        .with_context(|| format!("failed to listen to {}", settings.listen_address))?;
    info!("listening on {}", settings.listen_address);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server::serve(
        listener,
        Arc::new(tls_config),
        ctx,
        shutdown.clone(),
    ));

    wait_for_shutdown_signal().await?;

    info!("shutting down, waiting for active requests to finish...");
    shutdown.cancel();
    let _ = server.await;
    drop(bridge);

    info!("server closed, waiting for metadata store to close...");
    store.shutdown().await;

    info!("done");
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
