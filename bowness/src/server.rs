//! The TLS listener and per-connection HTTP service.
//!
//! Each accepted connection is TLS-terminated, its verified client chain
//! captured, and requests served over HTTP/1.1. The middleware chain per
//! request is: authentication (memoised per connection), then — under
//! the backend deadline — rate limiting and the reverse proxy.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fedtls::MetadataStore;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, warn};
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::auth::{stamp_identity, ConnectionAuth};
use crate::limiter::EntityRateLimiter;
use crate::proxy::ReverseProxy;
use crate::timeouts::{BoxError, TimedStream};

type HttpResponse = Response<BoxBody<Bytes, BoxError>>;

/// Everything the request path needs, shared by all connections.
pub struct ServerContext {
    /// Source of authentication decisions.
    pub store: MetadataStore,
    /// The backend forwarder.
    pub proxy: ReverseProxy,
    /// Per-entity rate limiter, when enabled.
    pub limiter: Option<EntityRateLimiter>,
    /// Overall backend deadline (`None` disables the 503 wrapper).
    pub backend_deadline: Option<Duration>,
    /// Deadline for streaming an inbound request body.
    pub body_deadline: Duration,
    /// Time allowed for reading a request head.
    pub header_timeout: Duration,
    /// Idle watchdog between reads on a connection.
    pub idle_timeout: Duration,
    /// Watchdog on stalled response writes.
    pub write_timeout: Duration,
}

/// Accepts TLS connections until `shutdown` fires, then drains.
///
/// In-flight connections are asked to finish their current requests
/// (keep-alive is disabled on them) and the call returns once all
/// connection tasks have exited.
pub async fn serve(
    listener: TcpListener,
    tls_config: Arc<ServerConfig>,
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
) {
    let acceptor = TlsAcceptor::from(tls_config);
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,

            accepted = listener.accept() => {
                let (tcp, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("failed to accept connection: {e}");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let ctx = Arc::clone(&ctx);
                let token = shutdown.clone();
                tracker.spawn(async move {
                    serve_connection(tcp, peer, &acceptor, &ctx, &token).await;
                });
            }
        }
    }

    tracker.close();
    tracker.wait().await;
}

async fn serve_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: &TlsAcceptor,
    ctx: &Arc<ServerContext>,
    shutdown: &CancellationToken,
) {
    let tls_stream = match acceptor.accept(tcp).await {
        Ok(stream) => stream,
        Err(e) => {
            // Expected whenever a client is not (or no longer) in the
            // federation; the trust layer already refused it.
            debug!("TLS handshake from {peer} failed: {e}");
            return;
        }
    };

    let (_io, server_conn) = tls_stream.get_ref();
    let verified_chain: Arc<Vec<CertificateDer<'static>>> = Arc::new(
        server_conn
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
            .unwrap_or_default(),
    );

    let conn_auth = Arc::new(ConnectionAuth::new());
    let peer_ip = peer.ip();

    let io = TokioIo::new(TimedStream::new(
        tls_stream,
        ctx.idle_timeout,
        ctx.write_timeout,
    ));

    let service = service_fn({
        let ctx = Arc::clone(ctx);
        move |req| {
            let ctx = Arc::clone(&ctx);
            let chain = Arc::clone(&verified_chain);
            let conn_auth = Arc::clone(&conn_auth);
            async move {
                Ok::<_, Infallible>(handle_request(req, peer_ip, &chain, &conn_auth, &ctx).await)
            }
        }
    });

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new());
    if !ctx.header_timeout.is_zero() {
        builder.header_read_timeout(ctx.header_timeout);
    }

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("connection from {peer} ended: {e}");
            }
        }
        () = shutdown.cancelled() => {
            // Let in-flight requests drain, then close.
            conn.as_mut().graceful_shutdown();
            let _ = conn.as_mut().await;
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    peer_ip: IpAddr,
    verified_chain: &[CertificateDer<'static>],
    conn_auth: &ConnectionAuth,
    ctx: &ServerContext,
) -> HttpResponse {
    let auth = conn_auth
        .resolve(|| ctx.store.lookup_client(verified_chain))
        .clone();

    if !auth.granted {
        let message = auth.error.unwrap_or_else(|| "Unauthorized".to_string());
        return text_response(StatusCode::FORBIDDEN, &message);
    }

    let (mut parts, body) = req.into_parts();
    stamp_identity(&mut parts.headers, &auth);
    let req = Request::from_parts(parts, body);

    let work = async {
        if let Some(limiter) = &ctx.limiter {
            if limiter
                .acquire(&auth.entity_id, ctx.backend_deadline)
                .await
                .is_err()
            {
                return status_response(StatusCode::TOO_MANY_REQUESTS);
            }
        }

        match ctx.proxy.forward(req, peer_ip, ctx.body_deadline).await {
            Ok(response) => response,
            Err(e) => {
                warn!("proxy error: {e}");
                text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        }
    };

    match ctx.backend_deadline {
        Some(deadline) => match tokio::time::timeout(deadline, work).await {
            Ok(response) => response,
            Err(_) => text_response(StatusCode::SERVICE_UNAVAILABLE, "Backend timeout"),
        },
        None => work.await,
    }
}

fn text_response(status: StatusCode, body: &str) -> HttpResponse {
    let mut response = Response::new(
        Full::new(Bytes::from(body.to_owned()))
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn status_response(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()).map_err(|never| match never {}).boxed());
    *response.status_mut() = status;
    response
}
