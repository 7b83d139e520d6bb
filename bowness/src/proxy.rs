//! The single-host reverse proxy.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::uri::{PathAndQuery, Uri};
use http::{HeaderMap, Request, Response};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt as _;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::timeouts::{BoxError, DeadlineBody};

/// Hop-by-hop headers are meaningful for a single transport link only
/// and must not be forwarded (RFC 9110 §7.6.1).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// An error that can arise constructing the proxy or forwarding a request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The configured target URL is not an absolute HTTP URL.
    #[error("invalid target URL: {0}")]
    BadTarget(String),

    /// The configured API-key header cannot be represented on the wire.
    #[error("invalid API key header: {0}")]
    BadApiKey(String),

    /// The rewritten request URI is invalid.
    #[error("failed to build upstream URI: {0}")]
    BadUri(#[from] http::uri::InvalidUriParts),

    /// The upstream request failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// Forwards requests to one fixed backend.
#[derive(Debug)]
pub struct ReverseProxy {
    client: Client<HttpConnector, DeadlineBody<Incoming>>,
    target: Uri,
    api_key: Option<(HeaderName, HeaderValue)>,
}

impl ReverseProxy {
    /// Creates a proxy for `target_url`, optionally attaching an API-key
    /// header to every forwarded request.
    pub fn new(target_url: &str, api_key: Option<(&str, &str)>) -> Result<Self, ProxyError> {
        let target: Uri = target_url
            .parse()
            .map_err(|e| ProxyError::BadTarget(format!("{e}")))?;

        if target.scheme().is_none() || target.authority().is_none() {
            return Err(ProxyError::BadTarget(format!(
                "{target_url}: scheme and host are required"
            )));
        }

        let api_key = api_key
            .map(|(name, value)| {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| ProxyError::BadApiKey(e.to_string()))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| ProxyError::BadApiKey(e.to_string()))?;
                Ok::<_, ProxyError>((name, value))
            })
            .transpose()?;

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            target,
            api_key,
        })
    }

    /// Forwards `req` to the backend.
    ///
    /// The inbound `X-Forwarded-For` header is stripped so the proxy's
    /// own addition (the peer address) is authoritative. The request
    /// body is streamed under `body_deadline` (see
    /// [`DeadlineBody`](crate::timeouts::DeadlineBody)).
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Upstream`] when the backend cannot be
    /// reached or misbehaves at the transport level; HTTP error statuses
    /// from the backend are returned as regular responses.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        peer_ip: IpAddr,
        body_deadline: Duration,
    ) -> Result<Response<BoxBody<Bytes, BoxError>>, ProxyError> {
        let (mut parts, body) = req.into_parts();

        parts.uri = outbound_uri(&self.target, &parts.uri)?;
        prepare_headers(&mut parts.headers, peer_ip, self.api_key.as_ref());

        let outbound = Request::from_parts(parts, DeadlineBody::new(body, body_deadline));

        let response = self.client.request(outbound).await?;
        Ok(response.map(|body| body.map_err(|e| Box::new(e) as BoxError).boxed()))
    }
}

/// Rewrites the request URI onto the backend, keeping path and query.
fn outbound_uri(target: &Uri, inbound: &Uri) -> Result<Uri, http::uri::InvalidUriParts> {
    let mut parts = http::uri::Parts::default();
    parts.scheme = target.scheme().cloned();
    parts.authority = target.authority().cloned();
    parts.path_and_query = Some(
        inbound
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/")),
    );
    Uri::from_parts(parts)
}

fn prepare_headers(
    headers: &mut HeaderMap,
    peer_ip: IpAddr,
    api_key: Option<&(HeaderName, HeaderValue)>,
) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }

    // Any inbound value is untrusted; replace it wholesale.
    headers.remove(X_FORWARDED_FOR);
    if let Ok(value) = HeaderValue::from_str(&peer_ip.to_string()) {
        headers.insert(
            HeaderName::from_static(X_FORWARDED_FOR),
            value,
        );
    }

    if let Some((name, value)) = api_key {
        headers.insert(name.clone(), value.clone());
    }
}
