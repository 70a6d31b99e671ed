//! Node HTTP Server
//!
//! One listener serves both the peer protocol and the client surface:
//!
//! | Route                          | Method | Action                               |
//! |--------------------------------|--------|--------------------------------------|
//! | `/_groupcache/{group}/{key}`   | GET    | serve an owned key to a peer         |
//! | `/_groupcache/{group}/{key}`   | DELETE | drop from local tiers                |
//! | `/cache/{group}/{key}`         | GET    | read-through get                     |
//! | `/cache/{group}/{key}`         | PUT    | set (optional `x-expire-at` RFC 3339)|
//! | `/cache/{group}/{key}`         | DELETE | remove and broadcast                 |
//! | `/stats`                       | GET    | JSON snapshot                        |
//! | `/metrics`                     | GET    | Prometheus text format               |
//! | `/healthz`, `/readyz`          | GET    | liveness / readiness                 |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{split_path, ErrorCode, ERROR_HEADER, EXPIRE_AT_HEADER, OWNER_HEADER, PEER_PATH_PREFIX};
use crate::error::{Error, Result};
use crate::group::GroupRegistry;
use crate::stats::StatsAggregator;

/// Client-facing cache routes
const CACHE_PATH_PREFIX: &str = "/cache/";

/// Largest value accepted by `PUT /cache/...`
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

type HttpResponse = Response<Full<Bytes>>;

/// What every request handler can reach
#[derive(Clone)]
pub struct ServerState {
    registry: Arc<GroupRegistry>,
    stats: StatsAggregator,
    shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self {
            stats: StatsAggregator::new(Arc::clone(&registry)),
            registry,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }
}

/// HTTP/1.1 server for one cache node
pub struct NodeServer {
    listener: TcpListener,
    state: ServerState,
}

impl NodeServer {
    /// Bind `addr` and serve `state`
    pub async fn bind(addr: &str, state: ServerState) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen address '{}': {}", addr, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", addr, e)))?;

        Ok(Self::from_listener(listener, state))
    }

    /// Serve on an already bound listener
    pub fn from_listener(listener: TcpListener, state: ServerState) -> Self {
        Self { listener, state }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancelling this token stops the accept loop and drains open connections
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Accept connections until shut down
    pub async fn run(self) -> Result<()> {
        let NodeServer { listener, state } = self;
        let shutdown = state.shutdown.clone();
        let tracker = TaskTracker::new();

        info!("Node server listening on {}", listener.local_addr()?);

        loop {
            let (stream, remote) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        // Transient (EMFILE, ECONNABORTED); keep accepting
                        warn!("Accept error: {}", e);
                        continue;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let state = state.clone();
            let shutdown = shutdown.clone();
            tracker.spawn(async move {
                let service = service_fn(move |req| handle(state.clone(), req));
                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);

                let mut draining = false;
                loop {
                    tokio::select! {
                        result = conn.as_mut() => {
                            if let Err(e) = result {
                                debug!(%remote, "Connection error: {}", e);
                            }
                            break;
                        }
                        _ = shutdown.cancelled(), if !draining => {
                            draining = true;
                            conn.as_mut().graceful_shutdown();
                        }
                    }
                }
            });
        }

        tracker.close();
        tracker.wait().await;
        info!("Node server stopped");
        Ok(())
    }
}

// =============================================================================
// Routing
// =============================================================================

async fn handle(state: ServerState, req: Request<Incoming>) -> std::result::Result<HttpResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method.clone(), path.as_str()) {
        (Method::GET, "/healthz") | (Method::GET, "/livez") => text(StatusCode::OK, "ok"),
        (Method::GET, "/readyz") => {
            if state.shutdown.is_cancelled() {
                text(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
            } else {
                text(StatusCode::OK, "ok")
            }
        }
        (Method::GET, "/stats") => match state.stats.snapshot_json() {
            Ok(json) => with_content_type(
                respond(StatusCode::OK, Bytes::from(json)),
                "application/json",
            ),
            Err(e) => internal(e),
        },
        (Method::GET, "/metrics") => match state.stats.prometheus() {
            Ok(body) => with_content_type(
                respond(StatusCode::OK, Bytes::from(body)),
                "text/plain; version=0.0.4",
            ),
            Err(e) => internal(e),
        },
        _ if path.starts_with(PEER_PATH_PREFIX) => peer_route(&state, method.clone(), &path).await,
        _ if path.starts_with(CACHE_PATH_PREFIX) => cache_route(&state, req, &path).await,
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };

    debug!(%method, path = %path, status = response.status().as_u16(), "Handled request");
    Ok(response)
}

/// `/_groupcache/{group}/{key}`
async fn peer_route(state: &ServerState, method: Method, path: &str) -> HttpResponse {
    let Some((group_name, key)) = split_path(path, PEER_PATH_PREFIX) else {
        return text(StatusCode::BAD_REQUEST, "expected /_groupcache/{group}/{key}");
    };
    let group = match state.registry.get(&group_name) {
        Ok(group) => group,
        Err(e) => return error_response(&e),
    };

    match method {
        Method::GET => match group.serve_peer(&key).await {
            Ok(value) => octets(value),
            Err(e) => error_response(&e),
        },
        Method::DELETE => {
            group.remove_local(&key);
            respond(StatusCode::NO_CONTENT, Bytes::new())
        }
        _ => text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
    }
}

/// `/cache/{group}/{key}`
async fn cache_route(state: &ServerState, req: Request<Incoming>, path: &str) -> HttpResponse {
    let Some((group_name, key)) = split_path(path, CACHE_PATH_PREFIX) else {
        return text(StatusCode::BAD_REQUEST, "expected /cache/{group}/{key}");
    };
    let group = match state.registry.get(&group_name) {
        Ok(group) => group,
        Err(e) => return error_response(&e),
    };

    match req.method().clone() {
        Method::GET => match group.get(&key).await {
            Ok(value) => octets(value),
            Err(e) => error_response(&e),
        },
        Method::PUT => {
            let expire_at = match expire_at_header(&req) {
                Ok(at) => at,
                Err(msg) => return text(StatusCode::BAD_REQUEST, &msg),
            };
            let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => return text(StatusCode::PAYLOAD_TOO_LARGE, &e.to_string()),
            };
            match expire_at {
                Some(at) => group.set_to_expire_at(key, body, at),
                None => group.set(key, body),
            }
            respond(StatusCode::NO_CONTENT, Bytes::new())
        }
        Method::DELETE => {
            group.remove(&key);
            respond(StatusCode::NO_CONTENT, Bytes::new())
        }
        _ => text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
    }
}

fn expire_at_header(req: &Request<Incoming>) -> std::result::Result<Option<DateTime<Utc>>, String> {
    let Some(value) = req.headers().get(EXPIRE_AT_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| format!("{} is not valid text", EXPIRE_AT_HEADER))?;
    DateTime::parse_from_rfc3339(value)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|e| format!("{} must be RFC 3339: {}", EXPIRE_AT_HEADER, e))
}

// =============================================================================
// Responses
// =============================================================================

fn respond(status: StatusCode, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

fn with_content_type(mut response: HttpResponse, content_type: &'static str) -> HttpResponse {
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: &str) -> HttpResponse {
    with_content_type(
        respond(status, Bytes::from(body.to_string())),
        "text/plain; charset=utf-8",
    )
}

fn octets(value: Bytes) -> HttpResponse {
    with_content_type(respond(StatusCode::OK, value), "application/octet-stream")
}

fn internal(e: Error) -> HttpResponse {
    error!("Request failed: {}", e);
    error_response(&e)
}

/// Status + `x-groupcache-error` for `e`
fn error_response(e: &Error) -> HttpResponse {
    let code = ErrorCode::of(e);
    let status = StatusCode::from_u16(code.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = text(status, &e.to_string());

    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(ERROR_HEADER),
        HeaderValue::from_static(code.as_str()),
    );
    if let Error::NotOwned { owner, .. } = e {
        if let Ok(value) = HeaderValue::from_str(owner) {
            headers.insert(HeaderName::from_static(OWNER_HEADER), value);
        }
    }
    response
}

// =============================================================================
// Tests
// =============================================================================
