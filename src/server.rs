/*
 *  server.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	Artwork host side: metadata and artwork over plain HTTP, with hard
 *	limits so a small host never drowns in connections
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use axum::{
    Router,
    body::Body,
    error_handling::HandleErrorLayer,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tower::{BoxError, ServiceBuilder};

use crate::config::ServerSettings;
use crate::decode::MIN_PAYLOAD_BYTES;

pub const DEFAULT_METADATA: &str = r#"{"title":"No music playing","artist":"","album":"","last_updated":0}"#;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("cannot listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Paths the server answers itself; artwork may not shadow them.
const RESERVED_ROUTES: [&str; 3] = ["", "status", "metadata.json"];

#[derive(Clone)]
struct ServerState {
    settings: Arc<ServerSettings>,
    routes: Arc<Vec<String>>,
    slots: Arc<Semaphore>,
    served: Arc<AtomicU64>,
}

impl ServerState {
    fn capacity(&self) -> usize {
        self.settings.max_concurrent.max(1)
    }

    fn in_flight(&self) -> usize {
        self.capacity().saturating_sub(self.slots.available_permits())
    }
}

/// One concurrency slot and the transfer deadline. Travels with the
/// response body so a slow download keeps counting against the limit.
#[derive(Clone)]
struct Admission {
    _slot: Arc<OwnedSemaphorePermit>,
    deadline: Instant,
}

/// File reader that holds its admission and refuses to read past the deadline.
struct GuardedFile {
    file: tokio::fs::File,
    admission: Option<Admission>,
}

impl AsyncRead for GuardedFile {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(admission) = this.admission.as_ref() {
            if Instant::now() >= admission.deadline {
                warn!("Transfer deadline passed, aborting response body");
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, "transfer deadline passed")));
            }
        }
        Pin::new(&mut this.file).poll_read(cx, buf)
    }
}

/// Why `rel` cannot have its own route, given the routes already taken.
pub fn artwork_route_problem(rel: &str, taken: &HashSet<String>) -> Option<&'static str> {
    let route = rel.trim_start_matches('/');
    if RESERVED_ROUTES.iter().any(|r| *r == route) {
        Some("collides with a built-in route")
    } else if route.split('/').any(|seg| seg.starts_with([':', '*']) || seg.contains(['{', '}'])) {
        Some("contains route pattern characters")
    } else if taken.contains(route) {
        Some("is listed twice")
    } else {
        None
    }
}

/// Artwork entries that can be routed, first occurrence wins.
fn routable_artwork(artwork: &[String]) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut routes = Vec::new();
    for rel in artwork {
        match artwork_route_problem(rel, &taken) {
            Some(problem) => warn!("Not serving artwork '{}': {}", rel, problem),
            None => {
                let route = rel.trim_start_matches('/').to_string();
                taken.insert(route.clone());
                routes.push(route);
            }
        }
    }
    routes
}

/// RFC 1123, always GMT.
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn content_type_for(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("bmp") => "image/bmp",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn put(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => warn!("Dropping unrepresentable {} header '{}'", name, value),
    }
}

/// Build the service with every configured route and limit in place.
pub fn router(settings: ServerSettings) -> Router {
    // covers the handler up to the response head; the body is bounded by its Admission
    let limits = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(service_error))
        .timeout(settings.request_timeout);

    let slots = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
    let routes = Arc::new(routable_artwork(&settings.artwork));
    let state = ServerState {
        settings: Arc::new(settings),
        routes,
        slots,
        served: Arc::new(AtomicU64::new(0)),
    };

    let mut router = Router::new()
        .route("/metadata.json", get(metadata))
        .route("/", get(status))
        .route("/status", get(status));
    for rel in state.routes.iter().cloned() {
        let route = format!("/{}", rel);
        router = router.route(
            &route,
            get(move |State(state): State<ServerState>, request: Request| {
                let rel = rel.clone();
                async move { artwork(state, &rel, request).await }
            }),
        );
    }

    let routes = router
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), track))
        .with_state(state.clone());

    // Router::layer wraps each endpoint separately; nesting everything behind
    // one fallback gives a single limiter for the whole server
    Router::new()
        .fallback_service(routes)
        .layer(middleware::from_fn_with_state(state, admit))
        .layer(limits)
}

/// Take a slot or shed the request with 503.
async fn admit(State(state): State<ServerState>, mut request: Request, next: Next) -> Response {
    let slot = match Arc::clone(&state.slots).try_acquire_owned() {
        Ok(slot) => slot,
        Err(_) => {
            warn!("Too many concurrent requests, shedding load");
            return (StatusCode::SERVICE_UNAVAILABLE, "server busy, try again").into_response();
        }
    };
    let admission = Admission {
        _slot: Arc::new(slot),
        deadline: Instant::now() + state.settings.request_timeout,
    };
    request.extensions_mut().insert(admission.clone());
    let response = next.run(request).await;
    // a streamed body keeps its own clone until the last chunk
    drop(admission);
    response
}

async fn track(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let response = next.run(request).await;
    state.served.fetch_add(1, Ordering::Relaxed);
    debug!("{} {} -> {}", method, uri, response.status().as_u16());
    response
}

async fn service_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        warn!("Request timed out");
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        error!("Unhandled service error: {}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
    }
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "File not found")
}

async fn metadata(State(state): State<ServerState>, method: Method) -> Response {
    let path = state.settings.root.join(&state.settings.metadata_file);
    let mut headers = HeaderMap::new();
    put(&mut headers, header::CONTENT_TYPE, "application/json");
    put(&mut headers, header::CACHE_CONTROL, "no-cache, no-store, must-revalidate");
    put(&mut headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    put(&mut headers, header::CONNECTION, "close");

    let body = match tokio::fs::read(&path).await {
        Ok(data) => {
            if let Ok(modified) = tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                put(&mut headers, header::LAST_MODIFIED, &http_date(modified));
            }
            data
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DEFAULT_METADATA.as_bytes().to_vec(),
        Err(e) => {
            error!("Error serving metadata {}: {}", path.display(), e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };
    put(&mut headers, header::CONTENT_LENGTH, &body.len().to_string());

    if method == Method::HEAD {
        (headers, Body::empty()).into_response()
    } else {
        (headers, body).into_response()
    }
}

async fn artwork(state: ServerState, rel: &str, request: Request) -> Response {
    let method = request.method().clone();
    let admission = request.extensions().get::<Admission>().cloned();
    drop(request);
    let path = state.settings.root.join(rel);
    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) | Err(_) => {
            return (StatusCode::NOT_FOUND, format!("File not found: {}", rel)).into_response();
        }
    };
    let size = meta.len();
    if (size as usize) < MIN_PAYLOAD_BYTES {
        warn!("{} is small ({} bytes), may be incomplete", rel, size);
    }
    let last_modified = meta.modified().map(http_date).unwrap_or_default();
    let filename = Path::new(rel).file_name().and_then(|n| n.to_str()).unwrap_or(rel);

    let mut headers = HeaderMap::new();
    put(&mut headers, header::CONTENT_TYPE, content_type_for(rel));
    put(&mut headers, header::CONTENT_LENGTH, &size.to_string());
    if !last_modified.is_empty() {
        put(&mut headers, header::LAST_MODIFIED, &last_modified);
    }
    put(&mut headers, header::CONTENT_DISPOSITION, &format!("inline; filename=\"{}\"", filename));
    put(&mut headers, header::ACCEPT_RANGES, "bytes");
    put(&mut headers, header::CACHE_CONTROL, "public, max-age=5");
    put(&mut headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    put(&mut headers, header::CONNECTION, "close");

    if method == Method::HEAD {
        info!("HEAD {}: size={}, last_modified={}", rel, size, last_modified);
        return (headers, Body::empty()).into_response();
    }

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Error serving {}: {}", rel, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };
    info!("Serving {}: {} bytes (last_modified: {})", rel, size, last_modified);
    let stream = ReaderStream::with_capacity(GuardedFile { file, admission }, state.settings.chunk_size.max(1));
    (headers, Body::from_stream(stream)).into_response()
}

async fn status(State(state): State<ServerState>) -> Response {
    let settings = &state.settings;
    let metadata_exists = settings.root.join(&settings.metadata_file).is_file();

    let mut files = format!(
        "<li><a href=\"/metadata.json\">metadata.json</a> - {}</li>\n",
        if metadata_exists { "present" } else { "missing (serving default)" }
    );
    for rel in state.routes.iter() {
        let line = match tokio::fs::metadata(settings.root.join(rel)).await {
            Ok(meta) => format!("<li><a href=\"/{0}\">{0}</a> - present ({1} bytes)</li>\n", rel, meta.len()),
            Err(_) => format!("<li>{} - missing</li>\n", rel),
        };
        files.push_str(&line);
    }

    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>ArtSync artwork server</title></head>\n<body>\n\
         <h1>ArtSync artwork server</h1>\n<p>Status: <strong>Running</strong> (v{})</p>\n<p>Time: {}</p>\n\
         <h2>Files:</h2>\n<ul>\n{}</ul>\n<p>In-flight requests: {} of {}</p>\n<p>Requests served: {}</p>\n\
         </body>\n</html>\n",
        env!("CARGO_PKG_VERSION"),
        Utc::now().to_rfc3339(),
        files,
        state.in_flight(),
        state.capacity(),
        state.served.load(Ordering::Relaxed),
    );

    let mut headers = HeaderMap::new();
    put(&mut headers, header::CACHE_CONTROL, "no-cache");
    put(&mut headers, header::CONNECTION, "close");
    (headers, Html(html)).into_response()
}

/// Bind with the configured listen backlog.
pub fn bind(settings: &ServerSettings) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = settings.bind.parse()?;
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    socket.bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
    let listener = socket.listen(settings.backlog.max(1)).map_err(|source| ServerError::Bind { addr, source })?;
    Ok(listener)
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, settings: ServerSettings, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    info!("Artwork server listening on http://{}", local);
    info!("Directory: {}", settings.root.display());
    info!(
        "Limits: {} concurrent requests, backlog {}, request timeout {}s, chunk {} bytes",
        settings.max_concurrent,
        settings.backlog,
        settings.request_timeout.as_secs(),
        settings.chunk_size
    );
    for rel in settings.artwork.iter() {
        info!("  http://{}/{}", local, rel.trim_start_matches('/'));
    }

    axum::serve(listener, router(settings)).with_graceful_shutdown(shutdown).await?;
    info!("Artwork server stopped");
    Ok(())
}

pub async fn serve<F>(settings: ServerSettings, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = bind(&settings)?;
    serve_on(listener, settings, shutdown).await
}
