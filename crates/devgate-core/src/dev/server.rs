//! The dev HTTP server: proxy forwarding plus static files.
//!
//! Every request is first matched against the proxy table. A match is
//! forwarded to the rule's upstream and the response streamed back
//! unchanged. Anything else is served from `<root>/public` or `<root>`,
//! with `index.html` as the fallback for client-side routes.

use super::config::ServerConfig;
use super::proxy::ProxyRule;
use crate::error::{Error, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Router,
};
use futures::StreamExt;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// How long in-flight responses may keep streaming once shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct AppState {
    config: Arc<ServerConfig>,
    client: reqwest::Client,
    /// Flips to `true` when open proxied streams must end.
    closing: watch::Receiver<bool>,
}

/// A bound, not yet serving, dev server.
pub struct DevServer {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    client: reqwest::Client,
}

impl DevServer {
    /// Bind the listening socket.
    ///
    /// Fails with [`Error::PortInUse`] when the port is taken; the server never
    /// moves to another port on its own.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = host_port(config.bind_host(), config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::AddrInUse {
                Error::PortInUse { port: config.port }
            } else {
                Error::Bind { addr, source }
            }
        })?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_gzip()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        debug!(addr = %listener.local_addr()?, "Dev server bound");

        Ok(Self {
            config: Arc::new(config),
            listener,
            client,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// URL printed for users, e.g. `http://localhost:3001/`.
    pub fn url(&self) -> Result<String> {
        let port = self.local_addr()?.port();
        Ok(format!("http://{}/", host_port(&self.config.host, port)))
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn router(&self, closing: watch::Receiver<bool>) -> Router {
        let state = Arc::new(AppState {
            config: Arc::clone(&self.config),
            client: self.client.clone(),
            closing,
        });

        let app = Router::new()
            .fallback(handle)
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        if self.config.cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    /// Serve until `shutdown` resolves, then stop accepting and drain.
    ///
    /// Open connections get [`SHUTDOWN_GRACE`] to finish. After that, proxied
    /// streams are cut, and after a second grace period this returns even if
    /// some connection is still open. The port is released once this returns.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (closing_tx, closing_rx) = watch::channel(false);
        let mut deadline = closing_rx.clone();
        let app = self.router(closing_rx);

        let signal = async move {
            shutdown.await;
            debug!("Shutdown requested, draining connections");
            tokio::spawn(async move {
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                let _ = closing_tx.send(true);
            });
        };

        let server = axum::serve(self.listener, app)
            .with_graceful_shutdown(signal)
            .into_future();

        tokio::select! {
            result = server => result?,
            () = async {
                if deadline.wait_for(|closing| *closing).await.is_err() {
                    std::future::pending::<()>().await;
                }
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                warn!("Connections still open after shutdown; closing the listener anyway");
            }
        }
        Ok(())
    }
}

async fn handle(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let uri = req
        .uri()
        .path_and_query()
        .map_or_else(|| req.uri().path().to_string(), |pq| pq.as_str().to_string());

    if let Some(rule) = state.config.proxy_rules.find(&uri) {
        return forward(&state, rule, req, &uri).await;
    }

    serve_static(&state.config.root, req.uri().path()).await
}

// ============================================================================
// Proxy
// ============================================================================

async fn forward(state: &AppState, rule: &ProxyRule, req: Request, uri: &str) -> Response {
    let upstream = rule.upstream_url(uri);
    debug!(rule = %rule.path_prefix, from = %uri, to = %upstream, "Proxying request");

    let (parts, body) = req.into_parts();
    let mut headers = parts.headers;
    let has_body = headers.contains_key(header::CONTENT_LENGTH)
        || headers.contains_key(header::TRANSFER_ENCODING);
    strip_hop_by_hop(&mut headers);

    if rule.change_origin {
        match HeaderValue::from_str(&rule.upstream_host()) {
            Ok(host) => {
                headers.insert(header::HOST, host);
            }
            Err(e) => warn!(upstream = %rule.target, error = %e, "Invalid upstream host"),
        }
    }

    for (name, value) in &rule.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(rule = %rule.path_prefix, header = %name, "Skipping invalid proxy header"),
        }
    }

    let mut request = state.client.request(parts.method, upstream.clone()).headers(headers);
    if has_body {
        request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status();
            let mut headers = response.headers().clone();
            strip_hop_by_hop(&mut headers);

            // Cut the body once the shutdown grace runs out.
            let mut closing = state.closing.clone();
            let cut = async move {
                let _ = closing.wait_for(|closing| *closing).await;
            };
            let body = response.bytes_stream().take_until(cut);

            let mut out = Response::new(Body::from_stream(body));
            *out.status_mut() = status;
            *out.headers_mut() = headers;
            out
        }
        Err(e) => {
            warn!(to = %upstream, error = %e, "Proxy request failed");
            (
                StatusCode::BAD_GATEWAY,
                format!("Proxy error: could not reach {upstream}\n"),
            )
                .into_response()
        }
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP.iter().copied().chain(named.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

// ============================================================================
// Static files
// ============================================================================

async fn serve_static(root: &Path, url_path: &str) -> Response {
    let Some(relative) = sanitize_path(url_path) else {
        return not_found(url_path);
    };

    for base in [root.join("public"), root.to_path_buf()] {
        if let Some(file) = find_file(&base.join(&relative)).await {
            return match tokio::fs::read(&file).await {
                Ok(bytes) => file_response(&file, bytes),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Failed to read file");
                    not_found(url_path)
                }
            };
        }
    }

    // SPA fallback: an extension-less path is a client-side route.
    let last = url_path.rsplit('/').next().unwrap_or_default();
    if !last.contains('.') {
        let index = root.join("index.html");
        if let Ok(bytes) = tokio::fs::read(&index).await {
            return file_response(&index, bytes);
        }
    }

    not_found(url_path)
}

/// The file to serve for a candidate path: itself, or `index.html` inside it.
async fn find_file(candidate: &Path) -> Option<PathBuf> {
    let meta = tokio::fs::metadata(candidate).await.ok()?;
    if meta.is_file() {
        return Some(candidate.to_path_buf());
    }
    if meta.is_dir() {
        let index = candidate.join("index.html");
        if tokio::fs::metadata(&index).await.ok()?.is_file() {
            return Some(index);
        }
    }
    None
}

/// Percent-decode a URL path into a relative filesystem path.
///
/// `None` if it would escape the root.
fn sanitize_path(url_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(url_path)?;
    let mut out = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => out.push(s),
        }
    }
    Some(out)
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// `host:port`, bracketing IPv6 literals (`[::1]:3001`).
fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn file_response(path: &Path, bytes: Vec<u8>) -> Response {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    (
        [
            (header::CONTENT_TYPE, content_type(ext)),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        bytes,
    )
        .into_response()
}

fn content_type(ext: &str) -> &'static str {
    match ext {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" | "cjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn not_found(path: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("Not found: {path}\n")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::ACCEPT], "*/*");
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/"), Some(PathBuf::new()));
        assert_eq!(
            sanitize_path("/assets/app.js"),
            Some(PathBuf::from("assets").join("app.js"))
        );
        assert_eq!(
            sanitize_path("/my%20file.txt"),
            Some(PathBuf::from("my file.txt"))
        );
        assert_eq!(sanitize_path("/../etc/passwd"), None);
        assert_eq!(sanitize_path("/a/%2e%2e/%2e%2e/secret"), None);
        assert_eq!(sanitize_path("/bad%zz"), None);
        assert_eq!(sanitize_path("/%+1"), None);
        assert_eq!(sanitize_path("/%-1"), None);
        assert_eq!(sanitize_path("/%4"), None);
    }

    #[test]
    fn test_host_port_brackets_ipv6() {
        assert_eq!(host_port("127.0.0.1", 3001), "127.0.0.1:3001");
        assert_eq!(host_port("localhost", 3001), "localhost:3001");
        assert_eq!(host_port("::", 3001), "[::]:3001");
        assert_eq!(host_port("::1", 0), "[::1]:0");
        assert_eq!(host_port("[::1]", 80), "[::1]:80");
        assert!(host_port("::", 3001).parse::<SocketAddr>().is_ok());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("html"), "text/html; charset=utf-8");
        assert_eq!(content_type("js"), "text/javascript; charset=utf-8");
        assert_eq!(content_type("svg"), "image/svg+xml");
        assert_eq!(content_type("unknown"), "application/octet-stream");
    }
}
