//! Integration tests for the dev server.
//!
//! An axum echo server stands in for the backends behind the proxy.

use axum::{
    body::Body,
    extract::Request,
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use devgate_core::dev::server::SHUTDOWN_GRACE;
use devgate_core::dev::{PathRewrite, ReplaceStep};
use devgate_core::{load_config, DevServer, Error, ProxyRule, ServerConfig};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<devgate_core::Result<()>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap().unwrap();
    }
}

async fn echo(req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "method": parts.method.as_str(),
        "uri": parts.uri.to_string(),
        "host": header("host"),
        "x_dev": header("x-dev"),
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response()
}

/// An event stream that never ends on its own.
async fn ticks() -> Response {
    let ticks = futures::stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Some((Ok::<_, Infallible>("data: tick\n"), ()))
    });
    ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(ticks)).into_response()
}

async fn start_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/moved", get(|| async { Redirect::temporary("/elsewhere") }))
        .route("/api/stream", get(ticks))
        .fallback(echo);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn start(config: ServerConfig) -> Running {
    let server = DevServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(async {
        let _ = rx.await;
    }));
    Running {
        addr,
        shutdown,
        handle,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn base_config(root: &std::path::Path) -> ServerConfig {
    let mut config = ServerConfig::new(root);
    config.port = 0;
    config
}

fn target(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{addr}")).unwrap()
}

async fn get_json(url: &str) -> Value {
    let response = client().get(url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_reference_config_end_to_end() {
    let api = start_upstream().await;
    let grafana = start_upstream().await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("vite.config.ts"),
        format!(
            r"import {{ defineConfig }} from 'vite'
import vue from '@vitejs/plugin-vue'
import {{ resolve }} from 'path'

export default defineConfig({{
  plugins: [vue()],
  resolve: {{ alias: {{ '@': resolve(__dirname, 'src') }} }},
  server: {{
    port: 0,
    proxy: {{
      '/api': {{ target: 'http://{api}', changeOrigin: true }},
      '/grafana': {{
        target: 'http://{grafana}',
        changeOrigin: true,
        rewrite: (path) => path.replace(/^\/grafana/, '')
      }}
    }}
  }}
}})
"
        ),
    )
    .unwrap();

    let config = load_config(dir.path(), None).unwrap();
    let server = start(config).await;

    let body = get_json(&server.url("/api/users")).await;
    assert_eq!(body["uri"], "/api/users");
    assert_eq!(body["host"], api.to_string());

    let body = get_json(&server.url("/grafana/d/dashboard1")).await;
    assert_eq!(body["uri"], "/d/dashboard1");
    assert_eq!(body["host"], grafana.to_string());

    let body = get_json(&server.url("/grafana")).await;
    assert_eq!(body["uri"], "/");

    server.stop().await;
}

#[tokio::test]
async fn test_host_preserved_without_change_origin() {
    let upstream = start_upstream().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = base_config(dir.path());
    config
        .proxy_rules
        .insert(ProxyRule::new("/api", target(upstream)).unwrap());
    let server = start(config).await;

    let body = get_json(&server.url("/api/ping")).await;
    assert_eq!(body["host"], server.addr.to_string());

    server.stop().await;
}

#[tokio::test]
async fn test_query_method_body_and_headers_forwarded() {
    let upstream = start_upstream().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = base_config(dir.path());
    config.proxy_rules.insert(
        ProxyRule::new("/grafana", target(upstream))
            .unwrap()
            .with_change_origin(true)
            .with_rewrite(
                PathRewrite::new().step(ReplaceStep::regex(r"^\/grafana", "", "").unwrap()),
            )
            .with_header("X-Dev", "yes"),
    );
    let server = start(config).await;

    let response = client()
        .post(server.url("/grafana/api/search?query=cpu&limit=5"))
        .body("hello upstream")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["method"], "POST");
    assert_eq!(body["uri"], "/api/search?query=cpu&limit=5");
    assert_eq!(body["body"], "hello upstream");
    assert_eq!(body["x_dev"], "yes");

    server.stop().await;
}

#[tokio::test]
async fn test_redirects_are_passed_through() {
    let upstream = start_upstream().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = base_config(dir.path());
    config
        .proxy_rules
        .insert(ProxyRule::new("/moved", target(upstream)).unwrap());
    let server = start(config).await;

    let response = client().get(server.url("/moved")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/elsewhere");

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Grab a free port, then release it so nothing listens there.
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let dir = tempfile::tempdir().unwrap();

    let mut config = base_config(dir.path());
    config
        .proxy_rules
        .insert(ProxyRule::new("/api", target(closed)).unwrap());
    let server = start(config).await;

    let response = client().get(server.url("/api/users")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    server.stop().await;
}

#[tokio::test]
async fn test_static_files_and_spa_fallback() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<div id=\"app\"></div>").unwrap();
    std::fs::create_dir_all(dir.path().join("public")).unwrap();
    std::fs::write(dir.path().join("public/favicon.svg"), "<svg/>").unwrap();
    std::fs::create_dir_all(dir.path().join("assets")).unwrap();
    std::fs::write(dir.path().join("assets/app.js"), "console.log(1)").unwrap();

    let server = start(base_config(dir.path())).await;
    let client = client();

    let response = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<div id=\"app\"></div>");

    let response = client.get(server.url("/favicon.svg")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");

    let response = client.get(server.url("/assets/app.js")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/javascript; charset=utf-8"
    );

    // Client-side route
    let response = client.get(server.url("/dashboard/42")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<div id=\"app\"></div>");

    let response = client.get(server.url("/missing.js")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_port_in_use_is_an_error() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();

    let mut config = ServerConfig::new(dir.path());
    config.port = port;

    match DevServer::bind(config).await {
        Err(Error::PortInUse { port: p }) => assert_eq!(p, port),
        Err(other) => panic!("expected PortInUse, got {other}"),
        Ok(_) => panic!("expected PortInUse, bind succeeded"),
    }
}

#[tokio::test]
async fn test_restart_releases_old_port() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "ok").unwrap();

    let first = start(base_config(dir.path())).await;
    let first_addr = first.addr;

    // The replacement is up before the old instance stops.
    let second = start(base_config(dir.path())).await;
    first.stop().await;

    assert!(tokio::net::TcpStream::connect(first_addr).await.is_err());

    let response = client().get(second.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    second.stop().await;
}

#[tokio::test]
async fn test_shutdown_ends_open_proxied_stream() {
    let upstream = start_upstream().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = base_config(dir.path());
    config
        .proxy_rules
        .insert(ProxyRule::new("/api", target(upstream)).unwrap());
    let server = start(config).await;
    let addr = server.addr;

    let mut response = client().get(server.url("/api/stream")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = response.chunk().await.unwrap().expect("first event");
    assert!(first.starts_with(b"data: tick"));

    // The client keeps the response open while the server stops.
    let _ = server.shutdown.send(());
    let stopped = tokio::time::timeout(SHUTDOWN_GRACE * 4, server.handle).await;
    assert!(stopped.is_ok(), "serve() still running with a proxied stream open");
    stopped.unwrap().unwrap().unwrap();

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    drop(response);
}
