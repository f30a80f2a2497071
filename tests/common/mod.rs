//! Shared harness: scriptable mock backends and an in-process edge node.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;

use edgeward::backend::probe;
use edgeward::config::model::{
    BackendConfig, BackendRole, Config, Forwarding, Node, ProbeConfig, ResponseHeaderNames,
    Scheme, Security,
};
use edgeward::config::ConfigVersion;
use edgeward::engine::Engine;
use edgeward::server::{self, AppState, LoadedConfig};

#[derive(Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("cache-control", "max-age=300".into())],
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: format!("status {status}"),
            delay: Duration::ZERO,
        }
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value.into()));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct MockState {
    reply: Mutex<Reply>,
    probe_status: AtomicU16,
    hits: Mutex<HashMap<String, usize>>,
    last_headers: Mutex<Option<HeaderMap>>,
}

/// An HTTP server standing in for an origin or a mirror. `HEAD /` is the
/// probe endpoint and is not counted.
pub struct MockBackend {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl MockBackend {
    pub async fn start(reply: Reply) -> Self {
        let state = Arc::new(MockState {
            reply: Mutex::new(reply),
            probe_status: AtomicU16::new(200),
            hits: Mutex::new(HashMap::new()),
            last_headers: Mutex::new(None),
        });

        let router = Router::new()
            .fallback(mock_handler)
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown: Some(tx),
            task: Some(task),
        }
    }

    pub fn respond(&self, reply: Reply) {
        *self.state.reply.lock().unwrap() = reply;
    }

    pub fn probe_status(&self, status: u16) {
        self.state.probe_status.store(status, Ordering::Relaxed);
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.state.last_headers.lock().unwrap().clone()
    }

    /// Stop accepting connections; later requests fail at the transport.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
    }
}

async fn mock_handler(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method == Method::HEAD && uri.path() == "/" {
        let status = StatusCode::from_u16(state.probe_status.load(Ordering::Relaxed))
            .unwrap_or(StatusCode::OK);
        return status.into_response();
    }

    *state
        .hits
        .lock()
        .unwrap()
        .entry(uri.path().to_string())
        .or_insert(0) += 1;
    *state.last_headers.lock().unwrap() = Some(headers);

    let reply = state.reply.lock().unwrap().clone();
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let status = StatusCode::from_u16(reply.status).unwrap();
    let mut response = (status, reply.body).into_response();
    for (name, value) in reply.headers {
        response.headers_mut().append(
            HeaderName::from_static(name),
            HeaderValue::from_str(&value).unwrap(),
        );
    }
    response
}

/// Probe settings that keep a backend healthy from the start and never
/// re-probe during a test.
pub fn steady_probe() -> ProbeConfig {
    ProbeConfig {
        initial: Some(3),
        interval_ms: 60_000,
        ..ProbeConfig::default()
    }
}

fn backend(id: &str, port: u16, role: BackendRole) -> BackendConfig {
    BackendConfig {
        id: id.into(),
        host: "127.0.0.1".into(),
        port,
        scheme: Scheme::Http,
        role,
        timeout_ms: 2000,
        probe: steady_probe(),
    }
}

/// Origin, a sentinel on the discard port, then the given mirrors.
pub fn chain(origin: &MockBackend, mirrors: &[&MockBackend]) -> Config {
    let mut backends = vec![
        backend("origin", origin.addr.port(), BackendRole::Primary),
        backend("sentinel", 9, BackendRole::Sentinel),
    ];
    for (i, mirror) in mirrors.iter().enumerate() {
        backends.push(backend(
            &format!("mirror{}", i + 1),
            mirror.addr.port(),
            BackendRole::Fallback,
        ));
    }

    Config {
        node: Node {
            identity: "cache-test".into(),
            grace_secs: 86_400,
            default_ttl_secs: 120,
            saint_period_secs: 1,
            status_path: "/__edge/status".into(),
        },
        backends,
        security: Security {
            purge_allow: vec!["127.0.0.1".into()],
            require_secure: false,
            ..Security::default()
        },
        headers: ResponseHeaderNames::default(),
        forwarding: Forwarding::default(),
    }
}

pub struct EdgeNode {
    pub addr: SocketAddr,
    pub engine: Arc<Engine>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl EdgeNode {
    pub async fn start(config: Config) -> Self {
        Self::launch(config, false).await
    }

    /// Start with the health probers running.
    pub async fn start_probed(config: Config) -> Self {
        Self::launch(config, true).await
    }

    async fn launch(config: Config, probed: bool) -> Self {
        let client = server::build_http_client();
        let engine = Arc::new(Engine::new(&config, client.clone()).unwrap());
        let state = Arc::new(AppState {
            config: LoadedConfig {
                version: ConfigVersion::Hash("test-hash-0123456789".into()),
                source_name: "test".into(),
                loaded_at: Instant::now(),
            },
            engine: Arc::clone(&engine),
            start_time: Instant::now(),
        });

        let (shutdown, rx) = tokio::sync::watch::channel(false);
        if probed {
            let _ = probe::spawn_probers(&engine.registry, &engine.health, &client, &rx);
        }

        let router = server::build_router(state, 1_048_576);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut serve_rx = rx.clone();
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = serve_rx.changed().await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            engine,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// A client that reports redirects instead of following them.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

pub fn header(resp: &reqwest::Response, name: &str) -> String {
    resp.headers()
        .get(name)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default()
}
