use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::constants::{
    API_BASE_URL, GATEWAY_LIMIT_GENERATE, GATEWAY_LIMIT_INIT, GATEWAY_LIMIT_POLL, GATEWAY_WINDOW,
};

/// Admission control seam. The in-memory fixed window below is per-process
/// and not durable across restarts or instances; swap this implementation
/// for a durable one without touching the handlers.
pub trait RateLimiter: Send + Sync {
    fn allow(&self, client_id: &str) -> bool;
}

struct Window {
    count: u32,
    started: Instant,
}

/// Fixed window with a reset timestamp and lazy expiry on access.
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn allow(&self, client_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let entry = state.entry(client_id.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }
}

pub struct GatewayState {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    init_limit: Arc<dyn RateLimiter>,
    poll_limit: Arc<dyn RateLimiter>,
    generate_limit: Arc<dyn RateLimiter>,
}

impl GatewayState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: API_BASE_URL.to_string(),
            api_key: config
                .credentials
                .for_tier(crate::orchestrator::CredentialTier::Primary)
                .to_string(),
            init_limit: Arc::new(FixedWindowLimiter::new(GATEWAY_LIMIT_INIT, GATEWAY_WINDOW)),
            poll_limit: Arc::new(FixedWindowLimiter::new(GATEWAY_LIMIT_POLL, GATEWAY_WINDOW)),
            generate_limit: Arc::new(FixedWindowLimiter::new(
                GATEWAY_LIMIT_GENERATE,
                GATEWAY_WINDOW,
            )),
        }
    }
}

/// Three same-origin endpoints mirroring the client's network operations,
/// so browser callers never see a credential. Unmatched methods get axum's
/// 405; OPTIONS is answered for preflight.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/upload/init", post(upload_init).options(preflight))
        .route("/api/upload/poll", post(upload_poll).options(preflight))
        .route("/api/generate", post(generate).options(preflight))
        .with_state(state)
}

pub async fn serve(config: &AppConfig, bind: &str, cancel: CancellationToken) -> anyhow::Result<()> {
    let state = Arc::new(GatewayState::new(config));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "gateway listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await?;
    Ok(())
}

fn client_id(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn over_limit() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "rate limit exceeded" })),
    )
        .into_response()
}

fn upstream_failed(err: reqwest::Error) -> Response {
    warn!(error = %err, "upstream request failed");
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": "upstream unreachable" })),
    )
        .into_response()
}

/// Mirror the upstream status and body back to the browser.
async fn passthrough(resp: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = resp.bytes().await.unwrap_or_default();
    (status, body).into_response()
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct InitRequest {
    file_name: String,
    mime_type: String,
    size_bytes: u64,
}

async fn upload_init(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<InitRequest>,
) -> Response {
    if !state.init_limit.allow(&client_id(&headers, &addr)) {
        return over_limit();
    }

    let url = format!("{}/upload/v1beta/files", state.base_url);
    let body = json!({
        "file": { "display_name": req.file_name, "mime_type": req.mime_type }
    });
    let upstream = state
        .http
        .post(&url)
        .query(&[("key", state.api_key.as_str())])
        .header("X-Goog-Upload-Protocol", "resumable")
        .header("X-Goog-Upload-Command", "start")
        .header("X-Goog-Upload-Header-Content-Length", req.size_bytes)
        .header("X-Goog-Upload-Header-Content-Type", &req.mime_type)
        .json(&body)
        .send()
        .await;

    match upstream {
        Ok(resp) if resp.status().is_success() => {
            let session_url = resp
                .headers()
                .get("x-goog-upload-url")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string());
            match session_url {
                Some(upload_url) => Json(json!({ "uploadUrl": upload_url })).into_response(),
                None => (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "upstream omitted upload url" })),
                )
                    .into_response(),
            }
        }
        Ok(resp) => passthrough(resp).await,
        Err(err) => upstream_failed(err),
    }
}

#[derive(Debug, Deserialize)]
struct PollRequest {
    /// Media resource name, e.g. `files/abc123`.
    name: String,
}

async fn upload_poll(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<PollRequest>,
) -> Response {
    if !state.poll_limit.allow(&client_id(&headers, &addr)) {
        return over_limit();
    }
    if !req.name.starts_with("files/") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid media resource name" })),
        )
            .into_response();
    }

    let url = format!("{}/v1beta/{}", state.base_url, req.name);
    match state
        .http
        .get(&url)
        .query(&[("key", state.api_key.as_str())])
        .send()
        .await
    {
        Ok(resp) => passthrough(resp).await,
        Err(err) => upstream_failed(err),
    }
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    request: serde_json::Value,
}

async fn generate(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    if !state.generate_limit.allow(&client_id(&headers, &addr)) {
        return over_limit();
    }

    let url = format!(
        "{}/v1beta/models/{}:generateContent",
        state.base_url, req.model
    );
    match state
        .http
        .post(&url)
        .query(&[("key", state.api_key.as_str())])
        .json(&req.request)
        .send()
        .await
    {
        Ok(resp) => passthrough(resp).await,
        Err(err) => upstream_failed(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        format!("http://{addr}")
    }

    async fn stub_upstream() -> String {
        let app = Router::new()
            .route(
                "/v1beta/models/stub-model:generateContent",
                post(|| async {
                    (StatusCode::IM_A_TEAPOT, "upstream says no").into_response()
                }),
            )
            .route(
                "/v1beta/files/ok-1",
                get(|| async { Json(json!({ "state": "ACTIVE" })) }),
            );
        spawn(app).await
    }

    fn state(base_url: String, generate_limit: u32) -> Arc<GatewayState> {
        Arc::new(GatewayState {
            http: reqwest::Client::new(),
            base_url,
            api_key: "key-a".to_string(),
            init_limit: Arc::new(FixedWindowLimiter::new(100, GATEWAY_WINDOW)),
            poll_limit: Arc::new(FixedWindowLimiter::new(100, GATEWAY_WINDOW)),
            generate_limit: Arc::new(FixedWindowLimiter::new(generate_limit, GATEWAY_WINDOW)),
        })
    }

    #[tokio::test]
    async fn generate_mirrors_upstream_status_and_body() {
        let upstream = stub_upstream().await;
        let gateway = spawn(router(state(upstream, 100))).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/generate"))
            .json(&json!({ "model": "stub-model", "request": {} }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 418);
        assert_eq!(resp.text().await.unwrap(), "upstream says no");
    }

    #[tokio::test]
    async fn over_limit_requests_get_429_with_error_body() {
        let upstream = stub_upstream().await;
        let gateway = spawn(router(state(upstream, 1))).await;
        let client = reqwest::Client::new();
        let body = json!({ "model": "stub-model", "request": {} });

        let first = client
            .post(format!("{gateway}/api/generate"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(first.status().as_u16(), 418);

        let second = client
            .post(format!("{gateway}/api/generate"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(second.status().as_u16(), 429);
        let payload: serde_json::Value = second.json().await.unwrap();
        assert_eq!(payload["error"], "rate limit exceeded");
    }

    #[tokio::test]
    async fn poll_rejects_names_outside_files_namespace() {
        let upstream = stub_upstream().await;
        let gateway = spawn(router(state(upstream, 100))).await;
        let client = reqwest::Client::new();

        let bad = client
            .post(format!("{gateway}/api/upload/poll"))
            .json(&json!({ "name": "../v1/secrets" }))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status().as_u16(), 400);

        let ok = client
            .post(format!("{gateway}/api/upload/poll"))
            .json(&json!({ "name": "files/ok-1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status().as_u16(), 200);
        let payload: serde_json::Value = ok.json().await.unwrap();
        assert_eq!(payload["state"], "ACTIVE");
    }

    #[test]
    fn limiter_allows_up_to_limit_per_client() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.allow("1.2.3.4"));
        }
        assert!(!limiter.allow("1.2.3.4"));
        // other clients are counted independently
        assert!(limiter.allow("5.6.7.8"));
    }

    #[test]
    fn limiter_resets_after_window_elapses() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.allow("client"));
        assert!(!limiter.allow("client"));
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.allow("client"));
    }

    #[test]
    fn client_id_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "9.9.9.9, 10.0.0.1".parse().unwrap());
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(client_id(&headers, &addr), "9.9.9.9");
        assert_eq!(client_id(&HeaderMap::new(), &addr), "127.0.0.1");
    }
}
