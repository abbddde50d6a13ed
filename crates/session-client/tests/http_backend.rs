//! Pipeline over real HTTP against an axum backend that hands out its
//! refresh credential as an HTTP-only cookie.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::Secret;
use session_auth::{CredentialStore, MemoryCredentialStore, REFRESH_COOKIE_NAME, RefreshMode};
use session_client::{Error, RenewalPhase, RequestPipeline};
use tokio::net::TcpListener;
use transport::{HttpTransport, RequestDescriptor};

#[derive(Default)]
struct Backend {
    /// Generation of the only valid access token (`tok-<n>`)
    access: AtomicU64,
    /// Generation of the only valid refresh cookie (`rt-<n>`)
    refresh: AtomicU64,
    renewals: AtomicUsize,
}

fn envelope(data: serde_json::Value) -> Json<serde_json::Value> {
    Json(serde_json::json!({"code": 200, "msg": "success", "data": data}))
}

fn refresh_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .map(str::trim)
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == REFRESH_COOKIE_NAME)
        .map(|(_, value)| value.to_string())
}

fn set_cookie(generation: u64) -> [(header::HeaderName, String); 1] {
    [(
        header::SET_COOKIE,
        format!("{REFRESH_COOKIE_NAME}=rt-{generation}; Path=/; HttpOnly"),
    )]
}

async fn login(
    State(backend): State<Arc<Backend>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if body["username"] != "admin" || body["password"] != "123456" {
        return Json(serde_json::json!({"code": 500, "msg": "用户名或密码错误"})).into_response();
    }
    let access = backend.access.fetch_add(1, Ordering::SeqCst) + 1;
    let refresh = backend.refresh.fetch_add(1, Ordering::SeqCst) + 1;
    (
        set_cookie(refresh),
        envelope(serde_json::json!({
            "token": format!("tok-{access}"),
            "user": {"id": 1, "username": "admin"}
        })),
    )
        .into_response()
}

async fn refresh(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.renewals.fetch_add(1, Ordering::SeqCst);
    // Keep the exchange in flight long enough for concurrent 401s to queue
    tokio::time::sleep(Duration::from_millis(50)).await;

    let expected = format!("rt-{}", backend.refresh.load(Ordering::SeqCst));
    if refresh_cookie(&headers).as_deref() != Some(expected.as_str()) {
        return Json(serde_json::json!({"code": 500, "msg": "refresh token expired"}))
            .into_response();
    }
    let access = backend.access.fetch_add(1, Ordering::SeqCst) + 1;
    let refresh = backend.refresh.fetch_add(1, Ordering::SeqCst) + 1;
    (
        set_cookie(refresh),
        envelope(serde_json::json!({"token": format!("tok-{access}")})),
    )
        .into_response()
}

async fn data(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    let expected = format!("Bearer tok-{}", backend.access.load(Ordering::SeqCst));
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented != expected {
        return (StatusCode::UNAUTHORIZED, "token expired").into_response();
    }
    envelope(serde_json::json!({"token": presented.trim_start_matches("Bearer ")}))
        .into_response()
}

/// Invalidate the current access token server-side.
async fn expire(State(backend): State<Arc<Backend>>) -> StatusCode {
    backend.access.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

/// Revoke the refresh cookie server-side.
async fn revoke(State(backend): State<Arc<Backend>>) -> StatusCode {
    backend.refresh.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn start_backend() -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let app = axum::Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/data", get(data))
        .route("/api/admin/expire", post(expire))
        .route("/api/admin/revoke", post(revoke))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api"), backend)
}

fn cookie_pipeline(base_url: &str, hook_calls: Arc<AtomicUsize>) -> RequestPipeline {
    let transport = HttpTransport::new(base_url, true).unwrap();
    RequestPipeline::builder(Arc::new(transport), Arc::new(MemoryCredentialStore::new()))
        .refresh_mode(RefreshMode::Cookie)
        .renewal_timeout(Duration::from_secs(5))
        .termination_hook(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        })
        .build()
}

#[tokio::test]
async fn concurrent_expiry_renews_once_over_cookie_channel() {
    let (base_url, backend) = start_backend().await;
    let pipeline = cookie_pipeline(&base_url, Arc::new(AtomicUsize::new(0)));

    pipeline
        .login("admin", &Secret::from("123456"))
        .await
        .unwrap();
    pipeline
        .execute(RequestDescriptor::post("/admin/expire"))
        .await
        .unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.execute(RequestDescriptor::get("/data")).await })
        })
        .collect();

    let mut tokens = Vec::new();
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        tokens.push(response.envelope().unwrap().data["token"].clone());
    }

    assert_eq!(backend.renewals.load(Ordering::SeqCst), 1);
    let renewed = pipeline.store().read().await.unwrap();
    assert!(tokens.iter().all(|t| t == renewed.expose()), "got {tokens:?}");
    assert_eq!(pipeline.coordinator().phase().await, RenewalPhase::Idle);
}

#[tokio::test]
async fn rotated_cookie_is_used_by_the_next_renewal() {
    let (base_url, backend) = start_backend().await;
    let pipeline = cookie_pipeline(&base_url, Arc::new(AtomicUsize::new(0)));
    pipeline
        .login("admin", &Secret::from("123456"))
        .await
        .unwrap();

    for round in 1..=3 {
        pipeline
            .execute(RequestDescriptor::post("/admin/expire"))
            .await
            .unwrap();
        pipeline
            .execute(RequestDescriptor::get("/data"))
            .await
            .unwrap();
        assert_eq!(backend.renewals.load(Ordering::SeqCst), round);
    }
}

#[tokio::test]
async fn revoked_cookie_terminates_session_once() {
    let (base_url, backend) = start_backend().await;
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let pipeline = cookie_pipeline(&base_url, hook_calls.clone());
    pipeline
        .login("admin", &Secret::from("123456"))
        .await
        .unwrap();

    pipeline
        .execute(RequestDescriptor::post("/admin/revoke"))
        .await
        .unwrap();
    pipeline
        .execute(RequestDescriptor::post("/admin/expire"))
        .await
        .unwrap();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.execute(RequestDescriptor::get("/data")).await })
        })
        .collect();
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::RenewalRejected(_))), "got {result:?}");
    }

    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert!(pipeline.store().read().await.is_none());
    assert!(backend.renewals.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn bad_credentials_fail_login_without_touching_store() {
    let (base_url, _backend) = start_backend().await;
    let pipeline = cookie_pipeline(&base_url, Arc::new(AtomicUsize::new(0)));

    let err = pipeline
        .login("admin", &Secret::from("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Application { code: 500, .. }), "got {err:?}");
    assert_eq!(err.notice(), "用户名或密码错误");
    assert!(pipeline.store().read().await.is_none());
}
