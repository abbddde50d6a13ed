//! Scripted backend and store doubles for unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_auth::{
    AccessToken, CredentialStore, DEFAULT_LOGIN_PATH, DEFAULT_LOGOUT_PATH, DEFAULT_REFRESH_PATH,
    MemoryCredentialStore, RefreshMode, RefreshToken, StoreFuture,
};
use tokio::sync::Semaphore;
use transport::{Outcome, RequestDescriptor, Response, Transport};

use crate::pipeline::RequestPipeline;

/// How the renewal endpoint answers.
#[derive(Debug, Clone)]
pub enum RenewalScript {
    Grant {
        token: String,
        refresh: Option<String>,
    },
    /// Plain HTTP status (401, 500, ...)
    Status(u16),
    /// HTTP 200 with a failed envelope
    EnvelopeFailure,
    TimedOut,
    Unreachable,
}

impl RenewalScript {
    pub fn grant(token: &str, refresh: Option<&str>) -> Self {
        RenewalScript::Grant {
            token: token.to_string(),
            refresh: refresh.map(str::to_string),
        }
    }
}

#[derive(Default)]
struct Log {
    /// (path, bearer) per non-renewal request
    requests: Vec<(String, Option<String>)>,
    renewal_bodies: Vec<Option<serde_json::Value>>,
    logins: Vec<serde_json::Value>,
    logouts: Vec<Option<serde_json::Value>>,
}

struct Inner {
    valid_token: String,
    script: Mutex<RenewalScript>,
    gated: AtomicBool,
    gate: Semaphore,
    renewal_calls: AtomicUsize,
    log: Mutex<Log>,
    rotate_to: Mutex<Option<String>>,
    clear_on_unauthorized: AtomicBool,
    store: Mutex<Option<Arc<dyn CredentialStore>>>,
}

/// In-process backend. Accepts exactly one access token; every other bearer
/// gets 401. Special paths:
/// - `/public`: always 200
/// - `/plain`: 200 with a non-envelope body
/// - `/app-error`: 200 with a failed envelope
/// - `/forbidden`: 403
/// - `/offline`: no response
#[derive(Clone)]
pub struct ScriptedBackend {
    inner: Arc<Inner>,
}

impl ScriptedBackend {
    pub fn new(valid_token: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                valid_token: valid_token.to_string(),
                script: Mutex::new(RenewalScript::grant(valid_token, None)),
                gated: AtomicBool::new(false),
                gate: Semaphore::new(0),
                renewal_calls: AtomicUsize::new(0),
                log: Mutex::new(Log::default()),
                rotate_to: Mutex::new(None),
                clear_on_unauthorized: AtomicBool::new(false),
                store: Mutex::new(None),
            }),
        }
    }

    pub fn script_renewal(&self, script: RenewalScript) {
        *self.inner.script.lock().unwrap() = script;
    }

    pub fn reject_renewal(&self, status: u16) {
        self.script_renewal(RenewalScript::Status(status));
    }

    /// Hold renewal answers until `release_renewal`.
    pub fn gate_renewal(&self) {
        self.inner.gated.store(true, Ordering::SeqCst);
    }

    pub fn release_renewal(&self) {
        self.inner.gated.store(false, Ordering::SeqCst);
        self.inner.gate.add_permits(1 << 16);
    }

    /// On the next 401, write `token` into the attached store before answering.
    pub fn rotate_store_on_unauthorized(&self, token: &str) {
        *self.inner.rotate_to.lock().unwrap() = Some(token.to_string());
    }

    /// On the next 401, clear the attached store before answering.
    pub fn clear_store_on_unauthorized(&self) {
        self.inner.clear_on_unauthorized.store(true, Ordering::SeqCst);
    }

    pub fn attach_store(&self, store: Arc<dyn CredentialStore>) {
        *self.inner.store.lock().unwrap() = Some(store);
    }

    pub fn renewal_calls(&self) -> usize {
        self.inner.renewal_calls.load(Ordering::SeqCst)
    }

    pub fn renewal_bodies(&self) -> Vec<Option<serde_json::Value>> {
        self.inner.log.lock().unwrap().renewal_bodies.clone()
    }

    pub fn logins(&self) -> Vec<serde_json::Value> {
        self.inner.log.lock().unwrap().logins.clone()
    }

    pub fn logouts(&self) -> Vec<Option<serde_json::Value>> {
        self.inner.log.lock().unwrap().logouts.clone()
    }

    pub fn requests_to(&self, path: &str) -> usize {
        self.bearers_for(path).len()
    }

    pub fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
        self.inner
            .log
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, bearer)| bearer.clone())
            .collect()
    }

    /// `None` when `path` was never requested.
    pub fn last_bearer(&self, path: &str) -> Option<Option<String>> {
        self.bearers_for(path).pop()
    }

    async fn renew(&self, request: &RequestDescriptor) -> Outcome {
        self.inner.renewal_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .log
            .lock()
            .unwrap()
            .renewal_bodies
            .push(request.body.clone());

        if self.inner.gated.load(Ordering::SeqCst) {
            let _permit = self.inner.gate.acquire().await.unwrap();
        }

        let script = self.inner.script.lock().unwrap().clone();
        match script {
            RenewalScript::Grant { token, refresh } => {
                let mut data = serde_json::json!({ "token": token });
                if let Some(refresh) = refresh {
                    data["refreshToken"] = serde_json::Value::String(refresh);
                }
                Outcome::Success(envelope(200, "success", data))
            }
            RenewalScript::Status(status) => Outcome::from_response(Response::json_body(
                status,
                &serde_json::json!({"code": status, "msg": "refresh rejected"}),
            )),
            RenewalScript::EnvelopeFailure => Outcome::Success(envelope(
                500,
                "refresh token expired",
                serde_json::Value::Null,
            )),
            RenewalScript::TimedOut => Outcome::TimedOut,
            RenewalScript::Unreachable => Outcome::Unreachable("connection refused".into()),
        }
    }

    fn login(&self, request: &RequestDescriptor) -> Outcome {
        let body = request.body.clone().unwrap_or_default();
        self.inner.log.lock().unwrap().logins.push(body.clone());
        if body["username"] == "admin" && body["password"] == "123456" {
            Outcome::Success(envelope(
                200,
                "success",
                serde_json::json!({
                    "token": self.inner.valid_token,
                    "refreshToken": "rt-login",
                    "user": {"id": 1, "username": "admin", "nickname": "Admin"}
                }),
            ))
        } else {
            Outcome::Success(envelope(500, "用户名或密码错误", serde_json::Value::Null))
        }
    }

    async fn protected(&self, request: &RequestDescriptor) -> Outcome {
        let bearer = request.bearer().map(str::to_string);
        self.inner
            .log
            .lock()
            .unwrap()
            .requests
            .push((request.path.clone(), bearer.clone()));

        match request.path.as_str() {
            "/public" => return Outcome::Success(envelope(200, "success", serde_json::Value::Null)),
            "/offline" => return Outcome::Unreachable("connection refused".into()),
            _ => {}
        }

        if bearer.as_deref() != Some(self.inner.valid_token.as_str()) {
            let rotate = self.inner.rotate_to.lock().unwrap().take();
            let store = self.inner.store.lock().unwrap().clone();
            let clear = self.inner.clear_on_unauthorized.swap(false, Ordering::SeqCst);
            if let Some(store) = store {
                if let Some(token) = rotate {
                    store.write(AccessToken::new(token), None).await.unwrap();
                } else if clear {
                    store.clear().await.unwrap();
                }
            }
            return Outcome::AuthFailure(Response::json_body(
                401,
                &serde_json::json!({"code": 401, "msg": "token expired"}),
            ));
        }

        match request.path.as_str() {
            "/plain" => Outcome::Success(Response::new(
                200,
                Default::default(),
                bytes_of("plain body"),
            )),
            "/app-error" => Outcome::Success(envelope(500, "用户不存在", serde_json::Value::Null)),
            "/forbidden" => Outcome::OtherFailure(Response::json_body(
                403,
                &serde_json::json!({"code": 403, "msg": "forbidden"}),
            )),
            path => Outcome::Success(envelope(
                200,
                "success",
                serde_json::json!({"path": path, "bearer": bearer}),
            )),
        }
    }
}

impl Transport for ScriptedBackend {
    fn id(&self) -> &str {
        "scripted"
    }

    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
        Box::pin(async move {
            match request.path.as_str() {
                DEFAULT_REFRESH_PATH => self.renew(request).await,
                DEFAULT_LOGIN_PATH => self.login(request),
                DEFAULT_LOGOUT_PATH => {
                    self.inner
                        .log
                        .lock()
                        .unwrap()
                        .logouts
                        .push(request.body.clone());
                    Outcome::Success(envelope(200, "success", serde_json::Value::Null))
                }
                _ => self.protected(request).await,
            }
        })
    }
}

fn bytes_of(text: &'static str) -> bytes::Bytes {
    bytes::Bytes::from_static(text.as_bytes())
}

fn envelope(code: i64, msg: &str, data: serde_json::Value) -> Response {
    Response::json_body(200, &serde_json::json!({"code": code, "msg": msg, "data": data}))
}

/// Memory store that counts writes and can be made slow to clear.
pub struct CountingStore {
    inner: MemoryCredentialStore,
    writes: AtomicUsize,
    clear_delay: Mutex<Option<Duration>>,
}

impl CountingStore {
    pub fn new(access: Option<&str>, refresh: Option<&str>) -> Self {
        Self {
            inner: MemoryCredentialStore::with_credentials(
                access.map(AccessToken::new),
                refresh.map(RefreshToken::new),
            ),
            writes: AtomicUsize::new(0),
            clear_delay: Mutex::new(None),
        }
    }

    /// Make every `clear` take `delay`, like a store backed by slow I/O.
    pub fn delay_clear(&self, delay: Duration) {
        *self.clear_delay.lock().unwrap() = Some(delay);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl CredentialStore for CountingStore {
    fn read(&self) -> StoreFuture<'_, Option<AccessToken>> {
        self.inner.read()
    }

    fn refresh_token(&self) -> StoreFuture<'_, Option<RefreshToken>> {
        self.inner.refresh_token()
    }

    fn write(
        &self,
        access: AccessToken,
        refresh: Option<RefreshToken>,
    ) -> StoreFuture<'_, session_auth::Result<()>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(access, refresh)
    }

    fn clear(&self) -> StoreFuture<'_, session_auth::Result<()>> {
        let delay = *self.clear_delay.lock().unwrap();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.clear().await
        })
    }
}

/// Pipeline over `backend` with a seeded counting store and the default hook.
pub fn pipeline_with(
    backend: &ScriptedBackend,
    access: Option<&str>,
    refresh: Option<&str>,
    mode: RefreshMode,
) -> (RequestPipeline, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::new(access, refresh));
    let pipeline = RequestPipeline::builder(Arc::new(backend.clone()), store.clone())
        .refresh_mode(mode)
        .build();
    (pipeline, store)
}

pub fn counting_hook() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    (calls, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}
