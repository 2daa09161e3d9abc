//! Asynchronous client for the sandbox runtime service.
//!
//! The sandbox provisions short-lived remote environments that build and
//! serve a project from an uploaded file snapshot. This crate wraps its HTTP
//! API behind [`SandboxClient`]: start a session, patch files into it, tail
//! its logs, keep it alive, and stop it. The wire transport sits behind the
//! [`SandboxBackend`] trait so tests can script responses without a live
//! service.

mod types;

pub use reqwest::StatusCode;
pub use types::{
    Liveness, LogChunk, PatchRequest, PingResponse, RemotePhase, RemoteSession, StartRequest,
    StartResponse,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    base_url: Url,
    bearer_token: Option<String>,
}

impl SandboxConfig {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, SandboxError> {
        let mut base = base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(SandboxError::InvalidConfig(
                "sandbox base url cannot be empty".into(),
            ));
        }
        if !base.contains("://") {
            let inferred_scheme = infer_scheme(&base);
            base = format!("{inferred_scheme}{base}");
        }
        let parsed = Url::parse(&base)
            .map_err(|err| SandboxError::InvalidConfig(format!("invalid sandbox url: {err}")))?;
        Ok(Self {
            base_url: parsed,
            bearer_token: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn set_bearer_token(&mut self, token: Option<String>) {
        self.bearer_token = token;
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }
}

fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower == "0.0.0.0"
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
        || host_lower
            .strip_prefix("172.")
            .and_then(|rest| rest.split('.').next())
            .and_then(|octet| octet.parse::<u8>().ok())
            .map(|octet| (16..32).contains(&octet))
            .unwrap_or(false)
    {
        "http://"
    } else {
        "https://"
    }
}

/// Stable digest of a file map. Equal maps hash equal regardless of insertion
/// history; paths and contents are length-prefixed so boundaries cannot alias.
pub fn snapshot_digest(files: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, content) in files {
        hasher.update((path.len() as u64).to_le_bytes());
        hasher.update(path.as_bytes());
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(content.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Transport seam for the sandbox API. Production traffic goes through
/// [`ReqwestSandboxBackend`]; tests supply scripted implementations via
/// [`SandboxClient::with_backend`].
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn start_session(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        request: &StartRequest<'_>,
    ) -> Result<StartResponse, SandboxError>;

    async fn patch_file(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        session_id: &str,
        patch: &PatchRequest,
    ) -> Result<(), SandboxError>;

    async fn fetch_logs(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        session_id: &str,
    ) -> Result<LogChunk, SandboxError>;

    async fn ping_session(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        session_id: &str,
    ) -> Result<PingResponse, SandboxError>;

    async fn stop_session(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        session_id: &str,
    ) -> Result<(), SandboxError>;
}

#[derive(Clone)]
struct CachedStart {
    digest: String,
    session: RemoteSession,
}

#[derive(Clone)]
pub struct SandboxClient {
    config: Arc<SandboxConfig>,
    backend: Arc<dyn SandboxBackend>,
    start_cache: Arc<Mutex<HashMap<String, CachedStart>>>,
}

impl SandboxClient {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let backend = Arc::new(ReqwestSandboxBackend::new()?);
        Ok(Self::with_backend(config, backend))
    }

    /// Build a client over a custom transport.
    pub fn with_backend(config: SandboxConfig, backend: Arc<dyn SandboxBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
            start_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Provision a session for `project_id` from a full file snapshot.
    ///
    /// Starts are cached per project: if the snapshot digest matches the last
    /// successful start, the cached session is revalidated with a ping and
    /// returned instead of provisioning a fresh environment. A dead cached
    /// session is evicted and a new one provisioned.
    pub async fn start(
        &self,
        project_id: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<RemoteSession, SandboxError> {
        let digest = snapshot_digest(files);
        let cached = {
            let cache = self.start_cache.lock();
            cache
                .get(project_id)
                .filter(|entry| entry.digest == digest)
                .map(|entry| entry.session.clone())
        };
        if let Some(session) = cached {
            if self.ping(&session.id).await.is_alive() {
                tracing::debug!(
                    target = "sandbox_sdk",
                    session_id = %session.id,
                    "reusing live session for unchanged snapshot"
                );
                return Ok(session);
            }
            self.start_cache.lock().remove(project_id);
        }

        let request = StartRequest { project_id, files };
        let response = self
            .backend
            .start_session(self.config.base_url(), self.config.bearer_token(), &request)
            .await?;
        let session = validate_start(response)?;
        tracing::debug!(
            target = "sandbox_sdk",
            session_id = %session.id,
            phase = session.phase.label(),
            "sandbox session started"
        );
        self.start_cache.lock().insert(
            project_id.to_string(),
            CachedStart {
                digest,
                session: session.clone(),
            },
        );
        Ok(session)
    }

    pub async fn patch(&self, session_id: &str, patch: &PatchRequest) -> Result<(), SandboxError> {
        self.backend
            .patch_file(
                self.config.base_url(),
                self.config.bearer_token(),
                session_id,
                patch,
            )
            .await
    }

    pub async fn fetch_logs(&self, session_id: &str) -> Result<LogChunk, SandboxError> {
        self.backend
            .fetch_logs(
                self.config.base_url(),
                self.config.bearer_token(),
                session_id,
            )
            .await
    }

    /// Liveness check. Fails closed: any transport error, non-2xx status, or
    /// unknown session reads as [`Liveness::Dead`].
    pub async fn ping(&self, session_id: &str) -> Liveness {
        match self
            .backend
            .ping_session(
                self.config.base_url(),
                self.config.bearer_token(),
                session_id,
            )
            .await
        {
            Ok(response) if response.status == "alive" => Liveness::Alive,
            Ok(response) => {
                tracing::debug!(
                    target = "sandbox_sdk",
                    session_id = %session_id,
                    status = %response.status,
                    "ping reported session not alive"
                );
                Liveness::Dead
            }
            Err(err) => {
                tracing::debug!(
                    target = "sandbox_sdk",
                    session_id = %session_id,
                    error = %err,
                    "ping failed, treating session as dead"
                );
                Liveness::Dead
            }
        }
    }

    /// Stop a session. The cached start entry for it is dropped either way so
    /// a later start never resurrects a session the caller chose to abandon.
    pub async fn stop(&self, session_id: &str) -> Result<(), SandboxError> {
        let result = self
            .backend
            .stop_session(
                self.config.base_url(),
                self.config.bearer_token(),
                session_id,
            )
            .await;
        self.start_cache
            .lock()
            .retain(|_, entry| entry.session.id != session_id);
        result
    }
}

fn validate_start(response: StartResponse) -> Result<RemoteSession, SandboxError> {
    let StartResponse {
        session_id,
        status,
        preview_url,
        created_at,
    } = response;
    let session_id = session_id.trim().to_string();
    if session_id.is_empty() {
        return Err(SandboxError::InvalidResponse("missing session id".into()));
    }
    let preview_url = preview_url
        .as_deref()
        .map(|raw| parse_url(raw, "previewUrl"))
        .transpose()?;
    Ok(RemoteSession {
        id: session_id,
        phase: status,
        preview_url,
        created_at_ms: created_at,
    })
}

fn parse_url(raw: &str, field: &str) -> Result<Url, SandboxError> {
    Url::parse(raw).map_err(|err| {
        SandboxError::InvalidResponse(format!("{field} contains invalid url '{raw}': {err}"))
    })
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// `POST /session` waits for the remote environment to boot, so it gets a
/// longer leash than the other endpoints.
const START_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ReqwestSandboxBackend {
    client: reqwest::Client,
}

impl ReqwestSandboxBackend {
    pub fn new() -> Result<Self, SandboxError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SandboxBackend for ReqwestSandboxBackend {
    async fn start_session(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        request: &StartRequest<'_>,
    ) -> Result<StartResponse, SandboxError> {
        let endpoint = base_url.join("session").map_err(|err| {
            SandboxError::InvalidConfig(format!("invalid session endpoint: {err}"))
        })?;
        let mut builder = self.client.post(endpoint).timeout(START_TIMEOUT);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.json(request).send().await?;
        if !response.status().is_success() {
            return Err(SandboxError::HttpStatus(response.status()));
        }
        decode_json(response).await
    }

    async fn patch_file(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        session_id: &str,
        patch: &PatchRequest,
    ) -> Result<(), SandboxError> {
        let endpoint = base_url
            .join(&format!("session/{session_id}/file"))
            .map_err(|err| {
                SandboxError::InvalidConfig(format!(
                    "invalid file endpoint for session {session_id}: {err}"
                ))
            })?;
        let mut builder = self.client.post(endpoint);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.json(patch).send().await?;
        check_session_status(response.status(), session_id)
    }

    async fn fetch_logs(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        session_id: &str,
    ) -> Result<LogChunk, SandboxError> {
        let endpoint = base_url
            .join(&format!("session/{session_id}/logs"))
            .map_err(|err| {
                SandboxError::InvalidConfig(format!(
                    "invalid logs endpoint for session {session_id}: {err}"
                ))
            })?;
        let mut builder = self.client.get(endpoint);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        check_session_status(response.status(), session_id)?;
        decode_json(response).await
    }

    async fn ping_session(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        session_id: &str,
    ) -> Result<PingResponse, SandboxError> {
        let endpoint = base_url
            .join(&format!("session/{session_id}/ping"))
            .map_err(|err| {
                SandboxError::InvalidConfig(format!(
                    "invalid ping endpoint for session {session_id}: {err}"
                ))
            })?;
        let mut builder = self.client.post(endpoint);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        check_session_status(response.status(), session_id)?;
        decode_json(response).await
    }

    async fn stop_session(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        session_id: &str,
    ) -> Result<(), SandboxError> {
        let endpoint = base_url
            .join(&format!("session/{session_id}/stop"))
            .map_err(|err| {
                SandboxError::InvalidConfig(format!(
                    "invalid stop endpoint for session {session_id}: {err}"
                ))
            })?;
        let mut builder = self.client.post(endpoint);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        check_session_status(response.status(), session_id)
    }
}

fn check_session_status(status: StatusCode, session_id: &str) -> Result<(), SandboxError> {
    if status == StatusCode::NOT_FOUND {
        return Err(SandboxError::SessionNotFound(session_id.to_string()));
    }
    if !status.is_success() {
        return Err(SandboxError::HttpStatus(status));
    }
    Ok(())
}

async fn decode_json<T>(response: reqwest::Response) -> Result<T, SandboxError>
where
    T: serde::de::DeserializeOwned,
{
    response
        .json::<T>()
        .await
        .map_err(|err| SandboxError::InvalidResponse(format!("malformed response body: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    #[test]
    fn defaults_to_https_for_public_hosts() {
        assert_eq!(infer_scheme("sandbox.example.dev"), "https://");
        assert_eq!(infer_scheme("sandbox.example.dev/api"), "https://");
        assert_eq!(infer_scheme("52.12.9.40"), "https://");
    }

    #[test]
    fn defaults_to_http_for_local_hosts() {
        for host in [
            "localhost",
            "localhost:8700",
            "127.0.0.1",
            "127.0.0.1:8700",
            "0.0.0.0",
            "10.1.2.3",
            "192.168.0.20",
            "172.16.0.1",
            "172.31.255.255",
            "[::1]",
        ] {
            assert_eq!(infer_scheme(host), "http://");
        }
    }

    #[test]
    fn sandbox_config_infers_scheme() {
        let https = SandboxConfig::new("sandbox.example.dev").unwrap();
        assert_eq!(https.base_url().as_str(), "https://sandbox.example.dev/");

        let http = SandboxConfig::new("localhost:8700").unwrap();
        assert_eq!(http.base_url().as_str(), "http://localhost:8700/");
    }

    #[test]
    fn sandbox_config_rejects_empty_url() {
        assert!(matches!(
            SandboxConfig::new("   "),
            Err(SandboxError::InvalidConfig(_))
        ));
    }

    #[test]
    fn digest_ignores_insertion_history() {
        let mut first = BTreeMap::new();
        first.insert("/src/main.jsx".to_string(), "render()".to_string());
        first.insert("/index.html".to_string(), "<html></html>".to_string());

        let mut second = BTreeMap::new();
        second.insert("/index.html".to_string(), "<html></html>".to_string());
        second.insert("/src/main.jsx".to_string(), "render()".to_string());

        assert_eq!(snapshot_digest(&first), snapshot_digest(&second));
    }

    #[test]
    fn digest_tracks_content_changes() {
        let mut files = BTreeMap::new();
        files.insert("/index.html".to_string(), "<html></html>".to_string());
        let before = snapshot_digest(&files);
        files.insert("/index.html".to_string(), "<html>!</html>".to_string());
        assert_ne!(before, snapshot_digest(&files));
    }

    #[test]
    fn digest_does_not_alias_path_and_content_boundaries() {
        let mut first = BTreeMap::new();
        first.insert("/ab".to_string(), "c".to_string());
        let mut second = BTreeMap::new();
        second.insert("/a".to_string(), "bc".to_string());
        assert_ne!(snapshot_digest(&first), snapshot_digest(&second));
    }

    struct MockSandboxBackend {
        start_calls: AtomicUsize,
        // session id -> alive
        sessions: AsyncMutex<HashMap<String, bool>>,
        last_token: AsyncMutex<Option<String>>,
        next_start: AsyncMutex<Option<StartResponse>>,
    }

    impl MockSandboxBackend {
        fn new() -> Self {
            Self {
                start_calls: AtomicUsize::new(0),
                sessions: AsyncMutex::new(HashMap::new()),
                last_token: AsyncMutex::new(None),
                next_start: AsyncMutex::new(None),
            }
        }

        fn start_calls(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        async fn script_start(&self, response: StartResponse) {
            *self.next_start.lock().await = Some(response);
        }

        async fn kill(&self, session_id: &str) {
            if let Some(alive) = self.sessions.lock().await.get_mut(session_id) {
                *alive = false;
            }
        }

        async fn last_token(&self) -> Option<String> {
            self.last_token.lock().await.clone()
        }
    }

    #[async_trait]
    impl SandboxBackend for MockSandboxBackend {
        async fn start_session(
            &self,
            _base_url: &Url,
            auth_token: Option<&str>,
            _request: &StartRequest<'_>,
        ) -> Result<StartResponse, SandboxError> {
            let call = self.start_calls.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut slot = self.last_token.lock().await;
                *slot = auth_token.map(|token| token.to_string());
            }
            if let Some(scripted) = self.next_start.lock().await.take() {
                return Ok(scripted);
            }
            let session_id = format!("sbx-{call}");
            self.sessions
                .lock()
                .await
                .insert(session_id.clone(), true);
            Ok(StartResponse {
                session_id: session_id.clone(),
                status: RemotePhase::Running,
                preview_url: Some(format!("https://preview.mock/{session_id}")),
                created_at: 1_700_000_000_000,
            })
        }

        async fn patch_file(
            &self,
            _base_url: &Url,
            _auth_token: Option<&str>,
            session_id: &str,
            _patch: &PatchRequest,
        ) -> Result<(), SandboxError> {
            if self.sessions.lock().await.contains_key(session_id) {
                Ok(())
            } else {
                Err(SandboxError::SessionNotFound(session_id.to_string()))
            }
        }

        async fn fetch_logs(
            &self,
            _base_url: &Url,
            _auth_token: Option<&str>,
            session_id: &str,
        ) -> Result<LogChunk, SandboxError> {
            if self.sessions.lock().await.contains_key(session_id) {
                Ok(LogChunk {
                    lines: vec!["ready".to_string()],
                    has_more: false,
                })
            } else {
                Err(SandboxError::SessionNotFound(session_id.to_string()))
            }
        }

        async fn ping_session(
            &self,
            _base_url: &Url,
            _auth_token: Option<&str>,
            session_id: &str,
        ) -> Result<PingResponse, SandboxError> {
            match self.sessions.lock().await.get(session_id) {
                Some(true) => Ok(PingResponse {
                    status: "alive".to_string(),
                }),
                Some(false) => Ok(PingResponse {
                    status: "dead".to_string(),
                }),
                None => Err(SandboxError::SessionNotFound(session_id.to_string())),
            }
        }

        async fn stop_session(
            &self,
            _base_url: &Url,
            _auth_token: Option<&str>,
            session_id: &str,
        ) -> Result<(), SandboxError> {
            match self.sessions.lock().await.remove(session_id) {
                Some(_) => Ok(()),
                None => Err(SandboxError::SessionNotFound(session_id.to_string())),
            }
        }
    }

    fn mock_client(backend: Arc<MockSandboxBackend>) -> SandboxClient {
        let config = SandboxConfig::new("http://mock.sandbox").unwrap();
        SandboxClient::with_backend(config, backend)
    }

    fn sample_files() -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        files.insert("/index.html".to_string(), "<html></html>".to_string());
        files.insert("/src/main.jsx".to_string(), "render()".to_string());
        files
    }

    #[tokio::test]
    async fn start_returns_validated_session() {
        let backend = Arc::new(MockSandboxBackend::new());
        let client = mock_client(backend.clone());

        let session = client.start("proj-1", &sample_files()).await.unwrap();
        assert_eq!(session.id, "sbx-1");
        assert_eq!(session.phase, RemotePhase::Running);
        assert_eq!(
            session.preview_url.as_ref().map(Url::as_str),
            Some("https://preview.mock/sbx-1")
        );
        assert_eq!(session.created_at_ms, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn start_reuses_live_session_for_identical_snapshot() {
        let backend = Arc::new(MockSandboxBackend::new());
        let client = mock_client(backend.clone());
        let files = sample_files();

        let first = client.start("proj-1", &files).await.unwrap();
        let second = client.start("proj-1", &files).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(backend.start_calls(), 1);
    }

    #[tokio::test]
    async fn start_reprovisions_when_cached_session_is_dead() {
        let backend = Arc::new(MockSandboxBackend::new());
        let client = mock_client(backend.clone());
        let files = sample_files();

        let first = client.start("proj-1", &files).await.unwrap();
        backend.kill(&first.id).await;
        let second = client.start("proj-1", &files).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(backend.start_calls(), 2);
    }

    #[tokio::test]
    async fn start_reprovisions_when_snapshot_changes() {
        let backend = Arc::new(MockSandboxBackend::new());
        let client = mock_client(backend.clone());

        let mut files = sample_files();
        client.start("proj-1", &files).await.unwrap();
        files.insert("/src/main.jsx".to_string(), "render(v2)".to_string());
        client.start("proj-1", &files).await.unwrap();

        assert_eq!(backend.start_calls(), 2);
    }

    #[tokio::test]
    async fn stop_evicts_cached_start() {
        let backend = Arc::new(MockSandboxBackend::new());
        let client = mock_client(backend.clone());
        let files = sample_files();

        let first = client.start("proj-1", &files).await.unwrap();
        client.stop(&first.id).await.unwrap();
        let second = client.start("proj-1", &files).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(backend.start_calls(), 2);
    }

    #[tokio::test]
    async fn ping_fails_closed_on_backend_error() {
        let backend = Arc::new(MockSandboxBackend::new());
        let client = mock_client(backend);

        assert_eq!(client.ping("no-such-session").await, Liveness::Dead);
    }

    #[tokio::test]
    async fn ping_maps_status_strings() {
        let backend = Arc::new(MockSandboxBackend::new());
        let client = mock_client(backend.clone());

        let session = client.start("proj-1", &sample_files()).await.unwrap();
        assert_eq!(client.ping(&session.id).await, Liveness::Alive);

        backend.kill(&session.id).await;
        assert_eq!(client.ping(&session.id).await, Liveness::Dead);
    }

    #[tokio::test]
    async fn patch_reports_missing_session() {
        let backend = Arc::new(MockSandboxBackend::new());
        let client = mock_client(backend);

        let err = client
            .patch("ghost", &PatchRequest::new("/index.html", "<html></html>"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn start_rejects_blank_session_id() {
        let backend = Arc::new(MockSandboxBackend::new());
        backend
            .script_start(StartResponse {
                session_id: "   ".to_string(),
                status: RemotePhase::Running,
                preview_url: None,
                created_at: 0,
            })
            .await;
        let client = mock_client(backend);

        let err = client.start("proj-1", &sample_files()).await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn start_rejects_unparseable_preview_url() {
        let backend = Arc::new(MockSandboxBackend::new());
        backend
            .script_start(StartResponse {
                session_id: "sbx-raw".to_string(),
                status: RemotePhase::Running,
                preview_url: Some("not a url".to_string()),
                created_at: 0,
            })
            .await;
        let client = mock_client(backend);

        let err = client.start("proj-1", &sample_files()).await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn start_passes_bearer_token_to_backend() {
        let backend = Arc::new(MockSandboxBackend::new());
        let config = SandboxConfig::new("http://mock.sandbox")
            .unwrap()
            .with_bearer_token(Some("token-123".into()));
        let client = SandboxClient::with_backend(config, backend.clone());

        client.start("proj-1", &sample_files()).await.unwrap();

        assert_eq!(backend.last_token().await.as_deref(), Some("token-123"));
    }
}
