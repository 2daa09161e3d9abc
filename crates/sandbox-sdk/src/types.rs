use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// Body for `POST /session`. Borrows the caller's file map so starting a
/// session never clones the project contents.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest<'a> {
    pub project_id: &'a str,
    pub files: &'a BTreeMap<String, String>,
}

/// Raw body returned by `POST /session`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session_id: String,
    #[serde(default)]
    pub status: RemotePhase,
    #[serde(default)]
    pub preview_url: Option<String>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub created_at: u64,
}

/// Lifecycle phase reported by the service. Unrecognised values decode to
/// [`RemotePhase::Unknown`] so new server phases never break older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemotePhase {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    #[serde(other)]
    Unknown,
}

impl Default for RemotePhase {
    fn default() -> Self {
        RemotePhase::Unknown
    }
}

impl RemotePhase {
    pub fn label(&self) -> &'static str {
        match self {
            RemotePhase::Starting => "starting",
            RemotePhase::Running => "running",
            RemotePhase::Stopping => "stopping",
            RemotePhase::Stopped => "stopped",
            RemotePhase::Error => "error",
            RemotePhase::Unknown => "unknown",
        }
    }
}

/// Validated view of a started session, with the preview URL parsed.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub id: String,
    pub phase: RemotePhase,
    pub preview_url: Option<Url>,
    pub created_at_ms: u64,
}

/// Body for `POST /session/{id}/file`. One file per request; the service
/// applies patches in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub path: String,
    pub content: String,
}

impl PatchRequest {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Body returned by `GET /session/{id}/logs`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogChunk {
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// Raw body returned by `POST /session/{id}/ping`.
#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub status: String,
}

/// Client-side liveness verdict. [`crate::SandboxClient::ping`] fails closed,
/// so an unreachable service reads as [`Liveness::Dead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }
}
