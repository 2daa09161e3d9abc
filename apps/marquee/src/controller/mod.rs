//! Stateful driver for one remote preview session: provisioning, debounced
//! file sync, keepalive, and log polling. All mutation funnels through a
//! single lock; observers follow along on a watch channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sandbox_sdk::{Liveness, PatchRequest, SandboxClient, SandboxError};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use url::Url;

use crate::config::Timings;
use crate::logs::LogBuffer;
use crate::workspace::FileSnapshot;

/// Where the controller sits in the session lifecycle. `Error` keeps the
/// failure message in the snapshot; calling `start` again from `Error` is
/// the manual retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    Idle,
    Starting,
    Running,
    Syncing,
    Error,
}

impl PreviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewStatus::Idle => "idle",
            PreviewStatus::Starting => "starting",
            PreviewStatus::Running => "running",
            PreviewStatus::Syncing => "syncing",
            PreviewStatus::Error => "error",
        }
    }

    pub fn has_live_session(&self) -> bool {
        matches!(self, PreviewStatus::Running | PreviewStatus::Syncing)
    }
}

/// UI-facing mirror of the active remote session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<Url>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
}

/// Point-in-time controller state handed to subscribers. `epoch` increments
/// whenever the session slot changes hands, so late async results can tell
/// they refer to a session that no longer exists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub status: PreviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub epoch: u64,
}

impl ControllerSnapshot {
    fn initial() -> Self {
        Self {
            status: PreviewStatus::Idle,
            session: None,
            last_error: None,
            epoch: 0,
        }
    }

    /// The URL an embedding UI should load, present only while the session
    /// is actually serving.
    pub fn preview_url(&self) -> Option<&Url> {
        if self.status.has_live_session() {
            self.session
                .as_ref()
                .and_then(|session| session.preview_url.as_ref())
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("preview session start failed: {0}")]
    StartFailed(String),
    #[error("file synchronization failed: {0}")]
    SyncFailed(String),
    #[error("no active preview session")]
    NoSession,
}

#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

struct Shared {
    client: SandboxClient,
    project_id: String,
    timings: Timings,
    state: Mutex<State>,
    watch_tx: watch::Sender<ControllerSnapshot>,
    logs: Mutex<LogBuffer>,
    // Serializes start attempts; concurrent callers piggyback on the winner.
    start_gate: tokio::sync::Mutex<()>,
}

struct State {
    status: PreviewStatus,
    session: Option<SessionHandle>,
    last_error: Option<String>,
    epoch: u64,
    /// Full current file set, kept in lockstep with edits; resync material.
    contents: FileSnapshot,
    /// Edits awaiting the next debounce flush, newest content per path.
    pending: HashMap<String, String>,
    flush_task: Option<JoinHandle<()>>,
    keepalive_task: Option<JoinHandle<()>>,
    log_task: Option<JoinHandle<()>>,
}

impl State {
    fn new() -> Self {
        Self {
            status: PreviewStatus::Idle,
            session: None,
            last_error: None,
            epoch: 0,
            contents: FileSnapshot::default(),
            pending: HashMap::new(),
            flush_task: None,
            keepalive_task: None,
            log_task: None,
        }
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            status: self.status,
            session: self.session.clone(),
            last_error: self.last_error.clone(),
            epoch: self.epoch,
        }
    }
}

impl SessionController {
    pub fn new(
        client: SandboxClient,
        project_id: impl Into<String>,
        timings: Timings,
        log_capacity: usize,
    ) -> Self {
        let (watch_tx, _) = watch::channel(ControllerSnapshot::initial());
        Self {
            shared: Arc::new(Shared {
                client,
                project_id: project_id.into(),
                timings,
                state: Mutex::new(State::new()),
                watch_tx,
                logs: Mutex::new(LogBuffer::new(log_capacity)),
                start_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.shared.project_id
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.shared.watch_tx.subscribe()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.shared.watch_tx.borrow().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.shared.logs.lock().lines()
    }

    pub fn logs_since(&self, from: u64) -> (Vec<String>, u64) {
        self.shared.logs.lock().lines_since(from)
    }

    /// Provision (or re-provision) the remote session from a full snapshot.
    ///
    /// Re-entrant: while a session is live this returns the existing handle
    /// without touching the service, and concurrent callers serialize on an
    /// internal gate so at most one provisioning attempt is in flight. One
    /// transient failure is retried after `start_retry_backoff`; a second
    /// failure parks the controller in `Error` with the message preserved.
    pub async fn start(&self, snapshot: &FileSnapshot) -> Result<SessionHandle, ControllerError> {
        let shared = &self.shared;
        let _gate = shared.start_gate.lock().await;

        let epoch_at_entry = {
            let mut state = shared.state.lock();
            if state.status.has_live_session() {
                if let Some(session) = state.session.clone() {
                    return Ok(session);
                }
            }
            state.status = PreviewStatus::Starting;
            state.last_error = None;
            state.contents = snapshot.clone();
            state.pending.clear();
            shared.publish(&state);
            state.epoch
        };

        let mut last_err: Option<SandboxError> = None;
        let mut remote = None;
        for attempt in 0..2u32 {
            if attempt > 0 {
                sleep(shared.timings.start_retry_backoff).await;
                if shared.state.lock().epoch != epoch_at_entry {
                    return Err(ControllerError::StartFailed(
                        "session stopped during start".into(),
                    ));
                }
            }
            match shared.client.start(&shared.project_id, snapshot.files()).await {
                Ok(session) => {
                    remote = Some(session);
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        target = "marquee::controller",
                        attempt,
                        error = %err,
                        "session start attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        let Some(remote) = remote else {
            let message = last_err
                .map(|err| err.to_string())
                .unwrap_or_else(|| "session start failed".to_string());
            let mut state = shared.state.lock();
            if state.epoch == epoch_at_entry {
                state.status = PreviewStatus::Error;
                state.last_error = Some(message.clone());
                shared.publish(&state);
            }
            return Err(ControllerError::StartFailed(message));
        };

        let now = OffsetDateTime::now_utc();
        let handle = SessionHandle {
            id: remote.id.clone(),
            preview_url: remote.preview_url.clone(),
            created_at: created_at_from_ms(remote.created_at_ms).unwrap_or(now),
            last_activity_at: now,
        };

        let session_epoch = {
            let mut state = shared.state.lock();
            if state.epoch != epoch_at_entry {
                // stop() won the race; the fresh remote session is an orphan.
                drop(state);
                let client = shared.client.clone();
                let orphan = remote.id.clone();
                tokio::spawn(async move {
                    if let Err(err) = client.stop(&orphan).await {
                        tracing::debug!(
                            target = "marquee::controller",
                            session_id = %orphan,
                            error = %err,
                            "failed to stop orphaned session"
                        );
                    }
                });
                return Err(ControllerError::StartFailed(
                    "session stopped during start".into(),
                ));
            }
            state.epoch += 1;
            state.session = Some(handle.clone());
            state.status = PreviewStatus::Running;
            state.last_error = None;
            shared.publish(&state);
            state.epoch
        };
        self.shared.logs.lock().clear();

        tracing::info!(
            target = "marquee::controller",
            session_id = %handle.id,
            preview_url = handle
                .preview_url
                .as_ref()
                .map(Url::as_str)
                .unwrap_or_default(),
            "preview session running"
        );

        self.spawn_keepalive(session_epoch);
        self.spawn_log_poller(session_epoch);

        // Edits that arrived while we were provisioning are still pending;
        // get them onto the fresh session.
        {
            let mut state = shared.state.lock();
            if state.epoch == session_epoch
                && !state.pending.is_empty()
                && state.flush_task.is_none()
            {
                state.status = PreviewStatus::Syncing;
                shared.publish(&state);
                let task = self.spawn_flush(session_epoch);
                state.flush_task = Some(task);
            }
        }

        Ok(handle)
    }

    /// Queue a single-file edit for the debounced patch pipeline. Multiple
    /// edits to one path inside the debounce window collapse to the latest
    /// content. Without a live session the edit only updates the held
    /// contents; it ships with the next start or resync.
    pub fn sync_file(&self, path: &str, content: &str) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let Some(normalized) = state.contents.upsert(path, content) else {
            tracing::warn!(
                target = "marquee::controller",
                path = %path,
                "ignoring edit with malformed path"
            );
            return;
        };
        state.pending.insert(normalized, content.to_string());
        if state.session.is_none() {
            return;
        }
        if state.status == PreviewStatus::Running {
            state.status = PreviewStatus::Syncing;
            shared.publish(&state);
        }
        if state.flush_task.is_none() {
            let epoch = state.epoch;
            let task = self.spawn_flush(epoch);
            state.flush_task = Some(task);
        }
    }

    /// Explicitly re-upload the entire held file set to the live session.
    pub async fn sync_all(&self) -> Result<(), ControllerError> {
        let epoch = {
            let mut state = self.shared.state.lock();
            if state.session.is_none() {
                return Err(ControllerError::NoSession);
            }
            if state.status == PreviewStatus::Running {
                state.status = PreviewStatus::Syncing;
                self.shared.publish(&state);
            }
            state.epoch
        };
        match self.shared.resync(epoch).await {
            Ok(()) => {
                let mut state = self.shared.state.lock();
                if state.epoch == epoch
                    && state.status == PreviewStatus::Syncing
                    && state.pending.is_empty()
                {
                    state.status = PreviewStatus::Running;
                    self.shared.publish(&state);
                }
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.shared
                    .lose_session(epoch, &format!("resync failed: {message}"));
                Err(ControllerError::SyncFailed(message))
            }
        }
    }

    /// Tear down the session: cancel timers and background tasks, clear the
    /// state, then fire a best-effort remote stop. Task cancellation happens
    /// synchronously; the remote call runs in the background and a failure
    /// is only logged.
    pub fn stop(&self) {
        let shared = &self.shared;
        let (old_session, handles) = {
            let mut state = shared.state.lock();
            let was_active = state.session.is_some()
                || state.status != PreviewStatus::Idle
                || state.last_error.is_some();
            if !was_active {
                return;
            }
            state.epoch += 1;
            let old = state.session.take();
            state.status = PreviewStatus::Idle;
            state.last_error = None;
            state.pending.clear();
            let handles = (
                state.flush_task.take(),
                state.keepalive_task.take(),
                state.log_task.take(),
            );
            shared.publish(&state);
            (old, handles)
        };
        let (flush, keepalive, log) = handles;
        for task in [flush, keepalive, log].into_iter().flatten() {
            task.abort();
        }
        if let Some(session) = old_session {
            tracing::info!(
                target = "marquee::controller",
                session_id = %session.id,
                "stopping preview session"
            );
            let client = shared.client.clone();
            tokio::spawn(async move {
                if let Err(err) = client.stop(&session.id).await {
                    tracing::debug!(
                        target = "marquee::controller",
                        session_id = %session.id,
                        error = %err,
                        "best-effort stop failed"
                    );
                }
            });
        }
    }

    /// Give up on an in-flight start: park the controller in `Error` and bump
    /// the epoch so the state is not stuck at `Starting` when the caller
    /// cancels the start future.
    pub(crate) fn abandon_start(&self, reason: &str) {
        let mut state = self.shared.state.lock();
        if state.status != PreviewStatus::Starting {
            return;
        }
        state.epoch += 1;
        state.status = PreviewStatus::Error;
        state.last_error = Some(reason.to_string());
        self.shared.publish(&state);
    }

    fn spawn_keepalive(&self, epoch: u64) {
        let weak = Arc::downgrade(&self.shared);
        let interval = self.shared.timings.keepalive_interval;
        let task = tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(shared) = weak.upgrade() else { break };
                let session_id = {
                    let state = shared.state.lock();
                    if state.epoch != epoch {
                        break;
                    }
                    match &state.session {
                        Some(session) => session.id.clone(),
                        None => break,
                    }
                };
                match shared.client.ping(&session_id).await {
                    Liveness::Alive => {
                        let mut state = shared.state.lock();
                        if state.epoch != epoch {
                            break;
                        }
                        if let Some(session) = state.session.as_mut() {
                            session.last_activity_at = OffsetDateTime::now_utc();
                        }
                        shared.publish(&state);
                    }
                    Liveness::Dead => {
                        tracing::warn!(
                            target = "marquee::controller",
                            session_id = %session_id,
                            "keepalive ping reported session dead"
                        );
                        shared.lose_session(epoch, "preview session lost (keepalive failed)");
                        break;
                    }
                }
            }
        });
        let mut state = self.shared.state.lock();
        if state.epoch == epoch {
            state.keepalive_task = Some(task);
        } else {
            task.abort();
        }
    }

    fn spawn_log_poller(&self, epoch: u64) {
        let weak = Arc::downgrade(&self.shared);
        let interval = self.shared.timings.log_poll_interval;
        let task = tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(shared) = weak.upgrade() else { return };
                let session_id = {
                    let state = shared.state.lock();
                    if state.epoch != epoch {
                        return;
                    }
                    match &state.session {
                        Some(session) => session.id.clone(),
                        None => return,
                    }
                };
                // Drain multi-page backlogs a few pages per tick; the rest
                // waits for the next interval.
                for _ in 0..3 {
                    match shared.client.fetch_logs(&session_id).await {
                        Ok(chunk) => {
                            if shared.state.lock().epoch != epoch {
                                return;
                            }
                            let has_more = chunk.has_more;
                            if !chunk.lines.is_empty() {
                                shared.logs.lock().extend(chunk.lines);
                            }
                            if !has_more {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::debug!(
                                target = "marquee::controller",
                                session_id = %session_id,
                                error = %err,
                                "log fetch failed"
                            );
                            break;
                        }
                    }
                }
            }
        });
        let mut state = self.shared.state.lock();
        if state.epoch == epoch {
            state.log_task = Some(task);
        } else {
            task.abort();
        }
    }

    fn spawn_flush(&self, epoch: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let debounce = self.shared.timings.debounce;
        tokio::spawn(async move {
            loop {
                sleep(debounce).await;
                let Some(shared) = weak.upgrade() else { return };
                let (session_id, batch) = {
                    let mut state = shared.state.lock();
                    if state.epoch != epoch {
                        return;
                    }
                    let session_id = match &state.session {
                        Some(session) => session.id.clone(),
                        None => {
                            state.flush_task = None;
                            return;
                        }
                    };
                    if state.pending.is_empty() {
                        state.flush_task = None;
                        if state.status == PreviewStatus::Syncing {
                            state.status = PreviewStatus::Running;
                            shared.publish(&state);
                        }
                        return;
                    }
                    let batch: Vec<PatchRequest> = state
                        .pending
                        .drain()
                        .map(|(path, content)| PatchRequest { path, content })
                        .collect();
                    (session_id, batch)
                };

                tracing::debug!(
                    target = "marquee::controller",
                    session_id = %session_id,
                    files = batch.len(),
                    "flushing debounced edits"
                );
                let results = futures::future::join_all(
                    batch
                        .iter()
                        .map(|patch| shared.client.patch(&session_id, patch)),
                )
                .await;

                match results.into_iter().find_map(Result::err) {
                    None => {
                        let mut state = shared.state.lock();
                        if state.epoch != epoch {
                            return;
                        }
                        if let Some(session) = state.session.as_mut() {
                            session.last_activity_at = OffsetDateTime::now_utc();
                        }
                        if state.pending.is_empty() {
                            state.flush_task = None;
                            if state.status == PreviewStatus::Syncing {
                                state.status = PreviewStatus::Running;
                            }
                            shared.publish(&state);
                            return;
                        }
                        // More edits arrived while we were sending; loop for
                        // another debounce round.
                        shared.publish(&state);
                    }
                    Some(err) => {
                        tracing::warn!(
                            target = "marquee::controller",
                            session_id = %session_id,
                            error = %err,
                            "patch failed, resyncing full snapshot"
                        );
                        if let Err(resync_err) = shared.resync(epoch).await {
                            shared.lose_session(
                                epoch,
                                &format!("resync failed: {resync_err}"),
                            );
                            return;
                        }
                    }
                }
            }
        })
    }
}

impl Shared {
    fn publish(&self, state: &State) {
        self.watch_tx.send_replace(state.snapshot());
    }

    /// Tear down the current session in response to a fatal signal (dead
    /// keepalive, failed resync). Bumps the epoch so any in-flight patch or
    /// poll result for the old session is discarded on arrival.
    fn lose_session(&self, epoch: u64, reason: &str) {
        let (flush, keepalive, log) = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.epoch += 1;
            state.session = None;
            state.status = PreviewStatus::Error;
            state.last_error = Some(reason.to_string());
            state.pending.clear();
            let handles = (
                state.flush_task.take(),
                state.keepalive_task.take(),
                state.log_task.take(),
            );
            self.publish(&state);
            handles
        };
        for task in [flush, keepalive, log].into_iter().flatten() {
            task.abort();
        }
    }

    /// Re-upload the entire held file set to the session. Pending edits are
    /// already folded into `contents`, so the queue is dropped wholesale.
    async fn resync(&self, epoch: u64) -> Result<(), SandboxError> {
        let (session_id, patches) = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return Ok(());
            }
            let session_id = match &state.session {
                Some(session) => session.id.clone(),
                None => return Ok(()),
            };
            state.pending.clear();
            let patches: Vec<PatchRequest> = state
                .contents
                .files()
                .iter()
                .map(|(path, content)| PatchRequest {
                    path: path.clone(),
                    content: content.clone(),
                })
                .collect();
            (session_id, patches)
        };
        tracing::info!(
            target = "marquee::controller",
            session_id = %session_id,
            files = patches.len(),
            "resyncing full snapshot"
        );
        let results = futures::future::join_all(
            patches
                .iter()
                .map(|patch| self.client.patch(&session_id, patch)),
        )
        .await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }
        let mut state = self.state.lock();
        if state.epoch == epoch {
            if let Some(session) = state.session.as_mut() {
                session.last_activity_at = OffsetDateTime::now_utc();
            }
            self.publish(&state);
        }
        Ok(())
    }
}

fn created_at_from_ms(ms: u64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos((ms as i128) * 1_000_000).ok()
}
