//! Tier arbitration: try the best preview first, degrade silently on
//! failure, and probe for promotion after a cooldown. All outcomes land on
//! one watch channel of [`PreviewFrame`]s.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use sandbox_sdk::{SandboxClient, snapshot_digest};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::bundler::{BundlerPreview, InlineAssetBundler, LocalBundler};
use super::runtime::RuntimePreview;
use super::static_html::StaticPreview;
use super::tier::{PreviewStrategy, RenderTarget, TierError, TierKind};
use crate::config::{EngineOptions, Timings};
use crate::controller::{PreviewStatus, SessionController};
use crate::workspace::FileSnapshot;

/// What the UI should currently render. `error` is set only when every tier
/// failed; while a lower tier serves, the frame carries its output and no
/// error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<RenderTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub revision: u64,
}

impl PreviewFrame {
    fn empty() -> Self {
        Self {
            tier: None,
            target: None,
            error: None,
            revision: 0,
        }
    }
}

#[derive(Clone)]
pub struct PreviewEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    strategies: Vec<Arc<dyn PreviewStrategy>>,
    timings: Timings,
    controller: Option<SessionController>,
    frame_tx: watch::Sender<PreviewFrame>,
    state: Mutex<EngineState>,
}

struct EngineState {
    snapshot: FileSnapshot,
    last_digest: Option<String>,
    /// Index into `strategies` of the tier currently serving.
    active: Option<usize>,
    /// Bumped by `open` and `shutdown`; stale tasks compare and bail.
    generation: u64,
    revision: u64,
    cascade_task: Option<JoinHandle<()>>,
    rerender_task: Option<JoinHandle<()>>,
    repromote_task: Option<JoinHandle<()>>,
    monitor_task: Option<JoinHandle<()>>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            snapshot: FileSnapshot::default(),
            last_digest: None,
            active: None,
            generation: 0,
            revision: 0,
            cascade_task: None,
            rerender_task: None,
            repromote_task: None,
            monitor_task: None,
        }
    }
}

impl PreviewEngine {
    /// Full production arbitration: remote runtime (unless disabled), then
    /// the in-process bundler, then static rendering.
    pub fn new(
        client: SandboxClient,
        project_id: impl Into<String>,
        options: EngineOptions,
    ) -> Self {
        Self::with_bundler(client, project_id, options, Arc::new(InlineAssetBundler))
    }

    pub fn with_bundler(
        client: SandboxClient,
        project_id: impl Into<String>,
        options: EngineOptions,
        bundler: Arc<dyn LocalBundler>,
    ) -> Self {
        let mut strategies: Vec<Arc<dyn PreviewStrategy>> = Vec::new();
        let controller = if options.runtime_enabled {
            let controller = SessionController::new(
                client,
                project_id,
                options.timings.clone(),
                options.log_capacity,
            );
            strategies.push(Arc::new(RuntimePreview::new(
                controller.clone(),
                options.timings.runtime_start_timeout,
            )));
            Some(controller)
        } else {
            None
        };
        strategies.push(Arc::new(BundlerPreview::new(bundler)));
        strategies.push(Arc::new(StaticPreview));
        Self::assemble(strategies, controller, options.timings)
    }

    /// Arbitrate over caller-supplied strategies. This is the extension
    /// seam: a new tier slots into the priority list without touching the
    /// arbitration logic.
    pub fn with_strategies(strategies: Vec<Arc<dyn PreviewStrategy>>, timings: Timings) -> Self {
        Self::assemble(strategies, None, timings)
    }

    fn assemble(
        strategies: Vec<Arc<dyn PreviewStrategy>>,
        controller: Option<SessionController>,
        timings: Timings,
    ) -> Self {
        let (frame_tx, _) = watch::channel(PreviewFrame::empty());
        let engine = Self {
            shared: Arc::new(EngineShared {
                strategies,
                timings,
                controller,
                frame_tx,
                state: Mutex::new(EngineState::new()),
            }),
        };
        engine.spawn_monitor();
        engine
    }

    pub fn subscribe(&self) -> watch::Receiver<PreviewFrame> {
        self.shared.frame_tx.subscribe()
    }

    pub fn frame(&self) -> PreviewFrame {
        self.shared.frame_tx.borrow().clone()
    }

    pub fn controller(&self) -> Option<&SessionController> {
        self.shared.controller.as_ref()
    }

    /// Begin previewing from a fresh snapshot. Non-blocking: results arrive
    /// on the frame watch. Calling it again restarts arbitration from the
    /// top with the new contents.
    pub fn open(&self, snapshot: FileSnapshot) {
        let generation = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.last_digest = Some(snapshot_digest(snapshot.files()));
            state.snapshot = snapshot;
            state.active = None;
            for task in [
                state.cascade_task.take(),
                state.rerender_task.take(),
                state.repromote_task.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }
            state.generation
        };
        restart_cascade(&self.shared, generation, 0);
    }

    /// Replace the current snapshot wholesale (e.g. the project was re-read
    /// from disk). Unchanged content is a no-op; otherwise changed files are
    /// forwarded to the live session and the active tier re-renders.
    pub fn refresh(&self, snapshot: FileSnapshot) {
        let changed = {
            let mut state = self.shared.state.lock();
            let digest = snapshot_digest(snapshot.files());
            if state.last_digest.as_deref() == Some(digest.as_str()) {
                return;
            }
            let changed = diff_files(&state.snapshot, &snapshot);
            state.snapshot = snapshot;
            state.last_digest = Some(digest);
            changed
        };
        if let Some(controller) = &self.shared.controller {
            for (path, content) in &changed {
                controller.sync_file(path, content);
            }
        }
        self.schedule_rerender();
    }

    /// Apply a single edit: forwarded to the session controller (which
    /// debounces the wire traffic) and re-rendered locally when a document
    /// tier is active.
    pub fn sync_file(&self, path: &str, content: &str) {
        {
            let mut state = self.shared.state.lock();
            if state.snapshot.upsert(path, content).is_none() {
                tracing::warn!(
                    target = "marquee::preview",
                    path = %path,
                    "ignoring edit with malformed path"
                );
                return;
            }
            state.last_digest = Some(snapshot_digest(state.snapshot.files()));
        }
        if let Some(controller) = &self.shared.controller {
            controller.sync_file(path, content);
        }
        self.schedule_rerender();
    }

    /// Stop previewing: cancel every engine task, stop the remote session,
    /// clear the frame. Terminal for this engine instance.
    pub fn shutdown(&self) {
        let tasks = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.active = None;
            let tasks = [
                state.cascade_task.take(),
                state.rerender_task.take(),
                state.repromote_task.take(),
                state.monitor_task.take(),
            ];
            state.revision += 1;
            self.shared.frame_tx.send_replace(PreviewFrame {
                tier: None,
                target: None,
                error: None,
                revision: state.revision,
            });
            tasks
        };
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        if let Some(controller) = &self.shared.controller {
            controller.stop();
        }
    }

    /// Re-render the active document tier after an edit, debounced. With no
    /// active tier (every tier failed earlier) the edit instead retries the
    /// full cascade.
    fn schedule_rerender(&self) {
        let cascade_from_top = {
            let mut state = self.shared.state.lock();
            match state.active {
                None => Some(state.generation),
                Some(active) => {
                    let is_runtime = self.shared.strategies[active].kind() == TierKind::Runtime;
                    if !is_runtime && state.rerender_task.is_none() {
                        let generation = state.generation;
                        let task =
                            tokio::spawn(run_rerender(Arc::clone(&self.shared), generation));
                        state.rerender_task = Some(task);
                    }
                    // The runtime tier re-renders remotely via the session
                    // patch pipeline; nothing to do locally.
                    None
                }
            }
        };
        if let Some(generation) = cascade_from_top {
            restart_cascade(&self.shared, generation, 0);
        }
    }

    /// Watch the session controller and degrade when the runtime tier dies
    /// underneath us (dead keepalive, failed resync).
    fn spawn_monitor(&self) {
        let Some(controller) = self.shared.controller.clone() else {
            return;
        };
        let weak = Arc::downgrade(&self.shared);
        let mut updates = controller.subscribe();
        let task = tokio::spawn(async move {
            loop {
                if updates.changed().await.is_err() {
                    return;
                }
                let status = updates.borrow_and_update().status;
                if status != PreviewStatus::Error {
                    continue;
                }
                let Some(shared) = weak.upgrade() else { return };
                let generation = {
                    let state = shared.state.lock();
                    if state.active != Some(0) {
                        continue;
                    }
                    state.generation
                };
                tracing::warn!(
                    target = "marquee::preview",
                    "runtime session lost, degrading to local tiers"
                );
                restart_cascade(&shared, generation, 1);
            }
        });
        self.shared.state.lock().monitor_task = Some(task);
    }
}

/// Abort any cascade in flight and run a new one from `from`.
fn restart_cascade(shared: &Arc<EngineShared>, generation: u64, from: usize) {
    let mut state = shared.state.lock();
    if state.generation != generation {
        return;
    }
    if let Some(task) = state.cascade_task.take() {
        task.abort();
    }
    let task = tokio::spawn(run_cascade(Arc::clone(shared), generation, from));
    state.cascade_task = Some(task);
}

/// Try strategies in priority order starting at `from`; the first success
/// becomes the active tier. Individual failures are logged, not surfaced;
/// only total exhaustion publishes an error frame.
async fn run_cascade(shared: Arc<EngineShared>, generation: u64, from: usize) {
    let snapshot = {
        let state = shared.state.lock();
        if state.generation != generation {
            return;
        }
        state.snapshot.clone()
    };
    let mut errors: Vec<String> = Vec::new();
    for idx in from..shared.strategies.len() {
        let kind = shared.strategies[idx].kind();
        tracing::debug!(
            target = "marquee::preview",
            tier = kind.label(),
            "attempting preview tier"
        );
        match attempt_with_deadline(&shared, idx, &snapshot).await {
            Ok(target) => {
                let mut state = shared.state.lock();
                if state.generation != generation {
                    return;
                }
                state.active = Some(idx);
                shared.publish_target(&mut state, kind, target);
                tracing::info!(
                    target = "marquee::preview",
                    tier = kind.label(),
                    "preview tier active"
                );
                if idx > 0 && state.repromote_task.is_none() {
                    let task = tokio::spawn(run_repromote(
                        Arc::downgrade(&shared),
                        generation,
                    ));
                    state.repromote_task = Some(task);
                }
                return;
            }
            Err(err) => {
                tracing::warn!(
                    target = "marquee::preview",
                    tier = kind.label(),
                    error = %err,
                    "preview tier failed"
                );
                errors.push(format!("{}: {err}", kind.label()));
            }
        }
    }

    let mut state = shared.state.lock();
    if state.generation != generation {
        return;
    }
    state.active = None;
    let summary = errors.join("; ");
    tracing::error!(
        target = "marquee::preview",
        error = %summary,
        "all preview tiers failed"
    );
    shared.publish_error(&mut state, summary);
}

/// After each cooldown, probe the tiers above the active one (best first)
/// and promote silently on the first success. Runs until the engine is back
/// on the best tier or the generation moves on.
async fn run_repromote(weak: Weak<EngineShared>, generation: u64) {
    loop {
        let cooldown = {
            let Some(shared) = weak.upgrade() else { return };
            shared.timings.repromote_cooldown
        };
        sleep(cooldown).await;
        let Some(shared) = weak.upgrade() else { return };
        let (snapshot, active) = {
            let state = shared.state.lock();
            if state.generation != generation {
                return;
            }
            match state.active {
                Some(active) if active > 0 => (state.snapshot.clone(), active),
                _ => {
                    drop(state);
                    clear_repromote(&shared, generation);
                    return;
                }
            }
        };
        for idx in 0..active {
            let kind = shared.strategies[idx].kind();
            tracing::debug!(
                target = "marquee::preview",
                tier = kind.label(),
                "probing better tier after cooldown"
            );
            match attempt_with_deadline(&shared, idx, &snapshot).await {
                Ok(target) => {
                    let mut state = shared.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    if state.active.is_some_and(|current| idx < current) {
                        state.active = Some(idx);
                        shared.publish_target(&mut state, kind, target);
                        tracing::info!(
                            target = "marquee::preview",
                            tier = kind.label(),
                            "promoted preview back to better tier"
                        );
                    }
                    break;
                }
                Err(err) => {
                    tracing::debug!(
                        target = "marquee::preview",
                        tier = kind.label(),
                        error = %err,
                        "tier probe failed during cooldown"
                    );
                }
            }
        }
    }
}

fn clear_repromote(shared: &EngineShared, generation: u64) {
    let mut state = shared.state.lock();
    if state.generation == generation {
        state.repromote_task = None;
    }
}

/// Debounced re-render of the active tier from the latest snapshot. A tier
/// that could render before but cannot anymore degrades the preview to the
/// next tier down.
async fn run_rerender(shared: Arc<EngineShared>, generation: u64) {
    sleep(shared.timings.debounce).await;
    let (snapshot, active) = {
        let mut state = shared.state.lock();
        if state.generation != generation {
            return;
        }
        state.rerender_task = None;
        match state.active {
            Some(active) => (state.snapshot.clone(), active),
            None => return,
        }
    };
    let kind = shared.strategies[active].kind();
    match attempt_with_deadline(&shared, active, &snapshot).await {
        Ok(target) => {
            let mut state = shared.state.lock();
            if state.generation != generation || state.active != Some(active) {
                return;
            }
            shared.publish_target(&mut state, kind, target);
        }
        Err(err) => {
            tracing::warn!(
                target = "marquee::preview",
                tier = kind.label(),
                error = %err,
                "active tier failed to re-render, degrading"
            );
            restart_cascade(&shared, generation, active + 1);
        }
    }
}

async fn attempt_with_deadline(
    shared: &EngineShared,
    idx: usize,
    snapshot: &FileSnapshot,
) -> Result<RenderTarget, TierError> {
    let strategy = &shared.strategies[idx];
    match tier_deadline(&shared.timings, strategy.kind()) {
        Some(deadline) => match timeout(deadline, strategy.attempt(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(TierError::Timeout(deadline)),
        },
        None => strategy.attempt(snapshot).await,
    }
}

fn tier_deadline(timings: &Timings, kind: TierKind) -> Option<Duration> {
    match kind {
        TierKind::Runtime => Some(timings.runtime_start_timeout),
        TierKind::Bundler => Some(timings.bundler_timeout),
        TierKind::Static => None,
    }
}

impl EngineShared {
    fn publish_target(&self, state: &mut EngineState, tier: TierKind, target: RenderTarget) {
        state.revision += 1;
        self.frame_tx.send_replace(PreviewFrame {
            tier: Some(tier),
            target: Some(target),
            error: None,
            revision: state.revision,
        });
    }

    fn publish_error(&self, state: &mut EngineState, message: String) {
        state.revision += 1;
        self.frame_tx.send_replace(PreviewFrame {
            tier: None,
            target: None,
            error: Some(message),
            revision: state.revision,
        });
    }
}

fn diff_files(old: &FileSnapshot, new: &FileSnapshot) -> Vec<(String, String)> {
    new.files()
        .iter()
        .filter(|(path, content)| old.get(path) != Some(content.as_str()))
        .map(|(path, content)| (path.clone(), content.clone()))
        .collect()
}
