use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use super::tier::{PreviewStrategy, RenderTarget, TierError, TierKind};
use crate::controller::{PreviewStatus, SessionController};
use crate::workspace::FileSnapshot;

/// Best tier: a full remote session. Succeeds once the controller reaches
/// `running` with a preview URL inside the start timeout; on timeout the
/// in-flight start is abandoned so the controller is not left stuck at
/// `starting`.
pub struct RuntimePreview {
    controller: SessionController,
    start_timeout: Duration,
}

impl RuntimePreview {
    pub fn new(controller: SessionController, start_timeout: Duration) -> Self {
        Self {
            controller,
            start_timeout,
        }
    }

    async fn wait_for_url(&self, snapshot: &FileSnapshot) -> Result<RenderTarget, TierError> {
        let handle = self
            .controller
            .start(snapshot)
            .await
            .map_err(|err| TierError::Failed(err.to_string()))?;
        if let Some(url) = handle.preview_url {
            return Ok(RenderTarget::Url(url));
        }

        // Session started without a URL yet; follow the watch until one
        // shows up or the session dies.
        let mut updates = self.controller.subscribe();
        loop {
            {
                let current = updates.borrow_and_update();
                match current.status {
                    PreviewStatus::Running | PreviewStatus::Syncing => {
                        if let Some(url) = current.preview_url() {
                            return Ok(RenderTarget::Url(url.clone()));
                        }
                    }
                    PreviewStatus::Error => {
                        let message = current
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "session failed".to_string());
                        return Err(TierError::Failed(message));
                    }
                    _ => {}
                }
            }
            if updates.changed().await.is_err() {
                return Err(TierError::Failed("session controller dropped".to_string()));
            }
        }
    }
}

#[async_trait]
impl PreviewStrategy for RuntimePreview {
    fn kind(&self) -> TierKind {
        TierKind::Runtime
    }

    async fn attempt(&self, snapshot: &FileSnapshot) -> Result<RenderTarget, TierError> {
        match timeout(self.start_timeout, self.wait_for_url(snapshot)).await {
            Ok(result) => result,
            Err(_) => {
                self.controller.abandon_start(&format!(
                    "start timed out after {:?}",
                    self.start_timeout
                ));
                Err(TierError::Timeout(self.start_timeout))
            }
        }
    }
}
