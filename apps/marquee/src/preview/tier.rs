use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::workspace::FileSnapshot;

/// Preview tiers, best first. Declaration order is the arbitration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Runtime,
    Bundler,
    Static,
}

impl TierKind {
    pub fn label(&self) -> &'static str {
        match self {
            TierKind::Runtime => "runtime",
            TierKind::Bundler => "bundler",
            TierKind::Static => "static",
        }
    }
}

/// What the UI should render: an iframe URL for the live tier, or a full
/// HTML document for the local tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum RenderTarget {
    Url(Url),
    Document(String),
}

#[derive(Debug, Error)]
pub enum TierError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Failed(String),
}

/// One way of producing a preview. Implementations must be cancel-safe: the
/// engine drops an attempt that outlives its tier deadline.
#[async_trait]
pub trait PreviewStrategy: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn attempt(&self, snapshot: &FileSnapshot) -> Result<RenderTarget, TierError>;
}
