pub mod bundler;
pub mod engine;
pub mod runtime;
pub mod static_html;
pub mod tier;

pub use bundler::{BundleError, BundlerPreview, InlineAssetBundler, LocalBundler};
pub use engine::{PreviewEngine, PreviewFrame};
pub use runtime::RuntimePreview;
pub use static_html::StaticPreview;
pub use tier::{PreviewStrategy, RenderTarget, TierError, TierKind};
