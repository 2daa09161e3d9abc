use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::static_html::{ENTRY_HTML, attr_value, inline_stylesheets, resolve_asset};
use super::tier::{PreviewStrategy, RenderTarget, TierError, TierKind};
use crate::workspace::FileSnapshot;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("missing entry file {0}")]
    MissingEntry(&'static str),
    #[error("{0}")]
    Unsupported(String),
}

/// Turns a snapshot into a single self-contained HTML document.
///
/// The built-in [`InlineAssetBundler`] only understands plain assets: local
/// stylesheets and scripts are inlined verbatim. Module graphs with imports
/// need a real bundler (or the runtime tier), so it refuses them rather than
/// producing a document that throws on load.
#[async_trait]
pub trait LocalBundler: Send + Sync {
    async fn bundle(&self, snapshot: &FileSnapshot) -> Result<String, BundleError>;
}

pub struct InlineAssetBundler;

#[async_trait]
impl LocalBundler for InlineAssetBundler {
    async fn bundle(&self, snapshot: &FileSnapshot) -> Result<String, BundleError> {
        let entry = snapshot
            .get(ENTRY_HTML)
            .ok_or(BundleError::MissingEntry(ENTRY_HTML))?;
        let styled = inline_stylesheets(entry, snapshot);
        inline_scripts(&styled, snapshot)
    }
}

fn inline_scripts(html: &str, snapshot: &FileSnapshot) -> Result<String, BundleError> {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find("<script") {
        let Some(close_rel) = rest[start..].find("</script>") else {
            break;
        };
        let close = start + close_rel + "</script>".len();
        let element = &rest[start..close];
        out.push_str(&rest[..start]);
        let Some(tag_end) = element.find('>') else {
            out.push_str(element);
            rest = &rest[close..];
            continue;
        };
        let open_tag = &element[..=tag_end];
        match attr_value(open_tag, "src").and_then(|src| {
            resolve_asset(snapshot, &src).map(|source| (src, source))
        }) {
            Some((src, source)) => {
                reject_module_imports(&src, source)?;
                out.push_str("<script type=\"module\">\n");
                out.push_str(source);
                out.push_str("\n</script>");
            }
            // External src or already inline: keep the element as written.
            None => out.push_str(element),
        }
        rest = &rest[close..];
    }
    out.push_str(rest);
    Ok(out)
}

/// A script that imports other modules cannot be inlined standalone; bail so
/// arbitration moves on instead of shipping a document that errors on load.
fn reject_module_imports(src: &str, source: &str) -> Result<(), BundleError> {
    let has_imports = source.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("import ")
            || trimmed.starts_with("import{")
            || trimmed.starts_with("import\"")
            || trimmed.starts_with("import'")
            || trimmed.starts_with("export ")
            || trimmed.starts_with("require(")
    });
    if has_imports {
        return Err(BundleError::Unsupported(format!(
            "{src} uses module imports; in-process bundling only handles self-contained scripts"
        )));
    }
    Ok(())
}

/// Middle tier: render locally from the snapshot via a [`LocalBundler`],
/// without any remote session.
pub struct BundlerPreview {
    bundler: Arc<dyn LocalBundler>,
}

impl BundlerPreview {
    pub fn new(bundler: Arc<dyn LocalBundler>) -> Self {
        Self { bundler }
    }
}

#[async_trait]
impl PreviewStrategy for BundlerPreview {
    fn kind(&self) -> TierKind {
        TierKind::Bundler
    }

    async fn attempt(&self, snapshot: &FileSnapshot) -> Result<RenderTarget, TierError> {
        match self.bundler.bundle(snapshot).await {
            Ok(document) => Ok(RenderTarget::Document(document)),
            Err(err) => Err(TierError::Failed(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{ProjectTree, build_snapshot};

    fn snapshot_with(files: &[(&str, &str)]) -> FileSnapshot {
        let mut tree = ProjectTree::new();
        for (path, content) in files {
            tree.upsert_file(*path, *content);
        }
        build_snapshot(&tree)
    }

    async fn bundle(snapshot: &FileSnapshot) -> Result<String, BundleError> {
        InlineAssetBundler.bundle(snapshot).await
    }

    #[tokio::test]
    async fn inlines_self_contained_script_and_styles() {
        let snapshot = snapshot_with(&[
            (
                "/index.html",
                concat!(
                    r#"<html><head><link rel="stylesheet" href="/app.css"></head>"#,
                    r#"<body><script type="module" src="/app.js"></script></body></html>"#,
                ),
            ),
            ("/app.css", "h1 { color: blue; }"),
            ("/app.js", "document.title = 'bundled';"),
        ]);
        let document = bundle(&snapshot).await.unwrap();
        assert!(document.contains("h1 { color: blue; }"));
        assert!(document.contains("document.title = 'bundled';"));
        assert!(!document.contains(r#"src="/app.js""#));
    }

    #[tokio::test]
    async fn refuses_scripts_with_module_imports() {
        let snapshot = snapshot_with(&[(
            "/app.js",
            "import { createRoot } from \"react-dom/client\";\nrender();",
        )]);
        // The scaffold entry references /src/main.jsx, which also imports.
        let err = bundle(&snapshot).await.unwrap_err();
        assert!(matches!(err, BundleError::Unsupported(_)));
    }

    #[tokio::test]
    async fn keeps_external_scripts_untouched() {
        let snapshot = snapshot_with(&[(
            "/index.html",
            r#"<body><script src="https://cdn.example/lib.js"></script><script>inline();</script></body>"#,
        )]);
        let document = bundle(&snapshot).await.unwrap();
        assert!(document.contains(r#"src="https://cdn.example/lib.js""#));
        assert!(document.contains("<script>inline();</script>"));
    }

    #[tokio::test]
    async fn preview_strategy_maps_bundle_errors() {
        let strategy = BundlerPreview::new(Arc::new(InlineAssetBundler));
        assert_eq!(strategy.kind(), TierKind::Bundler);
        // Default scaffold main.jsx imports react, so bundling must refuse.
        let err = strategy
            .attempt(&build_snapshot(&ProjectTree::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Failed(_)));
    }
}
