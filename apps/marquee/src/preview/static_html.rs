use async_trait::async_trait;

use super::tier::{PreviewStrategy, RenderTarget, TierError, TierKind};
use crate::workspace::FileSnapshot;

pub(crate) const ENTRY_HTML: &str = "/index.html";

const BLANK_DOCUMENT: &str =
    "<!doctype html><html><head><meta charset=\"utf-8\"></head><body></body></html>";

/// Last-resort tier: serve the entry HTML directly with local stylesheets
/// inlined. No build step and no network; it cannot fail, the worst case is
/// a blank page.
pub struct StaticPreview;

#[async_trait]
impl PreviewStrategy for StaticPreview {
    fn kind(&self) -> TierKind {
        TierKind::Static
    }

    async fn attempt(&self, snapshot: &FileSnapshot) -> Result<RenderTarget, TierError> {
        Ok(RenderTarget::Document(render_static(snapshot)))
    }
}

pub(crate) fn render_static(snapshot: &FileSnapshot) -> String {
    match snapshot.get(ENTRY_HTML) {
        Some(entry) => inline_stylesheets(entry, snapshot),
        None => BLANK_DOCUMENT.to_string(),
    }
}

/// Replace `<link rel="stylesheet" href="...">` tags whose href resolves to a
/// snapshot file with inline `<style>` blocks. External and unknown hrefs are
/// left untouched.
pub(crate) fn inline_stylesheets(html: &str, snapshot: &FileSnapshot) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find("<link") {
        let Some(end_rel) = rest[start..].find('>') else {
            break;
        };
        let end = start + end_rel + 1;
        let tag = &rest[start..end];
        out.push_str(&rest[..start]);
        let inlined = stylesheet_href(tag).and_then(|href| resolve_asset(snapshot, &href));
        match inlined {
            Some(css) => {
                out.push_str("<style>\n");
                out.push_str(css);
                out.push_str("\n</style>");
            }
            None => out.push_str(tag),
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

fn stylesheet_href(tag: &str) -> Option<String> {
    if !tag.contains("stylesheet") {
        return None;
    }
    attr_value(tag, "href")
}

pub(crate) fn attr_value(tag: &str, name: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let needle = format!("{name}={quote}");
        if let Some(start) = tag.find(&needle) {
            let rest = &tag[start + needle.len()..];
            if let Some(end) = rest.find(quote) {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}

/// Resolve an asset reference from the entry document against the snapshot.
/// Absolute URLs are external by definition; relative paths resolve from the
/// project root, where the entry lives.
pub(crate) fn resolve_asset<'a>(snapshot: &'a FileSnapshot, href: &str) -> Option<&'a str> {
    if href.contains("://") {
        return None;
    }
    let trimmed = href.trim_start_matches("./");
    let path = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    snapshot.get(&path)
}
