//! Bundle assembly (C7): strip unsafe tags from the HTML shell and
//! package everything into a size-bounded, renderer-ready document.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::config::Config;
use crate::error::Error;
use crate::event::{CategorizedAssets, Manifest};

/// The assembled document handed to the external sandboxed renderer. A
/// downstream renderer attaches a fresh CSP and wires CSS/JS back in as
/// blob resources; this crate's job ends at producing inert markup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub html: String,
    pub css: Vec<String>,
    pub js: Vec<String>,
    pub manifest_meta: Value,
}

pub fn assemble(
    manifest: &Manifest<'_>,
    assets: &CategorizedAssets<'_>,
    config: &Config,
) -> Result<Bundle, Error> {
    let html = strip_unsafe_tags(&assets.html.content);
    let css: Vec<String> = assets.css.iter().map(|e| e.content.clone()).collect();
    let js: Vec<String> = assets.js.iter().map(|e| e.content.clone()).collect();

    let total_size = html.len()
        + css.iter().map(|s| s.len()).sum::<usize>()
        + js.iter().map(|s| s.len()).sum::<usize>();

    if total_size > config.max_content_size {
        return Err(Error::BundleTooLarge {
            size: total_size,
            limit: config.max_content_size,
        });
    }

    Ok(Bundle {
        html,
        css,
        js,
        manifest_meta: manifest.meta.clone(),
    })
}

fn csp_meta_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<meta\s+[^>]*http-equiv\s*=\s*["']content-security-policy["'][^>]*>"#)
            .expect("valid regex")
    })
}

fn stylesheet_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<link\s+[^>]*rel\s*=\s*["']stylesheet["'][^>]*>"#).expect("valid regex")
    })
}

fn script_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"))
}

/// Strips CSP meta tags, stylesheet links, and script blocks (inline
/// and external-src) from the HTML shell, leaving everything else
/// untouched for the external renderer to inject its own CSP into.
fn strip_unsafe_tags(html: &str) -> String {
    let without_csp = csp_meta_re().replace_all(html, "");
    let without_stylesheets = stylesheet_link_re().replace_all(&without_csp, "");
    let without_scripts = script_block_re().replace_all(&without_stylesheets, "");
    without_scripts.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NwebEvent;

    fn ev(id: &str, mime: &str, content: &str) -> NwebEvent {
        NwebEvent {
            id: id.to_string(),
            pubkey: "pk".to_string(),
            kind: 1125,
            created_at: 0,
            tags: vec![vec!["m".to_string(), mime.to_string()]],
            content: content.to_string(),
        }
    }

    #[test]
    fn strips_csp_meta_stylesheets_and_scripts() {
        let html = r#"<html><head>
<meta http-equiv="Content-Security-Policy" content="default-src 'none'">
<link rel="stylesheet" href="style.css">
<script src="app.js"></script>
<script>alert(1)</script>
</head><body>hi</body></html>"#;
        let out = strip_unsafe_tags(html);
        assert!(!out.contains("Content-Security-Policy"));
        assert!(!out.contains("<link"));
        assert!(!out.contains("<script"));
        assert!(out.contains("hi"));
    }

    #[test]
    fn rejects_oversized_bundle() {
        let html_ev = ev("h1", "text/html", &"x".repeat(10));
        let manifest_ev = NwebEvent {
            id: "man1".to_string(),
            pubkey: "pk".to_string(),
            kind: 1126,
            created_at: 0,
            tags: vec![],
            content: "{}".to_string(),
        };
        let manifest = Manifest::parse(&manifest_ev).unwrap();
        let categorized = CategorizedAssets {
            html: &html_ev,
            css: vec![],
            js: vec![],
            other: vec![],
        };
        let mut config = Config::default();
        config.max_content_size = 5;
        let err = assemble(&manifest, &categorized, &config).unwrap_err();
        assert!(matches!(err, Error::BundleTooLarge { .. }));
    }
}
