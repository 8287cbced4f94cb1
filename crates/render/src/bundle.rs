//! Self-contained viewer pages.
//!
//! The viewer page and its scripts are embedded into the binary at compile
//! time using [`rust-embed`](rust_embed). Small documents are inlined into the
//! page (base64) so the surface needs no file access at all; large documents
//! are opened by URL instead.

use crate::error::{ErrorKind, Result};
use crate::surface::Viewport;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use exn::OptionExt;
use lectern_config::RenderConfig;
use rust_embed::Embed;
use serde::Serialize;
use std::borrow::Cow;

const PAGE: &str = "viewer.html";
const SCRIPTS: &[&str] = &["bridge.js", "viewer.js"];
const NEEDLE: &str = "</head";

#[derive(Embed)]
#[folder = "../../assets/viewer/"]
struct Assets;

/// Values handed to the viewer script as `window.LECTERN_SETTINGS`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerSettings {
    pub scale: f32,
    pub batch_size: u32,
    /// Height reserved for a page before it has rendered.
    pub placeholder_height: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64 document bytes, for inline bundles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl ViewerSettings {
    pub fn new(config: &RenderConfig, viewport: Viewport) -> Self {
        Self {
            scale: config.scale,
            batch_size: config.batch_size,
            placeholder_height: viewport.height,
            url: None,
            document: None,
        }
    }

    fn to_script(&self) -> Result<String> {
        let json = serde_json::to_string(self).map_err(|e| ErrorKind::InvalidAsset(format!("settings: {e}")))?;
        // JSON may legally contain `</script>`; HTML may not.
        Ok(format!("<script>window.LECTERN_SETTINGS = {};</script>\n", json.replace("</", "<\\/")))
    }
}

/// The embedded viewer.
pub struct ViewerBundle;

impl ViewerBundle {
    /// Raw bytes of an embedded asset.
    pub fn asset(name: impl AsRef<str>) -> Result<Cow<'static, [u8]>> {
        Assets::get(name.as_ref()).map(|f| f.data).ok_or_raise(|| ErrorKind::AssetNotFound(name.as_ref().to_string()))
    }

    /// Names of every embedded asset.
    pub fn list() -> Vec<Cow<'static, str>> {
        Assets::iter().collect()
    }

    /// A page that renders `document` without touching the filesystem.
    pub fn inline(document: &[u8], settings: &ViewerSettings) -> Result<String> {
        let settings = ViewerSettings { url: None, document: Some(STANDARD.encode(document)), ..settings.clone() };
        Self::assemble(&settings)
    }

    /// A page that opens the document at `url`.
    pub fn shell(url: &str, settings: &ViewerSettings) -> Result<String> {
        let settings = ViewerSettings { url: Some(url.to_string()), document: None, ..settings.clone() };
        Self::assemble(&settings)
    }

    fn assemble(settings: &ViewerSettings) -> Result<String> {
        let page = Self::text(PAGE)?;
        let mut head = settings.to_script()?;
        for script in SCRIPTS {
            head.push_str("<script>\n");
            head.push_str(&Self::text(script)?);
            head.push_str("</script>\n");
        }
        let position = page.as_bytes().windows(NEEDLE.len()).position(|w| w.eq_ignore_ascii_case(NEEDLE.as_bytes()));
        let html = match position {
            Some(position) => {
                tracing::debug!(position, "Viewer scripts injected into page head");
                format!("{}{head}{}", &page[..position], &page[position..])
            },
            None => {
                tracing::warn!("Closing head tag not found; appending viewer scripts");
                format!("{page}{head}")
            },
        };
        Ok(html)
    }

    fn text(name: &str) -> Result<String> {
        let bytes = Self::asset(name)?;
        String::from_utf8(bytes.into_owned()).map_err(|_| ErrorKind::InvalidAsset(format!("{name} is not utf-8")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ViewerSettings {
        ViewerSettings::new(&RenderConfig::default(), Viewport::default())
    }

    #[test]
    fn lists_embedded_assets() {
        let assets = ViewerBundle::list();
        for name in ["viewer.html", "bridge.js", "viewer.js"] {
            assert!(assets.iter().any(|a| a == name), "missing {name}");
        }
        assert!(ViewerBundle::asset("missing.js").is_err());
    }

    #[test]
    fn inline_bundle_embeds_document_and_scripts_in_head() {
        let html = ViewerBundle::inline(b"%PDF-1.7", &settings()).unwrap();
        let head_end = html.find("</head>").unwrap();
        let settings_at = html.find("window.LECTERN_SETTINGS").unwrap();
        assert!(settings_at < head_end);
        assert!(html.contains(&STANDARD.encode(b"%PDF-1.7")));
        assert!(html.contains("window.lecternBridge"));
        assert!(html.contains("\"batchSize\":20"));
    }

    #[test]
    fn shell_points_at_url_and_escapes_script_terminators() {
        let html = ViewerBundle::shell("file:///tmp/a</script>.pdf", &settings()).unwrap();
        assert!(html.contains("file:///tmp/a<\\/script>.pdf"));
        assert!(!html.contains("\"document\""));
    }
}
