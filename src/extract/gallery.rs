//! Code-addressed gallery extraction.
//!
//! The gallery site is addressed by numeric content code rather than URL.
//! Thumbnails are lazy-loaded, so the asset URL lives in `data-src` and
//! points at a downscaled variant on a thumbnail host; it is rewritten to
//! the full-resolution original before download. The downloaded set is
//! assembled into one PDF named after the code.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::browser::BrowserSession;
use crate::config::Config;

use super::{
    AssetRef, ExtractError, ExtractionResult, ExtractionStrategy, MediaKind, Site, await_ready,
};

const DEFAULT_BASE_URL: &str = "https://nhentai.net";

const READY_SELECTOR: &str = ".thumb-container";

/// Thumbnail URL shape: `t<N>.<host>/galleries/<gallery>/<page>t.<ext>`;
/// the full-resolution original swaps the `t` host prefix for `i` and drops
/// the trailing `t` from the page stem.
static THUMB_RE: LazyLock<Regex> = LazyLock::new(|| {
    super::compile_static_regex(r"t(\d+)\.([a-z0-9.-]+)/galleries/(\d+)/(\d+)t\.")
});

const COLLECT_JS: &str = r#"
(() => {
    const containers = document.querySelectorAll('.thumb-container');
    const images = [];
    containers.forEach((container) => {
        const img = container.querySelector('img.lazyload');
        if (!img) return;
        const url = img.getAttribute('data-src');
        if (!url) return;
        images.push({
            url,
            width: img.getAttribute('width'),
            height: img.getAttribute('height'),
        });
    });
    return images;
})()
"#;

#[derive(Debug, Deserialize)]
struct ThumbNode {
    url: String,
    width: Option<String>,
    height: Option<String>,
}

/// Strategy for code-addressed galleries.
#[derive(Debug)]
pub struct GalleryStrategy {
    base_url: String,
    selector_timeout: Duration,
}

impl GalleryStrategy {
    /// Creates the strategy against the production site.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            selector_timeout: config.selector_timeout,
        }
    }

    /// Creates the strategy against a custom site URL (for tests).
    #[must_use]
    pub fn with_base_url(config: &Config, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            selector_timeout: config.selector_timeout,
        }
    }
}

#[async_trait]
impl ExtractionStrategy for GalleryStrategy {
    fn site(&self) -> Site {
        Site::Gallery
    }

    fn assembles_document(&self) -> bool {
        true
    }

    fn artifact_id(&self, input: &str) -> Option<String> {
        let code = input.trim();
        (!code.is_empty()).then(|| code.to_string())
    }

    fn asset_referer(&self) -> Option<String> {
        Some(format!("{}/", self.base_url.trim_end_matches('/')))
    }

    #[instrument(skip(self, session), fields(code = %input))]
    async fn extract(
        &self,
        session: &BrowserSession,
        input: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        let code = input.trim();
        let url = format!("{}/g/{code}/", self.base_url.trim_end_matches('/'));
        session.navigate(&url).await?;

        // No thumbnails within the timeout means an invalid or removed code.
        await_ready(session, READY_SELECTOR, self.selector_timeout).await?;

        let thumbs: Vec<ThumbNode> = session.eval(COLLECT_JS).await?;
        debug!(pages = thumbs.len(), "collected gallery thumbnails");

        if thumbs.is_empty() {
            return Err(ExtractError::NoAssets {
                reason: "gallery page rendered without image thumbnails".to_string(),
            });
        }

        let assets = thumbs
            .into_iter()
            .enumerate()
            .map(|(idx, thumb)| {
                AssetRef::new(full_resolution_url(&thumb.url), idx as u32 + 1).with_dimensions(
                    thumb.width.as_deref().and_then(|w| w.parse().ok()),
                    thumb.height.as_deref().and_then(|h| h.parse().ok()),
                )
            })
            .collect();

        Ok(ExtractionResult {
            kind: MediaKind::PhotoSet,
            assets,
        })
    }
}

/// Rewrites a thumbnail URL to its full-resolution original.
///
/// URLs that do not match the thumbnail shape are passed through unchanged.
fn full_resolution_url(thumb_url: &str) -> String {
    THUMB_RE
        .replace(thumb_url, "i$1.$2/galleries/$3/$4.")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_resolution_url_rewrites_thumbnail() {
        assert_eq!(
            full_resolution_url("https://t3.nhentai.net/galleries/123456/7t.jpg"),
            "https://i3.nhentai.net/galleries/123456/7.jpg"
        );
    }

    #[test]
    fn test_full_resolution_url_passes_through_non_thumbnails() {
        let url = "https://i3.nhentai.net/galleries/123456/7.jpg";
        assert_eq!(full_resolution_url(url), url);
    }

    #[test]
    fn test_artifact_id_is_the_trimmed_code() {
        let strategy = GalleryStrategy::new(&Config::default());
        assert_eq!(strategy.artifact_id("  177013 "), Some("177013".to_string()));
        assert_eq!(strategy.artifact_id("   "), None);
    }

    #[test]
    fn test_asset_referer_points_at_site_root() {
        let config = Config::default();
        let strategy = GalleryStrategy::with_base_url(&config, "https://galleries.example");
        assert_eq!(
            strategy.asset_referer(),
            Some("https://galleries.example/".to_string())
        );
    }
}
