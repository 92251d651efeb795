//! TikTok extraction via a URL-submission download front end.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::browser::BrowserSession;
use crate::config::Config;

use super::{
    AssetRef, ExtractError, ExtractionResult, ExtractionStrategy, MediaKind, Site, await_ready,
};

const DEFAULT_BASE_URL: &str = "https://snaptik.app";

const INPUT_SELECTOR: &str = ".link-input";
const SUBMIT_SELECTOR: &str = r#"button.button-go[type="submit"]"#;
const READY_SELECTOR: &str = ".download-box";

/// Collects either the photo-album anchors or the single video anchor.
const COLLECT_JS: &str = r#"
(() => {
    const photoLinks = Array.from(
        document.querySelectorAll('a[data-event="download_albumPhoto_photo"]')
    );
    if (photoLinks.length > 0) {
        return { kind: 'photo', urls: photoLinks.map((link) => link.href) };
    }
    const videoLink = document.querySelector('.download-box a.button.download-file');
    return { kind: 'video', urls: videoLink ? [videoLink.href] : [] };
})()
"#;

#[derive(Debug, Deserialize)]
struct CollectedLinks {
    kind: String,
    urls: Vec<String>,
}

/// Strategy for TikTok URLs.
///
/// Result-kind disambiguation: photo-album anchors present implies a photo
/// set; otherwise the single video download anchor implies a video.
#[derive(Debug)]
pub struct TiktokStrategy {
    base_url: String,
    selector_timeout: Duration,
}

impl TiktokStrategy {
    /// Creates the strategy with the production front end.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            selector_timeout: config.selector_timeout,
        }
    }

    /// Creates the strategy against a custom front-end URL (for tests).
    #[must_use]
    pub fn with_base_url(config: &Config, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            selector_timeout: config.selector_timeout,
        }
    }
}

#[async_trait]
impl ExtractionStrategy for TiktokStrategy {
    fn site(&self) -> Site {
        Site::Tiktok
    }

    #[instrument(skip(self, session, input))]
    async fn extract(
        &self,
        session: &BrowserSession,
        input: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        session.navigate(&self.base_url).await?;

        await_ready(session, INPUT_SELECTOR, self.selector_timeout).await?;
        session.type_into(INPUT_SELECTOR, input).await?;

        await_ready(session, SUBMIT_SELECTOR, self.selector_timeout).await?;
        session.click(SUBMIT_SELECTOR).await?;

        await_ready(session, READY_SELECTOR, self.selector_timeout).await?;

        let collected: CollectedLinks = session.eval(COLLECT_JS).await?;
        debug!(kind = %collected.kind, count = collected.urls.len(), "collected links");

        if collected.urls.is_empty() {
            return Err(ExtractError::NoAssets {
                reason: "no download links in result box".to_string(),
            });
        }

        if collected.kind == "photo" {
            Ok(ExtractionResult::photo_set(collected.urls))
        } else {
            let url = collected.urls.into_iter().next().unwrap_or_default();
            Ok(ExtractionResult {
                kind: MediaKind::Video,
                assets: vec![AssetRef::new(url, 1)],
            })
        }
    }
}
