//! Pinterest extraction from the authenticated site itself.
//!
//! Unlike the submission front ends, this strategy navigates straight to
//! the pin page, which requires a logged-in session. The media URL is
//! recovered from two sources: a passive network capture (players backed by
//! blob URLs never expose their stream in the DOM) and a DOM probe over
//! video/meta/image nodes in fixed priority order. A network-captured URL
//! always takes precedence over a DOM-derived one.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::browser::BrowserSession;
use crate::config::Config;
use crate::session::LoginFlow;

use super::{ExtractError, ExtractionResult, ExtractionStrategy, MediaKind, Site};

const DEFAULT_BASE_URL: &str = "https://www.pinterest.com";

/// Request-URL fragments identifying the pin's video stream.
const VIDEO_NEEDLES: [&str; 2] = [".mp4", "/v1/videos/"];

/// DOM probe, in fixed priority order: video element sources (skipping blob
/// URLs), the `og:video` meta tag, the video poster as an image fallback,
/// then known image selectors from most to least specific.
const MEDIA_PROBE_JS: &str = r#"
(() => {
    const video = document.querySelector('video');
    if (video) {
        if (video.src && !video.src.startsWith('blob:')) {
            return { url: video.src, kind: 'video' };
        }
        const source = video.querySelector('source');
        if (source && source.src && !source.src.startsWith('blob:')) {
            return { url: source.src, kind: 'video' };
        }
        if (video.poster) {
            return { url: video.poster, kind: 'image' };
        }
    }
    const metaVideo = document.querySelector('meta[property="og:video"]');
    if (metaVideo && metaVideo.content) {
        return { url: metaVideo.content, kind: 'video' };
    }
    const selectors = [
        'img[src*="originals"]',
        'img[src*="736x"]',
        'img[loading="eager"]',
        'img[srcset]',
    ];
    for (const selector of selectors) {
        const img = document.querySelector(selector);
        if (img && img.src) {
            return { url: img.src, kind: 'image' };
        }
    }
    return null;
})()
"#;

#[derive(Debug, Deserialize)]
struct ProbedMedia {
    url: String,
    kind: String,
}

/// Strategy for Pinterest pin URLs.
#[derive(Debug)]
pub struct PinterestStrategy {
    base_url: String,
}

impl PinterestStrategy {
    /// Creates the strategy against the production site.
    #[must_use]
    pub fn new(_config: &Config) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Creates the strategy against a custom site URL (for tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for PinterestStrategy {
    fn site(&self) -> Site {
        Site::Pinterest
    }

    fn login_flow(&self) -> Option<LoginFlow> {
        Some(LoginFlow {
            site_id: Site::Pinterest.id().to_string(),
            home_url: self.base_url.clone(),
            login_url: format!("{}/login/", self.base_url),
            email_selector: r#"input[type="email"]"#.to_string(),
            password_selector: r#"input[type="password"]"#.to_string(),
            submit_selector: r#"button[type="submit"]"#.to_string(),
            error_selector: r#"div[data-test-id="login-error"]"#.to_string(),
            login_form_selector: r#"input[type="email"]"#.to_string(),
        })
    }

    #[instrument(skip(self, session, input))]
    async fn extract(
        &self,
        session: &BrowserSession,
        input: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        // Install the capture before navigating so the player's first
        // request is not missed.
        let capture = session
            .capture_matching_requests(VIDEO_NEEDLES.iter().map(ToString::to_string).collect())
            .await?;

        session.navigate(input).await?;

        let mut probed: Option<ProbedMedia> = session.eval(MEDIA_PROBE_JS).await?;
        if probed.is_none() {
            // Players attach their sources a beat after load.
            tokio::time::sleep(Duration::from_secs(1)).await;
            probed = session.eval(MEDIA_PROBE_JS).await?;
        }

        // Network-derived candidate wins over anything in the DOM.
        if let Some(url) = capture.take() {
            debug!(url = %url, "using network-captured video URL");
            return Ok(ExtractionResult::single(MediaKind::Video, url));
        }

        let Some(media) = probed else {
            return Err(ExtractError::NoAssets {
                reason: "no media URL in pin page".to_string(),
            });
        };

        if media.kind == "video" {
            Ok(ExtractionResult::single(MediaKind::Video, media.url))
        } else {
            Ok(ExtractionResult::single(
                MediaKind::Image,
                upgrade_image_url(&media.url),
            ))
        }
    }
}

/// Rewrites sized image variants to the full-resolution originals.
fn upgrade_image_url(url: &str) -> String {
    url.replace("236x", "originals").replace("736x", "originals")
}
