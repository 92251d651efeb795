//! Instagram extraction via a URL-submission download front end.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::browser::BrowserSession;
use crate::config::Config;

use super::{ExtractError, ExtractionResult, ExtractionStrategy, MediaKind, Site, await_ready};

const DEFAULT_BASE_URL: &str = "https://fastdl.app/id";

const INPUT_SELECTOR: &str = "#search-form-input";
const SUBMIT_SELECTOR: &str = ".search-form__button";
const READY_SELECTOR: &str = ".output-list__item a.button__download";

/// This front end resolves posts quickly or not at all.
const READY_TIMEOUT: Duration = Duration::from_secs(20);

/// Strategy for Instagram post URLs.
///
/// Multiple download anchors imply an album (photo set); a single anchor is
/// returned as one image.
#[derive(Debug)]
pub struct InstagramStrategy {
    base_url: String,
    selector_timeout: Duration,
}

impl InstagramStrategy {
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
impl ExtractionStrategy for InstagramStrategy {
    fn site(&self) -> Site {
        Site::Instagram
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
        session.click(SUBMIT_SELECTOR).await?;

        // A timeout here means the post does not exist or is private;
        // callers see it as "notfound", not as an internal error.
        await_ready(session, READY_SELECTOR, READY_TIMEOUT).await?;

        let urls: Vec<String> = session
            .eval(
                "Array.from(document.querySelectorAll(\
                 '.output-list__item a.button__download')).map((a) => a.href)",
            )
            .await?;
        debug!(count = urls.len(), "collected download links");

        if urls.is_empty() {
            return Err(ExtractError::NoAssets {
                reason: "result list rendered without download links".to_string(),
            });
        }

        if urls.len() > 1 {
            Ok(ExtractionResult::photo_set(urls))
        } else {
            let url = urls.into_iter().next().unwrap_or_default();
            Ok(ExtractionResult::single(MediaKind::Image, url))
        }
    }
}
