//! Twitter/X extraction via a URL-submission download front end.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::browser::BrowserSession;
use crate::config::Config;

use super::{
    ExtractError, ExtractionResult, ExtractionStrategy, Site, await_ready, infer_kind_from_url,
};

const DEFAULT_BASE_URL: &str = "https://tweeload.com";

const INPUT_SELECTOR: &str = "input#url";
const SUBMIT_SELECTOR: &str = "button.btn.btn--primary";
const READY_SELECTOR: &str = "a.btn.download__item__info__actions__button";

/// The front end converts the tweet server-side, so the result anchor can
/// take considerably longer than an ordinary selector wait.
const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Attempts at reading the download anchor once the result box rendered.
const READ_ATTEMPTS: u32 = 3;

/// Strategy for Twitter/X URLs.
///
/// The result kind is inferred from tokens in the download URL
/// ("video"/"gif"/"image", first match wins). Best-effort only; an
/// unrecognized URL shape yields `Unknown`, which the orchestrator treats
/// as a video-like single asset.
#[derive(Debug)]
pub struct TwitterStrategy {
    base_url: String,
    selector_timeout: Duration,
}

impl TwitterStrategy {
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
impl ExtractionStrategy for TwitterStrategy {
    fn site(&self) -> Site {
        Site::Twitter
    }

    #[instrument(skip(self, session, input))]
    async fn extract(
        &self,
        session: &BrowserSession,
        input: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        session.navigate(&self.base_url).await?;

        await_ready(session, INPUT_SELECTOR, self.selector_timeout).await?;
        // The input rejects synthetic keystrokes while its validation debounce
        // runs; setting the value directly is what the form reads on submit.
        let fill_js = format!(
            "document.querySelector('input#url').value = {};",
            serde_json::to_string(input)
                .map_err(|e| ExtractError::NoAssets { reason: e.to_string() })?
        );
        let _: serde_json::Value = session.eval(&fill_js).await.unwrap_or_default();

        await_ready(session, SUBMIT_SELECTOR, self.selector_timeout).await?;
        session.click(SUBMIT_SELECTOR).await?;

        await_ready(session, READY_SELECTOR, READY_TIMEOUT).await?;
        session.settle().await;

        let mut download_url: Option<String> = None;
        for attempt in 1..=READ_ATTEMPTS {
            let href: String = session
                .eval(
                    "(() => { const a = document.querySelector(\
                     'a.btn.download__item__info__actions__button'); \
                     return a && a.href ? a.href : ''; })()",
                )
                .await?;
            if !href.is_empty() {
                download_url = Some(href);
                break;
            }
            warn!(attempt, "download anchor not yet populated");
            session.settle().await;
        }

        let Some(url) = download_url else {
            return Err(ExtractError::NoAssets {
                reason: "download anchor never carried a link".to_string(),
            });
        };

        let kind = infer_kind_from_url(&url);
        debug!(?kind, "inferred media kind from URL");
        Ok(ExtractionResult::single(kind, url))
    }
}
