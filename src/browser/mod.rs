//! Scoped CDP browser sessions.
//!
//! One [`BrowserSession`] wraps one Chrome/Chromium process with a single
//! page, owned by exactly one job. The orchestrator launches the session at
//! the start of a request and calls [`BrowserSession::close`] on every exit
//! path; a `Drop` fallback kills the process if a panic unwinds past the
//! explicit close.

mod error;

pub use error::BrowserError;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, EventRequestWillBeSent,
};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;

/// Interval between selector-presence probes while waiting.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One live browser process with a single page.
pub struct BrowserSession {
    browser: Option<Browser>,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    /// Launches a browser configured from `config` and opens a blank page.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Launch`] when the process cannot be started
    /// or the initial page cannot be created.
    #[instrument(skip(config), fields(headless = config.headless))]
    pub async fn launch(config: &Config) -> Result<Self, BrowserError> {
        let mut builder = CdpBrowserConfig::builder();

        // chromiumoxide runs headless by default; with_head() shows the window.
        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: 1920,
                height: 1080,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .request_timeout(config.navigation_timeout)
            .arg(format!("--user-agent={}", config.user_agent))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-web-security")
            .arg("--disable-features=IsolateOrigins,site-per-process");

        let cdp_config = builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // Drain browser events; the stream ends when the connection closes.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!(?event, "browser event");
            }
            debug!("browser event handler exited");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(format!("failed to open page: {e}")))?;

        info!("browser session launched");

        Ok(Self {
            browser: Some(browser),
            page,
            handler_task,
        })
    }

    /// Navigates the page and waits for the load to settle.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Navigation`] when the navigation fails.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        // Settling is best-effort: some front ends keep long-polling
        // connections open and never reach network idle.
        let _ = self.page.wait_for_navigation().await;

        debug!("navigation complete");
        Ok(())
    }

    /// Waits for a selector to match at least one element.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::SelectorTimeout`] when nothing matches within
    /// `timeout`, and [`BrowserError::Eval`] when the presence probe itself
    /// fails.
    #[instrument(skip(self), fields(selector = %selector))]
    pub async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let check_js = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector).map_err(|e| BrowserError::Eval(e.to_string()))?
        );

        let deadline = Instant::now() + timeout;
        loop {
            let found: bool = self
                .page
                .evaluate(check_js.as_str())
                .await
                .map_err(|e| BrowserError::Eval(e.to_string()))?
                .into_value()
                .unwrap_or(false);

            if found {
                debug!("selector present");
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(BrowserError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    /// Evaluates JavaScript in the page and decodes the result.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Eval`] when evaluation fails or the result
    /// does not decode into `T`.
    pub async fn eval<T: DeserializeOwned>(&self, js: &str) -> Result<T, BrowserError> {
        self.page
            .evaluate(js)
            .await
            .map_err(|e| BrowserError::Eval(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::Eval(format!("result did not decode: {e:?}")))
    }

    /// Focuses an element and types text into it keystroke by keystroke.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::ElementNotFound`] when the selector matches
    /// nothing, or [`BrowserError::Cdp`] when input dispatch fails.
    #[instrument(skip(self, text), fields(selector = %selector))]
    pub async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;

        element
            .focus()
            .await
            .map_err(|e| BrowserError::Cdp(e.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|e| BrowserError::Cdp(e.to_string()))?;

        debug!(chars = text.len(), "typed text");
        Ok(())
    }

    /// Clicks the first element matching `selector`.
    ///
    /// Falls back to a synthetic JavaScript click when the native click
    /// fails (overlays intercept pointer events on some front ends).
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::ElementNotFound`] when the selector matches
    /// nothing, or [`BrowserError::Eval`] when both click paths fail.
    #[instrument(skip(self), fields(selector = %selector))]
    pub async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;

        if let Err(e) = element.click().await {
            warn!(error = %e, "native click failed, falling back to JS click");
            let js = format!(
                "document.querySelector({}).click()",
                serde_json::to_string(selector).map_err(|e| BrowserError::Eval(e.to_string()))?
            );
            self.page
                .evaluate(js.as_str())
                .await
                .map_err(|e| BrowserError::Eval(e.to_string()))?;
        }

        debug!("clicked element");
        Ok(())
    }

    /// Attaches a local file to a file input element.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::ElementNotFound`] when the selector matches
    /// nothing, or [`BrowserError::Cdp`] when the CDP command fails.
    #[instrument(skip(self), fields(selector = %selector, path = %path.display()))]
    pub async fn set_file_input(&self, selector: &str, path: &Path) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;

        let params = SetFileInputFilesParams::builder()
            .file(path.display().to_string())
            .node_id(element.node_id)
            .build()
            .map_err(|e| BrowserError::Cdp(e.to_string()))?;

        self.page
            .execute(params)
            .await
            .map_err(|e| BrowserError::Cdp(e.to_string()))?;

        debug!("attached file to input");
        Ok(())
    }

    /// Applies cookies to the session.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Cdp`] when the set-cookies command fails.
    pub async fn set_cookies(&self, cookies: Vec<CookieParam>) -> Result<(), BrowserError> {
        self.page
            .set_cookies(cookies)
            .await
            .map_err(|e| BrowserError::Cdp(e.to_string()))?;
        Ok(())
    }

    /// Reads the session's current cookies.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Cdp`] when the get-cookies command fails.
    pub async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        self.page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::Cdp(e.to_string()))
    }

    /// Waits for an in-flight navigation (e.g. after a form submit) to
    /// settle. Best-effort: a page that never goes idle is not an error.
    pub async fn settle(&self) {
        let _ = self.page.wait_for_navigation().await;
    }

    /// Returns the page's current URL, when available.
    pub async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    /// Starts a passive capture of outgoing requests whose URL contains any
    /// of `needles`. The last matching URL wins, mirroring how a player
    /// re-requests its stream while a page settles.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Cdp`] when the event listener cannot be
    /// installed.
    pub async fn capture_matching_requests(
        &self,
        needles: Vec<String>,
    ) -> Result<RequestCapture, BrowserError> {
        let mut events = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| BrowserError::Cdp(e.to_string()))?;

        let captured: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let url = event.request.url.clone();
                if needles.iter().any(|needle| url.contains(needle.as_str())) {
                    debug!(url = %url, "captured matching request");
                    if let Ok(mut slot) = sink.lock() {
                        *slot = Some(url);
                    }
                }
            }
        });

        Ok(RequestCapture { captured, task })
    }

    /// Closes the page and shuts the browser process down.
    ///
    /// Close failures are logged, not propagated: by this point the job's
    /// outcome is already decided and the process is reaped either way.
    pub async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser close failed, killing process");
                let _ = browser.kill().await;
            }
            let _ = browser.wait().await;
        }
        self.handler_task.abort();
        info!("browser session closed");
    }
}

// Fallback for panic unwinds: the orchestrator calls close() on every normal
// exit path, but an unwind would otherwise leak the Chrome process.
impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler_task.abort();
        if let Some(mut browser) = self.browser.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = browser.kill().await;
                });
            }
        }
    }
}

/// Handle to a passive network-request capture.
///
/// The listener task runs until the capture is dropped.
pub struct RequestCapture {
    captured: Arc<Mutex<Option<String>>>,
    task: JoinHandle<()>,
}

impl RequestCapture {
    /// Returns the most recently captured matching URL, if any.
    #[must_use]
    pub fn take(&self) -> Option<String> {
        self.captured.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Drop for RequestCapture {
    fn drop(&mut self) {
        self.task.abort();
    }
}
