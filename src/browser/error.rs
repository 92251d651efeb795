//! Browser session error types.

use thiserror::Error;

/// Errors that can occur while driving a browser session.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The browser process could not be launched or configured.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// A page navigation failed.
    #[error("navigation to {url} failed: {reason}")]
    Navigation {
        /// Target URL of the failed navigation.
        url: String,
        /// Description of the failure.
        reason: String,
    },

    /// An awaited selector never appeared within its timeout.
    ///
    /// Strategies surface this as "not found" — the remote content is
    /// absent or the page layout changed — distinct from a navigation
    /// failure, which is an internal error.
    #[error("selector {selector} not present after {timeout_ms}ms")]
    SelectorTimeout {
        /// The CSS selector that was awaited.
        selector: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// A required element was not found in the page.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// JavaScript evaluation failed or produced an undecodable value.
    #[error("JavaScript evaluation failed: {0}")]
    Eval(String),

    /// An underlying CDP command failed.
    #[error("CDP error: {0}")]
    Cdp(String),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::Cdp(err.to_string())
    }
}

impl BrowserError {
    /// Returns true when this error is an awaited-selector timeout.
    #[must_use]
    pub fn is_selector_timeout(&self) -> bool {
        matches!(self, BrowserError::SelectorTimeout { .. })
    }
}
