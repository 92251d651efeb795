//! Runtime configuration passed into the pipeline at construction time.
//!
//! Core modules never read the process environment; the binary resolves
//! flags and environment variables once and hands the resulting [`Config`]
//! to the orchestrator.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::poll::PollPolicy;

/// Default navigation timeout for browser page loads.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for a strategy's ready-selector wait.
pub const DEFAULT_SELECTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser-like User-Agent sent by browser sessions and asset fetches.
///
/// The front ends the strategies drive reject obvious non-browser clients,
/// so the pipeline identifies as a desktop Chrome throughout.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Credentials for a site that requires an authenticated session.
#[derive(Clone)]
pub struct Credentials {
    /// Account identifier (email address).
    pub email: String,
    /// Account password (sensitive — never log).
    password: String,
}

impl Credentials {
    /// Creates a new credential pair.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Returns the password.
    ///
    /// Passwords are sensitive — avoid logging the return value.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

// Custom Debug impl that redacts the password.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for the extraction and download pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public serving root; artifacts land under `<public_root>/<site>/<id>/`.
    pub public_root: PathBuf,
    /// Directory holding persisted per-site session cookie files.
    pub data_dir: PathBuf,
    /// Directory the browser writes its own downloads into (watched by the
    /// upscale strategy for the processed artifact to appear).
    pub browser_download_dir: PathBuf,
    /// Maximum concurrent asset fetches within one job (1-100).
    pub fetch_concurrency: usize,
    /// Timeout applied to each page navigation.
    pub navigation_timeout: Duration,
    /// Timeout applied to a strategy's ready-selector wait.
    pub selector_timeout: Duration,
    /// Bounded-retry policy for completion polling.
    pub poll: PollPolicy,
    /// Whether the browser runs headless.
    pub headless: bool,
    /// User-Agent applied to browser sessions and asset fetches.
    pub user_agent: String,
    /// Per-site credentials, keyed by site identifier.
    pub credentials: HashMap<String, Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            public_root: PathBuf::from("public/downloads"),
            data_dir: PathBuf::from("data"),
            browser_download_dir: PathBuf::from("data/browser-downloads"),
            fetch_concurrency: crate::fetch::DEFAULT_FETCH_CONCURRENCY,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            selector_timeout: DEFAULT_SELECTOR_TIMEOUT,
            poll: PollPolicy::default(),
            headless: true,
            user_agent: BROWSER_USER_AGENT.to_string(),
            credentials: HashMap::new(),
        }
    }
}

impl Config {
    /// Returns the credentials configured for a site, if any.
    #[must_use]
    pub fn credentials_for(&self, site_id: &str) -> Option<&Credentials> {
        self.credentials.get(site_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("user@example.com", "hunter2");
        let debug_str = format!("{creds:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(
            !debug_str.contains("hunter2"),
            "Debug output must NOT contain the password"
        );
        assert!(debug_str.contains("user@example.com"));
    }

    #[test]
    fn test_config_default_paths() {
        let config = Config::default();
        assert_eq!(config.public_root, PathBuf::from("public/downloads"));
        assert!(config.headless);
        assert!(config.credentials_for("pinterest").is_none());
    }
}
