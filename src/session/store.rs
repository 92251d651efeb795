//! Session store and authentication state machine.
//!
//! States: `NoSession -> CookiesLoaded -> Authenticated`, with
//! `Authenticated -> Expired` on revalidation failure and
//! `Expired -> Authenticated` after a fresh login. Persisted cookies are
//! never assumed valid: every request path revalidates before reuse instead
//! of trusting an in-memory "logged in" flag.
//!
//! The on-disk file is shared across overlapping requests for the same
//! site, so the login/persist step is serialized through a per-site async
//! mutex. Reads of already-validated cookies take no lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use reqwest::cookie::Jar;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::browser::{BrowserError, BrowserSession};
use crate::config::Credentials;

use super::record::{CookieRecord, SessionRecord, load_records_into_jar};

/// Authentication state for a named site's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No persisted cookies exist for the site.
    NoSession,
    /// Cookies were loaded and applied but not yet validated.
    CookiesLoaded,
    /// The session passed the lightweight validation check.
    Authenticated,
    /// Previously valid cookies failed revalidation.
    Expired,
}

/// Errors from session loading, validation, and login.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The credential flow failed or the credentials were rejected.
    #[error("login to {site_id} failed: {reason}")]
    Authentication {
        /// Site the login targeted.
        site_id: String,
        /// Description of the failure.
        reason: String,
    },

    /// Reading or writing the persisted cookie file failed.
    #[error("session storage error at {path}: {source}")]
    Storage {
        /// The cookie file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The persisted cookie file is not valid JSON.
    #[error("corrupt session file at {path}: {source}")]
    Corrupt {
        /// The cookie file path.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A browser operation inside the flow failed.
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Site-specific navigation script for validation and login.
///
/// The lightweight validation check is the absence of both the login form
/// and the login-error marker on the site's home page; login and
/// revalidation share it.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    /// Site identifier; keys the cookie file and the write lock.
    pub site_id: String,
    /// Page used for the lightweight logged-in check.
    pub home_url: String,
    /// Page carrying the credential form.
    pub login_url: String,
    /// Selector for the account identifier field.
    pub email_selector: String,
    /// Selector for the password field.
    pub password_selector: String,
    /// Selector for the form submit control.
    pub submit_selector: String,
    /// Selector whose presence marks rejected credentials.
    pub error_selector: String,
    /// Selector whose presence marks a logged-out page.
    pub login_form_selector: String,
}

/// Persists and validates per-site authentication cookies.
///
/// Owned by the orchestrator; extraction strategies never touch the cookie
/// file directly — they request validation and receive the resulting state.
pub struct SessionStore {
    data_dir: PathBuf,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
    // The cookie file stays a plain array, so validation timestamps live
    // here rather than on disk.
    validated_at: DashMap<String, u64>,
}

impl SessionStore {
    /// Creates a store rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_locks: DashMap::new(),
            validated_at: DashMap::new(),
        }
    }

    /// Unix timestamp of the site's last successful validation in this
    /// process, `None` when the session has never passed the check.
    #[must_use]
    pub fn last_validated(&self, site_id: &str) -> Option<u64> {
        self.validated_at.get(site_id).map(|entry| *entry)
    }

    /// Returns the cookie file path for a site.
    #[must_use]
    pub fn cookie_path(&self, site_id: &str) -> PathBuf {
        self.data_dir.join(format!("{site_id}-cookies.json"))
    }

    /// Loads the persisted session for a site, if one exists.
    ///
    /// The file is read wholesale: a JSON array of cookie objects.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on read failure other than a missing
    /// file, and [`AuthError::Corrupt`] when the file is not valid JSON.
    pub async fn load(&self, site_id: &str) -> Result<Option<SessionRecord>, AuthError> {
        let path = self.cookie_path(site_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Storage { path, source: e }),
        };

        let cookies: Vec<CookieRecord> =
            serde_json::from_slice(&bytes).map_err(|e| AuthError::Corrupt {
                path,
                source: e,
            })?;

        Ok(Some(SessionRecord {
            site_id: site_id.to_string(),
            cookies,
            validated_at: self.last_validated(site_id),
        }))
    }

    /// Persists a site's cookie set, replacing any previous file.
    ///
    /// Serialized through the per-site write lock so overlapping requests
    /// cannot interleave partial cookie writes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] when the directory or file cannot be
    /// written.
    #[instrument(level = "debug", skip(self, cookies), fields(count = cookies.len()))]
    pub async fn persist(&self, site_id: &str, cookies: &[CookieRecord]) -> Result<(), AuthError> {
        let lock = self.site_lock(site_id);
        let _guard = lock.lock().await;
        self.persist_locked(site_id, cookies).await
    }

    /// Builds a `reqwest` cookie jar from the persisted session, when one
    /// exists, so asset fetches can ride the authenticated session.
    ///
    /// # Errors
    ///
    /// Propagates [`SessionStore::load`] errors.
    pub async fn cookie_jar(&self, site_id: &str) -> Result<Option<Arc<Jar>>, AuthError> {
        Ok(self
            .load(site_id)
            .await?
            .map(|record| load_records_into_jar(&record.cookies)))
    }

    /// Loads persisted cookies into the browser session and performs the
    /// lightweight validation check.
    ///
    /// # Errors
    ///
    /// Returns storage errors from [`SessionStore::load`] and browser errors
    /// from cookie application or the validation navigation.
    #[instrument(skip(self, session, flow), fields(site_id = %flow.site_id))]
    pub async fn load_and_validate(
        &self,
        session: &BrowserSession,
        flow: &LoginFlow,
    ) -> Result<AuthState, AuthError> {
        let Some(record) = self.load(&flow.site_id).await? else {
            debug!("no persisted session");
            return Ok(AuthState::NoSession);
        };

        let params: Vec<_> = record
            .cookies
            .iter()
            .filter_map(CookieRecord::to_cookie_param)
            .collect();
        if params.is_empty() {
            warn!("persisted session contains no applicable cookies");
            return Ok(AuthState::NoSession);
        }
        session.set_cookies(params).await?;
        debug!(count = record.cookies.len(), "applied persisted cookies");

        if self.check_logged_in(session, flow).await? {
            info!("persisted session validated");
            self.validated_at.insert(flow.site_id.clone(), unix_now());
            Ok(AuthState::Authenticated)
        } else {
            info!("persisted session expired");
            self.validated_at.remove(&flow.site_id);
            Ok(AuthState::Expired)
        }
    }

    /// Runs the full credential-entry flow.
    ///
    /// Executed only when [`SessionStore::load_and_validate`] did not reach
    /// `Authenticated`. On verification failure the previously persisted
    /// cookie file is left untouched; on success the live cookie set is
    /// captured from the session and persisted under the per-site lock.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Authentication`] when the flow fails or the
    /// credentials are rejected, and browser/storage errors from the
    /// underlying steps.
    #[instrument(skip(self, session, flow, credentials), fields(site_id = %flow.site_id))]
    pub async fn login(
        &self,
        session: &BrowserSession,
        flow: &LoginFlow,
        credentials: &Credentials,
    ) -> Result<AuthState, AuthError> {
        let lock = self.site_lock(&flow.site_id);
        let _guard = lock.lock().await;

        session.navigate(&flow.login_url).await?;
        session
            .wait_for_selector(&flow.email_selector, std::time::Duration::from_secs(5))
            .await
            .map_err(|e| self.login_failed(flow, format!("login form did not load: {e}")))?;

        self.fill_field(session, &flow.email_selector, &credentials.email)
            .await?;
        session
            .wait_for_selector(&flow.password_selector, std::time::Duration::from_secs(5))
            .await
            .map_err(|e| self.login_failed(flow, format!("password field missing: {e}")))?;
        self.fill_field(session, &flow.password_selector, credentials.password())
            .await?;

        // Verify the values actually landed before submitting.
        let email_value = self.field_value(session, &flow.email_selector).await?;
        let password_value = self.field_value(session, &flow.password_selector).await?;
        if email_value != credentials.email || password_value.is_empty() {
            return Err(self.login_failed(flow, "failed to enter credentials".to_string()));
        }

        session.click(&flow.submit_selector).await?;
        session.settle().await;

        let error_present: bool = session
            .eval(&presence_js(&flow.error_selector)?)
            .await
            .unwrap_or(false);
        if error_present {
            return Err(self.login_failed(flow, "credentials rejected".to_string()));
        }

        if !self.check_logged_in(session, flow).await? {
            return Err(self.login_failed(flow, "login verification failed".to_string()));
        }

        // Success: capture and persist the fresh cookie set.
        let cookies: Vec<CookieRecord> = session
            .cookies()
            .await?
            .into_iter()
            .map(CookieRecord::from)
            .collect();
        self.persist_locked(&flow.site_id, &cookies).await?;
        self.validated_at.insert(flow.site_id.clone(), unix_now());
        info!(count = cookies.len(), "login succeeded, cookies persisted");

        Ok(AuthState::Authenticated)
    }

    /// Navigates to the site's home page and checks for the absence of the
    /// login form and the login-error marker.
    async fn check_logged_in(
        &self,
        session: &BrowserSession,
        flow: &LoginFlow,
    ) -> Result<bool, AuthError> {
        session.navigate(&flow.home_url).await?;
        let js = format!(
            "document.querySelector({form}) === null && document.querySelector({error}) === null",
            form = json_str(&flow.login_form_selector)?,
            error = json_str(&flow.error_selector)?,
        );
        Ok(session.eval(&js).await?)
    }

    async fn fill_field(
        &self,
        session: &BrowserSession,
        selector: &str,
        value: &str,
    ) -> Result<(), AuthError> {
        // Clear any prefilled value before typing.
        let clear_js = format!(
            "(() => {{ const el = document.querySelector({sel}); if (el) el.value = ''; return el !== null; }})()",
            sel = json_str(selector)?
        );
        let present: bool = session.eval(&clear_js).await?;
        if !present {
            return Err(AuthError::Browser(BrowserError::ElementNotFound(
                selector.to_string(),
            )));
        }
        session.type_into(selector, value).await?;
        Ok(())
    }

    async fn field_value(
        &self,
        session: &BrowserSession,
        selector: &str,
    ) -> Result<String, AuthError> {
        let js = format!(
            "(() => {{ const el = document.querySelector({sel}); return el ? el.value : ''; }})()",
            sel = json_str(selector)?
        );
        Ok(session.eval(&js).await?)
    }

    async fn persist_locked(
        &self,
        site_id: &str,
        cookies: &[CookieRecord],
    ) -> Result<(), AuthError> {
        let path = self.cookie_path(site_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AuthError::Storage {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let json = serde_json::to_vec_pretty(cookies).map_err(|e| AuthError::Corrupt {
            path: path.clone(),
            source: e,
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| AuthError::Storage { path, source: e })?;
        Ok(())
    }

    fn site_lock(&self, site_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(site_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn login_failed(&self, flow: &LoginFlow, reason: String) -> AuthError {
        AuthError::Authentication {
            site_id: flow.site_id.clone(),
            reason,
        }
    }
}

/// JSON-quotes a selector for embedding in an evaluation script.
fn json_str(selector: &str) -> Result<String, AuthError> {
    serde_json::to_string(selector).map_err(|e| {
        AuthError::Browser(BrowserError::Eval(format!("unencodable selector: {e}")))
    })
}

/// Presence probe script for a selector.
fn presence_js(selector: &str) -> Result<String, AuthError> {
    Ok(format!(
        "document.querySelector({}) !== null",
        json_str(selector)?
    ))
}

/// Returns the current Unix timestamp in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_cookies() -> Vec<CookieRecord> {
        vec![
            CookieRecord::new("_auth", "tok-1", ".example.com", "/", 4_102_444_800.0, true),
            CookieRecord::new("csrftoken", "tok-2", ".example.com", "/", 0.0, false),
        ]
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let record = store.load("pinterest").await.unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_persist_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        store.persist("pinterest", &sample_cookies()).await.unwrap();

        let record = store.load("pinterest").await.unwrap().unwrap();
        assert_eq!(record.site_id, "pinterest");
        assert_eq!(record.cookies.len(), 2);
        assert_eq!(record.cookies[0].name, "_auth");
        assert_eq!(record.cookies[0].value(), "tok-1");
    }

    #[tokio::test]
    async fn test_persisted_file_is_a_plain_json_array() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.persist("pinterest", &sample_cookies()).await.unwrap();

        let raw = std::fs::read_to_string(store.cookie_path("pinterest")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.is_array(), "cookie file must be a JSON array");
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_distinct_error() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::write(store.cookie_path("pinterest"), b"not json").unwrap();

        let result = store.load("pinterest").await;
        assert!(matches!(result, Err(AuthError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_cookie_jar_from_persisted_session() {
        use reqwest::cookie::CookieStore;

        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.persist("pinterest", &sample_cookies()).await.unwrap();

        let jar = store.cookie_jar("pinterest").await.unwrap().unwrap();
        let url = "https://example.com/".parse::<url::Url>().unwrap();
        assert!(jar.cookies(&url).is_some());
    }

    #[tokio::test]
    async fn test_cookie_jar_none_without_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.cookie_jar("pinterest").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_persists_serialize_to_valid_file() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let cookies = vec![CookieRecord::new(
                    format!("c{i}"),
                    "v",
                    ".example.com",
                    "/",
                    0.0,
                    false,
                )];
                store.persist("pinterest", &cookies).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Whichever write won, the file must be a complete valid array.
        let record = store.load("pinterest").await.unwrap().unwrap();
        assert_eq!(record.cookies.len(), 1);
    }

    #[test]
    fn test_cookie_path_is_site_scoped() {
        let store = SessionStore::new("data");
        assert_eq!(
            store.cookie_path("pinterest"),
            PathBuf::from("data/pinterest-cookies.json")
        );
    }
}
