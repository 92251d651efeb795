//! Persisted cookie records and their conversions.
//!
//! The on-disk session file is a JSON array of [`CookieRecord`] read and
//! written wholesale. Records convert in three directions: into CDP cookie
//! parameters (applying a session), from live CDP cookies (capturing after
//! login), and into `Set-Cookie` strings for a `reqwest` jar (asset fetches
//! that must ride the authenticated session).

use std::fmt;
use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::network::{Cookie, CookieParam};
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One persisted cookie.
///
/// The value field is redacted in Debug output to prevent accidental
/// logging of sensitive session data.
#[derive(Clone, Serialize, Deserialize)]
pub struct CookieRecord {
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive — never log).
    value: String,
    /// The domain the cookie belongs to (e.g., `.example.com`).
    pub domain: String,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Unix timestamp for expiry; values <= 0 mean a session cookie.
    pub expires: f64,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
}

impl CookieRecord {
    /// Creates a new cookie record.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
        expires: f64,
        secure: bool,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: path.into(),
            expires,
            secure,
        }
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive — avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Converts the record into a CDP cookie parameter for session application.
    ///
    /// Returns `None` when the builder rejects the record (empty name).
    #[must_use]
    pub fn to_cookie_param(&self) -> Option<CookieParam> {
        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .domain(self.domain.clone())
            .path(self.path.clone())
            .secure(self.secure);

        if self.expires > 0.0 {
            builder = builder.expires(self.expires);
        }

        builder.build().ok()
    }

    /// Builds a `Set-Cookie` header string for jar loading.
    fn to_set_cookie_string(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];
        parts.push(format!("Domain={}", self.domain));
        parts.push(format!("Path={}", self.path));
        if self.secure {
            parts.push("Secure".to_string());
        }
        // expires <= 0 is a session cookie; omit Expires.
        if self.expires > 0.0
            && let Some(http_date) = unix_to_http_date(self.expires)
        {
            parts.push(format!("Expires={http_date}"));
        }
        parts.join("; ")
    }

    /// Builds the origin URL for `Jar::add_cookie_str` domain matching.
    fn origin_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let domain = self.domain.strip_prefix('.').unwrap_or(&self.domain);
        format!("{scheme}://{domain}{}", self.path)
    }
}

impl From<Cookie> for CookieRecord {
    fn from(cookie: Cookie) -> Self {
        Self {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            path: cookie.path,
            expires: cookie.expires,
            secure: cookie.secure,
        }
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for CookieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieRecord")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("expires", &self.expires)
            .field("secure", &self.secure)
            .finish()
    }
}

/// A named site's persisted session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Site identifier the cookies belong to.
    pub site_id: String,
    /// Persisted cookie set, in capture order.
    pub cookies: Vec<CookieRecord>,
    /// Unix timestamp of the last successful validation; `None` means the
    /// set has never passed the lightweight check.
    pub validated_at: Option<u64>,
}

/// Loads persisted cookie records into a `reqwest` cookie jar.
///
/// Records with unparseable origins are skipped with a warning.
#[must_use]
pub fn load_records_into_jar(cookies: &[CookieRecord]) -> Arc<Jar> {
    let jar = Arc::new(Jar::default());

    for cookie in cookies {
        let set_cookie = cookie.to_set_cookie_string();
        match cookie.origin_url().parse::<url::Url>() {
            Ok(origin) => {
                jar.add_cookie_str(&set_cookie, &origin);
                debug!(domain = %cookie.domain, name = %cookie.name, "loaded cookie into jar");
            }
            Err(_) => {
                warn!(
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "skipping cookie with unparseable domain"
                );
            }
        }
    }

    jar
}

/// Converts a Unix timestamp to an HTTP-date string (RFC 7231).
fn unix_to_http_date(timestamp: f64) -> Option<String> {
    use std::time::{Duration, UNIX_EPOCH};

    if !timestamp.is_finite() || timestamp <= 0.0 {
        return None;
    }
    let time = UNIX_EPOCH.checked_add(Duration::from_secs_f64(timestamp))?;
    Some(httpdate::fmt_http_date(time))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    fn record(secure: bool, expires: f64) -> CookieRecord {
        CookieRecord::new("session", "abc123", ".example.com", "/", expires, secure)
    }

    #[test]
    fn test_cookie_record_debug_redacts_value() {
        let cookie = record(false, 0.0);
        let debug_str = format!("{cookie:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(
            !debug_str.contains("abc123"),
            "Debug output must NOT contain the value"
        );
    }

    #[test]
    fn test_set_cookie_string_session_cookie_omits_expires() {
        let s = record(false, 0.0).to_set_cookie_string();
        assert!(s.contains("session=abc123"));
        assert!(s.contains("Domain=.example.com"));
        assert!(!s.contains("Secure"));
        assert!(!s.contains("Expires"));
    }

    #[test]
    fn test_set_cookie_string_with_expiry_and_secure() {
        let s = record(true, 1_700_000_000.0).to_set_cookie_string();
        assert!(s.contains("Secure"));
        assert!(s.contains("Expires="));
    }

    #[test]
    fn test_origin_url_strips_leading_dot() {
        assert_eq!(record(false, 0.0).origin_url(), "http://example.com/");
        assert_eq!(record(true, 0.0).origin_url(), "https://example.com/");
    }

    #[test]
    fn test_load_records_into_jar_domain_matching() {
        let jar = load_records_into_jar(&[record(false, 0.0)]);

        let matching = "http://example.com/page".parse::<url::Url>().unwrap();
        let header = jar.cookies(&matching);
        assert!(header.is_some(), "jar should match the cookie domain");
        assert!(
            header.unwrap().to_str().unwrap().contains("session=abc123"),
            "cookie header should contain the cookie"
        );

        let other = "http://other.com/page".parse::<url::Url>().unwrap();
        assert!(
            jar.cookies(&other).is_none(),
            "jar should NOT match an unrelated domain"
        );
    }

    #[test]
    fn test_session_record_json_round_trip() {
        let record = SessionRecord {
            site_id: "pinterest".to_string(),
            cookies: vec![record(true, 1_700_000_000.0)],
            validated_at: Some(1_700_000_100),
        };
        let json = serde_json::to_string(&record.cookies).unwrap();
        let cookies: Vec<CookieRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[0].value(), "abc123");
    }

    #[test]
    fn test_to_cookie_param_carries_fields() {
        let param = record(true, 1_700_000_000.0).to_cookie_param().unwrap();
        assert_eq!(param.name, "session");
        assert_eq!(param.domain.as_deref(), Some(".example.com"));
        assert_eq!(param.secure, Some(true));
    }
}
