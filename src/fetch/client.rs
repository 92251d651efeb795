//! HTTP client for streaming single-asset fetches.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::REFERER;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::error::FetchError;

/// Connect timeout for asset requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout for asset requests; generous for large pages and videos.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client for streaming asset downloads.
///
/// Created once per job and shared across the worker pool; reqwest's
/// connection pooling makes clones cheap.
#[derive(Debug, Clone)]
pub struct AssetClient {
    client: Client,
}

impl AssetClient {
    /// Creates a client with the given User-Agent.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] when the client cannot be built with
    /// the static configuration.
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        Self::build(user_agent, None)
    }

    /// Creates a client carrying a cookie jar, for assets that must ride an
    /// authenticated session.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] when the client cannot be built.
    pub fn with_cookie_jar(user_agent: &str, jar: Arc<Jar>) -> Result<Self, FetchError> {
        Self::build(user_agent, Some(jar))
    }

    fn build(user_agent: &str, jar: Option<Arc<Jar>>) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .gzip(true)
            .user_agent(user_agent.to_string());
        if let Some(jar) = jar {
            builder = builder.cookie_provider(jar);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::network("(client build)", e))?;
        Ok(Self { client })
    }

    /// Streams one asset to `dest`, returning the byte count.
    ///
    /// The response body is written chunk by chunk — never fully buffered —
    /// so peak memory stays bounded for large galleries. A partial file is
    /// removed when the stream fails mid-write.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] for malformed URLs,
    /// [`FetchError::HttpStatus`] for non-2xx responses,
    /// [`FetchError::Network`] for transport failures, and
    /// [`FetchError::Io`] for filesystem failures.
    #[instrument(skip(self), fields(url = %url, dest = %dest.display()))]
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        referer: Option<&str>,
    ) -> Result<u64, FetchError> {
        Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        let file = File::create(dest)
            .await
            .map_err(|e| FetchError::io(dest, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        let stream_result: Result<(), FetchError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| FetchError::network(url, e))?;
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|e| FetchError::io(dest, e))?;
                bytes_written += chunk.len() as u64;
            }
            writer.flush().await.map_err(|e| FetchError::io(dest, e))
        }
        .await;

        if let Err(e) = stream_result {
            debug!(path = %dest.display(), "removing partial file after stream error");
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e);
        }

        debug!(bytes = bytes_written, "asset fetched");
        Ok(bytes_written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::BROWSER_USER_AGENT;

    #[tokio::test]
    async fn test_fetch_to_file_streams_body() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg bytes"))
            .mount(&server)
            .await;

        let client = AssetClient::new(BROWSER_USER_AGENT).unwrap();
        let dest = dir.path().join("1.jpg");
        let bytes = client
            .fetch_to_file(&format!("{}/1.jpg", server.uri()), &dest, None)
            .await
            .unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_fetch_to_file_sends_referer() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/guarded.jpg"))
            .and(header("Referer", "https://galleries.example/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok"))
            .mount(&server)
            .await;

        let client = AssetClient::new(BROWSER_USER_AGENT).unwrap();
        let dest = dir.path().join("guarded.jpg");
        let result = client
            .fetch_to_file(
                &format!("{}/guarded.jpg", server.uri()),
                &dest,
                Some("https://galleries.example/"),
            )
            .await;

        assert!(result.is_ok(), "expected Ok, got: {result:?}");
    }

    #[tokio::test]
    async fn test_fetch_to_file_non_2xx_is_http_status_error() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = AssetClient::new(BROWSER_USER_AGENT).unwrap();
        let dest = dir.path().join("missing.jpg");
        let result = client
            .fetch_to_file(&format!("{}/missing.jpg", server.uri()), &dest, None)
            .await;

        match result {
            Err(FetchError::HttpStatus { status: 404, .. }) => {}
            other => panic!("expected HttpStatus 404, got: {other:?}"),
        }
        assert!(!dest.exists(), "no file should be created on HTTP error");
    }

    #[tokio::test]
    async fn test_fetch_to_file_invalid_url() {
        let dir = TempDir::new().unwrap();
        let client = AssetClient::new(BROWSER_USER_AGENT).unwrap();
        let result = client
            .fetch_to_file("not-a-url", &dir.path().join("x"), None)
            .await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }
}
