//! Bounded concurrent asset fetching with per-asset failure isolation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::extract::AssetRef;

use super::client::AssetClient;
use super::error::FetchError;
use super::manifest::{DownloadManifest, ManifestEntry};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 10;

/// Fallback extension when the asset URL path carries none.
const DEFAULT_EXTENSION: &str = "jpg";

/// Concurrent asset downloader.
///
/// # Concurrency Model
///
/// - Each asset fetch runs in its own Tokio task
/// - A semaphore permit bounds the fan-out width; a gallery with N images
///   never holds more than `concurrency` connections
/// - Permits are released automatically when fetches complete (RAII)
/// - Fan-in joins every task before the manifest is built; ordering is
///   restored from each asset's ordinal, not from completion order
///
/// # Failure Isolation
///
/// One asset's failure is recorded in its manifest entry and does not abort
/// sibling fetches. Only zero successes fails the job as a whole.
#[derive(Debug)]
pub struct AssetFetcher {
    client: AssetClient,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl AssetFetcher {
    /// Creates a fetcher with the specified concurrency limit.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    pub fn new(client: AssetClient, concurrency: usize) -> Result<Self, FetchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(FetchError::InvalidConcurrency { value: concurrency });
        }

        debug!(concurrency, "creating asset fetcher");
        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetches every asset into `dest_dir`, producing the job manifest.
    ///
    /// Target filenames are `<ordinal>.<ext>` — deterministic within the
    /// job and directly indexable by page number.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] when the destination directory cannot be
    /// created and [`FetchError::AllFailed`] when not a single asset
    /// fetched successfully. Individual fetch failures do NOT error; they
    /// are recorded in the manifest.
    #[instrument(skip(self, assets), fields(count = assets.len(), dest = %dest_dir.display()))]
    pub async fn download_all(
        &self,
        assets: &[AssetRef],
        dest_dir: &Path,
        referer: Option<&str>,
    ) -> Result<DownloadManifest, FetchError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| FetchError::io(dest_dir, e))?;

        let mut handles = Vec::with_capacity(assets.len());

        for asset in assets {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| FetchError::AllFailed {
                    attempted: assets.len(),
                })?;

            let client = self.client.clone();
            let asset = asset.clone();
            let referer = referer.map(ToString::to_string);
            let dest = dest_dir.join(asset_filename(&asset));

            handles.push(tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;

                let result = client
                    .fetch_to_file(&asset.source_url, &dest, referer.as_deref())
                    .await;

                match result {
                    Ok(bytes) => {
                        debug!(ordinal = asset.ordinal, bytes, "asset fetched");
                        ManifestEntry {
                            ordinal: asset.ordinal,
                            local_path: dest,
                            byte_size: bytes,
                            error: None,
                            width: asset.width,
                            height: asset.height,
                        }
                    }
                    Err(e) => {
                        warn!(
                            ordinal = asset.ordinal,
                            url = %asset.source_url,
                            error = %e,
                            "asset fetch failed"
                        );
                        ManifestEntry {
                            ordinal: asset.ordinal,
                            local_path: dest,
                            byte_size: 0,
                            error: Some(e.to_string()),
                            width: asset.width,
                            height: asset.height,
                        }
                    }
                }
            }));
        }

        let mut entries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "fetch task panicked"),
            }
        }

        let manifest = DownloadManifest::new(entries);
        let succeeded = manifest.success_count();
        info!(
            succeeded,
            failed = manifest.len() - succeeded,
            "asset fetch complete"
        );

        if succeeded == 0 {
            return Err(FetchError::AllFailed {
                attempted: assets.len(),
            });
        }

        Ok(manifest)
    }
}

/// Derives the deterministic target filename for an asset.
fn asset_filename(asset: &AssetRef) -> PathBuf {
    PathBuf::from(format!(
        "{}.{}",
        asset.ordinal,
        extension_from_url(&asset.source_url)
    ))
}

/// Extracts a plausible file extension from a URL path, defaulting to jpg.
fn extension_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            Path::new(parsed.path())
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
        })
        .filter(|ext| {
            ext.len() <= 4 && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::config::BROWSER_USER_AGENT;

    fn client() -> AssetClient {
        AssetClient::new(BROWSER_USER_AGENT).unwrap()
    }

    #[test]
    fn test_fetcher_rejects_invalid_concurrency() {
        assert!(matches!(
            AssetFetcher::new(client(), 0),
            Err(FetchError::InvalidConcurrency { value: 0 })
        ));
        assert!(matches!(
            AssetFetcher::new(client(), 101),
            Err(FetchError::InvalidConcurrency { value: 101 })
        ));
        assert_eq!(AssetFetcher::new(client(), 10).unwrap().concurrency(), 10);
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_from_url("https://cdn.example/g/1/7.png"), "png");
        assert_eq!(extension_from_url("https://cdn.example/clip.mp4"), "mp4");
        assert_eq!(extension_from_url("https://cdn.example/page"), "jpg");
        assert_eq!(
            extension_from_url("https://cdn.example/file.longextension"),
            "jpg"
        );
        assert_eq!(extension_from_url("not a url"), "jpg");
    }

    #[test]
    fn test_asset_filename_is_ordinal_keyed() {
        let asset = AssetRef::new("https://cdn.example/abc/photo.webp", 7);
        assert_eq!(asset_filename(&asset), PathBuf::from("7.webp"));
    }
}
