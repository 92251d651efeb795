//! Image upscaling through a browser-driven processing front end.
//!
//! The only strategy whose input is a local file rather than a URL or code:
//! the orchestrator stages the caller's raw image buffer in a temp file and
//! passes its path as the input. The front end processes asynchronously
//! with no completion event, so the polling supervisor drives two waits:
//! first for the download control to become enabled (or an error banner to
//! appear, which is a terminal rejection), then for the processed file to
//! land in the browser's download directory, from where it is moved under
//! the public root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::browser::BrowserSession;
use crate::config::Config;
use crate::poll::{PollError, PollPolicy, ProbeOutcome, poll_until};

use super::{ExtractError, ExtractionResult, ExtractionStrategy, MediaKind, Site, await_ready};

const DEFAULT_BASE_URL: &str = "https://www.nightmare-ai.com/ai-image-upscaler";

const FILE_INPUT_SELECTOR: &str = r#"input[type="file"]"#;
const PROCESS_BUTTON_SELECTOR: &str = "button.bg-primary";

/// Time allowed for the upload to register before processing can start.
const UPLOAD_SETTLE: Duration = Duration::from_secs(3);

/// Initial processing time before the first download-control probe.
const PROCESSING_SETTLE: Duration = Duration::from_secs(5);

/// The processed file appears in the download directory within seconds of
/// the control click, so this poll runs tighter than the control wait.
const DOWNLOAD_WATCH_POLICY: PollPolicy = PollPolicy {
    max_attempts: 30,
    interval: Duration::from_secs(1),
};

/// Probes the result area: an error banner is a terminal rejection, the
/// enabled download control (identified by its distinguishing utility
/// classes) means the artifact is ready.
const RESULT_PROBE_JS: &str = r#"
(() => {
    const alert = document.querySelector('div[role="alert"]');
    if (alert) {
        const span = alert.querySelector('span');
        return { state: 'rejected', message: span ? span.textContent : 'error processing image' };
    }
    const button = document.querySelector('button.bg-primary.mt-4');
    if (button && button.offsetParent !== null && !button.disabled) {
        return { state: 'ready', message: '' };
    }
    return { state: 'pending', message: '' };
})()
"#;

#[derive(Debug, Deserialize)]
struct ResultProbe {
    state: String,
    message: String,
}

/// Strategy for the image upscaling front end.
#[derive(Debug)]
pub struct UpscaleStrategy {
    base_url: String,
    public_root: PathBuf,
    download_dir: PathBuf,
    poll: PollPolicy,
}

impl UpscaleStrategy {
    /// Creates the strategy against the production front end.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            public_root: config.public_root.clone(),
            download_dir: config.browser_download_dir.clone(),
            poll: config.poll.clone(),
        }
    }

    /// Creates the strategy against a custom front-end URL (for tests).
    #[must_use]
    pub fn with_base_url(config: &Config, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::new(config)
        }
    }
}

#[async_trait]
impl ExtractionStrategy for UpscaleStrategy {
    fn site(&self) -> Site {
        Site::Upscale
    }

    #[instrument(skip(self, session, input))]
    async fn extract(
        &self,
        session: &BrowserSession,
        input: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        let staged = Path::new(input);
        session.navigate(&self.base_url).await?;

        session.set_file_input(FILE_INPUT_SELECTOR, staged).await?;
        tokio::time::sleep(UPLOAD_SETTLE).await;

        await_ready(session, PROCESS_BUTTON_SELECTOR, Duration::from_secs(10)).await?;
        session.click(PROCESS_BUTTON_SELECTOR).await?;
        tokio::time::sleep(PROCESSING_SETTLE).await;

        // Processing finishes at an unpredictable time with no push signal;
        // wait for the download control (or a rejection banner).
        let cancel = CancellationToken::new();
        poll_until(&self.poll, &cancel, || async {
            let probe: ResultProbe = session.eval(RESULT_PROBE_JS).await?;
            Ok::<_, crate::browser::BrowserError>(match probe.state.as_str() {
                "ready" => ProbeOutcome::Ready(()),
                "rejected" => ProbeOutcome::Rejected(probe.message),
                _ => ProbeOutcome::Pending,
            })
        })
        .await
        .map_err(map_poll_error)?;

        // Snapshot the download directory, trigger the download, then watch
        // for the new file to appear.
        let before = list_dir(&self.download_dir).map_err(|e| io_error(&self.download_dir, e))?;
        session.click("button.bg-primary.mt-4").await?;

        let downloaded = poll_until(&DOWNLOAD_WATCH_POLICY, &cancel, || {
            let before = before.clone();
            async move {
                let after = list_dir(&self.download_dir)?;
                Ok::<_, std::io::Error>(
                    after
                        .into_iter()
                        .find(|name| !before.contains(name))
                        .map_or(ProbeOutcome::Pending, ProbeOutcome::Ready),
                )
            }
        })
        .await
        .map_err(map_poll_error)?;

        info!(file = %downloaded, "processed artifact downloaded");
        let relative = self.collect_artifact(&downloaded).await?;

        Ok(ExtractionResult::single(MediaKind::Image, relative))
    }
}

impl UpscaleStrategy {
    /// Moves the downloaded file under the public root with a generated
    /// name, returning the relative serving path.
    async fn collect_artifact(&self, downloaded_name: &str) -> Result<String, ExtractError> {
        let source = self.download_dir.join(downloaded_name);
        let file_name = format!("upscaled_{}.png", crate::ids::generate_hex_id());
        let target_dir = self.public_root.join(Site::Upscale.id());
        let target = target_dir.join(&file_name);

        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| io_error(&target_dir, e))?;
        // Copy + delete rather than rename: the browser download directory
        // may live on another filesystem.
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| io_error(&target, e))?;
        if let Err(e) = tokio::fs::remove_file(&source).await {
            debug!(path = %source.display(), error = %e, "could not remove browser download");
        }

        Ok(format!("/downloads/{}/{file_name}", Site::Upscale.id()))
    }
}

/// Lists the file names in a directory (missing directory reads as empty).
fn list_dir(dir: &Path) -> Result<Vec<String>, std::io::Error> {
    match std::fs::read_dir(dir) {
        Ok(entries) => Ok(entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn map_poll_error(error: PollError) -> ExtractError {
    match error {
        PollError::Rejected { reason } => ExtractError::Rejected { reason },
        other => ExtractError::NoAssets {
            reason: other.to_string(),
        },
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ExtractError {
    ExtractError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_list_dir_missing_directory_reads_empty() {
        let names = list_dir(Path::new("/nonexistent/mediagrab-test")).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_map_poll_error_keeps_rejection_distinct() {
        let rejected = map_poll_error(PollError::Rejected {
            reason: "can not upscale image".to_string(),
        });
        assert!(matches!(rejected, ExtractError::Rejected { .. }));

        let timeout = map_poll_error(PollError::Timeout { attempts: 20 });
        assert!(matches!(timeout, ExtractError::NoAssets { .. }));
    }
}
