//! Video materialization.
//!
//! Extraction surfaces two video transport shapes: a direct progressive
//! URL, streamed straight to a local file, and an adaptive segmented
//! stream (manifest-style playlist) that an external remux process reads
//! and re-packages into a single file. The remux child is a scoped
//! resource: its handle is released whether it succeeds, fails, or the job
//! is interrupted (`kill_on_drop`).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::fetch::{AssetClient, FetchError};

/// External remux binary.
const REMUX_COMMAND: &str = "ffmpeg";

/// Errors that can occur while materializing a video.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The remux process could not be started (binary missing, not
    /// executable).
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The remux process exited with a non-zero status.
    #[error("remux process exited with {status}")]
    Remux {
        /// The child's exit status display.
        status: String,
    },

    /// The progressive download failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Filesystem error preparing the output location.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Returns true when the URL points at a manifest-style playlist that
/// requires remuxing rather than a progressive download.
#[must_use]
pub fn is_playlist_url(url: &str) -> bool {
    url.contains(".m3u8")
}

/// Materializes a video URL into `<dest_dir>/<artifact_id>.mp4`.
///
/// Progressive URLs stream directly to the file; playlist URLs are handed
/// to the external remux process which concatenates and re-packages the
/// segments.
///
/// # Errors
///
/// Returns [`MaterializeError::Io`] when the destination cannot be
/// prepared, [`MaterializeError::Fetch`] when a progressive download
/// fails, and [`MaterializeError::Spawn`]/[`MaterializeError::Remux`] for
/// remux process failures.
#[instrument(skip(client), fields(url = %url, artifact_id = %artifact_id))]
pub async fn materialize_video(
    client: &AssetClient,
    url: &str,
    dest_dir: &Path,
    artifact_id: &str,
) -> Result<PathBuf, MaterializeError> {
    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| MaterializeError::Io {
            path: dest_dir.to_path_buf(),
            source: e,
        })?;

    let output = dest_dir.join(format!("{artifact_id}.mp4"));

    if is_playlist_url(url) {
        remux_playlist(REMUX_COMMAND, url, &output).await?;
    } else {
        client.fetch_to_file(url, &output, None).await?;
    }

    info!(path = %output.display(), "video materialized");
    Ok(output)
}

/// Runs the remux process over a playlist URL.
///
/// The child handle lives inside this call only; `kill_on_drop` reaps the
/// process if the future is dropped mid-flight.
async fn remux_playlist(
    command: &str,
    url: &str,
    output: &Path,
) -> Result<(), MaterializeError> {
    debug!(command, "starting remux");

    let child = Command::new(command)
        .arg("-y")
        .arg("-i")
        .arg(url)
        .args(["-c", "copy", "-bsf:a", "aac_adtstoasc"])
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MaterializeError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

    let result = child
        .wait_with_output()
        .await
        .map_err(|e| MaterializeError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

    if !result.status.success() {
        let stderr_tail: String = String::from_utf8_lossy(&result.stderr)
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .join(" | ");
        warn!(status = %result.status, stderr = %stderr_tail, "remux failed");
        return Err(MaterializeError::Remux {
            status: result.status.to_string(),
        });
    }

    debug!("remux complete");
    Ok(())
}
