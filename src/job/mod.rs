//! Per-request job orchestration.
//!
//! One request owns one browser session for its whole lifetime. The
//! orchestrator selects the site strategy, establishes the authenticated
//! session where the strategy requires one, runs the extraction, then
//! dispatches on the result kind: videos are materialized locally, photo
//! sets are either returned as URL lists or fetched and assembled into a
//! PDF, single images are returned by reference. Callers always receive a
//! well-formed [`Envelope`] — never a raw error — and the browser session
//! is released on every exit path.

mod envelope;

pub use envelope::{ChapterDocument, Envelope, GalleryDocument, MultiAsset, SingleAsset};

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::assemble::{AssemblyError, assemble_document};
use crate::browser::{BrowserError, BrowserSession};
use crate::config::Config;
use crate::extract::{
    ChapterStrategy, ExtractError, ExtractionResult, ExtractionStrategy, MediaKind, Site,
    StrategyRegistry, build_default_strategy_registry,
};
use crate::fetch::{AssetClient, AssetFetcher, FetchError};
use crate::media::{MaterializeError, materialize_video};
use crate::session::{AuthError, AuthState, SessionStore};

/// Errors fatal to one request.
///
/// Per-asset and per-page failures are recovered inside the pipeline and
/// never reach this type; what does reach it becomes the failure envelope.
#[derive(Debug, Error)]
pub enum JobError {
    /// No strategy is registered for the requested site.
    #[error("unsupported site: {site}")]
    UnsupportedSite {
        /// The requested site identifier.
        site: String,
    },

    /// The caller supplied no usable input.
    #[error("input is required")]
    MissingInput,

    /// The site requires login but no credentials are configured.
    #[error("no credentials configured for {site_id}")]
    MissingCredentials {
        /// The site missing credentials.
        site_id: String,
    },

    /// Staging caller input on disk failed.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Extraction failed (not found, no assets, rejection).
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Session establishment failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The browser session could not be driven.
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// Every asset fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Video materialization failed.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    /// Document assembly failed.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

impl JobError {
    /// Returns true for errors the caller caused (missing/invalid input)
    /// as opposed to pipeline failures; the HTTP layer maps this to the
    /// status class.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            JobError::MissingInput | JobError::UnsupportedSite { .. }
        )
    }
}

/// Per-request coordinator for the extraction and download pipeline.
pub struct Orchestrator {
    config: Config,
    registry: StrategyRegistry,
    session_store: SessionStore,
    chapter: ChapterStrategy,
}

impl Orchestrator {
    /// Creates an orchestrator with the default strategy registry.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = build_default_strategy_registry(&config);
        Self::with_registry(config, registry)
    }

    /// Creates an orchestrator with a custom registry (for tests and
    /// alternate front-end deployments).
    #[must_use]
    pub fn with_registry(config: Config, registry: StrategyRegistry) -> Self {
        let session_store = SessionStore::new(&config.data_dir);
        let chapter = ChapterStrategy::new(&config);
        Self {
            config,
            registry,
            session_store,
            chapter,
        }
    }

    /// Runs one extraction job end to end, returning the result envelope.
    ///
    /// Never returns a raw error: every failure becomes
    /// `{ success: false, message, data: null }`.
    #[instrument(skip(self), fields(site = %site, input = %input))]
    pub async fn run(&self, site: Site, input: &str) -> Envelope {
        if input.trim().is_empty() {
            return Envelope::failure(JobError::MissingInput.to_string());
        }

        match self.execute(site, input).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "job failed");
                Envelope::failure(e.to_string())
            }
        }
    }

    /// Lists a chapter series' index without downloading anything.
    #[instrument(skip(self), fields(url = %series_url))]
    pub async fn run_chapter_list(&self, series_url: &str) -> Envelope {
        if series_url.trim().is_empty() {
            return Envelope::failure(JobError::MissingInput.to_string());
        }

        let session = match BrowserSession::launch(&self.config).await {
            Ok(session) => session,
            Err(e) => return Envelope::failure(e.to_string()),
        };
        let result = self.chapter.chapter_list(&session, series_url).await;
        session.close().await;

        match result {
            Ok(list) => Envelope::ok("chapters found", &list),
            Err(e) => {
                warn!(error = %e, "chapter listing failed");
                Envelope::failure(e.to_string())
            }
        }
    }

    /// Processes a raw image buffer through the upscaling strategy.
    ///
    /// The buffer is staged in a temp file for the strategy's file-input
    /// upload; the temp file is removed on every exit path.
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    pub async fn run_upscale(&self, image: &[u8]) -> Envelope {
        if image.is_empty() {
            return Envelope::failure(JobError::MissingInput.to_string());
        }

        let staged = self
            .config
            .data_dir
            .join("tmp")
            .join(format!("upscale-{}.png", crate::ids::generate_hex_id()));
        if let Err(e) = self.stage_buffer(&staged, image).await {
            return Envelope::failure(e.to_string());
        }

        let envelope = self
            .run(Site::Upscale, &staged.display().to_string())
            .await;

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            warn!(path = %staged.display(), error = %e, "failed to remove staged input");
        }

        envelope
    }

    async fn stage_buffer(&self, path: &std::path::Path, bytes: &[u8]) -> Result<(), JobError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| JobError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        tokio::fs::write(path, bytes).await.map_err(|e| JobError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    async fn execute(&self, site: Site, input: &str) -> Result<Envelope, JobError> {
        let strategy = self
            .registry
            .get(site)
            .ok_or_else(|| JobError::UnsupportedSite {
                site: site.to_string(),
            })?;

        // One browser session per request, closed on every exit path.
        let session = BrowserSession::launch(&self.config).await?;
        let extraction = self.drive(strategy, &session, input).await;
        session.close().await;

        self.complete(strategy, input, extraction?).await
    }

    /// Establishes the authenticated session where required, then runs the
    /// strategy against the live browser session.
    async fn drive(
        &self,
        strategy: &dyn ExtractionStrategy,
        session: &BrowserSession,
        input: &str,
    ) -> Result<ExtractionResult, JobError> {
        if let Some(flow) = strategy.login_flow() {
            let state = self.session_store.load_and_validate(session, &flow).await?;
            if state != AuthState::Authenticated {
                info!(site_id = %flow.site_id, ?state, "session not authenticated, logging in");
                let credentials = self.config.credentials_for(&flow.site_id).ok_or_else(|| {
                    JobError::MissingCredentials {
                        site_id: flow.site_id.clone(),
                    }
                })?;
                self.session_store
                    .login(session, &flow, credentials)
                    .await?;
            }
        }

        Ok(strategy.extract(session, input).await?)
    }

    /// Completes a job from an extraction result: fetch, materialize or
    /// assemble, and build the envelope.
    ///
    /// Public so callers that already hold an extraction result (and the
    /// pipeline tests) can exercise the download/assembly half without a
    /// browser.
    ///
    /// # Errors
    ///
    /// Returns the fatal pipeline errors described on [`JobError`].
    pub async fn complete(
        &self,
        strategy: &dyn ExtractionStrategy,
        input: &str,
        extraction: ExtractionResult,
    ) -> Result<Envelope, JobError> {
        let site = strategy.site();

        let Some(first) = extraction.assets.first() else {
            return Err(JobError::Extract(ExtractError::NoAssets {
                reason: "extraction produced an empty asset list".to_string(),
            }));
        };

        // An unclassifiable kind never reaches the caller as data.
        if extraction.kind == MediaKind::Unknown {
            return Err(JobError::Extract(ExtractError::NoAssets {
                reason: "media kind could not be determined".to_string(),
            }));
        }

        let artifact_id = strategy
            .artifact_id(input)
            .unwrap_or_else(crate::ids::generate_hex_id);
        let site_dir = self.config.public_root.join(site.id()).join(&artifact_id);

        match extraction.kind {
            MediaKind::Video => {
                let client = AssetClient::new(&self.config.user_agent)?;
                let output =
                    materialize_video(&client, &first.source_url, &site_dir, &artifact_id).await?;
                let file_name = output
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{artifact_id}.mp4"));
                Ok(Envelope::ok(
                    "video downloaded",
                    &SingleAsset {
                        kind: MediaKind::Video,
                        url: format!("/downloads/{}/{artifact_id}/{file_name}", site.id()),
                    },
                ))
            }

            MediaKind::PhotoSet if strategy.assembles_document() => {
                self.fetch_and_assemble(strategy, &extraction, &site_dir, &artifact_id)
                    .await
            }

            MediaKind::PhotoSet => Ok(Envelope::ok(
                "photo download links found",
                &MultiAsset {
                    kind: MediaKind::PhotoSet,
                    urls: extraction
                        .assets
                        .iter()
                        .map(|asset| asset.source_url.clone())
                        .collect(),
                },
            )),

            MediaKind::Image | MediaKind::Gif => Ok(Envelope::ok(
                format!("{} found", extraction.kind),
                &SingleAsset {
                    kind: extraction.kind,
                    url: first.source_url.clone(),
                },
            )),

            MediaKind::Unknown => unreachable!("rejected above"),
        }
    }

    /// Fetches a photo set and assembles it into one PDF.
    async fn fetch_and_assemble(
        &self,
        strategy: &dyn ExtractionStrategy,
        extraction: &ExtractionResult,
        site_dir: &std::path::Path,
        artifact_id: &str,
    ) -> Result<Envelope, JobError> {
        let site = strategy.site();
        let client = AssetClient::new(&self.config.user_agent)?;
        let fetcher = AssetFetcher::new(client, self.config.fetch_concurrency)?;

        let referer = strategy.asset_referer();
        let manifest = fetcher
            .download_all(&extraction.assets, site_dir, referer.as_deref())
            .await?;

        // Assembly is CPU- and file-bound; keep it off the async workers.
        let entries = manifest.entries().to_vec();
        let dest = site_dir.to_path_buf();
        let id = artifact_id.to_string();
        let output = tokio::task::spawn_blocking(move || assemble_document(&entries, &dest, &id))
            .await
            .map_err(|e| {
                JobError::Assembly(AssemblyError::Io {
                    path: site_dir.to_path_buf(),
                    source: std::io::Error::other(e),
                })
            })??;

        let total_pages = manifest.success_count();
        let pdf_url = format!(
            "/downloads/{}/{artifact_id}/{}",
            site.id(),
            output
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{artifact_id}.pdf")),
        );

        match site {
            Site::Chapter => Ok(Envelope::ok(
                "chapter downloaded successfully",
                &ChapterDocument {
                    chapter_id: artifact_id.to_string(),
                    total_images: total_pages,
                    pdf_url,
                },
            )),
            _ => Ok(Envelope::ok(
                "PDF created successfully",
                &GalleryDocument {
                    code: artifact_id.to_string(),
                    total_pages,
                    pdf_url,
                },
            )),
        }
    }
}
