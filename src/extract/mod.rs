//! Site-specific extraction strategies.
//!
//! Each source site gets one hand-written strategy encoding its navigation
//! sequence, input-submission mechanism, ready condition, and the DOM query
//! that turns matched nodes into asset references. Strategies are selected
//! through a [`StrategyRegistry`] keyed by [`Site`], so per-site fragility
//! stays isolated and swappable without touching the orchestrator.
//!
//! # Architecture
//!
//! - [`ExtractionStrategy`] - async trait concrete strategies implement
//! - [`StrategyRegistry`] - site-keyed collection with deterministic build order
//! - [`ExtractionResult`] / [`AssetRef`] - the typed extraction output
//! - [`TiktokStrategy`], [`TwitterStrategy`], [`InstagramStrategy`],
//!   [`PinterestStrategy`], [`GalleryStrategy`], [`ChapterStrategy`],
//!   [`UpscaleStrategy`] - one per source site

mod chapter;
mod gallery;
mod instagram;
mod pinterest;
mod tiktok;
mod twitter;
mod upscale;

pub use chapter::{ChapterEntry, ChapterList, ChapterStrategy};
pub use gallery::GalleryStrategy;
pub use instagram::InstagramStrategy;
pub use pinterest::PinterestStrategy;
pub use tiktok::TiktokStrategy;
pub use twitter::TwitterStrategy;
pub use upscale::UpscaleStrategy;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::browser::{BrowserError, BrowserSession};
use crate::config::Config;
use crate::session::LoginFlow;

/// Identifier for a supported source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    /// Short-video front end driven by URL submission.
    Tiktok,
    /// Tweet media front end driven by URL submission.
    Twitter,
    /// Instagram post front end driven by URL submission.
    Instagram,
    /// Pinterest pins, extracted from the authenticated site itself.
    Pinterest,
    /// Code-addressed image gallery assembled into a PDF.
    Gallery,
    /// Chapter-based image series assembled into a PDF.
    Chapter,
    /// Raw-image-in, upscaled-image-out processing front end.
    Upscale,
}

impl Site {
    /// Stable identifier used for output subdirectories and session files.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Site::Tiktok => "tiktok",
            Site::Twitter => "twitter",
            Site::Instagram => "instagram",
            Site::Pinterest => "pinterest",
            Site::Gallery => "gallery",
            Site::Chapter => "chapter",
            Site::Upscale => "upscale",
        }
    }

    /// Parses a site identifier.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tiktok" => Some(Site::Tiktok),
            "twitter" | "x" => Some(Site::Twitter),
            "instagram" => Some(Site::Instagram),
            "pinterest" => Some(Site::Pinterest),
            "gallery" => Some(Site::Gallery),
            "chapter" => Some(Site::Chapter),
            "upscale" => Some(Site::Upscale),
            _ => None,
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Classification of an extraction result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// A single video.
    Video,
    /// A single animated GIF.
    Gif,
    /// A single still image.
    Image,
    /// An ordered set of photos.
    #[serde(rename = "photo")]
    PhotoSet,
    /// Kind could not be determined. Never reaches the caller: the
    /// orchestrator converts it to a failure when no asset is usable.
    Unknown,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Video => "video",
            MediaKind::Gif => "gif",
            MediaKind::Image => "image",
            MediaKind::PhotoSet => "photo",
            MediaKind::Unknown => "unknown",
        })
    }
}

/// One remote media asset referenced by an extraction result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    /// The remote URL to fetch.
    pub source_url: String,
    /// 1-based position defining final page/ordering; unique within one
    /// extraction result and stable across download completion order.
    pub ordinal: u32,
    /// Width hint from the source page, when it exposes one.
    pub width: Option<u32>,
    /// Height hint from the source page, when it exposes one.
    pub height: Option<u32>,
}

impl AssetRef {
    /// Creates an asset reference without dimension hints.
    #[must_use]
    pub fn new(source_url: impl Into<String>, ordinal: u32) -> Self {
        Self {
            source_url: source_url.into(),
            ordinal,
            width: None,
            height: None,
        }
    }

    /// Attaches dimension hints.
    #[must_use]
    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Typed output of one extraction.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Result classification.
    pub kind: MediaKind,
    /// Ordered asset references; non-empty on success.
    pub assets: Vec<AssetRef>,
}

impl ExtractionResult {
    /// Creates a single-asset result.
    #[must_use]
    pub fn single(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            assets: vec![AssetRef::new(url, 1)],
        }
    }

    /// Creates a photo-set result, assigning ordinals by position.
    #[must_use]
    pub fn photo_set(urls: Vec<String>) -> Self {
        Self {
            kind: MediaKind::PhotoSet,
            assets: urls
                .into_iter()
                .enumerate()
                .map(|(idx, url)| AssetRef::new(url, idx as u32 + 1))
                .collect(),
        }
    }
}

/// Errors produced by extraction strategies.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The ready condition never held: the remote content is absent or the
    /// page layout changed. Surfaced to callers as "not found", not as an
    /// internal error.
    #[error("notfound")]
    NotFound,

    /// The ready condition held but no usable asset could be extracted.
    #[error("no usable assets extracted: {reason}")]
    NoAssets {
        /// What the strategy was looking for.
        reason: String,
    },

    /// The remote side rejected the content terminally (e.g. an error
    /// banner); carries the site's own message.
    #[error("{reason}")]
    Rejected {
        /// Message extracted from the rejection signal.
        reason: String,
    },

    /// Filesystem error while staging input or collecting an artifact.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: std::path::PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A browser operation failed (navigation, evaluation, input).
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Compiles a static, programmer-authored regex.
///
/// Static patterns are part of the source; a failure to compile is a
/// programming error, not a runtime condition.
#[allow(clippy::expect_used)]
pub(crate) fn compile_static_regex(pattern: &str) -> regex::Regex {
    regex::Regex::new(pattern).expect("static regex must compile")
}

/// Waits for a strategy's ready selector, mapping a timeout to
/// [`ExtractError::NotFound`] while keeping other browser failures intact.
pub(crate) async fn await_ready(
    session: &BrowserSession,
    selector: &str,
    timeout: Duration,
) -> Result<(), ExtractError> {
    match session.wait_for_selector(selector, timeout).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_selector_timeout() => Err(ExtractError::NotFound),
        Err(e) => Err(ExtractError::Browser(e)),
    }
}

/// Trait that all site strategies implement.
///
/// # Object Safety
///
/// Uses `async_trait` to support dynamic dispatch via
/// `Box<dyn ExtractionStrategy>`; the registry pattern requires it.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Returns the site this strategy handles.
    fn site(&self) -> Site;

    /// Returns the login flow when this site requires an authenticated
    /// session before extraction.
    fn login_flow(&self) -> Option<LoginFlow> {
        None
    }

    /// Returns true when this strategy's photo sets are assembled into one
    /// paginated document rather than returned as raw URLs.
    fn assembles_document(&self) -> bool {
        false
    }

    /// Returns the content identifier derived from the input (gallery code,
    /// chapter id), when the site has one. `None` means the orchestrator
    /// generates an identifier.
    fn artifact_id(&self, _input: &str) -> Option<String> {
        None
    }

    /// Referer header required by the site's asset host, if any.
    fn asset_referer(&self) -> Option<String> {
        None
    }

    /// Drives the supplied browser session to produce an extraction result.
    async fn extract(
        &self,
        session: &BrowserSession,
        input: &str,
    ) -> Result<ExtractionResult, ExtractError>;
}

/// Site-keyed collection of strategies.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Registers a strategy. Later registrations for the same site shadow
    /// earlier ones, which keeps test overrides simple.
    pub fn register(&mut self, strategy: Box<dyn ExtractionStrategy>) {
        self.strategies.push(strategy);
    }

    /// Returns the strategy for a site, preferring the most recent
    /// registration.
    #[must_use]
    pub fn get(&self, site: Site) -> Option<&dyn ExtractionStrategy> {
        self.strategies
            .iter()
            .rev()
            .find(|s| s.site() == site)
            .map(AsRef::as_ref)
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true when no strategies are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the default registry with every supported site, in deterministic
/// order.
#[must_use]
pub fn build_default_strategy_registry(config: &Config) -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry.register(Box::new(TiktokStrategy::new(config)));
    registry.register(Box::new(TwitterStrategy::new(config)));
    registry.register(Box::new(InstagramStrategy::new(config)));
    registry.register(Box::new(PinterestStrategy::new(config)));
    registry.register(Box::new(GalleryStrategy::new(config)));
    registry.register(Box::new(ChapterStrategy::new(config)));
    registry.register(Box::new(UpscaleStrategy::new(config)));
    registry
}

/// Best-effort media-kind inference from URL tokens.
///
/// Matches the tokens "video", "gif", "image" in that order, first match
/// wins. This is not authoritative — it preserves the observed behavior of
/// classifying by URL shape rather than by response headers.
#[must_use]
pub fn infer_kind_from_url(url: &str) -> MediaKind {
    if url.contains("video") {
        MediaKind::Video
    } else if url.contains("gif") {
        MediaKind::Gif
    } else if url.contains("image") {
        MediaKind::Image
    } else {
        MediaKind::Unknown
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_site_parse_round_trip() {
        for site in [
            Site::Tiktok,
            Site::Twitter,
            Site::Instagram,
            Site::Pinterest,
            Site::Gallery,
            Site::Chapter,
            Site::Upscale,
        ] {
            assert_eq!(Site::parse(site.id()), Some(site));
        }
        assert_eq!(Site::parse("x"), Some(Site::Twitter));
        assert_eq!(Site::parse("unknown-site"), None);
    }

    #[test]
    fn test_photo_set_assigns_sequential_ordinals() {
        let result = ExtractionResult::photo_set(vec![
            "https://a/1.jpg".to_string(),
            "https://a/2.jpg".to_string(),
            "https://a/3.jpg".to_string(),
        ]);
        assert_eq!(result.kind, MediaKind::PhotoSet);
        let ordinals: Vec<u32> = result.assets.iter().map(|a| a.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_infer_kind_from_url_token_priority() {
        assert_eq!(
            infer_kind_from_url("https://cdn.example/video/abc.mp4"),
            MediaKind::Video
        );
        assert_eq!(
            infer_kind_from_url("https://cdn.example/tweet_gif/abc"),
            MediaKind::Gif
        );
        assert_eq!(
            infer_kind_from_url("https://cdn.example/image/abc.jpg"),
            MediaKind::Image
        );
        assert_eq!(
            infer_kind_from_url("https://cdn.example/media/abc"),
            MediaKind::Unknown
        );
        // "video" wins over "gif" when both appear.
        assert_eq!(
            infer_kind_from_url("https://cdn.example/video/from_gif"),
            MediaKind::Video
        );
    }

    #[test]
    fn test_registry_latest_registration_wins() {
        struct Fake(Site);

        #[async_trait]
        impl ExtractionStrategy for Fake {
            fn site(&self) -> Site {
                self.0
            }
            async fn extract(
                &self,
                _session: &BrowserSession,
                _input: &str,
            ) -> Result<ExtractionResult, ExtractError> {
                Err(ExtractError::NotFound)
            }
        }

        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(Fake(Site::Tiktok)));
        registry.register(Box::new(Fake(Site::Tiktok)));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(Site::Tiktok).is_some());
        assert!(registry.get(Site::Pinterest).is_none());
    }

    #[test]
    fn test_default_registry_covers_all_sites() {
        let registry = build_default_strategy_registry(&Config::default());
        for site in [
            Site::Tiktok,
            Site::Twitter,
            Site::Instagram,
            Site::Pinterest,
            Site::Gallery,
            Site::Chapter,
            Site::Upscale,
        ] {
            assert!(registry.get(site).is_some(), "missing strategy for {site}");
        }
    }

    #[test]
    fn test_not_found_displays_as_notfound() {
        assert_eq!(ExtractError::NotFound.to_string(), "notfound");
    }
}
