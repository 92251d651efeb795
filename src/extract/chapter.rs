//! Chapter-series extraction: chapter index listing and per-chapter pages.
//!
//! Two operations share this strategy: listing a series' chapter index
//! (no download, just the ordered catalogue) and extracting one chapter's
//! page images for assembly into a PDF named after the chapter identifier.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::browser::BrowserSession;
use crate::config::Config;

use super::{
    AssetRef, ExtractError, ExtractionResult, ExtractionStrategy, MediaKind, Site, await_ready,
};

const DEFAULT_BASE_URL: &str = "https://doujindesu.tv";

const LIST_READY_SELECTOR: &str = "#chapter_list ul";
const PAGES_READY_SELECTOR: &str = "#anu";

static CHAPTER_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| super::compile_static_regex(r"(?i)Chapter\s+(\d+)"));

const COLLECT_CHAPTERS_JS: &str = r#"
(() => {
    const list = document.querySelector('#chapter_list ul');
    if (!list) return [];
    const items = [];
    list.querySelectorAll('li').forEach((item) => {
        const link = item.querySelector('a');
        if (!link) return;
        items.push({
            title: link.getAttribute('title') || link.textContent.trim(),
            href: link.getAttribute('href') || '',
        });
    });
    return items;
})()
"#;

const COLLECT_PAGES_JS: &str = r#"
(() => {
    const container = document.querySelector('#anu');
    if (!container) return [];
    const images = [];
    container.querySelectorAll('img#imagech').forEach((img) => {
        const src = img.getAttribute('src');
        if (src) images.push(src);
    });
    return images;
})()
"#;

#[derive(Debug, Deserialize)]
struct ChapterNode {
    title: String,
    href: String,
}

/// One entry in a series' chapter index.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterEntry {
    /// Chapter title as shown on the index page.
    pub title: String,
    /// Chapter number parsed from the title, when it carries one.
    pub chapter: Option<String>,
    /// Absolute chapter URL.
    pub url: String,
}

/// Ordered chapter index for a series.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterList {
    /// Number of chapters in the index.
    pub total_chapters: usize,
    /// Chapters in ascending order.
    pub chapters: Vec<ChapterEntry>,
}

/// Strategy for chapter-based series.
#[derive(Debug)]
pub struct ChapterStrategy {
    base_url: String,
    selector_timeout: Duration,
}

impl ChapterStrategy {
    /// Creates the strategy against the production site.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            selector_timeout: config.selector_timeout,
        }
    }

    /// Creates the strategy against a custom site URL (for tests).
    #[must_use]
    pub fn with_base_url(config: &Config, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            selector_timeout: config.selector_timeout,
        }
    }

    /// Reads a series page's chapter index without downloading anything.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::NotFound`] when the index never renders and
    /// browser errors from navigation or evaluation.
    #[instrument(skip(self, session), fields(url = %series_url))]
    pub async fn chapter_list(
        &self,
        session: &BrowserSession,
        series_url: &str,
    ) -> Result<ChapterList, ExtractError> {
        session.navigate(series_url).await?;
        await_ready(session, LIST_READY_SELECTOR, self.selector_timeout).await?;

        let nodes: Vec<ChapterNode> = session.eval(COLLECT_CHAPTERS_JS).await?;
        if nodes.is_empty() {
            return Err(ExtractError::NoAssets {
                reason: "chapter index rendered without entries".to_string(),
            });
        }

        let mut chapters: Vec<ChapterEntry> = nodes
            .into_iter()
            .map(|node| ChapterEntry {
                chapter: CHAPTER_NUMBER_RE
                    .captures(&node.title)
                    .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string())),
                url: absolutize(&self.base_url, &node.href),
                title: node.title,
            })
            .collect();
        // The index lists newest first; callers expect ascending order.
        chapters.reverse();

        debug!(total = chapters.len(), "collected chapter index");
        Ok(ChapterList {
            total_chapters: chapters.len(),
            chapters,
        })
    }
}

#[async_trait]
impl ExtractionStrategy for ChapterStrategy {
    fn site(&self) -> Site {
        Site::Chapter
    }

    fn assembles_document(&self) -> bool {
        true
    }

    fn artifact_id(&self, input: &str) -> Option<String> {
        chapter_id_from_url(input)
    }

    fn asset_referer(&self) -> Option<String> {
        Some(format!("{}/", self.base_url.trim_end_matches('/')))
    }

    #[instrument(skip(self, session), fields(url = %input))]
    async fn extract(
        &self,
        session: &BrowserSession,
        input: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        session.navigate(input).await?;
        await_ready(session, PAGES_READY_SELECTOR, self.selector_timeout).await?;

        let urls: Vec<String> = session.eval(COLLECT_PAGES_JS).await?;
        debug!(pages = urls.len(), "collected chapter pages");

        if urls.is_empty() {
            return Err(ExtractError::NoAssets {
                reason: "chapter reader rendered without page images".to_string(),
            });
        }

        let assets = urls
            .into_iter()
            .enumerate()
            .map(|(idx, url)| AssetRef::new(url, idx as u32 + 1))
            .collect();

        Ok(ExtractionResult {
            kind: MediaKind::PhotoSet,
            assets,
        })
    }
}

/// Derives the chapter identifier from the last non-empty URL path segment.
fn chapter_id_from_url(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_end_matches('/');
    let candidate = Url::parse(trimmed)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back().map(String::from))
        })
        .or_else(|| trimmed.rsplit('/').next().map(String::from))?;
    (!candidate.is_empty()).then_some(candidate)
}

/// Absolutizes a possibly relative href against the site base.
fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}{href}", base_url.trim_end_matches('/'))
    }
}
