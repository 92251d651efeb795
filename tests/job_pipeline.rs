//! End-to-end pipeline scenarios from an extraction result forward.
//!
//! These exercise the orchestrator's download/materialize/assemble half
//! through `Orchestrator::complete`, with stub strategies standing in for
//! the browser-driven extraction phase.

use std::io::Cursor;

use async_trait::async_trait;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mediagrab_core::browser::BrowserSession;
use mediagrab_core::extract::{
    AssetRef, ExtractError, ExtractionResult, ExtractionStrategy, MediaKind, Site,
    StrategyRegistry,
};
use mediagrab_core::{Config, Orchestrator};

/// Stub standing in for a browser-driven strategy; `extract` is never
/// called on the `complete` path.
struct StubStrategy {
    site: Site,
    assembles: bool,
    artifact_id: Option<String>,
}

#[async_trait]
impl ExtractionStrategy for StubStrategy {
    fn site(&self) -> Site {
        self.site
    }

    fn assembles_document(&self) -> bool {
        self.assembles
    }

    fn artifact_id(&self, _input: &str) -> Option<String> {
        self.artifact_id.clone()
    }

    async fn extract(
        &self,
        _session: &BrowserSession,
        _input: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        unreachable!("pipeline tests enter at complete()")
    }
}

fn orchestrator(public_root: &std::path::Path) -> Orchestrator {
    let config = Config {
        public_root: public_root.to_path_buf(),
        data_dir: public_root.join("data"),
        ..Config::default()
    };
    Orchestrator::with_registry(config, StrategyRegistry::new())
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([200, 100, 50]),
    ));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn scenario_video_extraction_materializes_one_file() {
    let server = MockServer::start().await;
    let root = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4 payload".to_vec()))
        .mount(&server)
        .await;

    let strategy = StubStrategy {
        site: Site::Tiktok,
        assembles: false,
        artifact_id: Some("vid1".to_string()),
    };
    let extraction =
        ExtractionResult::single(MediaKind::Video, format!("{}/clip.mp4", server.uri()));

    let envelope = orchestrator(root.path())
        .complete(&strategy, "https://t.example/v/1", extraction)
        .await
        .unwrap();

    assert!(envelope.success);
    let data = envelope.data.unwrap();
    assert_eq!(data["type"], "video");
    assert_eq!(data["url"], "/downloads/tiktok/vid1/vid1.mp4");

    let local = root.path().join("tiktok/vid1/vid1.mp4");
    assert_eq!(std::fs::read(&local).unwrap(), b"mp4 payload");
}

#[tokio::test]
async fn scenario_photo_set_with_one_failure_assembles_remaining_pages() {
    let server = MockServer::start().await;
    let root = TempDir::new().unwrap();

    let page = jpeg_bytes(32, 48);
    for n in [1u32, 2, 4, 5] {
        Mock::given(method("GET"))
            .and(path(format!("/g/{n}.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(page.clone()))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/g/3.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let strategy = StubStrategy {
        site: Site::Gallery,
        assembles: true,
        artifact_id: Some("777".to_string()),
    };
    let extraction = ExtractionResult {
        kind: MediaKind::PhotoSet,
        assets: (1..=5)
            .map(|n| AssetRef::new(format!("{}/g/{n}.jpg", server.uri()), n))
            .collect(),
    };

    let envelope = orchestrator(root.path())
        .complete(&strategy, "777", extraction)
        .await
        .unwrap();

    assert!(envelope.success);
    let data = envelope.data.unwrap();
    assert_eq!(data["code"], "777");
    assert_eq!(data["totalPages"], 4, "the failed page contributes nothing");
    assert_eq!(data["pdfUrl"], "/downloads/gallery/777/777.pdf");

    let artifact_dir = root.path().join("gallery/777");
    let pdf = artifact_dir.join("777.pdf");
    let doc = lopdf::Document::load(&pdf).unwrap();
    assert_eq!(doc.get_pages().len(), 4);

    // Cleanup removed the four downloaded intermediates; the failed page
    // was never written.
    for n in 1u32..=5 {
        assert!(
            !artifact_dir.join(format!("{n}.jpg")).exists(),
            "intermediate {n}.jpg must not survive"
        );
    }
}

#[tokio::test]
async fn photo_set_without_assembly_returns_url_list() {
    let root = TempDir::new().unwrap();

    let strategy = StubStrategy {
        site: Site::Instagram,
        assembles: false,
        artifact_id: None,
    };
    let urls = vec![
        "https://cdn.example/a.jpg".to_string(),
        "https://cdn.example/b.jpg".to_string(),
    ];
    let extraction = ExtractionResult::photo_set(urls.clone());

    let envelope = orchestrator(root.path())
        .complete(&strategy, "https://ig.example/p/1", extraction)
        .await
        .unwrap();

    assert!(envelope.success);
    let data = envelope.data.unwrap();
    assert_eq!(data["type"], "photo");
    assert_eq!(data["urls"][0], urls[0]);
    assert_eq!(data["urls"][1], urls[1]);
}

#[tokio::test]
async fn single_image_is_returned_by_reference() {
    let root = TempDir::new().unwrap();

    let strategy = StubStrategy {
        site: Site::Pinterest,
        assembles: false,
        artifact_id: None,
    };
    let extraction = ExtractionResult::single(
        MediaKind::Image,
        "https://i.pinimg.com/originals/ab/cd.jpg",
    );

    let envelope = orchestrator(root.path())
        .complete(&strategy, "https://pin.example/1", extraction)
        .await
        .unwrap();

    assert!(envelope.success);
    let data = envelope.data.unwrap();
    assert_eq!(data["type"], "image");
    assert_eq!(data["url"], "https://i.pinimg.com/originals/ab/cd.jpg");
}

#[tokio::test]
async fn unknown_kind_never_reaches_the_caller_as_data() {
    let root = TempDir::new().unwrap();

    let strategy = StubStrategy {
        site: Site::Twitter,
        assembles: false,
        artifact_id: None,
    };
    let extraction =
        ExtractionResult::single(MediaKind::Unknown, "https://cdn.example/media/opaque");

    let result = orchestrator(root.path())
        .complete(&strategy, "https://x.example/s/1", extraction)
        .await;

    assert!(
        matches!(
            result,
            Err(mediagrab_core::JobError::Extract(
                ExtractError::NoAssets { .. }
            ))
        ),
        "unknown kind must convert to a failure"
    );
}

#[tokio::test]
async fn all_assets_failing_surfaces_download_error() {
    let server = MockServer::start().await;
    let root = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let strategy = StubStrategy {
        site: Site::Gallery,
        assembles: true,
        artifact_id: Some("888".to_string()),
    };
    let extraction = ExtractionResult {
        kind: MediaKind::PhotoSet,
        assets: (1..=3)
            .map(|n| AssetRef::new(format!("{}/g/{n}.jpg", server.uri()), n))
            .collect(),
    };

    let result = orchestrator(root.path())
        .complete(&strategy, "888", extraction)
        .await;

    assert!(matches!(
        result,
        Err(mediagrab_core::JobError::Fetch(
            mediagrab_core::FetchError::AllFailed { attempted: 3 }
        ))
    ));
    assert!(
        !root.path().join("gallery/888/888.pdf").exists(),
        "no artifact on total failure"
    );
}
