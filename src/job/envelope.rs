//! The uniform result envelope returned to callers.
//!
//! One request produces one envelope: `{ success, message, data }`. On
//! failure `data` is null and `message` is the primary diagnostic signal.
//! The `data` shape is kind-specific; the payload structs here pin the
//! field names callers depend on (`pdfUrl`, `totalPages`, ...).

use serde::Serialize;

use crate::extract::MediaKind;

/// Uniform caller-facing result of one job.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Whether the job produced an artifact.
    pub success: bool,
    /// Human-readable outcome; the primary diagnostic on failure.
    pub message: String,
    /// Kind-specific payload; `null` on failure.
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Builds a success envelope from a serializable payload.
    ///
    /// A payload that fails to serialize degrades to a failure envelope
    /// rather than a panic; payload types are plain data and this does not
    /// happen in practice.
    #[must_use]
    pub fn ok(message: impl Into<String>, payload: &impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(data) => Self {
                success: true,
                message: message.into(),
                data: Some(data),
            },
            Err(e) => Self::failure(format!("payload serialization failed: {e}")),
        }
    }

    /// Builds a failure envelope; `data` is always null.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Payload for single-asset results.
#[derive(Debug, Clone, Serialize)]
pub struct SingleAsset {
    /// Result classification label.
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Remote URL, or the relative local path for materialized artifacts.
    pub url: String,
}

/// Payload for multi-asset results returned without assembly.
#[derive(Debug, Clone, Serialize)]
pub struct MultiAsset {
    /// Result classification label.
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Remote URLs in extraction order.
    pub urls: Vec<String>,
}

/// Payload for an assembled gallery document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryDocument {
    /// The gallery's content code.
    pub code: String,
    /// Number of pages embedded in the document.
    pub total_pages: usize,
    /// Relative serving path of the assembled PDF.
    pub pdf_url: String,
}

/// Payload for an assembled chapter document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterDocument {
    /// The chapter identifier.
    pub chapter_id: String,
    /// Number of page images embedded in the document.
    pub total_images: usize,
    /// Relative serving path of the assembled PDF.
    pub pdf_url: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_single_asset_payload_field_names() {
        let envelope = Envelope::ok(
            "video downloaded",
            &SingleAsset {
                kind: MediaKind::Video,
                url: "/downloads/tiktok/abc/abc.mp4".to_string(),
            },
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["type"], "video");
        assert_eq!(json["data"]["url"], "/downloads/tiktok/abc/abc.mp4");
    }

    #[test]
    fn test_photo_set_payload_uses_photo_label() {
        let payload = MultiAsset {
            kind: MediaKind::PhotoSet,
            urls: vec!["https://a/1.jpg".to_string()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "photo");
        assert!(json["urls"].is_array());
    }

    #[test]
    fn test_gallery_payload_camel_case_fields() {
        let payload = GalleryDocument {
            code: "177013".to_string(),
            total_pages: 4,
            pdf_url: "/downloads/gallery/177013/177013.pdf".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["totalPages"], 4);
        assert_eq!(json["pdfUrl"], "/downloads/gallery/177013/177013.pdf");
        assert_eq!(json["code"], "177013");
    }

    #[test]
    fn test_chapter_payload_camel_case_fields() {
        let payload = ChapterDocument {
            chapter_id: "my-series-12".to_string(),
            total_images: 20,
            pdf_url: "/downloads/chapter/my-series-12/my-series-12.pdf".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["chapterId"], "my-series-12");
        assert_eq!(json["totalImages"], 20);
    }

    #[test]
    fn test_failure_envelope_has_null_data() {
        let envelope = Envelope::failure("notfound");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "notfound");
        assert!(json["data"].is_null());
    }
}
