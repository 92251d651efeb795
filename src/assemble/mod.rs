//! Document assembly: ordered raster pages into one PDF.
//!
//! Manifest entries are embedded in ascending ordinal order, so page order
//! is independent of download completion timing. Each page is decoded in a
//! fixed format preference order (JPEG, then PNG); the first format that
//! decodes wins. JPEG bytes are embedded as DCT-encoded image objects
//! without re-encoding; PNG pages are recoded to raw RGB and compressed on
//! save. A page that fails to decode is logged and skipped; only zero
//! embeddable pages fails the assembly, in which case no output is written
//! and the intermediate files remain on disk for diagnosis.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{GenericImageView, ImageFormat, ImageReader};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::fetch::ManifestEntry;

/// Errors that can occur during document assembly.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Not a single manifest entry could be embedded as a page.
    #[error("no page could be embedded from {attempted} entries")]
    NoPages {
        /// Number of entries that were attempted.
        attempted: usize,
    },

    /// Filesystem error reading a page or writing the document.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The PDF library rejected the document structure.
    #[error("PDF construction failed: {source}")]
    Pdf {
        /// The underlying PDF error.
        #[source]
        source: lopdf::Error,
    },
}

/// A decoded page ready for embedding.
enum PageImage {
    /// JPEG bytes embedded verbatim with a DCT filter.
    Jpeg { data: Vec<u8>, width: u32, height: u32 },
    /// Raw RGB samples (from PNG), compressed on save.
    Rgb { data: Vec<u8>, width: u32, height: u32 },
}

impl PageImage {
    fn dimensions(&self) -> (u32, u32) {
        match self {
            PageImage::Jpeg { width, height, .. } | PageImage::Rgb { width, height, .. } => {
                (*width, *height)
            }
        }
    }
}

/// Assembles the manifest's successful entries into
/// `<dest_dir>/<artifact_id>.pdf`, returning the output path.
///
/// On success every intermediate page file named in the entries is deleted;
/// the document is the sole surviving artifact. Cleanup tolerates
/// individual unlink failures. On fatal failure nothing is cleaned up.
///
/// # Errors
///
/// Returns [`AssemblyError::NoPages`] when no entry decodes,
/// [`AssemblyError::Io`] when the output cannot be written, and
/// [`AssemblyError::Pdf`] when document construction fails.
#[instrument(skip(entries), fields(count = entries.len(), artifact_id = %artifact_id))]
pub fn assemble_document(
    entries: &[ManifestEntry],
    dest_dir: &Path,
    artifact_id: &str,
) -> Result<PathBuf, AssemblyError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    let successes: Vec<&ManifestEntry> = entries.iter().filter(|e| e.is_success()).collect();

    for entry in &successes {
        let bytes = match std::fs::read(&entry.local_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    ordinal = entry.ordinal,
                    path = %entry.local_path.display(),
                    error = %e,
                    "skipping unreadable page"
                );
                continue;
            }
        };

        let Some(page) = decode_page(&bytes) else {
            warn!(
                ordinal = entry.ordinal,
                path = %entry.local_path.display(),
                "skipping undecodable page"
            );
            continue;
        };

        // Page box from the extraction's dimension hints when both are
        // present, else from the decoded image itself.
        let (intrinsic_w, intrinsic_h) = page.dimensions();
        let (width, height) = match (entry.width, entry.height) {
            (Some(w), Some(h)) => (w, h),
            _ => (intrinsic_w, intrinsic_h),
        };

        let page_id = add_image_page(&mut doc, pages_id, &page, width, height)?;
        kids.push(page_id.into());
        debug!(ordinal = entry.ordinal, width, height, "page embedded");
    }

    if kids.is_empty() {
        return Err(AssemblyError::NoPages {
            attempted: successes.len(),
        });
    }

    let page_count = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    std::fs::create_dir_all(dest_dir).map_err(|e| AssemblyError::Io {
        path: dest_dir.to_path_buf(),
        source: e,
    })?;
    let output = dest_dir.join(format!("{artifact_id}.pdf"));
    doc.save(&output)
        .map_err(|e| AssemblyError::Pdf { source: e })?;

    info!(path = %output.display(), pages = page_count, "document assembled");

    // The PDF is durably written; the per-page intermediates go now, even
    // when some entries were skipped.
    for entry in &successes {
        if let Err(e) = std::fs::remove_file(&entry.local_path) {
            warn!(
                path = %entry.local_path.display(),
                error = %e,
                "failed to remove intermediate page file"
            );
        }
    }

    Ok(output)
}

/// Decodes page bytes, trying the supported formats in preference order.
fn decode_page(bytes: &[u8]) -> Option<PageImage> {
    if let Ok(img) = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg) {
        let (width, height) = img.dimensions();
        return Some(PageImage::Jpeg {
            data: bytes.to_vec(),
            width,
            height,
        });
    }

    if let Ok(img) = image::load_from_memory_with_format(bytes, ImageFormat::Png) {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        return Some(PageImage::Rgb {
            data: rgb.into_raw(),
            width,
            height,
        });
    }

    // Last resort: sniff the actual format in case the extension lied.
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().ok()?;
    let img = reader.decode().ok()?;
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Some(PageImage::Rgb {
        data: rgb.into_raw(),
        width,
        height,
    })
}

/// Adds one image page to the document, returning the page object id.
fn add_image_page(
    doc: &mut Document,
    pages_id: lopdf::ObjectId,
    page: &PageImage,
    width: u32,
    height: u32,
) -> Result<lopdf::ObjectId, AssemblyError> {
    let (intrinsic_w, intrinsic_h) = page.dimensions();

    let image_dict = match page {
        PageImage::Jpeg { .. } => dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(intrinsic_w),
            "Height" => i64::from(intrinsic_h),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        PageImage::Rgb { .. } => dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(intrinsic_w),
            "Height" => i64::from(intrinsic_h),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
    };

    let data = match page {
        PageImage::Jpeg { data, .. } | PageImage::Rgb { data, .. } => data.clone(),
    };
    let image_id = doc.add_object(Stream::new(image_dict, data));

    // Draw the image scaled to fill the page box.
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    i64::from(width).into(),
                    0.into(),
                    0.into(),
                    i64::from(height).into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let encoded = content.encode().map_err(|e| AssemblyError::Pdf { source: e })?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            0.into(),
            0.into(),
            i64::from(width).into(),
            i64::from(height).into(),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 40, 200]),
        ));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([10, 220, 90]),
        ));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn entry(dir: &Path, ordinal: u32, bytes: &[u8]) -> ManifestEntry {
        let path = dir.join(format!("{ordinal}.jpg"));
        std::fs::write(&path, bytes).unwrap();
        ManifestEntry {
            ordinal,
            local_path: path,
            byte_size: bytes.len() as u64,
            error: None,
            width: None,
            height: None,
        }
    }

    #[test]
    fn test_assemble_embeds_pages_in_ordinal_order() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            entry(dir.path(), 1, &jpeg_bytes(40, 60)),
            entry(dir.path(), 2, &png_bytes(30, 30)),
            entry(dir.path(), 3, &jpeg_bytes(20, 20)),
        ];

        let output = assemble_document(&entries, dir.path(), "12345").unwrap();
        assert!(output.ends_with("12345.pdf"));

        let doc = Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_assemble_skips_undecodable_entries() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            entry(dir.path(), 1, &jpeg_bytes(40, 40)),
            entry(dir.path(), 2, b"definitely not an image"),
            entry(dir.path(), 3, &jpeg_bytes(40, 40)),
        ];

        let output = assemble_document(&entries, dir.path(), "partial").unwrap();
        let doc = Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 2, "bad page must be skipped");
    }

    #[test]
    fn test_assemble_all_undecodable_fails_and_keeps_intermediates() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            entry(dir.path(), 1, b"junk one"),
            entry(dir.path(), 2, b"junk two"),
        ];

        let result = assemble_document(&entries, dir.path(), "broken");
        assert!(matches!(
            result,
            Err(AssemblyError::NoPages { attempted: 2 })
        ));
        assert!(
            !dir.path().join("broken.pdf").exists(),
            "no output on fatal failure"
        );
        for entry in &entries {
            assert!(
                entry.local_path.exists(),
                "intermediates remain for diagnosis"
            );
        }
    }

    #[test]
    fn test_assemble_cleans_up_intermediates_on_success() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            entry(dir.path(), 1, &jpeg_bytes(16, 16)),
            entry(dir.path(), 2, &jpeg_bytes(16, 16)),
        ];

        assemble_document(&entries, dir.path(), "clean").unwrap();
        for entry in &entries {
            assert!(
                !entry.local_path.exists(),
                "intermediate page files must be removed"
            );
        }
    }

    #[test]
    fn test_assemble_excludes_failed_entries() {
        let dir = TempDir::new().unwrap();
        let mut entries = vec![
            entry(dir.path(), 1, &jpeg_bytes(16, 16)),
            entry(dir.path(), 2, &jpeg_bytes(16, 16)),
        ];
        entries.push(ManifestEntry {
            ordinal: 3,
            local_path: dir.path().join("3.jpg"),
            byte_size: 0,
            error: Some("HTTP 404".to_string()),
            width: None,
            height: None,
        });

        let output = assemble_document(&entries, dir.path(), "filtered").unwrap();
        let doc = Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 2, "failed entry contributes no page");
    }

    #[test]
    fn test_decode_page_prefers_jpeg_then_png() {
        assert!(matches!(
            decode_page(&jpeg_bytes(8, 8)),
            Some(PageImage::Jpeg { .. })
        ));
        assert!(matches!(
            decode_page(&png_bytes(8, 8)),
            Some(PageImage::Rgb { .. })
        ));
        assert!(decode_page(b"not an image").is_none());
    }
}
