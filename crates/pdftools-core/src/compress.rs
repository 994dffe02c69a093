//! Size reduction without re-encoding page content

use crate::error::Result;
use crate::loader::{self, save_document};
use lopdf::{Document, Object, StringFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Info dictionary entries blanked when metadata is stripped
const METADATA_KEYS: [&str; 6] = ["Title", "Author", "Subject", "Keywords", "Producer", "Creator"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressOptions {
    /// Blank the Info entries and drop the catalog's XMP stream
    pub strip_metadata: bool,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            strip_metadata: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionReport {
    pub original_size: usize,
    pub compressed_size: usize,
}

impl CompressionReport {
    /// Share of the original size saved, in percent; negative when it grew
    pub fn percent_saved(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        (1.0 - self.compressed_size as f64 / self.original_size as f64) * 100.0
    }
}

/// Rewrite a document more compactly.
///
/// Unreachable objects are pruned, uncompressed streams are deflated and
/// objects are renumbered densely.
pub fn compress_document(bytes: &[u8], options: &CompressOptions) -> Result<(Vec<u8>, CompressionReport)> {
    let mut doc = loader::load(bytes)?.into_document();
    let objects_before = doc.objects.len();

    if options.strip_metadata {
        strip_metadata(&mut doc);
    }
    let pruned = doc.prune_objects();
    doc.compress();
    doc.renumber_objects();

    let output = save_document(&mut doc)?;
    let report = CompressionReport {
        original_size: bytes.len(),
        compressed_size: output.len(),
    };
    debug!(
        objects_before,
        pruned = pruned.len(),
        objects_after = doc.objects.len(),
        "Compacted object table"
    );
    info!(
        original = report.original_size,
        compressed = report.compressed_size,
        saved = format!("{:.1}%", report.percent_saved()),
        "Compressed document"
    );
    Ok((output, report))
}

fn strip_metadata(doc: &mut Document) {
    let info_id = doc.trailer.get(b"Info").and_then(Object::as_reference).ok();
    let info = match info_id {
        Some(id) => doc.get_object_mut(id).and_then(Object::as_dict_mut).ok(),
        None => doc
            .trailer
            .get_mut(b"Info")
            .and_then(Object::as_dict_mut)
            .ok(),
    };
    if let Some(info) = info {
        for key in METADATA_KEYS {
            if info.has(key.as_bytes()) {
                info.set(key, Object::String(Vec::new(), StringFormat::Literal));
            }
        }
    }

    let root = doc.trailer.get(b"Root").and_then(Object::as_reference);
    if let Ok(catalog) = root.and_then(|id| doc.get_object_mut(id)).and_then(Object::as_dict_mut) {
        catalog.remove(b"Metadata");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::test_support::create_test_pdf;
    use lopdf::{dictionary, Dictionary, Stream};

    /// Uncompressed document with an Info dictionary and an orphaned stream
    fn bloated_pdf() -> Vec<u8> {
        let mut doc = Document::load_mem(&create_test_pdf(2, "Bloat")).unwrap();
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Quarterly numbers"),
            "Author" => Object::string_literal("Someone"),
            "CreationDate" => Object::string_literal("D:20240101000000Z"),
        });
        doc.trailer.set("Info", info_id);
        doc.add_object(Stream::new(Dictionary::new(), vec![b'x'; 20_000]));

        let page_id = *doc.get_pages().get(&1).unwrap();
        let body = "BT /F1 12 Tf 50 700 Td (repeated line) Tj ET\n".repeat(300);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), body.into_bytes()));
        doc.get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Contents", content_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn info_dict(doc: &Document) -> Dictionary {
        let id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        doc.get_object(id).unwrap().as_dict().unwrap().clone()
    }

    #[test]
    fn test_compress_shrinks_and_keeps_pages() {
        let input = bloated_pdf();
        let (output, report) = compress_document(&input, &CompressOptions::default()).unwrap();

        assert_eq!(report.original_size, input.len());
        assert_eq!(report.compressed_size, output.len());
        assert!(output.len() < input.len());
        assert!(report.percent_saved() > 0.0);

        let before = Document::load_mem(&input).unwrap();
        let after = Document::load_mem(&output).unwrap();
        assert_eq!(after.get_pages().len(), 2);
        for page in 1..=2 {
            let id_before = *before.get_pages().get(&page).unwrap();
            let id_after = *after.get_pages().get(&page).unwrap();
            assert_eq!(
                after.get_page_content(id_after).unwrap(),
                before.get_page_content(id_before).unwrap()
            );
        }
    }

    #[test]
    fn test_metadata_is_blanked() {
        let (output, _) = compress_document(&bloated_pdf(), &CompressOptions::default()).unwrap();
        let info = info_dict(&Document::load_mem(&output).unwrap());
        assert_eq!(info.get(b"Title").unwrap().as_str().unwrap(), b"");
        assert_eq!(info.get(b"Author").unwrap().as_str().unwrap(), b"");
        // Dates are not identifying
        assert!(info.has(b"CreationDate"));
    }

    #[test]
    fn test_metadata_kept_when_disabled() {
        let options = CompressOptions {
            strip_metadata: false,
        };
        let (output, _) = compress_document(&bloated_pdf(), &options).unwrap();
        let info = info_dict(&Document::load_mem(&output).unwrap());
        assert_eq!(
            info.get(b"Title").unwrap().as_str().unwrap(),
            b"Quarterly numbers"
        );
    }

    #[test]
    fn test_percent_saved() {
        let report = CompressionReport {
            original_size: 200,
            compressed_size: 150,
        };
        assert!((report.percent_saved() - 25.0).abs() < 1e-9);
        let empty = CompressionReport {
            original_size: 0,
            compressed_size: 10,
        };
        assert_eq!(empty.percent_saved(), 0.0);
    }
}
