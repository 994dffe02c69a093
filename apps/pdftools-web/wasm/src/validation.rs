//! PDF validation and info extraction
//!
//! Checks uploads before any tool runs and reports what the file picker shows.

use lopdf::{Dictionary, Document};
use pdftools_core::{PdfToolsError, Result};
use serde::Serialize;

/// File information shown next to an uploaded document
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct PdfInfo {
    pub page_count: u32,
    /// Header version, e.g. "1.7"
    pub version: String,
    /// Encrypted files need a password before any tool can edit them
    pub encrypted: bool,
    pub size_bytes: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub producer: Option<String>,
}

/// Parse `bytes` and extract basic info
pub fn validate_pdf(bytes: &[u8]) -> Result<PdfInfo> {
    quick_validate(bytes)?;
    let version = extract_version(bytes);

    let document = Document::load_mem(bytes)
        .map_err(|e| PdfToolsError::CorruptDocument(format!("Failed to parse PDF: {}", e)))?;

    let page_count = document.get_pages().len() as u32;
    if page_count == 0 {
        return Err(PdfToolsError::CorruptDocument("PDF has no pages".into()));
    }

    let encrypted = document.is_encrypted();
    let mut info = PdfInfo {
        page_count,
        version,
        encrypted,
        size_bytes: bytes.len(),
        ..PdfInfo::default()
    };
    // Metadata strings of an encrypted file are ciphertext
    if !encrypted {
        if let Some(dict) = info_dictionary(&document) {
            info.title = text_entry(dict, b"Title");
            info.author = text_entry(dict, b"Author");
            info.subject = text_entry(dict, b"Subject");
            info.producer = text_entry(dict, b"Producer");
        }
    }
    Ok(info)
}

/// Header and trailer checks without parsing the object graph
pub fn quick_validate(bytes: &[u8]) -> Result<()> {
    if bytes.len() < 8 {
        return Err(PdfToolsError::CorruptDocument(
            "File too small to be a valid PDF".into(),
        ));
    }
    if !bytes.starts_with(b"%PDF-") {
        return Err(PdfToolsError::CorruptDocument(
            "Not a valid PDF file (missing %PDF- header)".into(),
        ));
    }

    let tail = &bytes[bytes.len().saturating_sub(1024)..];
    if !tail.windows(5).any(|w| w == b"%%EOF") {
        return Err(PdfToolsError::CorruptDocument(
            "PDF appears truncated (missing %%EOF marker)".into(),
        ));
    }
    Ok(())
}

fn extract_version(bytes: &[u8]) -> String {
    bytes
        .get(5..8)
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "1.4".to_string())
}

fn info_dictionary(document: &Document) -> Option<&Dictionary> {
    let info_id = document.trailer.get(b"Info").ok()?.as_reference().ok()?;
    document.get_dictionary(info_id).ok()
}

/// PDF text string: UTF-16BE with a byte order mark, otherwise byte-wise
fn text_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    let raw = dict.get(key).ok()?.as_str().ok()?;
    let text = match raw {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::from_utf8_lossy(raw).into_owned(),
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{content::Content, content::Operation, Object, Stream, StringFormat};

    /// Letter-sized pages with `"Page <n>"` on each, plus an Info dictionary
    pub(crate) fn create_test_pdf(num_pages: u32) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let mut page_ids = Vec::new();
        for i in 0..num_pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
                    Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("Page {}", i + 1).into_bytes(),
                            StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

            let page = Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                (
                    "MediaBox",
                    Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
                ),
                ("Contents", Object::Reference(content_id)),
            ]);
            page_ids.push(doc.add_object(page));
        }

        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(num_pages as i64)),
            (
                "Kids",
                Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
        ]);
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut title = vec![0xFE, 0xFF];
        title.extend("Lease".encode_utf16().flat_map(u16::to_be_bytes));
        let info_id = doc.add_object(Dictionary::from_iter(vec![
            ("Title", Object::String(title, StringFormat::Hexadecimal)),
            ("Author", Object::string_literal("Jane Roe")),
            ("Producer", Object::string_literal("  ")),
        ]));
        doc.trailer.set("Info", Object::Reference(info_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_quick_validate_rejects_non_pdf() {
        assert!(quick_validate(b"not a pdf file").is_err());
    }

    #[test]
    fn test_quick_validate_rejects_small_file() {
        assert!(quick_validate(b"tiny").is_err());
    }

    #[test]
    fn test_quick_validate_rejects_truncated_file() {
        let pdf = create_test_pdf(1);
        let truncated = &pdf[..pdf.len() - 10];
        assert!(matches!(
            quick_validate(truncated),
            Err(PdfToolsError::CorruptDocument(_))
        ));
    }

    #[test]
    fn test_quick_validate_accepts_valid_pdf() {
        assert!(quick_validate(&create_test_pdf(1)).is_ok());
    }

    #[test]
    fn test_validate_pdf_returns_correct_page_count() {
        let info = validate_pdf(&create_test_pdf(5)).unwrap();
        assert_eq!(info.page_count, 5);
        assert_eq!(info.version, "1.7");
        assert!(!info.encrypted);
    }

    #[test]
    fn test_validate_pdf_reads_metadata() {
        let info = validate_pdf(&create_test_pdf(1)).unwrap();
        assert_eq!(info.title.as_deref(), Some("Lease"));
        assert_eq!(info.author.as_deref(), Some("Jane Roe"));
        assert_eq!(info.subject, None);
        // Blank entries are reported as missing
        assert_eq!(info.producer, None);
    }

    #[test]
    fn test_validate_pdf_flags_encryption() {
        let locked = pdftools_core::lock_document(
            &create_test_pdf(2),
            &pdftools_core::LockOptions::new("secret"),
        )
        .unwrap();
        let info = validate_pdf(&locked).unwrap();
        assert!(info.encrypted);
        assert_eq!(info.page_count, 2);
        assert_eq!(info.title, None);
    }

    #[test]
    fn test_validate_pdf_rejects_invalid_data() {
        assert!(validate_pdf(b"not a valid pdf").is_err());
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version(b"%PDF-1.7\n"), "1.7");
        assert_eq!(extract_version(b"%PDF-1.4\n"), "1.4");
        assert_eq!(extract_version(b"%PDF-2.0\n"), "2.0");
    }
}
