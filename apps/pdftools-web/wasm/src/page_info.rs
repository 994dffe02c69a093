//! Page-level information extraction
//!
//! Sizes feed the viewer's canvas and the click mapper; rotation and
//! orientation drive the thumbnails.

use lopdf::Document;
use pdftools_core::{PdfDocument, PdfToolsError, Result};
use serde::Serialize;

/// Information about a single PDF page
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PageInfo {
    /// Page number (1-indexed)
    pub page_num: u32,
    /// Page width in points (1 point = 1/72 inch)
    pub width: f64,
    pub height: f64,
    /// Clockwise degrees: 0, 90, 180 or 270
    pub rotation: i32,
    pub has_content: bool,
    pub orientation: PageOrientation,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum PageOrientation {
    Portrait,
    Landscape,
    Square,
}

impl PageOrientation {
    /// Orientation as displayed, after applying `rotation`
    pub fn of(width: f64, height: f64, rotation: i32) -> Self {
        let (w, h) = if rotation == 90 || rotation == 270 {
            (height, width)
        } else {
            (width, height)
        };
        if (w - h).abs() < 1.0 {
            PageOrientation::Square
        } else if w > h {
            PageOrientation::Landscape
        } else {
            PageOrientation::Portrait
        }
    }
}

impl PageInfo {
    pub fn from_document(doc: &PdfDocument, page_num: u32) -> Result<Self> {
        let size = doc.page_size(page_num)?;
        let rotation = doc.page_rotation(page_num)?;
        let has_content = doc
            .document()
            .get_dictionary(doc.page_id(page_num)?)
            .map(|page| page.has(b"Contents"))
            .unwrap_or(false);

        Ok(Self {
            page_num,
            width: size.width,
            height: size.height,
            rotation,
            has_content,
            orientation: PageOrientation::of(size.width, size.height, rotation),
        })
    }

    /// Every page in order; stops at the first unreadable page
    pub fn all_from_document(doc: &PdfDocument) -> Result<Vec<Self>> {
        (1..=doc.page_count())
            .map(|page_num| Self::from_document(doc, page_num))
            .collect()
    }
}

/// Parse `bytes` without decrypting; page geometry is never encrypted
pub fn parse_for_info(bytes: &[u8]) -> Result<PdfDocument> {
    Document::load_mem(bytes)
        .map(PdfDocument::from_document)
        .map_err(|e| PdfToolsError::CorruptDocument(e.to_string()))
}
