//! Deliverable files and their names

use crate::archive;
use crate::error::{PdfToolsError, Result};
use crate::raster::RasterPage;
use crate::split::PageRange;
use serde::{Deserialize, Serialize};

pub const PDF_MIME: &str = "application/pdf";
pub const ZIP_MIME: &str = "application/zip";

pub const MERGED_NAME: &str = "merged.pdf";
pub const SPLIT_ARCHIVE_NAME: &str = "split_pdfs.zip";
pub const RASTER_ARCHIVE_NAME: &str = "pdf_images.zip";
pub const IMAGES_TO_PDF_NAME: &str = "images_to_pdf.pdf";

/// Name used when the caller gives no source file name
const DEFAULT_SOURCE_NAME: &str = "document.pdf";

/// A file handed back to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub name: String,
    pub mime: String,
    #[serde(with = "crate::embed::base64_data")]
    pub bytes: Vec<u8>,
}

impl OutputFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, PDF_MIME, bytes)
    }

    pub fn zip(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, ZIP_MIME, bytes)
    }
}

/// Tools whose output is named after the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    Compressed,
    Edited,
    WithImage,
    Signed,
    Annotated,
    Protected,
    Unlocked,
    Extracted,
}

impl DerivedKind {
    pub fn prefix(self) -> &'static str {
        match self {
            DerivedKind::Compressed => "compressed_",
            DerivedKind::Edited => "edited_",
            DerivedKind::WithImage => "with_image_",
            DerivedKind::Signed => "signed_",
            DerivedKind::Annotated => "annotated_",
            DerivedKind::Protected => "protected_",
            DerivedKind::Unlocked => "unlocked_",
            DerivedKind::Extracted => "extracted_",
        }
    }
}

/// `<prefix><source file name>`, e.g. `signed_contract.pdf`
///
/// Directory components of `source` are dropped.
pub fn derived_name(kind: DerivedKind, source: &str) -> String {
    let base = source
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_SOURCE_NAME);
    format!("{}{}", kind.prefix(), base)
}

/// `split_<start>-<end>.pdf`
pub fn split_name(range: &PageRange) -> String {
    format!("split_{}.pdf", range)
}

/// One range is delivered as a PDF, several as a zip of `pages_<s>-<e>.pdf`
pub fn split_output(ranges: &[PageRange], mut documents: Vec<Vec<u8>>) -> Result<OutputFile> {
    match (ranges, documents.len()) {
        ([range], 1) => Ok(OutputFile::pdf(split_name(range), documents.remove(0))),
        (_, n) if n == ranges.len() && n > 1 => Ok(OutputFile::zip(
            SPLIT_ARCHIVE_NAME,
            archive::split_archive(ranges, &documents)?,
        )),
        _ => Err(PdfToolsError::InvalidParameter(format!(
            "{} ranges but {} documents",
            ranges.len(),
            documents.len()
        ))),
    }
}

/// Rendered pages are archived as `pdf_images.zip`.
///
/// With `archive_single_page` off, a one-page result is delivered directly.
pub fn raster_output(pages: &[RasterPage], archive_single_page: bool) -> Result<OutputFile> {
    match pages {
        [] => Err(PdfToolsError::InvalidParameter(
            "Document has no pages to render".into(),
        )),
        [page] if !archive_single_page => Ok(OutputFile::new(
            page.file_name(),
            page.format.mime(),
            page.bytes.clone(),
        )),
        _ => Ok(OutputFile::zip(
            RASTER_ARCHIVE_NAME,
            archive::raster_archive(pages)?,
        )),
    }
}
