//! Client-side PDF toolkit
//!
//! Every tool takes document bytes plus parameters and returns new bytes:
//! merge, split, compress, images to PDF, PDF to images, text/image/signature
//! placement, annotations, and password protection. Nothing is kept between
//! calls, so the same functions back both the browser bindings and the CLI.
//!
//! Positions given to the composing tools are top-left-relative points, as
//! produced by [`coords::map_click`]; the flip to PDF's bottom-left origin
//! happens when an element is drawn, using the destination page's height.

pub mod archive;
pub mod color;
pub mod command;
pub mod composer;
pub mod compress;
pub mod config;
pub mod convert;
pub mod coords;
pub mod edits;
pub mod embed;
pub mod error;
mod fonts;
pub mod loader;
pub mod merge;
pub mod output;
mod paint;
pub mod raster;
pub mod security;
pub mod split;

pub use color::Rgb;
pub use command::{execute, execute_json, run, InputFile, PdfCommand, ProcessMetrics, ProcessResult};
pub use composer::{place_image, place_signature, place_text, Rect};
pub use compress::{compress_document, CompressOptions, CompressionReport};
pub use config::ToolkitConfig;
pub use convert::images_to_document;
pub use coords::{map_click, PagePoint, Zoom};
pub use edits::{annotate, apply_elements, Annotation, AnnotationKind, Element};
pub use embed::ImageFormat;
pub use error::{PdfToolsError, Result};
pub use loader::{get_page_count, load, load_with_password, PageSize, PdfDocument};
pub use merge::merge_documents;
pub use output::OutputFile;
pub use raster::{rasterize_pages, PageRenderer, Pixmap, RasterFormat, RasterPage};
pub use security::{lock_document, unlock_document, LockOptions, Permissions};
pub use split::{extract_pages, split_document, PageRange};

/// Parse page range string like "1-3, 5, 8-10" into sorted unique page numbers.
///
/// Range ends are clipped to `page_count`, so `"1-4294967295"` names every
/// page. A start past the last page is kept for the caller to reject.
pub fn parse_ranges(input: &str, page_count: u32) -> Result<Vec<u32>> {
    use std::collections::BTreeSet;

    let mut pages = BTreeSet::new();
    for range in PageRange::parse_list(input)? {
        let end = range.end.min(page_count).max(range.start);
        pages.extend(range.start..=end);
    }
    Ok(pages.into_iter().collect())
}
