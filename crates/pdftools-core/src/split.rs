//! PDF Split algorithm
//!
//! Extracts page ranges from a PDF by deleting every other page from a copy
//! and pruning the objects nothing references any more.

use crate::error::{PdfToolsError, Result};
use crate::loader::{self, save_document};
use crate::merge::flatten_page_attributes;
use lopdf::Document;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// An inclusive, 1-based page interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    /// Fails with `InvalidRange` for page 0 or a start after the end
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start == 0 {
            return Err(PdfToolsError::InvalidRange(
                "Page numbers must be >= 1".into(),
            ));
        }
        if start > end {
            return Err(PdfToolsError::InvalidRange(format!(
                "Start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(page: u32) -> Result<Self> {
        Self::new(page, page)
    }

    /// Pages of this range that exist in a document of `page_count` pages
    pub fn clipped(&self, page_count: u32) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end.min(page_count)
    }

    /// Parse a list like `"1-3, 5, 8-10"`, keeping order and duplicates
    pub fn parse_list(input: &str) -> Result<Vec<PageRange>> {
        let ranges = input
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<PageRange>())
            .collect::<Result<Vec<PageRange>>>()?;
        if ranges.is_empty() {
            return Err(PdfToolsError::InvalidRange("No pages specified".into()));
        }
        Ok(ranges)
    }
}

impl FromStr for PageRange {
    type Err = PdfToolsError;

    fn from_str(part: &str) -> Result<Self> {
        let parse = |s: &str, what: &str| {
            s.trim()
                .parse::<u32>()
                .map_err(|_| PdfToolsError::InvalidRange(format!("Invalid {}: {}", what, s)))
        };
        match part.split_once('-') {
            Some((start, end)) => PageRange::new(parse(start, "start")?, parse(end, "end")?),
            None => PageRange::single(parse(part, "page")?),
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split a PDF into one document per range.
///
/// Each range is clipped to the document's page count. A range that starts
/// past the last page yields a document with no pages rather than an error.
pub fn split_document(bytes: &[u8], ranges: &[PageRange]) -> Result<Vec<Vec<u8>>> {
    if ranges.is_empty() {
        return Err(PdfToolsError::InvalidRange("No ranges specified".into()));
    }
    for range in ranges {
        PageRange::new(range.start, range.end)?;
    }

    let mut doc = loader::load(bytes)?.into_document();
    // Deleting pages must not strip attributes the kept pages inherit
    flatten_page_attributes(&mut doc)?;
    let page_count = doc.get_pages().len() as u32;

    let mut outputs = Vec::with_capacity(ranges.len());
    for range in ranges {
        let keep: Vec<u32> = range.clipped(page_count).collect();
        if keep.is_empty() {
            debug!(%range, page_count, "Range starts past the last page");
        }
        outputs.push(keep_pages(&doc, &keep)?);
    }

    info!(ranges = ranges.len(), page_count, "Split document");
    Ok(outputs)
}

/// Extract the given pages (1-indexed) into a new document
///
/// Uses "Construction by Whitelist": every page not listed is deleted
/// from a copy, then unreachable objects are pruned.
pub fn extract_pages(bytes: &[u8], pages: &[u32]) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(PdfToolsError::InvalidRange("No pages specified".into()));
    }
    if pages.contains(&0) {
        return Err(PdfToolsError::InvalidRange(
            "Page numbers must be >= 1".into(),
        ));
    }

    let mut doc = loader::load(bytes)?.into_document();
    flatten_page_attributes(&mut doc)?;
    let page_count = doc.get_pages().len() as u32;

    for &page in pages {
        if page > page_count {
            return Err(PdfToolsError::InvalidPageIndex {
                index: page,
                page_count,
            });
        }
    }

    keep_pages(&doc, pages)
}

fn keep_pages(doc: &Document, pages: &[u32]) -> Result<Vec<u8>> {
    let page_count = doc.get_pages().len() as u32;
    let pages_to_keep: HashSet<u32> = pages.iter().copied().collect();

    let mut new_doc = doc.clone();

    // Delete in reverse order so remaining indices stay valid
    let pages_to_delete: Vec<u32> = (1..=page_count)
        .rev()
        .filter(|p| !pages_to_keep.contains(p))
        .collect();
    for page_num in pages_to_delete {
        new_doc.delete_pages(&[page_num]);
    }

    new_doc.prune_objects();
    new_doc.compress();
    save_document(&mut new_doc)
}
