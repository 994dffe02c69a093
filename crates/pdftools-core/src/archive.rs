//! Zip packaging for multi-file results

use crate::error::{PdfToolsError, Result};
use crate::raster::RasterPage;
use crate::split::PageRange;
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Write `(name, bytes)` entries into a deflated zip, in order
pub fn zip_entries<'a, I>(entries: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (String, &'a [u8])>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut seen = HashSet::new();
    let mut count = 0usize;

    for (name, bytes) in entries {
        let name = unique_name(&mut seen, name);
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| PdfToolsError::Archive(format!("{}: {}", name, e)))?;
        writer
            .write_all(bytes)
            .map_err(|e| PdfToolsError::Archive(format!("{}: {}", name, e)))?;
        count += 1;
    }

    let cursor = writer
        .finish()
        .map_err(|e| PdfToolsError::Archive(e.to_string()))?;
    debug!(entries = count, "Wrote zip archive");
    Ok(cursor.into_inner())
}

/// Rendered pages as `page_<n>.<ext>` entries
pub fn raster_archive(pages: &[RasterPage]) -> Result<Vec<u8>> {
    zip_entries(
        pages
            .iter()
            .map(|page| (page.file_name(), page.bytes.as_slice())),
    )
}

/// Split outputs as `pages_<start>-<end>.pdf` entries, one per range
pub fn split_archive(ranges: &[PageRange], documents: &[Vec<u8>]) -> Result<Vec<u8>> {
    if ranges.len() != documents.len() {
        return Err(PdfToolsError::InvalidParameter(format!(
            "{} ranges but {} documents",
            ranges.len(),
            documents.len()
        )));
    }
    zip_entries(
        ranges
            .iter()
            .zip(documents)
            .map(|(range, doc)| (format!("pages_{}.pdf", range), doc.as_slice())),
    )
}

/// Read every file entry back as `(name, bytes)`
pub fn read_archive(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| PdfToolsError::Archive(e.to_string()))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| PdfToolsError::Archive(e.to_string()))?;
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| PdfToolsError::Archive(e.to_string()))?;
        entries.push((file.name().to_string(), data));
    }
    Ok(entries)
}

/// Repeated names get a `_<n>` suffix before the extension
fn unique_name(seen: &mut HashSet<String>, name: String) -> String {
    if seen.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
        None => (name.clone(), String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}{}", stem, n, ext);
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
