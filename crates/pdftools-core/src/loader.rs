//! Document loading and page geometry
//!
//! Every operation starts here: bytes are parsed into a `lopdf::Document`,
//! decrypted when a password applies, and handed out as a [`PdfDocument`].

use crate::error::{PdfToolsError, Result};
use crate::security;
use lopdf::xref::XrefEntry;
use lopdf::{Dictionary, Document, Object, ObjectId, Reader};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Page dimensions in points (1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// A parsed, decrypted document
#[derive(Debug, Clone)]
pub struct PdfDocument {
    doc: Document,
    was_encrypted: bool,
}

/// Load a document that is not password protected
pub fn load(bytes: &[u8]) -> Result<PdfDocument> {
    load_with_password(bytes, None)
}

/// Load a document, decrypting it with `password` when it is encrypted.
///
/// Encrypted documents with an empty user password open without one.
/// Otherwise a missing password fails with `PasswordRequired` and a wrong
/// one with `IncorrectPassword`.
pub fn load_with_password(bytes: &[u8], password: Option<&str>) -> Result<PdfDocument> {
    let mut doc =
        Document::load_mem(bytes).map_err(|e| PdfToolsError::CorruptDocument(e.to_string()))?;

    let was_encrypted = security::is_encrypted(&doc);
    if was_encrypted {
        if has_missing_compressed_objects(&doc) {
            doc = Reader {
                buffer: bytes,
                document: Document::new(),
            }
            .read(Some(security::seal_object_stream))
            .map_err(|e| PdfToolsError::CorruptDocument(e.to_string()))?;
        }
        match password {
            Some(password) => security::decrypt_document(&mut doc, password)?,
            None => security::decrypt_document(&mut doc, "").map_err(|e| match e {
                PdfToolsError::IncorrectPassword => PdfToolsError::PasswordRequired,
                other => other,
            })?,
        }
    }

    check_page_tree(&doc)?;
    debug!(
        pages = doc.get_pages().len(),
        encrypted = was_encrypted,
        "Loaded document"
    );

    Ok(PdfDocument { doc, was_encrypted })
}

/// Objects the xref places in object streams that the parser could not unpack
fn has_missing_compressed_objects(doc: &Document) -> bool {
    doc.reference_table.entries.iter().any(|(&id, entry)| {
        matches!(entry, XrefEntry::Compressed { .. }) && !doc.objects.contains_key(&(id, 0))
    })
}

/// The catalog's `/Pages` must resolve to a dictionary
fn check_page_tree(doc: &Document) -> Result<()> {
    let root = doc
        .catalog()
        .ok()
        .and_then(|catalog| catalog.get(b"Pages").ok())
        .map(|pages| resolve(doc, pages));
    match root {
        Some(Object::Dictionary(_)) => Ok(()),
        _ => Err(PdfToolsError::CorruptDocument(
            "Page tree could not be resolved".into(),
        )),
    }
}

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<u32> {
    Ok(load(bytes)?.page_count())
}

impl PdfDocument {
    /// Wrap an already parsed document
    pub fn from_document(doc: Document) -> Self {
        Self {
            doc,
            was_encrypted: false,
        }
    }

    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    /// Whether the source bytes carried an `/Encrypt` dictionary
    pub fn was_encrypted(&self) -> bool {
        self.was_encrypted
    }

    /// Object id of a 1-based page index
    pub fn page_id(&self, index: u32) -> Result<ObjectId> {
        self.doc
            .get_pages()
            .get(&index)
            .copied()
            .ok_or(PdfToolsError::InvalidPageIndex {
                index,
                page_count: self.page_count(),
            })
    }

    /// Effective MediaBox size of a 1-based page index
    pub fn page_size(&self, index: u32) -> Result<PageSize> {
        let page_id = self.page_id(index)?;
        page_size_for_id(&self.doc, page_id)
    }

    /// Inherited `/Rotate` of a 1-based page index, normalized to 0, 90, 180 or 270
    pub fn page_rotation(&self, index: u32) -> Result<i32> {
        let page_id = self.page_id(index)?;
        let angle = inherited_attribute(&self.doc, page_id, b"Rotate")
            .and_then(|obj| resolve(&self.doc, &obj).as_i64().ok())
            .unwrap_or(0);
        Ok(normalize_rotation(angle))
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    /// Serialize to a new byte buffer
    pub fn save(&mut self) -> Result<Vec<u8>> {
        save_document(&mut self.doc)
    }
}

/// Serialize a lopdf document to bytes
pub(crate) fn save_document(doc: &mut Document) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfToolsError::OperationError(format!("Failed to save PDF: {}", e)))?;
    Ok(buffer)
}

/// Create a document with an empty page tree.
///
/// Returns the document and the id of its root `Pages` node.
pub(crate) fn empty_document() -> (Document, ObjectId) {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Kids", Object::Array(vec![]));
    pages.set("Count", Object::Integer(0));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    (doc, pages_id)
}

/// Effective MediaBox of a page, walking up the page tree for inherited boxes
pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> Result<[f64; 4]> {
    inherited_attribute(doc, page_id, b"MediaBox")
        .and_then(|obj| resolve(doc, &obj).as_array().ok().cloned())
        .and_then(|arr| parse_box_array(doc, &arr))
        .ok_or_else(|| PdfToolsError::CorruptDocument("Page has no valid MediaBox".into()))
}

pub(crate) fn page_size_for_id(doc: &Document, page_id: ObjectId) -> Result<PageSize> {
    let media_box = media_box(doc, page_id)?;
    Ok(PageSize {
        width: (media_box[2] - media_box[0]).abs(),
        height: (media_box[3] - media_box[1]).abs(),
    })
}

/// Look up an attribute on a page or the nearest ancestor that defines it
pub(crate) fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page_id);
    // Guard against cyclic Parent chains
    let mut depth = 0;
    while let Some(id) = current {
        if depth > 64 {
            return None;
        }
        let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
    None
}

/// Rotation in degrees, clockwise, folded into 0..360 and snapped to quarter turns
fn normalize_rotation(angle: i64) -> i32 {
    (angle.rem_euclid(360) / 90 * 90) as i32
}

fn parse_box_array(doc: &Document, arr: &[Object]) -> Option<[f64; 4]> {
    if arr.len() != 4 {
        return None;
    }
    let mut values = [0.0; 4];
    for (slot, obj) in values.iter_mut().zip(arr) {
        *slot = obj_to_f64(resolve(doc, obj))?;
    }
    Some(values)
}

/// Follow a reference one level; non-references are returned as-is
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

pub(crate) fn obj_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(f64::from(*f)),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory fixtures shared by the unit tests of every module

    use lopdf::content::{Content, Operation};
    use lopdf::{Dictionary, Document, Object, Stream};

    /// Build a PDF whose pages have the given sizes and identifiable text
    pub fn create_pdf_with_sizes(sizes: &[(i64, i64)], content_prefix: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));

        let mut page_ids = Vec::new();
        for (i, (width, height)) in sizes.iter().enumerate() {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new(
                        "Tf",
                        vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
                    ),
                    Operation::new("Td", vec![Object::Integer(50), Object::Integer(50)]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("{}-Page-{}", content_prefix, i + 1).into_bytes(),
                            lopdf::StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

            let mut fonts = Dictionary::new();
            fonts.set("F1", Object::Reference(font_id));
            let mut resources = Dictionary::new();
            resources.set("Font", Object::Dictionary(fonts));

            let page = Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                (
                    "MediaBox",
                    Object::Array(vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(*width),
                        Object::Integer(*height),
                    ]),
                ),
                ("Resources", Object::Dictionary(resources)),
                ("Contents", Object::Reference(content_id)),
            ]);
            page_ids.push(doc.add_object(page));
        }

        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(page_ids.len() as i64)),
            (
                "Kids",
                Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
        ]);
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]);
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    /// Letter-sized pages
    pub fn create_test_pdf(num_pages: u32, content_prefix: &str) -> Vec<u8> {
        let sizes: Vec<(i64, i64)> = (0..num_pages).map(|_| (612, 792)).collect();
        create_pdf_with_sizes(&sizes, content_prefix)
    }

    /// Solid-colour RGBA PNG
    pub fn create_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            let data: Vec<u8> = (0..width * height).flat_map(|_| rgba).collect();
            writer.write_image_data(&data).unwrap();
        }
        out
    }

    /// Solid-colour RGB JPEG
    pub fn create_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let data: Vec<u8> = (0..width * height).flat_map(|_| rgb).collect();
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
            .encode(&data, width, height, image::ColorType::Rgb8)
            .unwrap();
        out
    }
}
