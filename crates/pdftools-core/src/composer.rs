//! Page composer: draw text runs and images onto an existing page
//!
//! Positions are top-left-relative document coordinates as produced by
//! [`crate::coords::map_click`]. They are flipped into PDF space here, with
//! the height of the page being drawn on.

use crate::color::Rgb;
use crate::coords::{image_origin_y, text_baseline_y};
use crate::embed::{decode_png_data_url, EmbeddedImage, ImageFormat};
use crate::error::{PdfToolsError, Result};
use crate::loader::{self, inherited_attribute, resolve, PageSize, PdfDocument};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Line spacing for multi-line text, as a multiple of the font size
const LINE_HEIGHT: f64 = 1.2;

/// An area on a page: top-left corner plus size, in document units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.width <= 0.0 || self.height <= 0.0 {
            return Err(PdfToolsError::InvalidParameter(format!(
                "Invalid placement {}x{} at ({}, {})",
                self.width, self.height, self.x, self.y
            )));
        }
        Ok(())
    }
}

/// Draw `text` on page `page` with its baseline at top-relative `(x, y)`
pub fn place_text(
    bytes: &[u8],
    page: u32,
    text: &str,
    x: f64,
    y: f64,
    font_size: f64,
    color: Rgb,
) -> Result<Vec<u8>> {
    let mut pdf = loader::load(bytes)?;
    let mut canvas = PageCanvas::open(&mut pdf, page)?;
    canvas.draw_text(text, x, y, font_size, color)?;
    canvas.finish()?;
    pdf.save()
}

/// Draw a PNG or JPEG image with its top-left corner at `area.x, area.y`
pub fn place_image(
    bytes: &[u8],
    page: u32,
    image_bytes: &[u8],
    format: ImageFormat,
    area: Rect,
) -> Result<Vec<u8>> {
    let mut pdf = loader::load(bytes)?;
    let mut canvas = PageCanvas::open(&mut pdf, page)?;
    let image = EmbeddedImage::decode(image_bytes, format)?;
    canvas.draw_image(&image, area)?;
    canvas.finish()?;
    pdf.save()
}

/// Draw a signature given as a `data:image/png;base64,...` URL
pub fn place_signature(bytes: &[u8], page: u32, data_url: &str, area: Rect) -> Result<Vec<u8>> {
    let mut pdf = loader::load(bytes)?;
    let mut canvas = PageCanvas::open(&mut pdf, page)?;
    let image = decode_signature(data_url)?;
    canvas.draw_image(&image, area)?;
    canvas.finish()?;
    pdf.save()
}

/// Decode a signature data URL into an embeddable image
pub(crate) fn decode_signature(data_url: &str) -> Result<EmbeddedImage> {
    let png = decode_png_data_url(data_url)?;
    EmbeddedImage::decode(&png, ImageFormat::Png)
        .map_err(|e| PdfToolsError::InvalidSignatureData(e.to_string()))
}

/// Collects drawing operations for one page and writes them as a single
/// content stream.
pub(crate) struct PageCanvas<'a> {
    doc: &'a mut Document,
    page_id: ObjectId,
    size: PageSize,
    operations: Vec<Operation>,
    font: Option<String>,
}

impl<'a> PageCanvas<'a> {
    /// Fails with `InvalidPageIndex` when `page` is not in `1..=page_count`
    pub(crate) fn open(pdf: &'a mut PdfDocument, page: u32) -> Result<Self> {
        let page_id = pdf.page_id(page)?;
        let size = pdf.page_size(page)?;
        Ok(Self {
            doc: pdf.document_mut(),
            page_id,
            size,
            operations: Vec::new(),
            font: None,
        })
    }

    pub(crate) fn size(&self) -> PageSize {
        self.size
    }

    pub(crate) fn page_id(&self) -> ObjectId {
        self.page_id
    }

    pub(crate) fn document_mut(&mut self) -> &mut Document {
        self.doc
    }

    pub(crate) fn draw_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        font_size: f64,
        color: Rgb,
    ) -> Result<()> {
        if !(font_size.is_finite() && font_size > 0.0) || !x.is_finite() || !y.is_finite() {
            return Err(PdfToolsError::InvalidParameter(format!(
                "Invalid text placement: size {} at ({}, {})",
                font_size, x, y
            )));
        }

        let font = self.font_resource()?;
        let baseline = text_baseline_y(self.size.height, y);
        let [r, g, b] = color.components();

        self.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font.into_bytes()), real(font_size)]),
            Operation::new("rg", vec![Object::Real(r), Object::Real(g), Object::Real(b)]),
            Operation::new("TL", vec![real(font_size * LINE_HEIGHT)]),
            Operation::new(
                "Tm",
                vec![
                    Object::Integer(1),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(1),
                    real(x),
                    real(baseline),
                ],
            ),
        ]);
        for (i, line) in text.lines().enumerate() {
            if i > 0 {
                self.operations.push(Operation::new("T*", vec![]));
            }
            self.operations.push(Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(line), StringFormat::Literal)],
            ));
        }
        self.operations.push(Operation::new("ET", vec![]));
        Ok(())
    }

    pub(crate) fn draw_image(&mut self, image: &EmbeddedImage, area: Rect) -> Result<()> {
        area.validate()?;
        let image_id = image.add_to(self.doc);
        let name = add_page_resource(self.doc, self.page_id, b"XObject", "PtIm", image_id)?;
        let origin_y = image_origin_y(self.size.height, area.y, area.height);

        self.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    real(area.width),
                    Object::Integer(0),
                    Object::Integer(0),
                    real(area.height),
                    real(area.x),
                    real(origin_y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    /// Write the collected operations after the page's existing content
    pub(crate) fn finish(self) -> Result<()> {
        if self.operations.is_empty() {
            return Ok(());
        }
        let content = Content {
            operations: self.operations,
        }
        .encode()?;
        debug!(page = ?self.page_id, bytes = content.len(), "Appending page content");
        append_isolated_content(self.doc, self.page_id, content)
    }

    /// Standard Helvetica, added once per canvas
    fn font_resource(&mut self) -> Result<String> {
        if let Some(name) = &self.font {
            return Ok(name.clone());
        }
        let font_id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let name = add_page_resource(self.doc, self.page_id, b"Font", "PtF", font_id)?;
        self.font = Some(name.clone());
        Ok(name)
    }
}

/// Register `target` under a fresh name in one category of the page's
/// resources (`Font`, `XObject`, ...), returning the name.
///
/// Inherited or shared resource dictionaries are copied onto the page first
/// so other pages are left untouched.
pub(crate) fn add_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &[u8],
    prefix: &str,
    target: ObjectId,
) -> Result<String> {
    let mut resources = inherited_attribute(doc, page_id, b"Resources")
        .and_then(|obj| resolve(doc, &obj).as_dict().ok().cloned())
        .unwrap_or_else(Dictionary::new);

    let mut entries = resources
        .get(category)
        .ok()
        .and_then(|obj| resolve(doc, obj).as_dict().ok().cloned())
        .unwrap_or_else(Dictionary::new);

    let mut n = 1;
    let name = loop {
        let candidate = format!("{}{}", prefix, n);
        if !entries.has(candidate.as_bytes()) {
            break candidate;
        }
        n += 1;
    };

    entries.set(name.clone(), Object::Reference(target));
    resources.set(category, Object::Dictionary(entries));
    page_dict_mut(doc, page_id)?.set("Resources", Object::Dictionary(resources));
    Ok(name)
}

/// Append `content` to a page, wrapping the existing content in `q`/`Q` so
/// its graphics state does not carry over.
pub(crate) fn append_isolated_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
) -> Result<()> {
    let mut contents: Vec<Object> = {
        let page = doc.get_object(page_id).and_then(Object::as_dict)?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    };

    let body = if contents.is_empty() {
        content
    } else {
        let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        contents.insert(0, Object::Reference(open_id));
        // Leading newline: viewers concatenate streams without a separator
        let mut body = b"\nQ\n".to_vec();
        body.extend_from_slice(&content);
        body
    };

    let content_id = doc.add_object(Stream::new(Dictionary::new(), body));
    contents.push(Object::Reference(content_id));
    page_dict_mut(doc, page_id)?.set("Contents", Object::Array(contents));
    Ok(())
}

pub(crate) fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| PdfToolsError::CorruptDocument(format!("Page is not a dictionary: {}", e)))
}

/// Encode for a WinAnsi simple font; characters outside Latin-1 become `?`
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            code @ 0x20..=0x7E | code @ 0xA0..=0xFF => code as u8,
            _ => b'?',
        })
        .collect()
}

pub(crate) fn real(value: f64) -> Object {
    Object::Real(value as f32)
}
