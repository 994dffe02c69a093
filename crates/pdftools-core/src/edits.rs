//! Batches of page elements applied in a single load/save pass
//!
//! An [`Element`] is one placed item: a text run, an image, a signature or
//! an annotation. Callers keep their pending elements as a plain `Vec` and
//! hand the whole list to [`apply_elements`]; positions use the same
//! top-left-relative coordinates and per-element math as the single-element
//! functions in [`crate::composer`].

use crate::color::Rgb;
use crate::composer::{decode_signature, page_dict_mut, real, PageCanvas, Rect};
use crate::embed::{base64_data, EmbeddedImage, ImageFormat};
use crate::error::{PdfToolsError, Result};
use crate::loader::{self, PageSize};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

fn default_font_size() -> f64 {
    16.0
}

fn default_opacity() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub text: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default)]
    pub color: Rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePlacement {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub format: ImageFormat,
    /// Encoded image bytes (base64 in JSON)
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignaturePlacement {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// `data:image/png;base64,...`
    pub data_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    Strikethrough,
    Rectangle,
    Circle,
    /// Sticky note carrying `contents`
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub page: u32,
    pub kind: AnnotationKind,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "Annotation::default_color")]
    pub color: Rgb,
    #[serde(default)]
    pub contents: Option<String>,
    /// Used by the text markup kinds
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

impl Annotation {
    fn default_color() -> Rgb {
        Rgb::YELLOW
    }

    pub fn new(page: u32, kind: AnnotationKind, area: Rect) -> Self {
        Self {
            page,
            kind,
            x: area.x,
            y: area.y,
            width: area.width,
            height: area.height,
            color: Self::default_color(),
            contents: None,
            opacity: default_opacity(),
        }
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }

    pub fn with_contents(mut self, contents: impl Into<String>) -> Self {
        self.contents = Some(contents.into());
        self
    }
}

/// A placed visual item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Text(TextRun),
    Image(ImagePlacement),
    Signature(SignaturePlacement),
    Annotation(Annotation),
}

impl Element {
    pub fn page(&self) -> u32 {
        match self {
            Element::Text(run) => run.page,
            Element::Image(image) => image.page,
            Element::Signature(signature) => signature.page,
            Element::Annotation(annotation) => annotation.page,
        }
    }
}

/// Apply every element in one pass and serialize once.
///
/// Elements on the same page are drawn in list order. The batch aborts on
/// the first failing element; an empty batch returns the input unchanged.
pub fn apply_elements(bytes: &[u8], elements: &[Element]) -> Result<Vec<u8>> {
    if elements.is_empty() {
        return Ok(bytes.to_vec());
    }

    let mut pdf = loader::load(bytes)?;
    let page_count = pdf.page_count();

    let mut by_page: BTreeMap<u32, Vec<&Element>> = BTreeMap::new();
    for element in elements {
        let page = element.page();
        if page == 0 || page > page_count {
            return Err(PdfToolsError::InvalidPageIndex {
                index: page,
                page_count,
            });
        }
        by_page.entry(page).or_default().push(element);
    }

    for (page, page_elements) in &by_page {
        let mut canvas = PageCanvas::open(&mut pdf, *page)?;
        for element in page_elements {
            apply_element(&mut canvas, element)?;
        }
        canvas.finish()?;
    }

    info!(
        elements = elements.len(),
        pages = by_page.len(),
        "Applied page elements"
    );
    pdf.save()
}

/// Add annotations to a document
pub fn annotate(bytes: &[u8], annotations: &[Annotation]) -> Result<Vec<u8>> {
    let elements: Vec<Element> = annotations
        .iter()
        .cloned()
        .map(Element::Annotation)
        .collect();
    apply_elements(bytes, &elements)
}

fn apply_element(canvas: &mut PageCanvas<'_>, element: &Element) -> Result<()> {
    match element {
        Element::Text(run) => canvas.draw_text(&run.text, run.x, run.y, run.font_size, run.color),
        Element::Image(image) => {
            let embedded = EmbeddedImage::decode(&image.data, image.format)?;
            canvas.draw_image(
                &embedded,
                Rect::new(image.x, image.y, image.width, image.height),
            )
        }
        Element::Signature(signature) => {
            let embedded = decode_signature(&signature.data_url)?;
            canvas.draw_image(
                &embedded,
                Rect::new(signature.x, signature.y, signature.width, signature.height),
            )
        }
        Element::Annotation(annotation) => {
            let size = canvas.size();
            let page_id = canvas.page_id();
            add_annotation(canvas.document_mut(), page_id, size, annotation)
        }
    }
}

fn add_annotation(
    doc: &mut Document,
    page_id: ObjectId,
    size: PageSize,
    annotation: &Annotation,
) -> Result<()> {
    let area = Rect::new(annotation.x, annotation.y, annotation.width, annotation.height);
    area.validate()?;

    // PDF-space corners
    let left = area.x;
    let right = area.x + area.width;
    let top = size.height - area.y;
    let bottom = top - area.height;

    let mut annot = Dictionary::new();
    annot.set("Type", Object::Name(b"Annot".to_vec()));
    annot.set(
        "Rect",
        Object::Array(vec![real(left), real(bottom), real(right), real(top)]),
    );
    annot.set("C", Object::Array(annotation.color.to_pdf_array()));
    // Print flag
    annot.set("F", Object::Integer(4));

    match annotation.kind {
        AnnotationKind::Highlight | AnnotationKind::Underline | AnnotationKind::Strikethrough => {
            let subtype: &[u8] = match annotation.kind {
                AnnotationKind::Highlight => b"Highlight",
                AnnotationKind::Underline => b"Underline",
                _ => b"StrikeOut",
            };
            annot.set("Subtype", Object::Name(subtype.to_vec()));
            annot.set(
                "QuadPoints",
                Object::Array(vec![
                    real(left),
                    real(top),
                    real(right),
                    real(top),
                    real(left),
                    real(bottom),
                    real(right),
                    real(bottom),
                ]),
            );
            annot.set("CA", real(annotation.opacity.clamp(0.0, 1.0)));
        }
        AnnotationKind::Rectangle | AnnotationKind::Circle => {
            let subtype: &[u8] = if annotation.kind == AnnotationKind::Rectangle {
                b"Square"
            } else {
                b"Circle"
            };
            annot.set("Subtype", Object::Name(subtype.to_vec()));
            let mut border = Dictionary::new();
            border.set("W", Object::Integer(2));
            annot.set("BS", Object::Dictionary(border));
        }
        AnnotationKind::Note => {
            let contents = annotation
                .contents
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .ok_or_else(|| {
                    PdfToolsError::InvalidParameter("Note annotations need text".into())
                })?;
            annot.set("Subtype", Object::Name(b"Text".to_vec()));
            annot.set("Name", Object::Name(b"Comment".to_vec()));
            annot.set("Open", Object::Boolean(false));
            annot.set(
                "Contents",
                text_string(contents),
            );
        }
    }

    if annotation.kind != AnnotationKind::Note {
        if let Some(contents) = annotation.contents.as_deref() {
            annot.set(
                "Contents",
                text_string(contents),
            );
        }
    }

    let annot_id = doc.add_object(Object::Dictionary(annot));
    add_annotation_to_page(doc, page_id, annot_id)
}

/// PDF text string: ASCII as a literal, anything else UTF-16BE behind a BOM
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn add_annotation_to_page(doc: &mut Document, page_id: ObjectId, annot_id: ObjectId) -> Result<()> {
    // An indirect /Annots array may be shared; give the page its own copy
    let existing = {
        let page = doc.get_object(page_id).and_then(Object::as_dict)?;
        match page.get(b"Annots") {
            Ok(Object::Array(items)) => items.clone(),
            Ok(Object::Reference(id)) => doc
                .get_object(*id)
                .and_then(Object::as_array)
                .map(|items| items.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    };

    let mut annots = existing;
    annots.push(Object::Reference(annot_id));
    page_dict_mut(doc, page_id)?.set("Annots", Object::Array(annots));
    Ok(())
}
