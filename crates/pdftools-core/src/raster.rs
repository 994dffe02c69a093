//! Page rasterization
//!
//! Pages are rendered onto a white [`Pixmap`] and encoded as PNG or JPEG.
//! The built-in [`ContentRenderer`] fills and strokes paths, draws text with
//! the page's fonts, and composites image and form XObjects.

use crate::error::{PdfToolsError, Result};
use crate::loader::{self, inherited_attribute, media_box, page_size_for_id, resolve};
use crate::paint::{Matrix, Painter};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ImageEncoder, RgbaImage};
use lopdf::{Document, ObjectId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tiny_skia::Color;
use tracing::{debug, info};

pub use tiny_skia::Pixmap;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Largest rendered side in pixels
const MAX_DIMENSION: u32 = 16_384;

/// Encoded output format of a rendered page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl RasterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Jpeg => "jpeg",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            RasterFormat::Png => "image/png",
            RasterFormat::Jpeg => "image/jpeg",
        }
    }
}

impl FromStr for RasterFormat {
    type Err = PdfToolsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(RasterFormat::Png),
            "jpg" | "jpeg" => Ok(RasterFormat::Jpeg),
            other => Err(PdfToolsError::InvalidParameter(format!(
                "Unknown raster format: {}",
                other
            ))),
        }
    }
}

/// One rendered page
#[derive(Debug, Clone, PartialEq)]
pub struct RasterPage {
    /// 1-based
    pub page_number: u32,
    pub format: RasterFormat,
    pub scale: f64,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl RasterPage {
    /// Archive entry name, e.g. `page_3.png`
    pub fn file_name(&self) -> String {
        format!("page_{}.{}", self.page_number, self.format.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterOptions {
    pub format: RasterFormat,
    pub scale: f64,
    /// 1-100, JPEG only
    pub jpeg_quality: u8,
}

impl RasterOptions {
    pub fn new(format: RasterFormat, scale: f64) -> Self {
        Self {
            format,
            scale,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(PdfToolsError::InvalidParameter(format!(
                "Scale must be positive, got {}",
                self.scale
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PdfToolsError::InvalidParameter(format!(
                "JPEG quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

/// Draws one page onto a canvas already sized and cleared to white.
///
/// The canvas is `ceil(width * scale)` by `ceil(height * scale)` pixels with
/// the page's top-left corner at pixel (0, 0). Pixels are premultiplied RGBA.
pub trait PageRenderer: Sync {
    fn render(
        &self,
        doc: &Document,
        page_id: ObjectId,
        scale: f64,
        canvas: &mut Pixmap,
    ) -> Result<()>;
}

/// Render every page of `bytes`, in page order, with the built-in renderer
pub fn rasterize_pages(bytes: &[u8], format: RasterFormat, scale: f64) -> Result<Vec<RasterPage>> {
    rasterize_with(bytes, &RasterOptions::new(format, scale), &ContentRenderer)
}

/// Render every page of `bytes` with `renderer`
pub fn rasterize_with<R: PageRenderer + ?Sized>(
    bytes: &[u8],
    options: &RasterOptions,
    renderer: &R,
) -> Result<Vec<RasterPage>> {
    options.validate()?;
    let pdf = loader::load(bytes)?;
    let doc = pdf.document();
    let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();

    #[cfg(feature = "parallel")]
    let rendered = {
        use rayon::prelude::*;
        pages
            .par_iter()
            .map(|&(number, page_id)| render_page(doc, number, page_id, options, renderer))
            .collect::<Result<Vec<_>>>()?
    };
    #[cfg(not(feature = "parallel"))]
    let rendered = pages
        .iter()
        .map(|&(number, page_id)| render_page(doc, number, page_id, options, renderer))
        .collect::<Result<Vec<_>>>()?;

    info!(
        pages = rendered.len(),
        format = ?options.format,
        scale = options.scale,
        "Rasterized document"
    );
    Ok(rendered)
}

fn render_page<R: PageRenderer + ?Sized>(
    doc: &Document,
    page_number: u32,
    page_id: ObjectId,
    options: &RasterOptions,
    renderer: &R,
) -> Result<RasterPage> {
    let size = page_size_for_id(doc, page_id)?;
    let width = pixel_extent(size.width, options.scale)?;
    let height = pixel_extent(size.height, options.scale)?;

    let mut canvas = Pixmap::new(width, height).ok_or_else(|| {
        PdfToolsError::InvalidParameter(format!("Cannot allocate a {}x{} canvas", width, height))
    })?;
    canvas.fill(Color::WHITE);
    renderer.render(doc, page_id, options.scale, &mut canvas)?;
    let bytes = encode(to_image(&canvas), options)?;
    debug!(page = page_number, width, height, "Rendered page");

    Ok(RasterPage {
        page_number,
        format: options.format,
        scale: options.scale,
        width,
        height,
        bytes,
    })
}

fn pixel_extent(points: f64, scale: f64) -> Result<u32> {
    let pixels = (points * scale).ceil().max(1.0);
    if pixels > f64::from(MAX_DIMENSION) {
        return Err(PdfToolsError::InvalidParameter(format!(
            "Rendered page side would be {} pixels; the limit is {}",
            pixels, MAX_DIMENSION
        )));
    }
    Ok(pixels as u32)
}

/// Demultiplied copy of the canvas
fn to_image(canvas: &Pixmap) -> RgbaImage {
    let pixels = canvas
        .pixels()
        .iter()
        .flat_map(|pixel| {
            let color = pixel.demultiply();
            [color.red(), color.green(), color.blue(), color.alpha()]
        })
        .collect();
    RgbaImage::from_raw(canvas.width(), canvas.height(), pixels)
        .unwrap_or_else(|| RgbaImage::new(canvas.width(), canvas.height()))
}

fn encode(canvas: RgbaImage, options: &RasterOptions) -> Result<Vec<u8>> {
    let (width, height) = canvas.dimensions();
    let mut out = Vec::new();
    let encoded = match options.format {
        RasterFormat::Png => {
            PngEncoder::new(&mut out).write_image(canvas.as_raw(), width, height, ColorType::Rgba8)
        }
        RasterFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(canvas).into_rgb8();
            JpegEncoder::new_with_quality(&mut out, options.jpeg_quality).write_image(
                rgb.as_raw(),
                width,
                height,
                ColorType::Rgb8,
            )
        }
    };
    encoded.map_err(|e| PdfToolsError::OperationError(format!("Failed to encode page: {}", e)))?;
    Ok(out)
}

/// Renderer that interprets page content streams directly
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentRenderer;

impl PageRenderer for ContentRenderer {
    fn render(
        &self,
        doc: &Document,
        page_id: ObjectId,
        scale: f64,
        canvas: &mut Pixmap,
    ) -> Result<()> {
        let [x0, y0, x1, y1] = media_box(doc, page_id)?;
        let left = x0.min(x1);
        let top = y0.max(y1);
        // Flip Y: page space is bottom-up, pixels are top-down
        let base = Matrix([scale, 0.0, 0.0, -scale, -left * scale, top * scale]);

        let content = doc
            .get_page_content(page_id)
            .map_err(|e| PdfToolsError::CorruptDocument(format!("Page content: {}", e)))?;
        let resources = inherited_attribute(doc, page_id, b"Resources")
            .and_then(|obj| resolve(doc, &obj).as_dict().ok().cloned())
            .unwrap_or_default();

        let mut painter = Painter::new(doc, canvas, base);
        painter.run(&content, &resources, 0);
        if painter.skipped > 0 {
            debug!(skipped = painter.skipped, "Skipped unsupported drawing operations");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::{place_image, Rect};
    use crate::embed::ImageFormat;
    use crate::loader::test_support::{create_pdf_with_sizes, create_png, create_test_pdf};
    use crate::loader::{empty_document, save_document};
    use image::Rgba;
    use lopdf::{dictionary, Dictionary, Object, Stream};
    use pretty_assertions::assert_eq;

    /// Single-page document with raw `content`; `resources` may add objects
    fn pdf_with_content(
        width: i64,
        height: i64,
        content: &[u8],
        resources: impl FnOnce(&mut Document) -> Dictionary,
    ) -> Vec<u8> {
        let (mut doc, pages_id) = empty_document();
        let resources = resources(&mut doc);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => Object::Array(vec![0.into(), 0.into(), width.into(), height.into()]),
            "Resources" => resources,
            "Contents" => content_id,
        });
        if let Ok(Object::Dictionary(pages)) = doc.get_object_mut(pages_id) {
            pages.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
            pages.set("Count", Object::Integer(1));
        }
        save_document(&mut doc).unwrap()
    }

    fn render_png(pdf: &[u8], scale: f64) -> RgbaImage {
        let pages = rasterize_pages(pdf, RasterFormat::Png, scale).unwrap();
        image::load_from_memory(&pages[0].bytes).unwrap().to_rgba8()
    }

    fn rgb_at(image: &RgbaImage, x: u32, y: u32) -> [u8; 3] {
        let Rgba([r, g, b, _]) = *image.get_pixel(x, y);
        [r, g, b]
    }

    #[test]
    fn test_one_output_per_page_in_order() {
        let pdf = create_test_pdf(3, "Raster");
        let pages = rasterize_pages(&pdf, RasterFormat::Png, 1.0).unwrap();

        assert_eq!(pages.len(), 3);
        let numbers: Vec<u32> = pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        for page in &pages {
            assert_eq!((page.width, page.height), (612, 792));
            assert!(page.bytes.starts_with(b"\x89PNG"));
        }
        assert_eq!(pages[1].file_name(), "page_2.png");
    }

    #[test]
    fn test_jpeg_output_is_scaled() {
        let pdf = create_test_pdf(1, "Jpeg");
        let pages = rasterize_pages(&pdf, RasterFormat::Jpeg, 2.0).unwrap();

        assert!(pages[0].bytes.starts_with(&[0xFF, 0xD8]));
        let decoded = image::load_from_memory(&pages[0].bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1224, 1584));
        assert_eq!(pages[0].file_name(), "page_1.jpeg");
    }

    #[test]
    fn test_fractional_sizes_round_up() {
        let pdf = create_pdf_with_sizes(&[(101, 51)], "Odd");
        let pages = rasterize_pages(&pdf, RasterFormat::Png, 1.5).unwrap();
        assert_eq!((pages[0].width, pages[0].height), (152, 77));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let pdf = create_test_pdf(1, "Opts");
        for scale in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                rasterize_pages(&pdf, RasterFormat::Png, scale),
                Err(PdfToolsError::InvalidParameter(_))
            ));
        }
        let options = RasterOptions::new(RasterFormat::Jpeg, 1.0).with_jpeg_quality(0);
        assert!(matches!(
            rasterize_with(&pdf, &options, &ContentRenderer),
            Err(PdfToolsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_filled_rectangle_is_drawn_top_down() {
        let pdf = pdf_with_content(100, 100, b"1 0 0 rg 10 10 20 20 re f", |_| Dictionary::new());
        let image = render_png(&pdf, 1.0);

        // Page y 10..30 is pixel row 70..90
        assert_eq!(rgb_at(&image, 20, 80), [255, 0, 0]);
        assert_eq!(rgb_at(&image, 20, 20), [255, 255, 255]);
        assert_eq!(rgb_at(&image, 50, 50), [255, 255, 255]);
    }

    #[test]
    fn test_cmyk_fill_and_graphics_state_restore() {
        let content = b"q 0 0 0 1 k 0 0 50 100 re f Q 50 0 50 100 re f";
        let pdf = pdf_with_content(100, 100, content, |_| Dictionary::new());
        let image = render_png(&pdf, 1.0);
        assert_eq!(rgb_at(&image, 10, 50), [0, 0, 0]);
        // Default fill colour is black after Q too
        assert_eq!(rgb_at(&image, 90, 50), [0, 0, 0]);
    }

    #[test]
    fn test_fill_alpha_from_ext_gstate() {
        let pdf = pdf_with_content(20, 20, b"/GS1 gs 1 0 0 rg 0 0 20 20 re f", |_| {
            dictionary! {
                "ExtGState" => dictionary! { "GS1" => dictionary! { "ca" => Object::Real(0.5) } },
            }
        });
        let image = render_png(&pdf, 1.0);
        let [r, g, b] = rgb_at(&image, 10, 10);
        assert_eq!(r, 255);
        assert!((127..=128).contains(&g) && (127..=128).contains(&b), "{:?}", [r, g, b]);
    }

    #[test]
    fn test_form_xobject_with_matrix() {
        let pdf = pdf_with_content(100, 100, b"/Fm1 Do", |doc| {
            let form_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => Object::Array(vec![0.into(), 0.into(), 10.into(), 10.into()]),
                    "Matrix" => Object::Array(vec![
                        1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 50.into(),
                    ]),
                },
                b"0 0 1 rg 0 0 10 10 re f".to_vec(),
            ));
            dictionary! { "XObject" => dictionary! { "Fm1" => form_id } }
        });

        let image = render_png(&pdf, 1.0);
        // Page (55, 55) is pixel (55, 45)
        assert_eq!(rgb_at(&image, 55, 45), [0, 0, 255]);
        assert_eq!(rgb_at(&image, 20, 80), [255, 255, 255]);
    }

    #[test]
    fn test_placed_image_is_rendered() {
        let pdf = create_pdf_with_sizes(&[(100, 100)], "Img");
        let png = create_png(4, 4, [0, 200, 0, 255]);
        let pdf = place_image(&pdf, 1, &png, ImageFormat::Png, Rect::new(0.0, 0.0, 50.0, 50.0)).unwrap();

        let image = render_png(&pdf, 2.0);
        assert_eq!(image.dimensions(), (200, 200));
        // Top-left quarter of the page
        assert_eq!(rgb_at(&image, 40, 40), [0, 200, 0]);
        assert_eq!(rgb_at(&image, 150, 150), [255, 255, 255]);
    }

    #[test]
    fn test_transparent_image_pixels_keep_background() {
        let pdf = create_pdf_with_sizes(&[(100, 100)], "Alpha");
        let png = create_png(2, 2, [255, 0, 0, 0]);
        let pdf = place_image(&pdf, 1, &png, ImageFormat::Png, Rect::new(0.0, 0.0, 100.0, 100.0)).unwrap();

        let image = render_png(&pdf, 1.0);
        assert_eq!(rgb_at(&image, 25, 75), [255, 255, 255]);
    }

    struct SolidRenderer([u8; 3]);

    impl PageRenderer for SolidRenderer {
        fn render(&self, _: &Document, _: ObjectId, _: f64, canvas: &mut Pixmap) -> Result<()> {
            let [r, g, b] = self.0;
            canvas.fill(Color::from_rgba8(r, g, b, 255));
            Ok(())
        }
    }

    #[test]
    fn test_custom_renderer() {
        let pdf = create_test_pdf(2, "Custom");
        let options = RasterOptions::new(RasterFormat::Png, 0.5);
        let pages = rasterize_with(&pdf, &options, &SolidRenderer([1, 2, 3])).unwrap();
        assert_eq!(pages.len(), 2);
        let image = image::load_from_memory(&pages[1].bytes).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (306, 396));
        assert_eq!(rgb_at(&image, 100, 100), [1, 2, 3]);
    }

    fn is_white(pixel: [u8; 3]) -> bool {
        pixel.iter().all(|&c| c > 250)
    }

    #[test]
    fn test_text_is_drawn() {
        // Baseline at page y = 50, glyphs from x = 50
        let pdf = create_test_pdf(1, "Visible text");
        let image = render_png(&pdf, 2.0);
        assert_eq!(image.dimensions(), (1224, 1584));

        let inked = (100..400)
            .flat_map(|x| (1455..1495).map(move |y| (x, y)))
            .filter(|&(x, y)| !is_white(rgb_at(&image, x, y)))
            .count();
        assert!(inked > 50, "only {} inked pixels near the text", inked);

        // Nothing above the text line
        let stray = (0..1224)
            .flat_map(|x| (0..1400).step_by(7).map(move |y| (x, y)))
            .filter(|&(x, y)| !is_white(rgb_at(&image, x, y)))
            .count();
        assert_eq!(stray, 0);
    }

    #[test]
    fn test_invisible_text_mode_draws_nothing() {
        let content = b"BT /F1 24 Tf 3 Tr 10 40 Td (Hidden) Tj ET";
        let pdf = pdf_with_content(200, 100, content, |_| {
            dictionary! {
                "Font" => dictionary! {
                    "F1" => dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Helvetica" },
                },
            }
        });
        let image = render_png(&pdf, 1.0);
        assert!(image.pixels().all(|p| p.0[..3].iter().all(|&c| c == 255)));
    }

    #[test]
    fn test_triangle_fill_follows_the_path() {
        let pdf = pdf_with_content(100, 100, b"0 0 m 100 0 l 0 100 l h f", |_| Dictionary::new());
        let image = render_png(&pdf, 1.0);

        // Lower-left half is inside, upper-right half is not
        assert_eq!(rgb_at(&image, 10, 90), [0, 0, 0]);
        assert_eq!(rgb_at(&image, 90, 10), [255, 255, 255]);
        assert_eq!(rgb_at(&image, 70, 60), [255, 255, 255]);
    }

    #[test]
    fn test_stroked_line() {
        let pdf = pdf_with_content(100, 100, b"2 w 0 0 1 RG 10 50 m 90 50 l S", |_| Dictionary::new());
        let image = render_png(&pdf, 1.0);

        assert_eq!(rgb_at(&image, 50, 50), [0, 0, 255]);
        assert_eq!(rgb_at(&image, 50, 20), [255, 255, 255]);
        assert_eq!(rgb_at(&image, 5, 50), [255, 255, 255]);
    }

    #[test]
    fn test_even_odd_fill_leaves_a_hole() {
        let content = b"0 0 100 100 re 25 25 50 50 re f*";
        let pdf = pdf_with_content(100, 100, content, |_| Dictionary::new());
        let image = render_png(&pdf, 1.0);
        assert_eq!(rgb_at(&image, 10, 10), [0, 0, 0]);
        assert_eq!(rgb_at(&image, 50, 50), [255, 255, 255]);

        let nonzero = pdf_with_content(100, 100, b"0 0 100 100 re 25 25 50 50 re f", |_| Dictionary::new());
        assert_eq!(rgb_at(&render_png(&nonzero, 1.0), 50, 50), [0, 0, 0]);
    }

    #[test]
    fn test_clip_limits_later_fills() {
        let content = b"q 0 0 50 100 re W n 1 0 0 rg 0 0 100 100 re f Q 0 1 0 rg 60 0 10 10 re f";
        let pdf = pdf_with_content(100, 100, content, |_| Dictionary::new());
        let image = render_png(&pdf, 1.0);

        assert_eq!(rgb_at(&image, 25, 50), [255, 0, 0]);
        assert_eq!(rgb_at(&image, 75, 50), [255, 255, 255]);
        // Q restores the unclipped state
        assert_eq!(rgb_at(&image, 65, 95), [0, 255, 0]);
    }

    #[test]
    fn test_image_mask_paints_fill_colour() {
        let pdf = pdf_with_content(20, 20, b"0 0 1 rg q 20 0 0 20 0 0 cm /M Do Q", |doc| {
            // 2x1 stencil: left sample 0 paints, right sample 1 does not
            let mask_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 2,
                    "Height" => 1,
                    "ImageMask" => true,
                    "BitsPerComponent" => 1,
                },
                vec![0b0100_0000],
            ));
            dictionary! { "XObject" => dictionary! { "M" => mask_id } }
        });
        let image = render_png(&pdf, 1.0);
        assert_eq!(rgb_at(&image, 3, 10), [0, 0, 255]);
        assert_eq!(rgb_at(&image, 17, 10), [255, 255, 255]);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("PNG".parse::<RasterFormat>().unwrap(), RasterFormat::Png);
        assert_eq!("jpg".parse::<RasterFormat>().unwrap(), RasterFormat::Jpeg);
        assert!("gif".parse::<RasterFormat>().is_err());
        assert_eq!(RasterFormat::Jpeg.mime(), "image/jpeg");
    }
}
