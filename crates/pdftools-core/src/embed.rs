//! Raster images as PDF image XObjects
//!
//! PNG data is decoded and re-encoded as Flate-compressed RGB or gray
//! samples with an optional soft mask for alpha. JPEG data is embedded
//! as-is behind a `DCTDecode` filter, with the colour space read from its
//! frame header; Adobe CMYK files get an inverting `/Decode` array.

use crate::error::{PdfToolsError, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegDecoder;
use image::ImageDecoder;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use std::str::FromStr;
use tracing::debug;

/// Image formats that can be placed on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl ImageFormat {
    /// From a MIME type such as `image/png`
    pub fn from_mime(mime: &str) -> Result<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Ok(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
            other => Err(PdfToolsError::UnsupportedImageFormat(other.to_string())),
        }
    }

    /// From a file extension, with or without the leading dot
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            other => Err(PdfToolsError::UnsupportedImageFormat(other.to_string())),
        }
    }

    /// Identify the format from the file signature
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = PdfToolsError;

    /// Accepts a bare name (`png`, `jpg`) or a MIME type
    fn from_str(s: &str) -> Result<Self> {
        if s.contains('/') {
            ImageFormat::from_mime(s)
        } else {
            ImageFormat::from_extension(s)
        }
    }
}

/// A decoded image ready to be added to a document
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub width: u32,
    pub height: u32,
    image: Stream,
    soft_mask: Option<Stream>,
}

impl EmbeddedImage {
    /// Decode `bytes`, declared as `format`.
    ///
    /// The file signature wins over the declared format. Data that is
    /// neither PNG nor JPEG fails with `UnsupportedImageFormat`.
    pub fn decode(bytes: &[u8], format: ImageFormat) -> Result<Self> {
        let actual = ImageFormat::sniff(bytes).ok_or_else(|| {
            PdfToolsError::UnsupportedImageFormat("unrecognized image data".into())
        })?;
        if actual != format {
            debug!(declared = ?format, actual = ?actual, "Image format mismatch");
        }
        match actual {
            ImageFormat::Png => Self::from_png(bytes),
            ImageFormat::Jpeg => Self::from_jpeg(bytes),
        }
    }

    fn from_png(bytes: &[u8]) -> Result<Self> {
        let mut decoder = png::Decoder::new(bytes);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder
            .read_info()
            .map_err(|e| PdfToolsError::InvalidImage(format!("PNG: {}", e)))?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut buffer)
            .map_err(|e| PdfToolsError::InvalidImage(format!("PNG: {}", e)))?;
        let samples = &buffer[..info.buffer_size()];
        let (width, height) = (info.width, info.height);

        let (color_space, color, alpha) = match info.color_type {
            png::ColorType::Grayscale => ("DeviceGray", samples.to_vec(), None),
            png::ColorType::Rgb => ("DeviceRGB", samples.to_vec(), None),
            png::ColorType::GrayscaleAlpha => {
                let (gray, alpha) = split_alpha(samples, 1);
                ("DeviceGray", gray, Some(alpha))
            }
            png::ColorType::Rgba => {
                let (rgb, alpha) = split_alpha(samples, 3);
                ("DeviceRGB", rgb, Some(alpha))
            }
            png::ColorType::Indexed => {
                return Err(PdfToolsError::InvalidImage(
                    "PNG palette was not expanded".into(),
                ))
            }
        };

        // A fully opaque alpha channel needs no mask
        let alpha = alpha.filter(|a| a.iter().any(|&v| v != u8::MAX));

        let soft_mask = match alpha {
            Some(alpha) => Some(flate_stream(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                &alpha,
            )?),
            None => None,
        };

        let image = flate_stream(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
            },
            &color,
        )?;

        Ok(Self {
            width,
            height,
            image,
            soft_mask,
        })
    }

    fn from_jpeg(bytes: &[u8]) -> Result<Self> {
        let decoder = JpegDecoder::new(Cursor::new(bytes))
            .map_err(|e| PdfToolsError::InvalidImage(format!("JPEG: {}", e)))?;
        let (width, height) = decoder.dimensions();
        // The decoder reports CMYK as converted RGB; the frame header does not
        let layout = JpegLayout::scan(bytes)
            .ok_or_else(|| PdfToolsError::InvalidImage("JPEG: no frame header".into()))?;
        let color_space = match layout.components {
            1 => "DeviceGray",
            3 => "DeviceRGB",
            4 => "DeviceCMYK",
            n => {
                return Err(PdfToolsError::InvalidImage(format!(
                    "JPEG: {} colour components",
                    n
                )))
            }
        };

        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        };
        if layout.components == 4 && layout.adobe {
            let decode = [1, 0, 1, 0, 1, 0, 1, 0].map(Object::Integer).to_vec();
            dict.set("Decode", Object::Array(decode));
        }
        debug!(components = layout.components, adobe = layout.adobe, "Embedding JPEG");

        let mut image = Stream::new(dict, bytes.to_vec());
        // Already compressed; lopdf must not deflate it again
        image.allows_compression = false;

        Ok(Self {
            width,
            height,
            image,
            soft_mask: None,
        })
    }

    /// Add the image (and its soft mask) to `doc`, returning the XObject id
    pub fn add_to(&self, doc: &mut Document) -> ObjectId {
        let mut image = self.image.clone();
        if let Some(mask) = &self.soft_mask {
            let mask_id = doc.add_object(mask.clone());
            image.dict.set("SMask", Object::Reference(mask_id));
        }
        doc.add_object(image)
    }
}

/// Frame facts the PDF image dictionary needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JpegLayout {
    components: u8,
    /// An APP14 "Adobe" segment precedes the frame; its CMYK samples are inverted
    adobe: bool,
}

impl JpegLayout {
    /// Walk marker segments up to the first start-of-frame
    fn scan(bytes: &[u8]) -> Option<Self> {
        if !bytes.starts_with(&[0xFF, 0xD8]) {
            return None;
        }
        let mut adobe = false;
        let mut pos = 2;
        loop {
            // Markers may be padded with extra 0xFF bytes
            while bytes.get(pos) == Some(&0xFF) && bytes.get(pos + 1) == Some(&0xFF) {
                pos += 1;
            }
            if *bytes.get(pos)? != 0xFF {
                return None;
            }
            let marker = *bytes.get(pos + 1)?;
            let length = usize::from(u16::from_be_bytes([*bytes.get(pos + 2)?, *bytes.get(pos + 3)?]));
            let segment = bytes.get(pos + 4..pos + 2 + length)?;
            match marker {
                0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                    return Some(Self {
                        components: *segment.get(5)?,
                        adobe,
                    });
                }
                0xEE if segment.starts_with(b"Adobe") => adobe = true,
                0xDA | 0xD9 => return None,
                _ => {}
            }
            pos += 2 + length;
        }
    }
}

/// Decode a `data:image/png;base64,...` URL into PNG bytes.
///
/// A bare base64 payload without the `data:` header is rejected, as is any
/// header naming a type other than PNG.
pub fn decode_png_data_url(data_url: &str) -> Result<Vec<u8>> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| PdfToolsError::InvalidSignatureData("missing data URL header".into()))?;

    let header = header.trim().to_ascii_lowercase();
    if !header.starts_with("data:") {
        return Err(PdfToolsError::InvalidSignatureData(
            "not a data URL".into(),
        ));
    }
    if !header.ends_with(";base64") {
        return Err(PdfToolsError::InvalidSignatureData(
            "payload is not base64 encoded".into(),
        ));
    }
    let mime = header["data:".len()..header.len() - ";base64".len()].trim();
    if !mime.is_empty() && mime != "image/png" {
        return Err(PdfToolsError::InvalidSignatureData(format!(
            "expected image/png, got {}",
            mime
        )));
    }

    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = B64
        .decode(cleaned.as_bytes())
        .map_err(|e| PdfToolsError::InvalidSignatureData(format!("base64: {}", e)))?;

    if ImageFormat::sniff(&bytes) != Some(ImageFormat::Png) {
        return Err(PdfToolsError::InvalidSignatureData(
            "payload is not a PNG image".into(),
        ));
    }
    Ok(bytes)
}

/// Serde adapter that carries binary image data as a base64 string
pub(crate) mod base64_data {
    use super::B64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        B64.decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

fn split_alpha(samples: &[u8], color_channels: usize) -> (Vec<u8>, Vec<u8>) {
    let stride = color_channels + 1;
    let pixels = samples.len() / stride;
    let mut color = Vec::with_capacity(pixels * color_channels);
    let mut alpha = Vec::with_capacity(pixels);
    for pixel in samples.chunks_exact(stride) {
        color.extend_from_slice(&pixel[..color_channels]);
        alpha.push(pixel[color_channels]);
    }
    (color, alpha)
}

fn flate_stream(mut dict: lopdf::Dictionary, data: &[u8]) -> Result<Stream> {
    let to_error =
        |e: std::io::Error| PdfToolsError::OperationError(format!("Failed to compress image: {}", e));
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(to_error)?;
    let compressed = encoder.finish().map_err(to_error)?;

    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    let mut stream = Stream::new(dict, compressed);
    stream.allows_compression = false;
    Ok(stream)
}
