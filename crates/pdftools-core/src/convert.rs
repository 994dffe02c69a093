//! Images to PDF: one page per image, sized to the image

use crate::embed::{EmbeddedImage, ImageFormat};
use crate::error::{PdfToolsError, Result};
use crate::loader::{empty_document, save_document};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use tracing::info;

/// Build a document with one page per image, in order.
///
/// Each page measures exactly the image's pixel dimensions in points and
/// the image covers the whole page.
pub fn images_to_document(images: &[(Vec<u8>, ImageFormat)]) -> Result<Vec<u8>> {
    if images.is_empty() {
        return Err(PdfToolsError::InvalidParameter(
            "No images to convert".into(),
        ));
    }

    let (mut doc, pages_id) = empty_document();
    let mut kids = Vec::with_capacity(images.len());

    for (bytes, format) in images {
        let image = EmbeddedImage::decode(bytes, *format)?;
        let (width, height) = (i64::from(image.width), i64::from(image.height));
        let image_id = image.add_to(&mut doc);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width.into(),
                        0.into(),
                        0.into(),
                        height.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => Object::Array(vec![0.into(), 0.into(), width.into(), height.into()]),
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    if let Ok(Object::Dictionary(pages)) = doc.get_object_mut(pages_id) {
        pages.set("Kids", Object::Array(kids));
        pages.set("Count", Object::Integer(count));
    }

    doc.compress();
    info!(pages = count, "Converted images to PDF");
    save_document(&mut doc)
}
