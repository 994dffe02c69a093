//! Tool invocations as the UI issues them
//!
//! Each function turns form values into a [`PdfCommand`] and runs it. Values
//! the user left blank come from the [`ToolkitConfig`].

use pdftools_core::command::Outcome;
use pdftools_core::edits::{ImagePlacement, SignaturePlacement, TextRun};
use pdftools_core::{
    run, Annotation, Element, ImageFormat, InputFile, PageRange, PdfCommand, PdfToolsError,
    RasterFormat, Result, Rgb, ToolkitConfig,
};

pub fn merge(files: Vec<InputFile>, config: &ToolkitConfig) -> Result<Outcome> {
    run(&PdfCommand::Merge { files }, config)
}

/// Split by a range list such as `"1-3, 5"`
pub fn split(file: InputFile, ranges: &str, config: &ToolkitConfig) -> Result<Outcome> {
    let ranges = PageRange::parse_list(ranges)?
        .into_iter()
        .map(|range| (range.start, range.end))
        .collect();
    run(&PdfCommand::Split { file, ranges }, config)
}

pub fn compress(file: InputFile, config: &ToolkitConfig) -> Result<Outcome> {
    run(&PdfCommand::Compress { file }, config)
}

pub fn images_to_pdf(images: Vec<InputFile>, config: &ToolkitConfig) -> Result<Outcome> {
    run(&PdfCommand::ImagesToPdf { images }, config)
}

pub fn to_images(
    file: InputFile,
    format: Option<&str>,
    scale: Option<f64>,
    config: &ToolkitConfig,
) -> Result<Outcome> {
    let format = format.map(str::parse::<RasterFormat>).transpose()?;
    run(
        &PdfCommand::ToImages {
            file,
            format,
            scale,
        },
        config,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn add_text(
    file: InputFile,
    page: u32,
    x: f64,
    y: f64,
    text: &str,
    font_size: Option<f64>,
    color: Option<&str>,
    config: &ToolkitConfig,
) -> Result<Outcome> {
    if text.trim().is_empty() {
        return Err(PdfToolsError::InvalidParameter("Text is empty".into()));
    }
    let color = match color {
        Some(hex) => Rgb::from_hex(hex)?,
        None => config.text.color,
    };
    let text = TextRun {
        page,
        x,
        y,
        text: text.to_string(),
        font_size: font_size.unwrap_or(config.text.font_size),
        color,
    };
    run(&PdfCommand::AddText { file, text }, config)
}

/// Place `image` with its top-left corner at (`x`, `y`)
#[allow(clippy::too_many_arguments)]
pub fn add_image(
    file: InputFile,
    page: u32,
    x: f64,
    y: f64,
    width: Option<f64>,
    height: Option<f64>,
    image: Vec<u8>,
    config: &ToolkitConfig,
) -> Result<Outcome> {
    let format = ImageFormat::sniff(&image).ok_or_else(|| {
        PdfToolsError::UnsupportedImageFormat("Only PNG and JPEG images can be placed".into())
    })?;
    let image = ImagePlacement {
        page,
        x,
        y,
        width: width.unwrap_or(config.image.width),
        height: height.unwrap_or(config.image.height),
        format,
        data: image,
    };
    run(&PdfCommand::AddImage { file, image }, config)
}

#[allow(clippy::too_many_arguments)]
pub fn sign(
    file: InputFile,
    page: u32,
    x: f64,
    y: f64,
    width: Option<f64>,
    height: Option<f64>,
    data_url: &str,
    config: &ToolkitConfig,
) -> Result<Outcome> {
    let signature = SignaturePlacement {
        page,
        x,
        y,
        width: width.unwrap_or(config.signature.width),
        height: height.unwrap_or(config.signature.height),
        data_url: data_url.to_string(),
    };
    run(&PdfCommand::Sign { file, signature }, config)
}

/// Apply a JSON array of elements in one pass
pub fn edit(file: InputFile, elements_json: &str, config: &ToolkitConfig) -> Result<Outcome> {
    let elements: Vec<Element> = serde_json::from_str(elements_json)
        .map_err(|e| PdfToolsError::SerializationError(e.to_string()))?;
    run(&PdfCommand::Edit { file, elements }, config)
}

pub fn annotate(file: InputFile, annotations_json: &str, config: &ToolkitConfig) -> Result<Outcome> {
    let annotations: Vec<Annotation> = serde_json::from_str(annotations_json)
        .map_err(|e| PdfToolsError::SerializationError(e.to_string()))?;
    run(&PdfCommand::Annotate { file, annotations }, config)
}

pub fn protect(
    file: InputFile,
    password: &str,
    confirm_password: &str,
    config: &ToolkitConfig,
) -> Result<Outcome> {
    run(
        &PdfCommand::Protect {
            file,
            password: password.to_string(),
            confirm_password: confirm_password.to_string(),
            owner_password: None,
            permissions: Default::default(),
        },
        config,
    )
}

pub fn unlock(file: InputFile, password: &str, config: &ToolkitConfig) -> Result<Outcome> {
    run(
        &PdfCommand::Unlock {
            file,
            password: password.to_string(),
        },
        config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::tests::create_test_pdf;
    use pdftools_core::{archive::read_archive, get_page_count};
    use pretty_assertions::assert_eq;

    fn input(pages: u32) -> InputFile {
        InputFile::new("lease.pdf", create_test_pdf(pages))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer
                .write_image_data(&vec![0u8; (width * height * 4) as usize])
                .unwrap();
        }
        out
    }

    #[test]
    fn test_merge_names_output() {
        let outcome = merge(vec![input(2), input(3)], &ToolkitConfig::default()).unwrap();
        assert_eq!(outcome.file.name, "merged.pdf");
        assert_eq!(outcome.page_count, 5);
    }

    #[test]
    fn test_split_single_range_is_pdf() {
        let outcome = split(input(5), "2-4", &ToolkitConfig::default()).unwrap();
        assert_eq!(outcome.file.name, "split_2-4.pdf");
        assert_eq!(get_page_count(&outcome.file.bytes).unwrap(), 3);
    }

    #[test]
    fn test_split_several_ranges_is_zip() {
        let outcome = split(input(5), "1, 3-5", &ToolkitConfig::default()).unwrap();
        assert_eq!(outcome.file.name, "split_pdfs.zip");
        assert_eq!(read_archive(&outcome.file.bytes).unwrap().len(), 2);
    }

    #[test]
    fn test_split_rejects_bad_ranges() {
        assert!(matches!(
            split(input(5), "3-1", &ToolkitConfig::default()),
            Err(PdfToolsError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_add_text_uses_config_defaults() {
        let mut config = ToolkitConfig::default();
        config.text.color = Rgb::new(255, 0, 0);
        let outcome = add_text(input(1), 1, 10.0, 20.0, "Hello", None, None, &config).unwrap();
        assert_eq!(outcome.file.name, "edited_lease.pdf");

        assert!(matches!(
            add_text(input(1), 1, 10.0, 20.0, "Hi", None, Some("red"), &config),
            Err(PdfToolsError::InvalidParameter(_))
        ));
        assert!(add_text(input(1), 1, 10.0, 20.0, "   ", None, None, &config).is_err());
    }

    #[test]
    fn test_add_image_sniffs_format() {
        let config = ToolkitConfig::default();
        let outcome = add_image(input(1), 1, 0.0, 0.0, None, Some(50.0), png(4, 4), &config).unwrap();
        assert_eq!(outcome.file.name, "with_image_lease.pdf");

        assert!(matches!(
            add_image(input(1), 1, 0.0, 0.0, None, None, b"GIF89a....".to_vec(), &config),
            Err(PdfToolsError::UnsupportedImageFormat(_))
        ));
    }

    #[test]
    fn test_sign_with_data_url() {
        use base64::Engine as _;
        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png(20, 8))
        );
        let outcome = sign(
            input(2),
            2,
            100.0,
            600.0,
            None,
            None,
            &data_url,
            &ToolkitConfig::default(),
        )
        .unwrap();
        assert_eq!(outcome.file.name, "signed_lease.pdf");
        assert_eq!(outcome.page_count, 2);
    }

    #[test]
    fn test_edit_parses_element_json() {
        let json = r##"[
            {"type": "text", "page": 1, "x": 10, "y": 10, "text": "A"},
            {"type": "annotation", "page": 1, "kind": "rectangle",
             "x": 50, "y": 50, "width": 20, "height": 20, "color": "#00ff00"}
        ]"##;
        let outcome = edit(input(1), json, &ToolkitConfig::default()).unwrap();
        assert_eq!(outcome.file.name, "edited_lease.pdf");

        assert!(matches!(
            edit(input(1), "[{]", &ToolkitConfig::default()),
            Err(PdfToolsError::SerializationError(_))
        ));
    }

    #[test]
    fn test_annotate_parses_json() {
        let json = r#"[{"page": 1, "kind": "note", "x": 5, "y": 5, "width": 20, "height": 20, "contents": "Check"}]"#;
        let outcome = annotate(input(1), json, &ToolkitConfig::default()).unwrap();
        assert_eq!(outcome.file.name, "annotated_lease.pdf");
    }

    #[test]
    fn test_protect_then_unlock() {
        let config = ToolkitConfig::default();
        assert!(protect(input(1), "abcd", "abce", &config).is_err());
        assert!(protect(input(1), "abc", "abc", &config).is_err());

        let locked = protect(input(1), "abcd", "abcd", &config).unwrap();
        assert_eq!(locked.file.name, "protected_lease.pdf");

        let file = InputFile::new(locked.file.name, locked.file.bytes);
        assert!(matches!(
            unlock(file.clone(), "nope", &config),
            Err(PdfToolsError::IncorrectPassword)
        ));
        let unlocked = unlock(file, "abcd", &config).unwrap();
        assert_eq!(unlocked.file.name, "unlocked_protected_lease.pdf");
    }

    #[test]
    fn test_to_images_format_and_scale() {
        let config = ToolkitConfig::default();
        let outcome = to_images(input(2), Some("jpg"), Some(1.0), &config).unwrap();
        let entries = read_archive(&outcome.file.bytes).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["page_1.jpeg", "page_2.jpeg"]);

        assert!(to_images(input(1), Some("gif"), None, &config).is_err());
        assert!(to_images(input(1), None, Some(10.0), &config).is_err());
    }

    #[test]
    fn test_images_to_pdf() {
        let images = vec![InputFile::new("a.png", png(30, 40)), InputFile::new("b.png", png(10, 10))];
        let outcome = images_to_pdf(images, &ToolkitConfig::default()).unwrap();
        assert_eq!(outcome.file.name, "images_to_pdf.pdf");
        assert_eq!(outcome.page_count, 2);
    }

    #[test]
    fn test_compress() {
        let outcome = compress(input(3), &ToolkitConfig::default()).unwrap();
        assert_eq!(outcome.file.name, "compressed_lease.pdf");
        assert_eq!(outcome.page_count, 3);
    }
}
