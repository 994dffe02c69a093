//! JSON command surface
//!
//! A [`PdfCommand`] names one tool invocation with its inputs. [`run`]
//! executes it into an [`OutputFile`]; [`execute`] wraps that into the
//! serializable [`ProcessResult`] handed to JavaScript callers.

use crate::composer::{self, Rect};
use crate::compress::compress_document;
use crate::config::ToolkitConfig;
use crate::convert::images_to_document;
use crate::edits::{self, Annotation, Element, ImagePlacement, SignaturePlacement, TextRun};
use crate::embed::{base64_data, ImageFormat};
use crate::error::{PdfToolsError, Result};
use crate::loader;
use crate::merge::merge_documents;
use crate::output::{self, derived_name, DerivedKind, OutputFile};
use crate::raster::{rasterize_with, ContentRenderer, RasterFormat};
use crate::security::{self, LockOptions, Permissions};
use crate::split::{split_document, PageRange};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A named file passed to a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    #[serde(default)]
    pub name: Option<String>,
    /// File contents (base64 in JSON)
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: Some(name.into()),
            data,
        }
    }

    fn source_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PdfCommand {
    Merge {
        files: Vec<InputFile>,
    },
    Split {
        file: InputFile,
        ranges: Vec<(u32, u32)>,
    },
    Compress {
        file: InputFile,
    },
    ImagesToPdf {
        images: Vec<InputFile>,
    },
    ToImages {
        file: InputFile,
        #[serde(default)]
        format: Option<RasterFormat>,
        #[serde(default)]
        scale: Option<f64>,
    },
    Edit {
        file: InputFile,
        elements: Vec<Element>,
    },
    AddText {
        file: InputFile,
        text: TextRun,
    },
    AddImage {
        file: InputFile,
        image: ImagePlacement,
    },
    Sign {
        file: InputFile,
        signature: SignaturePlacement,
    },
    Annotate {
        file: InputFile,
        annotations: Vec<Annotation>,
    },
    Protect {
        file: InputFile,
        password: String,
        confirm_password: String,
        #[serde(default)]
        owner_password: Option<String>,
        #[serde(default)]
        permissions: Permissions,
    },
    Unlock {
        file: InputFile,
        password: String,
    },
}

impl PdfCommand {
    /// Tool name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            PdfCommand::Merge { .. } => "merge",
            PdfCommand::Split { .. } => "split",
            PdfCommand::Compress { .. } => "compress",
            PdfCommand::ImagesToPdf { .. } => "images_to_pdf",
            PdfCommand::ToImages { .. } => "to_images",
            PdfCommand::Edit { .. } => "edit",
            PdfCommand::AddText { .. } => "add_text",
            PdfCommand::AddImage { .. } => "add_image",
            PdfCommand::Sign { .. } => "sign",
            PdfCommand::Annotate { .. } => "annotate",
            PdfCommand::Protect { .. } => "protect",
            PdfCommand::Unlock { .. } => "unlock",
        }
    }

    /// Total size of every input file
    pub fn input_size(&self) -> usize {
        match self {
            PdfCommand::Merge { files } => files.iter().map(|f| f.data.len()).sum(),
            PdfCommand::ImagesToPdf { images } => images.iter().map(|f| f.data.len()).sum(),
            PdfCommand::Split { file, .. }
            | PdfCommand::Compress { file }
            | PdfCommand::ToImages { file, .. }
            | PdfCommand::Edit { file, .. }
            | PdfCommand::AddText { file, .. }
            | PdfCommand::AddImage { file, .. }
            | PdfCommand::Sign { file, .. }
            | PdfCommand::Annotate { file, .. }
            | PdfCommand::Protect { file, .. }
            | PdfCommand::Unlock { file, .. } => file.data.len(),
        }
    }
}

/// What a tool produced
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub file: OutputFile,
    /// Pages in the result, or pages rendered for image output
    pub page_count: u32,
}

/// Run `command` with defaults from `config`
pub fn run(command: &PdfCommand, config: &ToolkitConfig) -> Result<Outcome> {
    match command {
        PdfCommand::Merge { files } => {
            let sources = files.iter().map(|f| f.data.clone()).collect();
            let merged = merge_documents(sources)?;
            pdf_outcome(output::MERGED_NAME.to_string(), merged)
        }
        PdfCommand::Split { file, ranges } => {
            let ranges = ranges
                .iter()
                .map(|&(start, end)| PageRange::new(start, end))
                .collect::<Result<Vec<_>>>()?;
            let documents = split_document(&file.data, &ranges)?;
            let page_count = documents
                .iter()
                .map(|doc| loader::get_page_count(doc))
                .sum::<Result<u32>>()?;
            Ok(Outcome {
                file: output::split_output(&ranges, documents)?,
                page_count,
            })
        }
        PdfCommand::Compress { file } => {
            let (compressed, report) = compress_document(&file.data, &config.compress.options())?;
            info!(saved = report.percent_saved(), "Compression finished");
            pdf_outcome(derived_name(DerivedKind::Compressed, file.source_name()), compressed)
        }
        PdfCommand::ImagesToPdf { images } => {
            let images = images
                .iter()
                .map(|image| Ok((image.data.clone(), detect_image_format(image)?)))
                .collect::<Result<Vec<_>>>()?;
            pdf_outcome(output::IMAGES_TO_PDF_NAME.to_string(), images_to_document(&images)?)
        }
        PdfCommand::ToImages {
            file,
            format,
            scale,
        } => {
            let options = config.raster.options(*format, *scale)?;
            let pages = rasterize_with(&file.data, &options, &ContentRenderer)?;
            Ok(Outcome {
                file: output::raster_output(&pages, config.raster.archive_single_page)?,
                page_count: pages.len() as u32,
            })
        }
        PdfCommand::Edit { file, elements } => pdf_outcome(
            derived_name(DerivedKind::Edited, file.source_name()),
            edits::apply_elements(&file.data, elements)?,
        ),
        PdfCommand::AddText { file, text } => pdf_outcome(
            derived_name(DerivedKind::Edited, file.source_name()),
            composer::place_text(
                &file.data,
                text.page,
                &text.text,
                text.x,
                text.y,
                text.font_size,
                text.color,
            )?,
        ),
        PdfCommand::AddImage { file, image } => pdf_outcome(
            derived_name(DerivedKind::WithImage, file.source_name()),
            composer::place_image(
                &file.data,
                image.page,
                &image.data,
                image.format,
                Rect::new(image.x, image.y, image.width, image.height),
            )?,
        ),
        PdfCommand::Sign { file, signature } => pdf_outcome(
            derived_name(DerivedKind::Signed, file.source_name()),
            composer::place_signature(
                &file.data,
                signature.page,
                &signature.data_url,
                Rect::new(signature.x, signature.y, signature.width, signature.height),
            )?,
        ),
        PdfCommand::Annotate { file, annotations } => pdf_outcome(
            derived_name(DerivedKind::Annotated, file.source_name()),
            edits::annotate(&file.data, annotations)?,
        ),
        PdfCommand::Protect {
            file,
            password,
            confirm_password,
            owner_password,
            permissions,
        } => {
            security::validate_new_password(
                password,
                confirm_password,
                config.security.min_password_length,
            )?;
            let mut options = LockOptions::new(password.clone()).with_permissions(*permissions);
            if let Some(owner) = owner_password {
                options = options.with_owner_password(owner.clone());
            }
            let page_count = loader::get_page_count(&file.data)?;
            let locked = security::lock_document(&file.data, &options)?;
            Ok(Outcome {
                file: OutputFile::pdf(
                    derived_name(DerivedKind::Protected, file.source_name()),
                    locked,
                ),
                page_count,
            })
        }
        PdfCommand::Unlock { file, password } => pdf_outcome(
            derived_name(DerivedKind::Unlocked, file.source_name()),
            security::unlock_document(&file.data, password)?,
        ),
    }
}

fn pdf_outcome(name: String, bytes: Vec<u8>) -> Result<Outcome> {
    let page_count = loader::get_page_count(&bytes)?;
    Ok(Outcome {
        file: OutputFile::pdf(name, bytes),
        page_count,
    })
}

/// The file signature decides; the name's extension only names the culprit
fn detect_image_format(image: &InputFile) -> Result<ImageFormat> {
    ImageFormat::sniff(&image.data).ok_or_else(|| {
        PdfToolsError::UnsupportedImageFormat(format!(
            "{} is not a PNG or JPEG image",
            image.name.as_deref().unwrap_or("image")
        ))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub success: bool,
    /// Base64-encoded output file
    pub data: Option<String>,
    pub output_name: Option<String>,
    pub mime: Option<String>,
    pub error: Option<String>,
    /// Stable tag from [`PdfToolsError::category`]
    pub error_kind: Option<String>,
    pub metrics: Option<ProcessMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
}

impl ProcessResult {
    pub fn success(outcome: Outcome, input_size_bytes: usize, processing_time_ms: u64) -> Self {
        let Outcome { file, page_count } = outcome;
        Self {
            success: true,
            metrics: Some(ProcessMetrics {
                input_size_bytes,
                output_size_bytes: file.bytes.len(),
                page_count,
                processing_time_ms,
            }),
            data: Some(B64.encode(&file.bytes)),
            output_name: Some(file.name),
            mime: Some(file.mime),
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(error: &PdfToolsError) -> Self {
        Self {
            success: false,
            data: None,
            output_name: None,
            mime: None,
            error: Some(error.to_string()),
            error_kind: Some(error.category().to_string()),
            metrics: None,
        }
    }

    /// Decoded output bytes of a successful result
    pub fn output_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.data
            .as_deref()
            .map(|data| {
                B64.decode(data)
                    .map_err(|e| PdfToolsError::SerializationError(e.to_string()))
            })
            .transpose()
    }
}

/// Run `command` and report the outcome, never failing
pub fn execute(command: &PdfCommand, config: &ToolkitConfig) -> ProcessResult {
    #[cfg(not(target_arch = "wasm32"))]
    let started = std::time::Instant::now();

    let result = run(command, config);

    // No monotonic clock on wasm32-unknown-unknown; the bindings time calls themselves
    #[cfg(not(target_arch = "wasm32"))]
    let elapsed_ms = started.elapsed().as_millis() as u64;
    #[cfg(target_arch = "wasm32")]
    let elapsed_ms = 0;

    match result {
        Ok(outcome) => {
            info!(
                command = command.name(),
                output = %outcome.file.name,
                elapsed_ms,
                "Command finished"
            );
            ProcessResult::success(outcome, command.input_size(), elapsed_ms)
        }
        Err(e) => {
            warn!(command = command.name(), error = %e, "Command failed");
            ProcessResult::failure(&e)
        }
    }
}

/// Parse a JSON command, run it and serialize the result
pub fn execute_json(json: &str, config: &ToolkitConfig) -> String {
    let result = match serde_json::from_str::<PdfCommand>(json) {
        Ok(command) => execute(&command, config),
        Err(e) => ProcessResult::failure(&PdfToolsError::SerializationError(e.to_string())),
    };
    serde_json::to_string(&result).unwrap_or_else(|e| {
        format!(
            r#"{{"success":false,"data":null,"output_name":null,"mime":null,"error":{:?},"error_kind":"serialization","metrics":null}}"#,
            e.to_string()
        )
    })
}
