//! WASM bindings for the PDF toolkit
//!
//! Stateless: every call takes file bytes and form values and returns a
//! [`ToolOutput`] (name, MIME type, bytes) ready to download. Pending edits,
//! zoom and the current page live in the JavaScript UI; coordinates handed
//! to the placement tools come from [`map_click`].
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { merge_pdfs, map_click, add_text } from './pkg/pdftools_wasm.js';
//!
//! await init();
//!
//! const merged = merge_pdfs([{ name: "a.pdf", bytes: bytesA }, { name: "b.pdf", bytes: bytesB }]);
//! downloadBlob(merged.bytes, merged.name, merged.mime);
//!
//! const point = map_click(e.clientX, e.clientY, rect.left, rect.top, zoom, bytes, page);
//! if (point) {
//!   const out = add_text("lease.pdf", bytes, page, point.x, point.y, "Jane Roe");
//! }
//! ```

pub mod page_info;
pub mod tools;
pub mod validation;

use pdftools_core::command::Outcome;
use pdftools_core::{InputFile, PdfToolsError, ToolkitConfig};
use serde::Deserialize;
use wasm_bindgen::prelude::*;

pub use page_info::{PageInfo, PageOrientation};
pub use validation::PdfInfo;

/// Initialize the WASM module
/// Called automatically by wasm-bindgen
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// A produced file
#[wasm_bindgen]
pub struct ToolOutput {
    name: String,
    mime: String,
    bytes: Vec<u8>,
    page_count: u32,
}

#[wasm_bindgen]
impl ToolOutput {
    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.name.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn mime(&self) -> String {
        self.mime.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn bytes(&self) -> js_sys::Uint8Array {
        js_sys::Uint8Array::from(self.bytes.as_slice())
    }

    #[wasm_bindgen(getter)]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }
}

impl From<Outcome> for ToolOutput {
    fn from(outcome: Outcome) -> Self {
        Self {
            name: outcome.file.name,
            mime: outcome.file.mime,
            bytes: outcome.file.bytes,
            page_count: outcome.page_count,
        }
    }
}

fn to_js(error: PdfToolsError) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn finish(result: pdftools_core::Result<Outcome>) -> Result<ToolOutput, JsValue> {
    result.map(ToolOutput::from).map_err(to_js)
}

/// `undefined` means built-in defaults; otherwise an object shaped like [`ToolkitConfig`]
fn config_from(value: JsValue) -> Result<ToolkitConfig, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(ToolkitConfig::default());
    }
    let config: ToolkitConfig = serde_wasm_bindgen::from_value(value)
        .map_err(|e| JsValue::from_str(&format!("Invalid configuration: {}", e)))?;
    config.validate().map_err(to_js)?;
    Ok(config)
}

/// `{ name, bytes }` entry of a multi-file upload; `bytes` may be a `Uint8Array`
#[derive(Deserialize)]
struct UploadedFile {
    name: Option<String>,
    bytes: Vec<u8>,
}

fn uploads(files: JsValue) -> Result<Vec<InputFile>, JsValue> {
    let files: Vec<UploadedFile> = serde_wasm_bindgen::from_value(files)
        .map_err(|e| JsValue::from_str(&format!("Expected [{{ name, bytes }}]: {}", e)))?;
    Ok(files
        .into_iter()
        .map(|f| InputFile {
            name: f.name,
            data: f.bytes,
        })
        .collect())
}

fn input(name: &str, bytes: &[u8]) -> InputFile {
    InputFile::new(name, bytes.to_vec())
}

// ============================================================================
// Inspection
// ============================================================================

/// Header and trailer check for a PDF file
#[wasm_bindgen]
pub fn quick_validate(bytes: &[u8]) -> Result<(), JsValue> {
    validation::quick_validate(bytes).map_err(to_js)
}

/// Page count, version, encryption flag and metadata
#[wasm_bindgen]
pub fn get_pdf_info(bytes: &[u8]) -> Result<JsValue, JsValue> {
    let info = validation::validate_pdf(bytes).map_err(to_js)?;
    serde_wasm_bindgen::to_value(&info)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
pub fn get_page_count(bytes: &[u8]) -> Result<u32, JsValue> {
    let doc = page_info::parse_for_info(bytes).map_err(to_js)?;
    Ok(doc.page_count())
}

/// Size, rotation and orientation of a 1-based page
#[wasm_bindgen]
pub fn get_page_info(bytes: &[u8], page: u32) -> Result<JsValue, JsValue> {
    let doc = page_info::parse_for_info(bytes).map_err(to_js)?;
    let info = PageInfo::from_document(&doc, page).map_err(to_js)?;
    serde_wasm_bindgen::to_value(&info)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
pub fn get_all_page_info(bytes: &[u8]) -> Result<JsValue, JsValue> {
    let doc = page_info::parse_for_info(bytes).map_err(to_js)?;
    let pages = PageInfo::all_from_document(&doc).map_err(to_js)?;
    serde_wasm_bindgen::to_value(&pages)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Map a click on the rendered page to top-left-relative page points.
///
/// `scale` is the current zoom. Returns `null` when the click misses the page.
#[wasm_bindgen]
pub fn map_click(
    click_x: f64,
    click_y: f64,
    origin_x: f64,
    origin_y: f64,
    scale: f64,
    bytes: &[u8],
    page: u32,
) -> Result<JsValue, JsValue> {
    let doc = page_info::parse_for_info(bytes).map_err(to_js)?;
    let size = doc.page_size(page).map_err(to_js)?;
    match pdftools_core::map_click(click_x, click_y, origin_x, origin_y, scale, size) {
        Some(point) => serde_wasm_bindgen::to_value(&point)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e))),
        None => Ok(JsValue::NULL),
    }
}

/// Built-in defaults, for the UI's initial form values
#[wasm_bindgen]
pub fn default_config() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&ToolkitConfig::default())
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

// ============================================================================
// Assembler
// ============================================================================

/// Merge `[{ name, bytes }]` in array order
#[wasm_bindgen]
pub fn merge_pdfs(files: JsValue) -> Result<ToolOutput, JsValue> {
    finish(tools::merge(uploads(files)?, &ToolkitConfig::default()))
}

/// Split by a range list such as `"1-3, 5"`
#[wasm_bindgen]
pub fn split_pdf(name: &str, bytes: &[u8], ranges: &str) -> Result<ToolOutput, JsValue> {
    finish(tools::split(input(name, bytes), ranges, &ToolkitConfig::default()))
}

/// One image per page, PNG or JPEG, in upload order
#[wasm_bindgen]
pub fn images_to_pdf(images: JsValue) -> Result<ToolOutput, JsValue> {
    finish(tools::images_to_pdf(uploads(images)?, &ToolkitConfig::default()))
}

#[wasm_bindgen]
pub fn compress_pdf(name: &str, bytes: &[u8], config: JsValue) -> Result<ToolOutput, JsValue> {
    finish(tools::compress(input(name, bytes), &config_from(config)?))
}

/// Render every page; `format` is "png" or "jpeg"
#[wasm_bindgen]
pub fn pdf_to_images(
    name: &str,
    bytes: &[u8],
    format: Option<String>,
    scale: Option<f64>,
    config: JsValue,
) -> Result<ToolOutput, JsValue> {
    finish(tools::to_images(
        input(name, bytes),
        format.as_deref(),
        scale,
        &config_from(config)?,
    ))
}

// ============================================================================
// Composer
// ============================================================================

#[wasm_bindgen]
#[allow(clippy::too_many_arguments)]
pub fn add_text(
    name: &str,
    bytes: &[u8],
    page: u32,
    x: f64,
    y: f64,
    text: &str,
    font_size: Option<f64>,
    color: Option<String>,
) -> Result<ToolOutput, JsValue> {
    finish(tools::add_text(
        input(name, bytes),
        page,
        x,
        y,
        text,
        font_size,
        color.as_deref(),
        &ToolkitConfig::default(),
    ))
}

#[wasm_bindgen]
#[allow(clippy::too_many_arguments)]
pub fn add_image(
    name: &str,
    bytes: &[u8],
    page: u32,
    x: f64,
    y: f64,
    width: Option<f64>,
    height: Option<f64>,
    image: &[u8],
) -> Result<ToolOutput, JsValue> {
    finish(tools::add_image(
        input(name, bytes),
        page,
        x,
        y,
        width,
        height,
        image.to_vec(),
        &ToolkitConfig::default(),
    ))
}

/// Place a signature pad export (`data:image/png;base64,...`)
#[wasm_bindgen]
#[allow(clippy::too_many_arguments)]
pub fn add_signature(
    name: &str,
    bytes: &[u8],
    page: u32,
    x: f64,
    y: f64,
    width: Option<f64>,
    height: Option<f64>,
    data_url: &str,
) -> Result<ToolOutput, JsValue> {
    finish(tools::sign(
        input(name, bytes),
        page,
        x,
        y,
        width,
        height,
        data_url,
        &ToolkitConfig::default(),
    ))
}

/// Apply the UI's pending element list (JSON array) in one pass
#[wasm_bindgen]
pub fn apply_elements(name: &str, bytes: &[u8], elements_json: &str) -> Result<ToolOutput, JsValue> {
    finish(tools::edit(input(name, bytes), elements_json, &ToolkitConfig::default()))
}

#[wasm_bindgen]
pub fn annotate_pdf(name: &str, bytes: &[u8], annotations_json: &str) -> Result<ToolOutput, JsValue> {
    finish(tools::annotate(
        input(name, bytes),
        annotations_json,
        &ToolkitConfig::default(),
    ))
}

// ============================================================================
// Security
// ============================================================================

#[wasm_bindgen]
pub fn protect_pdf(
    name: &str,
    bytes: &[u8],
    password: &str,
    confirm_password: &str,
    config: JsValue,
) -> Result<ToolOutput, JsValue> {
    finish(tools::protect(
        input(name, bytes),
        password,
        confirm_password,
        &config_from(config)?,
    ))
}

#[wasm_bindgen]
pub fn unlock_pdf(name: &str, bytes: &[u8], password: &str) -> Result<ToolOutput, JsValue> {
    finish(tools::unlock(input(name, bytes), password, &ToolkitConfig::default()))
}

// ============================================================================
// JSON command surface
// ============================================================================

/// Run a JSON `PdfCommand` and return a JSON `ProcessResult`.
///
/// Never throws; failures are reported in the result. Timing uses the JS clock.
#[wasm_bindgen]
pub fn execute_command(command_json: &str, config: JsValue) -> String {
    let config = match config_from(config) {
        Ok(config) => config,
        Err(e) => {
            let error = PdfToolsError::Config(e.as_string().unwrap_or_default());
            return serde_json::to_string(&pdftools_core::ProcessResult::failure(&error))
                .unwrap_or_default();
        }
    };

    let started = js_sys::Date::now();
    let mut result = match serde_json::from_str::<pdftools_core::PdfCommand>(command_json) {
        Ok(command) => pdftools_core::execute(&command, &config),
        Err(e) => pdftools_core::ProcessResult::failure(&PdfToolsError::SerializationError(
            e.to_string(),
        )),
    };
    if let Some(metrics) = result.metrics.as_mut() {
        metrics.processing_time_ms = (js_sys::Date::now() - started).max(0.0) as u64;
    }
    serde_json::to_string(&result).unwrap_or_default()
}

/// Format bytes as human-readable string
#[wasm_bindgen]
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_version() {
        assert!(!get_version().is_empty());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
        assert_eq!(format_bytes(2621440), "2.5 MB");
    }

    #[test]
    fn test_tool_output_from_outcome() {
        let outcome = tools::merge(
            vec![InputFile::new("a.pdf", validation::tests::create_test_pdf(2))],
            &ToolkitConfig::default(),
        )
        .unwrap();
        let output = ToolOutput::from(outcome);
        assert_eq!(output.name(), "merged.pdf");
        assert_eq!(output.mime(), "application/pdf");
        assert_eq!(output.page_count(), 2);
    }
}
