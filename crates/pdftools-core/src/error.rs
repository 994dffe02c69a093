use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfToolsError {
    #[error("Failed to parse PDF: {0}")]
    CorruptDocument(String),

    #[error("Document is password protected")]
    PasswordRequired,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Page {index} does not exist (document has {page_count} pages)")]
    InvalidPageIndex { index: u32, page_count: u32 },

    #[error("Unsupported image format: {0} (expected PNG or JPEG)")]
    UnsupportedImageFormat(String),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("Invalid signature data: {0}")]
    InvalidSignatureData(String),

    #[error("Invalid page range: {0}")]
    InvalidRange(String),

    #[error("No documents to merge")]
    EmptySourceList,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("PDF operation failed: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl PdfToolsError {
    /// Stable tag for callers that map errors to their own messages.
    pub fn category(&self) -> &'static str {
        match self {
            PdfToolsError::CorruptDocument(_) => "corrupt_document",
            PdfToolsError::PasswordRequired => "password_required",
            PdfToolsError::IncorrectPassword => "incorrect_password",
            PdfToolsError::InvalidPageIndex { .. } => "invalid_page_index",
            PdfToolsError::UnsupportedImageFormat(_) => "unsupported_image_format",
            PdfToolsError::InvalidImage(_) => "invalid_image",
            PdfToolsError::InvalidSignatureData(_) => "invalid_signature_data",
            PdfToolsError::InvalidRange(_) => "invalid_range",
            PdfToolsError::EmptySourceList => "empty_source_list",
            PdfToolsError::InvalidParameter(_) => "invalid_parameter",
            PdfToolsError::Encryption(_) => "encryption",
            PdfToolsError::Archive(_) => "archive",
            PdfToolsError::Config(_) => "config",
            PdfToolsError::OperationError(_) => "operation",
            PdfToolsError::SerializationError(_) => "serialization",
        }
    }

    /// True for the two errors a caller resolves by asking for a password.
    pub fn needs_password(&self) -> bool {
        matches!(
            self,
            PdfToolsError::PasswordRequired | PdfToolsError::IncorrectPassword
        )
    }
}

impl From<lopdf::Error> for PdfToolsError {
    fn from(err: lopdf::Error) -> Self {
        PdfToolsError::OperationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PdfToolsError>;
