//! Load errors and their user-facing classification

use crate::page::PageId;
use folio_pdf::PdfEngineError;
use folio_scheduler::Cancelled;

/// Result type for load operations
pub type LoadResult<T> = Result<T, LoadError>;

/// Coarse classification of a load failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Abandoned by the caller; not a failure
    Cancellation,
    /// The bytes were rejected by the decoder
    DecodeFailure,
    /// The entry could not be opened or read
    SourceUnavailable,
    /// No decoder claims the format
    Unsupported,
}

/// Errors raised while turning an entry into page content
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF error: {0}")]
    Pdf(#[from] PdfEngineError),
}

impl LoadError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        use zip::result::ZipError;

        match self {
            LoadError::Cancelled => ErrorKind::Cancellation,
            LoadError::Decode(_) => ErrorKind::DecodeFailure,
            LoadError::SourceUnavailable(_) | LoadError::Io(_) => ErrorKind::SourceUnavailable,
            LoadError::Unsupported(_) => ErrorKind::Unsupported,
            LoadError::Archive(err) => match err {
                ZipError::UnsupportedArchive(_) => ErrorKind::Unsupported,
                ZipError::InvalidArchive(_) => ErrorKind::DecodeFailure,
                _ => ErrorKind::SourceUnavailable,
            },
            LoadError::Image(err) => match err {
                image::ImageError::Unsupported(_) => ErrorKind::Unsupported,
                image::ImageError::IoError(_) => ErrorKind::SourceUnavailable,
                _ => ErrorKind::DecodeFailure,
            },
            LoadError::Pdf(err) => match err {
                PdfEngineError::Io(_) => ErrorKind::SourceUnavailable,
                PdfEngineError::EncryptedUnsupported => ErrorKind::Unsupported,
                _ => ErrorKind::DecodeFailure,
            },
        }
    }

    /// Returns true for cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }

    /// Message stored on a failed page
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Unsupported => format!("This file format is not supported ({self})"),
            _ => self.to_string(),
        }
    }
}

impl From<Cancelled> for LoadError {
    fn from(_: Cancelled) -> Self {
        LoadError::Cancelled
    }
}

/// Failure of one page inside a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageOpError {
    #[error("page {0} not found")]
    NotFound(PageId),

    #[error("page {0} has operations in progress")]
    Busy(PageId),
}

/// Aggregated report of a bulk operation with at least one failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} of {attempted} page operations failed", .failures.len())]
pub struct BatchError {
    /// Number of pages the operation was attempted on
    pub attempted: usize,
    /// One entry per failed page
    pub failures: Vec<PageOpError>,
}
