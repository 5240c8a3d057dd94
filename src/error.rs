//! Error types for the gpasas library

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gpasas library
///
/// Every pipeline stage returns this type and the first failure aborts the
/// whole conversion. Use [`Error::kind`] to classify a failure without
/// looking at its payload.
#[derive(Error, Debug)]
pub enum Error {
    /// The content stream walk finished without reaching an image
    #[error("No image found in document")]
    NoImageFound,

    /// The image contains nothing that looks like a QR symbol
    #[error("No QR symbol found in image")]
    SymbolNotFound,

    /// A QR symbol was located but could not be decoded
    #[error("QR symbol could not be decoded: {0}")]
    SymbolUnreadable(String),

    /// The document text does not follow the expected line layout
    #[error("Unexpected text layout")]
    TextLayoutUnexpected,

    /// An image exists but cannot be decoded to a pixel grid
    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    /// Date parsing error
    #[error("Invalid date expression: {0}")]
    InvalidDateExpression(String),

    /// Signing materials are unusable or signing failed
    #[error("Signing failed: {0}")]
    SigningFailure(String),

    /// The input could not be parsed as a PDF
    #[error("Malformed document: {0}")]
    MalformedDocument(#[from] lopdf::Error),

    /// Archive read/write error
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

/// Failure classification shared by all pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NoImageFound,
    SymbolNotFound,
    SymbolUnreadable,
    TextLayoutUnexpected,
    SigningFailure,
    MalformedDocument,
    /// Anything outside the conversion taxonomy (IO, archive plumbing)
    Other,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::NoImageFound => FailureKind::NoImageFound,
            Error::SymbolNotFound => FailureKind::SymbolNotFound,
            Error::SymbolUnreadable(_) => FailureKind::SymbolUnreadable,
            Error::TextLayoutUnexpected => FailureKind::TextLayoutUnexpected,
            Error::SigningFailure(_) => FailureKind::SigningFailure,
            Error::MalformedDocument(_) => FailureKind::MalformedDocument,
            _ => FailureKind::Other,
        }
    }
}
