//! Error types for ODT export operations

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while exporting a page to ODT
#[derive(Error, Debug)]
pub enum OdtError {
    /// The template archive is malformed or lacks a required part
    #[error("Cannot read template package: {0}")]
    PackageRead(String),

    /// A resolved image path does not exist on disk
    #[error("Image \"{}\" is not readable or does not exist", .0.display())]
    ImageNotFound(PathBuf),

    /// The XHTML input is not well-formed XML
    #[error("Malformed markup: {0}")]
    MalformedMarkup(String),

    /// An XML part lacks the element content must be inserted into
    #[error("Insertion anchor not found: {0}")]
    MissingAnchor(String),

    /// The style library directory is incomplete or unreadable
    #[error("Style library error: {0}")]
    StyleLibrary(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Downloading a remote image failed
    #[error("Fetching remote image failed: {0}")]
    Fetch(String),

    /// Error reading or writing the ZIP archive
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Error reading or writing files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for ODT export operations
pub type Result<T> = std::result::Result<T, OdtError>;
