//! Error handling.

use serde::Serialize;
use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FastHeaderError {
    /// End of file error.
    #[error("End of File: expected to read {0} bytes, got {1}")]
    EndOfFile(u64, u64),

    /// No parser matched either by signature or by extension.
    #[error("No parser for {0}")]
    UnknownFormat(String),

    /// A format-specific structural violation.
    #[error("{0}")]
    Parse(String),

    /// The server ignores `Range` and the file is too large to download whole.
    #[error("Server doesn't support ranges and file is too large")]
    RangesUnsupported,

    /// The server answered with a status we cannot use.
    #[error("HTTP request failed with status {0}")]
    HttpStatus(u16),

    /// A fetch was asked for an empty window.
    #[error("Invalid fetch: length must be positive (start {0})")]
    InvalidRange(u64),

    /// General error.
    #[error("General error: {0}")]
    General(String),

    /// IO Error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Reqwest error
    #[cfg(feature = "reqwest")]
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// External error
    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),
}

impl FastHeaderError {
    /// Build a [`FastHeaderError::Parse`] from anything printable.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// The boundary category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownFormat(_) => ErrorKind::UnknownFormat,
            Self::Parse(_) => ErrorKind::Parse,
            Self::EndOfFile(..)
            | Self::RangesUnsupported
            | Self::HttpStatus(_)
            | Self::InvalidRange(_)
            | Self::General(_)
            | Self::IOError(_)
            | Self::External(_) => ErrorKind::Io,
            #[cfg(feature = "reqwest")]
            Self::ReqwestError(_) => ErrorKind::Io,
        }
    }

    /// Whether this error means the requested window lies past the end of the data.
    pub fn is_end_of_file(&self) -> bool {
        match self {
            Self::EndOfFile(..) => true,
            Self::IOError(err) => err.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

/// The error categories callers can base a retry/skip policy on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No parser matched the source.
    UnknownFormat,
    /// The bytes were read but do not form a valid header.
    Parse,
    /// The underlying byte supply failed.
    Io,
}

/// Crate-specific result type.
pub type FastHeaderResult<T> = std::result::Result<T, FastHeaderError>;
