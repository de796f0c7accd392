//! Error taxonomy for the thumbnail pipeline.
//!
//! The byte sources and the ZIP parser report failures through `anyhow`;
//! the scanner, dispatcher and encoder turn those into one of the variants
//! below so callers can tell an unreadable archive apart from an archive
//! that simply holds no image.

use std::time::Duration;

use crate::classify::SupportedKind;

/// Result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad path, unreadable source, or a container we cannot recognize.
    #[error("failed to open archive {path}: {reason}")]
    ArchiveOpen { path: String, reason: String },

    /// The archive opened but an entry payload could not be read.
    #[error("failed to read {entry} from {path}: {reason}")]
    ArchiveRead {
        path: String,
        entry: String,
        reason: String,
    },

    #[error("no supported image found in {path}")]
    NoImageFound { path: String },

    #[error("cannot allocate {size} bytes for {entry}")]
    Allocation { entry: String, size: u64 },

    #[error("failed to decode {kind} image {entry}: {reason}")]
    Decode {
        kind: SupportedKind,
        entry: String,
        reason: String,
    },

    #[error("failed to write {path}: {reason}")]
    Encode { path: String, reason: String },

    #[error("gave up after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn open(path: &str, reason: impl std::fmt::Display) -> Self {
        Error::ArchiveOpen {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(path: &str, entry: &str, reason: impl std::fmt::Display) -> Self {
        Error::ArchiveRead {
            path: path.to_string(),
            entry: entry.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short name of the failure class, used in log lines.
    pub fn class(&self) -> &'static str {
        match self {
            Error::ArchiveOpen { .. } => "archive-open",
            Error::ArchiveRead { .. } => "archive-read",
            Error::NoImageFound { .. } => "no-image",
            Error::Allocation { .. } => "allocation",
            Error::Decode { .. } => "decode",
            Error::Encode { .. } => "encode",
            Error::Timeout(_) => "timeout",
        }
    }
}
