#![forbid(unsafe_code)]
//! Error types for the MINIX decoders.
//!
//! # Error Taxonomy
//!
//! Two layers, mirroring the split between pure parsing and composed reads:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `mfs-types` | Record-level violations found while decoding a byte slice |
//! | Runtime | `MfsError` | `mfs-error` (this crate) | Errors surfaced to library callers and the CLI |
//!
//! `mfs-error` does not depend on `mfs-types`. The `ParseError → MfsError`
//! conversion lives in `mfs-core`, which sees both.
//!
//! ## Kinds
//!
//! Every variant classifies into exactly one [`ErrorKind`]:
//!
//! | Variant | Kind |
//! |---------|------|
//! | `Io` | `Io` |
//! | `OutOfRange` | `Range` |
//! | `Format` | `Format` |
//! | `NotDirectory` | `Format` |
//! | `NotFound` | `Range` |
//! | `Truncated` | `Truncation` |
//! | `Encoding` | `Encoding` |
//! | `Decompression` | `Format` |
//!
//! All kinds are fatal to the single decode that raised them. Callers that
//! enumerate a tree or an archive may catch per entry and continue with
//! siblings.

use thiserror::Error;

/// Unified error type for all decoding operations.
#[derive(Debug, Error)]
pub enum MfsError {
    /// Host I/O failure while acquiring an image or archive.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block, inode or record index lies outside the addressable range.
    #[error("{what} {index} out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: u64,
        limit: u64,
    },

    /// Structural violation: bad magic, layout cross-check mismatch,
    /// inconsistent zone accounting.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// The byte stream ended in the middle of a record or payload.
    #[error("truncated input: {0}")]
    Truncated(String),

    /// A name field contains bytes outside 7-bit ASCII.
    #[error("invalid name encoding: {0}")]
    Encoding(String),

    /// A directory operation was attempted on a non-directory inode.
    #[error("inode {0} is not a directory")]
    NotDirectory(u64),

    /// A path component does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The external decompression collaborator failed.
    #[error("decompression failed: {0}")]
    Decompression(String),
}

/// Coarse classification of an [`MfsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Range,
    Format,
    Truncation,
    Encoding,
}

impl MfsError {
    /// Classify this error. The match is exhaustive so a new variant must
    /// be assigned a kind before it compiles.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::OutOfRange { .. } | Self::NotFound(_) => ErrorKind::Range,
            Self::Format(_) | Self::NotDirectory(_) | Self::Decompression(_) => ErrorKind::Format,
            Self::Truncated(_) => ErrorKind::Truncation,
            Self::Encoding(_) => ErrorKind::Encoding,
        }
    }
}

/// Result alias using `MfsError`.
pub type Result<T> = std::result::Result<T, MfsError>;
