//! Error types for the edgequake-html2pdf library.
//!
//! A single fatal error type, [`Html2PdfError`], covers every stage of the
//! pipeline. There is no partial-success variant: one bad document aborts the
//! whole request, because a merged PDF with a silently missing section is worse
//! than no PDF at all.
//!
//! The HTTP layer answers every variant with a 500. The compression failure
//! carries a fixed message; everything else sends its [`Html2PdfError::report`]
//! chain.

use std::path::PathBuf;
use thiserror::Error;

/// Plain-text body sent when the compression stage fails.
pub const COMPRESSION_FAILED_MESSAGE: &str = "Failed to compress PDF";

/// All fatal errors returned by the edgequake-html2pdf library.
#[derive(Debug, Error)]
pub enum Html2PdfError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The request body or query could not be turned into a render request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The headless browser could not be started.
    #[error(
        "Failed to launch the rendering engine: {detail}\n\
Install Chromium/Chrome or point --chrome-path (CHROME_PATH) at an existing binary."
    )]
    EngineLaunch { detail: String },

    /// Loading, waiting on or printing one document failed.
    #[error("Rendering document {index} failed: {detail}")]
    Render { index: usize, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// An intermediate single-document PDF could not be parsed or merged.
    #[error("Merging document {index} failed: {detail}")]
    Merge { index: usize, detail: String },

    /// The external compression tool reported an error.
    #[error("{COMPRESSION_FAILED_MESSAGE} (image resolution {dpi} DPI)")]
    Compression { dpi: u32 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A temporary file or directory could not be created.
    #[error("Failed to allocate temporary file in '{dir}': {source}")]
    TempFile {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing an intermediate file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a worker task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Html2PdfError {
    /// `true` when the caller sent something unusable, as opposed to the
    /// pipeline failing on a well-formed request. Only affects the log level.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Html2PdfError::InvalidRequest(_))
    }

    /// Render the error and its whole `source()` chain, one cause per line.
    ///
    /// This is the body of a generic 500 response.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\nCaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}
