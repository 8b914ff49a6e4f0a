//! Progress-callback trait for per-document pipeline events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline renders, merges and compresses a request.
//!
//! Renders run concurrently, so `on_document_*` calls may arrive from several
//! threads at once and in any order. Implementations must protect shared
//! mutable state with `Mutex` or atomics.
//!
//! # Example
//!
//! ```rust
//! use edgequake_html2pdf::{PipelineConfig, RenderProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl RenderProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, total: usize, pdf_bytes: usize) {
//!         let done = self.rendered.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("document {index} ({pdf_bytes} bytes), {done}/{total} done");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { rendered: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes one request.
///
/// All methods have default no-op implementations. Indices are 0-based and
/// refer to the position of the document in the request body.
pub trait RenderProgressCallback: Send + Sync {
    /// Called once after the engine session is up, before any render starts.
    fn on_pipeline_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called just before a document is loaded into the engine.
    fn on_document_start(&self, index: usize, total_documents: usize) {
        let _ = (index, total_documents);
    }

    /// Called when a document has been printed to its intermediate PDF.
    fn on_document_complete(&self, index: usize, total_documents: usize, pdf_bytes: usize) {
        let _ = (index, total_documents, pdf_bytes);
    }

    /// Called when a document fails to render.
    fn on_document_error(&self, index: usize, total_documents: usize, error: &str) {
        let _ = (index, total_documents, error);
    }

    /// Called after all intermediate PDFs have been merged.
    fn on_merge_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after the compressor succeeded.
    fn on_compress_complete(&self, bytes_before: u64, bytes_after: u64) {
        let _ = (bytes_before, bytes_after);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;
