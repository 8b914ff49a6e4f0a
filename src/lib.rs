//! # edgequake-html2pdf
//!
//! Render HTML documents to one merged, compressed PDF, as a library or as an
//! HTTP service.
//!
//! ## Pipeline Overview
//!
//! ```text
//! POST /pdf  ["<html>…", "<html>…", …]
//!  │
//!  ├─ 1. Input     JSON array (or one text/html body) + query options
//!  ├─ 2. Engine    one headless Chromium per request (spawn_blocking)
//!  ├─ 3. Render    every document concurrently, one tab each → temp PDFs
//!  ├─ 4. Merge     lopdf concatenation in request order, never completion order
//!  ├─ 5. Compress  Ghostscript image downsampling (150 DPI by default)
//!  └─ 6. Output    application/pdf attachment; all temp files gone
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_html2pdf::{Pipeline, PipelineConfig, RenderOptions, RenderRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::from_config(PipelineConfig::default());
//!     let request = RenderRequest::new(
//!         vec!["<p>A</p>".into(), "<p>B</p>".into()],
//!         RenderOptions::default(),
//!         None,
//!     )?;
//!     let output = pipeline.run(request).await?;
//!     eprintln!("{} pages, {} bytes", output.stats.pages, output.bytes.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `html2pdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## External tools
//!
//! Rendering needs a Chromium or Chrome binary (found automatically, or set
//! `CHROME_PATH`). Compression needs Ghostscript's `gs` on `PATH`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, PrintSettings, RenderOptions, ServerConfig};
pub use convert::{render_files, Pipeline};
pub use error::{Html2PdfError, COMPRESSION_FAILED_MESSAGE};
pub use output::{CompressedOutput, PipelineStats};
pub use pipeline::compress::{Compressor, GhostscriptCompressor};
pub use pipeline::engine::{EngineError, EngineLauncher, EngineSession};
pub use pipeline::input::RenderRequest;
pub use progress::{NoopProgressCallback, ProgressCallback, RenderProgressCallback};
pub use server::{router, serve};
