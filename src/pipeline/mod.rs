//! Pipeline stages for HTML-to-PDF conversion.
//!
//! Each submodule implements exactly one step. The orchestrator in
//! [`crate::convert`] wires them together for one request.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ×N ──▶ merge ──▶ compress
//! (body)    (Chromium)    (lopdf)   (Ghostscript)
//! ```
//!
//! 1. [`input`]: decode the body and query into a `RenderRequest`
//! 2. [`engine`]: launch one headless Chromium per request; every document
//!    prints in its own tab of that process
//! 3. [`render`]: print one document to an intermediate PDF; runs in
//!    `spawn_blocking` because the DevTools client is synchronous
//! 4. [`merge`]: concatenate intermediate PDFs strictly in request order
//! 5. [`compress`]: downsample images with `gs`, in place
//!
//! [`temp`] owns every intermediate file so none outlives its request.

pub mod compress;
pub mod engine;
pub mod input;
pub mod merge;
pub mod render;
pub mod temp;
