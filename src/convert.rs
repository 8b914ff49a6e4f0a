//! Request orchestration: render every document, merge, compress.
//!
//! [`Pipeline`] holds the process-wide pieces (engine launcher, compressor,
//! config) and is shared by every request. Each call to [`Pipeline::run`]
//! gets its own engine session and its own scratch directory; nothing is
//! shared between requests.
//!
//! ## Failure model
//!
//! There is no partial output. Renders are all awaited even after one has
//! failed, then the first failure (in document order) is returned. Cleanup
//! does not depend on which stage failed: intermediate files belong to the
//! request's [`TempTracker`] and the session to a [`SessionGuard`], and both
//! are released on every path.

use crate::config::{PipelineConfig, PrintSettings, RenderOptions};
use crate::error::Html2PdfError;
use crate::output::{CompressedOutput, PipelineStats};
use crate::pipeline::compress::{Compressor, GhostscriptCompressor};
use crate::pipeline::engine::{ChromeLauncher, EngineLauncher, EngineSession, SessionGuard};
use crate::pipeline::input::RenderRequest;
use crate::pipeline::merge;
use crate::pipeline::render::{self, RenderedArtifact};
use crate::pipeline::temp::TempTracker;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The HTML-to-PDF pipeline.
///
/// # Example
/// ```rust,no_run
/// use edgequake_html2pdf::{Pipeline, PipelineConfig, RenderOptions, RenderRequest};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Pipeline::from_config(PipelineConfig::default());
/// let request = RenderRequest::new(
///     vec!["<h1>Cover</h1>".into(), "<p>Body</p>".into()],
///     RenderOptions::default(),
///     Some("report"),
/// )?;
/// let output = pipeline.run(request).await?;
/// std::fs::write(&output.filename, &output.bytes)?;
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    launcher: Arc<dyn EngineLauncher>,
    compressor: Arc<dyn Compressor>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Build a pipeline from explicit engine and compressor implementations.
    pub fn new(
        config: PipelineConfig,
        launcher: Arc<dyn EngineLauncher>,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        Self {
            launcher,
            compressor,
            config,
        }
    }

    /// Headless Chromium for rendering and Ghostscript for compression.
    pub fn from_config(config: PipelineConfig) -> Self {
        let launcher = Arc::new(ChromeLauncher::from_config(&config));
        let compressor = Arc::new(GhostscriptCompressor::new(config.ghostscript_path.clone()));
        Self::new(config, launcher, compressor)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Produce one compressed PDF from all documents of `request`.
    ///
    /// # Errors
    /// - [`Html2PdfError::InvalidRequest`] for no documents or bad options
    /// - [`Html2PdfError::EngineLaunch`] if Chromium cannot start
    /// - [`Html2PdfError::Render`] for the first document (by index) that failed
    /// - [`Html2PdfError::Merge`] if an intermediate PDF is unreadable
    /// - [`Html2PdfError::Compression`] if the compressor reported failure
    pub async fn run(&self, request: RenderRequest) -> Result<CompressedOutput, Html2PdfError> {
        let total_start = Instant::now();
        info!(
            "Starting request: {} documents → {}",
            request.documents.len(),
            request.filename
        );

        // ── Step 1: Validate ─────────────────────────────────────────────────
        if request.documents.is_empty() {
            return Err(Html2PdfError::InvalidRequest(
                "expected at least one HTML document".into(),
            ));
        }
        let settings = Arc::new(request.options.print_settings()?);

        // ── Step 2: Scratch directory ────────────────────────────────────────
        let tracker = TempTracker::new(self.config.temp_dir.as_deref())?;

        // ── Step 3: Engine session ───────────────────────────────────────────
        let guard = SessionGuard::launch(Arc::clone(&self.launcher)).await?;

        let result = self
            .run_stages(guard.session(), &tracker, request, settings)
            .await;

        // Closing Chromium waits for the process to exit.
        if let Err(e) = tokio::task::spawn_blocking(move || guard.close()).await {
            warn!("Engine close task panicked: {}", e);
        }
        if tracker.live_count() > 0 {
            debug!(
                "{} intermediate files left for the scratch sweep",
                tracker.live_count()
            );
        }

        let mut output = result?;
        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        let stats = &output.stats;
        info!(
            "Request complete: {} documents, {} pages, {} → {} bytes ({:.0}%), {}ms total",
            stats.documents,
            stats.pages,
            stats.merged_bytes,
            stats.compressed_bytes,
            stats.compression_ratio() * 100.0,
            stats.total_duration_ms
        );
        Ok(output)
    }

    async fn run_stages(
        &self,
        session: Arc<dyn EngineSession>,
        tracker: &TempTracker,
        request: RenderRequest,
        settings: Arc<PrintSettings>,
    ) -> Result<CompressedOutput, Html2PdfError> {
        let total = request.documents.len();
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_pipeline_start(total);
        }

        // ── Step 4: Render all documents concurrently ────────────────────────
        let render_start = Instant::now();
        let renders = request
            .documents
            .into_iter()
            .enumerate()
            .map(move |(index, html)| {
                let session = Arc::clone(&session);
                let settings = Arc::clone(&settings);
                async move {
                    if let Some(cb) = cb {
                        cb.on_document_start(index, total);
                    }
                    let result =
                        render::render_document(index, html, settings, session, tracker).await;
                    if let Some(cb) = cb {
                        match &result {
                            Ok(artifact) => {
                                cb.on_document_complete(index, total, artifact.pdf_bytes)
                            }
                            Err(e) => cb.on_document_error(index, total, &e.to_string()),
                        }
                    }
                    result
                }
            });
        let artifacts = collect_renders(join_all(renders).await)?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        info!("Rendered {} documents in {}ms", total, render_duration_ms);

        // ── Step 5: Merge in document order and save ─────────────────────────
        let merge_start = Instant::now();
        let mut merged_file = tracker.acquire_with_suffix(".pdf")?;
        let merged_path = merged_file.path().to_path_buf();
        let (pages, merged_bytes) = tokio::task::spawn_blocking(move || {
            let mut merged = merge::merge_artifacts(artifacts)?;
            let written = merged.save(&merged_path)?;
            Ok::<_, Html2PdfError>((merged.page_count(), written))
        })
        .await
        .map_err(|e| Html2PdfError::Internal(format!("Merge task panicked: {}", e)))??;
        let merge_duration_ms = merge_start.elapsed().as_millis() as u64;
        info!(
            "Merged {} pages ({} bytes) in {}ms",
            pages, merged_bytes, merge_duration_ms
        );
        if let Some(cb) = cb {
            cb.on_merge_complete(pages);
        }

        // ── Step 6: Compress in place ────────────────────────────────────────
        let compress_start = Instant::now();
        let dpi = self.config.image_resolution_dpi;
        let compressor = Arc::clone(&self.compressor);
        let path = merged_file.path().to_path_buf();
        let compressed = tokio::task::spawn_blocking(move || compressor.compress(&path, &path, dpi))
            .await
            .map_err(|e| Html2PdfError::Internal(format!("Compression task panicked: {}", e)))?;

        if !compressed {
            warn!("Compression failed at {} DPI", dpi);
            if let Err(e) = merged_file.release() {
                warn!("Failed to remove merged PDF: {}", e);
            }
            return Err(Html2PdfError::Compression { dpi });
        }
        let compress_duration_ms = compress_start.elapsed().as_millis() as u64;

        // ── Step 7: Read the result and release the file ─────────────────────
        let bytes = tokio::fs::read(merged_file.path())
            .await
            .map_err(|source| Html2PdfError::Io {
                path: merged_file.path().to_path_buf(),
                source,
            })?;
        merged_file.release()?;

        let compressed_bytes = bytes.len() as u64;
        debug!(
            "Compressed {} → {} bytes in {}ms",
            merged_bytes, compressed_bytes, compress_duration_ms
        );
        if let Some(cb) = cb {
            cb.on_compress_complete(merged_bytes, compressed_bytes);
        }

        Ok(CompressedOutput {
            filename: request.filename,
            bytes,
            stats: PipelineStats {
                documents: total,
                pages,
                merged_bytes,
                compressed_bytes,
                render_duration_ms,
                merge_duration_ms,
                compress_duration_ms,
                total_duration_ms: 0,
            },
        })
    }
}

/// Keep successful renders in document order, or release them all and
/// return the first failure.
fn collect_renders(
    results: Vec<Result<RenderedArtifact, Html2PdfError>>,
) -> Result<Vec<RenderedArtifact>, Html2PdfError> {
    let total = results.len();
    let mut artifacts = Vec::with_capacity(total);
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        artifacts.sort_by_key(|a| a.index);
        return Ok(artifacts);
    }

    warn!("{} of {} documents failed to render", errors.len(), total);
    for mut artifact in artifacts {
        if let Err(e) = artifact.release() {
            warn!("Failed to remove rendered document {}: {}", artifact.index, e);
        }
    }
    Err(errors.remove(0))
}

/// Render local HTML files into one PDF at `output_path`.
///
/// Files become documents in the order given. The output is written to a
/// sibling temp file and renamed, so a failed run never leaves a partial PDF.
pub async fn render_files(
    pipeline: &Pipeline,
    inputs: &[PathBuf],
    options: RenderOptions,
    output_path: impl AsRef<Path>,
) -> Result<PipelineStats, Html2PdfError> {
    let path = output_path.as_ref();

    let mut documents = Vec::with_capacity(inputs.len());
    for input in inputs {
        let html = tokio::fs::read_to_string(input)
            .await
            .map_err(|source| Html2PdfError::Io {
                path: input.clone(),
                source,
            })?;
        documents.push(html);
    }

    let filename = path.file_name().and_then(|n| n.to_str());
    let output = pipeline
        .run(RenderRequest::new(documents, options, filename)?)
        .await?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| Html2PdfError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &output.bytes)
        .await
        .map_err(|source| Html2PdfError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| Html2PdfError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(output.stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(tracker: &TempTracker, index: usize) -> RenderedArtifact {
        let file = tracker.acquire_with_suffix(".pdf").unwrap();
        RenderedArtifact::new(index, 0, file)
    }

    #[test]
    fn collect_renders_orders_by_index() {
        let tracker = TempTracker::new(None).unwrap();
        let results = vec![Ok(artifact(&tracker, 1)), Ok(artifact(&tracker, 0))];
        let artifacts = collect_renders(results).unwrap();
        let order: Vec<usize> = artifacts.iter().map(|a| a.index).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn collect_renders_returns_first_error_and_releases() {
        let tracker = TempTracker::new(None).unwrap();
        let results = vec![
            Ok(artifact(&tracker, 0)),
            Err(Html2PdfError::Render {
                index: 1,
                detail: "first".into(),
            }),
            Err(Html2PdfError::Render {
                index: 2,
                detail: "second".into(),
            }),
        ];
        let err = collect_renders(results).unwrap_err();
        assert!(matches!(err, Html2PdfError::Render { index: 1, .. }));
        assert_eq!(tracker.live_count(), 0);
    }
}
