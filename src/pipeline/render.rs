//! Document rendering: one HTML string → one single-document PDF on disk.
//!
//! The engine call blocks for as long as the page takes to load and go idle,
//! so it runs inside `spawn_blocking`. The resulting bytes are written to a
//! tracker-allocated `.pdf` file; if anything fails the file is released
//! before the error propagates, so a failed render never leaves a file behind.

use crate::config::PrintSettings;
use crate::error::Html2PdfError;
use crate::pipeline::engine::EngineSession;
use crate::pipeline::temp::{TempArtifact, TempTracker};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A rendered single-document PDF, tagged with its position in the request.
#[derive(Debug)]
pub struct RenderedArtifact {
    /// 0-based position of the source HTML in the request body.
    pub index: usize,
    /// Size of the PDF in bytes.
    pub pdf_bytes: usize,
    file: TempArtifact,
}

impl RenderedArtifact {
    pub fn new(index: usize, pdf_bytes: usize, file: TempArtifact) -> Self {
        Self {
            index,
            pdf_bytes,
            file,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the backing file.
    pub fn release(&mut self) -> Result<(), Html2PdfError> {
        self.file.release()
    }
}

/// Render one document through the shared engine session.
///
/// # Errors
/// [`Html2PdfError::Render`] wrapping the engine failure (navigation, idle
/// timeout, print), or a temp-file error.
pub async fn render_document(
    index: usize,
    html: String,
    settings: Arc<PrintSettings>,
    session: Arc<dyn EngineSession>,
    tracker: &TempTracker,
) -> Result<RenderedArtifact, Html2PdfError> {
    let mut file = tracker.acquire_with_suffix(".pdf")?;

    let html_len = html.len();
    let pdf = tokio::task::spawn_blocking(move || session.print_to_pdf(&html, &settings))
        .await
        .map_err(|e| Html2PdfError::Internal(format!("Render task panicked: {}", e)))?
        .map_err(|e| Html2PdfError::Render {
            index,
            detail: e.to_string(),
        })?;

    if let Err(source) = tokio::fs::write(file.path(), &pdf).await {
        let err = Html2PdfError::Io {
            path: file.path().to_path_buf(),
            source,
        };
        return Err(discard(&mut file, err));
    }

    debug!(
        "Rendered document {} ({} bytes HTML → {} bytes PDF)",
        index,
        html_len,
        pdf.len()
    );

    Ok(RenderedArtifact::new(index, pdf.len(), file))
}

/// Release `file` and hand back `err`. A failed release is only logged.
fn discard(file: &mut TempArtifact, err: Html2PdfError) -> Html2PdfError {
    if let Err(e) = file.release() {
        warn!("Could not remove partial render output: {}", e);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::EngineError;

    struct EchoSession;

    impl EngineSession for EchoSession {
        fn print_to_pdf(&self, html: &str, _: &PrintSettings) -> Result<Vec<u8>, EngineError> {
            if html.contains("broken") {
                Err(EngineError::Print("renderer crashed".into()))
            } else {
                Ok(format!("%PDF-fake {html}").into_bytes())
            }
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn successful_render_writes_one_file() {
        let tracker = TempTracker::new(None).unwrap();
        let artifact = render_document(
            3,
            "<p>A</p>".into(),
            Arc::new(PrintSettings::default()),
            Arc::new(EchoSession),
            &tracker,
        )
        .await
        .unwrap();

        assert_eq!(artifact.index, 3);
        let written = std::fs::read(artifact.path()).unwrap();
        assert_eq!(written, b"%PDF-fake <p>A</p>");
        assert_eq!(artifact.pdf_bytes, written.len());
        assert_eq!(tracker.live_count(), 1);
    }

    #[tokio::test]
    async fn failed_render_leaves_no_file() {
        let tracker = TempTracker::new(None).unwrap();
        let err = render_document(
            1,
            "<p>broken</p>".into(),
            Arc::new(PrintSettings::default()),
            Arc::new(EchoSession),
            &tracker,
        )
        .await
        .unwrap_err();

        match err {
            Html2PdfError::Render { index, detail } => {
                assert_eq!(index, 1);
                assert!(detail.contains("renderer crashed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tracker.live_count(), 0);
        assert_eq!(std::fs::read_dir(tracker.path()).unwrap().count(), 0);
    }

    #[test]
    fn write_error_survives_failed_cleanup() {
        let tracker = TempTracker::new(None).unwrap();
        let mut file = tracker.acquire_with_suffix(".pdf").unwrap();
        // A directory in the file's place cannot be unlinked as a file.
        std::fs::remove_file(file.path()).unwrap();
        std::fs::create_dir(file.path()).unwrap();

        let err = discard(
            &mut file,
            Html2PdfError::Render {
                index: 7,
                detail: "disk full".into(),
            },
        );

        assert!(matches!(err, Html2PdfError::Render { index: 7, .. }), "got {err}");
        assert!(file.is_released());
        assert_eq!(tracker.live_count(), 0);
    }
}
