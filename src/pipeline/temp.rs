//! Temporary resource tracking for one request.
//!
//! Every intermediate file of a request lives inside one scratch directory
//! owned by a [`TempTracker`]. Individual files are handed out as
//! [`TempArtifact`]s which delete themselves on [`TempArtifact::release`] or on
//! drop, whichever comes first. When the tracker itself drops, the scratch
//! directory is removed with whatever is left in it, so an early return or a
//! panic anywhere in the pipeline cannot leave files behind.

use crate::error::Html2PdfError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{TempDir, TempPath};
use tracing::{debug, warn};

/// Owns the scratch directory of one request.
#[derive(Debug)]
pub struct TempTracker {
    dir: TempDir,
    live: Arc<AtomicUsize>,
}

impl TempTracker {
    /// Create a scratch directory under `parent`, or the OS temp dir if None.
    pub fn new(parent: Option<&Path>) -> Result<Self, Html2PdfError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("html2pdf-");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|source| Html2PdfError::TempFile {
            dir: parent
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        debug!("Scratch directory: {}", dir.path().display());
        Ok(Self {
            dir,
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The scratch directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Allocate a uniquely named, empty file.
    pub fn acquire(&self) -> Result<TempArtifact, Html2PdfError> {
        self.acquire_with_suffix("")
    }

    /// Allocate a uniquely named, empty file ending in `suffix` (e.g. `.pdf`).
    pub fn acquire_with_suffix(&self, suffix: &str) -> Result<TempArtifact, Html2PdfError> {
        let file = tempfile::Builder::new()
            .prefix("artifact-")
            .suffix(suffix)
            .tempfile_in(self.dir.path())
            .map_err(|source| Html2PdfError::TempFile {
                dir: self.dir.path().to_path_buf(),
                source,
            })?;

        let temp_path = file.into_temp_path();
        self.live.fetch_add(1, Ordering::SeqCst);

        Ok(TempArtifact {
            path: temp_path.to_path_buf(),
            handle: Some(temp_path),
            live: Arc::clone(&self.live),
        })
    }

    /// Number of artifacts handed out and not yet released.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// A temporary file that is deleted exactly once.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    handle: Option<TempPath>,
    live: Arc<AtomicUsize>,
}

impl TempArtifact {
    /// Path of the file. Still returned after release, but no longer exists.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Delete the file. Calling it again is a no-op.
    ///
    /// A file that is already gone (e.g. swept with the scratch directory)
    /// counts as released.
    pub fn release(&mut self) -> Result<(), Html2PdfError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.live.fetch_sub(1, Ordering::SeqCst);

        match handle.close() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Html2PdfError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to remove temporary file: {}", e);
        }
    }
}
