//! Output types returned by the pipeline.

use serde::Serialize;

/// The final, compressed PDF for one request.
#[derive(Debug, Clone)]
pub struct CompressedOutput {
    /// Attachment name, always ending in `.pdf`.
    pub filename: String,
    /// The compressed PDF.
    pub bytes: Vec<u8>,
    pub stats: PipelineStats,
}

/// Counters and timings for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Number of HTML documents in the request.
    pub documents: usize,
    /// Pages in the merged PDF.
    pub pages: usize,
    /// Size of the merged PDF before compression.
    pub merged_bytes: u64,
    /// Size of the returned PDF.
    pub compressed_bytes: u64,
    pub render_duration_ms: u64,
    pub merge_duration_ms: u64,
    pub compress_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl PipelineStats {
    /// Compressed size as a fraction of the merged size (1.0 = no gain).
    pub fn compression_ratio(&self) -> f64 {
        if self.merged_bytes == 0 {
            return 1.0;
        }
        self.compressed_bytes as f64 / self.merged_bytes as f64
    }
}
