//! Fakes shared by the integration tests.
//!
//! The fake engine understands a tiny HTML convention so tests can script
//! each document:
//!
//! * `<p>LABEL</p>`: the label printed on every page of that document
//! * `data-pages="N"`: number of pages (default 1)
//! * `data-delay-ms="N"`: sleep before answering, to force out-of-order
//!   completion
//! * `data-fail`: the print fails
//! * `data-corrupt`: the print "succeeds" with bytes that are not a PDF

#![allow(dead_code)]

use edgequake_html2pdf::config::PrintSettings;
use edgequake_html2pdf::{
    Compressor, EngineError, EngineLauncher, EngineSession, Html2PdfError, Pipeline,
    PipelineConfig,
};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── PDF helpers ─────────────────────────────────────────────────────────────

/// A PDF with `pages` pages, each page's content stream showing `label-N`.
pub fn sample_pdf(label: &str, pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for n in 0..pages {
        let content = format!("BT /F1 12 Tf 72 720 Td ({label}-{n}) Tj ET");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("serialise sample PDF");
    out
}

/// The `label-N` marker of every page, in page order.
pub fn page_labels(pdf: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(pdf).expect("output is a readable PDF");
    doc.get_pages()
        .into_values()
        .map(|id| {
            let content = doc.get_page_content(id).expect("page has content");
            let text = String::from_utf8_lossy(&content).into_owned();
            let start = text.find('(').map(|i| i + 1).unwrap_or(0);
            let end = text.rfind(')').unwrap_or(text.len());
            text[start..end].to_string()
        })
        .collect()
}

fn attr<'a>(html: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=\"");
    let start = html.find(&needle)? + needle.len();
    let len = html[start..].find('"')?;
    Some(&html[start..start + len])
}

fn label(html: &str) -> &str {
    html.split("<p>")
        .nth(1)
        .and_then(|rest| rest.split("</p>").next())
        .unwrap_or("doc")
}

// ── Fake engine ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub prints: AtomicUsize,
    pub compressions: AtomicUsize,
}

impl Counters {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
    pub fn prints(&self) -> usize {
        self.prints.load(Ordering::SeqCst)
    }
    pub fn compressions(&self) -> usize {
        self.compressions.load(Ordering::SeqCst)
    }
}

pub struct FakeSession {
    counters: Arc<Counters>,
}

impl EngineSession for FakeSession {
    fn print_to_pdf(&self, html: &str, _: &PrintSettings) -> Result<Vec<u8>, EngineError> {
        self.counters.prints.fetch_add(1, Ordering::SeqCst);

        if let Some(ms) = attr(html, "data-delay-ms").and_then(|v| v.parse().ok()) {
            std::thread::sleep(Duration::from_millis(ms));
        }
        if html.contains("data-fail") {
            return Err(EngineError::Print("scripted failure".into()));
        }
        if html.contains("data-corrupt") {
            return Ok(b"this is not a pdf".to_vec());
        }

        let pages = attr(html, "data-pages")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        Ok(sample_pdf(label(html), pages))
    }

    fn close(&self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeLauncher {
    counters: Arc<Counters>,
    fail: bool,
}

impl EngineLauncher for FakeLauncher {
    fn launch(&self) -> Result<Arc<dyn EngineSession>, Html2PdfError> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Html2PdfError::EngineLaunch {
                detail: "no browser in test".into(),
            });
        }
        Ok(Arc::new(FakeSession {
            counters: Arc::clone(&self.counters),
        }))
    }
}

// ── Fake compressors ────────────────────────────────────────────────────────

/// Leaves the file as is (or copies it) and reports success.
pub struct PassthroughCompressor {
    counters: Arc<Counters>,
}

impl Compressor for PassthroughCompressor {
    fn compress(&self, input: &Path, output: &Path, _dpi: u32) -> bool {
        self.counters.compressions.fetch_add(1, Ordering::SeqCst);
        input == output || std::fs::copy(input, output).is_ok()
    }
}

/// Always reports failure.
pub struct FailingCompressor {
    counters: Arc<Counters>,
}

impl Compressor for FailingCompressor {
    fn compress(&self, _input: &Path, _output: &Path, _dpi: u32) -> bool {
        self.counters.compressions.fetch_add(1, Ordering::SeqCst);
        false
    }
}

// ── Fixture ─────────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A pipeline over fakes, with its own scratch parent directory.
pub struct Fixture {
    pub pipeline: Arc<Pipeline>,
    pub counters: Arc<Counters>,
    pub scratch: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(false, false, None)
    }

    pub fn failing_compression() -> Self {
        Self::build(false, true, None)
    }

    pub fn failing_launch() -> Self {
        Self::build(true, false, None)
    }

    pub fn with_config(builder: edgequake_html2pdf::PipelineConfigBuilder) -> Self {
        Self::build(false, false, Some(builder))
    }

    fn build(
        fail_launch: bool,
        fail_compress: bool,
        builder: Option<edgequake_html2pdf::PipelineConfigBuilder>,
    ) -> Self {
        init_tracing();
        let counters = Arc::new(Counters::default());
        let scratch = tempfile::tempdir().expect("scratch dir");

        let config: PipelineConfig = builder
            .unwrap_or_else(PipelineConfig::builder)
            .temp_dir(scratch.path())
            .build()
            .expect("valid config");

        let launcher = Arc::new(FakeLauncher {
            counters: Arc::clone(&counters),
            fail: fail_launch,
        });
        let compressor: Arc<dyn Compressor> = if fail_compress {
            Arc::new(FailingCompressor {
                counters: Arc::clone(&counters),
            })
        } else {
            Arc::new(PassthroughCompressor {
                counters: Arc::clone(&counters),
            })
        };

        Self {
            pipeline: Arc::new(Pipeline::new(config, launcher, compressor)),
            counters,
            scratch,
        }
    }

    /// Files and directories left under the scratch parent.
    pub fn leftovers(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .expect("scratch dir readable")
            .count()
    }
}
