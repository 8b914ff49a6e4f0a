//! CLI binary for edgequake-html2pdf.
//!
//! `html2pdf` (or `html2pdf serve`) runs the HTTP service; `html2pdf render`
//! runs the same pipeline on local HTML files. Both are thin shims that map
//! flags onto `PipelineConfig` and `ServerConfig`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_html2pdf::{
    render_files, serve, Pipeline, PipelineConfig, ProgressCallback, RenderOptions,
    RenderProgressCallback, ServerConfig,
};
use edgequake_html2pdf::config::{DEFAULT_BODY_LIMIT, DEFAULT_PORT};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over the documents of one `render` run. Documents render
/// concurrently, so completions arrive in any order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Starting Chromium…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    /// Clear the bar after the pipeline returned an error.
    fn abandon(&self) {
        if self.bar.is_finished() {
            return;
        }
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed > 0 {
            eprintln!("{} {} documents failed to render", red("✘"), red(&failed.to_string()));
        }
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_pipeline_start(&self, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
    }

    fn on_document_start(&self, index: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, Instant::now());
        self.bar.set_message(format!("document {}", index + 1));
    }

    fn on_document_complete(&self, index: usize, total: usize, pdf_bytes: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Document {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{pdf_bytes:>8} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['\u{2026}']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Document {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_merge_complete(&self, total_pages: usize) {
        self.bar.set_prefix("Compressing");
        self.bar.set_message(format!("{total_pages} pages"));
    }

    fn on_compress_complete(&self, bytes_before: u64, bytes_after: u64) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} compressed {} → {} bytes",
            green("✔"),
            dim(&bytes_before.to_string()),
            bold(&bytes_after.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on the default port (1646)
  html2pdf

  # Same, explicitly, with a larger body limit
  html2pdf serve --port 8080 --body-limit 50mb

  # Render two local files into one PDF
  html2pdf render cover.html body.html -o report.pdf

  # Landscape letter paper with 1cm margins
  html2pdf render table.html -o table.pdf --format letter --landscape \
      --option margin.top=1cm --option margin.bottom=1cm

  # Call the service
  curl -X POST 'http://localhost:1646/pdf?filename=report' \
      -H 'Content-Type: application/json' \
      -d '["<h1>Cover</h1>", "<p>Body</p>"]' -o report.pdf

ENVIRONMENT VARIABLES:
  PORT                  Listen port (default 1646)
  HOST                  Bind address (default 0.0.0.0)
  BODY_LIMIT            Maximum request body, e.g. 10mb (default 10mb)
  CHROME_PATH           Chromium/Chrome binary (default: auto-detect)
  GHOSTSCRIPT_PATH      Ghostscript binary (default: gs)
  RUST_LOG              Log filter, overrides --verbose/--quiet
"#;

/// Render HTML documents to one merged, compressed PDF.
#[derive(Parser, Debug)]
#[command(
    name = "html2pdf",
    version,
    about = "Render HTML documents to one merged, compressed PDF",
    long_about = "Render HTML documents to a single PDF with headless Chromium, merge them in \
order and shrink the result with Ghostscript. Runs as an HTTP service (POST /pdf) or on local files.",
    args_conflicts_with_subcommands = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Service settings used when no subcommand is given.
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve(ServeArgs),
    /// Render local HTML files into one PDF.
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Listen port.
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum request body size (b, kb, mb, gb).
    #[arg(long, env = "BODY_LIMIT", default_value = DEFAULT_BODY_LIMIT)]
    body_limit: String,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// HTML files, rendered in this order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output PDF path.
    #[arg(short, long)]
    output: PathBuf,

    /// Paper format: a0–a6, letter, legal, tabloid, ledger.
    #[arg(long, default_value = "a4")]
    format: String,

    /// Landscape orientation.
    #[arg(long)]
    landscape: bool,

    /// Do not print CSS backgrounds.
    #[arg(long)]
    no_background: bool,

    /// Extra print option as key=value (scale, margin.top, pageRanges, …). Repeatable.
    #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    options: Vec<(String, String)>,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    #[command(flatten)]
    common: CommonArgs,
}

/// Pipeline and logging flags shared by both subcommands.
#[derive(Args, Debug)]
struct CommonArgs {
    /// Chromium/Chrome binary.
    #[arg(long, env = "CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Ghostscript binary.
    #[arg(long, env = "GHOSTSCRIPT_PATH", default_value = "gs")]
    ghostscript_path: PathBuf,

    /// Image resolution after compression (72–600).
    #[arg(long, env = "HTML2PDF_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Per-document load timeout in seconds.
    #[arg(long, env = "HTML2PDF_NAVIGATION_TIMEOUT", default_value_t = 30)]
    navigation_timeout: u64,

    /// Network quiet window before printing, in milliseconds.
    #[arg(long, env = "HTML2PDF_NETWORK_IDLE_MS", default_value_t = 500)]
    network_idle_ms: u64,

    /// Parent directory for per-request scratch directories.
    #[arg(long, env = "HTML2PDF_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HTML2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "HTML2PDF_QUIET")]
    quiet: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Render(args)) => run_render(args).await,
        Some(Command::Serve(args)) => run_serve(args).await,
        None => run_serve(cli.serve).await,
    }
}

fn init_logging(common: &CommonArgs, progress_active: bool) {
    // The progress bar replaces INFO logs unless the user asked for more.
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || progress_active {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();
}

/// Map CLI args to `PipelineConfig`.
fn build_config(common: &CommonArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .image_resolution_dpi(common.dpi)
        .navigation_timeout_secs(common.navigation_timeout)
        .network_idle_ms(common.network_idle_ms)
        .ghostscript_path(common.ghostscript_path.clone());

    if let Some(ref path) = common.chrome_path {
        builder = builder.chrome_path(path.clone());
    }
    if let Some(ref dir) = common.temp_dir {
        builder = builder.temp_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    init_logging(&args.common, false);

    let server = ServerConfig::new(args.host, args.port, &args.body_limit)
        .context("Invalid server configuration")?;
    let config = build_config(&args.common, None)?;
    let pipeline = Arc::new(Pipeline::from_config(config));

    serve(server.clone(), pipeline)
        .await
        .with_context(|| format!("Server on {} failed", server.socket_addr()))
}

async fn run_render(args: RenderArgs) -> Result<()> {
    let show_progress = !args.common.quiet && !args.no_progress;
    init_logging(&args.common, show_progress);

    let cli_cb = show_progress.then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = cli_cb
        .clone()
        .map(|cb| cb as Arc<dyn RenderProgressCallback>);

    let config = build_config(&args.common, progress_cb)?;
    let pipeline = Pipeline::from_config(config);

    let options = RenderOptions {
        format: args.format.clone(),
        landscape: args.landscape,
        print_background: !args.no_background,
        extra: args.options.iter().cloned().collect(),
    };

    let result = render_files(&pipeline, &args.inputs, options, &args.output).await;
    if let Some(ref cb) = cli_cb {
        cb.abandon();
    }
    let stats = result.context("Rendering failed")?;

    if !args.common.quiet {
        eprintln!(
            "{}  {} documents  {} pages  {}ms  →  {}",
            green("✔"),
            stats.documents,
            stats.pages,
            stats.total_duration_ms,
            bold(&args.output.display().to_string()),
        );
        eprintln!(
            "   {} render  /  {} merge  /  {} compress  {}",
            dim(&format!("{}ms", stats.render_duration_ms)),
            dim(&format!("{}ms", stats.merge_duration_ms)),
            dim(&format!("{}ms", stats.compress_duration_ms)),
            cyan(&format!("({:.0}% of merged size)", stats.compression_ratio() * 100.0)),
        );
    }
    Ok(())
}
