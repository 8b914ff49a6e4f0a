//! Configuration types for HTML-to-PDF rendering.
//!
//! Two structs cover the two lifetimes involved:
//!
//! * [`PipelineConfig`]: process-wide knobs (engine binary, timeouts,
//!   compression DPI). Built once via [`PipelineConfigBuilder`] and shared by
//!   every request.
//! * [`RenderOptions`]: per-request print options parsed from the query
//!   string and handed unchanged to every document of that request.
//!
//! [`ServerConfig`] holds the HTTP listener settings used by the binary.

use crate::error::Html2PdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default listen port of the HTTP service.
pub const DEFAULT_PORT: u16 = 1646;

/// Default maximum request body size.
pub const DEFAULT_BODY_LIMIT: &str = "10mb";

/// Configuration for the rendering pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_html2pdf::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .image_resolution_dpi(120)
///     .navigation_timeout_secs(15)
///     .build()
///     .unwrap();
/// assert_eq!(config.image_resolution_dpi, 120);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Target resolution for raster images in the compressed output. Range: 72–600. Default: 150.
    ///
    /// Colour, grayscale and monochrome images are all downsampled to this
    /// value. 150 DPI keeps photos legible when printed while typically
    /// halving the size of image-heavy reports.
    pub image_resolution_dpi: u32,

    /// Upper bound for loading one document and waiting for it to go idle. Default: 30.
    pub navigation_timeout_secs: u64,

    /// How long the page must show no new network activity before printing. Default: 500 ms.
    pub network_idle_ms: u64,

    /// Explicit Chromium/Chrome binary. If None, the engine's own lookup is used.
    pub chrome_path: Option<PathBuf>,

    /// Seconds of DevTools silence after which the engine process is considered hung. Default: 300.
    pub browser_idle_timeout_secs: u64,

    /// Parent directory for per-request scratch directories. If None, the OS temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Ghostscript executable used by the compression stage. Default: `gs`.
    pub ghostscript_path: PathBuf,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_resolution_dpi: 150,
            navigation_timeout_secs: 30,
            network_idle_ms: 500,
            chrome_path: None,
            browser_idle_timeout_secs: 300,
            temp_dir: None,
            ghostscript_path: PathBuf::from("gs"),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("image_resolution_dpi", &self.image_resolution_dpi)
            .field("navigation_timeout_secs", &self.navigation_timeout_secs)
            .field("network_idle_ms", &self.network_idle_ms)
            .field("chrome_path", &self.chrome_path)
            .field("browser_idle_timeout_secs", &self.browser_idle_timeout_secs)
            .field("temp_dir", &self.temp_dir)
            .field("ghostscript_path", &self.ghostscript_path)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn image_resolution_dpi(mut self, dpi: u32) -> Self {
        self.config.image_resolution_dpi = dpi;
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs;
        self
    }

    pub fn network_idle_ms(mut self, ms: u64) -> Self {
        self.config.network_idle_ms = ms;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    pub fn browser_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.browser_idle_timeout_secs = secs.max(1);
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn ghostscript_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ghostscript_path = path.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Html2PdfError> {
        let c = &self.config;
        if c.image_resolution_dpi < 72 || c.image_resolution_dpi > 600 {
            return Err(Html2PdfError::InvalidConfig(format!(
                "image resolution must be 72–600 DPI, got {}",
                c.image_resolution_dpi
            )));
        }
        if c.navigation_timeout_secs == 0 {
            return Err(Html2PdfError::InvalidConfig(
                "navigation timeout must be ≥ 1s".into(),
            ));
        }
        if c.network_idle_ms >= c.navigation_timeout_secs * 1000 {
            return Err(Html2PdfError::InvalidConfig(format!(
                "network idle window ({}ms) must be shorter than the navigation timeout ({}s)",
                c.network_idle_ms, c.navigation_timeout_secs
            )));
        }
        if c.ghostscript_path.as_os_str().is_empty() {
            return Err(Html2PdfError::InvalidConfig(
                "ghostscript path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Per-request options ──────────────────────────────────────────────────

/// Print options shared by every document of one request.
///
/// `extra` carries engine-specific keys (`scale`, `marginTop`,
/// `pageRanges`, …) verbatim; the engine decides which it understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    /// Paper format name, e.g. `a4`, `letter`. Case-insensitive. Default: `a4`.
    pub format: String,
    /// Landscape orientation. Default: false.
    pub landscape: bool,
    /// Print CSS backgrounds. Default: true.
    pub print_background: bool,
    /// Passthrough options keyed by their camelCase engine name.
    pub extra: BTreeMap<String, String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: "a4".to_string(),
            landscape: false,
            print_background: true,
            extra: BTreeMap::new(),
        }
    }
}

/// Paper sizes in inches (width, height), portrait.
///
/// Same table the common browser print APIs accept for `format`.
pub fn paper_size_inches(format: &str) -> Option<(f64, f64)> {
    let size = match format.to_ascii_lowercase().as_str() {
        "letter" => (8.5, 11.0),
        "legal" => (8.5, 14.0),
        "tabloid" => (11.0, 17.0),
        "ledger" => (17.0, 11.0),
        "a0" => (33.1, 46.8),
        "a1" => (23.4, 33.1),
        "a2" => (16.54, 23.4),
        "a3" => (11.7, 16.54),
        "a4" => (8.27, 11.7),
        "a5" => (5.83, 8.27),
        "a6" => (4.13, 5.83),
        _ => return None,
    };
    Some(size)
}

/// Engine-neutral, fully typed print settings derived from [`RenderOptions`].
///
/// All lengths are in inches.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrintSettings {
    pub paper_width_in: f64,
    pub paper_height_in: f64,
    pub landscape: bool,
    pub print_background: bool,
    pub scale: Option<f64>,
    pub margin_top_in: Option<f64>,
    pub margin_bottom_in: Option<f64>,
    pub margin_left_in: Option<f64>,
    pub margin_right_in: Option<f64>,
    pub page_ranges: Option<String>,
    pub display_header_footer: Option<bool>,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub prefer_css_page_size: Option<bool>,
    /// Passthrough keys no engine setting corresponds to.
    pub unrecognised: Vec<String>,
}

impl RenderOptions {
    /// Resolve the paper format and typed passthrough keys.
    ///
    /// `width`/`height` override the format. Margins are accepted both as
    /// `marginTop` and `margin.top`. Lengths take `px` (default), `in`, `cm`
    /// or `mm` units.
    pub fn print_settings(&self) -> Result<PrintSettings, Html2PdfError> {
        let (width, height) = paper_size_inches(&self.format).ok_or_else(|| {
            Html2PdfError::InvalidRequest(format!("unknown paper format '{}'", self.format))
        })?;

        let mut settings = PrintSettings {
            paper_width_in: width,
            paper_height_in: height,
            landscape: self.landscape,
            print_background: self.print_background,
            ..PrintSettings::default()
        };

        for (key, value) in &self.extra {
            match key.as_str() {
                "scale" => {
                    let scale: f64 = value.trim().parse().map_err(|_| invalid_option(key, value))?;
                    if !(0.1..=2.0).contains(&scale) {
                        return Err(Html2PdfError::InvalidRequest(format!(
                            "scale must be between 0.1 and 2, got {scale}"
                        )));
                    }
                    settings.scale = Some(scale);
                }
                "width" => settings.paper_width_in = css_length(key, value)?,
                "height" => settings.paper_height_in = css_length(key, value)?,
                "marginTop" | "margin.top" => settings.margin_top_in = Some(css_length(key, value)?),
                "marginBottom" | "margin.bottom" => {
                    settings.margin_bottom_in = Some(css_length(key, value)?)
                }
                "marginLeft" | "margin.left" => {
                    settings.margin_left_in = Some(css_length(key, value)?)
                }
                "marginRight" | "margin.right" => {
                    settings.margin_right_in = Some(css_length(key, value)?)
                }
                "pageRanges" => settings.page_ranges = Some(value.clone()),
                "displayHeaderFooter" => {
                    settings.display_header_footer =
                        Some(parse_bool_flag(value).ok_or_else(|| invalid_option(key, value))?)
                }
                "headerTemplate" => settings.header_template = Some(value.clone()),
                "footerTemplate" => settings.footer_template = Some(value.clone()),
                "preferCSSPageSize" => {
                    settings.prefer_css_page_size =
                        Some(parse_bool_flag(value).ok_or_else(|| invalid_option(key, value))?)
                }
                _ => settings.unrecognised.push(key.clone()),
            }
        }

        Ok(settings)
    }
}

fn invalid_option(key: &str, value: &str) -> Html2PdfError {
    Html2PdfError::InvalidRequest(format!("invalid value '{value}' for option '{key}'"))
}

fn css_length(key: &str, value: &str) -> Result<f64, Html2PdfError> {
    parse_css_length_inches(value).ok_or_else(|| invalid_option(key, value))
}

/// Parse `true`/`false`/`1`/`0`/`yes`/`no` (case-insensitive). Empty means true,
/// so a bare `?landscape` flag switches the option on.
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a CSS length (`12px`, `1in`, `2.5cm`, `10mm`, bare number = px) into inches.
pub fn parse_css_length_inches(value: &str) -> Option<f64> {
    let v = value.trim().to_ascii_lowercase();
    let (number, per_inch) = if let Some(n) = v.strip_suffix("px") {
        (n, 96.0)
    } else if let Some(n) = v.strip_suffix("in") {
        (n, 1.0)
    } else if let Some(n) = v.strip_suffix("cm") {
        (n, 2.54)
    } else if let Some(n) = v.strip_suffix("mm") {
        (n, 25.4)
    } else {
        (v.as_str(), 96.0)
    };
    let number: f64 = number.trim().parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some(number / per_inch)
}

// ── Server settings ──────────────────────────────────────────────────────

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Maximum accepted request body in bytes.
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            body_limit: 10 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Build from raw settings, parsing the human-readable body limit.
    pub fn new(host: IpAddr, port: u16, body_limit: &str) -> Result<Self, Html2PdfError> {
        Ok(Self {
            host,
            port,
            body_limit: parse_byte_size(body_limit)?,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Parse a size such as `10mb`, `512kb`, `1.5gb` or `2048` into bytes.
///
/// Units are 1024-based and case-insensitive; a bare number means bytes.
pub fn parse_byte_size(input: &str) -> Result<usize, Html2PdfError> {
    let s = input.trim().to_ascii_lowercase();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| Html2PdfError::InvalidConfig(format!("invalid byte size '{input}'")))?;

    let multiplier: f64 = match unit.trim() {
        "" | "b" => 1.0,
        "kb" => 1024.0,
        "mb" => 1024.0 * 1024.0,
        "gb" => 1024.0 * 1024.0 * 1024.0,
        other => {
            return Err(Html2PdfError::InvalidConfig(format!(
                "unknown byte size unit '{other}' in '{input}' (use b, kb, mb or gb)"
            )))
        }
    };

    let bytes = (value * multiplier).floor();
    if bytes < 1.0 {
        return Err(Html2PdfError::InvalidConfig(format!(
            "byte size '{input}' must be at least 1 byte"
        )));
    }
    Ok(bytes as usize)
}
