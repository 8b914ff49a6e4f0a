//! Render engine sessions: one headless Chromium process per request.
//!
//! The pipeline only talks to the engine through two traits:
//!
//! * [`EngineLauncher`] starts a process and returns a session.
//! * [`EngineSession`] prints one HTML document to PDF bytes, and can be
//!   closed. It is `Send + Sync` and shared by `Arc` across all concurrent
//!   renders of a request; each render opens its own tab, so the engine does
//!   the multiplexing and this layer never serialises renders.
//!
//! [`SessionGuard`] ties a session's lifetime to a scope: it is closed exactly
//! once, either explicitly or when the guard drops.
//!
//! ## Why blocking?
//!
//! `headless_chrome` drives the DevTools protocol synchronously. Every engine
//! call therefore runs on `tokio::task::spawn_blocking`, never on a runtime
//! worker thread.

use crate::config::{PipelineConfig, PrintSettings};
use crate::error::Html2PdfError;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fixed Chromium switches: no extensions, background networking, crash
/// reporting or GPU probing; software GL; no sandbox (containers).
pub const ENGINE_FLAGS: &[&str] = &[
    "--disable-features=IsolateOrigins",
    "--disable-site-isolation-trials",
    "--autoplay-policy=user-gesture-required",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-domain-reliability",
    "--disable-extensions",
    "--disable-features=AudioServiceOutOfProcess",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-notifications",
    "--disable-offer-store-unmasked-wallet-cards",
    "--disable-popup-blocking",
    "--disable-print-preview",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-speech-api",
    "--disable-sync",
    "--hide-scrollbars",
    "--ignore-gpu-blacklist",
    "--metrics-recording-only",
    "--mute-audio",
    "--no-default-browser-check",
    "--no-first-run",
    "--no-pings",
    "--no-sandbox",
    "--password-store=basic",
    "--use-gl=swiftshader",
    "--use-mock-keychain",
];

/// Failure inside a running engine session.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine session is already closed")]
    Closed,

    #[error("could not open a rendering context: {0}")]
    Context(String),

    #[error("loading document failed: {0}")]
    Navigation(String),

    #[error("network did not go idle within {0:?}")]
    NetworkIdleTimeout(Duration),

    #[error("print to PDF failed: {0}")]
    Print(String),
}

/// A running engine that can print HTML documents.
pub trait EngineSession: Send + Sync {
    /// Load `html`, wait for network quiescence and print it. Blocking.
    fn print_to_pdf(&self, html: &str, settings: &PrintSettings) -> Result<Vec<u8>, EngineError>;

    /// Terminate the engine process. Blocking.
    fn close(&self);
}

/// Starts engine sessions.
pub trait EngineLauncher: Send + Sync {
    /// Start a new engine process. Blocking.
    fn launch(&self) -> Result<Arc<dyn EngineSession>, Html2PdfError>;
}

// ── Scoped acquisition ───────────────────────────────────────────────────

/// Closes its session exactly once, on [`SessionGuard::close`] or on drop.
pub struct SessionGuard {
    session: Arc<dyn EngineSession>,
    closed: bool,
}

impl SessionGuard {
    /// Launch a session on the blocking pool and guard it.
    pub async fn launch(launcher: Arc<dyn EngineLauncher>) -> Result<Self, Html2PdfError> {
        let session = tokio::task::spawn_blocking(move || launcher.launch())
            .await
            .map_err(|e| Html2PdfError::Internal(format!("Engine launch task panicked: {}", e)))??;
        Ok(Self::new(session))
    }

    pub fn new(session: Arc<dyn EngineSession>) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    /// A shared handle for a render task.
    pub fn session(&self) -> Arc<dyn EngineSession> {
        Arc::clone(&self.session)
    }

    /// Close the session now.
    pub fn close(mut self) {
        self.close_once();
    }

    fn close_once(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.close_once();
    }
}

// ── Chromium implementation ──────────────────────────────────────────────

/// Launches headless Chromium with [`ENGINE_FLAGS`].
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
    idle_browser_timeout: Duration,
    navigation_timeout: Duration,
    network_idle: Duration,
}

impl ChromeLauncher {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            idle_browser_timeout: Duration::from_secs(config.browser_idle_timeout_secs),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            network_idle: Duration::from_millis(config.network_idle_ms),
        }
    }
}

impl EngineLauncher for ChromeLauncher {
    fn launch(&self) -> Result<Arc<dyn EngineSession>, Html2PdfError> {
        let args: Vec<&OsStr> = ENGINE_FLAGS.iter().map(OsStr::new).collect();

        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .path(self.chrome_path.clone())
            .idle_browser_timeout(self.idle_browser_timeout)
            .args(args)
            .build()
            .map_err(|e| Html2PdfError::EngineLaunch {
                detail: format!("invalid launch options: {}", e),
            })?;

        let start = Instant::now();
        let browser = Browser::new(options).map_err(|e| Html2PdfError::EngineLaunch {
            detail: format!("{:#}", e),
        })?;
        info!("Chromium started in {}ms", start.elapsed().as_millis());

        Ok(Arc::new(ChromeSession {
            browser: Mutex::new(Some(browser)),
            navigation_timeout: self.navigation_timeout,
            network_idle: self.network_idle,
        }))
    }
}

/// One Chromium process; every print opens and closes its own tab.
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    navigation_timeout: Duration,
    network_idle: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// In-flight requests of one tab, fed from DevTools `Network` events.
///
/// The page counts as idle once nothing is pending and nothing has started
/// or finished for a whole idle window.
#[derive(Debug)]
struct NetworkActivity {
    pending: HashSet<String>,
    last_change: Instant,
}

impl NetworkActivity {
    fn new(now: Instant) -> Self {
        Self {
            pending: HashSet::new(),
            last_change: now,
        }
    }

    fn request_started(&mut self, id: &str, now: Instant) {
        self.pending.insert(id.to_string());
        self.last_change = now;
    }

    fn request_ended(&mut self, id: &str, now: Instant) {
        if self.pending.remove(id) {
            self.last_change = now;
        }
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn is_idle(&self, now: Instant, window: Duration) -> bool {
        self.pending.is_empty() && now.saturating_duration_since(self.last_change) >= window
    }

    fn on_event(&mut self, event: &Event, now: Instant) {
        match event {
            Event::NetworkRequestWillBeSent(ev) => self.request_started(&ev.params.request_id, now),
            Event::NetworkLoadingFinished(ev) => self.request_ended(&ev.params.request_id, now),
            Event::NetworkLoadingFailed(ev) => self.request_ended(&ev.params.request_id, now),
            _ => {}
        }
    }
}

impl ChromeSession {
    fn open_tab(&self) -> Result<Arc<Tab>, EngineError> {
        let guard = self.browser.lock().unwrap_or_else(PoisonError::into_inner);
        let browser = guard.as_ref().ok_or(EngineError::Closed)?;
        browser
            .new_tab()
            .map_err(|e| EngineError::Context(format!("{:#}", e)))
    }

    fn print_in_tab(
        &self,
        tab: &Tab,
        html: &str,
        settings: &PrintSettings,
    ) -> Result<Vec<u8>, EngineError> {
        tab.set_default_timeout(self.navigation_timeout);

        // Same approach as writing into a fresh about:blank document: no URL
        // length limit, and relative URLs resolve against nothing.
        let literal = serde_json::to_string(html)
            .map_err(|e| EngineError::Navigation(format!("cannot encode document: {}", e)))?;
        tab.navigate_to("about:blank")
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| EngineError::Navigation(format!("{:#}", e)))?;

        let activity = Arc::new(Mutex::new(NetworkActivity::new(Instant::now())));
        let listener = {
            let activity = Arc::clone(&activity);
            tab.add_event_listener(Arc::new(move |event: &Event| {
                activity
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_event(event, Instant::now());
            }))
            .map_err(|e| EngineError::Context(format!("{:#}", e)))?
        };

        let written = enable_network_events(tab).and_then(|()| {
            tab.evaluate(
                &format!("document.open(); document.write({literal}); document.close();"),
                false,
            )
            .map(|_| ())
            .map_err(|e| EngineError::Navigation(format!("{:#}", e)))
        });
        let idle = written.and_then(|()| self.wait_for_network_idle(tab, &activity));

        if let Err(e) = tab.remove_event_listener(&listener) {
            debug!("Could not detach network listener: {:#}", e);
        }
        idle?;

        tab.print_to_pdf(Some(pdf_options(settings)))
            .map_err(|e| EngineError::Print(format!("{:#}", e)))
    }

    /// Wait until the document has loaded and no request has been in flight
    /// for `network_idle`.
    fn wait_for_network_idle(
        &self,
        tab: &Tab,
        activity: &Mutex<NetworkActivity>,
    ) -> Result<(), EngineError> {
        let deadline = Instant::now() + self.navigation_timeout;

        loop {
            let now = Instant::now();
            let (idle, in_flight) = {
                let activity = activity.lock().unwrap_or_else(PoisonError::into_inner);
                (activity.is_idle(now, self.network_idle), activity.in_flight())
            };

            if idle && document_loaded(tab)? {
                debug!("Network idle for {:?}", self.network_idle);
                return Ok(());
            }

            if now >= deadline {
                warn!("Gave up waiting on {} in-flight requests", in_flight);
                return Err(EngineError::NetworkIdleTimeout(self.navigation_timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn enable_network_events(tab: &Tab) -> Result<(), EngineError> {
    tab.call_method(Network::Enable {
        max_total_buffer_size: None,
        max_resource_buffer_size: None,
        max_post_data_size: None,
        report_direct_socket_traffic: None,
        enable_durable_messages: None,
    })
    .map(|_| ())
    .map_err(|e| EngineError::Context(format!("cannot enable network events: {:#}", e)))
}

fn document_loaded(tab: &Tab) -> Result<bool, EngineError> {
    let result = tab
        .evaluate("document.readyState", false)
        .map_err(|e| EngineError::Navigation(format!("{:#}", e)))?;
    Ok(result.value.as_ref().and_then(|v| v.as_str()) == Some("complete"))
}

fn pdf_options(settings: &PrintSettings) -> PrintToPdfOptions {
    for key in &settings.unrecognised {
        debug!("Ignoring print option '{}' (not supported by Chromium)", key);
    }

    PrintToPdfOptions {
        landscape: Some(settings.landscape),
        print_background: Some(settings.print_background),
        paper_width: Some(settings.paper_width_in),
        paper_height: Some(settings.paper_height_in),
        scale: settings.scale,
        margin_top: settings.margin_top_in,
        margin_bottom: settings.margin_bottom_in,
        margin_left: settings.margin_left_in,
        margin_right: settings.margin_right_in,
        page_ranges: settings.page_ranges.clone(),
        display_header_footer: settings.display_header_footer,
        header_template: settings.header_template.clone(),
        footer_template: settings.footer_template.clone(),
        prefer_css_page_size: settings.prefer_css_page_size,
        ..Default::default()
    }
}

impl EngineSession for ChromeSession {
    fn print_to_pdf(&self, html: &str, settings: &PrintSettings) -> Result<Vec<u8>, EngineError> {
        let tab = self.open_tab()?;
        let result = self.print_in_tab(&tab, html, settings);

        if let Err(e) = tab.close(false) {
            warn!("Failed to close tab: {:#}", e);
        }
        result
    }

    fn close(&self) {
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(browser) = browser {
            // Dropping the handle kills and reaps the Chromium process.
            drop(browser);
            info!("Chromium stopped");
        }
    }
}
