//! Rendered-page fallback tier.
//!
//! Some catalog search pages only materialize their results after
//! client-side JavaScript runs. This tier shells out to a headless browser,
//! dumps the post-JavaScript DOM, and feeds it through the same embedded
//! payload extraction the direct tier uses. The whole attempt runs under a
//! hard wall-clock budget; exceeding it is a `RenderTimeout`, never a hang.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::CatalogConfig;
use crate::protocol::{CancelHandle, Query, RemoteCandidate, SearchFailure, SearchTierKind};
use crate::search::direct_tier::{extract_page_candidates, search_page_url};
use crate::search::rate_gate::RateGate;
use crate::search::SearchTier;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Produces the post-JavaScript DOM of a page as HTML.
pub trait PageRenderer: Send + Sync {
    fn render(&self, url: &str, timeout: Duration) -> Result<String, SearchFailure>;
}

/// Renderer backed by a system browser binary in headless mode.
pub struct HeadlessBrowserRenderer {
    binary_path: String,
}

impl HeadlessBrowserRenderer {
    /// Probes PATH for a usable browser binary.
    pub fn detect() -> Option<Self> {
        for binary_path in [
            "chromium",
            "chromium-browser",
            "google-chrome",
            "google-chrome-stable",
        ] {
            match Command::new(binary_path).arg("--version").output() {
                Ok(output) if output.status.success() => {
                    info!("Rendered-page fallback will use {binary_path}");
                    return Some(Self {
                        binary_path: binary_path.to_string(),
                    });
                }
                _ => {}
            }
        }
        None
    }
}

impl PageRenderer for HeadlessBrowserRenderer {
    fn render(&self, url: &str, timeout: Duration) -> Result<String, SearchFailure> {
        let budget_ms = timeout.as_millis().min(u128::from(u32::MAX)) as u32;
        let mut child = Command::new(&self.binary_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg(format!("--virtual-time-budget={budget_ms}"))
            .arg(format!("--timeout={budget_ms}"))
            .arg("--dump-dom")
            .arg(url)
            .stdout(Stdio::piped())
            // Browser binaries are chatty on stderr; draining it alongside
            // stdout is not worth a second thread.
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|error| {
                SearchFailure::permanent(format!(
                    "Could not launch {}: {error}",
                    self.binary_path
                ))
            })?;

        // Drain stdout on a separate thread so a DOM larger than the pipe
        // buffer cannot stall the child and fake a timeout.
        let mut stdout = child.stdout.take().ok_or_else(|| {
            SearchFailure::permanent("Renderer stdout was not captured")
        })?;
        let reader = std::thread::spawn(move || {
            let mut html = String::new();
            stdout.read_to_string(&mut html).map(|_| html)
        });

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = reader.join();
                        return Err(SearchFailure::render_timeout(format!(
                            "Renderer exceeded its {budget_ms}ms budget"
                        )));
                    }
                    std::thread::sleep(EXIT_POLL_INTERVAL);
                }
                Err(error) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(SearchFailure::permanent(format!(
                        "Could not wait for renderer: {error}"
                    )));
                }
            }
        };

        let html = match reader.join() {
            Ok(Ok(html)) => html,
            Ok(Err(error)) => {
                return Err(SearchFailure::permanent(format!(
                    "Could not read renderer output: {error}"
                )))
            }
            Err(_) => return Err(SearchFailure::permanent("Renderer output thread panicked")),
        };

        if !status.success() {
            return Err(SearchFailure::permanent(format!(
                "Renderer exited with status {:?}",
                status.code()
            )));
        }
        Ok(html)
    }
}

pub struct RenderedTier {
    renderer: Box<dyn PageRenderer>,
    gate: Arc<RateGate>,
    config: CatalogConfig,
    timeout: Duration,
}

impl RenderedTier {
    pub fn new(
        renderer: Box<dyn PageRenderer>,
        gate: Arc<RateGate>,
        config: CatalogConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            gate,
            config,
            timeout,
        }
    }
}

impl SearchTier for RenderedTier {
    fn kind(&self) -> SearchTierKind {
        SearchTierKind::Rendered
    }

    fn search(
        &self,
        query: &Query,
        cancel: &CancelHandle,
    ) -> Result<Vec<RemoteCandidate>, SearchFailure> {
        if !self.gate.wait_for_slot(cancel) {
            return Err(SearchFailure::permanent("cancelled before request"));
        }
        let url = search_page_url(&self.config, &query.text);
        let html = self.renderer.render(&url, self.timeout)?;
        match extract_page_candidates(&html, &self.config, &url) {
            Some(candidates) => Ok(candidates),
            None => {
                // The page rendered to completion and still held nothing to
                // interpret; that is an authoritative empty result.
                debug!("Rendered page at {url} produced no candidates");
                Ok(Vec::new())
            }
        }
    }
}
