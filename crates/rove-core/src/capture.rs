//! Serialized browser work.
//!
//! The browser is one shared resource. Every navigation, capture and
//! screenshot goes through a single worker task that owns the lock for the
//! duration of a job, so no two models ever move the browser at once.

use anyhow::{Context, Result};
use rove_browser::{scripts, BrowserDriver, ContextScanner, FrameHandle, ScanThresholds};
use rove_config::{BrowserConfig, CaptureMode};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::clean::{clean_html, clean_outline};
use crate::epoch::EpochTicket;
use crate::error::CaptureError;
use crate::snapshot::{BatchDedup, Snapshot, SnapshotCache};
use crate::visual::visual_key;

/// The one browser, behind the global lock
pub type SharedBrowser = Arc<Mutex<Box<dyn BrowserDriver>>>;

pub fn shared_browser(driver: Box<dyn BrowserDriver>) -> SharedBrowser {
    Arc::new(Mutex::new(driver))
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub page_load_timeout: Duration,
    pub frame_wait_timeout: Duration,
    pub poll_interval: Duration,
    pub thresholds: ScanThresholds,
}

impl CaptureSettings {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            page_load_timeout: Duration::from_millis(config.page_load_timeout_ms),
            frame_wait_timeout: Duration::from_millis(config.frame_wait_timeout_ms),
            poll_interval: Duration::from_millis(config.frame_poll_interval_ms),
            thresholds: ScanThresholds {
                min_area: config.min_frame_area,
                min_dimension: config.min_frame_dimension,
            },
        }
    }

    pub fn scanner(&self) -> ContextScanner {
        ContextScanner::new(self.thresholds, self.poll_interval)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&BrowserConfig::default())
    }
}

/// One step's capture. `url: None` captures wherever the batch currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub step_index: usize,
    pub url: Option<String>,
    pub entry_action: String,
}

#[derive(Debug, Default)]
pub struct CaptureBatch {
    /// In ascending step order
    pub snapshots: Vec<Snapshot>,
    /// Navigations plus content reads actually performed
    pub physical_captures: usize,
    pub cache_hits: usize,
    /// Steps whose capture failed, with the reason
    pub failures: Vec<(usize, String)>,
}

#[derive(Debug, Clone)]
pub struct LiveCapture {
    pub url: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ScreenshotSet {
    pub url: String,
    pub paths: Vec<PathBuf>,
}

enum CaptureJob {
    Steps {
        requests: Vec<CaptureRequest>,
        mode: CaptureMode,
        ticket: EpochTicket,
        reply: oneshot::Sender<Result<CaptureBatch>>,
    },
    LivePage {
        mode: CaptureMode,
        ticket: EpochTicket,
        reply: oneshot::Sender<Result<LiveCapture>>,
    },
    Screenshots {
        dir: PathBuf,
        max_shots: usize,
        ticket: EpochTicket,
        reply: oneshot::Sender<Result<ScreenshotSet>>,
    },
    CurrentUrl {
        reply: oneshot::Sender<Result<String>>,
    },
}

/// Handle on the single capture worker
#[derive(Clone)]
pub struct CaptureQueue {
    tx: mpsc::Sender<CaptureJob>,
}

impl CaptureQueue {
    /// Start the worker on the current runtime
    pub fn spawn(browser: SharedBrowser, cache: SnapshotCache, settings: CaptureSettings) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let worker = CaptureWorker {
            browser,
            cache,
            scanner: settings.scanner(),
            settings,
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    async fn submit<T>(
        &self,
        job: impl FnOnce(oneshot::Sender<Result<T>>) -> CaptureJob,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(job(reply))
            .await
            .map_err(|_| CaptureError::WorkerStopped)?;
        rx.await.map_err(|_| CaptureError::WorkerStopped)?
    }

    /// Capture a batch of steps in ascending step order
    pub async fn capture_steps(
        &self,
        requests: Vec<CaptureRequest>,
        mode: CaptureMode,
        ticket: EpochTicket,
    ) -> Result<CaptureBatch> {
        self.submit(|reply| CaptureJob::Steps {
            requests,
            mode,
            ticket,
            reply,
        })
        .await
    }

    /// Capture the page the browser is on now, without caching it
    pub async fn capture_live(&self, mode: CaptureMode, ticket: EpochTicket) -> Result<LiveCapture> {
        self.submit(|reply| CaptureJob::LivePage { mode, ticket, reply })
            .await
    }

    /// Up to `max_shots` screenshots of the current page, scrolling the
    /// dominant scroll container between shots
    pub async fn screenshots(
        &self,
        dir: PathBuf,
        max_shots: usize,
        ticket: EpochTicket,
    ) -> Result<ScreenshotSet> {
        self.submit(|reply| CaptureJob::Screenshots {
            dir,
            max_shots,
            ticket,
            reply,
        })
        .await
    }

    pub async fn current_url(&self) -> Result<String> {
        self.submit(|reply| CaptureJob::CurrentUrl { reply }).await
    }
}

struct CaptureWorker {
    browser: SharedBrowser,
    cache: SnapshotCache,
    scanner: ContextScanner,
    settings: CaptureSettings,
}

impl CaptureWorker {
    async fn run(self, mut rx: mpsc::Receiver<CaptureJob>) {
        while let Some(job) = rx.recv().await {
            match job {
                CaptureJob::Steps {
                    requests,
                    mode,
                    ticket,
                    reply,
                } => {
                    let _ = reply.send(self.capture_steps(requests, mode, &ticket).await);
                }
                CaptureJob::LivePage {
                    mode,
                    ticket,
                    reply,
                } => {
                    let _ = reply.send(self.capture_live(mode, &ticket).await);
                }
                CaptureJob::Screenshots {
                    dir,
                    max_shots,
                    ticket,
                    reply,
                } => {
                    let _ = reply.send(self.screenshots(dir, max_shots, &ticket).await);
                }
                CaptureJob::CurrentUrl { reply } => {
                    let mut driver = self.browser.lock().await;
                    let _ = reply.send(driver.current_url().await);
                }
            }
        }
        debug!("Capture worker stopped");
    }

    async fn capture_steps(
        &self,
        mut requests: Vec<CaptureRequest>,
        mode: CaptureMode,
        ticket: &EpochTicket,
    ) -> Result<CaptureBatch> {
        requests.sort_by_key(|r| r.step_index);

        let mut guard = self.browser.lock().await;
        let driver: &mut dyn BrowserDriver = guard.as_mut();
        let mut dedup = BatchDedup::new();
        let mut batch = CaptureBatch::default();
        // Address the batch is logically on, for steps without their own
        let mut position: Option<String> = None;

        for request in requests {
            if !ticket.is_current() {
                return Err(CaptureError::Cancelled.into());
            }
            match self
                .capture_one(driver, &request, mode, &mut dedup, &mut position, &mut batch)
                .await
            {
                Ok(snapshot) => {
                    dedup.remember(&snapshot);
                    batch.snapshots.push(snapshot);
                }
                Err(e) => {
                    warn!("Capture of step {} failed: {:#}", request.step_index, e);
                    batch.failures.push((request.step_index, format!("{:#}", e)));
                }
            }
        }

        Ok(batch)
    }

    async fn capture_one(
        &self,
        driver: &mut dyn BrowserDriver,
        request: &CaptureRequest,
        mode: CaptureMode,
        dedup: &mut BatchDedup,
        position: &mut Option<String>,
        batch: &mut CaptureBatch,
    ) -> Result<Snapshot> {
        let url = match (&request.url, position.as_ref()) {
            (Some(url), _) => url.clone(),
            (None, Some(current)) => current.clone(),
            (None, None) => driver
                .current_url()
                .await
                .context("Failed to read the current address")?,
        };
        *position = Some(url.clone());

        if let Some(snapshot) = dedup.lookup(&url, request.step_index) {
            info!("Step {} capture {}: dedup (same as an earlier step)", request.step_index, url);
            return Ok(snapshot);
        }
        if let Some(snapshot) = self
            .cache
            .get(mode, request.step_index, &url, &request.entry_action)?
        {
            info!("Step {} capture {}: cache hit", request.step_index, url);
            batch.cache_hits += 1;
            return Ok(snapshot);
        }

        let on_page = driver
            .current_url()
            .await
            .map(|current| current == url)
            .unwrap_or(false);
        if !on_page {
            driver
                .navigate(&url, self.settings.page_load_timeout)
                .await
                .with_context(|| format!("Failed to open {}", url))?;
        }

        let raw = self.read_content(driver, mode).await?;
        batch.physical_captures += 1;
        let cleaned = match mode {
            CaptureMode::Html => clean_html(&raw),
            CaptureMode::Outline => clean_outline(&raw),
        };
        info!(
            "Step {} capture {}: fresh ({} chars, {} cleaned)",
            request.step_index,
            url,
            raw.len(),
            cleaned.len()
        );

        self.cache.put(
            mode,
            request.step_index,
            &url,
            &request.entry_action,
            &raw,
            &cleaned,
        )
    }

    /// Content of the best context of the current page. Leaves the driver
    /// in the top-level document.
    async fn read_content(&self, driver: &mut dyn BrowserDriver, mode: CaptureMode) -> Result<String> {
        if let Err(e) = driver.wait_for_load(self.settings.page_load_timeout).await {
            warn!("Page did not finish loading: {:#}", e);
        }
        let context = self
            .scanner
            .wait_and_select(driver, self.settings.frame_wait_timeout)
            .await;
        debug!("Capturing from context '{}' ({})", context.name, context.url);

        driver.switch_to(&context.handle).await?;
        let content = match mode {
            CaptureMode::Html => driver.page_source().await,
            CaptureMode::Outline => driver
                .evaluate(scripts::OUTLINE_SCRIPT, Vec::new())
                .await
                .map(|v| v.as_str().unwrap_or_default().to_string()),
        };
        if let Err(e) = driver.switch_to(&FrameHandle::Main).await {
            warn!("Could not return to the main document: {:#}", e);
        }
        content.context("Failed to read page content")
    }

    async fn capture_live(&self, mode: CaptureMode, ticket: &EpochTicket) -> Result<LiveCapture> {
        let mut guard = self.browser.lock().await;
        let driver: &mut dyn BrowserDriver = guard.as_mut();
        if !ticket.is_current() {
            return Err(CaptureError::Cancelled.into());
        }
        let url = driver.current_url().await?;
        let raw = self.read_content(driver, mode).await?;
        let content = match mode {
            CaptureMode::Html => clean_html(&raw),
            CaptureMode::Outline => clean_outline(&raw),
        };
        info!("Live capture {}: {} chars", url, content.len());
        Ok(LiveCapture { url, content })
    }

    async fn screenshots(
        &self,
        dir: PathBuf,
        max_shots: usize,
        ticket: &EpochTicket,
    ) -> Result<ScreenshotSet> {
        let mut guard = self.browser.lock().await;
        let driver: &mut dyn BrowserDriver = guard.as_mut();
        let url = driver.current_url().await?;
        let stem = visual_key(&url);

        let container = driver
            .evaluate(scripts::FIND_SCROLL_CONTAINER_SCRIPT, Vec::new())
            .await
            .unwrap_or(Value::Null);
        let shots = planned_shots(&container, max_shots);

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut paths = Vec::with_capacity(shots);
        for i in 0..shots {
            if !ticket.is_current() {
                return Err(CaptureError::Cancelled.into());
            }
            let path = dir.join(format!("{}_{}.png", stem, i + 1));
            driver.screenshot(&path).await?;
            paths.push(path);

            if i + 1 < shots {
                let moved = driver
                    .evaluate(scripts::SCROLL_CONTAINER_SCRIPT, Vec::new())
                    .await
                    .ok()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if !moved {
                    break;
                }
            }
        }

        info!("Took {} screenshot(s) of {}", paths.len(), url);
        Ok(ScreenshotSet { url, paths })
    }
}

/// Viewports needed to cover the scroll container, capped at `max_shots`
fn planned_shots(container: &Value, max_shots: usize) -> usize {
    let max_shots = max_shots.max(1);
    let scroll = container.get("scrollHeight").and_then(Value::as_f64);
    let client = container.get("clientHeight").and_then(Value::as_f64);
    match (scroll, client) {
        (Some(scroll), Some(client)) if client > 0.0 => {
            ((scroll / client).ceil() as usize).clamp(1, max_shots)
        }
        _ => 1,
    }
}
