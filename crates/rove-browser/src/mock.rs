//! Scripted in-memory browser for tests.
//!
//! Pages are registered by URL; navigation switches between them. Shared
//! counters ([`MockStats`]) and the action log stay readable after the
//! browser has been moved behind a trait object.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::driver::{BrowserDriver, FrameHandle, FrameInfo, Rect};
use crate::scripts;

/// Eight-byte PNG signature padded to a detectable header
const FAKE_PNG: [u8; 16] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, 0x49, 0x48, 0x44, 0x52,
];

#[derive(Debug, Clone)]
pub struct MockFrame {
    pub name: String,
    pub url: String,
    pub rect: Rect,
    pub html: String,
    pub fail_bounding_box: bool,
}

impl MockFrame {
    pub fn new(name: &str, url: &str, rect: Rect) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            rect,
            html: format!("<html><body>frame {}</body></html>", name),
            fail_bounding_box: false,
        }
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn failing_bounding_box(mut self) -> Self {
        self.fail_bounding_box = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MockPage {
    pub url: String,
    pub html: String,
    pub outline: Option<String>,
    pub frames: Vec<MockFrame>,
}

impl MockPage {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            url: url.to_string(),
            html: html.to_string(),
            outline: None,
            frames: Vec::new(),
        }
    }

    pub fn with_frames(mut self, frames: Vec<MockFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_outline(mut self, outline: &str) -> Self {
        self.outline = Some(outline.to_string());
        self
    }
}

/// Counters shared with the test after the browser is boxed
#[derive(Debug, Default)]
pub struct MockStats {
    pub navigations: AtomicUsize,
    pub page_sources: AtomicUsize,
    pub screenshots: AtomicUsize,
    pub frame_scans: AtomicUsize,
}

impl MockStats {
    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn page_sources(&self) -> usize {
        self.page_sources.load(Ordering::SeqCst)
    }

    pub fn screenshots(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct SlowSelector {
    delay: Duration,
    remaining: usize,
}

pub struct MockBrowser {
    pages: HashMap<String, MockPage>,
    current_url: String,
    current_frame: FrameHandle,
    frames_after_polls: usize,
    failing_urls: HashMap<String, String>,
    failing_selectors: HashMap<String, String>,
    slow_selectors: HashMap<String, SlowSelector>,
    navigation_delay: Option<Duration>,
    late_selectors: HashMap<String, Duration>,
    texts: HashMap<String, String>,
    stats: Arc<MockStats>,
    actions: Arc<Mutex<Vec<String>>>,
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            current_url: "about:blank".to_string(),
            current_frame: FrameHandle::Main,
            frames_after_polls: 0,
            failing_urls: HashMap::new(),
            failing_selectors: HashMap::new(),
            slow_selectors: HashMap::new(),
            navigation_delay: None,
            late_selectors: HashMap::new(),
            texts: HashMap::new(),
            stats: Arc::new(MockStats::default()),
            actions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_page(mut self, page: MockPage) -> Self {
        self.pages.insert(page.url.clone(), page);
        self
    }

    /// Start on `url` without counting a navigation
    pub fn at(mut self, url: &str) -> Self {
        self.current_url = url.to_string();
        self
    }

    /// Frames stay hidden for the first `polls` enumerations (late-mounting content)
    pub fn with_frames_after_polls(mut self, polls: usize) -> Self {
        self.frames_after_polls = polls;
        self
    }

    pub fn with_failing_url(mut self, url: &str, message: &str) -> Self {
        self.failing_urls.insert(url.to_string(), message.to_string());
        self
    }

    pub fn with_failing_selector(mut self, selector: &str, message: &str) -> Self {
        self.failing_selectors
            .insert(selector.to_string(), message.to_string());
        self
    }

    /// Interactions with `selector` take `delay` for the next `times` calls
    pub fn with_slow_selector(mut self, selector: &str, delay: Duration, times: usize) -> Self {
        self.slow_selectors.insert(
            selector.to_string(),
            SlowSelector {
                delay,
                remaining: times,
            },
        );
        self
    }

    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = Some(delay);
        self
    }

    /// `selector` appears `after` this long; shorter waits time out
    pub fn with_late_selector(mut self, selector: &str, after: Duration) -> Self {
        self.late_selectors.insert(selector.to_string(), after);
        self
    }

    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.texts.insert(selector.to_string(), text.to_string());
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    pub fn actions(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.actions)
    }

    fn record(&self, action: String) {
        self.actions.lock().unwrap().push(action);
    }

    fn page(&self) -> Option<&MockPage> {
        self.pages.get(&self.current_url)
    }

    fn frame(&self, handle: &FrameHandle) -> Option<&MockFrame> {
        match handle {
            FrameHandle::Main => None,
            FrameHandle::Index(i) => self.page().and_then(|p| p.frames.get(usize::from(*i))),
        }
    }

    async fn interact(&mut self, selector: &str, action: String) -> Result<()> {
        if let Some(slow) = self.slow_selectors.get_mut(selector) {
            if slow.remaining > 0 {
                slow.remaining -= 1;
                let delay = slow.delay;
                tokio::time::sleep(delay).await;
            }
        }
        if let Some(message) = self.failing_selectors.get(selector) {
            anyhow::bail!("{}", message);
        }
        self.record(action);
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for MockBrowser {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.stats.navigations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.navigation_delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                anyhow::bail!("Navigation to {} timed out after {:?}", url, timeout);
            }
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failing_urls.get(url) {
            anyhow::bail!("{}", message);
        }
        self.record(format!("goto {}", url));
        self.current_url = url.to_string();
        self.current_frame = FrameHandle::Main;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.current_url.clone())
    }

    async fn wait_for_load(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn frames(&mut self) -> Result<Vec<FrameInfo>> {
        self.current_frame = FrameHandle::Main;
        let polls = self.stats.frame_scans.fetch_add(1, Ordering::SeqCst);
        if polls < self.frames_after_polls {
            return Ok(Vec::new());
        }
        Ok(self
            .page()
            .map(|p| {
                p.frames
                    .iter()
                    .enumerate()
                    .map(|(i, f)| FrameInfo {
                        handle: FrameHandle::Index(i as u16),
                        name: f.name.clone(),
                        url: f.url.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn bounding_box(&mut self, frame: &FrameHandle) -> Result<Option<Rect>> {
        self.current_frame = FrameHandle::Main;
        match frame {
            FrameHandle::Main => Ok(Some(Rect::new(0.0, 0.0, 1920.0, 1080.0))),
            FrameHandle::Index(_) => match self.frame(frame) {
                Some(f) if f.fail_bounding_box => anyhow::bail!("stale frame {}", f.name),
                Some(f) => Ok(Some(f.rect)),
                None => Ok(None),
            },
        }
    }

    async fn switch_to(&mut self, frame: &FrameHandle) -> Result<()> {
        if *frame != FrameHandle::Main && self.frame(frame).is_none() {
            anyhow::bail!("No such frame {:?}", frame);
        }
        self.current_frame = frame.clone();
        Ok(())
    }

    async fn evaluate(&mut self, script: &str, _args: Vec<Value>) -> Result<Value> {
        let value = if script == scripts::READY_STATE_SCRIPT {
            json!("complete")
        } else if script == scripts::OUTLINE_SCRIPT {
            let outline = self
                .page()
                .and_then(|p| p.outline.clone())
                .unwrap_or_else(|| format!("document \"\" {}", self.current_url));
            json!(outline)
        } else if script == scripts::FIND_SCROLL_CONTAINER_SCRIPT {
            json!({ "found": true, "scrollHeight": 3000, "clientHeight": 1000 })
        } else if script == scripts::SCROLL_CONTAINER_SCRIPT {
            self.record("scroll container".to_string());
            json!(true)
        } else {
            self.record("evaluate".to_string());
            Value::Null
        };
        Ok(value)
    }

    async fn page_source(&mut self) -> Result<String> {
        self.stats.page_sources.fetch_add(1, Ordering::SeqCst);
        let html = match self.frame(&self.current_frame.clone()) {
            Some(frame) => frame.html.clone(),
            None => self
                .page()
                .map(|p| p.html.clone())
                .unwrap_or_else(|| "<html><body></body></html>".to_string()),
        };
        Ok(html)
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        self.stats.screenshots.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, FAKE_PNG)?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.interact(selector, format!("click {}", selector)).await
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        self.interact(selector, format!("type {} {}", selector, text))
            .await
    }

    async fn text(&mut self, selector: &str) -> Result<String> {
        self.interact(selector, format!("text {}", selector)).await?;
        Ok(self.texts.get(selector).cloned().unwrap_or_default())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        if let Some(after) = self.late_selectors.get(selector).copied() {
            if after > timeout {
                tokio::time::sleep(timeout).await;
                anyhow::bail!("Timeout waiting for element: {}", selector);
            }
            tokio::time::sleep(after).await;
        }
        self.interact(selector, format!("wait {}", selector)).await
    }

    async fn press_key(&mut self, selector: &str, key: &str) -> Result<()> {
        self.interact(selector, format!("press {} {}", selector, key))
            .await
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<()> {
        self.interact(selector, format!("select {} {}", selector, value))
            .await
    }

    async fn scroll_by(&mut self, dx: f64, dy: f64) -> Result<()> {
        self.record(format!("scroll {} {}", dx, dy));
        Ok(())
    }
}
