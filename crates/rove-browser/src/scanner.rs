//! Content-context selection.
//!
//! Many applications render their working UI inside an embedded frame. The
//! scanner enumerates the nested surfaces of the top document and picks the
//! one most likely to hold the task-relevant content.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, FrameHandle};

pub const MAIN_CONTEXT_NAME: &str = "Main";

/// Size limits below which a frame is treated as decorative
#[derive(Debug, Clone, Copy)]
pub struct ScanThresholds {
    pub min_area: f64,
    pub min_dimension: f64,
}

impl Default for ScanThresholds {
    fn default() -> Self {
        Self {
            min_area: 40_000.0,
            min_dimension: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextCandidate {
    pub handle: FrameHandle,
    pub name: String,
    pub url: String,
    pub visible_area: f64,
}

impl ContextCandidate {
    pub fn is_main(&self) -> bool {
        self.handle == FrameHandle::Main
    }
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    /// The root context first, then every nested surface that could be measured
    pub candidates: Vec<ContextCandidate>,
    pub best: ContextCandidate,
}

pub struct ContextScanner {
    thresholds: ScanThresholds,
    poll_interval: Duration,
}

impl Default for ContextScanner {
    fn default() -> Self {
        Self::new(ScanThresholds::default(), Duration::from_millis(250))
    }
}

impl ContextScanner {
    pub fn new(thresholds: ScanThresholds, poll_interval: Duration) -> Self {
        Self {
            thresholds,
            poll_interval,
        }
    }

    /// Scan the surfaces of the current page once. Never fails: a surface that
    /// cannot be measured is skipped, and the root context is always available.
    pub async fn scan(&self, driver: &mut dyn BrowserDriver) -> ScanResult {
        if let Err(e) = driver.switch_to(&FrameHandle::Main).await {
            warn!("Could not switch to main document before scanning: {}", e);
        }

        let root_url = driver.current_url().await.unwrap_or_default();
        let root_area = match driver.bounding_box(&FrameHandle::Main).await {
            Ok(rect) => rect.map(|r| r.area()).unwrap_or(0.0),
            Err(e) => {
                debug!("Viewport size unavailable: {}", e);
                0.0
            }
        };
        let root = ContextCandidate {
            handle: FrameHandle::Main,
            name: MAIN_CONTEXT_NAME.to_string(),
            url: root_url.clone(),
            visible_area: root_area,
        };

        let frames = match driver.frames().await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Frame enumeration failed, using main document: {}", e);
                Vec::new()
            }
        };

        let mut nested = Vec::with_capacity(frames.len());
        let mut best_content: Option<ContextCandidate> = None;

        for frame in frames {
            if frame.handle == FrameHandle::Main {
                continue;
            }

            let rect = match driver.bounding_box(&frame.handle).await {
                Ok(rect) => rect,
                Err(e) => {
                    warn!("Skipping frame '{}' ({}): {}", frame.name, frame.url, e);
                    continue;
                }
            };

            let visible = rect.map(|r| r.is_visible()).unwrap_or(false);
            let area = rect.map(|r| r.area()).unwrap_or(0.0);
            info!(
                "Frame '{}' url={} area={:.0} visible={}",
                frame.name, frame.url, area, visible
            );

            let candidate = ContextCandidate {
                handle: frame.handle.clone(),
                name: frame.name.clone(),
                url: frame.url.clone(),
                visible_area: area,
            };

            let eligible = rect
                .map(|r| {
                    r.is_visible()
                        && r.area() >= self.thresholds.min_area
                        && r.width >= self.thresholds.min_dimension
                        && r.height >= self.thresholds.min_dimension
                })
                .unwrap_or(false);

            if eligible
                && best_content
                    .as_ref()
                    .map(|current| area > current.visible_area)
                    .unwrap_or(true)
            {
                best_content = Some(candidate.clone());
            }

            nested.push(candidate);
        }

        let best = best_content
            .or_else(|| most_specific_foreign_frame(&nested, &root_url))
            .or_else(|| nested.first().cloned())
            .unwrap_or_else(|| root.clone());

        debug!("Selected context '{}' ({})", best.name, best.url);

        let mut candidates = Vec::with_capacity(nested.len() + 1);
        candidates.push(root);
        candidates.extend(nested);

        ScanResult { candidates, best }
    }

    /// Poll [`scan`](Self::scan) until a nested content surface shows up or
    /// `timeout` elapses, then return the best candidate seen last.
    pub async fn wait_and_select(
        &self,
        driver: &mut dyn BrowserDriver,
        timeout: Duration,
    ) -> ContextCandidate {
        let start = Instant::now();

        loop {
            let result = self.scan(driver).await;
            if !result.best.is_main() || start.elapsed() >= timeout {
                return result.best;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// A frame whose URL differs from the root's, preferring the longest URL
fn most_specific_foreign_frame(
    nested: &[ContextCandidate],
    root_url: &str,
) -> Option<ContextCandidate> {
    nested
        .iter()
        .filter(|c| c.url != root_url && !is_blank_url(&c.url))
        .fold(None, |best: Option<&ContextCandidate>, c| match best {
            Some(b) if b.url.len() >= c.url.len() => Some(b),
            _ => Some(c),
        })
        .cloned()
}

fn is_blank_url(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || url.starts_with("about:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Rect;
    use crate::mock::{MockBrowser, MockFrame, MockPage};

    fn page_with(frames: Vec<MockFrame>) -> MockBrowser {
        MockBrowser::new().with_page(
            MockPage::new("https://app.test/home", "<html><body>shell</body></html>")
                .with_frames(frames),
        )
        .at("https://app.test/home")
    }

    #[tokio::test]
    async fn test_largest_eligible_frame_wins() {
        let mut browser = page_with(vec![
            MockFrame::new("ad", "https://ads.test/x", Rect::new(0.0, 0.0, 300.0, 250.0)),
            MockFrame::new("content", "https://app.test/list", Rect::new(0.0, 0.0, 1200.0, 800.0)),
            MockFrame::new("pixel", "https://track.test/p", Rect::new(0.0, 0.0, 1.0, 1.0)),
        ]);

        let result = ContextScanner::default().scan(&mut browser).await;
        assert_eq!(result.candidates.len(), 4);
        assert_eq!(result.candidates[0].name, MAIN_CONTEXT_NAME);
        assert_eq!(result.best.name, "content");
        assert_eq!(result.best.handle, FrameHandle::Index(1));
    }

    #[tokio::test]
    async fn test_thin_frame_is_not_content() {
        // Large area but only 50px tall
        let mut browser = page_with(vec![MockFrame::new(
            "banner",
            "https://app.test/home",
            Rect::new(0.0, 0.0, 2000.0, 50.0),
        )]);

        let result = ContextScanner::default().scan(&mut browser).await;
        // Same URL as root and not eligible: falls back to the first nested frame
        assert_eq!(result.best.name, "banner");
    }

    #[tokio::test]
    async fn test_fallback_prefers_longest_foreign_url() {
        let mut browser = page_with(vec![
            MockFrame::new("blank", "about:blank", Rect::new(0.0, 0.0, 1.0, 1.0)),
            MockFrame::new("short", "https://a.test/x", Rect::new(0.0, 0.0, 0.0, 0.0)),
            MockFrame::new("long", "https://a.test/x/detail?id=42", Rect::new(0.0, 0.0, 10.0, 10.0)),
        ]);

        let result = ContextScanner::default().scan(&mut browser).await;
        assert_eq!(result.best.name, "long");
    }

    #[tokio::test]
    async fn test_no_frames_selects_root() {
        let mut browser = page_with(Vec::new());
        let result = ContextScanner::default().scan(&mut browser).await;
        assert!(result.best.is_main());
        assert_eq!(result.best.url, "https://app.test/home");
    }

    #[tokio::test]
    async fn test_unmeasurable_frame_is_skipped() {
        let mut browser = page_with(vec![
            MockFrame::new("broken", "https://app.test/a", Rect::new(0.0, 0.0, 900.0, 900.0))
                .failing_bounding_box(),
            MockFrame::new("ok", "https://app.test/b", Rect::new(0.0, 0.0, 800.0, 600.0)),
        ]);

        let result = ContextScanner::default().scan(&mut browser).await;
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.best.name, "ok");
    }

    #[tokio::test]
    async fn test_wait_and_select_sees_late_frame() {
        let mut browser = page_with(vec![MockFrame::new(
            "content",
            "https://app.test/list",
            Rect::new(0.0, 0.0, 1200.0, 800.0),
        )])
        .with_frames_after_polls(2);

        let scanner = ContextScanner::new(ScanThresholds::default(), Duration::from_millis(5));
        let best = scanner
            .wait_and_select(&mut browser, Duration::from_secs(2))
            .await;
        assert_eq!(best.name, "content");
    }

    #[tokio::test]
    async fn test_wait_and_select_times_out_to_root() {
        let mut browser = page_with(Vec::new());
        let scanner = ContextScanner::new(ScanThresholds::default(), Duration::from_millis(5));
        let best = scanner
            .wait_and_select(&mut browser, Duration::from_millis(30))
            .await;
        assert!(best.is_main());
    }
}
