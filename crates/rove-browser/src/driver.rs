use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Reference to a rendering surface. The driver owns the surface itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameHandle {
    /// The top-level document
    Main,
    /// A nested frame by its position among the top document's frames
    Index(u16),
}

/// Bounding box in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f64 {
        if self.is_visible() {
            self.width * self.height
        } else {
            0.0
        }
    }

    pub fn is_visible(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// A nested rendering surface as reported by the driver
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub handle: FrameHandle,
    pub name: String,
    pub url: String,
}

/// Browser operations used by the pipeline.
///
/// Frame enumeration and bounding-box queries leave the driver in the
/// top-level context; callers switch explicitly with [`switch_to`].
///
/// [`switch_to`]: BrowserDriver::switch_to
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate to a URL, failing when the load takes longer than `timeout`
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Get the URL of the top-level document
    async fn current_url(&mut self) -> Result<String>;

    /// Wait until the current document reports it has finished loading
    async fn wait_for_load(&mut self, timeout: Duration) -> Result<()>;

    /// Enumerate the nested frames of the top-level document
    async fn frames(&mut self) -> Result<Vec<FrameInfo>>;

    /// Bounding box of a surface; `None` when the surface no longer exists
    async fn bounding_box(&mut self, frame: &FrameHandle) -> Result<Option<Rect>>;

    /// Make `frame` the context for subsequent content and element calls
    async fn switch_to(&mut self, frame: &FrameHandle) -> Result<()>;

    /// Execute JavaScript in the current context
    async fn evaluate(&mut self, script: &str, args: Vec<Value>) -> Result<Value>;

    /// Serialized DOM of the current context
    async fn page_source(&mut self) -> Result<String>;

    /// Take a screenshot of the viewport and save it to `path`
    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    /// Click the first element matching a CSS selector
    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Replace the value of an input matching a CSS selector
    async fn type_text(&mut self, selector: &str, text: &str) -> Result<()>;

    /// Text content of the first element matching a CSS selector
    async fn text(&mut self, selector: &str) -> Result<String>;

    /// Wait for an element matching a CSS selector to appear
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// Send a key (e.g. "Enter") to an element
    async fn press_key(&mut self, selector: &str, key: &str) -> Result<()>;

    /// Choose an option of a `<select>` by value
    async fn select_option(&mut self, selector: &str, value: &str) -> Result<()>;

    /// Scroll the current context's window
    async fn scroll_by(&mut self, dx: f64, dy: f64) -> Result<()> {
        self.evaluate(crate::scripts::SCROLL_WINDOW_SCRIPT, vec![dx.into(), dy.into()])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_area_and_visibility() {
        assert_eq!(Rect::new(0.0, 0.0, 200.0, 300.0).area(), 60_000.0);
        assert!(!Rect::new(0.0, 0.0, 0.0, 300.0).is_visible());
        assert_eq!(Rect::new(0.0, 0.0, -5.0, 10.0).area(), 0.0);
    }
}
