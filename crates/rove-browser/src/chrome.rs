use crate::driver::{BrowserDriver, FrameHandle, FrameInfo, Rect};
use crate::scripts;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// ChromeDriver-backed browser, optionally headless
pub struct ChromeDriver {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    index: u16,
    name: String,
    src: String,
}

impl ChromeDriver {
    /// Connect to a ChromeDriver on `port`
    ///
    /// ChromeDriver must already be running (e.g. `chromedriver --port=9515`).
    pub async fn connect(port: u16, headless: bool, chrome_binary: Option<&str>) -> Result<Self> {
        let url = format!("http://localhost:{}", port);

        let mut caps = serde_json::Map::new();
        caps.insert(
            "browserName".to_string(),
            Value::String("chrome".to_string()),
        );

        let mut args = vec![
            // Use a unique temp directory to avoid conflicts with running Chrome instances
            Value::String(format!("--user-data-dir=/tmp/rove-chrome-{}", std::process::id())),
            Value::String("--disable-gpu".to_string()),
            Value::String("--no-sandbox".to_string()),
            Value::String("--disable-dev-shm-usage".to_string()),
            Value::String("--window-size=1920,1080".to_string()),
            Value::String("--disable-blink-features=AutomationControlled".to_string()),
            Value::String("--disable-infobars".to_string()),
            Value::String("--disable-extensions".to_string()),
        ];
        if headless {
            args.push(Value::String("--headless=new".to_string()));
        }

        let mut chrome_options = serde_json::Map::new();
        chrome_options.insert("args".to_string(), Value::Array(args));
        chrome_options.insert(
            "excludeSwitches".to_string(),
            Value::Array(vec![Value::String("enable-automation".to_string())]),
        );

        if let Some(binary) = chrome_binary {
            chrome_options.insert("binary".to_string(), Value::String(binary.to_string()));
        }

        caps.insert(
            "goog:chromeOptions".to_string(),
            Value::Object(chrome_options),
        );

        // Use a timeout for the connection attempt to avoid hanging indefinitely
        let mut builder = ClientBuilder::native();
        let connect_future = builder.capabilities(caps).connect(&url);

        let client = tokio::time::timeout(Duration::from_secs(30), connect_future)
            .await
            .context("Connection to ChromeDriver timed out after 30 seconds")?
            .context("Failed to connect to ChromeDriver")?;

        Ok(Self { client })
    }

    /// Quit the browser session
    pub async fn quit(self) -> Result<()> {
        self.client.close().await?;
        Ok(())
    }

    async fn enter_top(&mut self) -> Result<()> {
        self.client
            .enter_frame(None)
            .await
            .context("Failed to switch to top-level document")?;
        Ok(())
    }

    async fn find(&mut self, selector: &str) -> Result<fantoccini::elements::Element> {
        self.client
            .find(Locator::Css(selector))
            .await
            .with_context(|| format!("Failed to find element with selector: {}", selector))
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.enter_top().await?;
        tokio::time::timeout(timeout, self.client.goto(url))
            .await
            .with_context(|| format!("Navigation to {} timed out after {:?}", url, timeout))?
            .with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn wait_for_load(&mut self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(100);

        loop {
            let state = self.evaluate(scripts::READY_STATE_SCRIPT, vec![]).await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }

            if start.elapsed() >= timeout {
                anyhow::bail!("Timeout waiting for page load after {:?}", timeout);
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn frames(&mut self) -> Result<Vec<FrameInfo>> {
        self.enter_top().await?;
        let listed = self.client.execute(scripts::LIST_FRAMES_SCRIPT, vec![]).await?;
        let entries: Vec<FrameEntry> =
            serde_json::from_value(listed).context("Unexpected frame listing")?;

        let mut frames = Vec::with_capacity(entries.len());
        for entry in entries {
            // The live location beats the src attribute (redirects, srcdoc, JS navigation)
            let url = match self.client.enter_frame(Some(entry.index)).await {
                Ok(()) => self
                    .client
                    .execute(scripts::LOCATION_SCRIPT, vec![])
                    .await
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| entry.src.clone()),
                Err(e) => {
                    debug!("Could not enter frame {}: {}", entry.index, e);
                    entry.src.clone()
                }
            };
            self.enter_top().await?;

            frames.push(FrameInfo {
                handle: FrameHandle::Index(entry.index),
                name: entry.name,
                url,
            });
        }

        Ok(frames)
    }

    async fn bounding_box(&mut self, frame: &FrameHandle) -> Result<Option<Rect>> {
        self.enter_top().await?;
        let index: i64 = match frame {
            FrameHandle::Main => -1,
            FrameHandle::Index(i) => i64::from(*i),
        };
        let value = self
            .client
            .execute(scripts::FRAME_RECT_SCRIPT, vec![Value::from(index)])
            .await?;
        if value.is_null() {
            return Ok(None);
        }

        let field = |name: &str| value.get(name).and_then(Value::as_f64).unwrap_or(0.0);
        Ok(Some(Rect::new(
            field("x"),
            field("y"),
            field("width"),
            field("height"),
        )))
    }

    async fn switch_to(&mut self, frame: &FrameHandle) -> Result<()> {
        self.enter_top().await?;
        if let FrameHandle::Index(i) = frame {
            self.client
                .enter_frame(Some(*i))
                .await
                .with_context(|| format!("Failed to enter frame {}", i))?;
        }
        Ok(())
    }

    async fn evaluate(&mut self, script: &str, args: Vec<Value>) -> Result<Value> {
        Ok(self.client.execute(script, args).await?)
    }

    async fn page_source(&mut self) -> Result<String> {
        Ok(self.client.source().await?)
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let screenshot_data = self.client.screenshot().await?;

        let expanded_path = shellexpand::tilde(&path.to_string_lossy()).to_string();
        if let Some(parent) = Path::new(&expanded_path).parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directories for screenshot")?;
        }

        std::fs::write(&expanded_path, screenshot_data)
            .context("Failed to write screenshot to file")?;

        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let element = self.find(selector).await?;
        element.click().await?;
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let element = self.find(selector).await?;
        element.clear().await?;
        element.send_keys(text).await?;
        Ok(())
    }

    async fn text(&mut self, selector: &str) -> Result<String> {
        let element = self.find(selector).await?;
        Ok(element.text().await?)
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(100);

        loop {
            if self.client.find(Locator::Css(selector)).await.is_ok() {
                return Ok(());
            }

            if start.elapsed() >= timeout {
                anyhow::bail!("Timeout waiting for element: {}", selector);
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn press_key(&mut self, selector: &str, key: &str) -> Result<()> {
        let element = self.find(selector).await?;
        element.send_keys(&webdriver_key(key)).await?;
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<()> {
        let element = self.find(selector).await?;
        element.select_by_value(value).await?;
        Ok(())
    }
}

/// Map a key name to the WebDriver code point that `send_keys` understands
fn webdriver_key(key: &str) -> String {
    let code = match key.to_ascii_lowercase().as_str() {
        "enter" | "return" => '\u{E007}',
        "tab" => '\u{E004}',
        "escape" | "esc" => '\u{E00C}',
        "backspace" => '\u{E003}',
        "arrowdown" | "down" => '\u{E015}',
        "arrowup" | "up" => '\u{E013}',
        "pagedown" => '\u{E00F}',
        "pageup" => '\u{E00E}',
        _ => return key.to_string(),
    };
    code.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webdriver_key_mapping() {
        assert_eq!(webdriver_key("Enter"), "\u{E007}");
        assert_eq!(webdriver_key("tab"), "\u{E004}");
        assert_eq!(webdriver_key("a"), "a");
    }
}
