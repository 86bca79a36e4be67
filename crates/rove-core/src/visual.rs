//! Visual page descriptions.
//!
//! Screenshots and their descriptions are cached per address with the query
//! string and fragment stripped, so pagination or sort parameters share one
//! entry. Screenshots and descriptions expire independently.

use anyhow::{Context, Result};
use rove_providers::{analyze_images, LLMProvider};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::capture::CaptureQueue;
use crate::epoch::EpochTicket;

/// Time source, replaceable in tests
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Address without query string or fragment
pub fn strip_query(address: &str) -> String {
    match url::Url::parse(address) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => address
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or(address)
            .to_string(),
    }
}

/// File-name-safe key for an address
pub fn visual_key(address: &str) -> String {
    let digest = Sha256::digest(strip_query(address).as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

#[derive(Debug, Default, Clone)]
struct VisualEntry {
    screenshots: Vec<PathBuf>,
    screenshots_at: Option<Instant>,
    description: Option<String>,
    described_at: Option<Instant>,
}

pub struct VisualCache {
    screenshot_ttl: Duration,
    description_ttl: Duration,
    entries: HashMap<String, VisualEntry>,
    clock: Clock,
}

impl VisualCache {
    pub fn new(screenshot_ttl: Duration, description_ttl: Duration) -> Self {
        Self {
            screenshot_ttl,
            description_ttl,
            entries: HashMap::new(),
            clock: Arc::new(Instant::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn fresh(&self, at: Option<Instant>, ttl: Duration) -> bool {
        at.map(|at| (self.clock)().saturating_duration_since(at) < ttl)
            .unwrap_or(false)
    }

    /// Unexpired screenshots whose files still exist
    pub fn screenshots(&self, address: &str) -> Option<Vec<PathBuf>> {
        let entry = self.entries.get(&strip_query(address))?;
        if !self.fresh(entry.screenshots_at, self.screenshot_ttl) || entry.screenshots.is_empty() {
            return None;
        }
        if entry.screenshots.iter().all(|p| p.is_file()) {
            Some(entry.screenshots.clone())
        } else {
            None
        }
    }

    pub fn put_screenshots(&mut self, address: &str, paths: Vec<PathBuf>) {
        let now = (self.clock)();
        let entry = self.entries.entry(strip_query(address)).or_default();
        entry.screenshots = paths;
        entry.screenshots_at = Some(now);
    }

    pub fn description(&self, address: &str) -> Option<String> {
        let entry = self.entries.get(&strip_query(address))?;
        if self.fresh(entry.described_at, self.description_ttl) {
            entry.description.clone()
        } else {
            None
        }
    }

    pub fn put_description(&mut self, address: &str, description: String) {
        let now = (self.clock)();
        let entry = self.entries.entry(strip_query(address)).or_default();
        entry.description = Some(description);
        entry.described_at = Some(now);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Describes the current page with a vision-capable provider
pub struct VisualDescriber {
    provider: Option<Arc<dyn LLMProvider>>,
    prompt: String,
    dir: PathBuf,
    max_shots: usize,
    timeout: Duration,
    cache: Mutex<VisualCache>,
}

impl VisualDescriber {
    pub fn new(
        provider: Option<Arc<dyn LLMProvider>>,
        prompt: String,
        dir: PathBuf,
        max_shots: usize,
        timeout: Duration,
        cache: VisualCache,
    ) -> Self {
        Self {
            provider,
            prompt,
            dir,
            max_shots,
            timeout,
            cache: Mutex::new(cache),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Description of the page the browser is on; `None` without a provider
    /// or when the provider does not answer within the model timeout
    pub async fn describe(&self, capture: &CaptureQueue, ticket: EpochTicket) -> Result<Option<String>> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };

        let address = capture.current_url().await?;
        if let Some(description) = self.cache.lock().await.description(&address) {
            debug!("Visual description cache hit for {}", address);
            return Ok(Some(description));
        }

        let cached_shots = self.cache.lock().await.screenshots(&address);
        let shots = match cached_shots {
            Some(shots) => shots,
            None => {
                let set = capture
                    .screenshots(self.dir.clone(), self.max_shots, ticket)
                    .await?;
                self.cache
                    .lock()
                    .await
                    .put_screenshots(&address, set.paths.clone());
                set.paths
            }
        };

        let started = Instant::now();
        let analysis = analyze_images(provider.as_ref(), shots.as_slice(), &self.prompt);
        let description = match tokio::time::timeout(self.timeout, analysis).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Visual description of {} timed out after {:?}",
                    address, self.timeout
                );
                return Ok(None);
            }
        };
        info!(
            "Visual description of {} by {}: {} chars in {:?}",
            address,
            provider.name(),
            description.len(),
            started.elapsed()
        );

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}.txt", visual_key(&address)));
        std::fs::write(&path, &description)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        self.cache
            .lock()
            .await
            .put_description(&address, description.clone());
        Ok(Some(description))
    }

    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    fn manual_clock() -> (Clock, Arc<StdMutex<Instant>>) {
        let now = Arc::new(StdMutex::new(Instant::now()));
        let handle = Arc::clone(&now);
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (clock, now)
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(
            strip_query("https://x.test/list?page=2&sort=asc#top"),
            "https://x.test/list"
        );
        assert_eq!(strip_query("not a url?x=1"), "not a url");
        assert_eq!(
            visual_key("https://x.test/list?page=1"),
            visual_key("https://x.test/list?page=9")
        );
        assert_ne!(visual_key("https://x.test/list"), visual_key("https://x.test/other"));
    }

    #[test]
    fn test_description_and_screenshot_ttls() {
        let dir = TempDir::new().unwrap();
        let shot = dir.path().join("a_1.png");
        std::fs::write(&shot, b"png").unwrap();

        let (clock, now) = manual_clock();
        let mut cache = VisualCache::new(Duration::from_secs(1200), Duration::from_secs(120))
            .with_clock(clock);

        cache.put_screenshots("https://x.test/list?page=1", vec![shot.clone()]);
        cache.put_description("https://x.test/list?page=1", "a table".to_string());

        // Different query, same entry
        assert_eq!(
            cache.description("https://x.test/list?page=2").as_deref(),
            Some("a table")
        );

        *now.lock().unwrap() += Duration::from_secs(121);
        assert!(cache.description("https://x.test/list").is_none());
        assert_eq!(cache.screenshots("https://x.test/list"), Some(vec![shot.clone()]));

        *now.lock().unwrap() += Duration::from_secs(1200);
        assert!(cache.screenshots("https://x.test/list").is_none());
    }

    #[test]
    fn test_missing_screenshot_files_are_not_served() {
        let mut cache = VisualCache::new(Duration::from_secs(60), Duration::from_secs(60));
        cache.put_screenshots("https://x.test/a", vec![PathBuf::from("/nonexistent/shot.png")]);
        assert!(cache.screenshots("https://x.test/a").is_none());

        cache.put_description("https://x.test/a", "d".to_string());
        cache.clear();
        assert!(cache.description("https://x.test/a").is_none());
    }
}
