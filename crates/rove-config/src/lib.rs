use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Provider configuration with named configs per provider type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Models that take part in a run, each as "<provider_type>.<config_name>"
    #[serde(default)]
    pub models: Vec<String>,

    /// Provider used to describe screenshots (optional, visual descriptions are skipped without it)
    pub vision: Option<String>,

    /// Named OpenAI provider configs
    #[serde(default)]
    pub openai: HashMap<String, OpenAIConfig>,

    /// Multiple named OpenAI-compatible providers (e.g., openrouter, deepseek, qwen)
    #[serde(default)]
    pub openai_compatible: HashMap<String, OpenAIConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub chrome_port: u16,
    /// Optional path to Chrome binary (e.g., Chrome for Testing)
    pub chrome_binary: Option<String>,
    pub headless: bool,
    pub page_load_timeout_ms: u64,
    pub frame_wait_timeout_ms: u64,
    pub frame_poll_interval_ms: u64,
    /// Smallest bounding-box area (px²) a frame needs to count as content
    pub min_frame_area: f64,
    /// Smallest width and height (px) a frame needs to count as content
    pub min_frame_dimension: f64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_port: 9515,
            chrome_binary: None,
            headless: true,
            page_load_timeout_ms: 30_000,
            frame_wait_timeout_ms: 5_000,
            frame_poll_interval_ms: 250,
            min_frame_area: 40_000.0,
            min_frame_dimension: 100.0,
        }
    }
}

/// How page state is captured for the model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Cleaned HTML of the content context
    #[default]
    Html,
    /// Accessibility-style text outline of the content context
    Outline,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Html => "html",
            CaptureMode::Outline => "outline",
        }
    }
}

impl std::str::FromStr for CaptureMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(CaptureMode::Html),
            "outline" => Ok(CaptureMode::Outline),
            other => anyhow::bail!("Unknown capture mode '{}'. Expected 'html' or 'outline'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_timeout_seconds: u64,
    pub step_timeout_ms: u64,
    pub snapshot_budget_chars: usize,
    pub live_snapshot_budget_chars: usize,
    pub capture_mode: CaptureMode,
    /// Directory with `<stage>.txt` files overriding the built-in prompt templates
    pub prompt_dir: Option<String>,
    pub debug_artifacts: bool,
    /// Ask the vision provider for a page description during refine stages
    pub visual: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_timeout_seconds: 180,
            step_timeout_ms: 30_000,
            snapshot_budget_chars: 500_000,
            live_snapshot_budget_chars: 200_000,
            capture_mode: CaptureMode::Html,
            prompt_dir: None,
            debug_artifacts: true,
            visual: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: String,
    pub screenshot_ttl_seconds: u64,
    pub description_ttl_seconds: u64,
    pub max_screenshots: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: ".rove/cache".to_string(),
            screenshot_ttl_seconds: 20 * 60,
            description_ttl_seconds: 2 * 60,
            max_screenshots: 3,
        }
    }
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let config_path_to_load = if let Some(path) = config_path {
            Some(shellexpand::tilde(path).to_string())
        } else {
            let default_paths = ["./rove.toml", "~/.config/rove/config.toml", "~/.rove.toml"];
            default_paths.iter().find_map(|path| {
                let expanded_path = shellexpand::tilde(path);
                if Path::new(expanded_path.as_ref()).exists() {
                    Some(expanded_path.to_string())
                } else {
                    None
                }
            })
        };

        if let Some(path) = config_path_to_load {
            let config_content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&config_content)?;

            for model in &config.providers.models {
                config.validate_provider_reference(model)?;
            }
            if let Some(vision) = &config.providers.vision {
                config.validate_provider_reference(vision)?;
            }

            return Ok(config);
        }

        Ok(Self::default())
    }

    /// Validate a provider reference (format: "<provider_type>.<config_name>")
    pub fn validate_provider_reference(&self, reference: &str) -> Result<()> {
        let (provider_type, config_name) = Self::parse_provider_reference(reference)?;

        match provider_type.as_str() {
            "openai" => {
                if !self.providers.openai.contains_key(&config_name) {
                    anyhow::bail!(
                        "Provider config 'openai.{}' not found. Available: {:?}",
                        config_name,
                        self.providers.openai.keys().collect::<Vec<_>>()
                    );
                }
            }
            "openai_compatible" => {
                if !self.providers.openai_compatible.contains_key(&config_name) {
                    anyhow::bail!(
                        "Provider config 'openai_compatible.{}' not found. Available: {:?}",
                        config_name,
                        self.providers.openai_compatible.keys().collect::<Vec<_>>()
                    );
                }
            }
            other => {
                anyhow::bail!(
                    "Unknown provider type '{}'. Valid types: openai, openai_compatible",
                    other
                );
            }
        }

        Ok(())
    }

    /// Parse a provider reference into (provider_type, config_name)
    pub fn parse_provider_reference(reference: &str) -> Result<(String, String)> {
        let parts: Vec<&str> = reference.split('.').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            anyhow::bail!(
                "Invalid provider reference '{}'. Expected format: '<provider_type>.<config_name>'",
                reference
            );
        }
        Ok((parts[0].to_string(), parts[1].to_string()))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn load_with_overrides(
        config_path: Option<&str>,
        models_override: Option<Vec<String>>,
    ) -> Result<Self> {
        let mut config = Self::load(config_path)?;

        if let Some(models) = models_override {
            for model in &models {
                config.validate_provider_reference(model)?;
            }
            config.providers.models = models;
        }

        Ok(config)
    }

    /// Look up the provider settings behind a reference
    pub fn get_provider_config(&self, reference: &str) -> Result<&OpenAIConfig> {
        let (provider_type, config_name) = Self::parse_provider_reference(reference)?;
        let table = match provider_type.as_str() {
            "openai" => &self.providers.openai,
            "openai_compatible" => &self.providers.openai_compatible,
            other => anyhow::bail!("Unknown provider type '{}'", other),
        };
        table
            .get(&config_name)
            .ok_or_else(|| anyhow::anyhow!("Provider config '{}' not found", reference))
    }
}

#[cfg(test)]
mod tests;
