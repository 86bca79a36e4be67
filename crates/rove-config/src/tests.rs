#[cfg(test)]
mod tests {
    use crate::{CaptureMode, Config};
    use std::fs;
    use tempfile::TempDir;

    fn write_config(content: &str) -> (TempDir, String) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rove.toml");
        fs::write(&config_path, content).unwrap();
        let path = config_path.to_str().unwrap().to_string();
        (temp_dir, path)
    }

    #[test]
    fn test_load_models_and_sections() {
        let (_dir, path) = write_config(
            r#"
[providers]
models = ["openai.default", "openai_compatible.deepseek"]
vision = "openai.default"

[providers.openai.default]
api_key = "test-key"
model = "gpt-4o"

[providers.openai_compatible.deepseek]
api_key = "ds-key"
model = "deepseek-chat"
base_url = "https://api.deepseek.com/v1"

[pipeline]
model_timeout_seconds = 90
step_timeout_ms = 10000
snapshot_budget_chars = 1000
live_snapshot_budget_chars = 500
capture_mode = "outline"
"#,
        );

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.providers.models.len(), 2);
        assert_eq!(config.pipeline.model_timeout_seconds, 90);
        assert_eq!(config.pipeline.capture_mode, CaptureMode::Outline);
        assert!(config.pipeline.debug_artifacts);

        // Sections that were not written fall back to defaults
        assert_eq!(config.browser.chrome_port, 9515);
        assert_eq!(config.cache.screenshot_ttl_seconds, 1200);
        assert_eq!(config.cache.description_ttl_seconds, 120);

        let ds = config.get_provider_config("openai_compatible.deepseek").unwrap();
        assert_eq!(ds.model, "deepseek-chat");
    }

    #[test]
    fn test_unknown_model_reference_is_rejected() {
        let (_dir, path) = write_config(
            r#"
[providers]
models = ["openai.missing"]

[providers.openai.default]
api_key = "test-key"
model = "gpt-4o"
"#,
        );

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("openai.missing"));
    }

    #[test]
    fn test_models_override() {
        let (_dir, path) = write_config(
            r#"
[providers]
models = ["openai.default"]

[providers.openai.default]
api_key = "a"
model = "gpt-4o"

[providers.openai.mini]
api_key = "b"
model = "gpt-4o-mini"
"#,
        );

        let config =
            Config::load_with_overrides(Some(&path), Some(vec!["openai.mini".to_string()])).unwrap();
        assert_eq!(config.providers.models, vec!["openai.mini".to_string()]);

        let bad = Config::load_with_overrides(Some(&path), Some(vec!["gemini.x".to_string()]));
        assert!(bad.is_err());
    }

    #[test]
    fn test_parse_provider_reference() {
        let (kind, name) = Config::parse_provider_reference("openai.default").unwrap();
        assert_eq!(kind, "openai");
        assert_eq!(name, "default");

        assert!(Config::parse_provider_reference("openai").is_err());
        assert!(Config::parse_provider_reference("a.b.c").is_err());
        assert!(Config::parse_provider_reference("openai.").is_err());
    }

    #[test]
    fn test_capture_mode_from_str() {
        assert_eq!("HTML".parse::<CaptureMode>().unwrap(), CaptureMode::Html);
        assert_eq!("outline".parse::<CaptureMode>().unwrap(), CaptureMode::Outline);
        assert!("aria".parse::<CaptureMode>().is_err());
    }

    #[test]
    fn test_save_round_trips_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saved.toml");
        let path = path.to_str().unwrap();

        Config::default().save(path).unwrap();
        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.pipeline.snapshot_budget_chars, 500_000);
        assert_eq!(loaded.pipeline.live_snapshot_budget_chars, 200_000);
    }
}
