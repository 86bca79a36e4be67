//! Utility functions for the rove CLI.

use anyhow::{Context, Result};
use rove_config::Config;
use rove_providers::{OpenAIProvider, ProviderRegistry};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::cli_args::Cli;

pub fn initialize_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("rove={}", level).parse().unwrap())
        .add_directive(format!("rove_cli={}", level).parse().unwrap())
        .add_directive(format!("rove_core={}", level).parse().unwrap())
        .add_directive(format!("rove_browser={}", level).parse().unwrap())
        .add_directive(format!("rove_planner={}", level).parse().unwrap())
        .add_directive(format!("rove_providers={}", level).parse().unwrap());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Load configuration with the CLI's model selection applied
pub fn load_config_with_cli_overrides(cli: &Cli) -> Result<Config> {
    let config = Config::load_with_overrides(cli.config.as_deref(), cli.models.clone())?;
    if config.providers.models.is_empty() {
        anyhow::bail!("No models selected. Set providers.models in the config or pass --models");
    }
    Ok(config)
}

/// Register every provider referenced as a selected or vision model
pub fn build_registry(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    let references = config
        .providers
        .models
        .iter()
        .chain(config.providers.vision.iter());

    for reference in references {
        if registry.get(reference).is_ok() {
            continue;
        }
        let settings = config.get_provider_config(reference)?;
        let provider = OpenAIProvider::new_with_name(
            reference.clone(),
            settings.api_key.clone(),
            Some(settings.model.clone()),
            settings.base_url.clone(),
            settings.max_tokens,
            settings.temperature,
        )
        .with_context(|| format!("Failed to create provider '{}'", reference))?;
        registry.register(provider);
    }

    Ok(registry)
}

/// Read one line from the terminal. `None` on Ctrl-C, Ctrl-D or empty input.
pub fn prompt_line(prompt: &str) -> Result<Option<String>> {
    let mut rl = DefaultEditor::new()?;
    match rl.readline(prompt) {
        Ok(line) if line.trim().is_empty() => Ok(None),
        Ok(line) => Ok(Some(line.trim().to_string())),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rove_config::OpenAIConfig;

    fn provider(model: &str) -> OpenAIConfig {
        OpenAIConfig {
            api_key: "sk-test".to_string(),
            model: model.to_string(),
            base_url: Some("http://localhost:1234/v1".to_string()),
            max_tokens: Some(1024),
            temperature: Some(0.1),
        }
    }

    #[test]
    fn test_registry_covers_models_and_vision() {
        let mut config = Config::default();
        config.providers.openai.insert("default".to_string(), provider("gpt-4o"));
        config
            .providers
            .openai_compatible
            .insert("local".to_string(), provider("qwen"));
        config.providers.models = vec!["openai.default".to_string(), "openai_compatible.local".to_string()];
        config.providers.vision = Some("openai.default".to_string());

        let registry = build_registry(&config).unwrap();
        let mut names = registry.list_providers();
        names.sort();
        assert_eq!(names, vec!["openai.default", "openai_compatible.local"]);
        assert_eq!(registry.get("openai_compatible.local").unwrap().model(), "qwen");
    }

    #[test]
    fn test_registry_rejects_unknown_reference() {
        let mut config = Config::default();
        config.providers.models = vec!["openai.missing".to_string()];
        assert!(build_registry(&config).is_err());
    }
}
