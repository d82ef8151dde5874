// src/config.rs

use std::env;
use std::fs;
use std::path::PathBuf;

use crate::llm::client::{Provider, ProviderConfig};

fn config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("scenesmith");
    dir.push("config.toml");
    dir
}

fn default_config() -> ProviderConfig {
    ProviderConfig {
        provider: Provider::OpenAI,
        model: "gpt-5.2".to_string(),
        api_key: String::new(),
        base_url: None,
    }
}

fn load_config() -> Option<ProviderConfig> {
    fs::read_to_string(config_path())
        .ok()
        .and_then(|s| toml::from_str(&s).ok())
}

/// Stored config, with environment overrides for the key and model so a
/// CI run never has to touch the config file.
pub fn load_or_default() -> ProviderConfig {
    let mut cfg = load_config().unwrap_or_else(default_config);

    if cfg.api_key.trim().is_empty() {
        let var = match cfg.provider {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        };
        if let Ok(key) = env::var(var) {
            cfg.api_key = key;
        }
    }

    if let Ok(model) = env::var("SCENESMITH_MODEL") {
        cfg.model = model;
    }

    cfg
}

pub fn configure(
    provider_name: &str,
    model: String,
    api_key: String,
    base_url: Option<String>,
) -> Result<PathBuf, String> {
    if api_key.trim().is_empty() {
        return Err("API key cannot be empty".into());
    }

    let provider = parse_provider(provider_name)?;

    let cfg = ProviderConfig {
        provider,
        model,
        api_key,
        base_url,
    };

    let path = config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let text = toml::to_string(&cfg).map_err(|e| e.to_string())?;
    fs::write(&path, text).map_err(|e| e.to_string())?;
    Ok(path)
}

fn parse_provider(name: &str) -> Result<Provider, String> {
    match name {
        "openai" => Ok(Provider::OpenAI),
        "anthropic" => Ok(Provider::Anthropic),
        other => Err(format!("unknown provider '{other}' (expected openai or anthropic)")),
    }
}
