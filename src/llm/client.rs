// src/llm/client.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::llm::Generator;

const PROMPT_ABI_VERSION: &str = "v1-scene-repair";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

/// Blocking HTTP client for the generation collaborator.
///
/// Constructed from an explicit config and injected where needed; there is
/// no process-wide client state.
pub struct LlmClient {
    cfg: ProviderConfig,
}

impl LlmClient {
    pub fn new(cfg: ProviderConfig) -> Self {
        Self { cfg }
    }

    fn run(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, String> {
        if self.cfg.api_key.trim().is_empty() {
            return Err("API key not configured; run `scenesmith configure`".into());
        }

        let prompt_hash = hash_prompt(system, user);
        let (url, headers, body) =
            build_request(&self.cfg, system, user, max_tokens, temperature, &prompt_hash);

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| e.to_string())?;

        let mut req = client.post(url).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.send().map_err(|e| e.to_string())?;
        let status = resp.status();
        let json: Value = resp.json().map_err(|e| e.to_string())?;

        if !status.is_success() {
            return Err(format!("generation error {}: {}", status, json));
        }

        extract_text(&self.cfg.provider, &json)
    }
}

impl Generator for LlmClient {
    fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, String> {
        self.run(system, user, max_tokens, temperature)
    }
}

fn hash_prompt(system: &str, user: &str) -> String {
    let mut h = Sha256::new();
    h.update(PROMPT_ABI_VERSION.as_bytes());
    h.update(system.as_bytes());
    h.update(user.as_bytes());
    hex::encode(h.finalize())
}

fn build_request(
    cfg: &ProviderConfig,
    system: &str,
    user: &str,
    max_tokens: u32,
    temperature: f32,
    prompt_hash: &str,
) -> (String, Vec<(&'static str, String)>, Value) {
    match cfg.provider {
        Provider::OpenAI => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/responses".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "instructions": system,
                "input": user,
                "max_output_tokens": max_tokens,
                "temperature": temperature,
                "prompt_cache_key": prompt_hash,
            });

            (
                url,
                vec![("Authorization", format!("Bearer {}", cfg.api_key))],
                body,
            )
        }

        Provider::Anthropic => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "max_tokens": max_tokens,
                "temperature": temperature,
                "system": system,
                "messages": [
                    { "role": "user", "content": user }
                ]
            });

            (
                url,
                vec![
                    ("x-api-key", cfg.api_key.clone()),
                    ("anthropic-version", "2023-06-01".into()),
                ],
                body,
            )
        }
    }
}

fn extract_text(provider: &Provider, v: &Value) -> Result<String, String> {
    match provider {
        Provider::OpenAI => v
            .get("output")
            .and_then(|o| o.as_array())
            .and_then(|arr| {
                arr.iter().find_map(|item| {
                    item.get("content")?
                        .as_array()?
                        .iter()
                        .find_map(|c| c.get("text")?.as_str())
                })
            })
            .map(str::to_owned)
            .ok_or_else(|| "OpenAI response parse failure".into()),

        Provider::Anthropic => v
            .pointer("/content/0/text")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| "Anthropic response parse failure".into()),
    }
}
