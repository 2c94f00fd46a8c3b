// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model provider abstraction: the streaming wire protocol, the bundled
//! model catalog, and the thinking/reasoning auto-detection layer shared by
//! every provider configuration.

pub mod catalog;
pub mod openai_compat;
pub mod provider;
pub mod thinking;
mod types;

pub use catalog::{InputModality, ModelCatalogEntry};
pub use openai_compat::{AuthStyle, OpenAICompatProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use types::*;

use anyhow::bail;

/// Configuration needed to construct a provider, independent of how it was
/// loaded (config file, environment, CLI flags).
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub reasoning: Option<ReasoningLevel>,
    pub extra_headers: Vec<(String, String)>,
    pub extra_body: serde_json::Value,
}

/// Construct a boxed [`ModelProvider`] from configuration. `niffler` speaks
/// the OpenAI-compatible wire format to every provider; `cfg.provider`
/// selects the auth style and well-known base URL, falling back to
/// `cfg.base_url` for anything self-hosted or not built in.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    let resolved_max_tokens =
        cfg.max_tokens.or_else(|| catalog::lookup(&cfg.provider, &cfg.name).map(|e| e.max_output_tokens));

    let (driver_name, base_url, auth_style): (&'static str, &str, AuthStyle) = match cfg.provider.as_str() {
        "openai" => ("openai", "https://api.openai.com/v1", AuthStyle::Bearer),
        "openrouter" => ("openrouter", "https://openrouter.ai/api/v1", AuthStyle::Bearer),
        "groq" => ("groq", "https://api.groq.com/openai/v1", AuthStyle::Bearer),
        "together" => ("together", "https://api.together.xyz/v1", AuthStyle::Bearer),
        "deepseek" => ("deepseek", "https://api.deepseek.com/v1", AuthStyle::Bearer),
        "ollama" => ("ollama", "http://localhost:11434/v1", AuthStyle::None),
        "llama-cpp" | "local" => ("local", "http://localhost:8080/v1", AuthStyle::None),
        "custom" => {
            let base = cfg.base_url.as_deref().ok_or_else(|| anyhow::anyhow!("custom provider requires base_url"))?;
            ("custom", base, AuthStyle::Bearer)
        }
        other => bail!("unknown model provider {other:?}; see the config reference for supported ids"),
    };
    let base_url = cfg.base_url.as_deref().unwrap_or(base_url);

    Ok(Box::new(OpenAICompatProvider::new(
        driver_name,
        cfg.name.clone(),
        cfg.api_key.clone(),
        base_url,
        resolved_max_tokens,
        cfg.temperature,
        cfg.extra_headers.clone(),
        auth_style,
        cfg.extra_body.clone(),
    )))
}
