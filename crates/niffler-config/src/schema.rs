// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use niffler_model::ReasoningLevel;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Named provider configurations, selectable with `--model <key>` or
    /// `--model <key>/<model>`.
    #[serde(default)]
    pub providers: HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" | "openrouter" | "groq" | "together" |
    /// "deepseek" | "ollama" | "llama-cpp" | "local" | "custom". All are
    /// served through the single OpenAI-compatible wire protocol.
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override. Required when provider = "custom".
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Reasoning-effort level; caps the thinking budget manager.
    pub reasoning: Option<ReasoningLevel>,
    /// Extra headers forwarded on every request to this provider.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// Free-form extra body fields merged into the request JSON.
    #[serde(default)]
    pub extra_body: serde_json::Value,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            reasoning: None,
            extra_headers: HashMap::new(),
            extra_body: serde_json::Value::Null,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: explicit `api_key` wins, then `api_key_env`, then
    /// the provider's conventional environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        if let Some(env_var) = &self.api_key_env {
            if let Ok(v) = std::env::var(env_var) {
                return Some(v);
            }
        }
        conventional_api_key_env(&self.provider).and_then(|var| std::env::var(var).ok())
    }

    /// Build the runtime-facing [`niffler_model::ModelConfig`] that
    /// `niffler_model::from_config` consumes.
    pub fn to_model_config(&self) -> niffler_model::ModelConfig {
        niffler_model::ModelConfig {
            provider: self.provider.clone(),
            name: self.name.clone(),
            api_key: self.resolve_api_key(),
            base_url: self.base_url.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            reasoning: self.reasoning,
            extra_headers: self.extra_headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            extra_body: self.extra_body.clone(),
        }
    }
}

fn conventional_api_key_env(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "together" => Some("TOGETHER_API_KEY"),
        "deepseek" => Some("DEEPSEEK_API_KEY"),
        _ => None,
    }
}

fn default_max_tool_rounds() -> u32 {
    200
}
fn default_duplicate_per_depth_limit() -> u32 {
    2
}
fn default_duplicate_global_limit() -> u32 {
    20
}
fn default_tool_result_token_cap() -> usize {
    4000
}
fn default_tool_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Generate a structured plan; `edit` is gated to files created this session.
    Plan,
    /// Full read/write access, no gate.
    Code,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Code => write!(f, "code"),
        }
    }
}

fn default_agent_mode() -> AgentMode {
    AgentMode::Code
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default mode when none is specified on the CLI.
    #[serde(default = "default_agent_mode")]
    pub default_mode: AgentMode,
    /// Maximum tool-call round depth before the loop appends a guard message
    /// and stops (spec's `maxDepth`).
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Per-depth duplicate-call limit: the (N+1)-th identical call signature
    /// at the same depth is rewritten to a synthetic tool result.
    #[serde(default = "default_duplicate_per_depth_limit")]
    pub duplicate_per_depth_limit: u32,
    /// Global duplicate-call limit across the whole turn.
    #[serde(default = "default_duplicate_global_limit")]
    pub duplicate_global_limit: u32,
    /// System prompt override; leave unset to use the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::Code,
            max_tool_rounds: default_max_tool_rounds(),
            duplicate_per_depth_limit: default_duplicate_per_depth_limit(),
            duplicate_global_limit: default_duplicate_global_limit(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Automatically approve `bash` commands matching these glob patterns.
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    /// Block `bash` commands matching these glob patterns.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call.
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum bytes of tool output retained before content-aware truncation.
    #[serde(default = "default_tool_result_token_cap")]
    pub output_byte_cap: usize,
    /// Directory tool paths are sanitized against; `..` may not escape it
    /// and symlinks are resolved before the check.
    #[serde(default)]
    pub workspace_root: Option<String>,
    /// Default maximum characters returned by `fetch`.
    #[serde(default = "default_fetch_max_chars")]
    pub fetch_max_chars: usize,
}

fn default_fetch_max_chars() -> usize {
    50_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec!["cat *".into(), "ls *".into(), "grep *".into(), "rg *".into(), "find *".into()],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: default_tool_timeout_secs(),
            output_byte_cap: default_tool_result_token_cap(),
            workspace_root: None,
            fetch_max_chars: default_fetch_max_chars(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_model_provider_is_openai() {
        assert_eq!(Config::default().model.provider, "openai");
    }

    #[test]
    fn config_default_agent_mode_is_code() {
        assert_eq!(Config::default().agent.default_mode, AgentMode::Code);
    }

    #[test]
    fn config_default_max_tool_rounds_positive() {
        assert!(Config::default().agent.max_tool_rounds > 0);
    }

    #[test]
    fn config_default_duplicate_limits_positive() {
        let c = Config::default();
        assert!(c.agent.duplicate_per_depth_limit > 0);
        assert!(c.agent.duplicate_global_limit > 0);
    }

    #[test]
    fn config_default_providers_empty() {
        assert!(Config::default().providers.is_empty());
    }

    #[test]
    fn config_default_tools_has_auto_approve_patterns() {
        assert!(!Config::default().tools.auto_approve_patterns.is_empty());
    }

    #[test]
    fn agent_mode_display() {
        assert_eq!(AgentMode::Plan.to_string(), "plan");
        assert_eq!(AgentMode::Code.to_string(), "code");
    }

    #[test]
    fn resolve_api_key_prefers_explicit_key() {
        let mut m = ModelConfig::default();
        m.api_key = Some("explicit".into());
        m.api_key_env = Some("NIFFLER_TEST_UNUSED_VAR".into());
        assert_eq!(m.resolve_api_key().as_deref(), Some("explicit"));
    }

    #[test]
    fn resolve_api_key_falls_back_to_named_env_var() {
        std::env::set_var("NIFFLER_TEST_API_KEY_SCHEMA", "from-env");
        let mut m = ModelConfig::default();
        m.api_key_env = Some("NIFFLER_TEST_API_KEY_SCHEMA".into());
        assert_eq!(m.resolve_api_key().as_deref(), Some("from-env"));
        std::env::remove_var("NIFFLER_TEST_API_KEY_SCHEMA");
    }

    #[test]
    fn config_deserialises_from_yaml() {
        let yaml_str = "model:\n  provider: groq\n  name: llama-3.1-70b\n  max_tokens: 8192\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.model.provider, "groq");
        assert_eq!(c.model.max_tokens, Some(8192));
    }

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml_str = "model:\n  name: gpt-4o-mini\n  provider: openai\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.agent.max_tool_rounds, AgentConfig::default().max_tool_rounds);
    }

    #[test]
    fn config_providers_deserialised_from_yaml() {
        let yaml = "providers:\n  local:\n    provider: ollama\n    base_url: http://localhost:11434/v1\n    name: llama3.2\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let p = c.providers.get("local").unwrap();
        assert_eq!(p.provider, "ollama");
        assert_eq!(p.name, "llama3.2");
    }

    #[test]
    fn to_model_config_carries_reasoning_level() {
        let mut m = ModelConfig::default();
        m.reasoning = Some(ReasoningLevel::High);
        let runtime = m.to_model_config();
        assert_eq!(runtime.reasoning, Some(ReasoningLevel::High));
    }
}
