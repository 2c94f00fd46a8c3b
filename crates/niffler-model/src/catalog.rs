// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputModality {
    Text,
    Image,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelCatalogEntry {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_modalities")]
    pub input_modalities: Vec<InputModality>,
}

fn default_modalities() -> Vec<InputModality> {
    vec![InputModality::Text]
}

const CATALOG_YAML: &str = include_str!("models.yaml");

/// Parse the bundled model catalog. Falls back to an empty catalog (never
/// panics) if the bundled YAML is somehow malformed, since an empty catalog
/// just means every `lookup` falls back to conservative defaults.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    serde_yaml::from_str(CATALOG_YAML).unwrap_or_default()
}

pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && e.id == model_id)
}

pub fn lookup_by_model_name(model_name: &str) -> Option<ModelCatalogEntry> {
    static_catalog().into_iter().find(|e| e.name == model_name || e.id == model_name)
}

/// Conservative fallback context window when a model is missing from the
/// catalog: small enough that the session's budget logic stays cautious.
pub const FALLBACK_CONTEXT_WINDOW: u32 = 8_192;
pub const FALLBACK_MAX_OUTPUT_TOKENS: u32 = 4_096;

pub fn context_window(provider: &str, model_id: &str) -> u32 {
    lookup(provider, model_id).map(|e| e.context_window).unwrap_or(FALLBACK_CONTEXT_WINDOW)
}

pub fn max_output_tokens(provider: &str, model_id: &str) -> u32 {
    lookup(provider, model_id).map(|e| e.max_output_tokens).unwrap_or(FALLBACK_MAX_OUTPUT_TOKENS)
}

pub fn supports_images(provider: &str, model_id: &str) -> bool {
    lookup(provider, model_id)
        .map(|e| e.input_modalities.contains(&InputModality::Image))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_catalog_parses_without_error() {
        let entries = static_catalog();
        assert!(!entries.is_empty(), "bundled catalog should not be empty");
    }

    #[test]
    fn every_entry_has_nonzero_context_window() {
        for e in static_catalog() {
            assert!(e.context_window > 0, "{} has zero context window", e.id);
        }
    }

    #[test]
    fn every_entry_supports_at_least_text() {
        for e in static_catalog() {
            assert!(e.input_modalities.contains(&InputModality::Text), "{} missing text modality", e.id);
        }
    }

    #[test]
    fn lookup_known_model_succeeds() {
        let e = lookup("openai", "gpt-4o").expect("gpt-4o should be in the bundled catalog");
        assert_eq!(e.provider, "openai");
    }

    #[test]
    fn lookup_unknown_model_falls_back_to_conservative_defaults() {
        assert_eq!(context_window("openai", "no-such-model"), FALLBACK_CONTEXT_WINDOW);
        assert_eq!(max_output_tokens("openai", "no-such-model"), FALLBACK_MAX_OUTPUT_TOKENS);
        assert!(!supports_images("openai", "no-such-model"));
    }

    #[test]
    fn lookup_by_model_name_matches_display_name() {
        let e = lookup_by_model_name("Claude 3.5 Sonnet").expect("should find by display name");
        assert_eq!(e.provider, "anthropic");
    }
}
