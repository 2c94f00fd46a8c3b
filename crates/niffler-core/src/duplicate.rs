// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Duplicate tool-call detection: signature computation and the per-depth /
//! global call counters used by the turn loop to decide when to replace a
//! repeated call with a synthetic tool result instead of executing it.
use std::collections::HashMap;

use niffler_config::AgentConfig;
use serde_json::Value;

/// Canonical string form of a tool call used for duplicate detection:
/// `name(k1=v1, k2=v2, …)` with keys sorted, strings quoted, and JSON
/// values rendered canonically (so key reordering or incidental whitespace
/// in the model's JSON never changes the signature).
pub fn normalize(name: &str, args: &Value) -> String {
    let mut parts = Vec::new();
    if let Value::Object(map) = args {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            let rendered = render_value(&map[key]);
            parts.push(format!("{key}={rendered}"));
        }
    }
    format!("{name}({})", parts.join(", "))
}

fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

/// Tracks how many times each call signature has been seen, both within
/// the current tool-call round (`depth`) and across the whole turn.
#[derive(Debug, Default)]
pub struct DuplicateTracker {
    per_depth: HashMap<(u32, String), u32>,
    global: HashMap<String, u32>,
}

impl DuplicateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if recording one more occurrence of `sig` at `depth` would
    /// exceed either configured limit. Does not mutate the counters — call
    /// [`Self::record`] only for calls that actually execute.
    pub fn exceeds(&self, sig: &str, depth: u32, config: &AgentConfig) -> bool {
        let depth_count = self.per_depth.get(&(depth, sig.to_string())).copied().unwrap_or(0);
        let global_count = self.global.get(sig).copied().unwrap_or(0);
        depth_count + 1 > config.duplicate_per_depth_limit || global_count + 1 > config.duplicate_global_limit
    }

    pub fn record(&mut self, sig: &str, depth: u32) {
        *self.per_depth.entry((depth, sig.to_string())).or_insert(0) += 1;
        *self.global.entry(sig.to_string()).or_insert(0) += 1;
    }
}

/// Text of the synthetic tool result injected when a duplicate call is
/// suppressed, so the model sees a clear reason and an alternative path
/// forward rather than a silent no-op.
pub fn duplicate_limit_message(sig: &str) -> String {
    format!(
        "This exact call has already been made the maximum number of times this turn (limit reached): {sig}. \
         Use the result you already have, or try a different approach — \
         e.g. a narrower query, a different tool, or reasoning from the existing output instead of repeating the call."
    )
}
