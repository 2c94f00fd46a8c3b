// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

const DEFAULT_MAX_CHARS: usize = 50_000;
const USER_AGENT: &str = "niffler/0.1 (+https://github.com/)";

/// Built-in tool that fetches a URL and converts the body to plain text:
/// HTML is rendered via `html2text`, JSON is pretty-printed, everything
/// else is returned raw. Limited to 3 redirects and a 30s timeout.
pub struct FetchTool {
    client: reqwest::blocking::Client,
}

impl Default for FetchTool {
    fn default() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client builder with static config should never fail");
        Self { client }
    }
}

impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S). HTML bodies are converted to readable plain \
         text, JSON bodies are pretty-printed, everything else is returned as-is. \
         Output is truncated at 50,000 characters by default."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to fetch." },
                "max_chars": { "type": "integer", "description": "Optional truncation limit, default 50000." }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(url) = call.args.get("url").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'url' argument");
        };
        let max_chars = call.args.get("max_chars").and_then(|v| v.as_u64()).map(|n| n as usize).unwrap_or(DEFAULT_MAX_CHARS);

        let response = match self.client.get(url).send() {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("request failed: {e}")),
        };

        let status = response.status();
        let content_type = response.headers().get("content-type").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();

        let body = match response.text() {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("failed to read body: {e}")),
        };

        if !status.is_success() {
            return ToolOutput::err(&call.id, format!("HTTP {status}: {}", truncate(&body, max_chars)));
        }

        let rendered = if content_type.contains("text/html") {
            html2text::from_read(body.as_bytes(), 100)
        } else if content_type.contains("application/json") {
            serde_json::from_str::<Value>(&body).ok().and_then(|v| serde_json::to_string_pretty(&v).ok()).unwrap_or(body)
        } else {
            body
        };

        ToolOutput::ok(&call.id, truncate(&rendered, max_chars))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(max_chars).collect();
    truncated.push_str("\n...[truncated]");
    truncated
}
