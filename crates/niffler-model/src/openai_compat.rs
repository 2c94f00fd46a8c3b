// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-compatible chat completion provider and SSE streaming parser.
//!
//! `niffler` only ever talks to one wire format (the OpenAI
//! `/v1/chat/completions` streaming protocol), so this module both builds
//! the request and owns the whole response pipeline: a blocking byte reader,
//! an SSE line-buffer, the per-chunk JSON dispatch, and the thinking-format
//! auto-detection/budget layer described in [`crate::thinking`].
//!
//! # Auth styles
//! - `Bearer` — `Authorization: Bearer <key>` (most providers)
//! - `ApiKeyHeader` — `api-key: <key>` (Azure-style deployments)
//! - `None` — no authentication (local servers such as Ollama or llama.cpp)

use std::collections::VecDeque;
use std::io::Read;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    catalog::{static_catalog, ModelCatalogEntry},
    provider::ResponseStream,
    thinking::{FormatDetector, Segment, ThinkingBudget, XmlThinkingScanner},
    CompletionRequest, ResponseEvent, Role, ThinkingFormat,
};

/// How to send the API key in HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    ApiKeyHeader,
    None,
}

/// OpenAI-compatible chat completion provider.
pub struct OpenAICompatProvider {
    driver_name: &'static str,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    models_url: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::blocking::Client,
    extra_headers: Vec<(String, String)>,
    auth_style: AuthStyle,
    /// Extra key-value pairs merged verbatim into the request body, e.g.
    /// `reasoning_format: "deepseek"` to enable thinking extraction on a
    /// llama.cpp endpoint.
    extra_body: serde_json::Value,
}

impl OpenAICompatProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver_name: &'static str,
        model: String,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        extra_headers: Vec<(String, String)>,
        auth_style: AuthStyle,
        extra_body: serde_json::Value,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            models_url: Some(format!("{base}/models")),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::blocking::Client::new(),
            extra_headers,
            auth_style,
            extra_body,
        }
    }

    /// Construct a provider from a pre-built chat completions URL, for
    /// deployments that encode extra path/query segments (API version,
    /// deployment name) that can't be derived by appending a fixed suffix
    /// to a base URL.
    #[allow(clippy::too_many_arguments)]
    pub fn with_full_chat_url(
        driver_name: &'static str,
        model: String,
        api_key: Option<String>,
        chat_url: impl Into<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        extra_headers: Vec<(String, String)>,
        auth_style: AuthStyle,
        extra_body: serde_json::Value,
    ) -> Self {
        Self {
            driver_name,
            model,
            api_key,
            chat_url: chat_url.into(),
            models_url: None,
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::blocking::Client::new(),
            extra_headers,
            auth_style,
            extra_body,
        }
    }

    fn apply_auth(&self, mut req: reqwest::blocking::RequestBuilder) -> anyhow::Result<reqwest::blocking::RequestBuilder> {
        req = match self.auth_style {
            AuthStyle::Bearer => {
                let key = self
                    .api_key
                    .as_deref()
                    .context("API key not set; provide api_key or api_key_env in config")?;
                req.bearer_auth(key)
            }
            AuthStyle::ApiKeyHeader => {
                let key = self
                    .api_key
                    .as_deref()
                    .context("API key not set; provide api_key or api_key_env in config")?;
                req.header("api-key", key)
            }
            AuthStyle::None => req,
        };
        for (name, val) in &self.extra_headers {
            req = req.header(name.as_str(), val.as_str());
        }
        Ok(req)
    }
}

impl crate::ModelProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    /// List models via `GET /models`, enriched with static catalog metadata.
    /// Falls back to the catalog alone when there's no key, no endpoint, or
    /// the request fails — model discovery is a convenience, not load-bearing.
    fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let catalog_entries: Vec<ModelCatalogEntry> =
            static_catalog().into_iter().filter(|e| e.provider == self.driver_name).collect();

        let url = match &self.models_url {
            Some(u) => u.clone(),
            None => return Ok(catalog_entries),
        };
        let Some(_key) = &self.api_key else {
            return Ok(catalog_entries);
        };

        let req = match self.apply_auth(self.client.get(&url)) {
            Ok(r) => r,
            Err(_) => return Ok(catalog_entries),
        };
        let resp = match req.send() {
            Ok(r) => r,
            Err(_) => return Ok(catalog_entries),
        };
        if !resp.status().is_success() {
            return Ok(catalog_entries);
        }
        let body: Value = match resp.json() {
            Ok(v) => v,
            Err(_) => return Ok(catalog_entries),
        };

        let mut entries: Vec<ModelCatalogEntry> = Vec::new();
        if let Some(data) = body["data"].as_array() {
            for item in data {
                let Some(id) = item["id"].as_str().map(str::to_string) else {
                    continue;
                };
                if let Some(cat) = catalog_entries.iter().find(|e| e.id == id) {
                    entries.push(cat.clone());
                } else {
                    entries.push(ModelCatalogEntry {
                        id: id.clone(),
                        name: id,
                        provider: self.driver_name.to_string(),
                        context_window: 0,
                        max_output_tokens: 0,
                        description: String::new(),
                        input_modalities: vec![crate::catalog::InputModality::Text],
                    });
                }
            }
        }
        if entries.is_empty() {
            return Ok(catalog_entries);
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages: Vec<Value> = if let Some(suffix) = &req.system_dynamic_suffix {
            let mut msgs = req.messages.clone();
            if let Some(sys) = msgs.first_mut() {
                if sys.role == crate::Role::System {
                    use crate::MessageContent;
                    if let MessageContent::Text(t) = &sys.content {
                        sys.content = MessageContent::Text(format!("{t}\n\n{suffix}"));
                    }
                }
            }
            build_openai_messages(&msgs)
        } else {
            build_openai_messages(&req.messages)
        };

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        // OpenAI's newer reasoning-capable models (o1, o3, gpt-5) use
        // "max_completion_tokens" instead of "max_tokens".
        let max_tokens_key = if self.driver_name == "openai" { "max_completion_tokens" } else { "max_tokens" };

        // gpt-5 only supports the default temperature (1); o1/o3 don't accept
        // the parameter at all.
        let use_temperature = if self.driver_name == "openai" {
            !(self.model.starts_with("o1-") || self.model.starts_with("o3-") || self.model.starts_with("gpt-5"))
        } else {
            true
        };

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": req.stream,
            max_tokens_key: self.max_tokens,
            "stream_options": { "include_usage": true },
        });
        if use_temperature {
            body["temperature"] = json!(self.temperature);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if self.driver_name == "openrouter" {
            if let Some(key) = &req.cache_key {
                body["prompt_cache_key"] = json!(key);
            }
        }

        // Provider-specific overrides merge in last so callers can fine-tune
        // behavior (e.g. `reasoning_format`) without code changes.
        if let Some(map) = self.extra_body.as_object() {
            for (k, v) in map {
                body[k] = v.clone();
            }
        }

        debug!(
            driver = %self.driver_name,
            model = %self.model,
            tool_count = tools.len(),
            message_count = messages.len(),
            "sending completion request"
        );
        tracing::trace!(request_body = ?body, "full completion request");

        let http_req = self.apply_auth(self.client.post(&self.chat_url).json(&body))?;
        let resp = http_req.send().with_context(|| format!("{} request failed", self.driver_name))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            bail!("{} error {status}: {text}", self.driver_name);
        }

        let raw = SseEventIter::new(resp);
        let pipeline = ThinkingPipeline::new(raw, req.reasoning);
        Ok(Box::new(pipeline))
    }
}

/// Reads the raw SSE byte stream off a blocking HTTP response and turns it
/// into one [`ResponseEvent`] per complete `data:` line, buffering across
/// chunk boundaries.
struct SseEventIter {
    resp: reqwest::blocking::Response,
    buf: String,
    pending: VecDeque<anyhow::Result<ResponseEvent>>,
    read_buf: [u8; 8192],
    done: bool,
}

impl SseEventIter {
    fn new(resp: reqwest::blocking::Response) -> Self {
        Self { resp, buf: String::new(), pending: VecDeque::new(), read_buf: [0; 8192], done: false }
    }
}

impl Iterator for SseEventIter {
    type Item = anyhow::Result<ResponseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Some(ev);
            }
            if self.done {
                return None;
            }
            match self.resp.read(&mut self.read_buf) {
                Ok(0) => {
                    self.done = true;
                    // A final unterminated line (no trailing "\n") is
                    // extremely unusual for SSE but handled defensively.
                    if !self.buf.trim().is_empty() {
                        if let Some(ev) = parse_sse_data_line(self.buf.trim_end()) {
                            return Some(ev);
                        }
                    }
                    return None;
                }
                Ok(n) => {
                    self.buf.push_str(&String::from_utf8_lossy(&self.read_buf[..n]));
                    for ev in drain_complete_sse_lines(&mut self.buf) {
                        self.pending.push_back(ev);
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(anyhow::anyhow!(e)));
                }
            }
        }
    }
}

/// Wraps a raw event iterator with thinking-format auto-detection, XML-tag
/// extraction, and the per-request reasoning token budget. All non-thinking
/// events pass through unchanged.
struct ThinkingPipeline<I> {
    inner: I,
    detector: FormatDetector,
    budget: Option<ThinkingBudget>,
    scanner: XmlThinkingScanner,
    queue: VecDeque<anyhow::Result<ResponseEvent>>,
}

impl<I> ThinkingPipeline<I> {
    fn new(inner: I, reasoning: Option<crate::ReasoningLevel>) -> Self {
        Self {
            inner,
            detector: FormatDetector::new(),
            budget: reasoning.map(ThinkingBudget::new),
            scanner: XmlThinkingScanner::new(),
            queue: VecDeque::new(),
        }
    }

    fn admit(&mut self, content: &str) -> bool {
        match &mut self.budget {
            Some(b) => b.admit(content),
            None => true,
        }
    }

    fn handle_text_delta(&mut self, text: String) {
        // Once locked to the JSON reasoning field, plain content deltas are
        // never reinterpreted as XML thinking tags.
        if self.detector.detected() == Some(ThinkingFormat::OpenAiJson) {
            self.queue.push_back(Ok(ResponseEvent::TextDelta(text)));
            return;
        }
        for seg in self.scanner.feed(&text) {
            match seg {
                Segment::Text(t) => {
                    if !t.is_empty() {
                        self.queue.push_back(Ok(ResponseEvent::TextDelta(t)));
                    }
                }
                Segment::Thinking { content, is_redacted, .. } => {
                    self.detector.lock(ThinkingFormat::AnthropicXml);
                    if self.admit(&content) {
                        self.queue.push_back(Ok(ResponseEvent::ThinkingDelta {
                            format: ThinkingFormat::AnthropicXml,
                            content,
                            is_encrypted: is_redacted,
                        }));
                    }
                }
            }
        }
    }

    fn handle_raw_thinking(&mut self, content: String, is_encrypted: bool) {
        self.detector.lock(ThinkingFormat::OpenAiJson);
        if self.admit(&content) {
            self.queue.push_back(Ok(ResponseEvent::ThinkingDelta {
                format: ThinkingFormat::OpenAiJson,
                content,
                is_encrypted,
            }));
        }
    }
}

impl<I: Iterator<Item = anyhow::Result<ResponseEvent>>> Iterator for ThinkingPipeline<I> {
    type Item = anyhow::Result<ResponseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ev) = self.queue.pop_front() {
                return Some(ev);
            }
            match self.inner.next()? {
                Ok(ResponseEvent::TextDelta(text)) => self.handle_text_delta(text),
                Ok(ResponseEvent::ThinkingDelta { format: ThinkingFormat::OpenAiJson, content, is_encrypted }) => {
                    self.handle_raw_thinking(content, is_encrypted)
                }
                other => return Some(other),
            }
        }
    }
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
/// Returns `None` for blank lines, comments, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(parse_sse_chunk(&v))
}

/// Drain all complete `\n`-terminated SSE lines from `buf`, leaving any
/// trailing partial line for the next read to extend.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn parse_sse_chunk(v: &Value) -> anyhow::Result<ResponseEvent> {
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let cache_read_tokens = usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|t| t.as_u64())
            .or_else(|| usage.get("prompt_cache_hit_tokens").and_then(|t| t.as_u64()))
            .unwrap_or(0) as u32;
        let reasoning_tokens = usage
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as u32;
        return Ok(ResponseEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            reasoning_tokens,
            cache_read_tokens,
            cache_write_tokens: 0,
        });
    }

    // llama.cpp performance metrics arrive as a top-level `timings` object on
    // the final chunk; fold them into a Usage event.
    if let Some(timings) = v.get("timings") {
        let cache_n = timings["cache_n"].as_u64().unwrap_or(0) as u32;
        let prompt_n = timings["prompt_n"].as_u64().unwrap_or(0) as u32;
        let predicted_n = timings["predicted_n"].as_u64().unwrap_or(0) as u32;
        return Ok(ResponseEvent::Usage {
            input_tokens: cache_n + prompt_n,
            output_tokens: predicted_n,
            reasoning_tokens: 0,
            cache_read_tokens: cache_n,
            cache_write_tokens: 0,
        });
    }

    let choice = &v["choices"][0];

    if choice["finish_reason"].as_str() == Some("length") {
        return Ok(ResponseEvent::MaxTokens);
    }

    let delta = &choice["delta"];

    if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        if let Some(tc) = tool_calls.first() {
            let index = tc["index"].as_u64().unwrap_or(0) as usize;
            let id = tc["id"].as_str().unwrap_or("").to_string();
            let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
            let args = tc["function"]["arguments"].as_str().unwrap_or("").to_string();
            return Ok(ResponseEvent::ToolCall { index, id, name, arguments: args });
        }
    }

    // `reasoning_content` (llama.cpp, Qwen3, DeepSeek-R1, Grok) and
    // `reasoning` (OpenRouter) carry the same chain-of-thought semantics;
    // `encrypted_reasoning` marks content the provider refuses to echo back
    // in plaintext (Anthropic-style redacted thinking over an OpenAI-shaped
    // wire format, as some gateways expose it).
    if let Some(encrypted) = delta.get("encrypted_reasoning").and_then(|c| c.as_str()) {
        if !encrypted.is_empty() {
            return Ok(ResponseEvent::ThinkingDelta {
                format: ThinkingFormat::OpenAiJson,
                content: encrypted.to_string(),
                is_encrypted: true,
            });
        }
    }
    let thinking_text =
        delta.get("reasoning_content").and_then(|c| c.as_str()).or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(thinking) = thinking_text {
        if !thinking.is_empty() {
            return Ok(ResponseEvent::ThinkingDelta {
                format: ThinkingFormat::OpenAiJson,
                content: thinking.to_string(),
                is_encrypted: false,
            });
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return Ok(ResponseEvent::TextDelta(text.to_string()));
    }

    Ok(ResponseEvent::TextDelta(String::new()))
}

/// Convert internal [`Message`](crate::Message)s into the OpenAI wire-format
/// JSON array, coalescing consecutive `ToolCall` entries (stored separately
/// internally) into a single assistant message's `tool_calls` array, as the
/// API requires for parallel tool calls from one turn.
pub(crate) fn build_openai_messages(messages: &[crate::Message]) -> Vec<Value> {
    use crate::{ContentPart, MessageContent, ToolContentPart, ToolResultContent};

    fn tool_call_to_json(tool_call_id: &str, function: &crate::FunctionCall) -> Value {
        json!({
            "id": tool_call_id,
            "type": "function",
            "function": { "name": function.name, "arguments": function.arguments }
        })
    }

    fn tool_result_to_json(tool_call_id: &str, content: &ToolResultContent) -> Value {
        let wire_content: Value = match content {
            ToolResultContent::Text(t) => json!(t),
            ToolResultContent::Parts(parts) if !parts.is_empty() => {
                let arr: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ToolContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ToolContentPart::Image { image_url } => {
                            json!({ "type": "image_url", "image_url": { "url": image_url } })
                        }
                    })
                    .collect();
                json!(arr)
            }
            ToolResultContent::Parts(_) => json!(""),
        };
        json!({ "role": "tool", "tool_call_id": tool_call_id, "content": wire_content })
    }

    let mut result: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;
    while i < messages.len() {
        let m = &messages[i];

        if let MessageContent::ToolCall { tool_call_id, function } = &m.content {
            let mut calls = vec![tool_call_to_json(tool_call_id, function)];
            i += 1;
            while i < messages.len() {
                if let MessageContent::ToolCall { tool_call_id, function } = &messages[i].content {
                    calls.push(tool_call_to_json(tool_call_id, function));
                    i += 1;
                } else {
                    break;
                }
            }
            result.push(json!({ "role": "assistant", "tool_calls": calls }));
            continue;
        }

        let v = match &m.content {
            MessageContent::Text(t) => json!({ "role": role_str(&m.role), "content": t }),
            MessageContent::ContentParts(parts) if !parts.is_empty() => {
                let content: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::Image { image_url, detail } => {
                            let mut img_obj = json!({ "url": image_url });
                            if let Some(d) = detail {
                                img_obj["detail"] = json!(d);
                            }
                            json!({ "type": "image_url", "image_url": img_obj })
                        }
                    })
                    .collect();
                json!({ "role": role_str(&m.role), "content": content })
            }
            MessageContent::ContentParts(_) => json!({ "role": role_str(&m.role), "content": "" }),
            MessageContent::ToolCall { .. } => unreachable!("handled above"),
            MessageContent::ToolResult { tool_call_id, content } => tool_result_to_json(tool_call_id, content),
        };
        result.push(v);
        i += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelProvider;

    fn make_provider() -> OpenAICompatProvider {
        OpenAICompatProvider::new(
            "test-compat",
            "test-model".into(),
            None,
            "http://localhost:9999/v1",
            Some(1024),
            Some(0.0),
            vec![],
            AuthStyle::None,
            serde_json::Value::Null,
        )
    }

    #[test]
    fn name_returns_driver_name() {
        assert_eq!(make_provider().name(), "test-compat");
    }

    #[test]
    fn model_name_returns_model() {
        assert_eq!(make_provider().model_name(), "test-model");
    }

    #[test]
    fn chat_url_appends_suffix_and_strips_trailing_slash() {
        let p = OpenAICompatProvider::new(
            "x",
            "m".into(),
            None,
            "http://localhost/v1/",
            None,
            None,
            vec![],
            AuthStyle::None,
            serde_json::Value::Null,
        );
        assert_eq!(p.chat_url, "http://localhost/v1/chat/completions");
    }

    #[test]
    fn with_full_chat_url_does_not_append_suffix() {
        let p = OpenAICompatProvider::with_full_chat_url(
            "azure",
            "m".into(),
            None,
            "https://res.openai.azure.com/openai/deployments/d/chat/completions?api-version=2024-01-01",
            None,
            None,
            vec![],
            AuthStyle::ApiKeyHeader,
            serde_json::Value::Null,
        );
        assert!(p.chat_url.ends_with("api-version=2024-01-01"));
        assert!(p.models_url.is_none());
    }

    #[test]
    fn parse_usage_chunk() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"prompt_tokens_details":{"cached_tokens":3}}}"#,
        )
        .unwrap();
        match parse_sse_chunk(&v).unwrap() {
            ResponseEvent::Usage { input_tokens, output_tokens, cache_read_tokens, .. } => {
                assert_eq!(input_tokens, 10);
                assert_eq!(output_tokens, 5);
                assert_eq!(cache_read_tokens, 3);
            }
            other => panic!("expected Usage, got {other:?}"),
        }
    }

    #[test]
    fn parse_content_delta() {
        let v: Value = serde_json::from_str(r#"{"choices":[{"delta":{"content":"hi"}}]}"#).unwrap();
        match parse_sse_chunk(&v).unwrap() {
            ResponseEvent::TextDelta(t) => assert_eq!(t, "hi"),
            other => panic!("expected TextDelta, got {other:?}"),
        }
    }

    #[test]
    fn parse_reasoning_content_delta() {
        let v: Value = serde_json::from_str(r#"{"choices":[{"delta":{"reasoning_content":"thinking..."}}]}"#).unwrap();
        match parse_sse_chunk(&v).unwrap() {
            ResponseEvent::ThinkingDelta { format, content, is_encrypted } => {
                assert_eq!(format, ThinkingFormat::OpenAiJson);
                assert_eq!(content, "thinking...");
                assert!(!is_encrypted);
            }
            other => panic!("expected ThinkingDelta, got {other:?}"),
        }
    }

    #[test]
    fn parse_tool_call_delta_carries_index() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_1","function":{"name":"read","arguments":"{}"}}]}}]}"#,
        )
        .unwrap();
        match parse_sse_chunk(&v).unwrap() {
            ResponseEvent::ToolCall { index, id, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(id, "call_1");
                assert_eq!(name, "read");
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
    }

    #[test]
    fn parse_length_finish_reason_emits_max_tokens() {
        let v: Value = serde_json::from_str(r#"{"choices":[{"finish_reason":"length","delta":{}}]}"#).unwrap();
        assert!(matches!(parse_sse_chunk(&v).unwrap(), ResponseEvent::MaxTokens));
    }

    #[test]
    fn drain_complete_sse_lines_buffers_partial_line_across_chunks() {
        let mut buf = String::from("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: {\"choi");
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert!(buf.starts_with("data: {\"choi"));
    }

    #[test]
    fn drain_complete_sse_lines_recognises_done_sentinel() {
        let mut buf = String::from("data: [DONE]\n");
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].as_ref().unwrap(), ResponseEvent::Done));
    }

    #[test]
    fn build_messages_coalesces_parallel_tool_calls() {
        use crate::Message;
        let messages = vec![
            Message::user("do two things"),
            Message::tool_call("call_1", "read", "{}"),
            Message::tool_call("call_2", "list", "{}"),
            Message::tool_result("call_1", "file contents"),
        ];
        let wire = build_openai_messages(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["tool_calls"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn extra_body_keys_are_merged_into_request_body() {
        let mut body = json!({ "model": "m", "temperature": 0.2 });
        let extra = json!({ "reasoning_format": "deepseek", "temperature": 0.9 });
        if let Some(map) = extra.as_object() {
            for (k, v) in map {
                body[k] = v.clone();
            }
        }
        assert_eq!(body["reasoning_format"], "deepseek");
        assert_eq!(body["temperature"], 0.9);
    }

    #[test]
    fn thinking_pipeline_extracts_xml_tags_from_text_deltas() {
        let raw: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta("<thinking>step one</thinking>".into())),
            Ok(ResponseEvent::TextDelta("the answer is 4".into())),
            Ok(ResponseEvent::Done),
        ];
        let pipeline = ThinkingPipeline::new(raw.into_iter(), None);
        let events: Vec<_> = pipeline.map(|e| e.unwrap()).collect();
        assert!(matches!(&events[0], ResponseEvent::ThinkingDelta { format: ThinkingFormat::AnthropicXml, content, .. } if content == "step one"));
        assert!(matches!(&events[1], ResponseEvent::TextDelta(t) if t == "the answer is 4"));
        assert!(matches!(&events[2], ResponseEvent::Done));
    }

    #[test]
    fn thinking_pipeline_drops_thinking_once_budget_exhausted() {
        let big = "x".repeat(9000); // ~2250 tokens, exceeds ReasoningLevel::Low's 2048
        let raw: Vec<anyhow::Result<ResponseEvent>> = vec![Ok(ResponseEvent::ThinkingDelta {
            format: ThinkingFormat::OpenAiJson,
            content: big,
            is_encrypted: false,
        })];
        let pipeline = ThinkingPipeline::new(raw.into_iter(), Some(crate::ReasoningLevel::Low));
        let events: Vec<_> = pipeline.map(|e| e.unwrap()).collect();
        assert!(events.is_empty(), "thinking delta exceeding the budget should be dropped, not forwarded");
    }
}
