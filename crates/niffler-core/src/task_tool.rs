// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `task` tool: spawns a depth-bounded, ephemeral sub-conversation with
//! its own tool registry (minus `task` itself) and returns the sub-agent's
//! final text. Lives in `niffler-core` rather than `niffler-tools` since it
//! needs to drive a model provider directly, which would otherwise create a
//! circular crate dependency.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use niffler_config::AgentMode;
use niffler_model::{CompletionRequest, Message, ModelProvider, ResponseEvent};
use niffler_tools::{register_builtins, ApprovalPolicy, Tool, ToolCall, ToolOutput, ToolRegistry};
use tracing::debug;

const MAX_DEPTH: usize = 3;
const DEFAULT_MAX_ROUNDS: u32 = 20;

pub struct TaskTool {
    model: Arc<dyn ModelProvider>,
    depth: Arc<AtomicUsize>,
}

impl TaskTool {
    pub fn new(model: Arc<dyn ModelProvider>, depth: Arc<AtomicUsize>) -> Self {
        Self { model, depth }
    }

    fn build_sub_registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        let (todo_tx, _todo_rx) = std::sync::mpsc::channel();
        register_builtins(&mut registry, todo_tx);
        registry
    }
}

impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text output. \
         Useful for delegating isolated sub-tasks. The sub-agent has access to all standard \
         tools except `task` itself. Maximum nesting depth is 3."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "The task description for the sub-agent." },
                "mode": { "type": "string", "enum": ["plan", "code"], "description": "Operating mode for the sub-agent (default: code)." },
                "max_rounds": { "type": "integer", "description": "Maximum tool-call rounds (default: 20)." }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(prompt) = call.args.get("prompt").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'prompt' argument");
        };
        let mode = match call.args.get("mode").and_then(|v| v.as_str()) {
            None => AgentMode::Code,
            Some("plan") => AgentMode::Plan,
            Some("code") => AgentMode::Code,
            Some(other) => return ToolOutput::err(&call.id, format!("unknown mode: {other}")),
        };
        let max_rounds = call.args.get("max_rounds").and_then(|v| v.as_u64()).map(|n| n as u32).unwrap_or(DEFAULT_MAX_ROUNDS);

        let depth = self.depth.load(Ordering::SeqCst);
        if depth >= MAX_DEPTH {
            return ToolOutput::err(&call.id, format!("maximum sub-agent depth ({MAX_DEPTH}) reached"));
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        debug!(prompt, mode = %mode, depth = depth + 1, "task: spawning sub-agent");

        let result = run_sub_conversation(self.model.as_ref(), &self.build_sub_registry(), prompt, mode, max_rounds);

        self.depth.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(text) if text.is_empty() => ToolOutput::ok(&call.id, "(sub-agent produced no text output)"),
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}

fn to_model_schemas(tools: &ToolRegistry) -> Vec<niffler_model::ToolSchema> {
    tools.schemas().into_iter().map(|s| niffler_model::ToolSchema { name: s.name, description: s.description, parameters: s.parameters }).collect()
}

/// Drives a self-contained agentic loop synchronously: no channels, no
/// worker threads, no persistence. Tool calls are dispatched directly
/// against the sub-registry. Returns the concatenation of all assistant
/// text produced across rounds.
fn run_sub_conversation(model: &dyn ModelProvider, tools: &ToolRegistry, prompt: &str, mode: AgentMode, max_rounds: u32) -> anyhow::Result<String> {
    let mut messages = vec![Message::system(crate::prompts::system_prompt(mode, None, &std::env::current_dir()?, &tools.names())), Message::user(prompt)];
    let mut output = String::new();

    for _ in 0..max_rounds {
        let req = CompletionRequest {
            messages: messages.clone(),
            tools: to_model_schemas(tools),
            stream: true,
            reasoning: None,
            system_dynamic_suffix: None,
            cache_key: None,
        };

        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for event in model.complete(req)? {
            match event? {
                ResponseEvent::TextDelta(delta) => text.push_str(&delta),
                ResponseEvent::ToolCall { name, arguments, id, .. } => {
                    if !name.is_empty() {
                        let args = serde_json::from_str(&arguments).unwrap_or(serde_json::Value::Null);
                        tool_calls.push(ToolCall { id, name, args });
                    }
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => return Err(anyhow::anyhow!(e)),
                _ => {}
            }
        }

        if !text.is_empty() {
            output.push_str(&text);
            messages.push(Message::assistant(&text));
        }

        if tool_calls.is_empty() {
            break;
        }

        for tc in &tool_calls {
            messages.push(Message::tool_call(&tc.id, &tc.name, tc.args.to_string()));
        }
        for tc in &tool_calls {
            let result = tools.execute(tc);
            messages.push(Message::tool_result(&tc.id, result.content));
        }
    }

    Ok(output)
}
