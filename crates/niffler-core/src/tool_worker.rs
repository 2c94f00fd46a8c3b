// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The tool worker thread: dispatches [`ToolRequest`]s through
//! [`ToolRegistry`], enforcing a per-call timeout, path sanitization
//! against the configured workspace root, output truncation, and the
//! Plan-mode edit gate.
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use niffler_channels::{QueueReceiver, QueueSender, Shutdown};
use niffler_config::{AgentMode, ToolsConfig};
use niffler_persistence::Store;
use niffler_tools::{ApprovalPolicy, ToolCall, ToolOutput, ToolPolicy, ToolRegistry};
use tracing::debug;

use crate::messages::{RequestId, ToolRequest, ToolResponse};
use crate::mode;

/// Names of tools whose `path` argument is checked against the workspace
/// root before dispatch. Every other tool is forwarded unchanged.
const PATH_ARG_TOOLS: &[&str] = &["read", "list", "edit", "create"];

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

pub fn run(rx: QueueReceiver<ToolRequest>, tx: QueueSender<ToolResponse>, registry: Arc<ToolRegistry>, store: Arc<Store>, config: ToolsConfig, shutdown: Shutdown) {
    let workspace_root = config.workspace_root.as_deref().map(PathBuf::from);
    let policy = ToolPolicy::new(&config.auto_approve_patterns, &config.deny_patterns);
    while let Some(request) = rx.receive(RECEIVE_TIMEOUT, &shutdown) {
        let response = dispatch(&request, &registry, &store, &policy, workspace_root.as_deref(), config.timeout_secs, config.output_byte_cap);
        tx.try_send(response);
    }
}

fn dispatch(
    request: &ToolRequest,
    registry: &Arc<ToolRegistry>,
    store: &Arc<Store>,
    policy: &ToolPolicy,
    workspace_root: Option<&Path>,
    timeout_secs: u64,
    output_byte_cap: usize,
) -> ToolResponse {
    let ToolRequest { request_id, call, conversation_id, mode, .. } = request;

    if call.name == "bash" {
        if let Some(command) = call.args.get("command").and_then(|v| v.as_str()) {
            if policy.decide(command) == ApprovalPolicy::Deny {
                return error_response(*request_id, &call.id, format!("command denied by policy: {command}"));
            }
        }
    }

    if PATH_ARG_TOOLS.contains(&call.name.as_str()) {
        if let Some(violation) = check_path_sanitization(call, workspace_root) {
            return error_response(*request_id, &call.id, violation);
        }
    }

    if call.name == "edit" {
        if let Some(violation) = check_plan_gate(call, store, *conversation_id, *mode, workspace_root) {
            return error_response(*request_id, &call.id, violation);
        }
    }

    let started = Instant::now();
    let output = match run_with_timeout(registry.clone(), call.clone(), Duration::from_secs(timeout_secs)) {
        Some(output) => output,
        None => {
            debug!(tool = %call.name, call_id = %call.id, timeout_secs, "tool call timed out");
            return error_response(*request_id, &call.id, format!("tool '{}' timed out after {timeout_secs}s", call.name));
        }
    };
    debug!(tool = %call.name, call_id = %call.id, duration_ms = started.elapsed().as_millis(), "tool dispatched");

    if call.name == "create" && !output.is_error {
        record_plan_creation(call, store, *conversation_id, *mode, workspace_root);
    }

    ToolResponse::Result(*request_id, truncate_output(output, output_byte_cap))
}

/// Runs the tool on a short-lived thread and waits up to `timeout` for its
/// result via a completion channel. An overrun thread is deliberately not
/// joined — it is left to finish (or be killed with the process) in the
/// background, since there is no safe way to force-cancel arbitrary tool
/// code from the outside.
fn run_with_timeout(registry: Arc<ToolRegistry>, call: ToolCall, timeout: Duration) -> Option<ToolOutput> {
    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let output = registry.execute(&call);
        let _ = done_tx.send(output);
    });
    done_rx.recv_timeout(timeout).ok()
}

fn truncate_output(mut output: ToolOutput, byte_cap: usize) -> ToolOutput {
    if output.content.len() > byte_cap {
        let boundary = floor_char_boundary(&output.content, byte_cap);
        output.content.truncate(boundary);
        output.content.push_str("\n…[truncated]");
    }
    output
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut idx = index.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn error_response(request_id: RequestId, call_id: &str, message: String) -> ToolResponse {
    ToolResponse::Result(request_id, ToolOutput::err(call_id, message))
}

/// Rejects `..` components and paths that canonicalize outside the
/// workspace root. A target that does not yet exist (e.g. `create`'s new
/// file) is checked against its parent directory instead.
fn check_path_sanitization(call: &ToolCall, workspace_root: Option<&Path>) -> Option<String> {
    let Some(root) = workspace_root else { return None };
    let Some(raw_path) = call.args.get("path").and_then(|v| v.as_str()) else {
        return None;
    };
    let path = Path::new(raw_path);
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Some(format!("path '{raw_path}' may not contain '..'"));
    }

    let check_target: PathBuf = if path.exists() { path.to_path_buf() } else { path.parent().unwrap_or(path).to_path_buf() };
    let canonical_root = std::fs::canonicalize(root).ok()?;
    let canonical_target = std::fs::canonicalize(&check_target).unwrap_or(check_target);
    if canonical_target.starts_with(&canonical_root) {
        None
    } else {
        Some(format!("path '{raw_path}' is outside the workspace root"))
    }
}

fn gate_key(call: &ToolCall, workspace_root: Option<&Path>) -> Option<String> {
    let raw_path = call.args.get("path").and_then(|v| v.as_str())?;
    Some(mode::normalize_for_gate(workspace_root, Path::new(raw_path)))
}

fn check_plan_gate(call: &ToolCall, store: &Arc<Store>, conversation_id: i64, agent_mode: AgentMode, workspace_root: Option<&Path>) -> Option<String> {
    let key = gate_key(call, workspace_root)?;
    let exists = call.args.get("path").and_then(|v| v.as_str()).map(|p| Path::new(p).exists()).unwrap_or(false);
    match mode::check_edit_allowed(store, conversation_id, agent_mode, &key, exists) {
        Ok(()) => None,
        Err(e) => Some(e.to_string()),
    }
}

fn record_plan_creation(call: &ToolCall, store: &Arc<Store>, conversation_id: i64, agent_mode: AgentMode, workspace_root: Option<&Path>) {
    let Some(key) = gate_key(call, workspace_root) else { return };
    let now = chrono::Utc::now().timestamp();
    if let Err(e) = mode::record_created_file(store, conversation_id, agent_mode, &key, now) {
        tracing::warn!(error = %e, "failed to record created file for plan-mode gate");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use niffler_persistence::Mode as PersistMode;
    use serde_json::json;

    fn new_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        let (tx, _rx) = std::sync::mpsc::channel();
        niffler_tools::register_builtins(&mut registry, tx);
        Arc::new(registry)
    }

    fn new_store() -> (Arc<Store>, i64) {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation("x", PersistMode::Code, "gpt-4o", 1).unwrap();
        (Arc::new(store), conv.id)
    }

    fn default_policy() -> ToolPolicy {
        ToolPolicy::new(&[], &[])
    }

    fn request(id: &str, name: &str, args: serde_json::Value, conversation_id: i64, mode: AgentMode) -> ToolRequest {
        ToolRequest { request_id: 1, call: ToolCall { id: id.into(), name: name.into(), args }, require_confirmation: false, conversation_id, mode }
    }

    #[test]
    fn unsanitized_path_outside_workspace_is_rejected() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let dir = tempfile::tempdir().unwrap();
        let req = request("1", "read", json!({"path": "/etc/passwd"}), conv_id, AgentMode::Code);
        let resp = dispatch(&req, &registry, &store, &default_policy(), Some(dir.path()), 5, 4000);
        match resp {
            ToolResponse::Result(_, out) => assert!(out.is_error && out.content.contains("outside the workspace root")),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn dotdot_path_is_rejected() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let dir = tempfile::tempdir().unwrap();
        let req = request("1", "read", json!({"path": "../secret"}), conv_id, AgentMode::Code);
        let resp = dispatch(&req, &registry, &store, &default_policy(), Some(dir.path()), 5, 4000);
        match resp {
            ToolResponse::Result(_, out) => assert!(out.is_error && out.content.contains("'..'")),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn path_inside_workspace_root_passes_sanitization() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, "hi").unwrap();
        let req = request("1", "read", json!({"path": file.to_str().unwrap()}), conv_id, AgentMode::Code);
        let resp = dispatch(&req, &registry, &store, &default_policy(), Some(dir.path()), 5, 4000);
        match resp {
            ToolResponse::Result(_, out) => assert!(!out.is_error),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn edit_preexisting_file_in_plan_mode_is_blocked() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("existing.txt");
        std::fs::write(&file, "one\ntwo\n").unwrap();
        let req = request(
            "1",
            "edit",
            json!({"path": file.to_str().unwrap(), "operation": "rewrite", "content": "new"}),
            conv_id,
            AgentMode::Plan,
        );
        let resp = dispatch(&req, &registry, &store, &default_policy(), Some(dir.path()), 5, 4000);
        match resp {
            ToolResponse::Result(_, out) => assert!(out.is_error),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn create_then_edit_in_plan_mode_is_allowed() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("fresh.txt");

        let create_req = request("1", "create", json!({"path": file.to_str().unwrap(), "content": "hi\n"}), conv_id, AgentMode::Plan);
        let create_resp = dispatch(&create_req, &registry, &store, &default_policy(), Some(dir.path()), 5, 4000);
        match create_resp {
            ToolResponse::Result(_, out) => assert!(!out.is_error, "create should succeed: {}", out.content),
            other => panic!("unexpected response: {other:?}"),
        }

        let edit_req = request(
            "2",
            "edit",
            json!({"path": file.to_str().unwrap(), "operation": "rewrite", "content": "bye\n"}),
            conv_id,
            AgentMode::Plan,
        );
        let edit_resp = dispatch(&edit_req, &registry, &store, &default_policy(), Some(dir.path()), 5, 4000);
        match edit_resp {
            ToolResponse::Result(_, out) => assert!(!out.is_error, "edit after create should be allowed: {}", out.content),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn output_longer_than_cap_is_truncated() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.txt");
        std::fs::write(&file, "x".repeat(10_000)).unwrap();
        let req = request("1", "read", json!({"path": file.to_str().unwrap()}), conv_id, AgentMode::Code);
        let resp = dispatch(&req, &registry, &store, &default_policy(), Some(dir.path()), 5, 100);
        match resp {
            ToolResponse::Result(_, out) => {
                assert!(out.content.len() <= 100 + "\n…[truncated]".len());
                assert!(out.content.contains("truncated"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_name_passes_through_sanitization() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let req = request("1", "nonexistent_tool", json!({}), conv_id, AgentMode::Code);
        let resp = dispatch(&req, &registry, &store, &default_policy(), None, 5, 4000);
        match resp {
            ToolResponse::Result(_, out) => assert!(out.is_error && out.content.contains("unknown tool")),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn bash_command_matching_deny_pattern_is_rejected_without_dispatch() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let policy = ToolPolicy::new(&[], &["rm -rf /*".to_string()]);
        let req = request("1", "bash", json!({"command": "rm -rf /"}), conv_id, AgentMode::Code);
        let resp = dispatch(&req, &registry, &store, &policy, None, 5, 4000);
        match resp {
            ToolResponse::Result(_, out) => {
                assert!(out.is_error);
                assert!(out.content.contains("denied by policy"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn bash_command_not_matching_deny_pattern_is_dispatched() {
        let registry = new_registry();
        let (store, conv_id) = new_store();
        let policy = ToolPolicy::new(&[], &["rm -rf /*".to_string()]);
        let req = request("1", "bash", json!({"command": "echo hi"}), conv_id, AgentMode::Code);
        let resp = dispatch(&req, &registry, &store, &policy, None, 5, 4000);
        match resp {
            ToolResponse::Result(_, out) => assert!(!out.content.contains("denied by policy")),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
