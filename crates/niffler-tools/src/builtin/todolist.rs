// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::events::{TodoItem, ToolEvent};
use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Built-in tool that replaces the conversation's whole todo list on each
/// call and emits a [`ToolEvent::TodoUpdate`] so the UI can render it live.
/// At most one item may be `in_progress` at a time.
pub struct TodoListTool {
    items: Mutex<Vec<TodoItem>>,
    events: Sender<ToolEvent>,
}

impl TodoListTool {
    pub fn new(events: Sender<ToolEvent>) -> Self {
        Self { items: Mutex::new(Vec::new()), events }
    }
}

impl Tool for TodoListTool {
    fn name(&self) -> &str {
        "todolist"
    }

    fn description(&self) -> &str {
        "Replace the current todo list with the given items. At most one item \
         may have status 'in_progress'. Pass an empty list to clear it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed", "cancelled"] }
                        },
                        "required": ["id", "content", "status"]
                    }
                }
            },
            "required": ["items"],
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
        let Some(raw_items) = call.args.get("items").and_then(|v| v.as_array()) else {
            return ToolOutput::err(&call.id, "missing 'items' argument");
        };

        let mut parsed: Vec<TodoItem> = Vec::with_capacity(raw_items.len());
        for item in raw_items {
            let id = match item.get("id").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, "todo item missing 'id'"),
            };
            let content = match item.get("content").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, "todo item missing 'content'"),
            };
            let status = match item.get("status").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, "todo item missing 'status'"),
            };
            parsed.push(TodoItem { id, content, status });
        }

        let in_progress_count = parsed.iter().filter(|i| i.status == "in_progress").count();
        if in_progress_count > 1 {
            return ToolOutput::err(&call.id, "at most one todo item may be 'in_progress'");
        }

        *self.items.lock().expect("todo list mutex poisoned") = parsed.clone();
        let _ = self.events.send(ToolEvent::TodoUpdate(parsed.clone()));

        if parsed.is_empty() {
            ToolOutput::ok(&call.id, "Todo list cleared.")
        } else {
            ToolOutput::ok(&call.id, format_todos(&parsed))
        }
    }
}

fn format_todos(items: &[TodoItem]) -> String {
    items
        .iter()
        .map(|item| {
            let icon = match item.status.as_str() {
                "completed" => "[x]",
                "in_progress" => "[~]",
                "cancelled" => "[-]",
                _ => "[ ]",
            };
            format!("{icon} {}", item.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn tool() -> (TodoListTool, mpsc::Receiver<ToolEvent>) {
        let (tx, rx) = mpsc::channel();
        (TodoListTool::new(tx), rx)
    }

    fn call(items: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "todolist".into(), args: json!({"items": items}) }
    }

    #[test]
    fn replaces_list_and_emits_event() {
        let (tool, rx) = tool();
        let out = tool.execute(&call(json!([{"id": "1", "content": "do thing", "status": "pending"}])));
        assert!(!out.is_error);
        assert!(out.content.contains("do thing"));
        match rx.try_recv().unwrap() {
            ToolEvent::TodoUpdate(items) => assert_eq!(items.len(), 1),
        }
    }

    #[test]
    fn empty_list_reports_cleared() {
        let (tool, _rx) = tool();
        let out = tool.execute(&call(json!([])));
        assert_eq!(out.content, "Todo list cleared.");
    }

    #[test]
    fn rejects_multiple_in_progress_items() {
        let (tool, _rx) = tool();
        let out = tool.execute(&call(json!([
            {"id": "1", "content": "a", "status": "in_progress"},
            {"id": "2", "content": "b", "status": "in_progress"}
        ])));
        assert!(out.is_error);
    }

    #[test]
    fn missing_items_argument_is_error() {
        let (tool, _rx) = tool();
        let out = tool.execute(&ToolCall { id: "1".into(), name: "todolist".into(), args: json!({}) });
        assert!(out.is_error);
    }

    #[test]
    fn item_missing_status_is_error() {
        let (tool, _rx) = tool();
        let out = tool.execute(&call(json!([{"id": "1", "content": "x"}])));
        assert!(out.is_error);
    }

    #[test]
    fn format_uses_status_icons() {
        let items = vec![
            TodoItem { id: "1".into(), content: "a".into(), status: "completed".into() },
            TodoItem { id: "2".into(), content: "b".into(), status: "in_progress".into() },
        ];
        let out = format_todos(&items);
        assert!(out.contains("[x] a"));
        assert!(out.contains("[~] b"));
    }
}
