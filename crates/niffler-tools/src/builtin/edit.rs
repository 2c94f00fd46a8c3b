// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Built-in tool that edits an existing file via one of six fixed
/// operations. The Plan-mode protection gate (which path an `edit` may
/// target) is enforced by the tool worker before this executes, not here.
#[derive(Default)]
pub struct EditTool;

impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit an existing file. operation=replace substitutes the first \
         occurrence of old_text with new_text; insert adds content before \
         the given 1-based line (end-of-file if omitted); delete removes \
         lines start_line..=end_line; append/prepend add content at the end \
         or start of the file; rewrite replaces the whole file with content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to edit." },
                "operation": {
                    "type": "string",
                    "enum": ["replace", "insert", "delete", "append", "prepend", "rewrite"]
                },
                "old_text": { "type": "string", "description": "Required for replace." },
                "new_text": { "type": "string", "description": "Required for replace." },
                "content": { "type": "string", "description": "Required for insert, append, prepend, rewrite." },
                "line": { "type": "integer", "description": "1-based line to insert before; optional, defaults to end of file." },
                "start_line": { "type": "integer", "description": "1-based first line to delete, required for delete." },
                "end_line": { "type": "integer", "description": "1-based last line to delete (inclusive), required for delete." }
            },
            "required": ["path", "operation"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }

    fn mutates_files(&self) -> bool {
        true
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path' argument");
        };
        let Some(operation) = call.args.get("operation").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'operation' argument");
        };

        if !Path::new(path).is_file() {
            return ToolOutput::err(&call.id, format!("no such file: {path}"));
        }

        let original = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let result = match operation {
            "replace" => apply_replace(&original, call),
            "insert" => apply_insert(&original, call),
            "delete" => apply_delete(&original, call),
            "append" => apply_append(&original, call),
            "prepend" => apply_prepend(&original, call),
            "rewrite" => apply_rewrite(call),
            other => return ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        };

        let updated = match result {
            Ok(s) => s,
            Err(msg) => return ToolOutput::err(&call.id, msg),
        };

        match fs::write(path, &updated) {
            Ok(()) => ToolOutput::ok(&call.id, format!("edited {path} ({} bytes)", updated.len())),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

fn apply_replace(original: &str, call: &ToolCall) -> Result<String, String> {
    let old = call.args.get("old_text").and_then(|v| v.as_str()).ok_or("missing 'old_text' for replace")?;
    let new = call.args.get("new_text").and_then(|v| v.as_str()).ok_or("missing 'new_text' for replace")?;
    if !original.contains(old) {
        return Err(format!("old_text not found in file: {old:?}"));
    }
    Ok(original.replacen(old, new, 1))
}

fn apply_insert(original: &str, call: &ToolCall) -> Result<String, String> {
    let content = call.args.get("content").and_then(|v| v.as_str()).ok_or("missing 'content' for insert")?;
    let mut lines: Vec<&str> = original.lines().collect();
    let at = match call.args.get("line").and_then(|v| v.as_u64()) {
        Some(n) => (n as usize).saturating_sub(1).min(lines.len()),
        None => lines.len(),
    };
    let insertion: Vec<&str> = content.lines().collect();
    lines.splice(at..at, insertion);
    Ok(join_with_trailing_newline(&lines, original))
}

fn apply_delete(original: &str, call: &ToolCall) -> Result<String, String> {
    let start = call.args.get("start_line").and_then(|v| v.as_u64()).ok_or("missing 'start_line' for delete")? as usize;
    let end = call.args.get("end_line").and_then(|v| v.as_u64()).ok_or("missing 'end_line' for delete")? as usize;
    if start == 0 || end < start {
        return Err("start_line/end_line out of range".to_string());
    }
    let lines: Vec<&str> = original.lines().collect();
    if start > lines.len() {
        return Err(format!("start_line {start} exceeds file length {}", lines.len()));
    }
    let end = end.min(lines.len());
    let mut retained: Vec<&str> = lines[..start - 1].to_vec();
    retained.extend_from_slice(&lines[end..]);
    Ok(join_with_trailing_newline(&retained, original))
}

fn apply_append(original: &str, call: &ToolCall) -> Result<String, String> {
    let content = call.args.get("content").and_then(|v| v.as_str()).ok_or("missing 'content' for append")?;
    let mut out = original.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(content);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

fn apply_prepend(original: &str, call: &ToolCall) -> Result<String, String> {
    let content = call.args.get("content").and_then(|v| v.as_str()).ok_or("missing 'content' for prepend")?;
    let mut out = content.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(original);
    Ok(out)
}

fn apply_rewrite(call: &ToolCall) -> Result<String, String> {
    let content = call.args.get("content").and_then(|v| v.as_str()).ok_or("missing 'content' for rewrite")?;
    Ok(content.to_string())
}

fn join_with_trailing_newline(lines: &[&str], original: &str) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') || out.is_empty() {
        out.push('\n');
    }
    out
}
