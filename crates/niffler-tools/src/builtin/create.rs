// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Built-in tool that creates a new file, writing its full content.
/// Parent directories are created as needed. Refuses to overwrite an
/// existing file — use `edit`'s `rewrite` operation for that.
#[derive(Default)]
pub struct CreateTool;

impl Tool for CreateTool {
    fn name(&self) -> &str {
        "create"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Fails if the file already exists."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to create."
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write."
                }
            },
            "required": ["path", "content"],
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
        let Some(content) = call.args.get("content").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'content' argument");
        };

        let target = Path::new(path);
        if target.exists() {
            return ToolOutput::err(&call.id, format!("file already exists: {path}"));
        }

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return ToolOutput::err(&call.id, format!("create_dir_all error: {e}"));
                }
            }
        }

        match fs::write(target, content) {
            Ok(()) => ToolOutput::ok(&call.id, format!("created {path} ({} bytes)", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}
