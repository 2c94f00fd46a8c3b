// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Built-in tool that lists a directory's entries, one per line.
/// Directory names carry a trailing `/` so the model can distinguish them
/// from files without a second call.
#[derive(Default)]
pub struct ListTool;

impl Tool for ListTool {
    fn name(&self) -> &str {
        "list"
    }

    fn description(&self) -> &str {
        "List a directory's immediate entries. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list."
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::MatchList
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path' argument");
        };

        let dir = Path::new(path);
        if !dir.is_dir() {
            return ToolOutput::err(&call.id, format!("not a directory: {path}"));
        }

        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => return ToolOutput::err(&call.id, format!("read_dir error: {e}")),
        };

        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => return ToolOutput::err(&call.id, format!("read_dir error: {e}")),
            };
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.path().is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            ToolOutput::ok(&call.id, "(empty directory)")
        } else {
            ToolOutput::ok(&call.id, names.join("\n"))
        }
    }
}
