// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Character ceiling for file content returned to the model. Large files are
/// truncated with a trailing marker rather than rejected outright.
const READ_LIMIT: usize = 200_000;

/// Built-in tool that reads a file's contents as UTF-8 text.
#[derive(Default)]
pub struct ReadTool;

impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a text file's contents. Output is truncated at 200,000 characters."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read."
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
        OutputCategory::FileContent
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path' argument");
        };

        if !Path::new(path).exists() {
            return ToolOutput::err(&call.id, format!("no such file: {path}"));
        }

        match fs::read_to_string(path) {
            Ok(content) => {
                if content.len() > READ_LIMIT {
                    let boundary = floor_char_boundary(&content, READ_LIMIT);
                    let mut truncated = content[..boundary].to_string();
                    truncated.push_str("\n...[truncated]");
                    ToolOutput::ok(&call.id, truncated)
                } else {
                    ToolOutput::ok(&call.id, content)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("read error: {e}")),
        }
    }
}

/// Rounds `index` down to the nearest UTF-8 char boundary, so a multi-byte
/// character straddling the truncation point is never split mid-codepoint.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut idx = index.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn call(path: &str) -> ToolCall {
        ToolCall { id: "1".into(), name: "read".into(), args: json!({"path": path}) }
    }

    #[test]
    fn reads_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello world").unwrap();
        let out = ReadTool.execute(&call(path.to_str().unwrap()));
        assert!(!out.is_error);
        assert_eq!(out.content, "hello world");
    }

    #[test]
    fn missing_file_is_error() {
        let out = ReadTool.execute(&call("/no/such/file/exists.txt"));
        assert!(out.is_error);
    }

    #[test]
    fn missing_path_argument_is_error() {
        let out = ReadTool.execute(&ToolCall { id: "1".into(), name: "read".into(), args: json!({}) });
        assert!(out.is_error);
    }

    #[test]
    fn truncates_large_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.txt");
        fs::write(&path, "a".repeat(READ_LIMIT + 1000)).unwrap();
        let out = ReadTool.execute(&call(path.to_str().unwrap()));
        assert!(!out.is_error);
        assert!(out.content.ends_with("...[truncated]"));
        assert!(out.content.len() < READ_LIMIT + 1000);
    }

    #[test]
    fn truncation_does_not_split_a_multi_byte_character() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multibyte.txt");
        // Pad so the 3-byte '€' character straddles the READ_LIMIT boundary.
        let mut content = "a".repeat(READ_LIMIT - 1);
        content.push('€');
        fs::write(&path, &content).unwrap();
        let out = ReadTool.execute(&call(path.to_str().unwrap()));
        assert!(!out.is_error);
    }
}
