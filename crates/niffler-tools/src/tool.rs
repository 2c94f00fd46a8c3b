// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

use crate::policy::ApprovalPolicy;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// A single content item in a rich tool output. Most tools produce only
/// `Text`; `fetch`'s HTML conversion and `read`'s image support may produce
/// other combinations in the future, but today only `Text` is used.
#[derive(Debug, Clone)]
pub enum ToolOutputPart {
    Text(String),
    Image(String),
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content — concatenation of all Text parts. Always set.
    pub content: String,
    pub parts: Vec<ToolOutputPart>,
    /// `true` if execution failed non-fatally (the content is an error message).
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        Self { call_id: call_id.into(), content: text.clone(), parts: vec![ToolOutputPart::Text(text)], is_error: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        Self { call_id: call_id.into(), content: text.clone(), parts: vec![ToolOutputPart::Text(text)], is_error: true }
    }
}

/// Describes the shape of a tool's text output, used by the conversation
/// engine's context-aware truncation when a tool result exceeds its token
/// cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal output: keep the first and last N lines. Suitable for `bash`.
    HeadTail,
    /// Ordered match list: keep the leading matches.
    MatchList,
    /// File content: keep head and tail windows. Suitable for `read`.
    FileContent,
    /// Hard-truncate at the character boundary.
    #[default]
    Generic,
}

/// Trait every built-in tool implements. Execution is synchronous: the tool
/// worker thread calls `execute` directly and blocks until it returns.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    fn default_policy(&self) -> ApprovalPolicy;
    /// Describes the tool's output shape for context-aware truncation.
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// `true` for tools that write to the filesystem — used by the Plan-mode
    /// gate, which only needs to consult `edit`'s target path today, but is
    /// kept general so a future mutating tool doesn't silently bypass it.
    fn mutates_files(&self) -> bool {
        false
    }
    fn execute(&self, call: &ToolCall) -> ToolOutput;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct MinimalTool;
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn output_category_default_is_generic() {
        assert_eq!(OutputCategory::default(), OutputCategory::Generic);
    }

    #[test]
    fn tool_default_output_category_is_generic() {
        assert_eq!(MinimalTool.output_category(), OutputCategory::Generic);
    }

    #[test]
    fn tool_default_mutates_files_is_false() {
        assert!(!MinimalTool.mutates_files());
    }

    struct HeadTailTool;
    impl Tool for HeadTailTool {
        fn name(&self) -> &str {
            "ht"
        }
        fn description(&self) -> &str {
            "produces terminal output"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        fn output_category(&self) -> OutputCategory {
            OutputCategory::HeadTail
        }
        fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn tool_can_override_output_category() {
        assert_eq!(HeadTailTool.output_category(), OutputCategory::HeadTail);
    }
}
