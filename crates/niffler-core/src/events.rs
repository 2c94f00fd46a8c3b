// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use niffler_config::AgentMode;
use niffler_tools::{TodoItem, ToolCall};

/// Events the Conversation Engine emits while driving a turn. Consumers
/// (the line-loop UI today, a richer terminal UI tomorrow) subscribe to
/// these to decide what to render; the engine has no opinion on
/// presentation.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TextDelta(String),
    TextComplete(String),
    ThinkingDelta(String),
    ThinkingComplete(String),
    ToolCallStarted(ToolCall),
    ToolCallFinished { call_id: String, tool_name: String, output: String, is_error: bool },
    TokenUsage { input: u32, output: u32, reasoning: u32 },
    TurnComplete,
    Error(String),
    TodoUpdate(Vec<TodoItem>),
    ModeChanged(AgentMode),
}
