// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// A structured todo item managed by the `todolist` tool.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled".
    pub status: String,
}

/// Side-channel events tools emit to the UI alongside their return value.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    TodoUpdate(Vec<TodoItem>),
}
