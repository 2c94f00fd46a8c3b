// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no such conversation: {0}")]
    ConversationNotFound(i64),
    #[error("tool message references unknown tool_call_id {tool_call_id:?} in conversation {conversation_id}")]
    DanglingToolCallId { conversation_id: i64, tool_call_id: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
