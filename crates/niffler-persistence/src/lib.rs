// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod error;
mod schema;
mod store;
mod types;

pub use error::{PersistenceError, Result};
pub use store::Store;
pub use types::{
    Conversation, Importance, Message, Mode, NewMessage, NewThinkingToken, Role, ThinkingFormat, ThinkingToken, TokenUsage, ToolCallRecord,
};
