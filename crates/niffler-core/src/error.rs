// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Error taxonomy for the conversation runtime. Each variant maps 1:1 onto
/// the propagation policy described for the component that raises it:
/// transport/protocol/HTTP errors surface to the user and end the turn,
/// tool-level errors are recovered by being fed back to the model, and
/// persistence errors are logged and the engine continues on a best-effort
/// basis (except during startup, where they are fatal).
#[derive(Debug, Error)]
pub enum NifflerError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("turn cancelled")]
    Cancelled,
    #[error("tool argument validation failed: {0}")]
    ToolValidation(String),
    #[error("tool execution failed: {0}")]
    ToolExecution(String),
    #[error("tool call timed out after {0}s")]
    ToolTimeout(u64),
    #[error("plan-mode protection: {0}")]
    PlanProtection(String),
    #[error("duplicate-call limit reached: {0}")]
    DuplicateLimit(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] niffler_persistence::PersistenceError),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NifflerError>;
