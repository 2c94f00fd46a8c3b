// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Payload types carried over the `niffler-channels` queues between the
//! engine thread and the API/tool worker threads.
use niffler_config::AgentMode;
use niffler_model::{ReasoningLevel, ThinkingFormat, ToolSchema, Usage};
use niffler_tools::{ToolCall, ToolOutput};

/// One request id per turn iteration, used to correlate streamed events and
/// to support cancellation of a specific in-flight request.
pub type RequestId = u64;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub request_id: RequestId,
    pub messages: Vec<niffler_model::Message>,
    pub tools: Vec<ToolSchema>,
    pub reasoning: Option<ReasoningLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    MaxTokens,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Http,
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum ApiResponse {
    StreamStart(RequestId),
    StreamChunk(RequestId, String),
    ThinkingChunk { request_id: RequestId, format: ThinkingFormat, content: String, is_encrypted: bool },
    ToolCallsReady(RequestId, Vec<ToolCall>),
    StreamComplete(RequestId, Usage, FinishReason),
    Error(RequestId, ErrorKind, String),
}

#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub request_id: RequestId,
    pub call: ToolCall,
    /// Whether the policy engine decided this call needs user confirmation.
    /// Confirmation itself happens upstream (UI), before the request is
    /// sent — this flag is carried through for logging/audit purposes.
    pub require_confirmation: bool,
    /// Conversation and mode in effect when the call was issued, so the
    /// tool worker can consult the Plan-mode gate without holding its own
    /// copy of engine state.
    pub conversation_id: i64,
    pub mode: AgentMode,
}

#[derive(Debug, Clone)]
pub enum ToolResponse {
    Result(RequestId, ToolOutput),
    Error { request_id: RequestId, call_id: String, message: String },
}
