// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The Conversation Engine: owns the turn loop, mode switching, and
//! conversation lifecycle operations. Talks to the API and Tool workers
//! purely through `niffler-channels` queues; talks to disk purely through
//! `niffler-persistence::Store`.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use niffler_channels::{QueueReceiver, QueueSender, Shutdown};
use niffler_config::AgentConfig;
use niffler_config::AgentMode;
use niffler_model::ToolSchema;
use niffler_persistence::{Importance, Mode as PersistMode, NewMessage, NewThinkingToken, Role as PersistRole, Store, ToolCallRecord};
use niffler_tools::ToolCall;
use tracing::warn;

use crate::duplicate::{duplicate_limit_message, normalize, DuplicateTracker};
use crate::error::NifflerError;
use crate::events::EngineEvent;
use crate::messages::{ApiRequest, ApiResponse, FinishReason, RequestId, ToolRequest, ToolResponse};
use crate::mode;
use crate::prompts::system_prompt;
use crate::session::Session;

const WORKER_TIMEOUT: Duration = Duration::from_secs(300);

pub struct Engine {
    store: Arc<Store>,
    session: Session,
    config: AgentConfig,
    model_nickname: String,
    tool_schemas: Vec<ToolSchema>,
    tool_names: Vec<String>,
    cwd: PathBuf,
    workspace_root: Option<PathBuf>,
    api_tx: QueueSender<ApiRequest>,
    api_rx: QueueReceiver<ApiResponse>,
    tool_tx: QueueSender<ToolRequest>,
    tool_rx: QueueReceiver<ToolResponse>,
    shutdown: Shutdown,
    next_request_id: RequestId,
    current_turn_cancel: Shutdown,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        session: Session,
        config: AgentConfig,
        model_nickname: String,
        tool_schemas: Vec<ToolSchema>,
        tool_names: Vec<String>,
        cwd: PathBuf,
        workspace_root: Option<PathBuf>,
        api_tx: QueueSender<ApiRequest>,
        api_rx: QueueReceiver<ApiResponse>,
        tool_tx: QueueSender<ToolRequest>,
        tool_rx: QueueReceiver<ToolResponse>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            session,
            config,
            model_nickname,
            tool_schemas,
            tool_names,
            cwd,
            workspace_root,
            api_tx,
            api_rx,
            tool_tx,
            tool_rx,
            shutdown,
            next_request_id: 0,
            current_turn_cancel: Shutdown::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn next_id(&mut self) -> RequestId {
        self.next_request_id += 1;
        self.next_request_id
    }

    /// Flips the cancellation flag the running turn observes between
    /// phases. A no-op if no turn is in flight.
    pub fn cancel_current_turn(&mut self) {
        self.current_turn_cancel.signal();
    }

    fn system_message_text(&self) -> String {
        system_prompt(self.session.mode, self.config.system_prompt.as_deref(), &self.cwd, &self.tool_names)
    }

    fn history_as_model_messages(&self) -> Result<Vec<niffler_model::Message>, NifflerError> {
        let persisted = self.store.messages_for_conversation(self.session.conversation_id)?;
        let mut out = vec![niffler_model::Message::system(self.system_message_text())];
        out.extend(persisted.iter().flat_map(to_model_message));
        Ok(out)
    }

    /// Persists the user's message and drives the turn loop to completion
    /// (or cancellation), emitting [`EngineEvent`]s to `events` as it goes.
    pub fn submit_user_turn(&mut self, text: &str, events: &QueueSender<EngineEvent>) -> Result<(), NifflerError> {
        self.current_turn_cancel = Shutdown::new();
        let now = now_unix();

        self.store.append_message(NewMessage {
            conversation_id: self.session.conversation_id,
            role: PersistRole::User,
            content: text.to_string(),
            tool_calls: vec![],
            tool_call_id: None,
            timestamp: now,
            input_tokens: None,
            output_tokens: None,
            reasoning_tokens: None,
        })?;

        self.run_turn_loop(events)
    }

    fn run_turn_loop(&mut self, events: &QueueSender<EngineEvent>) -> Result<(), NifflerError> {
        let mut duplicates = DuplicateTracker::new();
        let mut depth: u32 = 0;

        loop {
            if self.current_turn_cancel.is_set() {
                return Ok(());
            }

            let messages = self.history_as_model_messages()?;
            let request_id = self.next_id();
            self.api_tx.try_send(ApiRequest { request_id, messages, tools: self.tool_schemas.clone(), reasoning: None });

            let (text, tool_calls, usage, finish_reason, thinking) = self.drive_api_stream(request_id, events)?;

            if self.current_turn_cancel.is_set() || finish_reason == FinishReason::Cancelled {
                self.store.append_message(NewMessage {
                    conversation_id: self.session.conversation_id,
                    role: PersistRole::Assistant,
                    content: format!("{text} [cancelled]"),
                    tool_calls: vec![],
                    tool_call_id: None,
                    timestamp: now_unix(),
                    input_tokens: None,
                    output_tokens: None,
                    reasoning_tokens: None,
                })?;
                events.try_send(EngineEvent::TurnComplete);
                return Ok(());
            }

            let now = now_unix();
            if tool_calls.is_empty() {
                let message = self.store.append_message(NewMessage {
                    conversation_id: self.session.conversation_id,
                    role: PersistRole::Assistant,
                    content: text.clone(),
                    tool_calls: vec![],
                    tool_call_id: None,
                    timestamp: now,
                    input_tokens: Some(usage.input_tokens),
                    output_tokens: Some(usage.output_tokens),
                    reasoning_tokens: Some(usage.reasoning_tokens),
                })?;
                self.record_thinking(&thinking, Some(message.id), now)?;
                self.record_usage(&usage, &text, &[])?;
                if !thinking.content.is_empty() {
                    events.try_send(EngineEvent::ThinkingComplete(thinking.content.clone()));
                }
                events.try_send(EngineEvent::TextComplete(text));
                events.try_send(EngineEvent::TokenUsage { input: usage.input_tokens, output: usage.output_tokens, reasoning: usage.reasoning_tokens });
                events.try_send(EngineEvent::TurnComplete);
                return Ok(());
            }

            let records: Vec<ToolCallRecord> = tool_calls.iter().map(|c| ToolCallRecord { id: c.id.clone(), name: c.name.clone(), arguments: c.args.to_string() }).collect();
            let message = self.store.append_message(NewMessage {
                conversation_id: self.session.conversation_id,
                role: PersistRole::Assistant,
                content: text.clone(),
                tool_calls: records,
                tool_call_id: None,
                timestamp: now,
                input_tokens: Some(usage.input_tokens),
                output_tokens: Some(usage.output_tokens),
                reasoning_tokens: Some(usage.reasoning_tokens),
            })?;
            self.record_thinking(&thinking, Some(message.id), now)?;
            if !thinking.content.is_empty() {
                events.try_send(EngineEvent::ThinkingComplete(thinking.content.clone()));
            }
            self.record_usage(&usage, &text, &tool_calls)?;

            for call in &tool_calls {
                if self.current_turn_cancel.is_set() {
                    return Ok(());
                }

                let sig = normalize(&call.name, &call.args);
                let (content, is_error) = if duplicates.exceeds(&sig, depth, &self.config) {
                    (duplicate_limit_message(&sig), false)
                } else {
                    duplicates.record(&sig, depth);
                    events.try_send(EngineEvent::ToolCallStarted(call.clone()));
                    let output = self.dispatch_tool_call(call)?;
                    events.try_send(EngineEvent::ToolCallFinished { call_id: call.id.clone(), tool_name: call.name.clone(), output: output.content.clone(), is_error: output.is_error });
                    (output.content, output.is_error)
                };

                if let Err(e) = self.store.append_message(NewMessage {
                    conversation_id: self.session.conversation_id,
                    role: PersistRole::Tool,
                    content,
                    tool_calls: vec![],
                    tool_call_id: Some(call.id.clone()),
                    timestamp: now_unix(),
                    input_tokens: None,
                    output_tokens: None,
                    reasoning_tokens: None,
                }) {
                    warn!(error = %e, call_id = %call.id, "dropping tool-result message: referenced tool call not found in conversation history");
                }
                let _ = is_error;
            }

            depth += 1;
            if depth > self.config.max_tool_rounds {
                self.store.append_message(NewMessage {
                    conversation_id: self.session.conversation_id,
                    role: PersistRole::User,
                    content: format!("You have reached the maximum tool-call budget ({} rounds). Summarize what has been completed and what remains.", self.config.max_tool_rounds),
                    tool_calls: vec![],
                    tool_call_id: None,
                    timestamp: now_unix(),
                    input_tokens: None,
                    output_tokens: None,
                    reasoning_tokens: None,
                })?;
                events.try_send(EngineEvent::TurnComplete);
                return Ok(());
            }
            let _ = finish_reason;
        }
    }

    /// Polls for the next response with `current_turn_cancel` as the wakeup
    /// signal rather than the worker-pool-wide `shutdown`: a turn cancelled
    /// mid-stream must unblock within one poll interval, not wait out
    /// `WORKER_TIMEOUT` or an unrelated process-wide shutdown.
    fn receive_turn_response(&self) -> Option<ApiResponse> {
        self.api_rx.receive(WORKER_TIMEOUT, &self.current_turn_cancel)
    }

    fn drive_api_stream(&mut self, request_id: RequestId, events: &QueueSender<EngineEvent>) -> Result<(String, Vec<ToolCall>, niffler_model::Usage, FinishReason, Thinking), NifflerError> {
        let mut text = String::new();
        let mut thinking = Thinking::default();
        loop {
            if self.current_turn_cancel.is_set() {
                return Ok((text, vec![], niffler_model::Usage::default(), FinishReason::Cancelled, thinking));
            }
            match self.receive_turn_response() {
                None if self.current_turn_cancel.is_set() => {
                    return Ok((text, vec![], niffler_model::Usage::default(), FinishReason::Cancelled, thinking));
                }
                None => return Err(NifflerError::Transport("api worker did not respond before timeout".into())),
                Some(ApiResponse::StreamStart(id)) if id == request_id => {}
                Some(ApiResponse::StreamChunk(id, delta)) if id == request_id => {
                    text.push_str(&delta);
                    events.try_send(EngineEvent::TextDelta(delta));
                }
                Some(ApiResponse::ThinkingChunk { request_id: id, format, content, is_encrypted }) if id == request_id => {
                    thinking.push(format, &content, is_encrypted);
                    events.try_send(EngineEvent::ThinkingDelta(content));
                }
                Some(ApiResponse::ToolCallsReady(id, calls)) if id == request_id => {
                    // Wait for the matching StreamComplete before returning,
                    // so usage/finish reason are available to the caller.
                    loop {
                        if self.current_turn_cancel.is_set() {
                            return Ok((text, vec![], niffler_model::Usage::default(), FinishReason::Cancelled, thinking));
                        }
                        match self.receive_turn_response() {
                            Some(ApiResponse::StreamComplete(done_id, usage, reason)) if done_id == request_id => {
                                return Ok((text, calls, usage, reason, thinking));
                            }
                            Some(ApiResponse::StreamChunk(done_id, delta)) if done_id == request_id => {
                                text.push_str(&delta);
                                events.try_send(EngineEvent::TextDelta(delta));
                            }
                            Some(ApiResponse::ThinkingChunk { request_id: done_id, format, content, is_encrypted }) if done_id == request_id => {
                                thinking.push(format, &content, is_encrypted);
                                events.try_send(EngineEvent::ThinkingDelta(content));
                            }
                            Some(ApiResponse::Error(done_id, _kind, message)) if done_id == request_id => {
                                events.try_send(EngineEvent::Error(message.clone()));
                                return Err(NifflerError::Protocol(message));
                            }
                            None if self.current_turn_cancel.is_set() => {
                                return Ok((text, vec![], niffler_model::Usage::default(), FinishReason::Cancelled, thinking));
                            }
                            None => return Err(NifflerError::Transport("api worker did not respond before timeout".into())),
                            _ => continue,
                        }
                    }
                }
                Some(ApiResponse::StreamComplete(id, usage, reason)) if id == request_id => {
                    return Ok((text, vec![], usage, reason, thinking));
                }
                Some(ApiResponse::Error(id, _kind, message)) if id == request_id => {
                    events.try_send(EngineEvent::Error(message.clone()));
                    return Err(NifflerError::Protocol(message));
                }
                Some(_) => continue,
            }
        }
    }

    /// Persists the turn's accumulated reasoning stream as one `ThinkingToken`
    /// row, if any reasoning content was seen. A no-op on plain responses.
    fn record_thinking(&self, thinking: &Thinking, message_id: Option<i64>, timestamp: i64) -> Result<(), NifflerError> {
        let Some(format) = thinking.format else { return Ok(()) };
        let token_count = (thinking.content.len() / 4).max(1) as u32;
        let token = if thinking.is_encrypted {
            NewThinkingToken { conversation_id: self.session.conversation_id, message_id, format, reasoning_content: None, encrypted_content: Some(thinking.content.clone()), reasoning_id: None, importance: Importance::Med, token_count, timestamp }
        } else {
            NewThinkingToken { conversation_id: self.session.conversation_id, message_id, format, reasoning_content: Some(thinking.content.clone()), encrypted_content: None, reasoning_id: None, importance: Importance::Med, token_count, timestamp }
        };
        self.store.append_thinking_token(token)?;
        Ok(())
    }

    fn dispatch_tool_call(&mut self, call: &ToolCall) -> Result<niffler_tools::ToolOutput, NifflerError> {
        let request_id = self.next_id();
        self.tool_tx.try_send(ToolRequest { request_id, call: call.clone(), require_confirmation: false, conversation_id: self.session.conversation_id, mode: self.session.mode });
        loop {
            match self.tool_rx.receive(WORKER_TIMEOUT, &self.shutdown) {
                Some(ToolResponse::Result(id, output)) if id == request_id => return Ok(output),
                Some(ToolResponse::Error { request_id: id, call_id, message }) if id == request_id => {
                    return Ok(niffler_tools::ToolOutput::err(call_id, message));
                }
                None => return Err(NifflerError::ToolTimeout(WORKER_TIMEOUT.as_secs())),
                _ => continue,
            }
        }
    }

    fn record_usage(&self, usage: &niffler_model::Usage, response_text: &str, tool_calls: &[ToolCall]) -> Result<(), NifflerError> {
        let (input_tokens, output_tokens, reasoning_tokens) = if usage.input_tokens == 0 && usage.output_tokens == 0 {
            let factor = self.store.get_correction_factor(&self.model_nickname)?;
            let estimated_output: u64 = (response_text.len() / 4).max(1) as u64 + tool_calls.iter().map(|c| c.args.to_string().len() as u64 / 4).sum::<u64>();
            (0u64, (estimated_output as f64 * factor) as u64, 0u64)
        } else {
            (usage.input_tokens as u64, usage.output_tokens as u64, usage.reasoning_tokens as u64)
        };
        self.store
            .record_usage(self.session.conversation_id, &self.model_nickname, input_tokens, output_tokens, reasoning_tokens, 0.0)
            .map_err(NifflerError::from)
    }

    /// Switches the active mode, re-initializing (Plan) or clearing (Code)
    /// the Plan-mode created-files set. Idempotent: switching to the mode
    /// already active still resets the gate, matching `restoreModeWithProtection`.
    pub fn switch_mode(&mut self, new_mode: AgentMode) -> Result<(), NifflerError> {
        mode::restore_mode_with_protection(&self.store, self.session.conversation_id, new_mode)?;
        self.session.mode = new_mode;
        Ok(())
    }

    /// Persists nothing itself (the caller has already ended any pending
    /// turn); loads the target conversation's mode and re-initializes the
    /// Plan-mode gate for it.
    pub fn switch_conversation(&mut self, conversation_id: i64) -> Result<(), NifflerError> {
        let conversation = self.store.load_conversation(conversation_id)?.ok_or(NifflerError::Persistence(niffler_persistence::PersistenceError::ConversationNotFound(conversation_id)))?;
        let mode = persist_mode_to_agent_mode(conversation.mode);
        mode::restore_mode_with_protection(&self.store, conversation_id, mode)?;
        self.session = Session::new(conversation_id, mode);
        Ok(())
    }

    pub fn archive(&self, conversation_id: i64) -> Result<(), NifflerError> {
        self.store.archive_conversation(conversation_id).map_err(NifflerError::from)
    }

    pub fn unarchive(&self, conversation_id: i64) -> Result<(), NifflerError> {
        self.store.unarchive_conversation(conversation_id).map_err(NifflerError::from)
    }

    pub fn workspace_root(&self) -> Option<&std::path::Path> {
        self.workspace_root.as_deref()
    }
}

fn persist_mode_to_agent_mode(mode: PersistMode) -> AgentMode {
    match mode {
        PersistMode::Plan => AgentMode::Plan,
        PersistMode::Code => AgentMode::Code,
    }
}

/// One persisted message can expand into several wire messages: an assistant
/// turn with parallel tool calls is stored as one row holding the full
/// `Vec<ToolCallRecord>`, but `build_openai_messages` expects one
/// `Message::tool_call` per call, consecutively, preceded by the assistant's
/// text when there is any.
fn to_model_message(m: &niffler_persistence::Message) -> Vec<niffler_model::Message> {
    match m.role {
        PersistRole::System => vec![niffler_model::Message::system(&m.content)],
        PersistRole::User => vec![niffler_model::Message::user(&m.content)],
        PersistRole::Assistant => {
            if m.tool_calls.is_empty() {
                vec![niffler_model::Message::assistant(&m.content)]
            } else {
                let mut out = Vec::with_capacity(m.tool_calls.len() + 1);
                if !m.content.is_empty() {
                    out.push(niffler_model::Message::assistant(&m.content));
                }
                out.extend(m.tool_calls.iter().map(|call| niffler_model::Message::tool_call(&call.id, &call.name, &call.arguments)));
                out
            }
        }
        PersistRole::Tool => vec![niffler_model::Message::tool_result(m.tool_call_id.clone().unwrap_or_default(), &m.content)],
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Accumulates a turn's reasoning/thinking stream across however many SSE
/// frames it arrived in, independent of where the provider happened to split
/// them (e.g. Anthropic's `<thinking>one `/`two</thinking>answer` split).
#[derive(Default)]
struct Thinking {
    content: String,
    format: Option<niffler_persistence::ThinkingFormat>,
    is_encrypted: bool,
}

impl Thinking {
    fn push(&mut self, format: niffler_model::ThinkingFormat, content: &str, is_encrypted: bool) {
        self.content.push_str(content);
        self.is_encrypted = self.is_encrypted || is_encrypted;
        if self.format.is_none() {
            self.format = Some(match format {
                niffler_model::ThinkingFormat::AnthropicXml => niffler_persistence::ThinkingFormat::Anthropic,
                niffler_model::ThinkingFormat::OpenAiJson => niffler_persistence::ThinkingFormat::OpenAi,
                niffler_model::ThinkingFormat::None => niffler_persistence::ThinkingFormat::None,
            });
        }
    }
}
