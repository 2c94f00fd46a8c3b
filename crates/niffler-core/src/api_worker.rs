// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The API worker thread: pulls [`ApiRequest`]s off a queue, drives a model
//! provider's blocking response stream, and republishes the accumulated
//! events as [`ApiResponse`]s. Tool-call argument deltas are accumulated by
//! index since providers may stream a call's name and arguments across
//! several frames before it is complete.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use niffler_channels::{QueueReceiver, QueueSender, Shutdown};
use niffler_model::{CompletionRequest, ModelProvider, ResponseEvent, Usage};
use niffler_tools::ToolCall;
use tracing::{error, info};

use crate::messages::{ApiRequest, ApiResponse, ErrorKind, FinishReason, RequestId};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Runs until `shutdown` is signalled, processing one request to completion
/// before picking up the next (requests are never interleaved — the engine
/// only has one in flight at a time).
pub fn run(rx: QueueReceiver<ApiRequest>, tx: QueueSender<ApiResponse>, model: Arc<dyn ModelProvider>, shutdown: Shutdown) {
    info!(provider = model.name(), model = model.model_name(), "api worker started");
    while let Some(request) = rx.receive(RECEIVE_TIMEOUT, &shutdown) {
        process_request(request, &tx, model.as_ref(), &shutdown);
    }
    info!("api worker shutting down");
}

fn process_request(request: ApiRequest, tx: &QueueSender<ApiResponse>, model: &dyn ModelProvider, shutdown: &Shutdown) {
    let request_id = request.request_id;
    let req = CompletionRequest {
        messages: request.messages,
        tools: request.tools,
        stream: true,
        reasoning: request.reasoning,
        system_dynamic_suffix: None,
        cache_key: None,
    };

    let stream = match model.complete(req) {
        Ok(s) => s,
        Err(e) => {
            error!(request_id, error = %e, "model completion request failed");
            tx.try_send(ApiResponse::Error(request_id, ErrorKind::Transport, e.to_string()));
            return;
        }
    };

    tx.try_send(ApiResponse::StreamStart(request_id));

    let mut pending_calls: BTreeMap<usize, PendingCall> = BTreeMap::new();
    let mut usage = Usage::default();
    let mut finish_reason = FinishReason::Stop;

    for event in stream {
        if shutdown.is_set() {
            tx.try_send(ApiResponse::StreamComplete(request_id, usage, FinishReason::Cancelled));
            return;
        }
        match event {
            Ok(ResponseEvent::TextDelta(delta)) => {
                tx.try_send(ApiResponse::StreamChunk(request_id, delta));
            }
            Ok(ResponseEvent::ThinkingDelta { format, content, is_encrypted }) => {
                tx.try_send(ApiResponse::ThinkingChunk { request_id, format, content, is_encrypted });
            }
            Ok(ResponseEvent::ToolCall { index, id, name, arguments }) => {
                finish_reason = FinishReason::ToolCalls;
                let entry = pending_calls.entry(index).or_default();
                if !id.is_empty() {
                    entry.id = id;
                }
                if !name.is_empty() {
                    entry.name.push_str(&name);
                }
                entry.arguments.push_str(&arguments);
            }
            Ok(ResponseEvent::Usage { input_tokens, output_tokens, reasoning_tokens, cache_read_tokens, cache_write_tokens }) => {
                usage = Usage { input_tokens, output_tokens, reasoning_tokens, cache_read_tokens, cache_write_tokens };
            }
            Ok(ResponseEvent::MaxTokens) => {
                finish_reason = FinishReason::MaxTokens;
            }
            Ok(ResponseEvent::Done) => break,
            Ok(ResponseEvent::Error(message)) => {
                tx.try_send(ApiResponse::Error(request_id, ErrorKind::Protocol, message));
                return;
            }
            Err(e) => {
                error!(request_id, error = %e, "error while reading response stream");
                tx.try_send(ApiResponse::Error(request_id, ErrorKind::Transport, e.to_string()));
                return;
            }
        }
    }

    if !pending_calls.is_empty() {
        let calls: Vec<ToolCall> = pending_calls
            .into_values()
            .filter_map(|p| {
                let args = serde_json::from_str(&p.arguments).unwrap_or(serde_json::Value::Null);
                if p.name.is_empty() {
                    None
                } else {
                    Some(ToolCall { id: p.id, name: p.name, args })
                }
            })
            .collect();
        if !calls.is_empty() {
            tx.try_send(ApiResponse::ToolCallsReady(request_id, calls));
        }
    }

    tx.try_send(ApiResponse::StreamComplete(request_id, usage, finish_reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use niffler_model::ResponseStream;
    use std::thread;

    struct StubProvider {
        events: Vec<anyhow::Result<ResponseEvent>>,
    }

    impl ModelProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        fn model_name(&self) -> &str {
            "stub-model"
        }
        fn complete(&self, _req: CompletionRequest) -> anyhow::Result<ResponseStream> {
            let events: Vec<anyhow::Result<ResponseEvent>> =
                self.events.iter().map(|e| e.as_ref().map(|ev| clone_event(ev)).map_err(|e| anyhow::anyhow!("{e}"))).collect();
            Ok(Box::new(events.into_iter()))
        }
    }

    fn clone_event(e: &ResponseEvent) -> ResponseEvent {
        match e {
            ResponseEvent::TextDelta(s) => ResponseEvent::TextDelta(s.clone()),
            ResponseEvent::ToolCall { index, id, name, arguments } => {
                ResponseEvent::ToolCall { index: *index, id: id.clone(), name: name.clone(), arguments: arguments.clone() }
            }
            ResponseEvent::ThinkingDelta { format, content, is_encrypted } => {
                ResponseEvent::ThinkingDelta { format: *format, content: content.clone(), is_encrypted: *is_encrypted }
            }
            ResponseEvent::Usage { input_tokens, output_tokens, reasoning_tokens, cache_read_tokens, cache_write_tokens } => {
                ResponseEvent::Usage {
                    input_tokens: *input_tokens,
                    output_tokens: *output_tokens,
                    reasoning_tokens: *reasoning_tokens,
                    cache_read_tokens: *cache_read_tokens,
                    cache_write_tokens: *cache_write_tokens,
                }
            }
            ResponseEvent::Done => ResponseEvent::Done,
            ResponseEvent::MaxTokens => ResponseEvent::MaxTokens,
            ResponseEvent::Error(s) => ResponseEvent::Error(s.clone()),
        }
    }

    fn run_once(events: Vec<ResponseEvent>) -> Vec<ApiResponse> {
        let (req_tx, req_rx) = niffler_channels::queue::<ApiRequest>();
        let (resp_tx, resp_rx) = niffler_channels::queue::<ApiResponse>();
        let shutdown = Shutdown::new();
        let model: Arc<dyn ModelProvider> = Arc::new(StubProvider { events: events.into_iter().map(Ok).collect() });

        req_tx.try_send(ApiRequest { request_id: 1, messages: vec![], tools: vec![], reasoning: None });
        let shutdown_clone = shutdown.clone();
        let handle = thread::spawn(move || run(req_rx, resp_tx, model, shutdown_clone));

        let mut responses = Vec::new();
        while let Some(r) = resp_rx.receive(Duration::from_secs(2), &shutdown) {
            let is_complete = matches!(r, ApiResponse::StreamComplete(..));
            responses.push(r);
            if is_complete {
                break;
            }
        }
        shutdown.signal();
        handle.join().unwrap();
        responses
    }

    #[test]
    fn text_only_stream_produces_chunks_then_stop() {
        let responses = run_once(vec![ResponseEvent::TextDelta("hi".into()), ResponseEvent::Done]);
        assert!(matches!(responses[0], ApiResponse::StreamStart(1)));
        assert!(matches!(&responses[1], ApiResponse::StreamChunk(1, s) if s == "hi"));
        assert!(matches!(responses.last().unwrap(), ApiResponse::StreamComplete(1, _, FinishReason::Stop)));
    }

    #[test]
    fn tool_call_deltas_accumulate_by_index() {
        let responses = run_once(vec![
            ResponseEvent::ToolCall { index: 0, id: "call_1".into(), name: "read".into(), arguments: String::new() },
            ResponseEvent::ToolCall { index: 0, id: String::new(), name: String::new(), arguments: "{\"path\":".into() },
            ResponseEvent::ToolCall { index: 0, id: String::new(), name: String::new(), arguments: "\"/tmp/x\"}".into() },
            ResponseEvent::Done,
        ]);
        let ready = responses.iter().find_map(|r| match r {
            ApiResponse::ToolCallsReady(_, calls) => Some(calls.clone()),
            _ => None,
        });
        let calls = ready.expect("expected ToolCallsReady");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read");
        assert_eq!(calls[0].args["path"], "/tmp/x");
        assert!(matches!(responses.last().unwrap(), ApiResponse::StreamComplete(1, _, FinishReason::ToolCalls)));
    }

    #[test]
    fn usage_event_is_carried_into_stream_complete() {
        let responses = run_once(vec![
            ResponseEvent::Usage { input_tokens: 10, output_tokens: 20, reasoning_tokens: 0, cache_read_tokens: 0, cache_write_tokens: 0 },
            ResponseEvent::Done,
        ]);
        match responses.last().unwrap() {
            ApiResponse::StreamComplete(_, usage, _) => {
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 20);
            }
            other => panic!("unexpected final response: {other:?}"),
        }
    }

    #[test]
    fn stream_error_event_is_forwarded_and_stops_processing() {
        let responses = run_once(vec![ResponseEvent::TextDelta("partial".into()), ResponseEvent::Error("boom".into())]);
        assert!(matches!(responses.last().unwrap(), ApiResponse::Error(1, ErrorKind::Protocol, msg) if msg == "boom"));
    }

    #[test]
    fn max_tokens_event_sets_finish_reason() {
        let responses = run_once(vec![ResponseEvent::TextDelta("x".into()), ResponseEvent::MaxTokens, ResponseEvent::Done]);
        assert!(matches!(responses.last().unwrap(), ApiResponse::StreamComplete(1, _, FinishReason::MaxTokens)));
    }
}
