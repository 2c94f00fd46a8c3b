// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use niffler_config::AgentMode;

/// Running token counters for the active conversation, mirrored into
/// `model_token_usage` by the engine after each `StreamComplete`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounters {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
}

impl TokenCounters {
    pub fn add(&mut self, input: u32, output: u32, reasoning: u32) {
        self.input_tokens += input as u64;
        self.output_tokens += output as u64;
        self.reasoning_tokens += reasoning as u64;
    }
}

/// Process-wide active-conversation state: `{conversationId, mode,
/// tokenCounters}`. Mode is observable by tool validators (the Tool
/// Worker's Plan-mode gate reads it); updates are serialized by holding
/// this behind a single mutex at the call site (the Conversation Engine),
/// never read or written from more than one place concurrently.
#[derive(Debug, Clone)]
pub struct Session {
    pub conversation_id: i64,
    pub mode: AgentMode,
    pub token_counters: TokenCounters,
}

impl Session {
    pub fn new(conversation_id: i64, mode: AgentMode) -> Self {
        Self { conversation_id, mode, token_counters: TokenCounters::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_with_zeroed_counters() {
        let s = Session::new(1, AgentMode::Code);
        assert_eq!(s.token_counters.input_tokens, 0);
        assert_eq!(s.token_counters.output_tokens, 0);
        assert_eq!(s.token_counters.reasoning_tokens, 0);
    }

    #[test]
    fn token_counters_add_accumulates() {
        let mut c = TokenCounters::default();
        c.add(10, 20, 5);
        c.add(1, 2, 0);
        assert_eq!(c.input_tokens, 11);
        assert_eq!(c.output_tokens, 22);
        assert_eq!(c.reasoning_tokens, 5);
    }

    #[test]
    fn session_carries_requested_mode() {
        let s = Session::new(7, AgentMode::Plan);
        assert_eq!(s.conversation_id, 7);
        assert_eq!(s.mode, AgentMode::Plan);
    }
}
