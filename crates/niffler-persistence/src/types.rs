// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Plan,
    Code,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Plan => "plan",
            Mode::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(Mode::Plan),
            "code" => Some(Mode::Code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// JSON object rendered as a string, per spec's `ToolCall` shape.
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub mode: Mode,
    pub model_nickname: String,
    pub created: i64,
    pub last_activity: i64,
    pub message_count: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_call_id: Option<String>,
    pub timestamp: i64,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub reasoning_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_call_id: Option<String>,
    pub timestamp: i64,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub reasoning_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingFormat {
    Anthropic,
    OpenAi,
    Encrypted,
    None,
}

impl ThinkingFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ThinkingFormat::Anthropic => "anthropic",
            ThinkingFormat::OpenAi => "openai",
            ThinkingFormat::Encrypted => "encrypted",
            ThinkingFormat::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anthropic" => Some(ThinkingFormat::Anthropic),
            "openai" => Some(ThinkingFormat::OpenAi),
            "encrypted" => Some(ThinkingFormat::Encrypted),
            "none" => Some(ThinkingFormat::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Med,
    High,
    Essential,
}

impl Importance {
    pub fn as_str(self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Med => "med",
            Importance::High => "high",
            Importance::Essential => "essential",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Importance::Low),
            "med" => Some(Importance::Med),
            "high" => Some(Importance::High),
            "essential" => Some(Importance::Essential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewThinkingToken {
    pub conversation_id: i64,
    pub message_id: Option<i64>,
    pub format: ThinkingFormat,
    pub reasoning_content: Option<String>,
    pub encrypted_content: Option<String>,
    pub reasoning_id: Option<String>,
    pub importance: Importance,
    pub token_count: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct ThinkingToken {
    pub id: i64,
    pub conversation_id: i64,
    pub message_id: Option<i64>,
    pub format: ThinkingFormat,
    pub reasoning_content: Option<String>,
    pub encrypted_content: Option<String>,
    pub reasoning_id: Option<String>,
    pub importance: Importance,
    pub token_count: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cost_usd: f64,
}
