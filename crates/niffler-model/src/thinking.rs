// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Reasoning/"thinking" stream handling: auto-detection of the three wire
//! formats (Anthropic XML tags embedded in assistant text, OpenAI JSON
//! `reasoning_content`/`encrypted_reasoning` fields, or none) and a
//! per-request token budget that silently caps how much reasoning content is
//! retained.

use crate::{ReasoningLevel, ThinkingFormat};

const OPEN_TAG: &str = "<thinking>";
const CLOSE_TAG: &str = "</thinking>";
const OPEN_REDACTED_TAG: &str = "<redacted_thinking>";
const CLOSE_REDACTED_TAG: &str = "</redacted_thinking>";

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Thinking { content: String, is_redacted: bool, is_complete: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagState {
    Outside,
    InThinking,
    InRedacted,
}

/// Incrementally scans assistant-text deltas for `<thinking>`/
/// `<redacted_thinking>` tags that may be split across SSE chunks.
#[derive(Debug, Default)]
pub struct XmlThinkingScanner {
    state: TagStateHolder,
    /// Text accumulated since entering the current tag, held back until a
    /// close tag or enough bytes have arrived to rule one out at this
    /// boundary (we only need to hold back the longest tag's length minus one).
    carry: String,
}

#[derive(Debug)]
struct TagStateHolder(TagState);
impl Default for TagStateHolder {
    fn default() -> Self {
        TagStateHolder(TagState::Outside)
    }
}

impl XmlThinkingScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw text delta, returning ordered segments. A
    /// `Thinking` segment's `is_complete` is true exactly on the chunk that
    /// contains the closing tag.
    pub fn feed(&mut self, delta: &str) -> Vec<Segment> {
        let mut input = std::mem::take(&mut self.carry);
        input.push_str(delta);
        let mut out = Vec::new();

        loop {
            match self.state.0 {
                TagState::Outside => {
                    if let Some(pos) = input.find(OPEN_TAG) {
                        if pos > 0 {
                            out.push(Segment::Text(input[..pos].to_string()));
                        }
                        input = input[pos + OPEN_TAG.len()..].to_string();
                        self.state.0 = TagState::InThinking;
                        continue;
                    }
                    if let Some(pos) = input.find(OPEN_REDACTED_TAG) {
                        if pos > 0 {
                            out.push(Segment::Text(input[..pos].to_string()));
                        }
                        input = input[pos + OPEN_REDACTED_TAG.len()..].to_string();
                        self.state.0 = TagState::InRedacted;
                        continue;
                    }
                    // Hold back a tail that might be the prefix of a split tag.
                    let hold = longest_partial_tag_suffix(&input, &[OPEN_TAG, OPEN_REDACTED_TAG]);
                    let emit_len = input.len() - hold;
                    if emit_len > 0 {
                        out.push(Segment::Text(input[..emit_len].to_string()));
                    }
                    self.carry = input[emit_len..].to_string();
                    break;
                }
                TagState::InThinking => {
                    if let Some(pos) = input.find(CLOSE_TAG) {
                        out.push(Segment::Thinking {
                            content: input[..pos].to_string(),
                            is_redacted: false,
                            is_complete: true,
                        });
                        input = input[pos + CLOSE_TAG.len()..].to_string();
                        self.state.0 = TagState::Outside;
                        continue;
                    }
                    let hold = longest_partial_tag_suffix(&input, &[CLOSE_TAG]);
                    let emit_len = input.len() - hold;
                    if emit_len > 0 {
                        out.push(Segment::Thinking {
                            content: input[..emit_len].to_string(),
                            is_redacted: false,
                            is_complete: false,
                        });
                    }
                    self.carry = input[emit_len..].to_string();
                    break;
                }
                TagState::InRedacted => {
                    if let Some(pos) = input.find(CLOSE_REDACTED_TAG) {
                        out.push(Segment::Thinking {
                            content: input[..pos].to_string(),
                            is_redacted: true,
                            is_complete: true,
                        });
                        input = input[pos + CLOSE_REDACTED_TAG.len()..].to_string();
                        self.state.0 = TagState::Outside;
                        continue;
                    }
                    let hold = longest_partial_tag_suffix(&input, &[CLOSE_REDACTED_TAG]);
                    let emit_len = input.len() - hold;
                    if emit_len > 0 {
                        out.push(Segment::Thinking {
                            content: input[..emit_len].to_string(),
                            is_redacted: true,
                            is_complete: false,
                        });
                    }
                    self.carry = input[emit_len..].to_string();
                    break;
                }
            }
        }
        out
    }
}

/// Length of the longest suffix of `s` that is a proper, non-empty prefix of
/// any of `tags` — i.e. bytes we must hold back because they might be the
/// start of a tag split across chunk boundaries.
fn longest_partial_tag_suffix(s: &str, tags: &[&str]) -> usize {
    let max_len = tags.iter().map(|t| t.len() - 1).max().unwrap_or(0).min(s.len());
    for len in (1..=max_len).rev() {
        let suffix = &s[s.len() - len..];
        if tags.iter().any(|t| t.starts_with(suffix)) {
            return len;
        }
    }
    0
}

/// Caps the total reasoning tokens retained for one request. Once the
/// configured level's budget is exceeded, `admit` starts returning `false`
/// and callers drop the corresponding `ThinkingDelta` silently — the
/// surrounding stream is unaffected.
pub struct ThinkingBudget {
    remaining: i64,
}

impl ThinkingBudget {
    pub fn new(level: ReasoningLevel) -> Self {
        Self { remaining: level.token_budget() as i64 }
    }

    /// Returns `true` if `content` may still be retained (and deducts its
    /// approximate token cost from the remaining budget); `false` once the
    /// budget has been exhausted.
    pub fn admit(&mut self, content: &str) -> bool {
        if self.remaining <= 0 {
            return false;
        }
        let approx_tokens = (content.len() / 4).max(1) as i64;
        self.remaining -= approx_tokens;
        true
    }
}

/// Tracks which reasoning format this stream has committed to, per
/// spec.md §4.2's "auto-detection picks the highest-confidence format on
/// first match".
#[derive(Default)]
pub struct FormatDetector {
    locked: Option<ThinkingFormat>,
}

impl FormatDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detected(&self) -> Option<ThinkingFormat> {
        self.locked
    }

    pub fn lock(&mut self, format: ThinkingFormat) -> ThinkingFormat {
        *self.locked.get_or_insert(format)
    }
}
