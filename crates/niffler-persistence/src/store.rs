// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{PersistenceError, Result};
use crate::schema;
use crate::types::{
    Conversation, Importance, Message, Mode, NewMessage, NewThinkingToken, Role, ThinkingFormat, ThinkingToken, TokenUsage, ToolCallRecord,
};

/// Single pooled connection behind a mutex. SQLite permits only one writer
/// at a time regardless of a connection pool, so a mutex-guarded connection
/// gives the same effective throughput as a pool with none of the
/// bookkeeping; every write below is a short transaction.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // ── Conversations ────────────────────────────────────────────────────

    pub fn create_conversation(&self, title: &str, mode: Mode, model_nickname: &str, now: i64) -> Result<Conversation> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO conversation (title, mode, model_nickname, created, last_activity, message_count, is_active)
             VALUES (?1, ?2, ?3, ?4, ?4, 0, 1)",
            params![title, mode.as_str(), model_nickname, now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Conversation { id, title: title.to_string(), mode, model_nickname: model_nickname.to_string(), created: now, last_activity: now, message_count: 0, is_active: true })
    }

    pub fn load_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT id, title, mode, model_nickname, created, last_activity, message_count, is_active
             FROM conversation WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
        .optional()
        .map_err(PersistenceError::from)
    }

    pub fn list_conversations(&self, include_archived: bool) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = if include_archived {
            "SELECT id, title, mode, model_nickname, created, last_activity, message_count, is_active
             FROM conversation ORDER BY last_activity DESC"
        } else {
            "SELECT id, title, mode, model_nickname, created, last_activity, message_count, is_active
             FROM conversation WHERE is_active = 1 ORDER BY last_activity DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_conversation)?;
        rows.collect::<std::result::Result<_, _>>().map_err(PersistenceError::from)
    }

    /// Search spans conversation titles and message content via the FTS5
    /// `conversation_search` virtual table, deduplicating by conversation id.
    /// Title and message rows live in disjoint rowid spaces (see schema.rs),
    /// so the join uses the table's own `conversation_id` column rather than
    /// `rowid`.
    pub fn search_conversations(&self, query: &str) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT c.id, c.title, c.mode, c.model_nickname, c.created, c.last_activity, c.message_count, c.is_active
             FROM conversation_search s
             JOIN conversation c ON c.id = s.conversation_id
             WHERE conversation_search MATCH ?1
             ORDER BY c.last_activity DESC",
        )?;
        let rows = stmt.query_map(params![query], row_to_conversation)?;
        rows.collect::<std::result::Result<_, _>>().map_err(PersistenceError::from)
    }

    pub fn archive_conversation(&self, id: i64) -> Result<()> {
        self.set_active(id, false)
    }

    pub fn unarchive_conversation(&self, id: i64) -> Result<()> {
        self.set_active(id, true)
    }

    fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let affected = conn.execute("UPDATE conversation SET is_active = ?1 WHERE id = ?2", params![active, id])?;
        if affected == 0 {
            return Err(PersistenceError::ConversationNotFound(id));
        }
        Ok(())
    }

    // ── Messages ─────────────────────────────────────────────────────────

    /// Appends a message inside a transaction. A `Tool` message whose
    /// `tool_call_id` does not match any `toolCalls[].id` of an earlier
    /// `Assistant` message in the same conversation is rejected: the write
    /// fails and the caller is expected to log-and-drop rather than corrupt
    /// history (per spec's invariant enforcement).
    pub fn append_message(&self, msg: NewMessage) -> Result<Message> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;

        if msg.role == Role::Tool {
            if let Some(call_id) = &msg.tool_call_id {
                if !tool_call_id_exists(&tx, msg.conversation_id, call_id)? {
                    return Err(PersistenceError::DanglingToolCallId { conversation_id: msg.conversation_id, tool_call_id: call_id.clone() });
                }
            }
        }

        let tool_calls_json = if msg.tool_calls.is_empty() { None } else { Some(serde_json::to_string(&msg.tool_calls)?) };

        tx.execute(
            "INSERT INTO conversation_message
                (conversation_id, role, content, tool_calls_json, tool_call_id, timestamp, input_tokens, output_tokens, reasoning_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                msg.conversation_id,
                msg.role.as_str(),
                msg.content,
                tool_calls_json,
                msg.tool_call_id,
                msg.timestamp,
                msg.input_tokens,
                msg.output_tokens,
                msg.reasoning_tokens
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE conversation SET message_count = message_count + 1, last_activity = ?1 WHERE id = ?2",
            params![msg.timestamp, msg.conversation_id],
        )?;

        tx.commit()?;

        Ok(Message {
            id,
            conversation_id: msg.conversation_id,
            role: msg.role,
            content: msg.content,
            tool_calls: msg.tool_calls,
            tool_call_id: msg.tool_call_id,
            timestamp: msg.timestamp,
            input_tokens: msg.input_tokens,
            output_tokens: msg.output_tokens,
            reasoning_tokens: msg.reasoning_tokens,
        })
    }

    /// Messages of a conversation in chronological (monotonic id) order, for
    /// history assembly.
    pub fn messages_for_conversation(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, tool_calls_json, tool_call_id, timestamp, input_tokens, output_tokens, reasoning_tokens
             FROM conversation_message WHERE conversation_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?.into_iter().map(Ok).collect()
    }

    // ── Thinking tokens ──────────────────────────────────────────────────

    pub fn append_thinking_token(&self, t: NewThinkingToken) -> Result<ThinkingToken> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO conversation_thinking_token
                (conversation_id, message_id, format, reasoning_content, encrypted_content, reasoning_id, importance, token_count, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                t.conversation_id,
                t.message_id,
                t.format.as_str(),
                t.reasoning_content,
                t.encrypted_content,
                t.reasoning_id,
                t.importance.as_str(),
                t.token_count,
                t.timestamp
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(ThinkingToken {
            id,
            conversation_id: t.conversation_id,
            message_id: t.message_id,
            format: t.format,
            reasoning_content: t.reasoning_content,
            encrypted_content: t.encrypted_content,
            reasoning_id: t.reasoning_id,
            importance: t.importance,
            token_count: t.token_count,
            timestamp: t.timestamp,
        })
    }

    /// Thinking tokens of a conversation in chronological (monotonic id)
    /// order.
    pub fn thinking_tokens_for_conversation(&self, conversation_id: i64) -> Result<Vec<ThinkingToken>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, message_id, format, reasoning_content, encrypted_content, reasoning_id, importance, token_count, timestamp
             FROM conversation_thinking_token WHERE conversation_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], row_to_thinking_token)?;
        rows.collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?.into_iter().map(Ok).collect()
    }

    // ── Plan-mode created files ──────────────────────────────────────────

    pub fn add_created_file(&self, conversation_id: i64, path: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO plan_mode_created_files (conversation_id, path, created) VALUES (?1, ?2, ?3)",
            params![conversation_id, path, now],
        )?;
        Ok(())
    }

    pub fn get_created_files(&self, conversation_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT path FROM plan_mode_created_files WHERE conversation_id = ?1")?;
        let rows = stmt.query_map(params![conversation_id], |r| r.get(0))?;
        rows.collect::<std::result::Result<_, _>>().map_err(PersistenceError::from)
    }

    pub fn clear_created_files(&self, conversation_id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM plan_mode_created_files WHERE conversation_id = ?1", params![conversation_id])?;
        Ok(())
    }

    // ── Token usage ──────────────────────────────────────────────────────

    pub fn record_usage(&self, conversation_id: i64, model_nickname: &str, input_tokens: u64, output_tokens: u64, reasoning_tokens: u64, cost_usd: f64) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO model_token_usage (conversation_id, model_nickname, input_tokens, output_tokens, reasoning_tokens, cost_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(conversation_id, model_nickname) DO UPDATE SET
                input_tokens = input_tokens + excluded.input_tokens,
                output_tokens = output_tokens + excluded.output_tokens,
                reasoning_tokens = reasoning_tokens + excluded.reasoning_tokens,
                cost_usd = cost_usd + excluded.cost_usd",
            params![conversation_id, model_nickname, input_tokens as i64, output_tokens as i64, reasoning_tokens as i64, cost_usd],
        )?;
        Ok(())
    }

    pub fn token_usage(&self, conversation_id: i64, model_nickname: &str) -> Result<TokenUsage> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT input_tokens, output_tokens, reasoning_tokens, cost_usd FROM model_token_usage
             WHERE conversation_id = ?1 AND model_nickname = ?2",
            params![conversation_id, model_nickname],
            |r| {
                Ok(TokenUsage {
                    input_tokens: r.get::<_, i64>(0)? as u64,
                    output_tokens: r.get::<_, i64>(1)? as u64,
                    reasoning_tokens: r.get::<_, i64>(2)? as u64,
                    cost_usd: r.get(3)?,
                })
            },
        )
        .optional()
        .map(|opt| opt.unwrap_or_default())
        .map_err(PersistenceError::from)
    }

    pub fn get_correction_factor(&self, model_nickname: &str) -> Result<f64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row("SELECT factor FROM token_correction_factor WHERE model_nickname = ?1", params![model_nickname], |r| r.get(0))
            .optional()
            .map(|opt| opt.unwrap_or(1.0))
            .map_err(PersistenceError::from)
    }

    pub fn set_correction_factor(&self, model_nickname: &str, factor: f64) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO token_correction_factor (model_nickname, factor) VALUES (?1, ?2)
             ON CONFLICT(model_nickname) DO UPDATE SET factor = excluded.factor",
            params![model_nickname, factor],
        )?;
        Ok(())
    }
}

fn tool_call_id_exists(conn: &Connection, conversation_id: i64, call_id: &str) -> Result<bool> {
    let mut stmt = conn.prepare(
        "SELECT tool_calls_json FROM conversation_message
         WHERE conversation_id = ?1 AND role = 'assistant' AND tool_calls_json IS NOT NULL",
    )?;
    let rows = stmt.query_map(params![conversation_id], |r| r.get::<_, String>(0))?;
    for row in rows {
        let json = row?;
        let calls: Vec<ToolCallRecord> = serde_json::from_str(&json)?;
        if calls.iter().any(|c| c.id == call_id) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn row_to_conversation(row: &rusqlite::Row) -> std::result::Result<Conversation, rusqlite::Error> {
    let mode_str: String = row.get(2)?;
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        mode: Mode::parse(&mode_str).unwrap_or(Mode::Code),
        model_nickname: row.get(3)?,
        created: row.get(4)?,
        last_activity: row.get(5)?,
        message_count: row.get(6)?,
        is_active: row.get(7)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> std::result::Result<Message, rusqlite::Error> {
    let role_str: String = row.get(2)?;
    let tool_calls_json: Option<String> = row.get(4)?;
    let tool_calls = match tool_calls_json {
        Some(j) => serde_json::from_str(&j).map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?,
        None => Vec::new(),
    };
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: Role::parse(&role_str).unwrap_or(Role::User),
        content: row.get(3)?,
        tool_calls,
        tool_call_id: row.get(5)?,
        timestamp: row.get(6)?,
        input_tokens: row.get(7)?,
        output_tokens: row.get(8)?,
        reasoning_tokens: row.get(9)?,
    })
}

fn row_to_thinking_token(row: &rusqlite::Row) -> std::result::Result<ThinkingToken, rusqlite::Error> {
    let format_str: String = row.get(3)?;
    let importance_str: String = row.get(7)?;
    Ok(ThinkingToken {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        message_id: row.get(2)?,
        format: ThinkingFormat::parse(&format_str).unwrap_or(ThinkingFormat::None),
        reasoning_content: row.get(4)?,
        encrypted_content: row.get(5)?,
        reasoning_id: row.get(6)?,
        importance: Importance::parse(&importance_str).unwrap_or(Importance::Med),
        token_count: row.get(8)?,
        timestamp: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_load_conversation_round_trips() {
        let s = store();
        let c = s.create_conversation("hello", Mode::Code, "gpt-4o", 1000).unwrap();
        let loaded = s.load_conversation(c.id).unwrap().unwrap();
        assert_eq!(loaded.title, "hello");
        assert_eq!(loaded.mode, Mode::Code);
        assert!(loaded.is_active);
    }

    #[test]
    fn list_conversations_excludes_archived_by_default() {
        let s = store();
        let c1 = s.create_conversation("a", Mode::Code, "gpt-4o", 1).unwrap();
        let _c2 = s.create_conversation("b", Mode::Code, "gpt-4o", 2).unwrap();
        s.archive_conversation(c1.id).unwrap();
        let active = s.list_conversations(false).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "b");
        let all = s.list_conversations(true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn archive_then_unarchive_restores_visibility() {
        let s = store();
        let c = s.create_conversation("x", Mode::Code, "gpt-4o", 1).unwrap();
        s.archive_conversation(c.id).unwrap();
        assert!(!s.load_conversation(c.id).unwrap().unwrap().is_active);
        s.unarchive_conversation(c.id).unwrap();
        assert!(s.load_conversation(c.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn archive_unknown_conversation_errors() {
        let s = store();
        assert!(s.archive_conversation(999).is_err());
    }

    #[test]
    fn append_and_read_messages_in_order() {
        let s = store();
        let c = s.create_conversation("x", Mode::Code, "gpt-4o", 1).unwrap();
        s.append_message(NewMessage { conversation_id: c.id, role: Role::User, content: "hi".into(), tool_calls: vec![], tool_call_id: None, timestamp: 1, input_tokens: None, output_tokens: None, reasoning_tokens: None }).unwrap();
        s.append_message(NewMessage { conversation_id: c.id, role: Role::Assistant, content: "hello".into(), tool_calls: vec![], tool_call_id: None, timestamp: 2, input_tokens: Some(5), output_tokens: Some(3), reasoning_tokens: None }).unwrap();
        let msgs = s.messages_for_conversation(c.id).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hi");
        assert_eq!(msgs[1].content, "hello");
    }

    #[test]
    fn appending_message_bumps_conversation_message_count() {
        let s = store();
        let c = s.create_conversation("x", Mode::Code, "gpt-4o", 1).unwrap();
        s.append_message(NewMessage { conversation_id: c.id, role: Role::User, content: "hi".into(), tool_calls: vec![], tool_call_id: None, timestamp: 1, input_tokens: None, output_tokens: None, reasoning_tokens: None }).unwrap();
        let reloaded = s.load_conversation(c.id).unwrap().unwrap();
        assert_eq!(reloaded.message_count, 1);
    }

    #[test]
    fn tool_message_with_valid_call_id_succeeds() {
        let s = store();
        let c = s.create_conversation("x", Mode::Code, "gpt-4o", 1).unwrap();
        let calls = vec![ToolCallRecord { id: "call_1".into(), name: "read".into(), arguments: "{}".into() }];
        s.append_message(NewMessage { conversation_id: c.id, role: Role::Assistant, content: String::new(), tool_calls: calls, tool_call_id: None, timestamp: 1, input_tokens: None, output_tokens: None, reasoning_tokens: None }).unwrap();
        let result = s.append_message(NewMessage { conversation_id: c.id, role: Role::Tool, content: "file contents".into(), tool_calls: vec![], tool_call_id: Some("call_1".into()), timestamp: 2, input_tokens: None, output_tokens: None, reasoning_tokens: None });
        assert!(result.is_ok());
    }

    #[test]
    fn tool_message_with_dangling_call_id_is_rejected() {
        let s = store();
        let c = s.create_conversation("x", Mode::Code, "gpt-4o", 1).unwrap();
        let result = s.append_message(NewMessage { conversation_id: c.id, role: Role::Tool, content: "oops".into(), tool_calls: vec![], tool_call_id: Some("nonexistent".into()), timestamp: 1, input_tokens: None, output_tokens: None, reasoning_tokens: None });
        assert!(result.is_err());
        assert!(s.messages_for_conversation(c.id).unwrap().is_empty());
    }

    #[test]
    fn search_finds_conversation_by_title() {
        let s = store();
        s.create_conversation("fix the parser bug", Mode::Code, "gpt-4o", 1).unwrap();
        s.create_conversation("unrelated", Mode::Code, "gpt-4o", 2).unwrap();
        let found = s.search_conversations("parser").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "fix the parser bug");
    }

    #[test]
    fn search_finds_conversation_by_message_content() {
        let s = store();
        let c = s.create_conversation("generic title", Mode::Code, "gpt-4o", 1).unwrap();
        s.append_message(NewMessage { conversation_id: c.id, role: Role::User, content: "please refactor the streaming parser".into(), tool_calls: vec![], tool_call_id: None, timestamp: 1, input_tokens: None, output_tokens: None, reasoning_tokens: None }).unwrap();
        let found = s.search_conversations("refactor").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, c.id);
    }

    #[test]
    fn created_files_set_accumulates_and_clears() {
        let s = store();
        let c = s.create_conversation("x", Mode::Plan, "gpt-4o", 1).unwrap();
        s.add_created_file(c.id, "a.txt", 1).unwrap();
        s.add_created_file(c.id, "b.txt", 2).unwrap();
        assert_eq!(s.get_created_files(c.id).unwrap().len(), 2);
        s.clear_created_files(c.id).unwrap();
        assert!(s.get_created_files(c.id).unwrap().is_empty());
    }

    #[test]
    fn adding_same_created_file_twice_is_idempotent() {
        let s = store();
        let c = s.create_conversation("x", Mode::Plan, "gpt-4o", 1).unwrap();
        s.add_created_file(c.id, "a.txt", 1).unwrap();
        s.add_created_file(c.id, "a.txt", 2).unwrap();
        assert_eq!(s.get_created_files(c.id).unwrap().len(), 1);
    }

    #[test]
    fn record_usage_accumulates_across_calls() {
        let s = store();
        let c = s.create_conversation("x", Mode::Code, "gpt-4o", 1).unwrap();
        s.record_usage(c.id, "gpt-4o", 100, 50, 0, 0.01).unwrap();
        s.record_usage(c.id, "gpt-4o", 200, 75, 10, 0.02).unwrap();
        let usage = s.token_usage(c.id, "gpt-4o").unwrap();
        assert_eq!(usage.input_tokens, 300);
        assert_eq!(usage.output_tokens, 125);
        assert_eq!(usage.reasoning_tokens, 10);
        assert!((usage.cost_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn token_usage_defaults_to_zero_when_absent() {
        let s = store();
        let c = s.create_conversation("x", Mode::Code, "gpt-4o", 1).unwrap();
        let usage = s.token_usage(c.id, "gpt-4o").unwrap();
        assert_eq!(usage.input_tokens, 0);
    }

    #[test]
    fn correction_factor_defaults_to_one() {
        let s = store();
        assert_eq!(s.get_correction_factor("gpt-4o").unwrap(), 1.0);
    }

    #[test]
    fn correction_factor_can_be_set_and_updated() {
        let s = store();
        s.set_correction_factor("gpt-4o", 1.15).unwrap();
        assert_eq!(s.get_correction_factor("gpt-4o").unwrap(), 1.15);
        s.set_correction_factor("gpt-4o", 1.2).unwrap();
        assert_eq!(s.get_correction_factor("gpt-4o").unwrap(), 1.2);
    }

    #[test]
    fn append_thinking_token_round_trips() {
        let s = store();
        let c = s.create_conversation("x", Mode::Code, "gpt-4o", 1).unwrap();
        let t = s
            .append_thinking_token(NewThinkingToken { conversation_id: c.id, message_id: None, format: ThinkingFormat::Anthropic, reasoning_content: Some("thinking...".into()), encrypted_content: None, reasoning_id: None, importance: Importance::Med, token_count: 42, timestamp: 1 })
            .unwrap();
        assert_eq!(t.token_count, 42);
        assert_eq!(t.format, ThinkingFormat::Anthropic);
    }
}
