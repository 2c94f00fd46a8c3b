// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rusqlite::Connection;

use crate::error::Result;

/// Current schema version. Bump when adding a migration step below.
const SCHEMA_VERSION: i64 = 1;

/// Forward-only schema setup: `CREATE TABLE IF NOT EXISTS` for the base
/// shape, then numbered `PRAGMA user_version`-gated `ALTER TABLE` blocks for
/// anything added later. No down-migrations; additive changes only.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS conversation (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            title           TEXT NOT NULL,
            mode            TEXT NOT NULL DEFAULT 'code',
            model_nickname  TEXT NOT NULL,
            created         INTEGER NOT NULL,
            last_activity   INTEGER NOT NULL,
            message_count   INTEGER NOT NULL DEFAULT 0,
            is_active       INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS conversation_message (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id   INTEGER NOT NULL REFERENCES conversation(id),
            role              TEXT NOT NULL,
            content           TEXT NOT NULL,
            tool_calls_json   TEXT,
            tool_call_id      TEXT,
            timestamp         INTEGER NOT NULL,
            input_tokens      INTEGER,
            output_tokens     INTEGER,
            reasoning_tokens  INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_conversation_message_conv
            ON conversation_message(conversation_id, id);

        CREATE TABLE IF NOT EXISTS conversation_thinking_token (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id     INTEGER NOT NULL REFERENCES conversation(id),
            message_id          INTEGER REFERENCES conversation_message(id),
            format              TEXT NOT NULL,
            reasoning_content   TEXT,
            encrypted_content   TEXT,
            reasoning_id        TEXT,
            importance          TEXT NOT NULL,
            token_count         INTEGER NOT NULL,
            timestamp           INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_thinking_token_conv
            ON conversation_thinking_token(conversation_id);

        CREATE TABLE IF NOT EXISTS plan_mode_created_files (
            conversation_id  INTEGER NOT NULL REFERENCES conversation(id),
            path             TEXT NOT NULL,
            created          INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, path)
        );

        CREATE TABLE IF NOT EXISTS model_token_usage (
            conversation_id   INTEGER NOT NULL REFERENCES conversation(id),
            model_nickname    TEXT NOT NULL,
            input_tokens      INTEGER NOT NULL DEFAULT 0,
            output_tokens     INTEGER NOT NULL DEFAULT 0,
            reasoning_tokens  INTEGER NOT NULL DEFAULT 0,
            cost_usd          REAL NOT NULL DEFAULT 0.0,
            PRIMARY KEY (conversation_id, model_nickname)
        );

        CREATE TABLE IF NOT EXISTS token_correction_factor (
            model_nickname  TEXT PRIMARY KEY,
            factor          REAL NOT NULL DEFAULT 1.0
        );

        -- conversation_id is carried as an unindexed column rather than the
        -- rowid itself: a conversation contributes one title row plus one
        -- row per message, so the rowid can't double as the join key. Title
        -- rows use the conversation's own id (always positive); message rows
        -- use the negated message id, keeping the two disjoint.
        CREATE VIRTUAL TABLE IF NOT EXISTS conversation_search USING fts5(
            title,
            content,
            conversation_id UNINDEXED,
            content=''
        );

        CREATE TRIGGER IF NOT EXISTS conversation_search_ai_title
        AFTER INSERT ON conversation
        BEGIN
            INSERT INTO conversation_search(rowid, title, content, conversation_id)
                VALUES (new.id, new.title, '', new.id);
        END;

        CREATE TRIGGER IF NOT EXISTS conversation_search_au_title
        AFTER UPDATE OF title ON conversation
        BEGIN
            INSERT INTO conversation_search(conversation_search, rowid, title, content, conversation_id)
                VALUES ('delete', old.id, old.title, '', old.id);
            INSERT INTO conversation_search(rowid, title, content, conversation_id)
                VALUES (new.id, new.title, '', new.id);
        END;

        CREATE TRIGGER IF NOT EXISTS conversation_search_ai_message
        AFTER INSERT ON conversation_message
        BEGIN
            INSERT INTO conversation_search(rowid, title, content, conversation_id)
                VALUES (-new.id, '', new.content, new.conversation_id);
        END;
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_creates_all_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        for expected in [
            "conversation",
            "conversation_message",
            "conversation_thinking_token",
            "plan_mode_created_files",
            "model_token_usage",
            "token_correction_factor",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
    }

    #[test]
    fn migrate_sets_user_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let version: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn search_index_handles_multiple_messages_per_conversation() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO conversation (title, mode, model_nickname, created, last_activity) VALUES ('hello', 'code', 'gpt-4o', 1, 1)",
            [],
        )
        .unwrap();
        let conv_id = conn.last_insert_rowid();
        for content in ["first message about parsers", "second message about lexers", "third message about tokens"] {
            conn.execute(
                "INSERT INTO conversation_message (conversation_id, role, content, timestamp) VALUES (?1, 'user', ?2, 1)",
                rusqlite::params![conv_id, content],
            )
            .unwrap();
        }
        let matches: Vec<i64> = conn
            .prepare("SELECT DISTINCT conversation_id FROM conversation_search WHERE conversation_search MATCH 'lexers'")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(matches, vec![conv_id]);
    }
}
