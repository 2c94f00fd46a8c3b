// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Plan/Code mode gate. `edit` is restricted in Plan mode to paths created
//! during that mode's lifetime; `create` is always allowed. The gate reads
//! its created-files set from [`niffler_persistence::Store`] rather than
//! holding its own copy, so `switchConversation` and `switchMode` never
//! have two sources of truth to keep in sync.
use std::path::Path;

use niffler_config::AgentMode;
use niffler_persistence::Store;
use tracing::warn;

use crate::error::NifflerError;

/// Single entry point used after conversation load, explicit mode switch,
/// or the UI's toggle command, so protection is initialized identically
/// regardless of call site.
///
/// Created files do not persist across application restarts or mode
/// switches: the set is always re-initialized empty here (see DESIGN.md,
/// "Open Questions resolution" — trusting stale on-disk state across a
/// restart was judged worse than a conversation occasionally needing a
/// fresh Plan-mode pass).
pub fn restore_mode_with_protection(store: &Store, conversation_id: i64, mode: AgentMode) -> Result<(), NifflerError> {
    let _ = mode;
    store.clear_created_files(conversation_id)?;
    Ok(())
}

/// Normalizes a tool-supplied path to a string key comparable against the
/// stored created-files set: relative to `workspace_root` when the path
/// falls under it, otherwise left as given (already-sanitized by the Tool
/// Worker before this is called).
pub fn normalize_for_gate(workspace_root: Option<&Path>, path: &Path) -> String {
    match workspace_root {
        Some(root) => path.strip_prefix(root).unwrap_or(path).to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}

/// Checks whether an `edit` targeting `path` may proceed. Code mode is
/// always allowed. In Plan mode, a target that does not yet exist on disk
/// is allowed through (the tool itself will report "file not found"); an
/// existing target must be in the created-files set. If persistence is
/// unavailable the gate fails open, per spec's "fail-open only if the
/// persistence layer is unavailable".
pub fn check_edit_allowed(store: &Store, conversation_id: i64, mode: AgentMode, gate_key: &str, exists_on_disk: bool) -> Result<(), NifflerError> {
    if mode == AgentMode::Code || !exists_on_disk {
        return Ok(());
    }
    match store.get_created_files(conversation_id) {
        Ok(created) => {
            if created.iter().any(|p| p == gate_key) {
                Ok(())
            } else {
                Err(NifflerError::PlanProtection(format!(
                    "'{gate_key}' was not created during this Plan-mode session; use `create` to start a new file, or switch to Code mode to edit existing files"
                )))
            }
        }
        Err(e) => {
            warn!(error = %e, "plan-mode gate: persistence unavailable, failing open");
            Ok(())
        }
    }
}

/// Records a path created via `create` while in Plan mode so a later
/// `edit` of the same path is allowed. No-op in Code mode.
pub fn record_created_file(store: &Store, conversation_id: i64, mode: AgentMode, gate_key: &str, now: i64) -> Result<(), NifflerError> {
    if mode == AgentMode::Plan {
        store.add_created_file(conversation_id, gate_key, now)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use niffler_persistence::Mode as PersistMode;

    fn store_with_conversation() -> (Store, i64) {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation("x", PersistMode::Plan, "gpt-4o", 1).unwrap();
        (store, conv.id)
    }

    #[test]
    fn code_mode_always_allows_edit() {
        let (store, conv_id) = store_with_conversation();
        assert!(check_edit_allowed(&store, conv_id, AgentMode::Code, "anything.txt", true).is_ok());
    }

    #[test]
    fn plan_mode_allows_edit_of_nonexistent_target() {
        let (store, conv_id) = store_with_conversation();
        assert!(check_edit_allowed(&store, conv_id, AgentMode::Plan, "new.txt", false).is_ok());
    }

    #[test]
    fn plan_mode_blocks_edit_of_preexisting_uncreated_file() {
        let (store, conv_id) = store_with_conversation();
        let result = check_edit_allowed(&store, conv_id, AgentMode::Plan, "preexisting.txt", true);
        assert!(matches!(result, Err(NifflerError::PlanProtection(_))));
    }

    #[test]
    fn plan_mode_allows_edit_after_create_recorded() {
        let (store, conv_id) = store_with_conversation();
        record_created_file(&store, conv_id, AgentMode::Plan, "a.txt", 1).unwrap();
        assert!(check_edit_allowed(&store, conv_id, AgentMode::Plan, "a.txt", true).is_ok());
    }

    #[test]
    fn record_created_file_is_noop_in_code_mode() {
        let (store, conv_id) = store_with_conversation();
        record_created_file(&store, conv_id, AgentMode::Code, "a.txt", 1).unwrap();
        assert!(store.get_created_files(conv_id).unwrap().is_empty());
    }

    #[test]
    fn restore_mode_with_protection_clears_created_files() {
        let (store, conv_id) = store_with_conversation();
        store.add_created_file(conv_id, "a.txt", 1).unwrap();
        restore_mode_with_protection(&store, conv_id, AgentMode::Plan).unwrap();
        assert!(store.get_created_files(conv_id).unwrap().is_empty());
    }

    #[test]
    fn switching_plan_then_code_leaves_created_files_empty() {
        let (store, conv_id) = store_with_conversation();
        restore_mode_with_protection(&store, conv_id, AgentMode::Plan).unwrap();
        record_created_file(&store, conv_id, AgentMode::Plan, "a.txt", 1).unwrap();
        restore_mode_with_protection(&store, conv_id, AgentMode::Code).unwrap();
        assert!(store.get_created_files(conv_id).unwrap().is_empty());
    }

    #[test]
    fn normalize_for_gate_strips_workspace_root() {
        let root = Path::new("/home/user/project");
        let full = Path::new("/home/user/project/src/main.rs");
        assert_eq!(normalize_for_gate(Some(root), full), "src/main.rs");
    }

    #[test]
    fn normalize_for_gate_without_root_keeps_path() {
        let full = Path::new("relative/path.rs");
        assert_eq!(normalize_for_gate(None, full), "relative/path.rs");
    }
}
