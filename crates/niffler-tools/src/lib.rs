// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod events;
pub mod policy;
pub mod registry;
pub mod tool;

pub use events::{TodoItem, ToolEvent};
pub use policy::{ApprovalPolicy, ToolPolicy};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};

pub use builtin::bash::BashTool;
pub use builtin::create::CreateTool;
pub use builtin::edit::EditTool;
pub use builtin::fetch::FetchTool;
pub use builtin::list::ListTool;
pub use builtin::read::ReadTool;
pub use builtin::todolist::TodoListTool;

/// Register every fixed built-in tool (everything but `task`, which lives in
/// `niffler-core` since it needs to run a nested conversation engine).
pub fn register_builtins(registry: &mut ToolRegistry, todo_tx: std::sync::mpsc::Sender<ToolEvent>) {
    registry.register(BashTool::default());
    registry.register(ReadTool);
    registry.register(ListTool);
    registry.register(EditTool);
    registry.register(CreateTool);
    registry.register(FetchTool::default());
    registry.register(TodoListTool::new(todo_tx));
}
