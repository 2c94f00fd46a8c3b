// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System prompt construction: a built-in identity + mode-specific
//! instructions, with an optional `NIFFLER.md` project instruction file
//! substituted into `{cwd}`/`{time}`/`{tools}`/`{mode}` placeholders.
use std::fs;
use std::path::Path;

use chrono::Local;
use niffler_config::AgentMode;

/// Name of the optional project instruction file, read from the current
/// working directory if present.
pub const INSTRUCTION_FILE_NAME: &str = "NIFFLER.md";

fn mode_instructions(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Plan => {
            "You are in Plan mode. Read files and gather context freely, but you may only \
             edit files you created yourself during this Plan-mode session — editing a \
             pre-existing file is blocked until the user switches to Code mode. Use this mode \
             to explore the codebase, draft new files, and present a plan before the user \
             approves broader changes."
        }
        AgentMode::Code => {
            "You are in Code mode. You may read and edit any file in the workspace, run shell \
             commands, and use all available tools without restriction. Work systematically: \
             verify your changes and keep the user informed of what you changed and why."
        }
    }
}

/// Substitutes `{cwd}`, `{time}`, `{tools}`, and `{mode}` placeholders in a
/// custom instruction template. Unknown placeholders are left untouched.
fn substitute_placeholders(template: &str, cwd: &Path, tool_names: &[String], mode: AgentMode) -> String {
    template
        .replace("{cwd}", &cwd.display().to_string())
        .replace("{time}", &Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
        .replace("{tools}", &tool_names.join(", "))
        .replace("{mode}", &mode.to_string())
}

/// Reads `NIFFLER.md` from `cwd` if it exists, returning its substituted
/// contents. Returns `None` when the file is absent; a read error (e.g.
/// permissions) is treated the same as absent since the prompt is built
/// best-effort.
pub fn load_instruction_file(cwd: &Path, tool_names: &[String], mode: AgentMode) -> Option<String> {
    let contents = fs::read_to_string(cwd.join(INSTRUCTION_FILE_NAME)).ok()?;
    Some(substitute_placeholders(&contents, cwd, tool_names, mode))
}

/// Builds the full system prompt for a turn. `custom` overrides the
/// built-in identity and mode instructions entirely (still followed by the
/// project instruction file, if any); `cwd`/`tool_names` feed both the
/// built-in "Project Context" block and any `{…}` placeholders in a loaded
/// `NIFFLER.md`.
pub fn system_prompt(mode: AgentMode, custom: Option<&str>, cwd: &Path, tool_names: &[String]) -> String {
    let instruction_file = load_instruction_file(cwd, tool_names, mode);

    let body = match custom {
        Some(custom) => custom.to_string(),
        None => {
            let identity = format!(
                "You are Niffler, an AI coding assistant operating in a terminal.\n\n\
                 Current mode: `{mode}`\n\
                 Current time: `{time}`\n\
                 Working directory: `{cwd}`\n\
                 Available tools: {tools}",
                mode = mode,
                time = Local::now().format("%Y-%m-%d %H:%M:%S"),
                cwd = cwd.display(),
                tools = tool_names.join(", "),
            );
            format!("{identity}\n\n{}", mode_instructions(mode))
        }
    };

    match instruction_file {
        Some(extra) => format!("{body}\n\n## Project Instructions\n\n{extra}"),
        None => body,
    }
}
