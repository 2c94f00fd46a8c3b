// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
/// 20 KB ≈ 5,000 tokens — keeps output well within a typical context window.
const OUTPUT_LIMIT_BYTES: usize = 20_000;
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

/// Built-in tool that runs a shell command to completion, subject to a
/// per-call timeout with a hard ceiling.
pub struct BashTool {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
}

impl Default for BashTool {
    fn default() -> Self {
        Self { default_timeout_secs: 30, max_timeout_secs: 300 }
    }
}

impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr. Output is capped \
         at ~20 KB; when larger, the first 100 and last 100 lines are kept with \
         an omission marker in between, so errors at the end are never lost. \
         Prefer non-interactive commands; avoid anything that requires a TTY."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional, capped at 300)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(command) = call.args.get("command").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'command' argument");
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str());
        let timeout_secs =
            call.args.get("timeout_secs").and_then(|v| v.as_u64()).unwrap_or(self.default_timeout_secs).min(self.max_timeout_secs);

        debug!(cmd = %command, timeout_secs, "executing bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            // Detach from the controlling terminal so the subprocess can't
            // read/write it directly even if stdin/stdout are redirected.
            cmd.pre_exec(|| {
                libc_setsid();
                Ok(())
            });
        }
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
        };

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = child.wait_with_output();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(Duration::from_secs(timeout_secs)) {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&head_tail_truncate(&stdout));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&head_tail_truncate(&stderr));
                }
                if content.is_empty() {
                    content = format!("[exit {}]", output.status.code().unwrap_or(-1));
                }

                let code = output.status.code().unwrap_or(-1);
                if code == 0 {
                    ToolOutput::ok(&call.id, content)
                } else if code == 1 {
                    // Exit 1 is the Unix convention for "no matches"/"false" —
                    // not treated as a hard failure, but still surfaced.
                    let out = if content.is_empty() { "[exit 1]".to_string() } else { format!("[exit 1]\n{content}") };
                    ToolOutput::ok(&call.id, out)
                } else {
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("wait error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout_secs}s")),
        }
    }
}

#[cfg(unix)]
fn libc_setsid() {
    extern "C" {
        fn setsid() -> i32;
    }
    unsafe {
        setsid();
    }
}

/// Truncate `s` to fit within `OUTPUT_LIMIT_BYTES`, keeping the first
/// `HEAD_LINES` and last `TAIL_LINES` with an omission marker between them
/// so both command setup and final results/errors stay visible.
pub(crate) fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();

    if total <= HEAD_LINES + TAIL_LINES {
        let tail_start = s.len().saturating_sub(OUTPUT_LIMIT_BYTES / 2);
        let tail_str = &s[tail_start..];
        let head_end = (OUTPUT_LIMIT_BYTES / 2).min(s.len());
        let head_str = &s[..head_end];
        let omitted_bytes = s.len().saturating_sub(head_str.len() + tail_str.len());
        return format!("{head_str}\n...[{omitted_bytes} bytes omitted]...\n{tail_str}");
    }

    let head: Vec<&str> = lines[..HEAD_LINES].to_vec();
    let tail: Vec<&str> = lines[total - TAIL_LINES..].to_vec();
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let shown_bytes = head.join("\n").len() + tail.join("\n").len();
    let omitted_bytes = s.len().saturating_sub(shown_bytes);

    format!("{}\n...[{omitted_lines} lines / ~{omitted_bytes} bytes omitted]...\n{}", head.join("\n"), tail.join("\n"))
}
