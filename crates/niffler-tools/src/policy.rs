// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

/// Per-tool approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Always run without asking.
    Auto,
    /// Ask the user before each invocation.
    Ask,
    /// Never run; return an error.
    Deny,
}

/// Policy engine mapping a tool invocation's command string to an approval
/// decision via glob patterns from config.
#[derive(Debug, Default)]
pub struct ToolPolicy {
    auto_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
}

impl ToolPolicy {
    pub fn new(auto_approve_patterns: &[String], deny_patterns: &[String]) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> { patterns.iter().filter_map(|p| glob_to_regex(p)).collect() };
        Self { auto_patterns: compile(auto_approve_patterns), deny_patterns: compile(deny_patterns) }
    }

    /// Deny beats auto; neither matching falls through to `Ask`.
    pub fn decide(&self, command: &str) -> ApprovalPolicy {
        if self.deny_patterns.iter().any(|re| re.is_match(command)) {
            return ApprovalPolicy::Deny;
        }
        if self.auto_patterns.iter().any(|re| re.is_match(command)) {
            return ApprovalPolicy::Auto;
        }
        ApprovalPolicy::Ask
    }
}

/// Convert a simple shell glob (`*` = anything, `?` = one char) to a [`Regex`].
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with(auto: &[&str], deny: &[&str]) -> ToolPolicy {
        let auto: Vec<String> = auto.iter().map(|s| s.to_string()).collect();
        let deny: Vec<String> = deny.iter().map(|s| s.to_string()).collect();
        ToolPolicy::new(&auto, &deny)
    }

    #[test]
    fn deny_beats_auto_for_same_pattern() {
        let p = policy_with(&["rm *"], &["rm *"]);
        assert_eq!(p.decide("rm /tmp/foo"), ApprovalPolicy::Deny);
    }

    #[test]
    fn deny_does_not_match_different_prefix() {
        let p = policy_with(&[], &["rm -rf /*"]);
        assert_ne!(p.decide("git status"), ApprovalPolicy::Deny);
    }

    #[test]
    fn auto_approve_wildcard_prefix() {
        let p = policy_with(&["cat *"], &[]);
        assert_eq!(p.decide("cat /etc/hosts"), ApprovalPolicy::Auto);
    }

    #[test]
    fn auto_approve_question_mark_matches_one_char() {
        let p = policy_with(&["ls ?"], &[]);
        assert_eq!(p.decide("ls -"), ApprovalPolicy::Auto);
        assert_ne!(p.decide("ls --"), ApprovalPolicy::Auto);
    }

    #[test]
    fn empty_patterns_always_ask() {
        let p = policy_with(&[], &[]);
        assert_eq!(p.decide("anything"), ApprovalPolicy::Ask);
    }
}
