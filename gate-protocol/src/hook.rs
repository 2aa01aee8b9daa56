//! Wire types for the `PreToolUse`-style hook protocol between the host
//! assistant and the `gate-hook` binary.
//!
//! The host writes one JSON object to the hook's stdin and reads exactly one
//! JSON object back from stdout. Diagnostics never go to stdout (see
//! `gate_core::coordinator`), so this module only needs to model the two
//! ends of that single exchange.

use serde::Deserialize;
use serde::Serialize;

/// Raw hook invocation as received on stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct HookEvent {
    pub tool_name: Option<String>,
    pub tool_input: Option<ToolInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolInput {
    /// Tolerant of non-string shapes; only a JSON string is ever a command.
    pub command: Option<serde_json::Value>,
}

impl HookEvent {
    /// Returns the shell command text, or `None` if this invocation is not a
    /// shell tool call (in which case the caller should short-circuit to
    /// `Decision::Allow`).
    pub fn shell_command(&self) -> Option<&str> {
        if self.tool_name.as_deref() != Some("Bash") {
            return None;
        }
        match self.tool_input.as_ref()?.command.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// `true` when `tool_name` was present but not the shell tool; such
    /// invocations are allowed trivially without reaching the rule engine.
    pub fn is_non_shell_tool(&self) -> bool {
        self.tool_name.as_deref().is_some_and(|n| n != "Bash")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// The single JSON object the hook writes to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct HookOutput {
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HookOutput {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: None,
        }
    }

    pub fn allow_with_reason(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Allow,
            reason: Some(reason.into()),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_extracted_for_bash_tool() {
        let json = r#"{"tool_name":"Bash","tool_input":{"command":"git status"}}"#;
        let event: HookEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.shell_command(), Some("git status"));
    }

    #[test]
    fn non_bash_tool_is_skipped() {
        let json = r#"{"tool_name":"Read","tool_input":{"command":"git status"}}"#;
        let event: HookEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.shell_command(), None);
        assert!(event.is_non_shell_tool());
    }

    #[test]
    fn missing_command_is_none() {
        let json = r#"{"tool_name":"Bash","tool_input":{}}"#;
        let event: HookEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.shell_command(), None);
    }

    #[test]
    fn non_string_command_is_none() {
        let json = r#"{"tool_name":"Bash","tool_input":{"command":123}}"#;
        let event: HookEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.shell_command(), None);
    }

    #[test]
    fn output_json_omits_reason_when_absent() {
        let out = HookOutput::allow();
        let json = serde_json::to_string(&out).unwrap();
        assert_eq!(json, r#"{"decision":"allow"}"#);
    }

    #[test]
    fn output_json_includes_reason_when_present() {
        let out = HookOutput::deny("auto-rejected by user approval settings");
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains(r#""decision":"deny""#));
        assert!(json.contains("auto-rejected"));
    }
}
