//! Exit-code convention: `{0, 1, 2, other}` maps to `{allow, deny, ask,
//! error}` (spec §4.9).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Deny,
    Ask,
    Error(String),
}

/// `None` (no exit code — killed by signal) is treated as `other`.
pub fn decision_for_exit_code(code: Option<i32>) -> HookDecision {
    match code {
        Some(0) => HookDecision::Allow,
        Some(1) => HookDecision::Deny,
        Some(2) => HookDecision::Ask,
        Some(other) => HookDecision::Error(format!("exited with code {other}")),
        None => HookDecision::Error("terminated by signal".to_string()),
    }
}
