//! Single hook execution: variable substitution, `sh -c` spawn inside its
//! own process group, timeout force-kill (spec §4.9, §5 "Hook: per hook,
//! default 30 s").
//!
//! Built on `tokio::process` + `tokio::time::timeout` rather than a
//! synchronous poll loop, matching the async spawn idiom already used for
//! downstream service children (`gw_process::spawn`).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use tokio::process::Command;
use tokio::time::timeout;

use crate::decision::{decision_for_exit_code, HookDecision};

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Escape a string for safe shell usage by wrapping in single quotes.
fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Substitute `{key}` placeholders with shell-escaped values in a single
/// pass. Already-substituted content is never re-scanned, so a variable
/// value containing `{other}` is not itself expanded.
fn substitute_variables(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '{' {
            result.push(ch);
            continue;
        }
        let mut key = String::new();
        let mut found_close = false;
        for inner in chars.by_ref() {
            if inner == '}' {
                found_close = true;
                break;
            }
            key.push(inner);
        }
        if !found_close {
            result.push('{');
            result.push_str(&key);
            continue;
        }
        match variables.get(&key) {
            Some(value) => result.push_str(&shell_escape(value)),
            None => {
                result.push('{');
                result.push_str(&key);
                result.push('}');
            }
        }
    }
    result
}

/// One configured hook: a command template, the selector that decides
/// whether it fires, and its own timeout.
#[derive(Debug, Clone)]
pub struct HookSpec {
    pub name: String,
    pub command: String,
    pub timeout: Duration,
}

impl HookSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self { name: name.into(), command: command.into(), timeout: DEFAULT_HOOK_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HookResult {
    pub name: String,
    pub decision: HookDecision,
    pub stdout: String,
    pub stderr: String,
}

/// Run one hook to completion or timeout. Never returns `Err` for a
/// non-zero exit or timeout — those are reported as `HookDecision::Deny`
/// / `HookDecision::Error` in the result, per spec §7 "hook errors never
/// abort the lifecycle event that triggered them". `Err` is reserved for
/// failing to spawn the shell at all.
pub async fn run_hook(spec: &HookSpec, variables: &HashMap<String, String>) -> Result<HookResult, std::io::Error> {
    let expanded = substitute_variables(&spec.command, variables);

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&expanded).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();

    match timeout(spec.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(HookResult {
            name: spec.name.clone(),
            decision: decision_for_exit_code(output.status.code()),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            #[cfg(unix)]
            if let Some(pid) = pid {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
            Ok(HookResult {
                name: spec.name.clone(),
                decision: HookDecision::Error(format!("timed out after {:?}", spec.timeout)),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }
}
