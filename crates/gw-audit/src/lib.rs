//! Dependency auditor & entropy analyzer (spec §2, SPEC_FULL.md §4.10).
//!
//! Consulted by the sandbox policy engine during template registration;
//! never on the request hot path.

use regex::Regex;
use std::sync::OnceLock;

/// What a command's argument vector looks like it invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManagerHint {
    Npm,
    Npx,
    Pip,
    GoInstall,
    None,
}

/// Heuristic detection of npm/npx/pip/go-install-style invocations, used by
/// the sandbox policy engine's rule 4 (profile `default` auto-sandbox hint).
pub fn classify_args(command: &str, args: &[String]) -> PackageManagerHint {
    let joined = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    if command.ends_with("npx") || joined.contains("npx ") {
        PackageManagerHint::Npx
    } else if command.ends_with("npm") || joined.starts_with("npm ") {
        PackageManagerHint::Npm
    } else if command.ends_with("pip") || command.ends_with("pip3") || joined.contains("pip install") {
        PackageManagerHint::Pip
    } else if joined.contains("go install") {
        PackageManagerHint::GoInstall
    } else {
        PackageManagerHint::None
    }
}

/// Shannon entropy in bits per character, used to distinguish live
/// credentials from placeholder values in template env.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let len = s.chars().count() as f64;
    let mut counts = std::collections::HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0u32) += 1;
    }
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(your[-_]?|my[-_]?|<|\{\{|xxx|changeme|todo|example)").unwrap()
    })
}

/// Flags env values that look like live credentials rather than
/// placeholders. A policy reason string, not an enforcement decision — the
/// sandbox engine surfaces this in its `reasons[]` output.
pub fn looks_like_secret(value: &str) -> bool {
    if value.len() < 12 {
        return false;
    }
    if placeholder_pattern().is_match(value) {
        return false;
    }
    shannon_entropy(value) >= 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_npx() {
        assert_eq!(
            classify_args("npx", &["-y".into(), "some-mcp-server".into()]),
            PackageManagerHint::Npx
        );
    }

    #[test]
    fn test_classify_npm() {
        assert_eq!(
            classify_args("npm", &["run".into(), "start".into()]),
            PackageManagerHint::Npm
        );
    }

    #[test]
    fn test_classify_pip() {
        assert_eq!(
            classify_args("pip3", &["install".into(), "foo".into()]),
            PackageManagerHint::Pip
        );
    }

    #[test]
    fn test_classify_none() {
        assert_eq!(
            classify_args("/usr/bin/my-server", &["--flag".into()]),
            PackageManagerHint::None
        );
    }

    #[test]
    fn test_entropy_empty_is_zero() {
        assert_eq!(shannon_entropy(""), 0.0);
    }

    #[test]
    fn test_entropy_repeated_char_is_zero() {
        assert_eq!(shannon_entropy("aaaaaaaa"), 0.0);
    }

    #[test]
    fn test_entropy_random_is_higher_than_repeated() {
        assert!(shannon_entropy("aK9$mZ2@qT7!") > shannon_entropy("aaaaaaaaaaaa"));
    }

    #[test]
    fn test_looks_like_secret_placeholder_rejected() {
        assert!(!looks_like_secret("your-api-key-here-1234"));
        assert!(!looks_like_secret("changeme_long_value_1"));
    }

    #[test]
    fn test_looks_like_secret_short_rejected() {
        assert!(!looks_like_secret("short"));
    }

    #[test]
    fn test_looks_like_secret_high_entropy_accepted() {
        assert!(looks_like_secret("sk-A1b2C3d4E5f6G7h8I9j0"));
    }
}
