//! Regex selector: a hook fires when its pattern matches either the tool
//! name or the stably-serialized payload (spec §4.9).

use regex::Regex;

/// `serde_json::Value`'s default object representation (no
/// `preserve_order` feature) is a `BTreeMap`, so two payloads with the
/// same keys/values always serialize identically regardless of
/// construction order — that's what makes matching against the
/// serialized form reproducible across calls.
pub fn stable_serialize(payload: &serde_json::Value) -> String {
    serde_json::to_string(payload).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct Selector {
    pattern: Regex,
}

impl Selector {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self { pattern: Regex::new(pattern)? })
    }

    pub fn matches(&self, tool_name: &str, payload: &serde_json::Value) -> bool {
        self.pattern.is_match(tool_name) || self.pattern.is_match(&stable_serialize(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_matches_tool_name() {
        let selector = Selector::new("^bash$").unwrap();
        assert!(selector.matches("bash", &json!({})));
        assert!(!selector.matches("edit", &json!({})));
    }

    #[test]
    fn test_matches_payload_content() {
        let selector = Selector::new("rm -rf").unwrap();
        assert!(selector.matches("bash", &json!({"command": "rm -rf /tmp/x"})));
        assert!(!selector.matches("bash", &json!({"command": "ls"})));
    }

    #[test]
    fn test_serialization_is_stable_across_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(stable_serialize(&a), stable_serialize(&b));
    }
}
