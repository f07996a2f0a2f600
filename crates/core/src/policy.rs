use std::collections::BTreeSet;

/// Pure policy detector, per spec.md §4.4. A function of `(task.input,
/// task.approved_reasons)` returning an optional reason code: the
/// concatenation of every string value reachable from `input` (recursing
/// into nested objects and arrays) is scanned case-insensitively for any
/// pattern registered under a reason code not already cleared. First match
/// wins; reason codes are evaluated in registration order.
#[derive(Clone, Debug)]
pub struct PolicyPatternRegistry {
    entries: Vec<(String, Vec<String>)>,
}

impl PolicyPatternRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn register(mut self, reason_code: impl Into<String>, patterns: &[&str]) -> Self {
        self.entries
            .push((reason_code.into(), patterns.iter().map(|p| p.to_string()).collect()));
        self
    }

    /// The baseline registry shipped with the core: one rule,
    /// `external_send_requested`, covering outbound-transmission phrasing
    /// and bare URL prefixes.
    pub fn baseline() -> Self {
        Self::new().register(
            "external_send_requested",
            &["외부 전송", "external send", "메일 발송", "send externally", "http://", "https://"],
        )
    }

    pub fn detect(
        &self,
        input: &serde_json::Value,
        approved_reasons: &BTreeSet<String>,
    ) -> Option<String> {
        let joined = joined_string_values(input).to_lowercase();

        for (reason_code, patterns) in &self.entries {
            if approved_reasons.contains(reason_code) {
                continue;
            }
            if patterns.iter().any(|pattern| joined.contains(&pattern.to_lowercase())) {
                return Some(reason_code.clone());
            }
        }
        None
    }
}

impl Default for PolicyPatternRegistry {
    fn default() -> Self {
        Self::baseline()
    }
}

fn joined_string_values(input: &serde_json::Value) -> String {
    let mut collected = Vec::new();
    collect_scan_strings(input, &mut collected);
    collected.join(" ")
}

fn collect_scan_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Object(map) => {
            for nested in map.values() {
                collect_scan_strings(nested, out);
            }
        }
        serde_json::Value::Array(items) => {
            for nested in items {
                collect_scan_strings(nested, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::PolicyPatternRegistry;

    #[test]
    fn detects_url_prefix_in_input() {
        let registry = PolicyPatternRegistry::baseline();
        let input = json!({"notes": "please visit https://example.com for details"});
        let detected = registry.detect(&input, &BTreeSet::new());
        assert_eq!(detected.as_deref(), Some("external_send_requested"));
    }

    #[test]
    fn detects_localized_phrase_case_insensitively() {
        let registry = PolicyPatternRegistry::baseline();
        let input = json!({"notes": "요약 결과를 외부 전송 해주세요"});
        let detected = registry.detect(&input, &BTreeSet::new());
        assert_eq!(detected.as_deref(), Some("external_send_requested"));
    }

    #[test]
    fn already_approved_reason_is_not_re_detected() {
        let registry = PolicyPatternRegistry::baseline();
        let input = json!({"notes": "send externally to partner"});
        let mut approved = BTreeSet::new();
        approved.insert("external_send_requested".to_string());
        assert_eq!(registry.detect(&input, &approved), None);
    }

    #[test]
    fn clean_input_does_not_block() {
        let registry = PolicyPatternRegistry::baseline();
        let input = json!({"notes": "internal meeting notes only"});
        assert_eq!(registry.detect(&input, &BTreeSet::new()), None);
    }

    #[test]
    fn detects_phrase_nested_inside_arrays_and_objects() {
        let registry = PolicyPatternRegistry::baseline();
        let input = json!({
            "participants": ["alice", "bob"],
            "metadata": {"notes": ["internal", "please send externally after review"]}
        });
        let detected = registry.detect(&input, &BTreeSet::new());
        assert_eq!(detected.as_deref(), Some("external_send_requested"));
    }

    #[test]
    fn custom_registered_reason_codes_are_pluggable() {
        let registry = PolicyPatternRegistry::new()
            .register("contains_pii", &["ssn", "social security"]);
        let input = json!({"notes": "customer ssn on file"});
        assert_eq!(registry.detect(&input, &BTreeSet::new()).as_deref(), Some("contains_pii"));
    }
}
