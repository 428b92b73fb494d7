//! Anchor enforcement (§4.8).
//!
//! Anchors are predicates, not prompts: `requires` (preconditions over
//! input context), `ensures`/`invariant` (postconditions over output), a
//! `confidence_floor`, and a declared `on_violation` strategy. Multiple
//! anchors compose by conjunction, collected as a
//! `ValidationIssue`/`ValidationResult`/`Severity` set — one
//! check-per-field with a named reason per failure, the same style
//! `RuntimeConfig::validate()` uses for its own fields.

use axon_dsl::ir::AnchorIr;
use serde_json::Value;

/// One anchor clause's failure, named so the executor can build an
/// `AnchorBreachError` without re-deriving the reason string.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorBreach {
    pub anchor: String,
    pub reason: String,
}

/// What to do with a breach, parsed from the IR's `on_violation` string
/// (`"raise <name>"`, `"warn"`, `"log"`, `"escalate"`, `"fallback(value)"`
/// — see `axon_dsl::ir::anchor_ir`).
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationAction {
    Raise(Option<String>),
    Warn,
    Log,
    Escalate,
    Fallback(String),
}

pub fn parse_on_violation(raw: &str) -> ViolationAction {
    let raw = raw.trim();
    if raw == "warn" {
        ViolationAction::Warn
    } else if raw == "log" {
        ViolationAction::Log
    } else if raw == "escalate" {
        ViolationAction::Escalate
    } else if let Some(name) = raw.strip_prefix("raise ") {
        ViolationAction::Raise(Some(name.trim().to_string()))
    } else if raw == "raise" {
        ViolationAction::Raise(None)
    } else if let Some(inner) = raw.strip_prefix("fallback(").and_then(|s| s.strip_suffix(')')) {
        ViolationAction::Fallback(inner.trim().to_string())
    } else {
        ViolationAction::Raise(None)
    }
}

/// Structural pre-execution gate: does `require` (a precondition tag) hold
/// against the persona's declared domain? Default is to allow — the hook
/// exists for anchors that restrict inputs, not every anchor uses it.
pub fn pre_execution_allows(anchor: &AnchorIr, persona_domain: &[String]) -> bool {
    match &anchor.require {
        None => true,
        Some(tag) => persona_domain.iter().any(|d| d == tag),
    }
}

/// Structural post-execution check for one anchor against one step's
/// output: reject-pattern matching, confidence floor, and the `enforce`
/// postcondition tag against the produced type.
pub fn post_execution_check(
    anchor: &AnchorIr,
    anchor_name: &str,
    output_type: &str,
    value: &Value,
    confidence: f64,
) -> Option<AnchorBreach> {
    if let Some(floor) = anchor.confidence_floor {
        if confidence < floor {
            return Some(AnchorBreach {
                anchor: anchor_name.to_string(),
                reason: format!("confidence {confidence} below floor {floor}"),
            });
        }
    }

    let haystack = value_to_haystack(value);
    for pattern in &anchor.reject {
        if haystack.to_lowercase().contains(&pattern.to_lowercase()) {
            return Some(AnchorBreach {
                anchor: anchor_name.to_string(),
                reason: format!("output matched reject pattern '{pattern}'"),
            });
        }
    }

    if let Some(enforce) = &anchor.enforce {
        if !output_type.eq_ignore_ascii_case(enforce) && !haystack.to_lowercase().contains(&enforce.to_lowercase()) {
            return Some(AnchorBreach {
                anchor: anchor_name.to_string(),
                reason: format!("output does not satisfy enforced postcondition '{enforce}'"),
            });
        }
    }

    None
}

fn value_to_haystack(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Conjunction over a bound anchor set (§4.8): every anchor must pass for
/// the step to pass. Returns every breach found, not just the first.
pub fn check_all(anchors: &[(String, AnchorIr)], output_type: &str, value: &Value, confidence: f64) -> Vec<AnchorBreach> {
    anchors
        .iter()
        .filter_map(|(name, anchor)| post_execution_check(anchor, name, output_type, value, confidence))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> AnchorIr {
        AnchorIr {
            require: None,
            reject: Vec::new(),
            enforce: None,
            confidence_floor: None,
            unknown_response: None,
            on_violation: None,
        }
    }

    #[test]
    fn confidence_below_floor_is_a_breach() {
        let mut a = anchor();
        a.confidence_floor = Some(0.9);
        let breach = post_execution_check(&a, "A", "String", &Value::String("x".into()), 0.5);
        assert!(breach.is_some());
    }

    #[test]
    fn confidence_at_floor_passes() {
        let mut a = anchor();
        a.confidence_floor = Some(0.9);
        let breach = post_execution_check(&a, "A", "String", &Value::String("x".into()), 0.9);
        assert!(breach.is_none());
    }

    #[test]
    fn reject_pattern_match_is_a_breach() {
        let mut a = anchor();
        a.reject = vec!["classified".to_string()];
        let breach = post_execution_check(&a, "A", "String", &Value::String("this is Classified info".into()), 1.0);
        assert!(breach.is_some());
    }

    #[test]
    fn no_clauses_always_passes() {
        let a = anchor();
        assert!(post_execution_check(&a, "A", "String", &Value::Null, 0.0).is_none());
    }

    #[test]
    fn pre_execution_requires_domain_membership() {
        let mut a = anchor();
        a.require = Some("medical".to_string());
        assert!(!pre_execution_allows(&a, &["support".to_string()]));
        assert!(pre_execution_allows(&a, &["medical".to_string()]));
    }

    #[test]
    fn conjunction_collects_every_breach() {
        let mut a1 = anchor();
        a1.confidence_floor = Some(0.9);
        let mut a2 = anchor();
        a2.reject = vec!["no".to_string()];
        let breaches = check_all(
            &[("A1".to_string(), a1), ("A2".to_string(), a2)],
            "String",
            &Value::String("no way".into()),
            0.1,
        );
        assert_eq!(breaches.len(), 2);
    }

    #[test]
    fn parses_on_violation_strategies() {
        assert_eq!(parse_on_violation("warn"), ViolationAction::Warn);
        assert_eq!(parse_on_violation("log"), ViolationAction::Log);
        assert_eq!(parse_on_violation("escalate"), ViolationAction::Escalate);
        assert_eq!(
            parse_on_violation("raise UnsafeOutput"),
            ViolationAction::Raise(Some("UnsafeOutput".to_string()))
        );
        assert_eq!(
            parse_on_violation("fallback(safe default)"),
            ViolationAction::Fallback("safe default".to_string())
        );
    }
}
