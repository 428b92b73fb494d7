//! Semantic validator (§4.6).
//!
//! Runs structurally against a produced value and its IR type declarations
//! — no inference. Mirrors the epistemic compatibility matrix in
//! `axon_dsl::checker` (re-derived here over the IR's string type names
//! rather than the checker's `TypeRef`, since the executor only ever sees
//! the lowered IR, not the AST), reporting one `ValidationResult`/
//! `ValidationIssue` per field check.

use axon_core::error::ValidationReason;
use axon_dsl::ir::TypeIr;
use serde_json::Value;
use std::collections::BTreeMap;

/// The fixed epistemic compatibility matrix (§4.3), operating on the IR's
/// plain type-name strings. Mirrors `axon_dsl::checker::is_assignable`
/// exactly; duplicated rather than shared because the two stages consume
/// different type representations (`TypeRef` vs a lowered string).
pub fn is_assignable(from: &str, into: &str) -> bool {
    if let Some(inner) = into.strip_prefix("Optional<").and_then(|s| s.strip_suffix('>')) {
        return is_assignable(from, inner);
    }
    match (
        from.strip_prefix("List<").and_then(|s| s.strip_suffix('>')),
        into.strip_prefix("List<").and_then(|s| s.strip_suffix('>')),
    ) {
        (Some(f), Some(t)) => is_assignable(f, t),
        (None, None) => named_assignable(from, into),
        _ => false,
    }
}

fn named_assignable(from: &str, into: &str) -> bool {
    if from == into || from == "Uncertainty" {
        return true;
    }
    matches!(
        (from, into),
        ("FactualClaim", "String")
            | ("FactualClaim", "CitedFact")
            | ("RiskScore", "Float")
            | ("ConfidenceScore", "Float")
            | ("SentimentScore", "Float")
    )
}

/// Range-constrained numeric check for a user-defined ranged type (§4.3's
/// "refinement checks"), given the produced value's numeric reading.
fn range_for(type_name: &str, types: &BTreeMap<String, TypeIr>) -> Option<(f64, f64)> {
    types.get(type_name).and_then(|t| t.range)
}

fn required_fields_for<'a>(type_name: &'a str, types: &'a BTreeMap<String, TypeIr>) -> Vec<&'a str> {
    types
        .get(type_name)
        .map(|t| {
            t.fields
                .iter()
                .filter(|(_, _, optional)| !optional)
                .map(|(name, _, _)| name.as_str())
                .collect()
        })
        .unwrap_or_default()
}

/// Run the structural checks of §4.6 (a)-(c). Confidence (d) is checked
/// separately by the executor, since it needs the floor resolved from
/// context (persona + anchors), not just the type declaration.
pub fn validate_structure(
    produced_type: &str,
    declared_type: &str,
    value: &Value,
    types: &BTreeMap<String, TypeIr>,
) -> Result<(), ValidationReason> {
    if !is_assignable(produced_type, declared_type) {
        return Err(ValidationReason::TypeMismatch {
            expected: declared_type.to_string(),
            actual: produced_type.to_string(),
        });
    }

    if let Some((lo, hi)) = range_for(declared_type, types) {
        if let Some(n) = value.as_f64() {
            if n < lo || n > hi {
                return Err(ValidationReason::OutOfRange { value: n, lo, hi });
            }
        }
    }

    for field in required_fields_for(declared_type, types) {
        let present = value.get(field).map(|v| !v.is_null()).unwrap_or(false);
        if !present {
            return Err(ValidationReason::MissingField {
                field: field.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types_with_range(name: &str, lo: f64, hi: f64) -> BTreeMap<String, TypeIr> {
        let mut map = BTreeMap::new();
        map.insert(
            name.to_string(),
            TypeIr {
                range: Some((lo, hi)),
                predicate: None,
                fields: Vec::new(),
            },
        );
        map
    }

    #[test]
    fn factual_claim_is_assignable_into_string() {
        assert!(is_assignable("FactualClaim", "String"));
    }

    #[test]
    fn opinion_is_not_assignable_into_factual_claim() {
        assert!(!is_assignable("Opinion", "FactualClaim"));
    }

    #[test]
    fn speculation_is_not_assignable_into_cited_fact() {
        assert!(!is_assignable("Speculation", "CitedFact"));
    }

    #[test]
    fn nominal_types_with_same_name_are_equal() {
        assert!(is_assignable("A", "A"));
        assert!(!is_assignable("A", "B"));
    }

    #[test]
    fn uncertainty_is_assignable_anywhere() {
        assert!(is_assignable("Uncertainty", "RiskScore"));
    }

    #[test]
    fn list_compatibility_recurses_into_inner_type() {
        assert!(is_assignable("List<FactualClaim>", "List<String>"));
        assert!(!is_assignable("List<Opinion>", "List<FactualClaim>"));
    }

    #[test]
    fn range_violation_is_reported() {
        let types = types_with_range("Age", 0.0, 120.0);
        let err = validate_structure("Age", "Age", &Value::from(150), &types).unwrap_err();
        assert!(matches!(err, ValidationReason::OutOfRange { .. }));
    }

    #[test]
    fn boundary_values_are_accepted() {
        let types = types_with_range("Age", 0.0, 120.0);
        assert!(validate_structure("Age", "Age", &Value::from(0), &types).is_ok());
        assert!(validate_structure("Age", "Age", &Value::from(120), &types).is_ok());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let mut types = BTreeMap::new();
        types.insert(
            "R".to_string(),
            TypeIr {
                range: None,
                predicate: None,
                fields: vec![("fact".to_string(), "FactualClaim".to_string(), false)],
            },
        );
        let err = validate_structure("R", "R", &serde_json::json!({}), &types).unwrap_err();
        assert!(matches!(err, ValidationReason::MissingField { field } if field == "fact"));
    }

    #[test]
    fn incompatible_type_is_reported_before_structural_checks() {
        let types = BTreeMap::new();
        let err = validate_structure("Opinion", "FactualClaim", &Value::Null, &types).unwrap_err();
        assert!(matches!(err, ValidationReason::TypeMismatch { .. }));
    }
}
