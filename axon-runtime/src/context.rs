//! Runtime context (§3, §4.5 step 1).
//!
//! A plain struct the orchestration layer mutates in place, in the shape
//! of an `AgentPlan`/`AgentAction` mutable-state pair, with a
//! `snapshot()` used only for tracing, not for control flow.

use axon_core::model_client::ConfidenceSource;
use axon_dsl::ir::{AnchorIr, ContextIr, PersonaIr};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single step's committed output (§3's "per-step outputs" map).
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub output_type: String,
    pub value: Value,
    pub confidence: f64,
    pub confidence_source: ConfidenceSource,
}

/// Mutable state threaded across a flow invocation (§3, §5's "context
/// mutations are serialised: each step's outputs become visible atomically
/// to subsequent steps on success").
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub persona: Option<PersonaIr>,
    pub context: Option<ContextIr>,
    pub anchors: Vec<AnchorIr>,
    outputs: BTreeMap<String, StepOutput>,
    step_counter: u32,
}

impl RuntimeContext {
    pub fn new(persona: Option<PersonaIr>, context: Option<ContextIr>, anchors: Vec<AnchorIr>) -> Self {
        Self {
            persona,
            context,
            anchors,
            outputs: BTreeMap::new(),
            step_counter: 0,
        }
    }

    /// Commit a step's output. Called only after every post-execution
    /// check (anchor gate, semantic validation) has passed — on failure
    /// the context stays at its last committed state (§5).
    pub fn commit(&mut self, step_name: &str, output: StepOutput) {
        self.outputs.insert(step_name.to_string(), output);
        self.step_counter += 1;
    }

    pub fn output(&self, step_name: &str) -> Option<&StepOutput> {
        self.outputs.get(step_name)
    }

    pub fn step_counter(&self) -> u32 {
        self.step_counter
    }

    /// All confidence floors in scope from the persona and the bound
    /// anchor set — context carries no confidence field of its own (§6.1).
    pub fn floors_in_scope(&self) -> Vec<f64> {
        let mut floors: Vec<f64> = self
            .persona
            .as_ref()
            .and_then(|p| p.confidence_threshold)
            .into_iter()
            .collect();
        floors.extend(self.anchors.iter().filter_map(|a| a.confidence_floor));
        floors
    }

    /// Deep, immutable copy for tracing (§3's "snapshot operation"). Every
    /// field here is owned data, so a plain clone already satisfies that.
    pub fn snapshot(&self) -> RuntimeContext {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(value: Value) -> StepOutput {
        StepOutput {
            output_type: "String".to_string(),
            value,
            confidence: 0.8,
            confidence_source: ConfidenceSource::Backend,
        }
    }

    #[test]
    fn commit_increments_step_counter() {
        let mut ctx = RuntimeContext::new(None, None, Vec::new());
        assert_eq!(ctx.step_counter(), 0);
        ctx.commit("A", output(Value::String("x".to_string())));
        assert_eq!(ctx.step_counter(), 1);
        assert!(ctx.output("A").is_some());
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let mut ctx = RuntimeContext::new(None, None, Vec::new());
        ctx.commit("A", output(Value::String("x".to_string())));
        let snapshot = ctx.snapshot();
        ctx.commit("B", output(Value::String("y".to_string())));
        assert!(snapshot.output("B").is_none());
        assert!(ctx.output("B").is_some());
    }

    #[test]
    fn floors_in_scope_collects_persona_and_anchor_floors() {
        let persona = PersonaIr {
            domain: vec!["x".to_string()],
            tone: None,
            confidence_threshold: Some(0.6),
            cite_sources: None,
            refuse_if: Vec::new(),
            language: None,
            description: None,
        };
        let anchor = AnchorIr {
            require: None,
            reject: Vec::new(),
            enforce: None,
            confidence_floor: Some(0.9),
            unknown_response: None,
            on_violation: None,
        };
        let ctx = RuntimeContext::new(Some(persona), None, vec![anchor]);
        let mut floors = ctx.floors_in_scope();
        floors.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(floors, vec![0.6, 0.9]);
    }
}
