//! Epistemic type checker (§4.3).
//!
//! Two passes over the parsed [`Program`]: a `NameRegistry`
//! duplicate-detection pass followed by a checking pass, in the shape of
//! a `DslCompiler::compile()` pipeline. The fixed epistemic compatibility
//! matrix below generalizes a `BeliefType::{Fact, Hypothesis,
//! Uncertainty}` split. Diagnostics are accumulated, never
//! short-circuited: a single call to [`check`] returns every
//! [`TypeError`] in source order.

use crate::parser::ast::*;
use axon_core::error::{Position, TypeError};
use std::collections::{HashMap, HashSet};

/// Built-in primitive types, always known to the checker.
const PRIMITIVE_TYPES: &[&str] = &["String", "Int", "Float", "Bool", "Duration"];

/// Built-in epistemic types (§3). `Uncertainty` is the infectious one.
const EPISTEMIC_TYPES: &[&str] = &[
    "FactualClaim",
    "Opinion",
    "Uncertainty",
    "Speculation",
    "CitedFact",
    "RiskScore",
    "ConfidenceScore",
    "SentimentScore",
];

/// Result of a successful check: nothing beyond "no diagnostics" is
/// needed by the IR generator, which works from the raw AST directly.
pub fn check(program: &Program) -> Vec<TypeError> {
    let mut checker = Checker::default();
    checker.run(program);
    checker.diagnostics
}

#[derive(Default)]
struct Checker {
    diagnostics: Vec<TypeError>,
    personas: HashMap<String, Position>,
    contexts: HashMap<String, Position>,
    anchors: HashMap<String, Position>,
    memories: HashMap<String, Position>,
    tools: HashMap<String, Position>,
    types: HashMap<String, TypeInfo>,
    flows: HashMap<String, Position>,
}

struct TypeInfo {
    position: Position,
    range: Option<(f64, f64)>,
    fields: Vec<FieldDef>,
}

impl Checker {
    fn run(&mut self, program: &Program) {
        // Pass one: register every declaration, catching duplicates and
        // the declaration-time errors that don't need cross-references
        // (empty domains, invalid ranges, unknown predicate fields).
        for decl in &program.declarations {
            self.register_declaration(decl);
        }

        // Pass two: walk flows and the run statement(s), resolving every
        // cross-reference against the tables built in pass one.
        for decl in &program.declarations {
            if let Declaration::Flow(flow) = decl {
                self.check_flow(flow);
            }
        }
        for run in &program.run {
            self.check_run(run);
        }
    }

    fn register_declaration(&mut self, decl: &Declaration) {
        match decl {
            Declaration::Import(_) => {}
            Declaration::Persona(p) => {
                self.register(CategoryTable::Persona, &p.name, p.position);
                if p.domain.is_empty() {
                    self.diagnostics.push(TypeError::EmptyDomain { position: p.position });
                }
                if let Some(threshold) = p.confidence_threshold {
                    self.check_unit_range(threshold, p.position);
                }
            }
            Declaration::Context(c) => {
                self.register(CategoryTable::Context, &c.name, c.position);
                if let Some(temperature) = c.temperature {
                    self.check_unit_range(temperature, c.position);
                }
            }
            Declaration::Anchor(a) => {
                self.register(CategoryTable::Anchor, &a.name, a.position);
                if let Some(floor) = a.confidence_floor {
                    self.check_unit_range(floor, a.position);
                }
            }
            Declaration::Memory(m) => self.register(CategoryTable::Memory, &m.name, m.position),
            Declaration::Tool(t) => self.register(CategoryTable::Tool, &t.name, t.position),
            Declaration::Flow(f) => self.register(CategoryTable::Flow, &f.name, f.position),
            Declaration::Type(t) => {
                if let Some((lo, hi)) = t.range {
                    if lo > hi {
                        self.diagnostics.push(TypeError::InvalidRange {
                            lo,
                            hi,
                            position: t.position,
                        });
                    }
                }
                if let Some(existing) = self.types.get(&t.name) {
                    self.diagnostics.push(TypeError::DuplicateDeclaration {
                        name: t.name.clone(),
                        position: t.position,
                        first_position: existing.position,
                    });
                } else {
                    self.types.insert(
                        t.name.clone(),
                        TypeInfo {
                            position: t.position,
                            range: t.range,
                            fields: t.fields.clone(),
                        },
                    );
                }
                if let Some(predicate) = &t.predicate {
                    self.check_predicate(predicate, t);
                }
            }
        }
    }

    fn register(&mut self, table: CategoryTable, name: &str, position: Position) {
        let map = match table {
            CategoryTable::Persona => &mut self.personas,
            CategoryTable::Context => &mut self.contexts,
            CategoryTable::Anchor => &mut self.anchors,
            CategoryTable::Memory => &mut self.memories,
            CategoryTable::Tool => &mut self.tools,
            CategoryTable::Flow => &mut self.flows,
        };
        if let Some(first_position) = map.get(name) {
            self.diagnostics.push(TypeError::DuplicateDeclaration {
                name: name.to_string(),
                position,
                first_position: *first_position,
            });
        } else {
            map.insert(name.to_string(), position);
        }
    }

    /// `where` predicates are structural-only by construction (the parser
    /// cannot build anything else), but field references inside them must
    /// still name a declared field of the type they decorate.
    fn check_predicate(&mut self, predicate: &Predicate, owner: &TypeDefinition) {
        match predicate {
            Predicate::Empty(field) | Predicate::Compare(field, _, _) => {
                self.check_predicate_field(field, owner);
            }
            Predicate::MemberOf(field, _) => self.check_predicate_field(field, owner),
            Predicate::And(left, right) => {
                self.check_predicate(left, owner);
                self.check_predicate(right, owner);
            }
        }
    }

    fn check_predicate_field(&mut self, field: &str, owner: &TypeDefinition) {
        if owner.fields.is_empty() {
            // A range-only or opaque type has nothing to validate a field
            // name against; the predicate refers to the base value itself.
            return;
        }
        if !owner.fields.iter().any(|f| f.name == field) {
            self.diagnostics.push(TypeError::UnknownField {
                field: field.to_string(),
                block: format!("type '{}' where clause", owner.name),
                position: owner.position,
            });
        }
    }

    /// Confidence thresholds, floors, and temperatures all share the
    /// `0.0..=1.0` domain (§6.1); boundary values are accepted.
    fn check_unit_range(&mut self, value: f64, position: Position) {
        if !(0.0..=1.0).contains(&value) {
            self.diagnostics.push(TypeError::RangeViolation {
                value,
                lo: 0.0,
                hi: 1.0,
                position,
            });
        }
    }

    fn type_known(&self, type_ref: &TypeRef) -> bool {
        match type_ref {
            TypeRef::Named(name) => {
                PRIMITIVE_TYPES.contains(&name.as_str())
                    || EPISTEMIC_TYPES.contains(&name.as_str())
                    || self.types.contains_key(name)
            }
            TypeRef::List(inner) | TypeRef::Optional(inner) => self.type_known(inner),
        }
    }

    fn check_type_ref(&mut self, type_ref: &TypeRef, position: Position) {
        match type_ref {
            TypeRef::Named(name) => {
                if !self.type_known(type_ref) {
                    self.diagnostics.push(TypeError::UnknownType {
                        name: name.clone(),
                        position,
                    });
                }
            }
            TypeRef::List(inner) | TypeRef::Optional(inner) => self.check_type_ref(inner, position),
        }
    }

    fn check_flow(&mut self, flow: &FlowDefinition) {
        for param in &flow.params {
            self.check_type_ref(&param.type_ref, flow.position);
            if contains_uncertainty(&param.type_ref) {
                self.diagnostics.push(TypeError::IncompatibleAssignment {
                    from: "Uncertainty".to_string(),
                    into: format!("parameter '{}' (parameter position)", param.name),
                    position: flow.position,
                });
            }
        }
        if let Some(return_type) = &flow.return_type {
            self.check_type_ref(return_type, flow.position);
            if contains_uncertainty(return_type) {
                self.diagnostics.push(TypeError::IncompatibleAssignment {
                    from: "Uncertainty".to_string(),
                    into: "return type".to_string(),
                    position: flow.position,
                });
            }
        }

        // step name -> (position, output type if any, whether it consumed
        // an Uncertainty-typed input and so widens).
        let mut seen_steps: HashMap<String, StepInfo> = HashMap::new();
        for step in &flow.steps {
            self.check_step(step, &mut seen_steps);
        }
    }

    fn check_step(&mut self, step: &Step, seen_steps: &mut HashMap<String, StepInfo>) {
        let position = step.position();

        // `If`'s `referenced_steps()` recurses into its then/else branches;
        // those are resolved separately below by recursing `check_step`
        // itself, so only the condition's own references are resolved
        // here to avoid reporting every nested-branch diagnostic twice.
        let mut consumes_uncertainty = false;
        if let Step::If(s) = step {
            consumes_uncertainty |= self.resolve_input_expr(&s.condition.left, seen_steps);
            consumes_uncertainty |= self.resolve_input_expr(&s.condition.right, seen_steps);
        } else {
            for step_ref in step.referenced_steps() {
                consumes_uncertainty |= self.resolve_step_ref(step_ref, seen_steps);
            }
        }

        match step {
            Step::UseTool(s) => {
                if !self.tools.contains_key(&s.tool) {
                    self.diagnostics.push(TypeError::UnknownSymbol {
                        name: s.tool.clone(),
                        category: "tool".to_string(),
                        position: s.position,
                    });
                }
            }
            Step::Remember(s) => self.check_memory_ref(&s.memory, s.position),
            Step::Recall(s) => self.check_memory_ref(&s.memory, s.position),
            Step::Validate(s) => {
                if let Some(schema) = &s.schema {
                    self.check_type_ref(schema, s.position);
                }
            }
            Step::If(s) => {
                let mut nested = seen_steps.clone();
                self.check_step(&s.then_step, &mut nested);
                if let Some(else_step) = &s.else_step {
                    self.check_step(else_step, &mut nested);
                }
            }
            Step::Weave(s) => self.check_weave_step(s, seen_steps),
            _ => {}
        }

        if let Some(output) = step.output() {
            self.check_type_ref(output, position);
            let widened = contains_uncertainty(output);
            if consumes_uncertainty && !widened {
                self.diagnostics.push(TypeError::UncertaintyPropagationRequired {
                    step: step.name().to_string(),
                    position,
                });
            }
        }

        seen_steps.insert(
            step.name().to_string(),
            StepInfo {
                position,
                output: step.output().cloned(),
                is_uncertain: consumes_uncertainty || step.output().map(contains_uncertainty).unwrap_or(false),
            },
        );
    }

    /// Resolve a `Step.field` reference against steps already seen in
    /// this flow; forward references are a hard error (§4.3).  Returns
    /// whether the resolved step's output is (or widens to) `Uncertainty`.
    fn resolve_step_ref(&mut self, step_ref: &StepRef, seen_steps: &HashMap<String, StepInfo>) -> bool {
        match seen_steps.get(&step_ref.step_name) {
            Some(info) => info.is_uncertain,
            None => {
                self.diagnostics.push(TypeError::ForwardReference {
                    step: step_ref.step_name.clone(),
                    position: step_ref.position,
                });
                false
            }
        }
    }

    fn resolve_input_expr(&mut self, expr: &InputExpr, seen_steps: &HashMap<String, StepInfo>) -> bool {
        match expr {
            InputExpr::StepOutput(step_ref) => self.resolve_step_ref(step_ref, seen_steps),
            InputExpr::Literal(_) | InputExpr::Identifier(_) => false,
        }
    }

    /// A `weave` step's `sources` line up positionally with its `target`
    /// struct's declared fields (§4.2). For each pairing whose source is a
    /// `Step.output` reference, the source step's declared output type must
    /// be assignable into the field's declared type under the epistemic
    /// compatibility matrix (§4.3) — this is what makes an `Opinion`
    /// assigned into a `FactualClaim` field an `IncompatibleAssignment`
    /// rather than a silent pass.
    fn check_weave_step(&mut self, step: &WeaveStep, seen_steps: &HashMap<String, StepInfo>) {
        let target_name = match &step.target {
            Some(TypeRef::Named(name)) => name.clone(),
            _ => return,
        };
        let fields = match self.types.get(&target_name) {
            Some(info) if !info.fields.is_empty() => info.fields.clone(),
            _ => return,
        };
        for (field, source) in fields.iter().zip(step.sources.iter()) {
            let step_ref = match source {
                InputExpr::StepOutput(step_ref) => step_ref,
                _ => continue,
            };
            let source_type = match seen_steps.get(&step_ref.step_name).and_then(|info| info.output.as_ref()) {
                Some(output) => output,
                None => continue,
            };
            if !is_assignable(source_type, &field.type_ref) {
                self.diagnostics.push(TypeError::IncompatibleAssignment {
                    from: type_ref_label(source_type),
                    into: format!("field '{}' of type '{}'", field.name, target_name),
                    position: step.position,
                });
            }
        }
    }

    fn check_memory_ref(&mut self, name: &str, position: Position) {
        if !self.memories.contains_key(name) {
            self.diagnostics.push(TypeError::UnknownSymbol {
                name: name.to_string(),
                category: "memory".to_string(),
                position,
            });
        }
    }

    fn check_run(&mut self, run: &RunStatement) {
        if !self.flows.contains_key(&run.flow) {
            self.diagnostics.push(TypeError::UnknownSymbol {
                name: run.flow.clone(),
                category: "flow".to_string(),
                position: run.position,
            });
        }
        if let Some(persona) = &run.persona {
            if !self.personas.contains_key(persona) {
                self.diagnostics.push(TypeError::UnknownSymbol {
                    name: persona.clone(),
                    category: "persona".to_string(),
                    position: run.position,
                });
            }
        }
        if let Some(context) = &run.context {
            if !self.contexts.contains_key(context) {
                self.diagnostics.push(TypeError::UnknownSymbol {
                    name: context.clone(),
                    category: "context".to_string(),
                    position: run.position,
                });
            }
        }
        for anchor in &run.anchors {
            if !self.anchors.contains_key(anchor) {
                self.diagnostics.push(TypeError::UnknownSymbol {
                    name: anchor.clone(),
                    category: "anchor".to_string(),
                    position: run.position,
                });
            }
        }
    }
}

#[derive(Clone)]
struct StepInfo {
    #[allow(dead_code)]
    position: Position,
    output: Option<TypeRef>,
    is_uncertain: bool,
}

/// Human-readable label for a diagnostic's `from`/`into` fields.
fn type_ref_label(type_ref: &TypeRef) -> String {
    match type_ref {
        TypeRef::Named(name) => name.clone(),
        TypeRef::List(inner) => format!("List<{}>", type_ref_label(inner)),
        TypeRef::Optional(inner) => format!("Option<{}>", type_ref_label(inner)),
    }
}

enum CategoryTable {
    Persona,
    Context,
    Anchor,
    Memory,
    Tool,
    Flow,
}

/// `true` if `type_ref` is exactly `Uncertainty` or a list of it — the two
/// shapes the checker treats as "already widened" (§9's resolved open
/// question on `Uncertainty` inside `List<T>`).
fn contains_uncertainty(type_ref: &TypeRef) -> bool {
    match type_ref {
        TypeRef::Named(name) => name == "Uncertainty",
        TypeRef::List(inner) | TypeRef::Optional(inner) => contains_uncertainty(inner),
    }
}

/// The fixed epistemic compatibility matrix (§4.3). `Uncertainty` is
/// assignable into any slot; user-defined nominal types compare by name
/// only, never structurally.
pub fn is_assignable(from: &TypeRef, into: &TypeRef) -> bool {
    match (from, into) {
        (TypeRef::Optional(f), TypeRef::Optional(t)) => is_assignable(f, t),
        (f, TypeRef::Optional(t)) => is_assignable(f, t),
        (TypeRef::List(f), TypeRef::List(t)) => is_assignable(f, t),
        (TypeRef::Named(a), TypeRef::Named(b)) => named_assignable(a, b),
        _ => false,
    }
}

fn named_assignable(from: &str, into: &str) -> bool {
    if from == into {
        return true;
    }
    if from == "Uncertainty" {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use proptest::prelude::*;

    fn checked(source: &str) -> Vec<TypeError> {
        let program = parse(source).expect("fixture should parse");
        check(&program)
    }

    #[test]
    fn minimal_compile_scenario_has_no_diagnostics() {
        let source = r#"
            persona P { domain: ["x"] tone: precise }
            flow F() -> String { step S { ask: "hi" output: String } }
            run F() as P
        "#;
        assert!(checked(source).is_empty());
    }

    #[test]
    fn empty_persona_domain_is_a_diagnostic() {
        let source = r#"persona P { domain: [] tone: precise }"#;
        let diags = checked(source);
        assert!(diags.iter().any(|d| matches!(d, TypeError::EmptyDomain { .. })));
    }

    #[test]
    fn confidence_threshold_boundary_values_are_accepted() {
        let source = r#"persona P { domain: ["x"] confidence_threshold: 0.0 }
                         persona Q { domain: ["x"] confidence_threshold: 1.0 }"#;
        assert!(checked(source).is_empty());
    }

    #[test]
    fn confidence_threshold_out_of_range_is_a_diagnostic() {
        let source = r#"persona P { domain: ["x"] confidence_threshold: 1.5 }"#;
        let diags = checked(source);
        assert!(diags.iter().any(|d| matches!(d, TypeError::RangeViolation { .. })));
    }

    #[test]
    fn invalid_range_is_a_diagnostic() {
        let source = "type Age(150..0)";
        let diags = checked(source);
        assert!(diags.iter().any(|d| matches!(d, TypeError::InvalidRange { .. })));
    }

    #[test]
    fn duplicate_persona_is_a_diagnostic() {
        let source = r#"
            persona P { domain: ["x"] }
            persona P { domain: ["y"] }
        "#;
        let diags = checked(source);
        assert!(diags.iter().any(|d| matches!(d, TypeError::DuplicateDeclaration { .. })));
    }

    #[test]
    fn forward_reference_is_a_diagnostic() {
        let source = r#"
            flow F() -> String {
                step A { ask: "x" input: [B.output] output: String }
                step B { ask: "y" output: String }
            }
        "#;
        let diags = checked(source);
        assert!(diags.iter().any(|d| matches!(d, TypeError::ForwardReference { .. })));
    }

    #[test]
    fn unknown_tool_reference_is_a_diagnostic() {
        let source = r#"
            flow F() -> String {
                use U { tool: Missing argument: "q" }
            }
        "#;
        let diags = checked(source);
        assert!(diags.iter().any(|d| matches!(d, TypeError::UnknownSymbol { category, .. } if category == "tool")));
    }

    #[test]
    fn uncertainty_must_propagate_to_declared_output() {
        let source = r#"
            flow F() -> String {
                step A { ask: "x" output: Uncertainty }
                step B { ask: "y" input: [A.output] output: String }
            }
        "#;
        let diags = checked(source);
        assert!(diags
            .iter()
            .any(|d| matches!(d, TypeError::UncertaintyPropagationRequired { step, .. } if step == "B")));
    }

    #[test]
    fn uncertainty_widened_list_is_accepted() {
        let source = r#"
            flow F() -> String {
                step A { ask: "x" output: Uncertainty }
                step B { ask: "y" input: [A.output] output: List<Uncertainty> }
            }
        "#;
        assert!(checked(source).is_empty());
    }

    #[test]
    fn uncertainty_in_parameter_position_is_rejected() {
        let source = "flow F(x: Uncertainty) -> String { }";
        let diags = checked(source);
        assert!(diags.iter().any(|d| matches!(d, TypeError::IncompatibleAssignment { .. })));
    }

    #[test]
    fn epistemic_matrix_allows_factual_claim_into_string() {
        assert!(is_assignable(
            &TypeRef::Named("FactualClaim".to_string()),
            &TypeRef::Named("String".to_string())
        ));
    }

    #[test]
    fn epistemic_matrix_rejects_opinion_into_factual_claim() {
        assert!(!is_assignable(
            &TypeRef::Named("Opinion".to_string()),
            &TypeRef::Named("FactualClaim".to_string())
        ));
    }

    #[test]
    fn epistemic_matrix_rejects_speculation_into_cited_fact() {
        assert!(!is_assignable(
            &TypeRef::Named("Speculation".to_string()),
            &TypeRef::Named("CitedFact".to_string())
        ));
    }

    #[test]
    fn nominal_types_with_identical_structure_are_not_equal() {
        let a = TypeRef::Named("A".to_string());
        let b = TypeRef::Named("B".to_string());
        assert!(!is_assignable(&a, &b));
        assert!(!is_assignable(&b, &a));
    }

    #[test]
    fn uncertainty_is_assignable_into_any_slot() {
        assert!(is_assignable(
            &TypeRef::Named("Uncertainty".to_string()),
            &TypeRef::Named("RiskScore".to_string())
        ));
    }

    #[test]
    fn opinion_woven_into_a_factual_claim_field_is_a_diagnostic() {
        let source = r#"
            type R { fact: FactualClaim }
            flow F() -> R {
                step A { ask: "what do you think?" output: Opinion }
                weave W { sources: [A.output] target: R }
            }
        "#;
        let diags = checked(source);
        assert!(diags
            .iter()
            .any(|d| matches!(d, TypeError::IncompatibleAssignment { into, .. } if into.contains("fact"))));
    }

    #[test]
    fn factual_claim_woven_into_a_factual_claim_field_is_accepted() {
        let source = r#"
            type R { fact: FactualClaim }
            flow F() -> R {
                step A { ask: "what happened?" output: FactualClaim }
                weave W { sources: [A.output] target: R }
            }
        "#;
        assert!(checked(source).is_empty());
    }

    #[test]
    fn unknown_type_reference_is_a_diagnostic() {
        let source = "flow F() -> Nonexistent { }";
        let diags = checked(source);
        assert!(diags.iter().any(|d| matches!(d, TypeError::UnknownType { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Two distinct nominal names are never assignable into each other,
        /// regardless of which letters they're made of — nominal typing
        /// never falls back to structural equivalence (§4.3).
        #[test]
        fn prop_distinct_nominal_types_are_never_interassignable(
            a in "[A-Z][a-zA-Z]{1,10}",
            b in "[A-Z][a-zA-Z]{1,10}",
        ) {
            prop_assume!(a != b);
            prop_assume!(a != "Uncertainty" && b != "Uncertainty");
            const KNOWN_PAIRS: &[(&str, &str)] = &[
                ("FactualClaim", "String"),
                ("FactualClaim", "CitedFact"),
                ("RiskScore", "Float"),
                ("ConfidenceScore", "Float"),
                ("SentimentScore", "Float"),
            ];
            prop_assume!(!KNOWN_PAIRS.contains(&(a.as_str(), b.as_str())));
            prop_assume!(!KNOWN_PAIRS.contains(&(b.as_str(), a.as_str())));

            prop_assert!(!is_assignable(&TypeRef::Named(a.clone()), &TypeRef::Named(b.clone())));
            prop_assert!(!is_assignable(&TypeRef::Named(b), &TypeRef::Named(a)));
        }

        /// `Uncertainty` widens into any named slot whatsoever (§4.3).
        #[test]
        fn prop_uncertainty_is_assignable_into_any_named_type(target in "[A-Z][a-zA-Z]{1,10}") {
            let from = TypeRef::Named("Uncertainty".to_string());
            prop_assert!(is_assignable(&from, &TypeRef::Named(target)));
        }

        /// An `Opinion` never satisfies a slot the matrix reserves for
        /// claims with a factual grounding, no matter how the field wrapping
        /// it is named — this is spec.md's Scenario 2 property generalized
        /// across both restricted targets.
        #[test]
        fn prop_opinion_never_assignable_into_a_restricted_factual_slot(
            into in prop_oneof![Just("FactualClaim".to_string()), Just("CitedFact".to_string())],
        ) {
            let from = TypeRef::Named("Opinion".to_string());
            prop_assert!(!is_assignable(&from, &TypeRef::Named(into)));
        }
    }
}
