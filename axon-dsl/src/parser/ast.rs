//! Cognitive AST (§3). A tagged variant over the cognitive primitives —
//! nodes are named for what they declare (`PersonaDefinition`,
//! `ToolDefinition`, `Step::Probe`, ...), not for control-flow constructs.
//! Every node carries a `position` for diagnostics.

use axon_core::error::Position;
use axon_core::EffortLevel;

/// A parsed program: an ordered sequence of top-level declarations plus at
/// most one `run` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub declarations: Vec<Declaration>,
    pub run: Vec<RunStatement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Import(ImportDeclaration),
    Persona(PersonaDefinition),
    Context(ContextDefinition),
    Anchor(AnchorDefinition),
    Memory(MemoryDefinition),
    Tool(ToolDefinition),
    Type(TypeDefinition),
    Flow(FlowDefinition),
}

impl Declaration {
    pub fn position(&self) -> Position {
        match self {
            Declaration::Import(d) => d.position,
            Declaration::Persona(d) => d.position,
            Declaration::Context(d) => d.position,
            Declaration::Anchor(d) => d.position,
            Declaration::Memory(d) => d.position,
            Declaration::Tool(d) => d.position,
            Declaration::Type(d) => d.position,
            Declaration::Flow(d) => d.position,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Declaration::Import(_) => "",
            Declaration::Persona(d) => &d.name,
            Declaration::Context(d) => &d.name,
            Declaration::Anchor(d) => &d.name,
            Declaration::Memory(d) => &d.name,
            Declaration::Tool(d) => &d.name,
            Declaration::Type(d) => &d.name,
            Declaration::Flow(d) => &d.name,
        }
    }

    /// Declaration category, for symbol-table lookups (§3's "flat mapping
    /// one per declaration category").
    pub fn category(&self) -> &'static str {
        match self {
            Declaration::Import(_) => "import",
            Declaration::Persona(_) => "persona",
            Declaration::Context(_) => "context",
            Declaration::Anchor(_) => "anchor",
            Declaration::Memory(_) => "memory",
            Declaration::Tool(_) => "tool",
            Declaration::Type(_) => "type",
            Declaration::Flow(_) => "flow",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDeclaration {
    pub path: Vec<String>,
    pub names: Option<Vec<String>>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Precise,
    Friendly,
    Technical,
    Conversational,
    Formal,
    Creative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonaDefinition {
    pub name: String,
    pub domain: Vec<String>,
    pub tone: Option<Tone>,
    pub confidence_threshold: Option<f64>,
    pub cite_sources: Option<bool>,
    pub refuse_if: Vec<String>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    Session,
    Persistent,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Shallow,
    Standard,
    Deep,
    Exhaustive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextDefinition {
    pub name: String,
    pub memory: Option<MemoryScope>,
    pub language: Option<String>,
    pub depth: Option<Depth>,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub cite_sources: Option<bool>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationStrategy {
    Raise(String),
    Warn,
    Log,
    Escalate,
    Fallback(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorDefinition {
    pub name: String,
    pub require: Option<String>,
    pub reject: Vec<String>,
    pub enforce: Option<String>,
    pub confidence_floor: Option<f64>,
    pub unknown_response: Option<String>,
    pub on_violation: Option<ViolationStrategy>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStoreKind {
    Session,
    Persistent,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalKind {
    Semantic,
    Exact,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decay {
    None,
    Daily,
    Weekly,
    Custom { amount: i64, unit: crate::lexer::DurationUnit },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDefinition {
    pub name: String,
    pub store: Option<MemoryStoreKind>,
    pub backend: Option<String>,
    pub retrieval: Option<RetrievalKind>,
    pub decay: Option<Decay>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    RecentDays(i64),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub provider: Option<String>,
    pub max_results: Option<i64>,
    pub filter: Option<FilterSpec>,
    pub timeout: Option<(i64, crate::lexer::DurationUnit)>,
    pub runtime: Option<String>,
    pub sandbox: Option<bool>,
    pub position: Position,
}

/// A reference to a type as written in source; resolved to a `SemanticType`
/// by the checker.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    Optional(Box<TypeRef>),
}

/// Structural-only predicate tree for `where` clauses (§4.3): emptiness,
/// set-membership over a finite set, numeric comparison against a literal,
/// and conjunction. Anything requiring inference is rejected at parse time
/// by simply not being representable here.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Empty(String),
    MemberOf(String, Vec<String>),
    Compare(String, crate::lexer::CompareOp, f64),
    And(Box<Predicate>, Box<Predicate>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub type_ref: TypeRef,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub range: Option<(f64, f64)>,
    pub predicate: Option<Predicate>,
    pub fields: Vec<FieldDef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowDefinition {
    pub name: String,
    pub params: Vec<ParamDef>,
    pub return_type: Option<TypeRef>,
    pub steps: Vec<Step>,
    pub position: Position,
}

/// A reference to a prior step's output: `Step.output` (§3, §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct StepRef {
    pub step_name: String,
    pub field: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Duration(i64, crate::lexer::DurationUnit),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputExpr {
    Literal(Literal),
    StepOutput(StepRef),
    Identifier(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Duration(i64, crate::lexer::DurationUnit),
    List(Vec<ConfigValue>),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffSpec {
    None,
    Linear(u32),
    Exponential(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExhaustionStrategy {
    Raise(String),
    Escalate,
    Fallback(ConfigValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineConfig {
    pub max_attempts: u32,
    pub backoff: BackoffSpec,
    pub pass_failure_context: bool,
    pub on_exhaustion: ExhaustionStrategy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepDef {
    pub name: String,
    pub ask: Option<String>,
    pub inputs: Vec<InputExpr>,
    pub output: Option<TypeRef>,
    pub refine: Option<RefineConfig>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeStep {
    pub name: String,
    pub target: InputExpr,
    pub fields: Vec<String>,
    pub output: Option<TypeRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasonStep {
    pub name: String,
    pub config: Vec<(String, ConfigValue)>,
    pub output: Option<TypeRef>,
    pub refine: Option<RefineConfig>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidateStep {
    pub name: String,
    pub expr: InputExpr,
    pub schema: Option<TypeRef>,
    pub rules: Vec<String>,
    pub refine: Option<RefineConfig>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineStepNode {
    pub name: String,
    pub target: StepRef,
    pub config: RefineConfig,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeaveStep {
    pub name: String,
    pub sources: Vec<InputExpr>,
    pub target: Option<TypeRef>,
    pub config: Vec<(String, ConfigValue)>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UseToolStep {
    pub name: String,
    pub tool: String,
    pub argument: InputExpr,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RememberStep {
    pub name: String,
    pub expr: InputExpr,
    pub memory: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecallStep {
    pub name: String,
    pub query: InputExpr,
    pub memory: String,
    pub output: Option<TypeRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: InputExpr,
    pub op: crate::lexer::CompareOp,
    pub right: InputExpr,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStep {
    pub name: String,
    pub condition: Condition,
    pub then_step: Box<Step>,
    pub else_step: Option<Box<Step>>,
    pub position: Position,
}

/// Tagged choice on the leading keyword (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Step(StepDef),
    Probe(ProbeStep),
    Reason(ReasonStep),
    Validate(ValidateStep),
    Refine(RefineStepNode),
    Weave(WeaveStep),
    UseTool(UseToolStep),
    Remember(RememberStep),
    Recall(RecallStep),
    If(IfStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Step(s) => &s.name,
            Step::Probe(s) => &s.name,
            Step::Reason(s) => &s.name,
            Step::Validate(s) => &s.name,
            Step::Refine(s) => &s.name,
            Step::Weave(s) => &s.name,
            Step::UseTool(s) => &s.name,
            Step::Remember(s) => &s.name,
            Step::Recall(s) => &s.name,
            Step::If(s) => &s.name,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Step::Step(s) => s.position,
            Step::Probe(s) => s.position,
            Step::Reason(s) => s.position,
            Step::Validate(s) => s.position,
            Step::Refine(s) => s.position,
            Step::Weave(s) => s.position,
            Step::UseTool(s) => s.position,
            Step::Remember(s) => s.position,
            Step::Recall(s) => s.position,
            Step::If(s) => s.position,
        }
    }

    /// The declared output type, where this kind of step declares one.
    pub fn output(&self) -> Option<&TypeRef> {
        match self {
            Step::Step(s) => s.output.as_ref(),
            Step::Probe(s) => s.output.as_ref(),
            Step::Reason(s) => s.output.as_ref(),
            Step::Recall(s) => s.output.as_ref(),
            Step::Weave(s) => s.target.as_ref(),
            _ => None,
        }
    }

    /// Every `Step.output` reference this step's inputs depend on (used by
    /// the IR generator to build `depends_on` edges).
    pub fn referenced_steps(&self) -> Vec<&StepRef> {
        let mut refs = Vec::new();
        let mut visit = |expr: &InputExpr, refs: &mut Vec<&StepRef>| {
            if let InputExpr::StepOutput(step_ref) = expr {
                refs.push(step_ref);
            }
        };
        match self {
            Step::Step(s) => s.inputs.iter().for_each(|e| visit(e, &mut refs)),
            Step::Probe(s) => visit(&s.target, &mut refs),
            Step::Reason(_) => {}
            Step::Validate(s) => visit(&s.expr, &mut refs),
            Step::Refine(s) => refs.push(&s.target),
            Step::Weave(s) => s.sources.iter().for_each(|e| visit(e, &mut refs)),
            Step::UseTool(s) => visit(&s.argument, &mut refs),
            Step::Remember(s) => visit(&s.expr, &mut refs),
            Step::Recall(s) => visit(&s.query, &mut refs),
            Step::If(s) => {
                visit(&s.condition.left, &mut refs);
                visit(&s.condition.right, &mut refs);
                refs.extend(s.then_step.referenced_steps());
                if let Some(else_step) = &s.else_step {
                    refs.extend(else_step.referenced_steps());
                }
            }
        }
        refs
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureStrategy {
    Log,
    Retry(BackoffSpec),
    Escalate,
    RaiseNamed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStatement {
    pub flow: String,
    pub args: Vec<InputExpr>,
    pub persona: Option<String>,
    pub context: Option<String>,
    pub anchors: Vec<String>,
    pub on_failure: Option<FailureStrategy>,
    pub on_failure_error: Option<String>,
    pub output_to: Option<String>,
    pub effort: Option<EffortLevel>,
    pub position: Position,
}
