//! Error taxonomy.
//!
//! Front-end stages (lexer, parser, checker, IR generator) accumulate typed
//! diagnostics and never stop at the first one. Runtime stages raise a
//! single error, since execution genuinely halts at the failing step.

use crate::identity::StepId;
use thiserror::Error;

/// Position of a single character in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Lexical errors. Every variant carries the exact position of the failure;
/// the lexer never recovers from one.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{found}' at {position}")]
    InvalidCharacter { found: char, position: Position },

    #[error("unterminated string literal starting at {position}")]
    UnterminatedString { position: Position },

    #[error("unterminated block comment starting at {position}")]
    UnterminatedBlockComment { position: Position },

    #[error("invalid escape sequence '\\{escape}' at {position}")]
    InvalidEscape { escape: char, position: Position },

    #[error("malformed numeric literal '{lexeme}' at {position}")]
    MalformedNumber { lexeme: String, position: Position },
}

impl LexError {
    pub fn position(&self) -> Position {
        match self {
            LexError::InvalidCharacter { position, .. }
            | LexError::UnterminatedString { position, .. }
            | LexError::UnterminatedBlockComment { position, .. }
            | LexError::InvalidEscape { position, .. }
            | LexError::MalformedNumber { position, .. } => *position,
        }
    }
}

/// Parse errors. Error recovery is intentionally absent: the parser
/// returns the first one it meets.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("parse error at {position}: expected {expected}, found {found}")]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    pub position: Position,
}

/// Type-checker diagnostics. The checker accumulates all of these and
/// returns them in source order rather than stopping at the first one.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TypeError {
    #[error("unknown type '{name}' at {position}")]
    UnknownType { name: String, position: Position },

    #[error("unknown symbol '{name}' (expected a {category}) at {position}")]
    UnknownSymbol {
        name: String,
        category: String,
        position: Position,
    },

    #[error("duplicate declaration of '{name}' at {position}, first declared at {first_position}")]
    DuplicateDeclaration {
        name: String,
        position: Position,
        first_position: Position,
    },

    #[error("cannot assign {from} into a slot expecting {into} at {position}")]
    IncompatibleAssignment {
        from: String,
        into: String,
        position: Position,
    },

    #[error("value {value} out of range [{lo}, {hi}] at {position}")]
    RangeViolation {
        value: f64,
        lo: f64,
        hi: f64,
        position: Position,
    },

    #[error("invalid range ({lo}..{hi}): lo must be <= hi, at {position}")]
    InvalidRange { lo: f64, hi: f64, position: Position },

    #[error("step '{step}' consumes an Uncertainty value at {position} but its declared output is not widened to Uncertainty")]
    UncertaintyPropagationRequired { step: String, position: Position },

    #[error("predicate in 'where' clause at {position} requires inference and cannot be checked structurally: {detail}")]
    InvalidPredicate { detail: String, position: Position },

    #[error("unknown field '{field}' in {block} block at {position}")]
    UnknownField {
        field: String,
        block: String,
        position: Position,
    },

    #[error("forward reference to step '{step}' at {position}: steps may only reference earlier steps")]
    ForwardReference { step: String, position: Position },

    #[error("empty domain list in persona at {position}")]
    EmptyDomain { position: Position },
}

impl TypeError {
    pub fn position(&self) -> Position {
        match self {
            TypeError::UnknownType { position, .. }
            | TypeError::UnknownSymbol { position, .. }
            | TypeError::DuplicateDeclaration { position, .. }
            | TypeError::IncompatibleAssignment { position, .. }
            | TypeError::RangeViolation { position, .. }
            | TypeError::InvalidRange { position, .. }
            | TypeError::UncertaintyPropagationRequired { position, .. }
            | TypeError::InvalidPredicate { position, .. }
            | TypeError::UnknownField { position, .. }
            | TypeError::ForwardReference { position, .. }
            | TypeError::EmptyDomain { position } => *position,
        }
    }
}

/// IR generation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IrError {
    #[error("cyclic dependency between steps '{step_a}' and '{step_b}' in flow '{flow}'")]
    CyclicDependency {
        flow: String,
        step_a: String,
        step_b: String,
    },

    #[error("program has no entrypoint: exactly one 'run' statement is required")]
    NoEntrypoint,

    #[error("program declares more than one 'run' statement; AXON is single-entry-point")]
    MultipleEntrypoints,

    #[error("IR version mismatch: expected major version {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Runtime validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationReason {
    #[error("epistemic type mismatch: value of type {actual} is not compatible with declared type {expected}")]
    TypeMismatch { expected: String, actual: String },

    #[error("value {value} is out of declared range [{lo}, {hi}]")]
    OutOfRange { value: f64, lo: f64, hi: f64 },

    #[error("required field '{field}' is missing from the output")]
    MissingField { field: String },
}

/// Config errors, named-field style.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid config field '{field}' = '{value}': {reason}")]
pub struct ConfigError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

/// The aggregated, crate-wide error type. Every runtime variant carries the
/// failing step's id (where one exists) and exposes a stable code string
/// matching the user-visible taxonomy in the specification.
#[derive(Debug, Clone, Error)]
pub enum AxonError {
    #[error("lexical error: {0}")]
    Lex(#[from] LexError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("AXON_001 validation failed for step {step}: {reason}")]
    Validation {
        step: StepId,
        reason: ValidationReason,
    },

    #[error("AXON_002 confidence {actual} below floor {floor} for step {step}")]
    Confidence {
        step: StepId,
        actual: f64,
        floor: f64,
    },

    #[error("AXON_003 anchor '{anchor}' breached for step {step}: {reason}")]
    AnchorBreach {
        step: StepId,
        anchor: String,
        reason: String,
    },

    #[error("AXON_004 refine exhausted for step {step} after {attempts} attempts")]
    RefineExhausted { step: StepId, attempts: u32 },

    #[error("AXON_005 runtime error in step {step}: {message}")]
    Runtime { step: StepId, message: String },

    #[error("AXON_006 timeout after {timeout_ms}ms in step {step}")]
    Timeout { step: StepId, timeout_ms: u64 },
}

impl AxonError {
    /// Stable, user-visible code string, independent of the `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            AxonError::Lex(_) => "AXON_LEX",
            AxonError::Parse(_) => "AXON_PARSE",
            AxonError::Type(_) => "AXON_TYPE",
            AxonError::Ir(_) => "AXON_IR",
            AxonError::Config(_) => "AXON_CONFIG",
            AxonError::Validation { .. } => "AXON_001",
            AxonError::Confidence { .. } => "AXON_002",
            AxonError::AnchorBreach { .. } => "AXON_003",
            AxonError::RefineExhausted { .. } => "AXON_004",
            AxonError::Runtime { .. } => "AXON_005",
            AxonError::Timeout { .. } => "AXON_006",
        }
    }

    /// The failing step's id, if the error originated at runtime against a
    /// specific step.
    pub fn step(&self) -> Option<StepId> {
        match self {
            AxonError::Validation { step, .. }
            | AxonError::Confidence { step, .. }
            | AxonError::AnchorBreach { step, .. }
            | AxonError::RefineExhausted { step, .. }
            | AxonError::Runtime { step, .. }
            | AxonError::Timeout { step, .. } => Some(*step),
            _ => None,
        }
    }
}

pub type AxonResult<T> = Result<T, AxonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn every_taxonomy_entry_has_its_documented_code() {
        let step = StepId::new(Uuid::nil());
        assert_eq!(
            AxonError::Validation {
                step,
                reason: ValidationReason::MissingField {
                    field: "x".into()
                }
            }
            .code(),
            "AXON_001"
        );
        assert_eq!(
            AxonError::Confidence {
                step,
                actual: 0.1,
                floor: 0.9
            }
            .code(),
            "AXON_002"
        );
        assert_eq!(
            AxonError::AnchorBreach {
                step,
                anchor: "a".into(),
                reason: "r".into()
            }
            .code(),
            "AXON_003"
        );
        assert_eq!(
            AxonError::RefineExhausted { step, attempts: 3 }.code(),
            "AXON_004"
        );
        assert_eq!(
            AxonError::Runtime {
                step,
                message: "boom".into()
            }
            .code(),
            "AXON_005"
        );
        assert_eq!(
            AxonError::Timeout {
                step,
                timeout_ms: 1000
            }
            .code(),
            "AXON_006"
        );
    }

    #[test]
    fn runtime_errors_carry_their_step_id() {
        let step = StepId::now_v7();
        let err = AxonError::Timeout {
            step,
            timeout_ms: 500,
        };
        assert_eq!(err.step(), Some(step));
    }

    #[test]
    fn front_end_errors_have_no_step() {
        let err: AxonError = IrError::NoEntrypoint.into();
        assert_eq!(err.step(), None);
    }
}
