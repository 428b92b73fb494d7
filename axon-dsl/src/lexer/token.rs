//! Token kinds and source spans (§3, §4.1).

use std::fmt;

/// The closed set of AXON keywords (35), recognised by a final lookup
/// after an identifier has been lexed. Matching is case-sensitive: an
/// identifier that happens to match a keyword's letters under a different
/// case is a plain identifier, never reclassified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Persona,
    Context,
    Anchor,
    Memory,
    Tool,
    Type,
    Flow,
    Run,
    Import,
    Step,
    Probe,
    Reason,
    Validate,
    Refine,
    Weave,
    Use,
    Remember,
    Recall,
    If,
    Else,
    As,
    Within,
    ConstrainedBy,
    OnFailure,
    OnViolation,
    OnExhaustion,
    OutputTo,
    Effort,
    Where,
    Ask,
    Output,
    Input,
    Raise,
    Escalate,
    Fallback,
}

impl Keyword {
    /// Look up a keyword by its exact, case-sensitive source spelling.
    pub fn lookup(ident: &str) -> Option<Keyword> {
        Some(match ident {
            "persona" => Keyword::Persona,
            "context" => Keyword::Context,
            "anchor" => Keyword::Anchor,
            "memory" => Keyword::Memory,
            "tool" => Keyword::Tool,
            "type" => Keyword::Type,
            "flow" => Keyword::Flow,
            "run" => Keyword::Run,
            "import" => Keyword::Import,
            "step" => Keyword::Step,
            "probe" => Keyword::Probe,
            "reason" => Keyword::Reason,
            "validate" => Keyword::Validate,
            "refine" => Keyword::Refine,
            "weave" => Keyword::Weave,
            "use" => Keyword::Use,
            "remember" => Keyword::Remember,
            "recall" => Keyword::Recall,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "as" => Keyword::As,
            "within" => Keyword::Within,
            "constrained_by" => Keyword::ConstrainedBy,
            "on_failure" => Keyword::OnFailure,
            "on_violation" => Keyword::OnViolation,
            "on_exhaustion" => Keyword::OnExhaustion,
            "output_to" => Keyword::OutputTo,
            "effort" => Keyword::Effort,
            "where" => Keyword::Where,
            "ask" => Keyword::Ask,
            "output" => Keyword::Output,
            "input" => Keyword::Input,
            "raise" => Keyword::Raise,
            "escalate" => Keyword::Escalate,
            "fallback" => Keyword::Fallback,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Persona => "persona",
            Keyword::Context => "context",
            Keyword::Anchor => "anchor",
            Keyword::Memory => "memory",
            Keyword::Tool => "tool",
            Keyword::Type => "type",
            Keyword::Flow => "flow",
            Keyword::Run => "run",
            Keyword::Import => "import",
            Keyword::Step => "step",
            Keyword::Probe => "probe",
            Keyword::Reason => "reason",
            Keyword::Validate => "validate",
            Keyword::Refine => "refine",
            Keyword::Weave => "weave",
            Keyword::Use => "use",
            Keyword::Remember => "remember",
            Keyword::Recall => "recall",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::As => "as",
            Keyword::Within => "within",
            Keyword::ConstrainedBy => "constrained_by",
            Keyword::OnFailure => "on_failure",
            Keyword::OnViolation => "on_violation",
            Keyword::OnExhaustion => "on_exhaustion",
            Keyword::OutputTo => "output_to",
            Keyword::Effort => "effort",
            Keyword::Where => "where",
            Keyword::Ask => "ask",
            Keyword::Output => "output",
            Keyword::Input => "input",
            Keyword::Raise => "raise",
            Keyword::Escalate => "escalate",
            Keyword::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Multi- and single-character symbols (12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Question,
    Arrow,
}

impl Symbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::LBrace => "{",
            Symbol::RBrace => "}",
            Symbol::LParen => "(",
            Symbol::RParen => ")",
            Symbol::LBracket => "[",
            Symbol::RBracket => "]",
            Symbol::Comma => ",",
            Symbol::Colon => ":",
            Symbol::Dot => ".",
            Symbol::Semicolon => ";",
            Symbol::Question => "?",
            Symbol::Arrow => "->",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison operators (6), used only in `if` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::EqEq => "==",
            CompareOp::NotEq => "!=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed set of token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Identifier(String),
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    DurationLiteral { amount: i64, unit: DurationUnit },
    BooleanLiteral(bool),
    Symbol(Symbol),
    Compare(CompareOp),
    Eof,
}

/// Recognised duration suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    pub fn from_suffix(suffix: &str) -> Option<DurationUnit> {
        Some(match suffix {
            "ms" => DurationUnit::Milliseconds,
            "s" => DurationUnit::Seconds,
            "m" => DurationUnit::Minutes,
            "h" => DurationUnit::Hours,
            "d" => DurationUnit::Days,
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Keyword(k) => write!(f, "keyword '{}'", k),
            TokenKind::Identifier(s) => write!(f, "identifier '{}'", s),
            TokenKind::StringLiteral(s) => write!(f, "string \"{}\"", s),
            TokenKind::IntegerLiteral(n) => write!(f, "integer {}", n),
            TokenKind::FloatLiteral(n) => write!(f, "float {}", n),
            TokenKind::DurationLiteral { amount, unit } => {
                write!(f, "duration {}{:?}", amount, unit)
            }
            TokenKind::BooleanLiteral(b) => write!(f, "boolean {}", b),
            TokenKind::Symbol(s) => write!(f, "symbol '{}'", s),
            TokenKind::Compare(c) => write!(f, "comparison '{}'", c),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

/// A source position span. Position-only tokens (e.g. EOF) have `start ==
/// end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

/// A single lexed token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }
}
