//! AXON DSL — lexer, parser, epistemic type checker and IR generator.
//!
//! ```text
//! AXON source (.axon file)
//!     ↓
//! Lexer (tokenize)
//!     ↓
//! Parser (build cognitive AST)
//!     ↓
//! Checker (epistemic type checking, diagnostics)
//!     ↓
//! IR generator (step-DAG, JSON-stable)
//! ```

pub mod checker;
pub mod ir;
pub mod lexer;
pub mod parser;

pub use checker::check;
pub use ir::{generate, ProgramIr};
pub use lexer::{CompareOp, DurationUnit, Keyword, Lexer, Span, Symbol, Token, TokenKind};
pub use parser::{parse, AxonParseFailure, Parser, Program};

use axon_core::error::{IrError, TypeError};

/// Front-to-back compile failure: the first stage (in pipeline order)
/// that did not succeed.
#[derive(Debug)]
pub enum CompileFailure {
    Parse(AxonParseFailure),
    Type(Vec<TypeError>),
    Ir(IrError),
}

/// Compile AXON source all the way to IR. Stops at the first failing
/// stage: a source that fails to parse is never type-checked, and a
/// program with type diagnostics is never lowered (§4's front-end
/// pipeline order).
pub fn compile(source: &str) -> Result<ProgramIr, CompileFailure> {
    let program = parse(source).map_err(CompileFailure::Parse)?;
    let diagnostics = check(&program);
    if !diagnostics.is_empty() {
        return Err(CompileFailure::Type(diagnostics));
    }
    generate(&program).map_err(CompileFailure::Ir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_minimal_program_end_to_end() {
        let source = r#"
            persona P { domain: ["support"] tone: precise }
            flow F() -> String { step S { ask: "hi" output: String } }
            run F() as P
        "#;
        let ir = compile(source).expect("minimal program should compile");
        assert_eq!(ir.entrypoint.flow, "F");
    }

    #[test]
    fn stops_at_type_errors_without_reaching_ir() {
        let source = r#"
            flow F() -> String {
                step A { ask: "x" input: [B.output] output: String }
                step B { ask: "y" output: String }
            }
            run F()
        "#;
        match compile(source) {
            Err(CompileFailure::Type(diags)) => assert!(!diags.is_empty()),
            other => panic!("expected a type-checking failure, got {:?}", other),
        }
    }
}
