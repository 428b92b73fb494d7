//! AXON compile tracer — shows the pipeline stage by stage.
//!
//! Usage: cargo run --bin axon_trace_ir <source-file.axon>

use std::fs;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: axon_trace_ir <source-file.axon>");
        return ExitCode::FAILURE;
    }

    let path = &args[1];
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to read {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("=== SOURCE ===");
    println!("{source}");

    let program = match axon_dsl::parse(&source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("parse failed: {e:?}");
            return ExitCode::FAILURE;
        }
    };
    println!("=== AST ===");
    println!("{program:#?}");

    let diagnostics = axon_dsl::check(&program);
    println!("=== TYPE DIAGNOSTICS ({}) ===", diagnostics.len());
    for diag in &diagnostics {
        println!("{diag}");
    }
    if !diagnostics.is_empty() {
        return ExitCode::FAILURE;
    }

    let ir = match axon_dsl::generate(&program) {
        Ok(ir) => ir,
        Err(e) => {
            eprintln!("IR generation failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("=== IR ===");
    match serde_json::to_string_pretty(&ir) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialise IR: {e}"),
    }

    ExitCode::SUCCESS
}
