//! Fuzz target for the AXON parser.
//!
//! Parsing any valid UTF-8 input should never panic: either we get a
//! `Program`, or an `AxonParseFailure` naming a position with line/column
//! both >= 1.

#![no_main]

use axon_dsl::{parse, AxonParseFailure};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        match parse(input) {
            Ok(_program) => {}
            Err(AxonParseFailure::Lex(err)) => {
                let position = err.position();
                assert!(position.line >= 1, "lex error line should be >= 1");
                assert!(position.column >= 1, "lex error column should be >= 1");
            }
            Err(AxonParseFailure::Parse(err)) => {
                assert!(err.position.line >= 1, "parse error line should be >= 1");
                assert!(err.position.column >= 1, "parse error column should be >= 1");
            }
        }
    }
});
