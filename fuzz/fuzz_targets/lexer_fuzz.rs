//! Fuzz target for the AXON lexer.
//!
//! Tokenizing any valid UTF-8 input should never panic: either we get a
//! token stream terminated by Eof, or a `LexError` naming the offending
//! position.

#![no_main]

use axon_dsl::{Lexer, TokenKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        match Lexer::new(input).tokenize() {
            Ok(tokens) => {
                assert!(!tokens.is_empty(), "tokenize should always produce at least Eof");
                assert_eq!(
                    tokens.last().unwrap().kind,
                    TokenKind::Eof,
                    "last token should always be Eof"
                );
                for token in &tokens {
                    assert!(token.span.start <= token.span.end, "span start should be <= end");
                    assert!(token.span.line >= 1, "line numbers should be >= 1");
                    assert!(token.span.column >= 1, "column numbers should be >= 1");
                }
            }
            Err(err) => {
                let position = err.position();
                assert!(position.line >= 1, "error line should be >= 1");
                assert!(position.column >= 1, "error column should be >= 1");
            }
        }
    }
});
