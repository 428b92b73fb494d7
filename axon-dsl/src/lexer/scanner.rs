//! Hand-written single-pass lexer (§4.1).
//!
//! A `Lexer<'a>` over `Peekable<CharIndices>` with
//! `peek_char`/`advance`/`scan_identifier`/`scan_string` helpers.
//! Keyword matching is case-sensitive (no lowercasing before lookup),
//! and an invalid character is a hard `LexError` rather than an inline
//! error token — the lexer never recovers once one is hit.

use super::token::{CompareOp, DurationUnit, Keyword, Span, Symbol, Token, TokenKind};
use axon_core::error::{LexError, Position};
use std::iter::Peekable;
use std::str::CharIndices;

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: u32,
    column: u32,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
            pos: 0,
        }
    }

    /// Tokenize the entire source, returning the token list terminated by
    /// EOF, or the first lexical error encountered.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let start_line = self.line;
            let start_column = self.column;
            let start_pos = self.pos;

            let Some(&(_, ch)) = self.chars.peek() else {
                tokens.push(Token::new(
                    TokenKind::Eof,
                    "",
                    Span {
                        start: start_pos,
                        end: start_pos,
                        line: start_line,
                        column: start_column,
                    },
                ));
                break;
            };

            let token = if ch.is_alphabetic() || ch == '_' {
                self.scan_identifier(start_line, start_column, start_pos)
            } else if ch.is_ascii_digit() {
                self.scan_number_or_duration(start_line, start_column, start_pos)?
            } else if ch == '"' {
                self.scan_string(start_line, start_column, start_pos)?
            } else {
                self.scan_symbol_or_compare(start_line, start_column, start_pos)?
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next().map(|(_, c)| c)
    }

    fn advance(&mut self) -> Option<char> {
        let (pos, ch) = self.chars.next()?;
        self.pos = pos + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn make_span(&self, start_pos: usize, start_line: u32, start_column: u32) -> Span {
        Span {
            start: start_pos,
            end: self.pos,
            line: start_line,
            column: start_column,
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next_char() == Some('/') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_next_char() == Some('*') => {
                    let start_line = self.line;
                    let start_column = self.column;
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(c) = self.peek_char() {
                        if c == '*' && self.peek_next_char() == Some('/') {
                            self.advance();
                            self.advance();
                            closed = true;
                            break;
                        }
                        self.advance();
                    }
                    if !closed {
                        return Err(LexError::UnterminatedBlockComment {
                            position: Position::new(start_line, start_column),
                        });
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn scan_identifier(&mut self, line: u32, column: u32, start_pos: usize) -> Token {
        let mut lexeme = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                lexeme.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let span = self.make_span(start_pos, line, column);
        let kind = match lexeme.as_str() {
            "true" => TokenKind::BooleanLiteral(true),
            "false" => TokenKind::BooleanLiteral(false),
            _ => match Keyword::lookup(&lexeme) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Identifier(lexeme.clone()),
            },
        };
        Token::new(kind, lexeme, span)
    }

    fn scan_number_or_duration(
        &mut self,
        line: u32,
        column: u32,
        start_pos: usize,
    ) -> Result<Token, LexError> {
        let mut lexeme = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                lexeme.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let mut is_float = false;
        if self.peek_char() == Some('.') && self.peek_next_char().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            lexeme.push('.');
            self.advance();
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    lexeme.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        // Duration suffix only recognised immediately after the digits,
        // and only for integer magnitudes.
        if !is_float {
            let suffix = self.peek_duration_suffix();
            if let Some(suffix) = suffix {
                for _ in 0..suffix.len() {
                    self.advance();
                }
                let unit = DurationUnit::from_suffix(&suffix).expect("suffix already validated");
                let amount: i64 = lexeme.parse().map_err(|_| LexError::MalformedNumber {
                    lexeme: lexeme.clone(),
                    position: Position::new(line, column),
                })?;
                let span = self.make_span(start_pos, line, column);
                let mut full_lexeme = lexeme;
                full_lexeme.push_str(&suffix);
                return Ok(Token::new(
                    TokenKind::DurationLiteral { amount, unit },
                    full_lexeme,
                    span,
                ));
            }
        }

        let span = self.make_span(start_pos, line, column);
        if is_float {
            let value: f64 = lexeme.parse().map_err(|_| LexError::MalformedNumber {
                lexeme: lexeme.clone(),
                position: Position::new(line, column),
            })?;
            Ok(Token::new(TokenKind::FloatLiteral(value), lexeme, span))
        } else {
            let value: i64 = lexeme.parse().map_err(|_| LexError::MalformedNumber {
                lexeme: lexeme.clone(),
                position: Position::new(line, column),
            })?;
            Ok(Token::new(TokenKind::IntegerLiteral(value), lexeme, span))
        }
    }

    /// Peek whether a recognised duration suffix (`ms`, `s`, `m`, `h`, `d`)
    /// immediately follows the cursor, without consuming it. Checks `ms`
    /// before `m`/`s` since it is the only two-character suffix.
    fn peek_duration_suffix(&self) -> Option<String> {
        let mut iter = self.chars.clone();
        let first = iter.next().map(|(_, c)| c)?;
        if first == 'm' {
            if let Some((_, 's')) = iter.clone().next() {
                // "ms": only valid if not followed by another identifier char.
                let mut after = iter.clone();
                after.next();
                if after.next().map_or(true, |(_, c)| !c.is_alphanumeric() && c != '_') {
                    return Some("ms".to_string());
                }
            }
            // "m": only valid if not followed by another identifier char.
            if iter.next().map_or(true, |(_, c)| !c.is_alphanumeric() && c != '_') {
                return Some("m".to_string());
            }
            return None;
        }
        if matches!(first, 's' | 'h' | 'd') {
            if iter.next().map_or(true, |(_, c)| !c.is_alphanumeric() && c != '_') {
                return Some(first.to_string());
            }
        }
        None
    }

    fn scan_string(&mut self, line: u32, column: u32, start_pos: usize) -> Result<Token, LexError> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek_char() {
                None => {
                    return Err(LexError::UnterminatedString {
                        position: Position::new(line, column),
                    })
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escape_line = self.line;
                    let escape_column = self.column;
                    match self.advance() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some(other) => {
                            return Err(LexError::InvalidEscape {
                                escape: other,
                                position: Position::new(escape_line, escape_column),
                            })
                        }
                        None => {
                            return Err(LexError::UnterminatedString {
                                position: Position::new(line, column),
                            })
                        }
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        let span = self.make_span(start_pos, line, column);
        Ok(Token::new(TokenKind::StringLiteral(value.clone()), value, span))
    }

    fn scan_symbol_or_compare(
        &mut self,
        line: u32,
        column: u32,
        start_pos: usize,
    ) -> Result<Token, LexError> {
        let ch = self.advance().expect("caller already peeked a character");
        let kind = match ch {
            '{' => TokenKind::Symbol(Symbol::LBrace),
            '}' => TokenKind::Symbol(Symbol::RBrace),
            '(' => TokenKind::Symbol(Symbol::LParen),
            ')' => TokenKind::Symbol(Symbol::RParen),
            '[' => TokenKind::Symbol(Symbol::LBracket),
            ']' => TokenKind::Symbol(Symbol::RBracket),
            ',' => TokenKind::Symbol(Symbol::Comma),
            ':' => TokenKind::Symbol(Symbol::Colon),
            ';' => TokenKind::Symbol(Symbol::Semicolon),
            '?' => TokenKind::Symbol(Symbol::Question),
            '.' => TokenKind::Symbol(Symbol::Dot),
            '-' => {
                if self.peek_char() == Some('>') {
                    self.advance();
                    TokenKind::Symbol(Symbol::Arrow)
                } else {
                    // AXON has no unary minus token; a bare '-' (as in a
                    // negative duration or integer) is always an invalid
                    // character, which is the mechanism behind rejecting
                    // negative durations at lex time (§8).
                    return Err(LexError::InvalidCharacter {
                        found: ch,
                        position: Position::new(line, column),
                    });
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::Compare(CompareOp::Le)
                } else {
                    TokenKind::Compare(CompareOp::Lt)
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::Compare(CompareOp::Ge)
                } else {
                    TokenKind::Compare(CompareOp::Gt)
                }
            }
            '=' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::Compare(CompareOp::EqEq)
                } else {
                    return Err(LexError::InvalidCharacter {
                        found: ch,
                        position: Position::new(line, column),
                    });
                }
            }
            '!' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::Compare(CompareOp::NotEq)
                } else {
                    return Err(LexError::InvalidCharacter {
                        found: ch,
                        position: Position::new(line, column),
                    });
                }
            }
            other => {
                return Err(LexError::InvalidCharacter {
                    found: other,
                    position: Position::new(line, column),
                })
            }
        };
        let span = self.make_span(start_pos, line, column);
        let lexeme = &self.source[start_pos..self.pos];
        Ok(Token::new(kind, lexeme, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_keywords_case_sensitively() {
        assert_eq!(
            kinds("persona"),
            vec![TokenKind::Keyword(Keyword::Persona), TokenKind::Eof]
        );
        assert_eq!(
            kinds("Persona"),
            vec![TokenKind::Identifier("Persona".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn lexes_string_with_escapes() {
        let tokens = kinds(r#""line\nend""#);
        assert_eq!(
            tokens,
            vec![
                TokenKind::StringLiteral("line\nend".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_integer_and_float() {
        assert_eq!(
            kinds("42 3.14"),
            vec![
                TokenKind::IntegerLiteral(42),
                TokenKind::FloatLiteral(3.14),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_duration_literal() {
        assert_eq!(
            kinds("30s"),
            vec![
                TokenKind::DurationLiteral {
                    amount: 30,
                    unit: DurationUnit::Seconds
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_ms_before_m() {
        assert_eq!(
            kinds("500ms"),
            vec![
                TokenKind::DurationLiteral {
                    amount: 500,
                    unit: DurationUnit::Milliseconds
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn zero_duration_is_accepted() {
        assert_eq!(
            kinds("0s"),
            vec![
                TokenKind::DurationLiteral {
                    amount: 0,
                    unit: DurationUnit::Seconds
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn negative_duration_is_rejected_at_lex_time() {
        let err = Lexer::new("-1s").tokenize().unwrap_err();
        assert!(matches!(err, LexError::InvalidCharacter { found: '-', .. }));
    }

    #[test]
    fn greedily_lexes_multi_character_operators() {
        assert_eq!(
            kinds("-> <= >= == !="),
            vec![
                TokenKind::Symbol(Symbol::Arrow),
                TokenKind::Compare(CompareOp::Le),
                TokenKind::Compare(CompareOp::Ge),
                TokenKind::Compare(CompareOp::EqEq),
                TokenKind::Compare(CompareOp::NotEq),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_line_and_block_comments() {
        assert_eq!(
            kinds("persona // a comment\n/* block */ flow"),
            vec![
                TokenKind::Keyword(Keyword::Persona),
                TokenKind::Keyword(Keyword::Flow),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn fails_hard_on_invalid_character() {
        let err = Lexer::new("persona @ flow").tokenize().unwrap_err();
        match err {
            LexError::InvalidCharacter { found, position } => {
                assert_eq!(found, '@');
                assert_eq!(position.column, 9);
            }
            other => panic!("expected InvalidCharacter, got {:?}", other),
        }
    }

    #[test]
    fn tracks_line_and_column_across_newlines() {
        let tokens = Lexer::new("persona\nflow").tokenize().unwrap();
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[1].span.column, 1);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("\"no closing quote").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { .. }));
    }

    #[test]
    fn unterminated_block_comment_is_an_error() {
        let err = Lexer::new("/* never closed").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedBlockComment { .. }));
    }
}
