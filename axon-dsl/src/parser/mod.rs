pub mod ast;
pub mod parser;

pub use ast::*;
pub use parser::{parse, AxonParseFailure, Parser};
