use anyhow::Result;

mod lexer;
mod parser;

pub use self::lexer::{Position, Token, INPUT_NUM, OUTPUT_NEW_LINE, OUTPUT_NUM, OUTPUT_NUM_PARAM};
use self::parser::Parser;
use crate::diagnostics::Diagnostics;
use crate::ir::Program;
use crate::ssa::CompileOptions;

/// Lexes, parses and lowers a whole source file. Recoverable problems end up
/// in the returned diagnostics; fatal ones are returned as errors.
pub fn parse(source: &str, options: CompileOptions) -> Result<(Program, Diagnostics)> {
    Parser::new(source, options).parse()
}
