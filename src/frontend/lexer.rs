use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::iter::Peekable;
use std::str::Chars;

use crate::diagnostics::CompileError;

pub const INPUT_NUM: usize = 0;
pub const OUTPUT_NUM_PARAM: usize = 1;
pub const OUTPUT_NUM: usize = 2;
pub const OUTPUT_NEW_LINE: usize = 3;

const BUILTIN_IDENTIFIERS: [&str; 4] = ["InputNum", "x", "OutputNum", "OutputNewLine"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    Error,
    Times,
    Div,
    Plus,
    Minus,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Period,
    Comma,
    OpenBracket,
    CloseBracket,
    OpenParen,
    CloseParen,
    Becomes,
    Then,
    Do,
    Od,
    Fi,
    Else,
    Let,
    Call,
    If,
    While,
    Return,
    Var,
    Array,
    Function,
    Procedure,
    Main,
    Begin,
    End,
    Semicolon,
    Number,
    Identifier,
    EndOfFile,
}

impl Token {
    fn reserved(word: &str) -> Option<Token> {
        Some(match word {
            "then" => Token::Then,
            "do" => Token::Do,
            "od" => Token::Od,
            "if" => Token::If,
            "fi" => Token::Fi,
            "else" => Token::Else,
            "while" => Token::While,
            "call" => Token::Call,
            "var" => Token::Var,
            "array" => Token::Array,
            "let" => Token::Let,
            "function" => Token::Function,
            "procedure" => Token::Procedure,
            "main" => Token::Main,
            "return" => Token::Return,
            _ => return None,
        })
    }

    pub const fn is_relation(self) -> bool {
        matches!(
            self,
            Token::Equal
                | Token::NotEqual
                | Token::LessThan
                | Token::LessEqual
                | Token::GreaterThan
                | Token::GreaterEqual
        )
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Error => "error",
            Token::Times => "*",
            Token::Div => "/",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Equal => "==",
            Token::NotEqual => "!=",
            Token::LessThan => "<",
            Token::LessEqual => "<=",
            Token::GreaterThan => ">",
            Token::GreaterEqual => ">=",
            Token::Period => ".",
            Token::Comma => ",",
            Token::OpenBracket => "[",
            Token::CloseBracket => "]",
            Token::OpenParen => "(",
            Token::CloseParen => ")",
            Token::Becomes => "<-",
            Token::Then => "then",
            Token::Do => "do",
            Token::Od => "od",
            Token::Fi => "fi",
            Token::Else => "else",
            Token::Let => "let",
            Token::Call => "call",
            Token::If => "if",
            Token::While => "while",
            Token::Return => "return",
            Token::Var => "var",
            Token::Array => "array",
            Token::Function => "function",
            Token::Procedure => "procedure",
            Token::Main => "main",
            Token::Begin => "{",
            Token::End => "}",
            Token::Semicolon => ";",
            Token::Number => "number",
            Token::Identifier => "identifier",
            Token::EndOfFile => "end of file",
        };
        write!(f, "{text}")
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "line {} column {}", self.line, self.column)
    }
}

pub struct Lexer<'a> {
    stream: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
    token_start: Position,
    last_number: i64,
    last_identifier: usize,
    names: Vec<String>,
    ids: HashMap<String, usize>,
    pending_errors: Vec<(Position, CompileError)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer {
            stream: source.chars().peekable(),
            line: 1,
            column: 1,
            token_start: Position { line: 1, column: 1 },
            last_number: 0,
            last_identifier: 0,
            names: vec![],
            ids: HashMap::new(),
            pending_errors: vec![],
        };
        for name in BUILTIN_IDENTIFIERS {
            lexer.intern(name);
        }
        lexer
    }

    pub fn last_number(&self) -> i64 {
        self.last_number
    }

    pub fn last_identifier(&self) -> usize {
        self.last_identifier
    }

    /// Position of the first character of the most recently scanned token.
    pub fn position(&self) -> Position {
        self.token_start
    }

    pub fn identifier_name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    #[cfg(test)]
    pub fn identifier_id(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    /// Every identifier seen so far, indexed by id.
    pub fn identifiers(&self) -> &[String] {
        &self.names
    }

    pub fn take_errors(&mut self) -> Vec<(Position, CompileError)> {
        std::mem::take(&mut self.pending_errors)
    }

    fn intern(&mut self, name: &str) -> usize {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.stream.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn here(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn fail(&mut self, error: CompileError) -> Token {
        self.pending_errors.push((self.token_start, error));
        Token::Error
    }

    pub fn next(&mut self) -> Token {
        while matches!(self.stream.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
        self.token_start = self.here();

        let c = match self.bump() {
            Some(c) => c,
            None => return Token::EndOfFile,
        };

        match c {
            '*' => Token::Times,
            '/' => Token::Div,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '.' => Token::Period,
            ',' => Token::Comma,
            '[' => Token::OpenBracket,
            ']' => Token::CloseBracket,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ';' => Token::Semicolon,
            '{' => Token::Begin,
            '}' => Token::End,
            '=' | '!' => {
                if self.stream.peek() == Some(&'=') {
                    self.bump();
                    if c == '=' {
                        Token::Equal
                    } else {
                        Token::NotEqual
                    }
                } else {
                    self.fail(CompileError::IncompleteOperator(c))
                }
            }
            '<' => match self.stream.peek() {
                Some('=') => {
                    self.bump();
                    Token::LessEqual
                }
                Some('-') => {
                    self.bump();
                    Token::Becomes
                }
                _ => Token::LessThan,
            },
            '>' => {
                if self.stream.peek() == Some(&'=') {
                    self.bump();
                    Token::GreaterEqual
                } else {
                    Token::GreaterThan
                }
            }
            d if d.is_ascii_digit() => {
                let mut s = String::from(d);
                while let Some(&d) = self.stream.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    s.push(d);
                    self.bump();
                }
                match s.parse() {
                    Ok(val) => self.last_number = val,
                    Err(_) => {
                        self.last_number = 0;
                        self.pending_errors
                            .push((self.token_start, CompileError::NumberTooLarge(s)));
                    }
                }
                Token::Number
            }
            l if l.is_ascii_alphabetic() => {
                let mut s = String::from(l);
                while let Some(&d) = self.stream.peek() {
                    if !d.is_ascii_alphanumeric() {
                        break;
                    }
                    s.push(d);
                    self.bump();
                }
                if let Some(reserved) = Token::reserved(&s) {
                    reserved
                } else {
                    self.last_identifier = self.intern(&s);
                    Token::Identifier
                }
            }
            other => self.fail(CompileError::UnexpectedCharacter(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut out = vec![];
        loop {
            let token = lexer.next();
            out.push(token);
            if token == Token::EndOfFile {
                break out;
            }
        }
    }

    #[test]
    fn test_builtins_are_preseeded() {
        let mut lexer = Lexer::new("foo InputNum");
        assert_eq!(lexer.identifier_id("InputNum"), Some(INPUT_NUM));
        assert_eq!(lexer.identifier_id("x"), Some(OUTPUT_NUM_PARAM));
        assert_eq!(lexer.identifier_id("OutputNum"), Some(OUTPUT_NUM));
        assert_eq!(lexer.identifier_id("OutputNewLine"), Some(OUTPUT_NEW_LINE));

        assert_eq!(lexer.next(), Token::Identifier);
        assert_eq!(lexer.last_identifier(), 4);
        assert_eq!(lexer.identifier_name(4), Some("foo"));
        assert_eq!(lexer.next(), Token::Identifier);
        assert_eq!(lexer.last_identifier(), INPUT_NUM);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("< <= <- > >= == != * / + -"),
            vec![
                Token::LessThan,
                Token::LessEqual,
                Token::Becomes,
                Token::GreaterThan,
                Token::GreaterEqual,
                Token::Equal,
                Token::NotEqual,
                Token::Times,
                Token::Div,
                Token::Plus,
                Token::Minus,
                Token::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_reserved_words_and_numbers() {
        let mut lexer = Lexer::new("main var a1;\n  let a1 <- 42");
        assert_eq!(lexer.next(), Token::Main);
        assert_eq!(lexer.next(), Token::Var);
        assert_eq!(lexer.next(), Token::Identifier);
        let a1 = lexer.last_identifier();
        assert_eq!(lexer.next(), Token::Semicolon);
        assert_eq!(lexer.next(), Token::Let);
        assert_eq!(lexer.position(), Position { line: 2, column: 3 });
        assert_eq!(lexer.next(), Token::Identifier);
        assert_eq!(lexer.last_identifier(), a1);
        assert_eq!(lexer.next(), Token::Becomes);
        assert_eq!(lexer.next(), Token::Number);
        assert_eq!(lexer.last_number(), 42);
        assert_eq!(lexer.next(), Token::EndOfFile);
        assert_eq!(lexer.next(), Token::EndOfFile);
    }

    #[test]
    fn test_errors_are_recorded() {
        let mut lexer = Lexer::new("a $ = b");
        assert_eq!(lexer.next(), Token::Identifier);
        assert_eq!(lexer.next(), Token::Error);
        assert_eq!(lexer.next(), Token::Error);
        assert_eq!(lexer.next(), Token::Identifier);
        let errors = lexer.take_errors();
        assert_eq!(
            errors,
            vec![
                (
                    Position { line: 1, column: 3 },
                    CompileError::UnexpectedCharacter('$')
                ),
                (
                    Position { line: 1, column: 5 },
                    CompileError::IncompleteOperator('=')
                ),
            ]
        );
        assert!(lexer.take_errors().is_empty());
    }

    #[test]
    fn test_number_overflow() {
        let mut lexer = Lexer::new("99999999999999999999");
        assert_eq!(lexer.next(), Token::Number);
        assert_eq!(lexer.last_number(), 0);
        assert_eq!(lexer.take_errors().len(), 1);
    }
}
