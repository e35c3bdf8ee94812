use anyhow::Result;

use super::lexer::{Lexer, Token};
use crate::diagnostics::{CompileError, Diagnostics};
use crate::ir::{InstId, OpCode, Operand, Program};
use crate::ssa::{BuilderContext, CompileOptions};
use crate::symbols::Symbol;

/// Recursive-descent parser that lowers each construct into SSA form as soon
/// as it is recognised.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    token: Token,
    ctx: BuilderContext,
}

const fn starts_expression(token: Token) -> bool {
    matches!(
        token,
        Token::Number | Token::Identifier | Token::OpenParen | Token::Call
    )
}

const fn starts_statement(token: Token) -> bool {
    matches!(
        token,
        Token::Let | Token::Call | Token::If | Token::While | Token::Return
    )
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, options: CompileOptions) -> Self {
        Parser {
            lexer: Lexer::new(source),
            token: Token::EndOfFile,
            ctx: BuilderContext::new(options),
        }
    }

    pub fn parse(mut self) -> Result<(Program, Diagnostics)> {
        self.advance()?;
        self.computation()?;
        let names = self.lexer.identifiers().to_vec();
        Ok(self.ctx.finish(names))
    }

    fn name(&self, identifier: usize) -> String {
        self.lexer
            .identifier_name(identifier)
            .map_or_else(|| format!("${identifier}"), str::to_string)
    }

    /// Moves to the next token, reporting and skipping unreadable input.
    fn advance(&mut self) -> Result<()> {
        loop {
            self.token = self.lexer.next();
            self.ctx.set_position(self.lexer.position());
            for (position, error) in self.lexer.take_errors() {
                self.ctx.report_at(position, error)?;
            }
            if self.token != Token::Error {
                return Ok(());
            }
        }
    }

    /// Consumes `expected`. A mismatch is reported and the token is left in
    /// place for the caller to resynchronise on.
    fn match_token(&mut self, expected: Token) -> Result<()> {
        if self.token == expected {
            self.advance()
        } else {
            self.ctx.report(CompileError::UnexpectedToken {
                expected: expected.to_string(),
                received: self.token,
            })
        }
    }

    fn identifier(&mut self) -> Result<Option<usize>> {
        if self.token == Token::Identifier {
            let identifier = self.lexer.last_identifier();
            self.advance()?;
            Ok(Some(identifier))
        } else {
            self.match_token(Token::Identifier)?;
            Ok(None)
        }
    }

    fn number(&mut self) -> Result<i64> {
        if self.token == Token::Number {
            let value = self.lexer.last_number();
            self.advance()?;
            Ok(value)
        } else {
            self.match_token(Token::Number)?;
            Ok(0)
        }
    }

    fn computation(&mut self) -> Result<()> {
        self.match_token(Token::Main)?;
        while matches!(self.token, Token::Var | Token::Array) {
            self.variable_declaration()?;
        }
        while matches!(self.token, Token::Function | Token::Procedure) {
            self.function_declaration()?;
        }

        self.ctx.begin_main_body();
        self.match_token(Token::Begin)?;
        self.statement_sequence()?;
        self.match_token(Token::End)?;
        self.match_token(Token::Period)?;
        self.ctx.finish_main();

        if self.token != Token::EndOfFile {
            self.match_token(Token::EndOfFile)?;
        }
        Ok(())
    }

    fn variable_declaration(&mut self) -> Result<()> {
        let dimensions = self.type_declaration()?;
        loop {
            if let Some(identifier) = self.identifier()? {
                let name = self.name(identifier);
                let scope = self.ctx.scope().to_string();
                let symbol = if dimensions.is_empty() {
                    Symbol::variable(identifier, &name, &scope)
                } else {
                    let dimensions = self.ctx.check_dimensions(&name, dimensions.clone())?;
                    Symbol::array(identifier, &name, &scope, dimensions)
                };
                self.ctx.declare(symbol)?;
            }
            if self.token != Token::Comma {
                break;
            }
            self.advance()?;
        }
        self.match_token(Token::Semicolon)
    }

    fn type_declaration(&mut self) -> Result<Vec<i64>> {
        if self.token == Token::Var {
            self.advance()?;
            return Ok(vec![]);
        }

        self.match_token(Token::Array)?;
        let mut dimensions = vec![];
        loop {
            self.match_token(Token::OpenBracket)?;
            dimensions.push(self.number()?);
            self.match_token(Token::CloseBracket)?;
            if self.token != Token::OpenBracket {
                break Ok(dimensions);
            }
        }
    }

    fn function_declaration(&mut self) -> Result<()> {
        let is_function = self.token == Token::Function;
        self.advance()?;
        let identifier = self.identifier()?;
        let name = identifier.map_or_else(|| "?".to_string(), |id| self.name(id));

        self.ctx.begin_function(&name);
        let parameters = if self.token == Token::OpenParen {
            self.formal_parameters()?
        } else {
            vec![]
        };
        if let Some(identifier) = identifier {
            let symbol = if is_function {
                Symbol::function(identifier, &name, parameters.clone())
            } else {
                Symbol::procedure(identifier, &name, parameters.clone())
            };
            self.ctx.declare(symbol)?;
        }

        self.match_token(Token::Semicolon)?;
        self.function_body(&parameters)?;
        self.match_token(Token::Semicolon)
    }

    fn formal_parameters(&mut self) -> Result<Vec<usize>> {
        self.match_token(Token::OpenParen)?;
        let mut parameters = vec![];
        if self.token == Token::Identifier {
            loop {
                if let Some(identifier) = self.identifier()? {
                    let name = self.name(identifier);
                    let scope = self.ctx.scope().to_string();
                    self.ctx
                        .declare(Symbol::parameter(identifier, &name, &scope))?;
                    parameters.push(identifier);
                }
                if self.token != Token::Comma {
                    break;
                }
                self.advance()?;
            }
        }
        self.match_token(Token::CloseParen)?;
        Ok(parameters)
    }

    fn function_body(&mut self, parameters: &[usize]) -> Result<()> {
        while matches!(self.token, Token::Var | Token::Array) {
            self.variable_declaration()?;
        }
        self.ctx.load_parameters(parameters);

        self.match_token(Token::Begin)?;
        if starts_statement(self.token) {
            self.statement_sequence()?;
        }
        self.match_token(Token::End)?;
        self.ctx.finish_function();
        Ok(())
    }

    fn statement_sequence(&mut self) -> Result<()> {
        self.statement()?;
        while self.token == Token::Semicolon {
            self.advance()?;
            // tolerate a separator before the closing keyword
            if matches!(self.token, Token::End | Token::Od | Token::Fi | Token::Else) {
                break;
            }
            self.statement()?;
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<()> {
        match self.token {
            Token::Let => self.assignment(),
            Token::Call => self.function_call().map(|_| ()),
            Token::If => self.if_statement(),
            Token::While => self.while_statement(),
            Token::Return => self.return_statement(),
            other => self.ctx.report(CompileError::ExpectedStatement(other)),
        }
    }

    fn assignment(&mut self) -> Result<()> {
        self.match_token(Token::Let)?;
        let target = self.designator()?;
        self.match_token(Token::Becomes)?;
        let value = self.expression()?;
        self.ctx.assign(target, value)
    }

    fn if_statement(&mut self) -> Result<()> {
        let mut stmt = self.ctx.enter_if();
        self.match_token(Token::If)?;
        let fixup = self.relation()?;
        self.match_token(Token::Then)?;

        self.ctx.begin_then(&mut stmt, fixup);
        self.statement_sequence()?;
        if self.token == Token::Else {
            self.advance()?;
            self.ctx.begin_else(&mut stmt);
            self.statement_sequence()?;
        }
        self.match_token(Token::Fi)?;
        self.ctx.finish_if(stmt);
        Ok(())
    }

    fn while_statement(&mut self) -> Result<()> {
        let mut lp = self.ctx.enter_while();
        self.match_token(Token::While)?;
        let fixup = self.relation()?;
        self.match_token(Token::Do)?;

        self.ctx.begin_loop_body(&mut lp, fixup);
        self.statement_sequence()?;
        self.match_token(Token::Od)?;
        self.ctx.finish_while(lp);
        Ok(())
    }

    fn return_statement(&mut self) -> Result<()> {
        self.match_token(Token::Return)?;
        let value = if starts_expression(self.token) {
            Some(self.expression()?)
        } else {
            None
        };
        self.ctx.return_value(value)
    }

    fn function_call(&mut self) -> Result<Operand> {
        self.match_token(Token::Call)?;
        let Some(callee) = self.identifier()? else {
            return Ok(Operand::Null);
        };
        if self.ctx.routine(callee).is_none() {
            let name = self.name(callee);
            self.ctx.report(CompileError::UndefinedIdentifier(name))?;
        }

        let mut arguments = vec![];
        if self.token == Token::OpenParen {
            self.advance()?;
            if starts_expression(self.token) {
                loop {
                    arguments.push(self.expression()?);
                    if self.token != Token::Comma {
                        break;
                    }
                    self.advance()?;
                }
            }
            self.match_token(Token::CloseParen)?;
        }
        self.ctx.call(callee, arguments)
    }

    /// Parses an lvalue without evaluating it.
    fn designator(&mut self) -> Result<Operand> {
        let Some(symbol) = self.identifier()? else {
            return Ok(Operand::Null);
        };
        if self.ctx.lookup(symbol).is_none() {
            let name = self.name(symbol);
            self.ctx.report(CompileError::UndefinedIdentifier(name))?;
        }

        let mut indices = vec![];
        while self.token == Token::OpenBracket {
            self.advance()?;
            indices.push(self.expression()?);
            self.match_token(Token::CloseBracket)?;
        }
        Ok(Operand::Selector { symbol, indices })
    }

    fn factor(&mut self) -> Result<Operand> {
        match self.token {
            Token::Number => {
                let value = self.number()?;
                Ok(Operand::Constant(value))
            }
            Token::Identifier => {
                let designator = self.designator()?;
                self.ctx.read(designator)
            }
            Token::OpenParen => {
                self.advance()?;
                let value = self.expression()?;
                self.match_token(Token::CloseParen)?;
                Ok(value)
            }
            Token::Call => self.function_call(),
            other => {
                self.ctx.report(CompileError::ExpectedFactor(other))?;
                Ok(Operand::Null)
            }
        }
    }

    fn term(&mut self) -> Result<Operand> {
        let mut value = self.factor()?;
        while matches!(self.token, Token::Times | Token::Div) {
            let opcode = if self.token == Token::Times {
                OpCode::Mul
            } else {
                OpCode::Div
            };
            self.advance()?;
            let rhs = self.factor()?;
            value = self.ctx.arithmetic(opcode, value, rhs)?;
        }
        Ok(value)
    }

    fn expression(&mut self) -> Result<Operand> {
        let mut value = self.term()?;
        while matches!(self.token, Token::Plus | Token::Minus) {
            let opcode = if self.token == Token::Plus {
                OpCode::Add
            } else {
                OpCode::Sub
            };
            self.advance()?;
            let rhs = self.term()?;
            value = self.ctx.arithmetic(opcode, value, rhs)?;
        }
        Ok(value)
    }

    /// Returns the conditional branch whose target still needs patching.
    fn relation(&mut self) -> Result<InstId> {
        let left = self.expression()?;
        let relation = self.token;
        if relation.is_relation() {
            self.advance()?;
        } else {
            self.ctx.report(CompileError::ExpectedRelation(relation))?;
        }
        let right = self.expression()?;
        self.ctx.relation(left, relation, right)
    }
}
