use anyhow::Result;

use super::context::BuilderContext;
use crate::diagnostics::CompileError;
use crate::frontend::{Token, INPUT_NUM, OUTPUT_NEW_LINE, OUTPUT_NUM};
use crate::ir::{InstId, OpCode, Operand};
use crate::symbols::{SymbolKind, WORD_SIZE};

impl BuilderContext {
    /// Rejects procedure results where a value is required.
    pub fn value_of(&mut self, operand: Operand) -> Result<Operand> {
        if operand == Operand::Procedure {
            self.report(CompileError::ProcedureAsValue)?;
            return Ok(Operand::Null);
        }
        Ok(operand)
    }

    /// Emits `opcode left right`, or folds it when both sides are constants.
    pub fn arithmetic(&mut self, opcode: OpCode, left: Operand, right: Operand) -> Result<Operand> {
        let left = self.value_of(left)?;
        let right = self.value_of(right)?;
        if let (Some(a), Some(b)) = (left.as_constant(), right.as_constant()) {
            let folded = match opcode {
                OpCode::Add => Some(a.wrapping_add(b)),
                OpCode::Sub | OpCode::Cmp => Some(a.wrapping_sub(b)),
                OpCode::Mul => Some(a.wrapping_mul(b)),
                OpCode::Div if b != 0 => Some(a.wrapping_div(b)),
                OpCode::Div => {
                    self.warn(CompileError::DivisionByZero);
                    None
                }
                _ => None,
            };
            if let Some(value) = folded {
                return Ok(Operand::Constant(value));
            }
        }
        Ok(self.emit_value(opcode, Some(left), Some(right)))
    }

    /// Compares both sides and emits the branch taken when `relation` does
    /// not hold. The branch target is left for the caller to patch.
    pub fn relation(&mut self, left: Operand, relation: Token, right: Operand) -> Result<InstId> {
        let comparison = self.arithmetic(OpCode::Cmp, left, right)?;
        let branch = match relation {
            Token::NotEqual => OpCode::Beq,
            Token::LessThan => OpCode::Bge,
            Token::LessEqual => OpCode::Bgt,
            Token::GreaterThan => OpCode::Ble,
            Token::GreaterEqual => OpCode::Blt,
            _ => OpCode::Bne,
        };
        Ok(self.emit(branch, Some(comparison), None))
    }

    pub fn absolute_address(&mut self, symbol: usize) -> Operand {
        let Some(symbol) = self.lookup(symbol) else {
            return Operand::Null;
        };
        let base = Operand::Address(symbol.base_register());
        let offset = Operand::Constant(symbol.offset());
        self.emit_value(OpCode::Add, Some(base), Some(offset))
    }

    /// Address of one array element, laid out row-major.
    fn element_address(&mut self, symbol: usize, indices: Vec<Operand>) -> Result<Operand> {
        let Some(array) = self.lookup(symbol) else {
            return Ok(Operand::Null);
        };
        let dimensions = array.dimensions().to_vec();
        let name = array.name().to_string();
        if indices.len() != dimensions.len() {
            self.report(CompileError::DimensionMismatch {
                name,
                expected: dimensions.len(),
                actual: indices.len(),
            })?;
        }

        let mut offset = Operand::Constant(0);
        for (position, (index, _)) in indices.into_iter().zip(&dimensions).enumerate() {
            offset = if position == 0 {
                self.value_of(index)?
            } else {
                let scaled =
                    self.arithmetic(OpCode::Mul, offset, Operand::Constant(dimensions[position]))?;
                self.arithmetic(OpCode::Add, scaled, index)?
            };
        }
        let offset = self.arithmetic(OpCode::Mul, offset, Operand::Constant(WORD_SIZE))?;

        let base = self.absolute_address(symbol);
        Ok(self.emit_value(OpCode::Adda, Some(base), Some(offset)))
    }

    /// Evaluates a designator as an rvalue.
    pub fn read(&mut self, designator: Operand) -> Result<Operand> {
        let Operand::Selector { symbol, indices } = designator else {
            return Ok(designator);
        };
        let Some(variable) = self.lookup(symbol) else {
            return Ok(Operand::Null);
        };
        let kind = variable.kind();
        let name = variable.name().to_string();
        let current = variable.last_value().cloned();
        let global = variable.is_global();

        match kind {
            SymbolKind::Variable => {
                if !indices.is_empty() {
                    self.report(CompileError::NotAnArray(name.clone()))?;
                }
                if let Some(value) = current {
                    return Ok(value);
                }
                if !global {
                    self.report(CompileError::Uninitialized(name))?;
                    return Ok(Operand::Null);
                }
                self.warn(CompileError::PossiblyUninitializedGlobal(name));
                Ok(self.current_value(symbol))
            }
            SymbolKind::Array => {
                if indices.is_empty() {
                    self.report(CompileError::ArrayWithoutIndices(name))?;
                    return Ok(Operand::Null);
                }
                let address = self.element_address(symbol, indices)?;
                let load = self.emit(OpCode::Load, Some(address), None);
                self.cfg_mut().tag_variable(load, symbol);
                Ok(Operand::Value(load))
            }
            SymbolKind::Function | SymbolKind::Procedure => {
                self.report(CompileError::NotAValue {
                    kind: kind.describe(),
                    name,
                })?;
                Ok(Operand::Null)
            }
        }
    }

    /// Lowers `let target <- value`.
    pub fn assign(&mut self, target: Operand, value: Operand) -> Result<()> {
        let value = self.value_of(value)?;
        let Operand::Selector { symbol, indices } = target else {
            return Ok(());
        };
        let Some(variable) = self.lookup(symbol) else {
            return Ok(());
        };
        let kind = variable.kind();
        let name = variable.name().to_string();

        match kind {
            SymbolKind::Variable => {
                if !indices.is_empty() {
                    self.report(CompileError::NotAnArray(name))?;
                }
                self.assign_scalar(symbol, value);
                Ok(())
            }
            SymbolKind::Array => {
                if indices.is_empty() {
                    return self.report(CompileError::ArrayWithoutIndices(name));
                }
                let address = self.element_address(symbol, indices)?;
                let store = self.emit(OpCode::Store, Some(value), Some(address));
                self.cfg_mut().tag_variable(store, symbol);
                Ok(())
            }
            SymbolKind::Function | SymbolKind::Procedure => {
                self.report(CompileError::NotAssignable {
                    kind: kind.describe(),
                    name,
                })
            }
        }
    }

    /// Pushes a new version of a scalar. Globals always get a fresh `ADD v #0`
    /// and locals a `MOVE` when the value is a constant or already names
    /// another variable, so every version is defined by its own instruction.
    fn assign_scalar(&mut self, symbol: usize, value: Operand) {
        let Some(variable) = self.lookup(symbol) else {
            return;
        };
        let before_len = variable.value_count();
        let global = variable.is_global();
        let before = self.version_before(symbol);

        let value = match value {
            Operand::Null => Operand::Null,
            value if global => {
                let add = self.emit(OpCode::Add, Some(value), Some(Operand::Constant(0)));
                self.cfg_mut().tag_variable(add, symbol);
                Operand::Value(add)
            }
            value
                if value.as_constant().is_some()
                    || self.is_entry_load(&value)
                    || self
                        .symbols
                        .is_current_value_elsewhere(&value, symbol, self.scope()) =>
            {
                let copy = self.emit(OpCode::Move, Some(value), None);
                self.cfg_mut().tag_variable(copy, symbol);
                Operand::Value(copy)
            }
            value => value,
        };

        if let Some(variable) = self.lookup_mut(symbol) {
            variable.push_value(value.clone());
        }
        self.add_phi(symbol, before_len, before, value);
    }

    /// Lowers a call. Built-in routines become their dedicated instructions.
    pub fn call(&mut self, callee: usize, arguments: Vec<Operand>) -> Result<Operand> {
        let Some(routine) = self.routine(callee) else {
            return Ok(Operand::Null);
        };
        let kind = routine.kind();
        let name = routine.name().to_string();
        let expected = routine.parameters().len();
        if !kind.is_routine() {
            self.report(CompileError::NotCallable(name))?;
            return Ok(Operand::Null);
        }

        let arguments = arguments
            .into_iter()
            .map(|argument| self.value_of(argument))
            .collect::<Result<Vec<_>>>()?;
        if arguments.len() != expected {
            self.report(CompileError::ArityMismatch {
                kind: kind.describe(),
                name,
                expected,
                actual: arguments.len(),
            })?;
        }

        let inst = match callee {
            INPUT_NUM => self.emit(OpCode::Read, None, None),
            OUTPUT_NUM => {
                let value = arguments.into_iter().next().unwrap_or(Operand::Null);
                self.emit(OpCode::Write, Some(value), None)
            }
            OUTPUT_NEW_LINE => self.emit(OpCode::WriteNl, None, None),
            _ => {
                let block = self.current_block();
                let target = Operand::Selector {
                    symbol: callee,
                    indices: vec![],
                };
                let call = self.cfg_mut().emit_call(block, target, arguments);
                self.reload_globals();
                call
            }
        };

        Ok(match kind {
            SymbolKind::Procedure => Operand::Procedure,
            _ => Operand::Value(inst),
        })
    }

    /// Gives every global visible here a fresh version loaded from memory,
    /// since the callee may have changed any of them.
    fn reload_globals(&mut self) {
        for global in self.symbols.visible_globals(self.scope()) {
            let Some(variable) = self.lookup(global) else {
                continue;
            };
            let before_len = variable.value_count();
            let before = self.version_before(global);
            let address = self.absolute_address(global);
            let load = self.emit(OpCode::Load, Some(address), None);
            self.cfg_mut().tag_variable(load, global);
            if let Some(variable) = self.lookup_mut(global) {
                variable.push_value(Operand::Value(load));
            }
            self.add_phi(global, before_len, before, Operand::Value(load));
        }
    }

    pub fn return_value(&mut self, value: Option<Operand>) -> Result<()> {
        let value = value.map(|value| self.value_of(value)).transpose()?;
        self.emit(OpCode::Ret, value, None);
        Ok(())
    }
}
