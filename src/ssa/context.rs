use std::collections::HashMap;

use anyhow::{bail, Result};
use log::debug;

use super::CompileOptions;
use crate::diagnostics::{CompileError, Diagnostics};
use crate::frontend::Position;
use crate::ir::{BlockId, ControlFlowGraph, InstId, OpCode, Operand, Program};
use crate::symbols::{array_words, Symbol, SymbolKind, SymbolTable, MAIN_SCOPE};

/// A loop whose body is still being parsed. Every block numbered from `body`
/// onwards was created inside it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoopRegion {
    pub header: BlockId,
    pub body: BlockId,
}

/// Everything the parser mutates while lowering one source file: the graphs
/// built so far, the block being emitted into and the symbol value stacks.
pub struct BuilderContext {
    cfgs: Vec<ControlFlowGraph>,
    current_cfg: usize,
    current_block: BlockId,
    pub(super) symbols: SymbolTable,
    pub(super) loops: Vec<LoopRegion>,
    /// Memory value of each global read before any definition on its path,
    /// loaded once at the head of the function's entry block.
    entry_loads: HashMap<usize, Operand>,
    diagnostics: Diagnostics,
    position: Position,
    options: CompileOptions,
}

impl BuilderContext {
    pub fn new(options: CompileOptions) -> Self {
        BuilderContext {
            cfgs: vec![ControlFlowGraph::new(MAIN_SCOPE)],
            current_cfg: 0,
            current_block: BlockId(0),
            symbols: SymbolTable::with_builtins(),
            loops: vec![],
            entry_loads: HashMap::new(),
            diagnostics: Diagnostics::new(),
            position: Position::default(),
            options,
        }
    }

    /// Name of the function being parsed, which doubles as its symbol scope.
    pub fn scope(&self) -> &str {
        self.cfgs[self.current_cfg].name()
    }

    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfgs[self.current_cfg]
    }

    pub fn cfg_mut(&mut self) -> &mut ControlFlowGraph {
        &mut self.cfgs[self.current_cfg]
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn set_current_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    #[cfg(test)]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn report(&mut self, error: CompileError) -> Result<()> {
        self.report_at(self.position, error)
    }

    /// Records an error. Under `exit_on_first_error` the error also ends the
    /// parse.
    pub fn report_at(&mut self, position: Position, error: CompileError) -> Result<()> {
        self.diagnostics.report(position, error.clone());
        if self.options.exit_on_first_error {
            bail!("{position}: {error}");
        }
        Ok(())
    }

    pub fn warn(&mut self, error: CompileError) {
        self.diagnostics.warn(self.position, error);
    }

    /// Adds a symbol to the current scope. Redefinitions always abort.
    pub fn declare(&mut self, symbol: Symbol) -> Result<()> {
        if let Err(error) = self.symbols.add(symbol) {
            self.diagnostics.report(self.position, error.clone());
            bail!("{}: {error}", self.position);
        }
        Ok(())
    }

    /// Reports an array dimension below one, or a size that does not fit in
    /// memory. Such an array is still declared, with every dimension set to 1.
    pub fn check_dimensions(&mut self, name: &str, dimensions: Vec<i64>) -> Result<Vec<i64>> {
        if let Some(&dimension) = dimensions.iter().find(|&&dimension| dimension < 1) {
            self.report(CompileError::InvalidDimension {
                name: name.to_string(),
                dimension,
            })?;
        } else if array_words(&dimensions).is_none() {
            self.report(CompileError::ArrayTooLarge(name.to_string()))?;
        } else {
            return Ok(dimensions);
        }
        Ok(vec![1; dimensions.len()])
    }

    pub fn lookup(&self, identifier: usize) -> Option<&Symbol> {
        self.symbols.get(identifier, self.cfgs[self.current_cfg].name())
    }

    pub(super) fn lookup_mut(&mut self, identifier: usize) -> Option<&mut Symbol> {
        let scope = self.cfgs[self.current_cfg].name();
        self.symbols.get_mut(identifier, scope)
    }

    /// The version of `variable` on the current path. A global without one
    /// falls back to its value in memory on function entry.
    pub(super) fn current_value(&mut self, variable: usize) -> Operand {
        let Some(symbol) = self.lookup(variable) else {
            return Operand::Null;
        };
        if let Some(value) = symbol.last_value() {
            return value.clone();
        }
        if symbol.is_global() && symbol.kind() == SymbolKind::Variable {
            self.entry_value(variable)
        } else {
            Operand::Null
        }
    }

    pub(super) fn is_entry_load(&self, value: &Operand) -> bool {
        self.entry_loads.values().any(|load| load == value)
    }

    /// Loads global `variable` at the head of the entry block, once per
    /// function, so the value dominates every later use.
    fn entry_value(&mut self, variable: usize) -> Operand {
        if let Some(load) = self.entry_loads.get(&variable) {
            return load.clone();
        }
        let Some(symbol) = self.lookup(variable) else {
            return Operand::Null;
        };
        let base = Operand::Address(symbol.base_register());
        let offset = Operand::Constant(symbol.offset());

        let cfg = self.cfg_mut();
        let Some(entry) = cfg.entry() else {
            return Operand::Null;
        };
        let load = if cfg.has_placeholder(entry) {
            let address = cfg.emit(entry, OpCode::Add, Some(base), Some(offset));
            cfg.emit(entry, OpCode::Load, Some(Operand::Value(address)), None)
        } else {
            let head = cfg.block(entry).first();
            let address = cfg.insert_before(head, OpCode::Add, Some(base), Some(offset));
            cfg.insert_before(head, OpCode::Load, Some(Operand::Value(address)), None)
        };
        cfg.tag_variable(load, variable);
        debug!("{}: loaded global {variable} on entry as {load}", cfg.name());

        let load = Operand::Value(load);
        self.entry_loads.insert(variable, load.clone());
        load
    }

    /// Functions and procedures live in the global scope only.
    pub fn routine(&self, identifier: usize) -> Option<&Symbol> {
        self.symbols.get(identifier, MAIN_SCOPE)
    }

    pub fn emit(
        &mut self,
        opcode: OpCode,
        operand1: Option<Operand>,
        operand2: Option<Operand>,
    ) -> InstId {
        let block = self.current_block;
        self.cfg_mut().emit(block, opcode, operand1, operand2)
    }

    pub fn emit_value(
        &mut self,
        opcode: OpCode,
        operand1: Option<Operand>,
        operand2: Option<Operand>,
    ) -> Operand {
        Operand::Value(self.emit(opcode, operand1, operand2))
    }

    fn begin_body(&mut self, cfg: usize) {
        self.current_cfg = cfg;
        self.symbols.reset_value_lists();
        self.loops.clear();
        self.entry_loads.clear();
        self.current_block = self.cfgs[cfg].create_block();
        debug!("lowering {}", self.cfgs[cfg].name());
    }

    /// Switches to a fresh graph for a function or procedure named `name`.
    pub fn begin_function(&mut self, name: &str) {
        self.cfgs.push(ControlFlowGraph::new(name));
        self.begin_body(self.cfgs.len() - 1);
    }

    pub fn begin_main_body(&mut self) {
        self.begin_body(0);
    }

    /// Loads every parameter from its frame slot into the entry block so it
    /// has a defined version before the first statement.
    pub fn load_parameters(&mut self, parameters: &[usize]) {
        for &parameter in parameters {
            let address = self.absolute_address(parameter);
            let load = self.emit(OpCode::Load, Some(address), None);
            self.cfg_mut().tag_variable(load, parameter);
            if let Some(symbol) = self.lookup_mut(parameter) {
                symbol.push_value(Operand::Value(load));
            }
        }
    }

    pub fn finish_function(&mut self) {
        let last = self.cfg().block(self.current_block).last();
        if self.cfg().instruction(last).opcode() != OpCode::Ret {
            self.emit(OpCode::Ret, None, None);
        }
    }

    pub fn finish_main(&mut self) {
        self.emit(OpCode::End, None, None);
    }

    pub fn finish(self, names: Vec<String>) -> (Program, Diagnostics) {
        (
            Program {
                cfgs: self.cfgs,
                names,
            },
            self.diagnostics,
        )
    }
}
