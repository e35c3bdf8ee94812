use std::collections::HashMap;

use itertools::Itertools;

use crate::diagnostics::CompileError;
use crate::frontend::{INPUT_NUM, OUTPUT_NEW_LINE, OUTPUT_NUM, OUTPUT_NUM_PARAM};
use crate::ir::{BaseRegister, Operand};

mod allocator;

use self::allocator::MemoryAllocator;
pub use self::allocator::WORD_SIZE;

/// Scope of globals and of every function and procedure symbol.
pub const MAIN_SCOPE: &str = "main";

/// Words taken by an array with `dimensions`, or `None` when its size in
/// bytes does not fit in an `i64`.
pub fn array_words(dimensions: &[i64]) -> Option<i64> {
    dimensions
        .iter()
        .try_fold(1i64, |words, &dimension| words.checked_mul(dimension))
        .filter(|words| words.checked_mul(WORD_SIZE).is_some())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Array,
    Function,
    Procedure,
}

impl SymbolKind {
    pub const fn is_routine(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Procedure)
    }

    pub const fn describe(self) -> &'static str {
        match self {
            SymbolKind::Variable => "variable",
            SymbolKind::Array => "array",
            SymbolKind::Function => "function",
            SymbolKind::Procedure => "procedure",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Symbol {
    identifier: usize,
    name: String,
    scope: String,
    kind: SymbolKind,
    dimensions: Vec<i64>,
    parameters: Vec<usize>,
    is_param: bool,
    offset: i64,
    values: Vec<Operand>,
}

impl Symbol {
    fn new(
        identifier: usize,
        name: &str,
        scope: &str,
        kind: SymbolKind,
        dimensions: Vec<i64>,
        parameters: Vec<usize>,
        is_param: bool,
    ) -> Self {
        Symbol {
            identifier,
            name: name.to_string(),
            scope: scope.to_string(),
            kind,
            dimensions,
            parameters,
            is_param,
            offset: 0,
            values: vec![],
        }
    }

    pub fn variable(identifier: usize, name: &str, scope: &str) -> Self {
        Self::new(identifier, name, scope, SymbolKind::Variable, vec![], vec![], false)
    }

    pub fn parameter(identifier: usize, name: &str, scope: &str) -> Self {
        Self::new(identifier, name, scope, SymbolKind::Variable, vec![], vec![], true)
    }

    pub fn array(identifier: usize, name: &str, scope: &str, dimensions: Vec<i64>) -> Self {
        Self::new(identifier, name, scope, SymbolKind::Array, dimensions, vec![], false)
    }

    pub fn function(identifier: usize, name: &str, parameters: Vec<usize>) -> Self {
        Self::new(
            identifier,
            name,
            MAIN_SCOPE,
            SymbolKind::Function,
            vec![],
            parameters,
            false,
        )
    }

    pub fn procedure(identifier: usize, name: &str, parameters: Vec<usize>) -> Self {
        Self::new(
            identifier,
            name,
            MAIN_SCOPE,
            SymbolKind::Procedure,
            vec![],
            parameters,
            false,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn dimensions(&self) -> &[i64] {
        &self.dimensions
    }

    pub fn parameters(&self) -> &[usize] {
        &self.parameters
    }

    pub fn is_param(&self) -> bool {
        self.is_param
    }

    pub fn is_global(&self) -> bool {
        self.scope == MAIN_SCOPE
    }

    /// Offset relative to `base_register`.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn base_register(&self) -> BaseRegister {
        if self.is_global() {
            BaseRegister::DataArea
        } else {
            BaseRegister::FramePointer
        }
    }

    pub fn size_in_words(&self) -> Option<i64> {
        array_words(&self.dimensions)
    }

    pub fn push_value(&mut self, value: Operand) {
        self.values.push(value);
    }

    pub fn last_value(&self) -> Option<&Operand> {
        self.values.last()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    #[cfg(test)]
    pub fn values(&self) -> &[Operand] {
        &self.values
    }

    /// Drops every version pushed after the stack had `len` entries.
    pub fn reset_value_list_to(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn clear_values(&mut self) {
        self.values.clear();
    }
}

/// Symbols by scope, then by identifier id.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: HashMap<String, HashMap<usize, Symbol>>,
    allocator: MemoryAllocator,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: HashMap::new(),
            allocator: MemoryAllocator::new(),
        }
    }

    /// A table holding the routines every program may call.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        let builtins = [
            Symbol::function(INPUT_NUM, "InputNum", vec![]),
            Symbol::parameter(OUTPUT_NUM_PARAM, "x", "OutputNum"),
            Symbol::procedure(OUTPUT_NUM, "OutputNum", vec![OUTPUT_NUM_PARAM]),
            Symbol::procedure(OUTPUT_NEW_LINE, "OutputNewLine", vec![]),
        ];
        for symbol in builtins {
            // scalars and routines always fit
            let _ = table.insert(symbol);
        }
        table
    }

    fn insert(&mut self, mut symbol: Symbol) -> Result<(), CompileError> {
        symbol.offset = self.allocator.allocate(&symbol)?;
        self.scopes
            .entry(symbol.scope.clone())
            .or_default()
            .insert(symbol.identifier, symbol);
        Ok(())
    }

    pub fn add(&mut self, symbol: Symbol) -> Result<(), CompileError> {
        if self.contains(symbol.identifier, &symbol.scope) {
            return Err(CompileError::Redefinition {
                name: symbol.name,
                scope: symbol.scope,
            });
        }
        self.insert(symbol)
    }

    pub fn contains(&self, identifier: usize, scope: &str) -> bool {
        self.scopes
            .get(scope)
            .map_or(false, |symbols| symbols.contains_key(&identifier))
    }

    /// Looks `identifier` up in `scope`, falling back to the globals.
    pub fn get(&self, identifier: usize, scope: &str) -> Option<&Symbol> {
        self.scopes
            .get(scope)
            .and_then(|symbols| symbols.get(&identifier))
            .or_else(|| self.scopes.get(MAIN_SCOPE)?.get(&identifier))
    }

    pub fn get_mut(&mut self, identifier: usize, scope: &str) -> Option<&mut Symbol> {
        let scope = if self.contains(identifier, scope) {
            scope
        } else {
            MAIN_SCOPE
        };
        self.scopes.get_mut(scope)?.get_mut(&identifier)
    }

    /// Identifiers of the global scalars `scope` can see, in declaration
    /// order. Globals shadowed by a local of `scope` are left out.
    pub fn visible_globals(&self, scope: &str) -> Vec<usize> {
        let Some(globals) = self.scopes.get(MAIN_SCOPE) else {
            return vec![];
        };
        globals
            .values()
            .filter(|symbol| symbol.kind == SymbolKind::Variable)
            .filter(|symbol| scope == MAIN_SCOPE || !self.contains(symbol.identifier, scope))
            .sorted_by_key(|symbol| symbol.offset)
            .map(|symbol| symbol.identifier)
            .collect()
    }

    pub fn reset_value_lists(&mut self) {
        for symbol in self.scopes.values_mut().flat_map(HashMap::values_mut) {
            symbol.clear_values();
        }
    }

    /// Whether `value` is the current version of some symbol visible from
    /// `scope` other than `identifier` itself.
    pub fn is_current_value_elsewhere(&self, value: &Operand, identifier: usize, scope: &str) -> bool {
        let owner = self.get(identifier, scope).map(|symbol| (symbol.scope.as_str(), symbol.identifier));
        [scope, MAIN_SCOPE]
            .into_iter()
            .filter_map(|scope| self.scopes.get(scope))
            .flat_map(HashMap::values)
            .filter(|symbol| Some((symbol.scope.as_str(), symbol.identifier)) != owner)
            .any(|symbol| symbol.last_value() == Some(value))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstId;

    #[test]
    fn test_builtins() {
        let table = SymbolTable::with_builtins();
        let output = table.get(OUTPUT_NUM, "f").unwrap();
        assert_eq!(output.kind(), SymbolKind::Procedure);
        assert_eq!(output.parameters(), &[OUTPUT_NUM_PARAM]);
        assert_eq!(table.get(INPUT_NUM, MAIN_SCOPE).unwrap().kind(), SymbolKind::Function);
        assert!(table.get(OUTPUT_NUM_PARAM, MAIN_SCOPE).is_none());
        assert!(table.get(OUTPUT_NUM_PARAM, "OutputNum").unwrap().is_param());
    }

    #[test]
    fn test_local_shadows_global() {
        let mut table = SymbolTable::new();
        table.add(Symbol::variable(4, "a", MAIN_SCOPE)).unwrap();
        table.add(Symbol::variable(4, "a", "f")).unwrap();
        table.add(Symbol::variable(5, "b", MAIN_SCOPE)).unwrap();

        assert!(!table.get(4, "f").unwrap().is_global());
        assert!(table.get(4, "g").unwrap().is_global());
        assert!(table.get(5, "f").unwrap().is_global());

        table.get_mut(4, "f").unwrap().push_value(Operand::Constant(1));
        assert!(table.get(4, MAIN_SCOPE).unwrap().last_value().is_none());
    }

    #[test]
    fn test_redefinition_is_rejected() {
        let mut table = SymbolTable::with_builtins();
        table.add(Symbol::variable(4, "a", MAIN_SCOPE)).unwrap();
        let err = table.add(Symbol::array(4, "a", MAIN_SCOPE, vec![3])).unwrap_err();
        assert_eq!(
            err,
            CompileError::Redefinition {
                name: "a".to_string(),
                scope: MAIN_SCOPE.to_string()
            }
        );
        assert!(table.add(Symbol::function(INPUT_NUM, "InputNum", vec![])).is_err());
    }

    #[test]
    fn test_rollback_then_replay_restores_stack() {
        let mut symbol = Symbol::variable(4, "a", MAIN_SCOPE);
        let history = [
            Operand::Value(InstId(1)),
            Operand::Value(InstId(3)),
            Operand::Value(InstId(7)),
            Operand::Value(InstId(8)),
        ];
        for value in &history {
            symbol.push_value(value.clone());
        }
        let before = symbol.values().to_vec();

        symbol.reset_value_list_to(1);
        assert_eq!(symbol.last_value(), Some(&history[0]));
        for value in &history[1..] {
            symbol.push_value(value.clone());
        }
        assert_eq!(symbol.values(), before.as_slice());

        // truncating to a longer length is a no-op
        symbol.reset_value_list_to(10);
        assert_eq!(symbol.value_count(), 4);
    }

    #[test]
    fn test_current_value_elsewhere() {
        let mut table = SymbolTable::new();
        table.add(Symbol::variable(4, "a", MAIN_SCOPE)).unwrap();
        table.add(Symbol::variable(5, "b", "f")).unwrap();
        let shared = Operand::Value(InstId(2));
        table.get_mut(4, "f").unwrap().push_value(shared.clone());

        assert!(table.is_current_value_elsewhere(&shared, 5, "f"));
        assert!(!table.is_current_value_elsewhere(&shared, 4, "f"));
        assert!(!table.is_current_value_elsewhere(&Operand::Value(InstId(3)), 5, "f"));
    }

    #[test]
    fn test_visible_globals_skip_shadowed_names() {
        let mut table = SymbolTable::with_builtins();
        table.add(Symbol::variable(6, "b", MAIN_SCOPE)).unwrap();
        table.add(Symbol::array(7, "m", MAIN_SCOPE, vec![3])).unwrap();
        table.add(Symbol::variable(4, "a", MAIN_SCOPE)).unwrap();
        table.add(Symbol::variable(6, "b", "f")).unwrap();

        assert_eq!(table.visible_globals(MAIN_SCOPE), vec![6, 4]);
        assert_eq!(table.visible_globals("f"), vec![4]);
    }

    #[test]
    fn test_array_words() {
        assert_eq!(array_words(&[3, 4, 5]), Some(60));
        assert_eq!(array_words(&[4_000_000_000; 3]), None);
        // fits in words, not in bytes
        assert_eq!(array_words(&[i64::MAX / 2]), None);

        let mut table = SymbolTable::new();
        let huge = Symbol::array(4, "a", MAIN_SCOPE, vec![1 << 40, 1 << 40]);
        assert_eq!(
            table.add(huge),
            Err(CompileError::ArrayTooLarge("a".to_string()))
        );
        assert!(!table.contains(4, MAIN_SCOPE));
    }

    #[test]
    fn test_reset_value_lists() {
        let mut table = SymbolTable::with_builtins();
        table.add(Symbol::variable(4, "a", MAIN_SCOPE)).unwrap();
        table.add(Symbol::parameter(5, "p", "f")).unwrap();
        table.get_mut(4, MAIN_SCOPE).unwrap().push_value(Operand::Constant(1));
        table.get_mut(5, "f").unwrap().push_value(Operand::Constant(2));
        table.reset_value_lists();
        assert_eq!(table.get(4, MAIN_SCOPE).unwrap().value_count(), 0);
        assert_eq!(table.get(5, "f").unwrap().value_count(), 0);
    }
}
