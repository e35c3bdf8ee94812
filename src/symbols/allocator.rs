use std::collections::HashMap;

use super::{Symbol, SymbolKind};
use crate::diagnostics::CompileError;

pub const WORD_SIZE: i64 = 4;

/// Offset of the first parameter above the frame pointer, past the saved
/// frame pointer and return address.
const PARAMETER_BASE: i64 = 2 * WORD_SIZE;

/// Word counters per scope. Globals grow upwards from the data area base,
/// locals grow downwards from the frame pointer and parameters sit above it.
#[derive(Debug, Default)]
pub struct MemoryAllocator {
    global_words: i64,
    local_words: HashMap<String, i64>,
    parameter_words: HashMap<String, i64>,
}

impl MemoryAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves space for `symbol` and returns its offset. A counter is only
    /// advanced when both the offset and the new count fit in an `i64`.
    pub fn allocate(&mut self, symbol: &Symbol) -> Result<i64, CompileError> {
        if matches!(symbol.kind(), SymbolKind::Function | SymbolKind::Procedure) {
            return Ok(0);
        }
        let too_large = || CompileError::ArrayTooLarge(symbol.name().to_string());
        let words = symbol.size_in_words().ok_or_else(too_large)?;
        let allocated = if symbol.is_param() {
            let counter = self
                .parameter_words
                .entry(symbol.scope().to_string())
                .or_insert(0);
            let offset = counter
                .checked_mul(WORD_SIZE)
                .and_then(|bytes| bytes.checked_add(PARAMETER_BASE));
            offset.zip(counter.checked_add(words)).map(|(offset, next)| {
                *counter = next;
                offset
            })
        } else if symbol.is_global() {
            let offset = self.global_words.checked_mul(WORD_SIZE);
            offset
                .zip(self.global_words.checked_add(words))
                .map(|(offset, next)| {
                    self.global_words = next;
                    offset
                })
        } else {
            let counter = self
                .local_words
                .entry(symbol.scope().to_string())
                .or_insert(0);
            let next = counter.checked_add(words);
            next.and_then(|next| next.checked_mul(-WORD_SIZE))
                .zip(next)
                .map(|(offset, next)| {
                    *counter = next;
                    offset
                })
        };
        allocated.ok_or_else(too_large)
    }
}
