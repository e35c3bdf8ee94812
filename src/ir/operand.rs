use std::fmt::{self, Display, Formatter};

use super::structs::InstId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BaseRegister {
    /// Base of the global data area.
    DataArea,
    StackPointer,
    FramePointer,
}

impl Display for BaseRegister {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BaseRegister::DataArea => write!(f, "DF"),
            BaseRegister::StackPointer => write!(f, "SP"),
            BaseRegister::FramePointer => write!(f, "FP"),
        }
    }
}

/// An operand as seen by the parser: a folded constant, a reference to the
/// instruction producing a value, or one of the non-value markers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    Constant(i64),
    Value(InstId),
    /// An lvalue that has not been evaluated yet.
    Selector {
        symbol: usize,
        indices: Vec<Operand>,
    },
    Procedure,
    Address(BaseRegister),
    /// Stand-in for a value that could not be resolved; already reported.
    Null,
}

impl Operand {
    pub const fn as_constant(&self) -> Option<i64> {
        match self {
            Operand::Constant(val) => Some(*val),
            _ => None,
        }
    }

    pub const fn as_value(&self) -> Option<InstId> {
        match self {
            Operand::Value(inst) => Some(*inst),
            _ => None,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Constant(val) => write!(f, "#{val}"),
            Operand::Value(inst) => write!(f, "({inst})"),
            Operand::Selector { symbol, .. } => write!(f, "${symbol}"),
            Operand::Procedure => write!(f, "proc"),
            Operand::Address(base) => write!(f, "*{base}"),
            Operand::Null => write!(f, "null"),
        }
    }
}
