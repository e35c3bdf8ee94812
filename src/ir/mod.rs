mod dominance;
mod graphviz;
mod instructions;
mod operand;
mod structs;

#[cfg(test)]
pub use self::dominance::{find_immediately_dominated, immediate_dominators};
pub use self::graphviz::{cfg_to_dot, dominator_tree_to_dot};
#[cfg(test)]
pub use self::instructions::Instruction;
pub use self::instructions::{OpCode, Slot};
pub use self::operand::{BaseRegister, Operand};
pub use self::structs::{BlockId, ControlFlowGraph, InstId, Program};
