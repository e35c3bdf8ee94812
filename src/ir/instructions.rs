use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

use super::operand::Operand;
use super::structs::{BlockId, InstId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Placeholder keeping an otherwise empty block addressable.
    Nop,
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Cmp,
    Adda,
    Load,
    Store,
    Move,
    Phi,
    End,
    Bra,
    Bne,
    Beq,
    Ble,
    Blt,
    Bge,
    Bgt,
    Read,
    Write,
    WriteNl,
    Call,
    Ret,
}

impl OpCode {
    pub const fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            OpCode::Bne | OpCode::Beq | OpCode::Ble | OpCode::Blt | OpCode::Bge | OpCode::Bgt
        )
    }

    /// The operand slot holding the branch target, if this is a branch.
    pub const fn target_slot(self) -> Option<Slot> {
        match self {
            OpCode::Bra => Some(Slot::First),
            _ if self.is_conditional_branch() => Some(Slot::Second),
            _ => None,
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Nop => "nop",
            OpCode::Neg => "neg",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Div => "div",
            OpCode::Cmp => "cmp",
            OpCode::Adda => "adda",
            OpCode::Load => "load",
            OpCode::Store => "store",
            OpCode::Move => "move",
            OpCode::Phi => "phi",
            OpCode::End => "end",
            OpCode::Bra => "bra",
            OpCode::Bne => "bne",
            OpCode::Beq => "beq",
            OpCode::Ble => "ble",
            OpCode::Blt => "blt",
            OpCode::Bge => "bge",
            OpCode::Bgt => "bgt",
            OpCode::Read => "read",
            OpCode::Write => "write",
            OpCode::WriteNl => "writeNL",
            OpCode::Call => "call",
            OpCode::Ret => "ret",
        };
        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    First,
    Second,
}

#[derive(Debug)]
pub struct Instruction {
    pub(super) index: InstId,
    pub(super) opcode: OpCode,
    pub(super) operand1: Option<Operand>,
    pub(super) operand2: Option<Operand>,
    pub(super) params: Vec<Operand>,
    pub(super) affected_variable: Option<usize>,
    pub(super) phi_before_len: Option<usize>,
    pub(super) block: BlockId,
    pub(super) next: Option<InstId>,
    pub(super) previous: Option<InstId>,
    pub(super) branch_destination_for: Vec<InstId>,
}

impl Instruction {
    pub(super) fn placeholder(index: InstId, block: BlockId) -> Self {
        Instruction {
            index,
            opcode: OpCode::Nop,
            operand1: None,
            operand2: None,
            params: vec![],
            affected_variable: None,
            phi_before_len: None,
            block,
            next: None,
            previous: None,
            branch_destination_for: vec![],
        }
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn is_placeholder(&self) -> bool {
        self.opcode == OpCode::Nop
    }

    pub fn operand(&self, slot: Slot) -> Option<&Operand> {
        match slot {
            Slot::First => self.operand1.as_ref(),
            Slot::Second => self.operand2.as_ref(),
        }
    }

    pub fn operand1(&self) -> Option<&Operand> {
        self.operand1.as_ref()
    }

    pub fn params(&self) -> &[Operand] {
        &self.params
    }

    pub fn affected_variable(&self) -> Option<usize> {
        self.affected_variable
    }

    /// Value-stack length of the affected variable before the branch arm
    /// that created this phi.
    pub fn phi_before_len(&self) -> Option<usize> {
        self.phi_before_len
    }

    /// Prints the instruction, resolving identifier ids through `name`.
    pub fn display<'a, F: Fn(usize) -> String>(&'a self, name: &'a F) -> DisplayInstruction<'a, F> {
        DisplayInstruction { inst: self, name }
    }
}

#[cfg(test)]
impl Instruction {
    pub fn index(&self) -> InstId {
        self.index
    }

    pub fn operand2(&self) -> Option<&Operand> {
        self.operand2.as_ref()
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn previous(&self) -> Option<InstId> {
        self.previous
    }

    pub fn branch_destination_for(&self) -> &[InstId] {
        &self.branch_destination_for
    }

    pub fn branch_target(&self) -> Option<InstId> {
        let slot = self.opcode.target_slot()?;
        self.operand(slot)?.as_value()
    }
}

pub struct DisplayInstruction<'a, F> {
    inst: &'a Instruction,
    name: &'a F,
}

impl<'a, F: Fn(usize) -> String> Display for DisplayInstruction<'a, F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let inst = self.inst;
        write!(f, "{}: {}", inst.index, inst.opcode)?;
        match inst.opcode {
            OpCode::Call => {
                if let Some(Operand::Selector { symbol, .. }) = &inst.operand1 {
                    write!(f, " {}", (self.name)(*symbol))?;
                }
                write!(f, "({})", inst.params.iter().join(", "))
            }
            _ => {
                for operand in [&inst.operand1, &inst.operand2].into_iter().flatten() {
                    write!(f, " {operand}")?;
                }
                if let Some(var) = inst.affected_variable {
                    write!(f, " ({})", (self.name)(var))?;
                }
                Ok(())
            }
        }
    }
}
