use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use log::debug;

use super::instructions::{Instruction, OpCode, Slot};
use super::operand::Operand;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub usize);

impl Display for InstId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BB{}", self.0)
    }
}

#[derive(Debug)]
pub struct BasicBlock {
    number: BlockId,
    first: InstId,
    last: InstId,
    pub fall_through: Option<BlockId>,
    pub branch: Option<BlockId>,
    /// Nearest enclosing merge block that still collects phis for values
    /// defined here.
    pub join_block: Option<BlockId>,
    /// Whether this block feeds the left (first) operand of `join_block`'s phis.
    pub joining_from_left: bool,
    phis: HashMap<usize, InstId>,
    dominates: Vec<BlockId>,
}

impl BasicBlock {
    fn new_with_index(number: BlockId, placeholder: InstId) -> Self {
        BasicBlock {
            number,
            first: placeholder,
            last: placeholder,
            fall_through: None,
            branch: None,
            join_block: None,
            joining_from_left: true,
            phis: HashMap::new(),
            dominates: vec![],
        }
    }

    pub fn number(&self) -> BlockId {
        self.number
    }

    pub fn first(&self) -> InstId {
        self.first
    }

    pub fn last(&self) -> InstId {
        self.last
    }

    pub fn phi_for(&self, variable: usize) -> Option<InstId> {
        self.phis.get(&variable).copied()
    }

    #[cfg(test)]
    pub fn dominates(&self) -> &[BlockId] {
        &self.dominates
    }

    pub fn successors(&self) -> impl Iterator<Item = BlockId> {
        self.fall_through.into_iter().chain(self.branch)
    }
}

/// One function's graph. Instruction and block numbers are local to it and
/// double as indices into its arenas.
#[derive(Debug)]
pub struct ControlFlowGraph {
    name: String,
    instructions: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
}

impl ControlFlowGraph {
    pub fn new(name: &str) -> Self {
        ControlFlowGraph {
            name: name.to_string(),
            instructions: vec![],
            blocks: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instruction(&self, index: InstId) -> &Instruction {
        &self.instructions[index.0]
    }

    #[cfg(test)]
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    pub fn block(&self, number: BlockId) -> &BasicBlock {
        &self.blocks[number.0]
    }

    pub fn block_mut(&mut self, number: BlockId) -> &mut BasicBlock {
        &mut self.blocks[number.0]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(BasicBlock::number)
    }

    pub fn create_block(&mut self) -> BlockId {
        let number = BlockId(self.blocks.len());
        let placeholder = InstId(self.instructions.len());
        self.instructions
            .push(Instruction::placeholder(placeholder, number));
        self.blocks
            .push(BasicBlock::new_with_index(number, placeholder));
        debug!("{}: created {number}", self.name);
        number
    }

    /// True when nothing has been emitted into `block` yet.
    pub fn has_placeholder(&self, block: BlockId) -> bool {
        self.instruction(self.block(block).first).is_placeholder()
    }

    /// Appends an instruction to `block`, reusing the placeholder slot (and
    /// therefore its index) when the block has no real content yet.
    pub fn emit(
        &mut self,
        block: BlockId,
        opcode: OpCode,
        operand1: Option<Operand>,
        operand2: Option<Operand>,
    ) -> InstId {
        let first = self.block(block).first;
        if self.instruction(first).is_placeholder() {
            let inst = &mut self.instructions[first.0];
            inst.opcode = opcode;
            inst.operand1 = operand1;
            inst.operand2 = operand2;
            return first;
        }

        let index = InstId(self.instructions.len());
        let mut inst = Instruction::placeholder(index, block);
        inst.opcode = opcode;
        inst.operand1 = operand1;
        inst.operand2 = operand2;
        self.instructions.push(inst);

        // keep the function-wide chain intact if the block was already linked onward
        let last = self.block(block).last;
        if let Some(after) = self.instruction(last).next {
            self.instructions[index.0].next = Some(after);
            self.instructions[after.0].previous = Some(index);
        }
        self.instructions[last.0].next = Some(index);
        self.instructions[index.0].previous = Some(last);
        self.block_mut(block).last = index;
        index
    }

    pub fn emit_call(&mut self, block: BlockId, callee: Operand, params: Vec<Operand>) -> InstId {
        let inst = self.emit(block, OpCode::Call, Some(callee), None);
        self.instructions[inst.0].params = params;
        inst
    }

    pub fn emit_branch(&mut self, block: BlockId, target: InstId) -> InstId {
        let inst = self.emit(block, OpCode::Bra, None, None);
        self.set_operand(inst, Slot::First, Operand::Value(target));
        inst
    }

    pub fn tag_variable(&mut self, inst: InstId, variable: usize) {
        self.instructions[inst.0].affected_variable = Some(variable);
    }

    /// Inserts an instruction into the chain right before `anchor`, in
    /// `anchor`'s block. Branches to a displaced block head move to the new
    /// instruction.
    pub fn insert_before(
        &mut self,
        anchor: InstId,
        opcode: OpCode,
        operand1: Option<Operand>,
        operand2: Option<Operand>,
    ) -> InstId {
        let block = self.instruction(anchor).block;
        let index = InstId(self.instructions.len());
        let mut inst = Instruction::placeholder(index, block);
        inst.opcode = opcode;
        inst.operand1 = operand1;
        inst.operand2 = operand2;
        self.instructions.push(inst);

        if self.block(block).first == anchor {
            let sources = std::mem::take(&mut self.instructions[anchor.0].branch_destination_for);
            for source in sources {
                if let Some(slot) = self.instruction(source).opcode.target_slot() {
                    self.set_operand(source, slot, Operand::Value(index));
                }
            }
            self.block_mut(block).first = index;
        }

        let previous = self.instruction(anchor).previous;
        self.instructions[index.0].next = Some(anchor);
        self.instructions[index.0].previous = previous;
        if let Some(previous) = previous {
            self.instructions[previous.0].next = Some(index);
        }
        self.instructions[anchor.0].previous = Some(index);
        index
    }

    /// Inserts a phi for `variable` among the phis at the head of `block`.
    pub fn emit_phi(
        &mut self,
        block: BlockId,
        variable: usize,
        operand1: Operand,
        operand2: Operand,
        before_len: usize,
    ) -> InstId {
        let head = self.block(block).first;
        let index = if self.instruction(head).is_placeholder() {
            self.emit(block, OpCode::Phi, Some(operand1), Some(operand2))
        } else if self.instruction(head).opcode != OpCode::Phi {
            self.insert_before(head, OpCode::Phi, Some(operand1), Some(operand2))
        } else {
            let index = InstId(self.instructions.len());
            let mut inst = Instruction::placeholder(index, block);
            inst.opcode = OpCode::Phi;
            inst.operand1 = Some(operand1);
            inst.operand2 = Some(operand2);
            self.instructions.push(inst);

            let last = self.block(block).last;
            let mut insert_after = head;
            while insert_after != last {
                match self.instruction(insert_after).next {
                    Some(next) if self.instruction(next).opcode == OpCode::Phi => {
                        insert_after = next
                    }
                    _ => break,
                }
            }
            if insert_after == last {
                self.block_mut(block).last = index;
            }
            if let Some(next) = self.instruction(insert_after).next {
                self.instructions[index.0].next = Some(next);
                self.instructions[next.0].previous = Some(index);
            }
            self.instructions[insert_after.0].next = Some(index);
            self.instructions[index.0].previous = Some(insert_after);
            index
        };

        let inst = &mut self.instructions[index.0];
        inst.affected_variable = Some(variable);
        inst.phi_before_len = Some(before_len);
        self.block_mut(block).phis.insert(variable, index);
        debug!("{}: phi {index} for variable {variable} in {block}", self.name);
        index
    }

    /// Overwrites one operand. Branch-target slots keep the reverse edges of
    /// the old and new destinations in sync.
    pub fn set_operand(&mut self, inst: InstId, slot: Slot, operand: Operand) {
        if self.instruction(inst).opcode.target_slot() == Some(slot) {
            if let Some(old) = self.instruction(inst).operand(slot).and_then(Operand::as_value) {
                self.instructions[old.0]
                    .branch_destination_for
                    .retain(|source| *source != inst);
            }
            if let Some(new) = operand.as_value() {
                let sources = &mut self.instructions[new.0].branch_destination_for;
                if !sources.contains(&inst) {
                    sources.push(inst);
                }
            }
        }
        let target = &mut self.instructions[inst.0];
        match slot {
            Slot::First => target.operand1 = Some(operand),
            Slot::Second => target.operand2 = Some(operand),
        }
    }

    pub fn set_param(&mut self, inst: InstId, position: usize, operand: Operand) {
        self.instructions[inst.0].params[position] = operand;
    }

    /// Links two instructions in the function-wide chain. `from` must not have
    /// a successor yet and `to` must not have a predecessor.
    pub fn connect_instructions(&mut self, from: InstId, to: InstId) {
        self.instructions[from.0].next = Some(to);
        self.instructions[to.0].previous = Some(from);
    }

    /// Chains the last instruction of `from` to the head of `to`, unless
    /// either end is already linked elsewhere.
    pub fn link_blocks(&mut self, from: BlockId, to: BlockId) {
        let last = self.block(from).last;
        let first = self.block(to).first;
        if self.instruction(last).next.is_none() && self.instruction(first).previous.is_none() {
            self.connect_instructions(last, first);
        }
    }

    pub fn set_fall_through(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).fall_through = Some(to);
        self.link_blocks(from, to);
    }

    pub fn set_branch(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).branch = Some(to);
    }

    pub fn add_immediate_domination(&mut self, dominator: BlockId, dominated: BlockId) {
        self.block_mut(dominator).dominates.push(dominated);
    }

    /// The contiguous run of phis at the head of `block`, in order.
    pub fn phis_of(&self, block: BlockId) -> Vec<InstId> {
        let mut out = vec![];
        let mut pos = Some(self.block(block).first);
        while let Some(inst) = pos {
            let inst = self.instruction(inst);
            if inst.block != block || inst.opcode != OpCode::Phi {
                break;
            }
            out.push(inst.index);
            pos = inst.next;
        }
        out
    }

    pub fn instructions_of(&self, block: BlockId) -> Vec<InstId> {
        let block = self.block(block);
        let mut out = vec![block.first];
        let mut pos = block.first;
        while pos != block.last {
            match self.instruction(pos).next {
                Some(next) => {
                    out.push(next);
                    pos = next;
                }
                None => break,
            }
        }
        out
    }

    /// The function-wide instruction chain, starting from the entry block.
    #[cfg(test)]
    pub fn linear(&self) -> Vec<InstId> {
        let mut out = vec![];
        let mut pos = self.blocks.first().map(|block| block.first);
        while let Some(inst) = pos {
            out.push(inst);
            pos = self.instruction(inst).next;
        }
        out
    }

    pub fn display<'a, F: Fn(usize) -> String>(&'a self, name: &'a F) -> DisplayGraph<'a, F> {
        DisplayGraph { cfg: self, name }
    }
}

pub struct DisplayGraph<'a, F> {
    cfg: &'a ControlFlowGraph,
    name: &'a F,
}

impl<'a, F: Fn(usize) -> String> Display for DisplayGraph<'a, F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}", self.cfg.name)?;
        for block in &self.cfg.blocks {
            writeln!(
                f,
                "{} (succs={})",
                block.number,
                block.successors().join(",")
            )?;
            for inst in self.cfg.instructions_of(block.number) {
                writeln!(f, "  {}", self.cfg.instruction(inst).display(self.name))?;
            }
        }
        Ok(())
    }
}

/// Every graph built from one source file, `main` first.
#[derive(Debug)]
pub struct Program {
    pub cfgs: Vec<ControlFlowGraph>,
    pub names: Vec<String>,
}

impl Program {
    #[cfg(test)]
    pub fn cfg(&self, name: &str) -> Option<&ControlFlowGraph> {
        self.cfgs.iter().find(|cfg| cfg.name == name)
    }

    #[cfg(test)]
    pub fn main(&self) -> &ControlFlowGraph {
        &self.cfgs[0]
    }

    pub fn identifier_name(&self, id: usize) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("${id}"))
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = |id| self.identifier_name(id);
        for cfg in &self.cfgs {
            writeln!(f, "{}", cfg.display(&name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_sources(cfg: &ControlFlowGraph, target: InstId) -> Vec<InstId> {
        cfg.instructions()
            .filter(|inst| inst.branch_target() == Some(target))
            .map(Instruction::index)
            .collect()
    }

    #[test]
    fn test_placeholder_is_overwritten_in_place() {
        let mut cfg = ControlFlowGraph::new("main");
        let block = cfg.create_block();
        let placeholder = cfg.block(block).first();
        assert!(cfg.has_placeholder(block));

        let add = cfg.emit(
            block,
            OpCode::Add,
            Some(Operand::Constant(1)),
            Some(Operand::Constant(0)),
        );
        assert_eq!(add, placeholder);
        assert!(!cfg.has_placeholder(block));

        let sub = cfg.emit(block, OpCode::Sub, Some(Operand::Value(add)), None);
        assert_eq!(sub, InstId(1));
        assert_eq!(cfg.block(block).last(), sub);
        assert_eq!(cfg.linear(), vec![add, sub]);
    }

    #[test]
    fn test_phi_displaces_head_and_retargets_branches() {
        let mut cfg = ControlFlowGraph::new("main");
        let entry = cfg.create_block();
        let join = cfg.create_block();
        let cmp = cfg.emit(entry, OpCode::Cmp, Some(Operand::Constant(1)), None);
        let bne = cfg.emit(entry, OpCode::Bne, Some(Operand::Value(cmp)), None);
        let head = cfg.emit(join, OpCode::End, None, None);
        cfg.set_operand(bne, Slot::Second, Operand::Value(head));
        cfg.connect_instructions(bne, head);
        assert_eq!(cfg.instruction(head).branch_destination_for(), &[bne]);

        let phi = cfg.emit_phi(join, 4, Operand::Constant(1), Operand::Constant(2), 0);
        assert_eq!(cfg.block(join).first(), phi);
        assert_eq!(cfg.instruction(bne).branch_target(), Some(phi));
        assert!(cfg.instruction(head).branch_destination_for().is_empty());
        assert_eq!(cfg.instruction(phi).branch_destination_for(), &[bne]);
        assert_eq!(cfg.linear(), vec![cmp, bne, phi, head]);

        let second = cfg.emit_phi(join, 5, Operand::Constant(3), Operand::Constant(4), 0);
        assert_eq!(cfg.phis_of(join), vec![phi, second]);
        assert_eq!(cfg.block(join).first(), phi);
        assert_eq!(cfg.block(join).phi_for(5), Some(second));
        assert_eq!(cfg.linear(), vec![cmp, bne, phi, second, head]);

        for inst in cfg.instructions() {
            let mut expected = branch_sources(&cfg, inst.index());
            let mut actual = inst.branch_destination_for().to_vec();
            expected.sort();
            actual.sort();
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn test_insert_before_keeps_the_chain() {
        let mut cfg = ControlFlowGraph::new("main");
        let entry = cfg.create_block();
        let read = cfg.emit(entry, OpCode::Read, None, None);
        let write = cfg.emit(entry, OpCode::Write, Some(Operand::Value(read)), None);

        let address = cfg.insert_before(
            read,
            OpCode::Add,
            Some(Operand::Constant(0)),
            Some(Operand::Constant(4)),
        );
        let load = cfg.insert_before(read, OpCode::Load, Some(Operand::Value(address)), None);
        assert_eq!(cfg.block(entry).first(), address);
        assert_eq!(cfg.block(entry).last(), write);
        assert_eq!(cfg.linear(), vec![address, load, read, write]);
        assert_eq!(cfg.instruction(load).previous(), Some(address));
        assert_eq!(cfg.instruction(read).previous(), Some(load));
        assert_eq!(cfg.instruction(load).block(), entry);
    }

    #[test]
    fn test_phi_appended_to_phi_only_block_updates_last() {
        let mut cfg = ControlFlowGraph::new("main");
        let join = cfg.create_block();
        let first = cfg.emit_phi(join, 4, Operand::Null, Operand::Null, 0);
        let second = cfg.emit_phi(join, 5, Operand::Null, Operand::Null, 0);
        assert_eq!(cfg.block(join).first(), first);
        assert_eq!(cfg.block(join).last(), second);
        assert_eq!(cfg.instructions_of(join), vec![first, second]);
    }

    #[test]
    fn test_retargeting_a_branch_moves_its_reverse_edge() {
        let mut cfg = ControlFlowGraph::new("main");
        let a = cfg.create_block();
        let b = cfg.create_block();
        let c = cfg.create_block();
        let bra = cfg.emit_branch(a, cfg.block(b).first());
        assert_eq!(cfg.instruction(cfg.block(b).first()).branch_destination_for(), &[bra]);

        cfg.set_operand(bra, Slot::First, Operand::Value(cfg.block(c).first()));
        assert!(cfg
            .instruction(cfg.block(b).first())
            .branch_destination_for()
            .is_empty());
        assert_eq!(cfg.instruction(cfg.block(c).first()).branch_destination_for(), &[bra]);
    }
}
