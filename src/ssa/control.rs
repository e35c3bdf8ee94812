use log::debug;

use super::context::{BuilderContext, LoopRegion};
use crate::ir::{BlockId, InstId, Operand, Slot};

/// Blocks of an `if` whose arms are being parsed.
#[derive(Debug)]
pub struct IfStatement {
    entry: BlockId,
    join: BlockId,
    then_block: BlockId,
    then_tail: Option<BlockId>,
    else_block: Option<BlockId>,
    fixup: Option<InstId>,
}

/// Blocks of a `while` whose body is being parsed.
#[derive(Debug)]
pub struct WhileLoop {
    header: BlockId,
    body: BlockId,
    follow: BlockId,
    fixup: Option<InstId>,
}

impl BuilderContext {
    fn inherit_join(&mut self, from: BlockId, to: BlockId) {
        let cfg = self.cfg_mut();
        let (join_block, joining_from_left) = {
            let from = cfg.block(from);
            (from.join_block, from.joining_from_left)
        };
        let to = cfg.block_mut(to);
        to.join_block = join_block;
        to.joining_from_left = joining_from_left;
    }

    fn patch_branch(&mut self, branch: Option<InstId>, target: BlockId) {
        if let Some(branch) = branch {
            let cfg = self.cfg_mut();
            let head = cfg.block(target).first();
            cfg.set_operand(branch, Slot::Second, Operand::Value(head));
        }
    }

    /// Creates the join and then-arm blocks around the current block. The
    /// condition is still emitted into the current block.
    pub fn enter_if(&mut self) -> IfStatement {
        let entry = self.current_block();
        let join = self.cfg_mut().create_block();
        self.inherit_join(entry, join);

        let cfg = self.cfg_mut();
        let then_block = cfg.create_block();
        cfg.block_mut(then_block).join_block = Some(join);
        cfg.set_fall_through(entry, then_block);
        cfg.add_immediate_domination(entry, then_block);
        cfg.add_immediate_domination(entry, join);

        IfStatement {
            entry,
            join,
            then_block,
            then_tail: None,
            else_block: None,
            fixup: None,
        }
    }

    pub fn begin_then(&mut self, stmt: &mut IfStatement, fixup: InstId) {
        stmt.fixup = Some(fixup);
        self.set_current_block(stmt.then_block);
    }

    /// Closes the then-arm, rolls its versions back and opens the else-arm.
    pub fn begin_else(&mut self, stmt: &mut IfStatement) {
        let then_tail = self.current_block();
        stmt.then_tail = Some(then_tail);
        self.reset_value_lists_to_phis(stmt.join);

        let cfg = self.cfg_mut();
        let else_block = cfg.create_block();
        let block = cfg.block_mut(else_block);
        block.join_block = Some(stmt.join);
        block.joining_from_left = false;
        cfg.set_branch(stmt.entry, else_block);
        cfg.link_blocks(then_tail, else_block);
        cfg.add_immediate_domination(stmt.entry, else_block);

        stmt.else_block = Some(else_block);
        self.set_current_block(else_block);
    }

    /// Wires both arms into the join, then makes the join's phis the current
    /// versions and hands them outwards.
    pub fn finish_if(&mut self, stmt: IfStatement) {
        let tail = self.current_block();
        let join = stmt.join;

        match stmt.else_block {
            Some(else_block) => {
                // the else block's head is only final once its arm is parsed
                self.patch_branch(stmt.fixup, else_block);
                let then_tail = stmt.then_tail.unwrap_or(stmt.then_block);
                let cfg = self.cfg_mut();
                cfg.set_branch(then_tail, join);
                let head = cfg.block(join).first();
                cfg.emit_branch(then_tail, head);
                cfg.set_fall_through(tail, join);
            }
            None => {
                self.patch_branch(stmt.fixup, join);
                let cfg = self.cfg_mut();
                cfg.set_branch(stmt.entry, join);
                cfg.set_fall_through(tail, join);
            }
        }

        self.reset_value_lists_to_phis(join);
        self.set_current_block(join);
        self.propagate_phis(join);
        self.push_phi_values(join);
    }

    /// Sets up header, body and follow blocks. An empty current block serves
    /// as the header itself, unless it is the entry block, which has to stay
    /// free of phis to hold the entry loads of globals.
    pub fn enter_while(&mut self) -> WhileLoop {
        let current = self.current_block();
        let reusable = self.cfg().has_placeholder(current) && self.cfg().entry() != Some(current);
        let header = if reusable {
            current
        } else {
            let header = self.cfg_mut().create_block();
            self.inherit_join(current, header);
            let cfg = self.cfg_mut();
            cfg.set_fall_through(current, header);
            cfg.add_immediate_domination(current, header);
            header
        };

        let cfg = self.cfg_mut();
        let body = cfg.create_block();
        let block = cfg.block_mut(body);
        block.join_block = Some(header);
        block.joining_from_left = false;
        let follow = self.cfg_mut().create_block();
        self.inherit_join(current, follow);

        let cfg = self.cfg_mut();
        cfg.set_fall_through(header, body);
        cfg.set_branch(header, follow);
        cfg.add_immediate_domination(header, body);
        cfg.add_immediate_domination(header, follow);

        self.loops.push(LoopRegion { header, body });
        self.set_current_block(header);
        WhileLoop {
            header,
            body,
            follow,
            fixup: None,
        }
    }

    pub fn begin_loop_body(&mut self, lp: &mut WhileLoop, fixup: InstId) {
        lp.fixup = Some(fixup);
        self.set_current_block(lp.body);
    }

    /// Closes the back edge, renames pre-loop operands to the header phis and
    /// continues in the follow block.
    pub fn finish_while(&mut self, lp: WhileLoop) {
        let tail = self.current_block();
        let header = lp.header;
        self.patch_branch(lp.fixup, lp.follow);

        let cfg = self.cfg_mut();
        cfg.set_branch(tail, header);
        let head = cfg.block(header).first();
        cfg.emit_branch(tail, head);
        cfg.link_blocks(tail, lp.follow);

        let region = LoopRegion {
            header,
            body: lp.body,
        };
        self.loops.retain(|open| *open != region);
        self.rename_loop_operands(region);
        self.reset_value_lists_to_phis(header);
        self.set_current_block(header);
        self.propagate_phis(header);

        // the enclosing loop may have gained phis from this one
        let enclosing = self.loops.last().copied();
        if let Some(outer) = enclosing {
            if self.cfg().block(header).join_block == Some(outer.header) {
                self.rename_loop_operands(outer);
            }
        }

        self.push_phi_values(header);
        self.set_current_block(lp.follow);
        debug!("{}: closed loop at {header}", self.cfg().name());
    }
}
