use std::collections::HashMap;
use std::iter;

use itertools::Itertools;
use log::debug;

use super::context::{BuilderContext, LoopRegion};
use crate::ir::{BlockId, InstId, Operand, Slot};

impl BuilderContext {
    /// Records that `variable` changed from `before` to `after` in the current
    /// block. If the block feeds a merge, the merge's phi for the variable is
    /// created, or the operand belonging to this side of it is updated.
    pub fn add_phi(
        &mut self,
        variable: usize,
        before_len: usize,
        before: Operand,
        after: Operand,
    ) -> Option<InstId> {
        let current = self.current_block();
        let cfg = self.cfg_mut();
        let join = cfg.block(current).join_block?;
        let from_left = cfg.block(current).joining_from_left;

        if let Some(phi) = cfg.block(join).phi_for(variable) {
            let slot = if from_left { Slot::First } else { Slot::Second };
            cfg.set_operand(phi, slot, after);
            return Some(phi);
        }

        let (left, right) = if from_left {
            (after, before)
        } else {
            (before, after)
        };
        Some(cfg.emit_phi(join, variable, left, right, before_len))
    }

    /// The operand a phi created now would take for `variable` on the side
    /// this block does not feed. `Null` when no new phi can be created.
    pub(super) fn version_before(&mut self, variable: usize) -> Operand {
        let cfg = self.cfg();
        let creates_phi = cfg
            .block(self.current_block())
            .join_block
            .map_or(false, |join| cfg.block(join).phi_for(variable).is_none());
        if creates_phi {
            self.current_value(variable)
        } else {
            Operand::Null
        }
    }

    /// (phi, variable, stack length before the construct) for every phi in `join`.
    fn phi_variables(&self, join: BlockId) -> Vec<(InstId, usize, usize)> {
        let cfg = self.cfg();
        cfg.phis_of(join)
            .into_iter()
            .filter_map(|phi| {
                let inst = cfg.instruction(phi);
                Some((phi, inst.affected_variable()?, inst.phi_before_len()?))
            })
            .collect()
    }

    /// Rolls back every variable with a phi in `join` to its version from
    /// before the construct started.
    pub fn reset_value_lists_to_phis(&mut self, join: BlockId) {
        for (_, variable, before_len) in self.phi_variables(join) {
            if let Some(symbol) = self.lookup_mut(variable) {
                symbol.reset_value_list_to(before_len);
            }
        }
    }

    /// Hands the phis of `join` on to the merge enclosing it. The current
    /// block must be `join`.
    pub fn propagate_phis(&mut self, join: BlockId) {
        for (phi, variable, before_len) in self.phi_variables(join) {
            let before = self.version_before(variable);
            self.add_phi(variable, before_len, before, Operand::Value(phi));
        }
    }

    /// Makes each phi of `join` the current version of its variable.
    pub fn push_phi_values(&mut self, join: BlockId) {
        for (phi, variable, _) in self.phi_variables(join) {
            if let Some(symbol) = self.lookup_mut(variable) {
                symbol.push_value(Operand::Value(phi));
            }
        }
    }

    /// Rewrites uses of pre-loop values inside `region` to the header phis
    /// that replace them. Returns the number of operands rewritten.
    pub fn rename_loop_operands(&mut self, region: LoopRegion) -> usize {
        let cfg = self.cfg_mut();
        let phis = cfg.phis_of(region.header);
        let renames: HashMap<Operand, Operand> = phis
            .iter()
            .filter_map(|&phi| match cfg.instruction(phi).operand1()? {
                Operand::Constant(_) | Operand::Null => None,
                before => Some((before.clone(), Operand::Value(phi))),
            })
            .collect();
        if renames.is_empty() {
            return 0;
        }

        let blocks = iter::once(region.header)
            .chain((region.body.0..cfg.block_count()).map(BlockId))
            .collect_vec();
        let mut renamed = 0;
        for block in blocks {
            for inst in cfg.instructions_of(block) {
                if phis.contains(&inst) {
                    continue;
                }
                let target_slot = cfg.instruction(inst).opcode().target_slot();
                for slot in [Slot::First, Slot::Second] {
                    if target_slot == Some(slot) {
                        continue;
                    }
                    let replacement = cfg
                        .instruction(inst)
                        .operand(slot)
                        .and_then(|operand| renames.get(operand))
                        .cloned();
                    if let Some(replacement) = replacement {
                        cfg.set_operand(inst, slot, replacement);
                        renamed += 1;
                    }
                }
                for position in 0..cfg.instruction(inst).params().len() {
                    let replacement = renames
                        .get(&cfg.instruction(inst).params()[position])
                        .cloned();
                    if let Some(replacement) = replacement {
                        cfg.set_param(inst, position, replacement);
                        renamed += 1;
                    }
                }
            }
        }
        debug!(
            "{}: renamed {renamed} operands for loop at {}",
            cfg.name(),
            region.header
        );
        renamed
    }
}
