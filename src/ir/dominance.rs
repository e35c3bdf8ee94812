use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use super::structs::{BlockId, ControlFlowGraph};
use crate::utils::explore;

pub type BlockDataLookup<T> = HashMap<BlockId, T>;

/*
Cooper, Keith D., Timothy J. Harvey, and Ken Kennedy.
"A simple, fast dominance algorithm." Software Practice & Experience 4.1-10 (2001): 1-8.
*/

pub fn sort_blocks_postorder(
    cfg: &ControlFlowGraph,
    root: BlockId,
) -> (
    Box<[BlockId]>,
    BlockDataLookup<usize>,
    BlockDataLookup<Vec<BlockId>>,
) {
    let mut blocks = vec![];
    let mut predecessors = BlockDataLookup::new();
    let mut visited = HashSet::new();

    explore(
        root,
        |pos| {
            if visited.insert(*pos) {
                (
                    cfg.block(*pos)
                        .successors()
                        .map(|dst| {
                            predecessors.entry(dst).or_insert(vec![]).push(*pos);
                            dst
                        })
                        .collect_vec(),
                    true,
                )
            } else {
                (vec![], false)
            }
        },
        |pos, _: Vec<()>, unexplored| {
            if unexplored {
                blocks.push(pos);
            }
        },
    );

    let index_lookup = blocks
        .iter()
        .enumerate()
        .map(|(a, b)| (*b, a))
        .collect();
    (blocks.into_boxed_slice(), index_lookup, predecessors)
}

/// Immediate dominator of every block reachable from the entry. The entry
/// maps to itself.
pub fn immediate_dominators(cfg: &ControlFlowGraph) -> BlockDataLookup<BlockId> {
    let Some(start_block) = cfg.entry() else {
        return BlockDataLookup::new();
    };
    let (blocks, index_lookup, predecessors) = sort_blocks_postorder(cfg, start_block);

    let mut dominators = BlockDataLookup::new();
    dominators.insert(start_block, start_block);
    let mut changed = true;
    while changed {
        changed = false;
        // reverse postorder, skipping the root
        for node in blocks.iter().rev().skip(1) {
            let idom = predecessors
                .get(node)
                .into_iter()
                .flatten()
                .copied()
                .filter(|pred| dominators.contains_key(pred))
                .reduce(|a, b| intersect(a, b, &index_lookup, &dominators));
            let Some(idom) = idom else {
                continue;
            };

            if dominators.get(node) != Some(&idom) {
                dominators.insert(*node, idom);
                changed = true;
            }
        }
    }
    dominators
}

fn intersect(
    mut a: BlockId,
    mut b: BlockId,
    index_lookup: &BlockDataLookup<usize>,
    dominators: &BlockDataLookup<BlockId>,
) -> BlockId {
    while a != b {
        while index_lookup[&a] < index_lookup[&b] {
            a = dominators[&a];
        }
        while index_lookup[&b] < index_lookup[&a] {
            b = dominators[&b];
        }
    }
    a
}

pub fn find_immediately_dominated(
    dominators: &BlockDataLookup<BlockId>,
) -> BlockDataLookup<Vec<BlockId>> {
    let mut dominated = BlockDataLookup::new();
    for (block, dom) in dominators.iter().sorted() {
        if block == dom {
            // it's the root node, so it's a special case
            continue;
        }
        dominated.entry(*dom).or_insert(vec![]).push(*block);
    }
    dominated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{OpCode, Operand};

    #[test]
    fn test_diamond() {
        let mut cfg = ControlFlowGraph::new("main");
        let entry = cfg.create_block();
        let left = cfg.create_block();
        let right = cfg.create_block();
        let join = cfg.create_block();
        cfg.emit(entry, OpCode::Cmp, Some(Operand::Constant(0)), None);
        cfg.block_mut(entry).fall_through = Some(left);
        cfg.block_mut(entry).branch = Some(right);
        cfg.block_mut(left).branch = Some(join);
        cfg.block_mut(right).fall_through = Some(join);

        let idoms = immediate_dominators(&cfg);
        assert_eq!(idoms[&entry], entry);
        assert_eq!(idoms[&left], entry);
        assert_eq!(idoms[&right], entry);
        assert_eq!(idoms[&join], entry);

        let dominated = find_immediately_dominated(&idoms);
        assert_eq!(dominated[&entry], vec![left, right, join]);
    }

    #[test]
    fn test_loop() {
        let mut cfg = ControlFlowGraph::new("main");
        let header = cfg.create_block();
        let follow = cfg.create_block();
        let body = cfg.create_block();
        let inner = cfg.create_block();
        cfg.block_mut(header).fall_through = Some(body);
        cfg.block_mut(header).branch = Some(follow);
        cfg.block_mut(body).fall_through = Some(inner);
        cfg.block_mut(inner).branch = Some(header);

        let idoms = immediate_dominators(&cfg);
        assert_eq!(idoms[&body], header);
        assert_eq!(idoms[&follow], header);
        assert_eq!(idoms[&inner], body);
    }
}
