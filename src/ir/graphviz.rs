use std::fmt::Write;

use super::dominance::{find_immediately_dominated, immediate_dominators};
use super::structs::ControlFlowGraph;

fn escape_dot(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('<', "\\<")
        .replace('>', "\\>")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('|', "\\|")
}

/// Renders the blocks of `cfg` as record nodes, one edge per successor.
pub fn cfg_to_dot<F: Fn(usize) -> String>(cfg: &ControlFlowGraph, name: &F) -> String {
    let mut dot = String::new();

    let _ = writeln!(dot, "digraph \"{}\" {{", escape_dot(cfg.name()));
    dot.push_str("    node [shape=record, fontname=\"Courier\", fontsize=10];\n\n");

    for block in cfg.blocks() {
        let mut label = format!("<b>{}", block.number());
        for inst in cfg.instructions_of(block.number()) {
            let text = cfg.instruction(inst).display(name).to_string();
            let _ = write!(label, "| {}\\l", escape_dot(&text));
        }
        let _ = writeln!(
            dot,
            "    bb{} [label=\"{{{}}}\"];",
            block.number().0,
            label
        );
    }
    dot.push('\n');

    for block in cfg.blocks() {
        if let Some(target) = block.fall_through {
            let _ = writeln!(
                dot,
                "    bb{}:s -> bb{}:n [label=\"fall-through\"];",
                block.number().0,
                target.0
            );
        }
        if let Some(target) = block.branch {
            let _ = writeln!(
                dot,
                "    bb{}:s -> bb{}:n [label=\"branch\"];",
                block.number().0,
                target.0
            );
        }
    }

    dot.push_str("}\n");
    dot
}

pub fn dominator_tree_to_dot(cfg: &ControlFlowGraph) -> String {
    let mut dot = String::new();

    let _ = writeln!(dot, "digraph \"{}_dom\" {{", escape_dot(cfg.name()));
    dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n\n");

    for block in cfg.blocks() {
        let _ = writeln!(
            dot,
            "    bb{} [label=\"{}\"];",
            block.number().0,
            block.number()
        );
    }

    let dominated = find_immediately_dominated(&immediate_dominators(cfg));
    let mut edges: Vec<_> = dominated.iter().collect();
    edges.sort();
    for (dominator, children) in edges {
        for child in children {
            let _ = writeln!(dot, "    bb{} -> bb{};", dominator.0, child.0);
        }
    }

    dot.push_str("}\n");
    dot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{OpCode, Operand};

    #[test]
    fn test_cfg_dot_lists_blocks_and_edges() {
        let mut cfg = ControlFlowGraph::new("main");
        let entry = cfg.create_block();
        let exit = cfg.create_block();
        cfg.emit(entry, OpCode::Write, Some(Operand::Constant(1)), None);
        cfg.emit(exit, OpCode::End, None, None);
        cfg.block_mut(entry).fall_through = Some(exit);

        let dot = cfg_to_dot(&cfg, &|id| format!("v{id}"));
        assert!(dot.starts_with("digraph \"main\" {"));
        assert!(dot.contains("bb0 [label=\"{<b>BB0| 0: write #1\\l}\"];"));
        assert!(dot.contains("bb0:s -> bb1:n [label=\"fall-through\"];"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_dominator_tree_dot() {
        let mut cfg = ControlFlowGraph::new("f");
        let entry = cfg.create_block();
        let then = cfg.create_block();
        let join = cfg.create_block();
        cfg.block_mut(entry).fall_through = Some(then);
        cfg.block_mut(entry).branch = Some(join);
        cfg.block_mut(then).fall_through = Some(join);

        let dot = dominator_tree_to_dot(&cfg);
        assert!(dot.contains("bb0 -> bb1;"));
        assert!(dot.contains("bb0 -> bb2;"));
        assert!(!dot.contains("bb1 -> bb2;"));
    }
}
