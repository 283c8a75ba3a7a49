//! Graph invariant checking.

use crate::errors::VerifierErrors;
use crate::ir::node::NodeAttr;
use crate::ir::opcode::{Arity, Opcode};
use crate::ir::{walk, Graph, Node};
use crate::mode::{self, ModeRegistry};

fn check_arity(g: &Graph, n: Node, errors: &mut VerifierErrors) {
    let op = g.opcode(n);
    let expected = match op {
        Opcode::User(_) => return,
        _ => op.builtin_info().arity,
    };
    let arity = g.arity(n);
    let ok = match expected {
        Arity::Zero => arity == 0,
        Arity::Unary => arity == 1,
        Arity::Binary => arity == 2,
        Arity::Ternary => arity == 3,
        Arity::Variable | Arity::Dynamic | Arity::Any => true,
    };
    if !ok {
        errors.report(
            n,
            format!("{} has arity {}, opcode demands {:?}", op, arity, expected),
        );
    }
}

fn check_modes(g: &Graph, modes: &ModeRegistry, n: Node, errors: &mut VerifierErrors) {
    let op = g.opcode(n);
    let m = g.mode(n);
    let input_mode = |i: usize| g.mode(g.input(n, i));
    let is_bad_in = |i: usize| g.is_bad(g.input(n, i));
    match op {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::And
        | Opcode::Or
        | Opcode::Eor => {
            if g.arity(n) == 2 {
                if !is_bad_in(0) && !is_bad_in(1) && input_mode(0) != input_mode(1) {
                    errors.report(n, format!("{} operands have different modes", op));
                }
                if !is_bad_in(0) && input_mode(0) != m {
                    errors.report(n, format!("{} result mode differs from operands", op));
                }
            }
        }
        Opcode::Cmp => {
            if g.arity(n) == 2 && !is_bad_in(0) && !is_bad_in(1) && input_mode(0) != input_mode(1)
            {
                errors.report(n, "Cmp operands have different modes".to_string());
            }
            if m != mode::T {
                errors.report(n, "Cmp produces the predicate tuple".to_string());
            }
        }
        Opcode::Cond => {
            if g.arity(n) == 1 && !is_bad_in(0) && input_mode(0) != mode::B {
                errors.report(n, "Cond selector is not a boolean".to_string());
            }
        }
        Opcode::Phi => {
            // Inputs positionally match the block's predecessors.
            let block = g.block_of(n);
            if g.arity(n) != g.n_block_preds(block) {
                errors.report(
                    n,
                    format!(
                        "Phi arity {} differs from its block's {} predecessors",
                        g.arity(n),
                        g.n_block_preds(block)
                    ),
                );
            }
            for i in 0..g.arity(n) {
                if !is_bad_in(i) && input_mode(i) != m {
                    errors.report(n, format!("Phi input {} has a foreign mode", i));
                }
            }
        }
        Opcode::Block => {
            for i in 0..g.arity(n) {
                let p = g.input(n, i);
                if !g.is_bad(p) && g.mode(p) != mode::X {
                    errors.report(n, format!("Block predecessor {} is not control flow", i));
                }
            }
        }
        Opcode::Return | Opcode::Load | Opcode::Store | Opcode::Div | Opcode::Mod
        | Opcode::Call | Opcode::CopyB => {
            if g.arity(n) > 0 && !is_bad_in(0) && input_mode(0) != mode::M {
                errors.report(n, format!("{} lacks a memory input", op));
            }
        }
        _ => {}
    }
    let _ = modes;
}

/// Verify the structural invariants of `g`, collecting diagnostics.
///
/// Checks: every non-Block node sits in a Block; arity classes hold; the
/// per-opcode mode discipline holds; exactly one `Start` and one `End`
/// exist; the out-edge index (when consistent) is an exact inverse of the
/// in-edges. `Bad` inputs are legal everywhere.
pub fn verify_graph(g: &mut Graph, modes: &ModeRegistry) -> VerifierErrors {
    let mut errors = VerifierErrors::default();
    let (_, nodes) = walk::node_orders(g);

    let mut n_start = 0usize;
    let mut n_end = 0usize;
    for &n in &nodes {
        match g.opcode(n) {
            Opcode::Start => n_start += 1,
            Opcode::End => n_end += 1,
            _ => {}
        }
        if !g.is_block(n) {
            match g.try_block_of(n) {
                Some(b) if g.is_block(b) => {}
                Some(b) => errors.report(n, format!("containing node {} is not a Block", b)),
                None => errors.report(n, "node has no containing block".to_string()),
            }
        }
        check_arity(g, n, &mut errors);
        check_modes(g, modes, n, &mut errors);
        if let (Opcode::Block, NodeAttr::Block(attr)) = (g.opcode(n), g.attr(n)) {
            if !attr.matured && n != g.anchors.end_block {
                errors.report(n, "block never matured".to_string());
            }
        }
    }
    if n_start != 1 {
        errors.report(g.anchors.start, format!("{} Start nodes", n_start));
    }
    if n_end != 1 {
        errors.report(g.anchors.end, format!("{} End nodes", n_end));
    }

    if g.outs_state() == crate::ir::InfoState::Consistent {
        for &n in &nodes {
            for &u in g.outs(n) {
                let listed = (0..g.arity(u)).any(|i| g.raw_input(u, i) == n)
                    || g.try_block_of(u) == Some(n);
                if !listed {
                    errors.report(n, format!("out-edge to {} without matching input", u));
                }
            }
            for i in 0..g.arity(n) {
                let p = g.raw_input(n, i);
                if !g.outs(p).contains(&n) {
                    errors.report(n, format!("input {} not mirrored by an out-edge", p));
                }
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeRegistry;
    use crate::tarval::Tarval;

    #[test]
    fn fresh_graph_verifies() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let mem = g.anchors.initial_mem;
        let c = g.new_const(&modes, Tarval::from_i64(0, mode::IS, &modes));
        let ret = g.new_return(&modes, block, mem, &[c]);
        let end_block = g.anchors.end_block;
        g.add_in_edge(end_block, ret);
        g.set_matured(end_block);
        let errors = verify_graph(&mut g, &modes);
        assert!(errors.is_empty(), "unexpected: {}", errors);
    }

    #[test]
    fn mode_mismatch_is_reported() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let a = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let b = g.new_proj(&modes, g.anchors.args, mode::LS, 1);
        // Build the broken node behind the constructors' back.
        use crate::ir::node::NodeAttr;
        let broken = g.add_node(Opcode::Add, mode::IS, Some(block), &[a, b], NodeAttr::None);
        g.keep_alive(broken);
        let errors = verify_graph(&mut g, &modes);
        assert!(!errors.is_empty());
    }
}
