//! Hand-built graphs shared by the analysis tests.

use crate::ir::{pn, Graph, Node};
use crate::mode::{self, ModeRegistry};
use crate::tarval::{Relation, Tarval};

/// `if (arg0 < 0) then {} else {}; join; return`.
///
/// Returns the graph and `[header, then_block, else_block, join]`.
pub fn diamond(modes: &ModeRegistry) -> (Graph, [Node; 4]) {
    let mut g = Graph::new(modes);
    let jmp = g.new_jmp(modes, g.anchors.start_block);
    let header = g.new_block(&[jmp]);
    let x = g.new_proj(modes, g.anchors.args, mode::IS, 0);
    let zero = g.new_const(modes, Tarval::from_i64(0, mode::IS, modes));
    let cmp = g.new_cmp(modes, header, x, zero);
    let lt = g.new_proj(modes, cmp, mode::B, Relation::LESS.0 as u32);
    let cond = g.new_cond(modes, header, lt);
    let proj_true = g.new_proj(modes, cond, mode::X, pn::cond::TRUE);
    let proj_false = g.new_proj(modes, cond, mode::X, pn::cond::FALSE);
    let then_block = g.new_block(&[proj_true]);
    let else_block = g.new_block(&[proj_false]);
    let jmp_then = g.new_jmp(modes, then_block);
    let jmp_else = g.new_jmp(modes, else_block);
    let join = g.new_block(&[jmp_then, jmp_else]);
    let mem = g.anchors.initial_mem;
    let ret = g.new_return(modes, join, mem, &[]);
    let end_block = g.anchors.end_block;
    g.add_in_edge(end_block, ret);
    g.set_matured(end_block);
    (g, [header, then_block, else_block, join])
}

/// `header: while (arg0 < 10) body; exit; return`.
///
/// Returns the graph and `[header, body, exit]`. The loop-carried counter
/// phi is returned as the fourth node.
pub fn counted_loop(modes: &ModeRegistry) -> (Graph, [Node; 3], Node) {
    let mut g = Graph::new(modes);
    let jmp0 = g.new_jmp(modes, g.anchors.start_block);

    // The header needs its body predecessor before the body exists; build
    // it immature the way the construction engine would.
    let header = g.new_immature_block();
    g.add_in_edge(header, jmp0);

    let init = g.new_const(modes, Tarval::from_i64(0, mode::IS, modes));
    // Loop-carried counter: phi(init, i + 1).
    let phi = g.add_node(
        crate::ir::Opcode::Phi,
        mode::IS,
        Some(header),
        &[],
        crate::ir::NodeAttr::None,
    );
    let ten = g.new_const(modes, Tarval::from_i64(10, mode::IS, modes));
    let cmp = g.new_cmp(modes, header, phi, ten);
    let lt = g.new_proj(modes, cmp, mode::B, Relation::LESS.0 as u32);
    let cond = g.new_cond(modes, header, lt);
    let stay = g.new_proj(modes, cond, mode::X, pn::cond::TRUE);
    let leave = g.new_proj(modes, cond, mode::X, pn::cond::FALSE);

    let body = g.new_block(&[stay]);
    let one = g.new_const(modes, Tarval::from_i64(1, mode::IS, modes));
    let next = g.new_add(modes, body, phi, one);
    let jmp_back = g.new_jmp(modes, body);
    g.add_in_edge(header, jmp_back);
    g.set_inputs(phi, &[init, next]);
    g.set_matured(header);

    let exit = g.new_block(&[leave]);
    let mem = g.anchors.initial_mem;
    let ret = g.new_return(modes, exit, mem, &[phi]);
    let end_block = g.anchors.end_block;
    g.add_in_edge(end_block, ret);
    g.set_matured(end_block);

    (g, [header, body, exit], phi)
}
