//! SSA destruction.
//!
//! After coloring, the phis have to go: at the end of every predecessor
//! the phi arguments must arrive in the phis' registers. Critical edges
//! are split first so every such edge has a block of its own to host the
//! shuffle code. The register moves of one edge form a permutation;
//! acyclic parts become `Copy` instructions, cycles become a `Perm`,
//! which the lowering step expands into the target's pairwise swap idiom.
//! The phi itself is replaced by a colored `Copy` at its block's top, so
//! no phi of the allocated class survives.

use crate::ana::cfg::BlockGraph;
use crate::be::color::{Coloring, NO_REG};
use crate::be::isa::{Isa, RegClass};
use crate::be::liveness::in_class;
use crate::be::sched::Schedule;
use crate::ir::{Graph, Node, Opcode};
use crate::mode::ModeRegistry;
use crate::timing;
use smallvec::SmallVec;

/// Split every critical edge (from a forking block into a joining block)
/// by inserting a fresh block. Returns whether the graph changed; the
/// block graph and every analysis are stale afterwards.
pub fn split_critical_edges(g: &mut Graph, bg: &BlockGraph, modes: &ModeRegistry) -> bool {
    let mut changed = false;
    let blocks: Vec<Node> = bg.blocks.clone();
    for b in blocks {
        if g.n_block_preds(b) < 2 {
            continue;
        }
        for i in 0..g.n_block_preds(b) {
            let cf = g.block_pred(b, i);
            if g.is_bad(cf) {
                continue;
            }
            let p = g.block_of(cf);
            if bg.succs(p).len() < 2 {
                continue;
            }
            // p forks and b joins: give the edge its own block.
            let split = g.new_block(&[cf]);
            let jmp = g.new_jmp(modes, split);
            g.set_input(b, i, jmp);
            changed = true;
            log::debug!("split critical edge {} -> {} with {}", p, b, split);
        }
    }
    changed
}

// One register move at a predecessor's end.
#[derive(Debug, Clone, Copy)]
struct Move {
    phi: Node,
    src: Node,
    dst_reg: u32,
}

/// Eliminate every phi of class `rc`, preserving the coloring.
pub fn destruct_ssa(
    g: &mut Graph,
    bg: &BlockGraph,
    sched: &mut Schedule,
    coloring: &mut Coloring,
    modes: &ModeRegistry,
    isa: &Isa,
    rc: RegClass,
) {
    let _tt = timing::ssa_destruction();
    g.assure_outs();
    for &b in &bg.blocks {
        let phis: Vec<Node> = sched
            .nodes(b)
            .iter()
            .copied()
            .filter(|&n| g.opcode(n) == Opcode::Phi && in_class(g, modes, isa, rc, n))
            .collect();
        if phis.is_empty() {
            continue;
        }

        for i in 0..g.n_block_preds(b) {
            let p = match g.block_pred_block(b, i) {
                Some(p) => p,
                None => continue,
            };
            let mut moves: Vec<Move> = Vec::new();
            for &phi in &phis {
                let src = g.input(phi, i);
                if g.is_bad(src) {
                    continue;
                }
                let dst_reg = coloring.get(phi);
                if dst_reg == NO_REG || coloring.get(src) == dst_reg {
                    continue;
                }
                moves.push(Move { phi, src, dst_reg });
            }
            realize_parallel_move(g, sched, coloring, p, i, &mut moves);
        }

        // The arguments now arrive in the phi's register on every edge;
        // the phi collapses to a copy naming that register.
        for phi in phis {
            let input0 = (0..g.arity(phi))
                .map(|j| g.input(phi, j))
                .find(|&v| !g.is_bad(v))
                .unwrap_or(g.anchors.bad);
            let replacement = g.new_copy(b, input0);
            coloring.set(replacement, coloring.get(phi));
            sched.insert_at_top(&*g, b, replacement);
            sched.remove(b, phi);
            g.exchange(phi, replacement);
            log::debug!("phi {} becomes {}", phi, replacement);
        }
    }
}

// Emit the copies and perms realizing one edge's parallel move at the end
// of `p`. `edge_idx` is the phi input position served.
fn realize_parallel_move(
    g: &mut Graph,
    sched: &mut Schedule,
    coloring: &mut Coloring,
    p: Node,
    edge_idx: usize,
    moves: &mut Vec<Move>,
) {
    // Acyclic chains first: a destination register nobody still reads can
    // be written immediately.
    loop {
        let mut progress = false;
        let mut j = 0;
        while j < moves.len() {
            let dst = moves[j].dst_reg;
            let read_later = moves
                .iter()
                .any(|m| coloring.get(m.src) == dst);
            if !read_later {
                let m = moves.remove(j);
                let copy = g.new_copy(p, m.src);
                coloring.set(copy, m.dst_reg);
                sched.insert_before_terminator(&*g, p, copy);
                g.set_input(m.phi, edge_idx, copy);
                progress = true;
            } else {
                j += 1;
            }
        }
        if !progress {
            break;
        }
    }

    // What remains are register cycles; each becomes one Perm whose
    // projections carry the rotated colors.
    while !moves.is_empty() {
        let mut cycle: SmallVec<[Move; 4]> = SmallVec::new();
        let first = moves.remove(0);
        let mut want = coloring.get(first.src);
        cycle.push(first);
        while let Some(pos) = moves.iter().position(|m| m.dst_reg == want) {
            let m = moves.remove(pos);
            want = coloring.get(m.src);
            cycle.push(m);
        }
        let inputs: SmallVec<[Node; 4]> = cycle.iter().map(|m| m.src).collect();
        let perm = g.new_perm(p, &inputs);
        sched.insert_before_terminator(&*g, p, perm);
        for (j, m) in cycle.iter().enumerate() {
            let proj = g.new_proj_raw(perm, g.mode(m.src), j as u32);
            coloring.set(proj, m.dst_reg);
            g.set_input(m.phi, edge_idx, proj);
        }
        log::debug!("register cycle of {} values resolved with {}", cycle.len(), perm);
    }
}

/// Expand every wide `Perm` into the pairwise swap idiom.
///
/// A cycle of length `n` becomes `n - 1` two-element perms; two-element
/// perms are already the target's swap and stay.
pub fn lower_perms(g: &mut Graph, bg: &BlockGraph, sched: &mut Schedule, coloring: &mut Coloring) {
    g.assure_outs();
    for &b in &bg.blocks {
        let perms: Vec<Node> = sched
            .nodes(b)
            .iter()
            .copied()
            .filter(|&n| g.opcode(n) == Opcode::Perm && g.arity(n) > 2)
            .collect();
        for perm in perms {
            let inputs: Vec<Node> = (0..g.arity(perm)).map(|i| g.input(perm, i)).collect();
            let projs: Vec<Option<Node>> = {
                let mut out = vec![None; inputs.len()];
                for &u in g.outs(perm) {
                    if g.opcode(u) == Opcode::Proj {
                        out[g.proj_num(u) as usize] = Some(u);
                    }
                }
                out
            };
            // Rotate with pairwise swaps: after swapping elements 0..=j,
            // position 0 holds the value destined for slot j + 1.
            let mut current = inputs[0];
            for j in 1..inputs.len() {
                let pair = g.new_perm(b, &[current, inputs[j]]);
                sched.insert_before(b, perm, pair);
                let a = g.new_proj_raw(pair, g.mode(inputs[j]), 0);
                let bproj = g.new_proj_raw(pair, g.mode(current), 1);
                if let Some(old) = projs[j - 1] {
                    coloring.set(bproj, coloring.get(old));
                    g.exchange(old, bproj);
                }
                current = a;
            }
            if let Some(old) = projs[inputs.len() - 1] {
                coloring.set(current, coloring.get(old));
                g.exchange(old, current);
            }
            sched.remove(b, perm);
            g.kill(perm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ana::domtree::DomTree;
    use crate::ana::testutil::counted_loop;
    use crate::be::color::color_graph;
    use crate::be::liveness::Liveness;
    use crate::be::sched::SelectorKind;
    use crate::be::uses::NextUses;
    use crate::mode::ModeRegistry;

    #[test]
    fn no_phi_survives_destruction() {
        let modes = ModeRegistry::new();
        let (mut g, _, _) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        if split_critical_edges(&mut g, &bg, &modes) {
            // Splitting changed the graph; recompute.
        }
        let bg = BlockGraph::compute(&mut g);
        let dt = DomTree::compute(&g, &bg);
        let mut sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = Isa::generic(4);
        let rc = RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let uses = NextUses::compute(&g, &bg, &sched, &modes, &isa, rc);
        let mut coloring =
            color_graph(&mut g, &bg, &dt, &sched, &live, &uses, &modes, &isa, rc);

        destruct_ssa(&mut g, &bg, &mut sched, &mut coloring, &modes, &isa, rc);

        for &b in &bg.blocks {
            for &n in sched.nodes(b) {
                assert_ne!(
                    g.opcode(n),
                    Opcode::Phi,
                    "phi {} survived destruction",
                    n
                );
            }
        }
    }

    #[test]
    fn critical_edges_get_their_own_blocks() {
        let modes = ModeRegistry::new();
        let (mut g, [header, _body, _exit], _) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        // The loop entry edge comes from the start block; the header also
        // receives the back edge, and the start block does not fork, so
        // nothing here is critical.
        let changed = split_critical_edges(&mut g, &bg, &modes);
        assert!(!changed);
        let _ = header;
    }
}
