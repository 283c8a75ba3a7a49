//! Liveness of register values.
//!
//! Per register class and per block: which values enter the block live and
//! which leave it live. Phi arguments are uses at the end of the matching
//! predecessor, phi results are defined at the top of their block; both
//! conventions are what the spiller, the interference builder and the
//! coloring assume.

use crate::ana::cfg::BlockGraph;
use crate::be::isa::{Isa, RegClass};
use crate::be::sched::Schedule;
use crate::ir::{Graph, Node, Opcode};
use crate::mode::ModeRegistry;
use crate::timing;
use firm_arena::{IdxSet, SecondaryMap};
use smallvec::SmallVec;

/// Is `v` a value allocated in class `rc`?
pub fn in_class(g: &Graph, modes: &ModeRegistry, isa: &Isa, rc: RegClass, v: Node) -> bool {
    isa.class_of(modes, g.mode(v)) == Some(rc)
}

/// The class values an instruction defines: its own result, its
/// class-moded projections, and projections of its tuple-moded
/// projections (the parameter values hang off the argument tuple of
/// `Start` this way, call results off the result tuple).
pub fn defined_values(
    g: &Graph,
    modes: &ModeRegistry,
    isa: &Isa,
    rc: RegClass,
    inst: Node,
) -> SmallVec<[Node; 2]> {
    let mut out: SmallVec<[Node; 2]> = SmallVec::new();
    if in_class(g, modes, isa, rc, inst) {
        out.push(inst);
    }
    if g.outs_state() == crate::ir::InfoState::Consistent {
        let mut work: SmallVec<[Node; 4]> = smallvec::smallvec![inst];
        while let Some(n) = work.pop() {
            for &u in g.outs(n) {
                if g.opcode(u) != Opcode::Proj {
                    continue;
                }
                if in_class(g, modes, isa, rc, u) {
                    if !out.contains(&u) {
                        out.push(u);
                    }
                } else if modes.data(g.mode(u)).sort == crate::mode::ModeSort::Tuple {
                    work.push(u);
                }
            }
        }
    }
    out
}

/// The class values an instruction uses (its class-moded operands; for a
/// phi these are charged to the predecessor blocks instead).
pub fn used_values(
    g: &Graph,
    modes: &ModeRegistry,
    isa: &Isa,
    rc: RegClass,
    inst: Node,
) -> SmallVec<[Node; 4]> {
    let mut out: SmallVec<[Node; 4]> = SmallVec::new();
    for i in 0..g.arity(inst) {
        let v = g.input(inst, i);
        if !g.is_bad(v) && in_class(g, modes, isa, rc, v) && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Live-in/live-out sets per block, for one register class.
pub struct Liveness {
    live_in: SecondaryMap<Node, IdxSet<Node>>,
    live_out: SecondaryMap<Node, IdxSet<Node>>,
    version: u64,
}

impl Liveness {
    /// Compute liveness over the scheduled graph.
    pub fn compute(
        g: &mut Graph,
        bg: &BlockGraph,
        sched: &Schedule,
        modes: &ModeRegistry,
        isa: &Isa,
        rc: RegClass,
    ) -> Self {
        let _tt = timing::liveness();
        g.assure_outs();

        // Per-block defs and upward-exposed uses.
        let mut defs: SecondaryMap<Node, IdxSet<Node>> = SecondaryMap::new();
        let mut ue: SecondaryMap<Node, IdxSet<Node>> = SecondaryMap::new();
        // Phi uses charged to predecessor block ends.
        let mut phi_out: SecondaryMap<Node, IdxSet<Node>> = SecondaryMap::new();
        for &b in &bg.blocks {
            for &inst in sched.nodes(b) {
                if g.opcode(inst) == Opcode::Phi {
                    if in_class(g, modes, isa, rc, inst) {
                        defs[b].insert(inst);
                        for i in 0..g.arity(inst) {
                            let v = g.input(inst, i);
                            if g.is_bad(v) || !in_class(g, modes, isa, rc, v) {
                                continue;
                            }
                            if let Some(p) = g.block_pred_block(b, i) {
                                phi_out[p].insert(v);
                            }
                        }
                    }
                    continue;
                }
                for v in used_values(g, modes, isa, rc, inst) {
                    if !defs[b].contains(v) {
                        ue[b].insert(v);
                    }
                }
                for v in defined_values(g, modes, isa, rc, inst) {
                    defs[b].insert(v);
                }
            }
        }

        // Backward fixpoint:
        //   out(b) = phi_out(b) ∪ ⋃_succ (in(s) \ phi_defs(s))
        //   in(b)  = ue(b) ∪ (out(b) \ defs(b))
        let mut live_in: SecondaryMap<Node, IdxSet<Node>> = SecondaryMap::new();
        let mut live_out: SecondaryMap<Node, IdxSet<Node>> = SecondaryMap::new();
        let mut phi_defs: SecondaryMap<Node, IdxSet<Node>> = SecondaryMap::new();
        for &b in &bg.blocks {
            for &inst in sched.nodes(b) {
                if g.opcode(inst) == Opcode::Phi && in_class(g, modes, isa, rc, inst) {
                    phi_defs[b].insert(inst);
                }
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &b in bg.blocks.iter().rev() {
                let mut out = phi_out[b].clone();
                for &s in bg.succs(b) {
                    for v in live_in[s].iter() {
                        if !phi_defs[s].contains(v) {
                            out.insert(v);
                        }
                    }
                }
                let mut inn = ue[b].clone();
                for v in out.iter() {
                    if !defs[b].contains(v) {
                        inn.insert(v);
                    }
                }
                // Phi results live from the top of their block.
                for v in phi_defs[b].iter() {
                    inn.insert(v);
                }
                if out != live_out[b] {
                    live_out[b] = out;
                    changed = true;
                }
                if inn != live_in[b] {
                    live_in[b] = inn;
                    changed = true;
                }
            }
        }

        Liveness {
            live_in,
            live_out,
            version: g.version(),
        }
    }

    /// Values live at the top of `b` (phi results included).
    pub fn live_in(&self, b: Node) -> &IdxSet<Node> {
        &self.live_in[b]
    }

    /// Values live across the end of `b` (phi arguments of successors
    /// included).
    pub fn live_out(&self, b: Node) -> &IdxSet<Node> {
        &self.live_out[b]
    }

    /// Is `v` live into `b`?
    pub fn is_live_in(&self, b: Node, v: Node) -> bool {
        self.live_in[b].contains(v)
    }

    /// Is `v` live out of `b`?
    pub fn is_live_out(&self, b: Node, v: Node) -> bool {
        self.live_out[b].contains(v)
    }

    /// Is this information still consistent with the graph?
    pub fn is_consistent(&self, g: &Graph) -> bool {
        self.version == g.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ana::testutil::counted_loop;
    use crate::be::sched::SelectorKind;
    use crate::mode::ModeRegistry;

    #[test]
    fn loop_counter_stays_live_around_the_loop() {
        let modes = ModeRegistry::new();
        let (mut g, [header, body, exit], phi) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = Isa::generic(4);
        let rc = RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);

        // The counter is live through the body (its increment needs it) and
        // into the exit (it is returned).
        assert!(live.is_live_in(header, phi));
        assert!(live.is_live_in(body, phi));
        assert!(live.is_live_in(exit, phi));
        assert!(live.is_live_out(body, phi) || live.is_live_out(header, phi));
    }

    #[test]
    fn recomputation_matches() {
        let modes = ModeRegistry::new();
        let (mut g, [header, ..], phi) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = Isa::generic(4);
        let rc = RegClass(0);
        let a = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let b = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        assert_eq!(a.is_live_in(header, phi), b.is_live_in(header, phi));
        assert_eq!(
            a.live_out(header).cardinality(),
            b.live_out(header).cardinality()
        );
    }
}
