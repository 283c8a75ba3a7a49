//! The interference relation over register values.
//!
//! Two values interfere when one is defined while the other is live, or
//! when both leave the same block live with overlapping ranges. Over SSA
//! the live ranges are subtrees of the dominator tree, which is what makes
//! the later coloring chordal; this service only materialises the edges
//! and answers adjacency queries.

use crate::ana::cfg::BlockGraph;
use crate::be::isa::{Isa, RegClass};
use crate::be::liveness::{defined_values, used_values, Liveness};
use crate::be::sched::Schedule;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Graph, Node, Opcode};
use crate::mode::ModeRegistry;

/// An undirected interference graph over the values of one class.
pub struct InterferenceGraph {
    adj: FxHashMap<Node, Vec<Node>>,
}

impl InterferenceGraph {
    /// Build the interference graph from liveness and the schedule.
    pub fn build(
        g: &Graph,
        bg: &BlockGraph,
        sched: &Schedule,
        live: &Liveness,
        modes: &ModeRegistry,
        isa: &Isa,
        rc: RegClass,
    ) -> Self {
        let mut ig = InterferenceGraph {
            adj: FxHashMap::default(),
        };
        for &b in &bg.blocks {
            // Walk backwards from the live-out set; at each definition the
            // defined value interferes with everything else alive.
            let mut alive: FxHashSet<Node> = live.live_out(b).iter().collect();
            for &inst in sched.nodes(b).iter().rev() {
                let defs = defined_values(g, modes, isa, rc, inst);
                for &d in &defs {
                    for &other in alive.iter() {
                        if other != d {
                            ig.add_edge(d, other);
                        }
                    }
                }
                for &d in &defs {
                    alive.remove(&d);
                }
                if g.opcode(inst) != Opcode::Phi {
                    for v in used_values(g, modes, isa, rc, inst) {
                        alive.insert(v);
                    }
                }
            }
            // Values entering the block together interfere pairwise along
            // the whole block when both survive it; the backward walk has
            // already recorded everything that matters at the definition
            // points, so only mutual live-ins with no in-block definition
            // remain.
            let live_in: Vec<Node> = live.live_in(b).iter().collect();
            for (i, &v) in live_in.iter().enumerate() {
                for &w in &live_in[i + 1..] {
                    if live.is_live_out(b, v) && live.is_live_out(b, w) {
                        ig.add_edge(v, w);
                    }
                }
            }
        }
        ig
    }

    fn add_edge(&mut self, a: Node, b: Node) {
        debug_assert_ne!(a, b);
        let list = self.adj.entry(a).or_insert_with(Vec::new);
        if !list.contains(&b) {
            list.push(b);
        }
        let list = self.adj.entry(b).or_insert_with(Vec::new);
        if !list.contains(&a) {
            list.push(a);
        }
    }

    /// Do `a` and `b` interfere?
    pub fn interferes(&self, a: Node, b: Node) -> bool {
        self.adj
            .get(&a)
            .map(|l| l.contains(&b))
            .unwrap_or(false)
    }

    /// The neighbours of `a`.
    pub fn neighbors(&self, a: Node) -> &[Node] {
        self.adj.get(&a).map(|l| l.as_slice()).unwrap_or(&[])
    }

    /// Every edge, each reported once with the smaller key first.
    pub fn edges<'b>(&'b self) -> impl Iterator<Item = (Node, Node)> + 'b {
        self.adj.iter().flat_map(|(&a, list)| {
            list.iter()
                .copied()
                .filter(move |&b| a < b)
                .map(move |b| (a, b))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ana::testutil::counted_loop;
    use crate::be::sched::SelectorKind;
    use crate::ir::NodeAttr;
    use crate::mode::{self, ModeRegistry};

    #[test]
    fn values_alive_together_interfere() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let a = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let b = g.new_proj(&modes, g.anchors.args, mode::IS, 1);
        let sum = g.add_node(Opcode::Add, mode::IS, Some(block), &[a, b], NodeAttr::None);
        let prod = g.add_node(Opcode::Mul, mode::IS, Some(block), &[sum, a], NodeAttr::None);
        let mem = g.anchors.initial_mem;
        let ret = g.new_return(&modes, block, mem, &[prod]);
        let end_block = g.anchors.end_block;
        g.add_in_edge(end_block, ret);
        g.set_matured(end_block);

        let bg = BlockGraph::compute(&mut g);
        let sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = Isa::generic(4);
        let rc = RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let ig = InterferenceGraph::build(&g, &bg, &sched, &live, &modes, &isa, rc);

        // `sum` is defined while `a` is still needed by the Mul.
        assert!(ig.interferes(sum, a));
        assert!(ig.interferes(a, sum));
        // `prod` is defined after `b` died.
        assert!(!ig.interferes(prod, b));
        assert!(ig.neighbors(sum).contains(&a));
        assert!(ig.edges().count() > 0);
    }

    #[test]
    fn loop_counter_and_bound_interfere_but_not_counter_and_increment() {
        let modes = ModeRegistry::new();
        let (mut g, [header, ..], phi) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = Isa::generic(4);
        let rc = RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let ig = InterferenceGraph::build(&g, &bg, &sched, &live, &modes, &isa, rc);
        // The loop bound is live through the whole loop, so it clashes
        // with the counter phi.
        let cmp = sched
            .nodes(header)
            .iter()
            .copied()
            .find(|&n| g.opcode(n) == Opcode::Cmp)
            .unwrap();
        let bound = g.input(cmp, 1);
        assert!(ig.interferes(phi, bound));
        // The counter dies exactly where its increment is defined, and the
        // increment feeds the phi back: no interference. This is what lets
        // the coalescer put both in one register.
        let incr = g.input(phi, 1);
        assert!(!ig.interferes(phi, incr));
    }
}
