//! Instruction scheduling.
//!
//! A local list scheduler orders the real instructions of each block: the
//! ready set holds instructions whose in-block dependencies are all
//! scheduled, a selector picks the next one, and control flow leaves the
//! block last. Phis are not instructions at all: they are placed up front
//! in their block, in parallel. Projections, forwarders and the singleton
//! bookkeeping nodes take no slot; a projection executes with the
//! instruction it projects from.
//!
//! Data dependencies order the schedule; memory dependencies arrive
//! through the explicit memory operands, keep edges through `Keep` inputs,
//! so both are data dependencies here.

use crate::ana::cfg::BlockGraph;
use crate::ir::{walk, Graph, Node, Opcode};
use crate::timing;
use firm_arena::{Idx, SecondaryMap};
use smallvec::SmallVec;

/// How the list scheduler picks among ready instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    /// First ready instruction, by node number. Deterministic and cheap.
    Trivial,
    /// Prefer instructions that shrink the number of live values.
    RegPressure,
}

const UNSCHEDULED: u32 = u32::max_value();

/// A per-block total order over the real instructions, plus a block order
/// for emission.
pub struct Schedule {
    order: SecondaryMap<Node, Vec<Node>>,
    pos: SecondaryMap<Node, u32>,
    /// Blocks in emission order; empty blocks dropped.
    pub block_list: Vec<Node>,
    version: u64,
}

/// Does `n` occupy a schedule slot of its own?
pub fn is_real(g: &Graph, n: Node) -> bool {
    if g.is_block(n) {
        return false;
    }
    match g.opcode(n) {
        // Tuples are wiring, not instructions: their projections read the
        // elements directly and no register is touched.
        Opcode::Proj
        | Opcode::Id
        | Opcode::Tuple
        | Opcode::Bad
        | Opcode::NoMem
        | Opcode::Unknown => false,
        _ => true,
    }
}

// The instruction that defines the value `v`, resolving projection chains.
fn defining_inst(g: &Graph, v: Node) -> Node {
    g.skip_proj(v)
}

impl Schedule {
    /// Schedule every block of `g`.
    pub fn compute(g: &mut Graph, bg: &BlockGraph, selector: SelectorKind) -> Self {
        let _tt = timing::schedule();
        let per_block = walk::nodes_per_block(g);
        let mut sched = Schedule {
            order: SecondaryMap::new(),
            pos: SecondaryMap::with_default(UNSCHEDULED),
            block_list: Vec::new(),
            version: g.version(),
        };

        for &b in &bg.blocks {
            let mut insts: Vec<Node> = per_block[b]
                .iter()
                .copied()
                .filter(|&n| is_real(g, n))
                .collect();
            insts.sort();
            sched.schedule_block(g, b, &mut insts, selector);
        }

        // Emission order: the computed RPO with contentless blocks dropped.
        for &b in &bg.blocks {
            let nodes = &sched.order[b];
            let only_jump = nodes.iter().all(|&n| g.opcode(n) == Opcode::Jmp);
            if !only_jump || b == bg.entry || b == bg.exit {
                sched.block_list.push(b);
            }
        }
        sched
    }

    fn schedule_block(
        &mut self,
        g: &Graph,
        block: Node,
        insts: &mut Vec<Node>,
        selector: SelectorKind,
    ) {
        let mut order: Vec<Node> = Vec::with_capacity(insts.len());

        // Phis first, in parallel (their mutual reads happen "before" the
        // block).
        insts.retain(|&n| {
            if g.opcode(n) == Opcode::Phi {
                order.push(n);
                false
            } else {
                true
            }
        });

        // Remaining dependency counts inside the block.
        let in_block: crate::fx::FxHashSet<Node> = insts.iter().copied().collect();
        let deps_of = |n: Node| -> SmallVec<[Node; 4]> {
            let mut deps: SmallVec<[Node; 4]> = SmallVec::new();
            for i in 0..g.arity(n) {
                let d = defining_inst(g, g.input(n, i));
                if in_block.contains(&d) && d != n && !deps.contains(&d) {
                    deps.push(d);
                }
            }
            deps
        };
        let mut blocked: SecondaryMap<Node, u32> = SecondaryMap::new();
        let mut dependents: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
        for &n in insts.iter() {
            let deps = deps_of(n);
            blocked[n] = deps.len() as u32;
            for d in deps {
                dependents[d].push(n);
            }
        }

        let mut ready: Vec<Node> = insts
            .iter()
            .copied()
            .filter(|&n| blocked[n] == 0)
            .collect();

        let scheduled_count = order.len();
        let target = scheduled_count + insts.len();
        while order.len() < target {
            debug_assert!(!ready.is_empty(), "dependency cycle inside {}", block);
            let pick_idx = self.select(g, &ready, selector);
            let n = ready.swap_remove(pick_idx);
            order.push(n);
            for i in 0..dependents[n].len() {
                let m = dependents[n][i];
                blocked[m] -= 1;
                if blocked[m] == 0 {
                    ready.push(m);
                }
            }
        }

        for (i, &n) in order.iter().enumerate() {
            self.pos[n] = i as u32;
        }
        self.order[block] = order;
    }

    fn select(&self, g: &Graph, ready: &[Node], selector: SelectorKind) -> usize {
        // Control flow leaves last, whatever the selector thinks.
        let eligible: SmallVec<[usize; 8]> = {
            let non_cf: SmallVec<[usize; 8]> = (0..ready.len())
                .filter(|&i| !g.opcode(ready[i]).is_cfop() && g.opcode(ready[i]) != Opcode::End)
                .collect();
            if non_cf.is_empty() {
                (0..ready.len()).collect()
            } else {
                non_cf
            }
        };
        match selector {
            SelectorKind::Trivial => eligible
                .iter()
                .copied()
                .min_by_key(|&i| ready[i].index())
                .expect("ready set is non-empty"),
            SelectorKind::RegPressure => {
                // defs added minus operands that could die here.
                let score = |n: Node| -> i32 {
                    let defs = 1i32;
                    let uses = g.arity(n) as i32;
                    defs - uses
                };
                eligible
                    .iter()
                    .copied()
                    .min_by_key(|&i| (score(ready[i]), ready[i].index()))
                    .expect("ready set is non-empty")
            }
        }
    }

    /// The scheduled instructions of `block`, in order.
    pub fn nodes(&self, block: Node) -> &[Node] {
        &self.order[block]
    }

    /// The position of instruction `n` inside its block.
    pub fn position(&self, n: Node) -> u32 {
        let p = self.pos[n];
        debug_assert_ne!(p, UNSCHEDULED, "{} is not scheduled", n);
        p
    }

    /// The position at which the value `v` becomes available (its defining
    /// instruction's slot; phis and unscheduled defs count as the block
    /// top).
    pub fn value_position(&self, g: &Graph, v: Node) -> u32 {
        let def = defining_inst(g, v);
        let p = self.pos[def];
        if p == UNSCHEDULED {
            0
        } else {
            p
        }
    }

    /// Insert `n` directly before `at` in `block` and renumber.
    pub fn insert_before(&mut self, block: Node, at: Node, n: Node) {
        let idx = self.order[block]
            .iter()
            .position(|&m| m == at)
            .expect("insertion point is scheduled");
        self.order[block].insert(idx, n);
        self.renumber(block);
    }

    /// Insert `n` directly after `at` in `block` and renumber.
    pub fn insert_after(&mut self, block: Node, at: Node, n: Node) {
        let idx = self.order[block]
            .iter()
            .position(|&m| m == at)
            .expect("insertion point is scheduled");
        self.order[block].insert(idx + 1, n);
        self.renumber(block);
    }

    /// Insert `n` before the block's terminating control flow (or at the
    /// end when the block has none).
    pub fn insert_before_terminator(&mut self, g: &Graph, block: Node, n: Node) {
        let idx = self.order[block]
            .iter()
            .position(|&m| g.opcode(m).is_cfop() || g.opcode(m) == Opcode::End)
            .unwrap_or(self.order[block].len());
        self.order[block].insert(idx, n);
        self.renumber(block);
    }

    /// Insert `n` at the top of `block`, after the phis.
    pub fn insert_at_top(&mut self, g: &Graph, block: Node, n: Node) {
        let idx = self.order[block]
            .iter()
            .position(|&m| g.opcode(m) != Opcode::Phi)
            .unwrap_or(self.order[block].len());
        self.order[block].insert(idx, n);
        self.renumber(block);
    }

    /// Remove `n` from `block`'s order (it no longer takes a slot).
    pub fn remove(&mut self, block: Node, n: Node) {
        if let Some(idx) = self.order[block].iter().position(|&m| m == n) {
            self.order[block].remove(idx);
            self.pos[n] = UNSCHEDULED;
            self.renumber(block);
        }
    }

    fn renumber(&mut self, block: Node) {
        let nodes: Vec<Node> = self.order[block].clone();
        for (i, n) in nodes.into_iter().enumerate() {
            self.pos[n] = i as u32;
        }
    }

    /// Is this information still consistent with the graph? Inserting
    /// through the schedule's own API keeps it consistent by construction.
    pub fn is_consistent(&self, g: &Graph) -> bool {
        self.version <= g.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ana::testutil::diamond;
    use crate::mode::{self, ModeRegistry};
    use crate::tarval::Tarval;

    #[test]
    fn order_respects_dependencies() {
        let modes = ModeRegistry::new();
        let (mut g, [header, ..]) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let order = sched.nodes(header);
        // Cmp before Cond, Cond last.
        let cmp_pos = order
            .iter()
            .position(|&n| g.opcode(n) == Opcode::Cmp)
            .expect("Cmp scheduled in the header");
        let cond_pos = order
            .iter()
            .position(|&n| g.opcode(n) == Opcode::Cond)
            .expect("Cond scheduled in the header");
        assert!(cmp_pos < cond_pos);
        assert_eq!(cond_pos, order.len() - 1);
    }

    #[test]
    fn insertion_renumbers() {
        let modes = ModeRegistry::new();
        let (mut g, [header, ..]) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let mut sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let cmp = sched
            .nodes(header)
            .iter()
            .copied()
            .find(|&n| g.opcode(n) == Opcode::Cmp)
            .unwrap();
        let x = g.new_proj(&modes, g.anchors.args, mode::IS, 7);
        let c = g.new_const(&modes, Tarval::from_i64(5, mode::IS, &modes));
        let extra = g.add_node(
            Opcode::Add,
            mode::IS,
            Some(header),
            &[x, c],
            crate::ir::NodeAttr::None,
        );
        sched.insert_before(header, cmp, extra);
        assert!(sched.position(extra) < sched.position(cmp));
        let order = sched.nodes(header);
        for (i, &n) in order.iter().enumerate() {
            assert_eq!(sched.position(n), i as u32);
        }
    }
}
