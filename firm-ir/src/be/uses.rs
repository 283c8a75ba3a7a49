//! Next-use distances.
//!
//! The Belady policy evicts the value whose next use lies farthest away,
//! so the spiller needs, for any schedule position, the distance to each
//! live value's next use. Uses inside the block are exact; a value that is
//! only live out continues in some successor, which costs the rest of the
//! block plus a large step penalty (scaled down for successors that stay
//! in the loop). A value that is neither used nor live out is dead here
//! and reports no use at all.

use crate::ana::cfg::BlockGraph;
use crate::be::isa::{Isa, RegClass};
use crate::be::liveness::{in_class, used_values, Liveness};
use crate::be::sched::Schedule;
use crate::ir::{Graph, Node, Opcode};
use crate::mode::ModeRegistry;
use firm_arena::SecondaryMap;

/// The distance reported for values whose next use is in a later block.
pub const BLOCK_STEP: u32 = 10_000;

/// A distance that orders behind every real one (rematerialisable values
/// under the live-range extension, dead values).
pub const INFINITE: u32 = u32::max_value();

/// Per-block use positions of every class value.
pub struct NextUses {
    // For each block: value -> ascending schedule positions of its uses.
    uses: SecondaryMap<Node, crate::fx::FxHashMap<Node, Vec<u32>>>,
}

impl NextUses {
    /// Precompute the use positions for all blocks.
    pub fn compute(
        g: &Graph,
        bg: &BlockGraph,
        sched: &Schedule,
        modes: &ModeRegistry,
        isa: &Isa,
        rc: RegClass,
    ) -> Self {
        let mut uses: SecondaryMap<Node, crate::fx::FxHashMap<Node, Vec<u32>>> =
            SecondaryMap::new();
        for &b in &bg.blocks {
            for &inst in sched.nodes(b) {
                if g.opcode(inst) == Opcode::Phi {
                    continue; // phi reads happen in the predecessors
                }
                let pos = sched.position(inst);
                for v in used_values(g, modes, isa, rc, inst) {
                    uses[b].entry(v).or_insert_with(Vec::new).push(pos);
                }
            }
        }
        NextUses { uses }
    }

    /// Distance from `from_pos` in `block` to the next use of `v`, in
    /// schedule steps. `INFINITE` means no use is ever reached.
    pub fn distance(
        &self,
        block: Node,
        from_pos: u32,
        v: Node,
        live: &Liveness,
        sched: &Schedule,
    ) -> u32 {
        if let Some(positions) = self.uses[block].get(&v) {
            for &p in positions {
                if p >= from_pos {
                    return p - from_pos;
                }
            }
        }
        if live.is_live_out(block, v) {
            let len = sched.nodes(block).len() as u32;
            len.saturating_sub(from_pos) + BLOCK_STEP
        } else {
            INFINITE
        }
    }

    /// The eviction key of `v`: its distance, stretched for values that
    /// are cheaper to have out of a register.
    ///
    /// Rematerialisable values need no reload, so under the live-range
    /// extension they rank behind everything with a finite distance.
    /// Already-spilled values have their distance multiplied by the
    /// configured factor: evicting them again costs only the reload.
    pub fn eviction_key(
        &self,
        g: &Graph,
        isa: &Isa,
        block: Node,
        from_pos: u32,
        v: Node,
        live: &Liveness,
        sched: &Schedule,
        already_spilled: bool,
        already_spilled_factor: u32,
        remat_live_range_ext: bool,
    ) -> u64 {
        let dist = self.distance(block, from_pos, v, live, sched);
        if dist == INFINITE {
            return u64::max_value();
        }
        if remat_live_range_ext && isa.is_remat(g, v) {
            return u64::max_value() - 1;
        }
        let mut key = dist as u64;
        if already_spilled {
            key = key.saturating_mul(already_spilled_factor.max(1) as u64);
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::sched::SelectorKind;
    use crate::ir::NodeAttr;
    use crate::mode;
    use crate::mode::ModeRegistry;

    #[test]
    fn distances_count_schedule_steps() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let a = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let b = g.new_proj(&modes, g.anchors.args, mode::IS, 1);
        // Two users of `a` at different positions, one of `b`.
        let u1 = g.add_node(
            Opcode::Add,
            mode::IS,
            Some(block),
            &[a, a],
            NodeAttr::None,
        );
        let u2 = g.add_node(
            Opcode::Add,
            mode::IS,
            Some(block),
            &[a, b],
            NodeAttr::None,
        );
        g.keep_alive(u1);
        g.keep_alive(u2);

        let bg = BlockGraph::compute(&mut g);
        let sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = Isa::generic(4);
        let rc = crate::be::isa::RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let uses = NextUses::compute(&g, &bg, &sched, &modes, &isa, rc);

        let p1 = sched.position(u1).min(sched.position(u2));
        // From position 0, `a` is next used at the first add.
        assert_eq!(uses.distance(block, 0, a, &live, &sched), p1);
        // Dead after its single use.
        let after_all = sched.nodes(block).len() as u32;
        assert_eq!(uses.distance(block, after_all, b, &live, &sched), INFINITE);
    }
}
