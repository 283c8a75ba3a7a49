//! Belady spilling.
//!
//! Per block, a working set of at most `k` values is maintained; a use of
//! a value outside the set brings it in, and when the set overflows the
//! value whose next use lies farthest ahead is evicted. Evicting a value
//! that is still needed creates its spill (placed right behind the
//! definition, so every later reload is dominated); bringing a value back
//! creates a reload in front of the use, or re-executes the definition
//! when it is rematerialisable.
//!
//! A global pass seeds block entry worksets with values their predecessors
//! still hold, extending register residence across block borders as long
//! as the pressure allows; edges over which a chosen value is not
//! available get a compensating reload at the predecessor's end.
//!
//! Spilling splits each affected value into several definitions (the
//! original, the reloads, the re-executions), so the pass finishes by
//! rebuilding SSA form over them: phis at the iterated dominance frontier
//! of the definitions, uses rewired to their reaching definition.

use crate::ana::cfg::BlockGraph;
use crate::ana::domtree::DomTree;
use crate::ana::execfreq::ExecFreq;
use crate::be::isa::{Isa, RegClass};
use crate::be::liveness::{defined_values, in_class, used_values, Liveness};
use crate::be::sched::Schedule;
use crate::be::uses::{NextUses, INFINITE};
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Graph, Node, NodeAttr, Opcode};
use crate::mode::ModeRegistry;
use crate::timing;
use firm_arena::SecondaryMap;

/// Tunables of the Belady spiller. All three change the answers, none the
/// correctness.
#[derive(Debug, Clone)]
pub struct BeladyConfig {
    /// Eviction-distance multiplier for values that already own a spill:
    /// throwing them out again costs only the reload.
    pub already_spilled_factor: u32,
    /// Give rematerialisable values effectively infinite next-use
    /// distances, so they never force a memory reload.
    pub remat_live_range_ext: bool,
    /// Run the global pass that extends register residence across blocks.
    pub global_pass: bool,
}

impl Default for BeladyConfig {
    fn default() -> Self {
        Self {
            already_spilled_factor: 2,
            remat_live_range_ext: true,
            global_pass: true,
        }
    }
}

/// What the spiller did.
#[derive(Debug, Default)]
pub struct SpillResult {
    /// The created `Spill` nodes.
    pub spills: Vec<Node>,
    /// The created `Reload` nodes.
    pub reloads: Vec<Node>,
    /// The re-executed definitions standing in for reloads.
    pub remats: Vec<Node>,
}

// Where a new definition of a value is materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadPoint {
    Before(Node),
    BlockEnd(Node),
}

struct Spiller<'a> {
    g: &'a mut Graph,
    bg: &'a BlockGraph,
    dt: &'a DomTree,
    sched: &'a mut Schedule,
    live: &'a Liveness,
    uses: &'a NextUses,
    freq: &'a ExecFreq,
    modes: &'a ModeRegistry,
    isa: &'a Isa,
    rc: RegClass,
    config: &'a BeladyConfig,
    k: u32,

    // Values that must be written to memory (no node created yet).
    to_spill: FxHashSet<Node>,
    // Planned reloads per value.
    reload_points: FxHashMap<Node, Vec<ReloadPoint>>,
    // Worksets at the block borders, in terms of original values.
    entry_ws: SecondaryMap<Node, Vec<Node>>,
    end_ws: SecondaryMap<Node, Vec<Node>>,
}

impl<'a> Spiller<'a> {
    fn plan_reload(&mut self, v: Node, at: ReloadPoint) {
        let points = self.reload_points.entry(v).or_insert_with(Vec::new);
        if !points.contains(&at) {
            points.push(at);
        }
        if !self.isa.is_remat(self.g, v) {
            self.to_spill.insert(v);
        }
    }

    // Evict one value from `ws`, keeping everything in `pinned`. Returns
    // `false` when every member is pinned; the caller tolerates the
    // overfull set (an over-constrained point, e.g. a many-result
    // instruction) and lets a later point resolve it.
    fn evict_one(&mut self, block: Node, pos: u32, ws: &mut Vec<Node>, pinned: &[Node]) -> bool {
        let mut worst: Option<(u64, usize)> = None;
        for (i, &w) in ws.iter().enumerate() {
            if pinned.contains(&w) {
                continue;
            }
            let key = self.uses.eviction_key(
                self.g,
                self.isa,
                block,
                pos,
                w,
                self.live,
                self.sched,
                self.to_spill.contains(&w),
                self.config.already_spilled_factor,
                self.config.remat_live_range_ext,
            );
            match worst {
                Some((k, _)) if k >= key => {}
                _ => worst = Some((key, i)),
            }
        }
        let (_, idx) = match worst {
            Some(w) => w,
            None => return false,
        };
        let victim = ws.swap_remove(idx);
        let dist = self
            .uses
            .distance(block, pos, victim, self.live, self.sched);
        if dist != INFINITE && !self.isa.is_remat(self.g, victim) {
            // Still needed later: it must exist in memory.
            self.to_spill.insert(victim);
        }
        log::trace!("evict {} at {}:{}", victim, block, pos);
        true
    }

    fn process_block(&mut self, block: Node) {
        let insts: Vec<Node> = self.sched.nodes(block).to_vec();

        // Phis are definitions at the block top and start out in registers.
        let mut ws: Vec<Node> = insts
            .iter()
            .copied()
            .filter(|&n| {
                self.g.opcode(n) == Opcode::Phi && in_class(self.g, self.modes, self.isa, self.rc, n)
            })
            .collect();

        // Seed the rest of the entry workset from the predecessors.
        if self.config.global_pass {
            let preds = self.bg.preds(block);
            let mut cands: Vec<Node> = self
                .live
                .live_in(block)
                .iter()
                .filter(|v| !ws.contains(v))
                .collect();
            // Prefer values every processed predecessor still holds, then
            // closer next uses.
            let avail_everywhere = |spiller: &Self, v: Node| {
                !preds.is_empty()
                    && preds.iter().all(|&p| {
                        spiller.end_ws[p].contains(&v) || spiller.end_ws[p].is_empty()
                    })
            };
            cands.sort_by_key(|&v| {
                (
                    !avail_everywhere(self, v),
                    self.uses.distance(block, 0, v, self.live, self.sched),
                )
            });
            for v in cands {
                if ws.len() as u32 >= self.k {
                    break;
                }
                if self.uses.distance(block, 0, v, self.live, self.sched) == INFINITE {
                    continue;
                }
                ws.push(v);
            }
        }
        self.entry_ws[block] = ws.clone();

        for &inst in &insts {
            if self.g.opcode(inst) == Opcode::Phi {
                continue;
            }
            let pos = self.sched.position(inst);
            let needed = used_values(self.g, self.modes, self.isa, self.rc, inst);

            // Bring missing operands in.
            for &v in &needed {
                if ws.contains(&v) {
                    continue;
                }
                while ws.len() as u32 >= self.k {
                    if !self.evict_one(block, pos, &mut ws, &needed) {
                        break;
                    }
                }
                self.plan_reload(v, ReloadPoint::Before(inst));
                ws.push(v);
            }

            // Operands without further uses die here.
            ws.retain(|&v| {
                !needed.contains(&v)
                    || self
                        .uses
                        .distance(block, pos + 1, v, self.live, self.sched)
                        != INFINITE
            });

            // Results with a future enter the set; short-lived garbage
            // does not claim a slot.
            let defs = defined_values(self.g, self.modes, self.isa, self.rc, inst);
            for &d in &defs {
                if self.uses.distance(block, pos + 1, d, self.live, self.sched) != INFINITE {
                    ws.push(d);
                }
            }

            // Enforce the capacity after the instruction; a freshly
            // defined value with a distant first use is a legal victim
            // (that is an immediate spill, or a later re-execution).
            while ws.len() as u32 > self.k {
                if !self.evict_one(block, pos + 1, &mut ws, &[]) {
                    log::warn!("{}:{} stays over register capacity", block, pos);
                    break;
                }
            }
        }

        // Only values that remain live belong in the end workset.
        ws.retain(|&v| self.live.is_live_out(block, v));
        self.end_ws[block] = ws;
    }

    // A value chosen for a block entry must leave every predecessor in a
    // register; edges that lost it get a reload at the predecessor's end.
    // Phi arguments are uses at the predecessor's end and need the same
    // treatment.
    fn fix_block_borders(&mut self, order: &[Node]) {
        for &block in order {
            let entry = self.entry_ws[block].clone();
            for v in entry {
                if self.g.opcode(v) == Opcode::Phi && self.g.block_of(v) == block {
                    continue;
                }
                for &p in self.bg.preds(block) {
                    // The end workset is the truth about what the
                    // predecessor still holds.
                    if !self.end_ws[p].contains(&v) {
                        self.plan_reload(v, ReloadPoint::BlockEnd(p));
                    }
                }
            }
            let phis: Vec<Node> = self
                .sched
                .nodes(block)
                .iter()
                .copied()
                .filter(|&n| {
                    self.g.opcode(n) == Opcode::Phi
                        && in_class(self.g, self.modes, self.isa, self.rc, n)
                })
                .collect();
            for phi in phis {
                for i in 0..self.g.arity(phi) {
                    let v = self.g.input(phi, i);
                    if self.g.is_bad(v) || !in_class(self.g, self.modes, self.isa, self.rc, v) {
                        continue;
                    }
                    if let Some(p) = self.g.block_pred_block(block, i) {
                        if !self.end_ws[p].contains(&v) {
                            self.plan_reload(v, ReloadPoint::BlockEnd(p));
                        }
                    }
                }
            }
        }
    }

    fn materialise(&mut self) -> SpillResult {
        let mut result = SpillResult::default();
        let mut spill_nodes: FxHashMap<Node, Node> = FxHashMap::default();

        // Spills sit right behind their definition.
        let to_spill: Vec<Node> = {
            let mut v: Vec<Node> = self.to_spill.iter().copied().collect();
            v.sort();
            v
        };
        for v in to_spill {
            let def_block = self.g.block_of(v);
            let def_inst = self.g.skip_proj(v);
            let spill = self.g.new_spill(def_block, v);
            if self.g.opcode(v) == Opcode::Phi {
                self.sched.insert_at_top(&*self.g, def_block, spill);
            } else {
                self.sched.insert_after(def_block, def_inst, spill);
            }
            spill_nodes.insert(v, spill);
            result.spills.push(spill);
            log::debug!("spill {} behind {}", v, def_inst);
        }

        // Reloads and re-executions.
        let mut new_defs: FxHashMap<Node, Vec<Node>> = FxHashMap::default();
        let planned: Vec<(Node, Vec<ReloadPoint>)> = {
            let mut v: Vec<(Node, Vec<ReloadPoint>)> =
                self.reload_points.drain().collect();
            v.sort_by_key(|(n, _)| *n);
            v
        };
        for (v, points) in planned {
            for point in points {
                let (block, before) = match point {
                    ReloadPoint::Before(inst) => (self.g.block_of(inst), Some(inst)),
                    ReloadPoint::BlockEnd(b) => (b, None),
                };
                let fresh = if self.isa.is_remat(self.g, v) {
                    // Re-execute instead of reloading.
                    let remat = self.g.add_node(
                        self.g.opcode(v),
                        self.g.mode(v),
                        Some(block),
                        &[],
                        self.g.attr(v).clone(),
                    );
                    result.remats.push(remat);
                    remat
                } else {
                    let spill = spill_nodes[&v];
                    debug_assert!(
                        self.spill_dominates(spill, block, before),
                        "{} does not dominate its reload site",
                        spill
                    );
                    let reload = self.g.new_reload(block, spill, self.g.mode(v));
                    result.reloads.push(reload);
                    reload
                };
                match before {
                    Some(inst) => self.sched.insert_before(block, inst, fresh),
                    None => self.sched.insert_before_terminator(&*self.g, block, fresh),
                }
                new_defs.entry(v).or_insert_with(Vec::new).push(fresh);
                log::debug!("reload {} as {} in {}", v, fresh, block);
            }
        }

        // Rewire every use to its reaching definition.
        let values: Vec<Node> = {
            let mut v: Vec<Node> = new_defs.keys().copied().collect();
            v.sort();
            v
        };
        for v in values {
            let defs = new_defs.remove(&v).unwrap();
            self.reconstruct_ssa(v, defs, &spill_nodes);
        }

        result
    }

    fn spill_dominates(&self, spill: Node, block: Node, before: Option<Node>) -> bool {
        let spill_block = self.g.block_of(spill);
        if spill_block != block {
            return self.dt.dominates(spill_block, block);
        }
        match before {
            Some(inst) => self.sched.position(spill) < self.sched.position(inst),
            None => true,
        }
    }

    // Standard SSA repair: the original definition plus the fresh ones are
    // the defs; phis appear at the iterated dominance frontier; each use
    // reads its reaching definition.
    fn reconstruct_ssa(
        &mut self,
        value: Node,
        fresh_defs: Vec<Node>,
        spill_nodes: &FxHashMap<Node, Node>,
    ) {
        let frontiers = self.dt.frontiers(self.bg);
        let mode = self.g.mode(value);

        // Definitions per block, original first.
        let mut defs_in: FxHashMap<Node, Vec<Node>> = FxHashMap::default();
        defs_in
            .entry(self.g.block_of(value))
            .or_insert_with(Vec::new)
            .push(value);
        for &d in &fresh_defs {
            defs_in
                .entry(self.g.block_of(d))
                .or_insert_with(Vec::new)
                .push(d);
        }

        // Iterated dominance frontier of the definition blocks.
        let mut phi_blocks: FxHashSet<Node> = FxHashSet::default();
        let mut work: Vec<Node> = defs_in.keys().copied().collect();
        while let Some(b) = work.pop() {
            for &f in &frontiers[b] {
                if phi_blocks.insert(f) {
                    work.push(f);
                }
            }
        }

        // Place the repair phis; they are defs as well.
        let mut phis: FxHashMap<Node, Node> = FxHashMap::default();
        for &b in &phi_blocks {
            if !self.dt.is_reachable(b) {
                continue;
            }
            let arity = self.g.n_block_preds(b);
            let bad = self.g.anchors.bad;
            let inputs: Vec<Node> = (0..arity).map(|_| bad).collect();
            let phi = self
                .g
                .add_node(Opcode::Phi, mode, Some(b), &inputs, NodeAttr::None);
            self.sched.insert_at_top(&*self.g, b, phi);
            phis.insert(b, phi);
            defs_in.entry(b).or_insert_with(Vec::new).push(phi);
        }

        // Reaching definition at (block, position).
        let reaching = |spiller: &Self,
                        defs_in: &FxHashMap<Node, Vec<Node>>,
                        mut block: Node,
                        pos: Option<u32>|
         -> Node {
            let mut pos = pos;
            loop {
                if let Some(defs) = defs_in.get(&block) {
                    let mut best: Option<(u32, Node)> = None;
                    for &d in defs {
                        let dp = spiller.sched.value_position(spiller.g, d);
                        let before = match pos {
                            Some(p) => dp <= p,
                            None => true,
                        };
                        if before {
                            match best {
                                Some((bp, _)) if bp >= dp => {}
                                _ => best = Some((dp, d)),
                            }
                        }
                    }
                    if let Some((_, d)) = best {
                        return d;
                    }
                }
                block = match spiller.dt.idom(block) {
                    Some(i) => i,
                    None => return value,
                };
                pos = None;
            }
        };

        // Rewrite the uses. The spill of the value itself keeps reading
        // the original definition.
        self.g.assure_outs();
        let users: Vec<Node> = self.g.outs(value).to_vec();
        for u in users {
            if Some(&u) == spill_nodes.get(&value) {
                continue;
            }
            if fresh_defs.contains(&u) {
                continue;
            }
            let arity = self.g.arity(u);
            for i in 0..arity {
                if self.g.raw_input(u, i) != value {
                    continue;
                }
                let new_def = if self.g.opcode(u) == Opcode::Phi && !phis.values().any(|&p| p == u)
                {
                    let ub = self.g.block_of(u);
                    match self.g.block_pred_block(ub, i) {
                        Some(p) => reaching(self, &defs_in, p, None),
                        None => continue,
                    }
                } else {
                    let ub = self.g.block_of(u);
                    let upos = self.sched.value_position(self.g, u);
                    let candidate = reaching(self, &defs_in, ub, Some(upos.saturating_sub(1)));
                    candidate
                };
                if new_def != value {
                    self.g.set_input(u, i, new_def);
                }
            }
        }

        // Fill the repair phis from their predecessors.
        let phi_list: Vec<(Node, Node)> = phis.iter().map(|(&b, &p)| (b, p)).collect();
        for (b, phi) in phi_list {
            let arity = self.g.n_block_preds(b);
            for i in 0..arity {
                let def = match self.g.block_pred_block(b, i) {
                    Some(p) => reaching(self, &defs_in, p, None),
                    None => self.g.anchors.bad,
                };
                self.g.set_input(phi, i, def);
            }
        }
    }
}

/// Run the Belady spiller for one register class. Returns what was
/// inserted; liveness and next-use information are stale afterwards and
/// must be recomputed by the caller.
pub fn run_spiller(
    g: &mut Graph,
    bg: &BlockGraph,
    dt: &DomTree,
    sched: &mut Schedule,
    live: &Liveness,
    uses: &NextUses,
    freq: &ExecFreq,
    modes: &ModeRegistry,
    isa: &Isa,
    rc: RegClass,
    config: &BeladyConfig,
) -> SpillResult {
    let _tt = timing::spill();
    let k = isa.class(rc).n_allocatable();
    let mut spiller = Spiller {
        g,
        bg,
        dt,
        sched,
        live,
        uses,
        freq,
        modes,
        isa,
        rc,
        config,
        k,
        to_spill: Default::default(),
        reload_points: Default::default(),
        entry_ws: SecondaryMap::new(),
        end_ws: SecondaryMap::new(),
    };

    // Local pass in reverse post-order; the border pass revisits the
    // blocks in descending execution frequency, so the hot borders get
    // their registers settled first.
    for i in 0..spiller.bg.blocks.len() {
        let block = spiller.bg.blocks[i];
        spiller.process_block(block);
    }
    let border_order: Vec<Node> = if spiller.config.global_pass {
        let mut by_freq: Vec<Node> = spiller.bg.blocks.clone();
        by_freq.sort_by(|&a, &b| {
            spiller
                .freq
                .get(b)
                .partial_cmp(&spiller.freq.get(a))
                .unwrap_or(core::cmp::Ordering::Equal)
        });
        by_freq
    } else {
        spiller.bg.blocks.clone()
    };
    spiller.fix_block_borders(&border_order);
    spiller.materialise()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::sched::SelectorKind;
    use crate::ana::loops::LoopTree;
    use crate::mode;
    use crate::tarval::Tarval;

    // One block, k = 2, four values live across a big instruction; the
    // value with the farthest next use is the one reloaded.
    #[test]
    fn farthest_next_use_is_evicted() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let args = g.anchors.args;
        let a = g.new_proj(&modes, args, mode::IS, 0);
        let b = g.new_proj(&modes, args, mode::IS, 1);
        let c = g.new_proj(&modes, args, mode::IS, 2);
        let d = g.new_proj(&modes, args, mode::IS, 3);

        // The pressure point: all four at once.
        let tuple = g.add_node(
            Opcode::Tuple,
            mode::T,
            Some(block),
            &[a, b, c, d],
            NodeAttr::None,
        );
        g.keep_alive(tuple);
        // Afterwards: a, b, c used soon; d used last.
        let ab = g.add_node(Opcode::Add, mode::IS, Some(block), &[a, b], NodeAttr::None);
        let abc = g.add_node(Opcode::Add, mode::IS, Some(block), &[ab, c], NodeAttr::None);
        let abcd = g.add_node(Opcode::Add, mode::IS, Some(block), &[abc, d], NodeAttr::None);
        let mem = g.anchors.initial_mem;
        let ret = g.new_return(&modes, block, mem, &[abcd]);
        let end_block = g.anchors.end_block;
        g.add_in_edge(end_block, ret);
        g.set_matured(end_block);

        let bg = BlockGraph::compute(&mut g);
        let dt = DomTree::compute(&g, &bg);
        let mut sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = {
            let mut isa = Isa::generic(2);
            isa.classes[0].n_regs = 2;
            isa
        };
        let rc = RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let uses = NextUses::compute(&g, &bg, &sched, &modes, &isa, rc);
        let loops = LoopTree::compute_cf(&mut g, &bg);
        let freq = ExecFreq::compute(&g, &bg.blocks, &loops);

        let result = run_spiller(
            &mut g,
            &bg,
            &dt,
            &mut sched,
            &live,
            &uses,
            &freq,
            &modes,
            &isa,
            rc,
            &BeladyConfig::default(),
        );

        assert!(!result.reloads.is_empty(), "pressure forces reloading");
        // d has the farthest next use; it must be among the spilled
        // values, and a (the nearest use) must not be.
        let spilled_values: Vec<Node> = result
            .spills
            .iter()
            .map(|&s| g.input(s, 0))
            .collect();
        assert!(spilled_values.contains(&d), "farthest value spills");
        assert!(!spilled_values.contains(&a), "nearest value stays");
        // Every reload is dominated by its spill (same block: ordered).
        for &r in &result.reloads {
            let spill = g.input(r, 0);
            assert!(sched.position(spill) < sched.position(r));
        }
    }

    #[test]
    fn remat_values_reexecute_instead_of_reloading() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let args = g.anchors.args;
        let a = g.new_proj(&modes, args, mode::IS, 0);
        let b = g.new_proj(&modes, args, mode::IS, 1);
        let big = g.new_const(&modes, Tarval::from_i64(1 << 20, mode::IS, &modes));

        let tuple = g.add_node(
            Opcode::Tuple,
            mode::T,
            Some(block),
            &[a, b, big],
            NodeAttr::None,
        );
        g.keep_alive(tuple);
        let ab = g.add_node(Opcode::Add, mode::IS, Some(block), &[a, b], NodeAttr::None);
        let all = g.add_node(Opcode::Add, mode::IS, Some(block), &[ab, big], NodeAttr::None);
        let mem = g.anchors.initial_mem;
        let ret = g.new_return(&modes, block, mem, &[all]);
        let end_block = g.anchors.end_block;
        g.add_in_edge(end_block, ret);
        g.set_matured(end_block);

        let bg = BlockGraph::compute(&mut g);
        let dt = DomTree::compute(&g, &bg);
        let mut sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let mut isa = Isa::generic(2);
        isa.classes[0].n_regs = 2;
        let rc = RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let uses = NextUses::compute(&g, &bg, &sched, &modes, &isa, rc);
        let loops = LoopTree::compute_cf(&mut g, &bg);
        let freq = ExecFreq::compute(&g, &bg.blocks, &loops);

        let result = run_spiller(
            &mut g,
            &bg,
            &dt,
            &mut sched,
            &live,
            &uses,
            &freq,
            &modes,
            &isa,
            rc,
            &BeladyConfig::default(),
        );

        // The constant is the preferred eviction victim and comes back by
        // re-execution, not through memory.
        assert!(result.remats.iter().any(|&r| g.opcode(r) == Opcode::Const));
        assert!(result
            .spills
            .iter()
            .all(|&s| g.opcode(g.input(s, 0)) != Opcode::Const));
    }
}
