//! Copy minimisation.
//!
//! After coloring, every phi whose arguments sit in foreign registers and
//! every two-address instruction whose result left its first operand costs
//! copies at run time. The optimisation units (a phi with its arguments,
//! a two-address pair) are scored by execution frequency and coalesced:
//! the heuristic repeatedly tries to move a whole unit onto one register,
//! admitting exactly the members whose interference neighbourhoods leave
//! that register free. An ILP seat exists as a method choice for builds
//! that carry a solver; this build reports it unavailable.

use crate::ana::cfg::BlockGraph;
use crate::ana::execfreq::ExecFreq;
use crate::be::color::{Coloring, NO_REG};
use crate::be::interference::InterferenceGraph;
use crate::be::isa::{Isa, RegClass};
use crate::be::liveness::in_class;
use crate::be::regs::RegisterSet;
use crate::be::sched::Schedule;
use crate::errors::{CodegenError, CodegenResult};
use crate::ir::{Graph, Node, Opcode};
use crate::mode::ModeRegistry;
use crate::timing;
use smallvec::SmallVec;

/// How copies are minimised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMinMethod {
    /// Skip the pass.
    None,
    /// The iterated coalescing heuristic.
    Heuristic,
    /// An exact ILP formulation; requires a solver in the build.
    Ilp,
}

/// One optimisation unit: values that would like to share a register.
#[derive(Debug)]
struct Unit {
    /// The central value (the phi, or the two-address result).
    root: Node,
    /// Members with the frequency-scaled cost of them not sharing.
    members: SmallVec<[(Node, f64); 4]>,
    cost: f64,
}

/// What the pass achieved.
#[derive(Debug, Default, PartialEq)]
pub struct CopyMinStats {
    /// Units considered.
    pub units: usize,
    /// Members recolored onto their unit's register.
    pub merged: usize,
}

fn collect_units(
    g: &Graph,
    bg: &BlockGraph,
    sched: &Schedule,
    freq: &ExecFreq,
    modes: &ModeRegistry,
    isa: &Isa,
    rc: RegClass,
) -> Vec<Unit> {
    let mut units = Vec::new();
    for &b in &bg.blocks {
        for &inst in sched.nodes(b) {
            if g.opcode(inst) == Opcode::Phi && in_class(g, modes, isa, rc, inst) {
                let mut members: SmallVec<[(Node, f64); 4]> = SmallVec::new();
                for i in 0..g.arity(inst) {
                    let arg = g.input(inst, i);
                    if g.is_bad(arg) || !in_class(g, modes, isa, rc, arg) {
                        continue;
                    }
                    let cost = match g.block_pred_block(b, i) {
                        Some(p) => freq.get(p),
                        None => continue,
                    };
                    members.push((arg, cost));
                }
                if !members.is_empty() {
                    let cost = members.iter().map(|(_, c)| c).sum();
                    units.push(Unit {
                        root: inst,
                        members,
                        cost,
                    });
                }
            } else if isa.is_two_address(g, inst)
                && in_class(g, modes, isa, rc, inst)
                && g.arity(inst) > 0
            {
                let op = g.input(inst, 0);
                if in_class(g, modes, isa, rc, op) {
                    let cost = freq.get(b);
                    units.push(Unit {
                        root: inst,
                        members: smallvec::smallvec![(op, cost)],
                        cost,
                    });
                }
            }
        }
    }
    units
}

/// Run copy minimisation for one class, adjusting `coloring` in place.
pub fn minimize_copies(
    g: &Graph,
    bg: &BlockGraph,
    sched: &Schedule,
    ig: &InterferenceGraph,
    freq: &ExecFreq,
    coloring: &mut Coloring,
    modes: &ModeRegistry,
    isa: &Isa,
    rc: RegClass,
    method: CopyMinMethod,
) -> CodegenResult<CopyMinStats> {
    let _tt = timing::copyopt();
    match method {
        CopyMinMethod::None => return Ok(CopyMinStats::default()),
        CopyMinMethod::Heuristic => {}
        CopyMinMethod::Ilp => {
            // The heuristic would normally seed the solver; without one
            // the request cannot be honoured.
            return Err(CodegenError::Unsupported(
                "ILP copy minimisation requires a solver",
            ));
        }
    }

    let mut units = collect_units(g, bg, sched, freq, modes, isa, rc);
    units.sort_by(|a, b| b.cost.partial_cmp(&a.cost).unwrap_or(core::cmp::Ordering::Equal));

    let mut stats = CopyMinStats {
        units: units.len(),
        merged: 0,
    };
    for unit in &units {
        let root_reg = coloring.get(unit.root);
        if root_reg == NO_REG {
            continue;
        }
        // Candidate registers: the root's and each member's current one.
        let mut candidates: SmallVec<[u32; 4]> = smallvec::smallvec![root_reg];
        for &(m, _) in &unit.members {
            let c = coloring.get(m);
            if c != NO_REG && !candidates.contains(&c) {
                candidates.push(c);
            }
        }

        let mut best: Option<(f64, u32)> = None;
        for &cand in &candidates {
            let mut gain = 0.0;
            for &(m, cost) in &unit.members {
                if can_take(g, ig, coloring, isa, m, cand) {
                    gain += cost;
                }
            }
            if !can_take(g, ig, coloring, isa, unit.root, cand) {
                continue;
            }
            match best {
                Some((bg_gain, _)) if bg_gain >= gain => {}
                _ => best = Some((gain, cand)),
            }
        }
        let (_, reg) = match best {
            Some(b) => b,
            None => continue,
        };

        // Adopt the register; members that cannot follow keep theirs and
        // pay their copy.
        let mut adopted: SmallVec<[Node; 4]> = SmallVec::new();
        if can_take(g, ig, coloring, isa, unit.root, reg) {
            coloring.set(unit.root, reg);
            adopted.push(unit.root);
        } else {
            continue;
        }
        for &(m, _) in &unit.members {
            if coloring.get(m) == reg && !adopted.contains(&m) {
                adopted.push(m);
                continue;
            }
            let conflicts_inside = adopted.iter().any(|&a| ig.interferes(a, m));
            if !conflicts_inside && can_take(g, ig, coloring, isa, m, reg) {
                coloring.set(m, reg);
                adopted.push(m);
                stats.merged += 1;
                log::debug!("coalesced {} into register {}", m, reg);
            }
        }
    }
    Ok(stats)
}

// Can `v` hold `reg` without clashing with an interfering neighbour or a
// fixed requirement?
fn can_take(g: &Graph, ig: &InterferenceGraph, coloring: &Coloring, isa: &Isa, v: Node, reg: u32) -> bool {
    if let Some(req) = isa.precolor(g, v) {
        return req == reg;
    }
    if coloring.get(v) == reg {
        return true;
    }
    ig.neighbors(v)
        .iter()
        .all(|&n| coloring.get(n) != reg)
}

/// The copies a coloring still implies: phi arguments whose register
/// differs from the phi's, weighted by edge frequency.
pub fn remaining_copy_costs(
    g: &Graph,
    bg: &BlockGraph,
    sched: &Schedule,
    freq: &ExecFreq,
    coloring: &Coloring,
    modes: &ModeRegistry,
    isa: &Isa,
    rc: RegClass,
) -> f64 {
    let mut total = 0.0;
    for &b in &bg.blocks {
        for &inst in sched.nodes(b) {
            if g.opcode(inst) != Opcode::Phi || !in_class(g, modes, isa, rc, inst) {
                continue;
            }
            for i in 0..g.arity(inst) {
                let arg = g.input(inst, i);
                if g.is_bad(arg) || !in_class(g, modes, isa, rc, arg) {
                    continue;
                }
                if coloring.get(arg) != coloring.get(inst) {
                    if let Some(p) = g.block_pred_block(b, i) {
                        total += freq.get(p);
                    }
                }
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ana::domtree::DomTree;
    use crate::ana::loops::LoopTree;
    use crate::ana::testutil::counted_loop;
    use crate::be::color::color_graph;
    use crate::be::liveness::Liveness;
    use crate::be::sched::SelectorKind;
    use crate::be::uses::NextUses;
    use crate::mode::ModeRegistry;

    #[test]
    fn phi_unit_reduces_copy_costs() {
        let modes = ModeRegistry::new();
        let (mut g, _, phi) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let dt = DomTree::compute(&g, &bg);
        let sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = Isa::generic(8);
        let rc = RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let uses = NextUses::compute(&g, &bg, &sched, &modes, &isa, rc);
        let loops = LoopTree::compute_cf(&mut g, &bg);
        let freq = ExecFreq::compute(&g, &bg.blocks, &loops);
        let ig = InterferenceGraph::build(&g, &bg, &sched, &live, &modes, &isa, rc);
        let mut coloring =
            color_graph(&mut g, &bg, &dt, &sched, &live, &uses, &modes, &isa, rc);

        let before =
            remaining_copy_costs(&g, &bg, &sched, &freq, &coloring, &modes, &isa, rc);
        let stats = minimize_copies(
            &g,
            &bg,
            &sched,
            &ig,
            &freq,
            &mut coloring,
            &modes,
            &isa,
            rc,
            CopyMinMethod::Heuristic,
        )
        .unwrap();
        let after =
            remaining_copy_costs(&g, &bg, &sched, &freq, &coloring, &modes, &isa, rc);
        assert!(after <= before);
        assert!(stats.units >= 1, "the loop phi forms a unit");
        // Whatever was merged must be interference-free with the phi.
        for &arg in &[g.input(phi, 0), g.input(phi, 1)] {
            if coloring.get(arg) == coloring.get(phi) {
                assert!(!ig.interferes(arg, phi));
            }
        }
    }

    #[test]
    fn ilp_method_reports_unavailable() {
        let modes = ModeRegistry::new();
        let (mut g, _, _) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let sched = Schedule::compute(&mut g, &bg, SelectorKind::Trivial);
        let isa = Isa::generic(8);
        let rc = RegClass(0);
        let live = Liveness::compute(&mut g, &bg, &sched, &modes, &isa, rc);
        let loops = LoopTree::compute_cf(&mut g, &bg);
        let freq = ExecFreq::compute(&g, &bg.blocks, &loops);
        let ig = InterferenceGraph::build(&g, &bg, &sched, &live, &modes, &isa, rc);
        let dt = DomTree::compute(&g, &bg);
        let uses = NextUses::compute(&g, &bg, &sched, &modes, &isa, rc);
        let mut coloring =
            color_graph(&mut g, &bg, &dt, &sched, &live, &uses, &modes, &isa, rc);
        let res = minimize_copies(
            &g,
            &bg,
            &sched,
            &ig,
            &freq,
            &mut coloring,
            &modes,
            &isa,
            rc,
            CopyMinMethod::Ilp,
        );
        assert!(res.is_err());
    }
}
