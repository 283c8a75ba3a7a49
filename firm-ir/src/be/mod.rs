//! The backend core: chordal register allocation over SSA.
//!
//! The pipeline runs per procedure and per register class, in a fixed
//! order; every step can be verified at a configurable level:
//!
//! 1. prologue: liveness, next-use distances, the class environment;
//! 2. spill: Belady eviction keeps the pressure within the class size;
//! 3. memory operands: reloads fused into their single user where the
//!    target supports it;
//! 4. color: chordal coloring along a dominance-derived elimination
//!    order;
//! 5. copy minimisation: coalescing over phi and two-address units;
//! 6. SSA destruction: parallel moves on the (pre-split) edges, phis
//!    gone;
//! 7. lowering: wide perms into the pairwise swap idiom, spill slots
//!    onto the frame;
//! 8. verification: no interfering values share a register.

pub mod color;
pub mod copyopt;
pub mod interference;
pub mod isa;
pub mod liveness;
pub mod regs;
pub mod sched;
pub mod spill;
pub mod ssa_destr;
pub mod uses;

use crate::ana::cfg::BlockGraph;
use crate::ana::domtree::DomTree;
use crate::ana::execfreq::ExecFreq;
use crate::ana::loops::LoopTree;
use crate::errors::{CodegenResult, VerifyLevel};
use crate::fx::FxHashMap;
use crate::ir::{Irg, Node, NodeAttr, Opcode};
use crate::program::Program;
use crate::tr::Entity;

use self::color::{color_graph, verify_coloring, Coloring};
use self::copyopt::{minimize_copies, CopyMinMethod};
use self::interference::InterferenceGraph;
use self::isa::{Isa, RegClass};
use self::liveness::Liveness;
use self::sched::{Schedule, SelectorKind};
use self::spill::{run_spiller, BeladyConfig};
use self::ssa_destr::{destruct_ssa, lower_perms, split_critical_edges};
use self::uses::NextUses;

/// Configuration of one allocator run.
#[derive(Clone)]
pub struct BackendConfig {
    /// Verification level applied after each pipeline step.
    pub verify: VerifyLevel,
    /// Spiller tunables.
    pub belady: BeladyConfig,
    /// Copy minimisation method.
    pub copy_min: CopyMinMethod,
    /// Scheduling selector.
    pub selector: SelectorKind,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            verify: VerifyLevel::Warn,
            belady: BeladyConfig::default(),
            copy_min: CopyMinMethod::Heuristic,
            selector: SelectorKind::Trivial,
        }
    }
}

/// The result of register allocation for one graph.
pub struct Allocation {
    /// The final schedule (spill code and shuffle code included).
    pub schedule: Schedule,
    /// One register assignment per class.
    pub colorings: Vec<Coloring>,
    /// Frame entity of every spill.
    pub spill_slots: FxHashMap<Node, Entity>,
}

/// Allocate registers for `irg` on `isa`.
pub fn allocate_registers(
    program: &mut Program,
    irg: Irg,
    isa: &Isa,
    config: &BackendConfig,
) -> CodegenResult<Allocation> {
    if let Some(hook) = isa.hooks.pre_ra {
        hook(&mut program.graphs[irg]);
    }

    // Shuffle code needs every join edge to have its own block.
    {
        let Program { graphs, modes, .. } = program;
        let g = &mut graphs[irg];
        let bg = BlockGraph::compute(g);
        split_critical_edges(g, &bg, modes);
    }

    let Program {
        graphs,
        modes,
        universe,
        idents,
        ..
    } = program;
    let g = &mut graphs[irg];

    let bg = BlockGraph::compute(g);
    let dt = DomTree::compute(g, &bg);
    let cf_loops = LoopTree::compute_cf(g, &bg);
    let freq = ExecFreq::compute(g, &bg.blocks, &cf_loops);
    let mut sched = Schedule::compute(g, &bg, config.selector);

    let mut colorings = Vec::new();
    for class_idx in 0..isa.classes.len() {
        let rc = RegClass(class_idx as u8);

        // Prologue: the class environment.
        let live = Liveness::compute(g, &bg, &sched, modes, isa, rc);
        let uses = NextUses::compute(g, &bg, &sched, modes, isa, rc);

        // Spill.
        let spilled = run_spiller(
            g,
            &bg,
            &dt,
            &mut sched,
            &live,
            &uses,
            &freq,
            modes,
            isa,
            rc,
            &config.belady,
        );

        // Memory operands: fold a reload into its single user where the
        // target can.
        g.assure_outs();
        for &reload in &spilled.reloads {
            let users: Vec<Node> = g
                .outs(reload)
                .iter()
                .copied()
                .filter(|&u| u != g.anchors.end)
                .collect();
            if let [single] = users.as_slice() {
                if isa.fuse_memory_operand(g, reload, *single) {
                    sched.remove(g.block_of(reload), reload);
                }
            }
        }

        // Spilling split live ranges: refresh the environment.
        let live = Liveness::compute(g, &bg, &sched, modes, isa, rc);
        let uses = NextUses::compute(g, &bg, &sched, modes, isa, rc);

        // Color.
        let mut coloring = color_graph(g, &bg, &dt, &sched, &live, &uses, modes, isa, rc);
        verify_coloring(g, &bg, &sched, &live, &coloring, modes, isa)
            .dispose(config.verify, "coloring")?;

        // Copy minimisation.
        let ig = InterferenceGraph::build(g, &bg, &sched, &live, modes, isa, rc);
        match config.copy_min {
            CopyMinMethod::None => {}
            method => {
                minimize_copies(
                    g, &bg, &sched, &ig, &freq, &mut coloring, modes, isa, rc, method,
                )?;
                verify_coloring(g, &bg, &sched, &live, &coloring, modes, isa)
                    .dispose(config.verify, "copy minimisation")?;
            }
        }

        // SSA destruction, then the perm lowering.
        destruct_ssa(g, &bg, &mut sched, &mut coloring, modes, isa, rc);
        lower_perms(g, &bg, &mut sched, &mut coloring);

        if config.verify != VerifyLevel::Off {
            let mut errors = crate::errors::VerifierErrors::default();
            for &b in &bg.blocks {
                for &n in sched.nodes(b) {
                    if g.opcode(n) == Opcode::Phi
                        && isa.class_of(modes, g.mode(n)) == Some(rc)
                    {
                        errors.report(n, "phi survived SSA destruction".to_string());
                    }
                }
            }
            errors.dispose(config.verify, "ssa destruction")?;
        }

        colorings.push(coloring);
    }

    // Stack layout: every spill gets a frame slot, offsets become final.
    let spill_slots = assign_spill_slots(g, universe, idents, &bg, modes);

    if let Some(hook) = isa.hooks.after_ra {
        hook(g);
    }
    if let Some(hook) = isa.hooks.finish {
        hook(g);
    }
    if let Some(hook) = isa.hooks.emit {
        hook(g);
    }

    Ok(Allocation {
        schedule: sched,
        colorings,
        spill_slots,
    })
}

// Give every Spill node a slot in the graph's frame type and fix the
// layout.
fn assign_spill_slots(
    g: &mut crate::ir::Graph,
    universe: &mut crate::tr::TypeUniverse,
    idents: &mut crate::ident::Interner,
    bg: &BlockGraph,
    modes: &crate::mode::ModeRegistry,
) -> FxHashMap<Node, Entity> {
    let mut slots = FxHashMap::default();
    let frame = match g.frame_type.expand() {
        Some(f) => f,
        None => {
            let name = idents.unique("frame_%u");
            let f = universe.new_struct_type(name);
            g.frame_type = Some(f).into();
            f
        }
    };

    let mut offset: u32 = 0;
    let mut prim_cache: FxHashMap<crate::mode::Mode, crate::tr::Type> = FxHashMap::default();
    let per_block = crate::ir::walk::nodes_per_block(g);
    for &b in &bg.blocks {
        let spills: Vec<Node> = per_block[b]
            .iter()
            .copied()
            .filter(|&n| g.opcode(n) == Opcode::Spill)
            .collect();
        for spill in spills {
            let value = g.input(spill, 0);
            let m = g.mode(value);
            let ty = *prim_cache
                .entry(m)
                .or_insert_with(|| universe.new_primitive_type(None, m, modes));
            let size = universe.type_data(ty).size.max(1);
            let name = idents.unique("spill_slot_%u");
            let ent = universe.new_entity(frame, name, ty);
            offset = (offset + size - 1) / size * size;
            universe.entity_mut(ent).offset = offset as i32;
            offset += size;
            if let NodeAttr::SpillSlot(slot) = g.attr_mut(spill) {
                *slot = Some(ent).into();
            }
            slots.insert(spill, ent);
            log::debug!("{} spills to frame offset {}", spill, offset - size);
        }
    }
    universe.set_layout_fixed(frame, offset, 8);
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode;

    fn program_with_pressure() -> (Program, Irg) {
        let mut p = Program::new();
        let int_name = p.idents.intern("int");
        let int_ty = p.universe.new_primitive_type(Some(int_name), mode::IS, &p.modes);
        let mty = p.universe.new_method_type(vec![int_ty, int_ty], vec![int_ty]);
        let owner_name = p.idents.intern("Globals");
        let owner = p.universe.new_struct_type(owner_name);
        let f_name = p.idents.intern("hot");
        let ent = p.universe.new_entity(owner, f_name, mty);
        let irg = p.new_graph(ent);
        {
            use crate::ir::NodeAttr;
            let modes = &p.modes;
            let g = &mut p.graphs[irg];
            let block = g.anchors.start_block;
            let args = g.anchors.args;
            let a = g.new_proj(modes, args, mode::IS, 0);
            let b = g.new_proj(modes, args, mode::IS, 1);
            // A chain that keeps `a` live across a point where two fresh
            // values need both registers; raw nodes so nothing folds away.
            let t1 = g.add_node(Opcode::Add, mode::IS, Some(block), &[b, b], NodeAttr::None);
            let t2 = g.add_node(Opcode::Add, mode::IS, Some(block), &[t1, t1], NodeAttr::None);
            let t3 = g.add_node(Opcode::Add, mode::IS, Some(block), &[t1, t2], NodeAttr::None);
            let res = g.add_node(Opcode::Add, mode::IS, Some(block), &[t3, a], NodeAttr::None);
            let mem = g.anchors.initial_mem;
            let ret = g.new_return(modes, block, mem, &[res]);
            let end_block = g.anchors.end_block;
            g.add_in_edge(end_block, ret);
            g.set_matured(end_block);
        }
        (p, irg)
    }

    #[test]
    fn allocation_pipeline_runs_clean() {
        let (mut p, irg) = program_with_pressure();
        let isa = Isa::generic(2);
        let config = BackendConfig {
            verify: VerifyLevel::Assert,
            ..Default::default()
        };
        let alloc = allocate_registers(&mut p, irg, &isa, &config).expect("allocation succeeds");
        // Pressure of four arguments against two registers forces frame
        // traffic.
        assert!(!alloc.spill_slots.is_empty());
        // Spill slots landed in a fixed frame with distinct offsets.
        let frame = p.graphs[irg].frame_type.expand().expect("frame exists");
        assert_eq!(
            p.universe.type_data(frame).state,
            crate::tr::TypeState::Fixed
        );
        let mut offsets: Vec<i32> = alloc
            .spill_slots
            .values()
            .map(|&e| p.universe.entity(e).offset)
            .collect();
        offsets.sort();
        offsets.dedup();
        assert_eq!(offsets.len(), alloc.spill_slots.len());
    }

    #[test]
    fn verify_levels_are_selectable() {
        let (mut p, irg) = program_with_pressure();
        let isa = Isa::generic(2);
        let config = BackendConfig {
            verify: VerifyLevel::Off,
            ..Default::default()
        };
        assert!(allocate_registers(&mut p, irg, &isa, &config).is_ok());
    }
}
