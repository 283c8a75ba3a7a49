//! Method argument analysis.
//!
//! Two per-parameter annotations are cached on the method entity:
//!
//! - **Pointer access** (`PtrAccess`): how a pointer parameter is used:
//!   read through, written through, or stored away. Unknown uses are taken
//!   as everything at once.
//! - **Optimization weight**: a score estimating how much specialising a
//!   call site on a constant argument would buy (comparisons and branches
//!   on the argument count a lot, plain arithmetic a little, an indirect
//!   call through the argument the most).

use crate::ir::{Graph, Node, Opcode};
use crate::mode::{self, ModeSort};
use crate::program::Program;
use crate::tr::{Entity, PtrAccess};

const BINOP_WEIGHT: u32 = 1;
const CONST_BINOP_WEIGHT: u32 = 1;
const CMP_WEIGHT: u32 = 4;
const CONST_CMP_WEIGHT: u32 = 10;
const INDIRECT_CALL_WEIGHT: u32 = 125;

fn is_binop(op: Opcode) -> bool {
    match op {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::And
        | Opcode::Or
        | Opcode::Eor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Shrs
        | Opcode::Rotl => true,
        _ => false,
    }
}

fn is_unop(op: Opcode) -> bool {
    match op {
        Opcode::Minus | Opcode::Not | Opcode::Abs | Opcode::Conv => true,
        _ => false,
    }
}

// The parameter projections of the argument tuple, by position.
fn param_projs(g: &Graph) -> Vec<Option<Node>> {
    let args = g.anchors.args;
    let mut out: Vec<Option<Node>> = Vec::new();
    for u in g.outs(args) {
        if g.opcode(*u) == Opcode::Proj && g.proj_pred(*u) == args {
            let pos = g.proj_num(*u) as usize;
            if pos >= out.len() {
                out.resize(pos + 1, None);
            }
            out[pos] = Some(*u);
        }
    }
    out
}

fn pointer_access(g: &Graph, arg: Node) -> PtrAccess {
    let mut access = PtrAccess::NONE;
    let mut stack = vec![arg];
    let mut seen = crate::fx::FxHashSet::default();
    while let Some(v) = stack.pop() {
        if !seen.insert(v) {
            continue;
        }
        for &u in g.outs(v) {
            match g.opcode(u) {
                Opcode::Load => access = access.union(PtrAccess::READ),
                Opcode::Store => {
                    // Written through, or leaked as the stored value.
                    if g.arity(u) == 3 && g.input(u, 1) == v {
                        access = access.union(PtrAccess::WRITE);
                    }
                    if g.arity(u) == 3 && g.input(u, 2) == v {
                        access = access.union(PtrAccess::STORE);
                    }
                }
                Opcode::Call => {
                    if g.call_ptr(u) == v {
                        access = access.union(PtrAccess::READ);
                    } else {
                        // Passed on; without the callee's answer assume
                        // everything.
                        access = access.union(PtrAccess::ALL);
                    }
                }
                // Address arithmetic keeps the pointer a pointer.
                Opcode::Add | Opcode::Sub | Opcode::Conv | Opcode::Phi | Opcode::Id
                | Opcode::Mux => stack.push(u),
                Opcode::Cmp | Opcode::Return | Opcode::Keep | Opcode::End => {}
                _ => access = access.union(PtrAccess::ALL),
            }
        }
    }
    access
}

fn param_weight(g: &Graph, arg: Node) -> u32 {
    let mut weight = 0u32;
    let mut stack = vec![arg];
    let mut seen = crate::fx::FxHashSet::default();
    while let Some(v) = stack.pop() {
        if !seen.insert(v) {
            continue;
        }
        for &u in g.outs(v) {
            if g.mode(u) == mode::M {
                continue;
            }
            let op = g.opcode(u);
            match op {
                Opcode::Call => {
                    if g.call_ptr(u) == v {
                        // A constant here turns an indirect call direct.
                        weight += INDIRECT_CALL_WEIGHT;
                    }
                }
                Opcode::Cmp => {
                    let other = if g.input(u, 0) == v {
                        g.input(u, 1)
                    } else {
                        g.input(u, 0)
                    };
                    if g.opcode(other).is_constlike() {
                        weight += CONST_CMP_WEIGHT;
                    } else {
                        weight += CMP_WEIGHT;
                    }
                }
                Opcode::Cond => {
                    weight += CONST_CMP_WEIGHT * g.outs(u).len() as u32;
                }
                Opcode::Id => stack.push(u),
                _ if is_binop(op) => {
                    let other = if g.input(u, 0) == v {
                        g.input(u, 1)
                    } else {
                        g.input(u, 0)
                    };
                    if g.opcode(other).is_constlike() {
                        weight += CONST_BINOP_WEIGHT;
                        stack.push(u);
                    } else {
                        weight += BINOP_WEIGHT;
                    }
                }
                _ if is_unop(op) => {
                    weight += CONST_BINOP_WEIGHT;
                    stack.push(u);
                }
                _ => {}
            }
        }
    }
    weight
}

/// Analyze the parameters of one method graph and cache the results on its
/// entity. Requires nothing; computes out-edges as needed.
pub fn analyze_irg_args(program: &mut Program, irg: crate::ir::Irg) {
    let ent: Entity = match program.graphs[irg].entity.expand() {
        Some(e) => e,
        None => return,
    };
    let mty = program.universe.entity(ent).ty;
    if !program.universe.is_method_type(mty) {
        return;
    }
    let nparams = program.universe.method_signature(mty).params.len();

    let Program {
        graphs,
        universe,
        modes,
        ..
    } = program;
    let g = &mut graphs[irg];
    g.assure_outs();
    let projs = param_projs(g);

    let mut access = vec![PtrAccess::NONE; nparams];
    let mut weights = vec![0u32; nparams];
    for (i, slot) in projs.iter().enumerate().take(nparams) {
        if let Some(p) = *slot {
            if modes.data(g.mode(p)).sort == ModeSort::Reference {
                access[i] = pointer_access(g, p);
            }
            weights[i] = param_weight(g, p);
        }
    }
    // Parameters without a projection are never touched at all.

    let data = universe.entity_mut(ent);
    data.param_access = Some(access);
    data.param_weights = Some(weights);
}

/// Analyze every graph of the program.
pub fn analyze_args(program: &mut Program) {
    for irg in firm_arena::Keys::<crate::ir::Irg>::with_len(program.graphs.len()) {
        analyze_irg_args(program, irg);
    }
}

/// The cached pointer access of parameter `pos`, conservative when the
/// analysis never ran.
pub fn method_param_access(program: &Program, ent: Entity, pos: usize) -> PtrAccess {
    match &program.universe.entity(ent).param_access {
        Some(v) if pos < v.len() => v[pos],
        _ => PtrAccess::ALL,
    }
}

/// The cached weight of parameter `pos`; zero when the analysis never ran.
pub fn method_param_weight(program: &Program, ent: Entity, pos: usize) -> u32 {
    match &program.universe.entity(ent).param_weights {
        Some(v) if pos < v.len() => v[pos],
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::pn;
    use crate::program::Program;
    use crate::tarval::{Relation, Tarval};

    fn method_with_body() -> (Program, Entity, crate::ir::Irg) {
        let mut p = Program::new();
        let int_name = p.idents.intern("int");
        let int_ty = p.universe.new_primitive_type(Some(int_name), mode::IS, &p.modes);
        let ptr_ty = p.universe.new_pointer_type(int_ty);
        let mty = p
            .universe
            .new_method_type(vec![int_ty, ptr_ty], vec![int_ty]);
        let owner_name = p.idents.intern("Globals");
        let owner = p.universe.new_struct_type(owner_name);
        let f_name = p.idents.intern("f");
        let ent = p.universe.new_entity(owner, f_name, mty);
        let irg = p.new_graph(ent);
        (p, ent, irg)
    }

    #[test]
    fn cmp_against_constant_weighs_most() {
        let (mut p, ent, irg) = method_with_body();
        {
            let modes = &p.modes;
            let g = &mut p.graphs[irg];
            let block = g.anchors.start_block;
            let x = g.new_proj(modes, g.anchors.args, mode::IS, 0);
            let ten = g.new_const(modes, Tarval::from_i64(10, mode::IS, modes));
            let cmp = g.new_cmp(modes, block, x, ten);
            let lt = g.new_proj(modes, cmp, mode::B, Relation::LESS.0 as u32);
            g.keep_alive(lt);
        }
        analyze_irg_args(&mut p, irg);
        assert!(method_param_weight(&p, ent, 0) >= CONST_CMP_WEIGHT);
        assert_eq!(method_param_weight(&p, ent, 1), 0);
    }

    #[test]
    fn load_and_store_classify_pointer_use() {
        let (mut p, ent, irg) = method_with_body();
        {
            let modes = &p.modes;
            let g = &mut p.graphs[irg];
            let block = g.anchors.start_block;
            let ptr = g.new_proj(modes, g.anchors.args, mode::P, 1);
            let mem = g.anchors.initial_mem;
            let load = g.new_load(modes, block, mem, ptr, mode::IS);
            let val = g.new_proj(modes, load, mode::IS, pn::load::RES);
            let load_mem = g.new_proj(modes, load, mode::M, pn::load::M);
            let store = g.new_store(modes, block, load_mem, ptr, val);
            let store_mem = g.new_proj(modes, store, mode::M, pn::store::M);
            let ret = g.new_return(modes, block, store_mem, &[val]);
            let end_block = g.anchors.end_block;
            g.add_in_edge(end_block, ret);
            g.set_matured(end_block);
        }
        analyze_irg_args(&mut p, irg);
        let acc = method_param_access(&p, ent, 1);
        assert!(acc.contains(PtrAccess::READ));
        assert!(acc.contains(PtrAccess::WRITE));
        assert!(!acc.contains(PtrAccess::STORE));
    }

    #[test]
    fn unanalyzed_method_is_conservative() {
        let (p, ent, _irg) = method_with_body();
        assert_eq!(method_param_access(&p, ent, 0), PtrAccess::ALL);
        assert_eq!(method_param_weight(&p, ent, 0), 0);
    }
}
