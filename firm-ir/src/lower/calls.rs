//! Lowering of compound (aggregate) return values.
//!
//! A method returning a struct cannot deliver it in a register. The
//! lowering gives every such method type a lowered twin whose compound
//! results become pointer parameters (the hidden parameters), rewrites the
//! procedure bodies to copy the result through the hidden pointer, and
//! rewrites the call sites to pass the address of a caller-owned slot.
//!
//! The pass is idempotent: once a type's lowered twin is installed and the
//! entities use it, a second run finds nothing left to do.

use crate::ir::{pn, Graph, Irg, Node, NodeAttr, Opcode};
use crate::mode;
use crate::program::Program;
use crate::tr::{Entity, Type, TypeUniverse, Variadicity};
use smallvec::SmallVec;

/// Where hidden parameters are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddHidden {
    /// Always prepend them.
    AlwaysInFront,
    /// Always append them.
    AlwaysLast,
    /// Prepend for variadic methods (the variadic tail must keep its
    /// positions), append otherwise.
    Smart,
}

/// Parameters of the lowering.
#[derive(Debug, Clone)]
pub struct LowerParams {
    /// Hidden-parameter placement.
    pub hidden: AddHidden,
}

impl Default for LowerParams {
    fn default() -> Self {
        Self {
            hidden: AddHidden::Smart,
        }
    }
}

fn hidden_in_front(universe: &TypeUniverse, mtp: Type, params: &LowerParams) -> bool {
    match params.hidden {
        AddHidden::AlwaysInFront => true,
        AddHidden::AlwaysLast => false,
        AddHidden::Smart => {
            universe.method_signature(mtp).variadicity == Variadicity::Variadic
        }
    }
}

// The compound results of a method type, as (result index, type).
fn compound_results(universe: &TypeUniverse, mtp: Type) -> SmallVec<[(usize, Type); 2]> {
    universe
        .method_signature(mtp)
        .results
        .iter()
        .enumerate()
        .filter(|(_, &t)| universe.is_compound_type(t))
        .map(|(i, &t)| (i, t))
        .collect()
}

/// Create (or fetch) the lowered twin of `mtp`.
///
/// One pointer parameter per compound result, placed per `params`; the
/// compound results disappear from the result list.
pub fn lower_method_type(
    universe: &mut TypeUniverse,
    mtp: Type,
    params: &LowerParams,
) -> Type {
    if let Some(lowered) = universe.type_data(mtp).lowered.expand() {
        return lowered;
    }
    let compounds = compound_results(universe, mtp);
    if compounds.is_empty() {
        return mtp;
    }
    let in_front = hidden_in_front(universe, mtp, params);
    let sig = universe.method_signature(mtp).clone();

    let mut pointer_params: Vec<Type> = Vec::new();
    for &(_, ty) in &compounds {
        pointer_params.push(universe.new_pointer_type(ty));
    }
    let mut new_params = Vec::new();
    if in_front {
        new_params.extend(pointer_params.iter().copied());
        new_params.extend(sig.params.iter().copied());
    } else {
        new_params.extend(sig.params.iter().copied());
        new_params.extend(pointer_params.iter().copied());
    }
    let new_results: Vec<Type> = sig
        .results
        .iter()
        .copied()
        .filter(|&t| !universe.is_compound_type(t))
        .collect();

    let lowered = universe.new_method_type(new_params, new_results);
    {
        let lsig = universe.method_signature_mut(lowered);
        lsig.variadicity = sig.variadicity;
        lsig.first_variadic = sig.first_variadic.map(|fv| {
            if in_front {
                fv + compounds.len()
            } else {
                fv
            }
        });
        lsig.calling_convention = sig.calling_convention;
    }
    universe.type_data_mut(mtp).lowered = Some(lowered).into();
    log::debug!("lowered {} to {}", mtp, lowered);
    lowered
}

// The parameter position of the hidden pointer for compound result
// `comp_idx` (index into the compound list, not the result list).
fn hidden_position(
    universe: &TypeUniverse,
    orig_mtp: Type,
    comp_idx: usize,
    params: &LowerParams,
) -> usize {
    let n_params = universe.method_signature(orig_mtp).params.len();
    if hidden_in_front(universe, orig_mtp, params) {
        comp_idx
    } else {
        n_params + comp_idx
    }
}

// Rewrite the returns of one graph: compound results leave the Return and
// are copied through the hidden pointer instead.
fn lower_graph_returns(
    g: &mut Graph,
    modes: &crate::mode::ModeRegistry,
    universe: &TypeUniverse,
    orig_mtp: Type,
    params: &LowerParams,
) {
    let compounds = compound_results(universe, orig_mtp);
    let end_block = g.anchors.end_block;
    let returns: SmallVec<[Node; 2]> = (0..g.n_block_preds(end_block))
        .map(|i| g.block_pred(end_block, i))
        .filter(|&r| g.opcode(r) == Opcode::Return)
        .collect();

    for ret in returns {
        let block = g.block_of(ret);
        let mut mem = g.input(ret, 0);
        let results: Vec<Node> = (1..g.arity(ret)).map(|i| g.input(ret, i)).collect();
        let mut kept: Vec<Node> = Vec::new();
        for (res_pos, &value) in results.iter().enumerate() {
            match compounds.iter().position(|&(i, _)| i == res_pos) {
                None => kept.push(value),
                Some(comp_idx) => {
                    let (_, comp_ty) = compounds[comp_idx];
                    let hidden_idx = hidden_position(universe, orig_mtp, comp_idx, params);
                    let dst =
                        g.new_proj(modes, g.anchors.args, mode::P, hidden_idx as u32);
                    if g.skip_id(value) == dst {
                        // Copy-return: the value already lives in the
                        // caller's slot.
                        continue;
                    }
                    let copy = g.new_copyb(modes, block, mem, dst, value, comp_ty);
                    mem = g.new_proj(modes, copy, mode::M, pn::copyb::M);
                }
            }
        }
        let mut new_inputs = vec![mem];
        new_inputs.extend(kept);
        g.set_inputs(ret, &new_inputs);
    }
}

// Rewrite the calls in one graph whose callee type has compound results.
fn lower_graph_calls(
    program: &mut Program,
    irg: Irg,
    params: &LowerParams,
) {
    let call_list: Vec<(Node, Type)> = {
        let g = &mut program.graphs[irg];
        let (_, nodes) = crate::ir::walk::node_orders(g);
        nodes
            .into_iter()
            .filter(|&n| g.opcode(n) == Opcode::Call)
            .filter_map(|n| match g.attr(n) {
                NodeAttr::Call(attr) => Some((n, attr.ty)),
                _ => None,
            })
            .collect()
    };

    for (call, mtp) in call_list {
        let compounds = compound_results(&program.universe, mtp);
        if compounds.is_empty() {
            continue;
        }
        let lowered = lower_method_type(&mut program.universe, mtp, params);
        let in_front = hidden_in_front(&program.universe, mtp, params);

        // A hidden argument per compound result: either the destination of
        // a CopyB consuming the call result (which then disappears), or
        // the address of a fresh slot on the caller's frame.
        let Program {
            graphs,
            universe,
            modes,
            idents,
            ..
        } = program;
        let g = &mut graphs[irg];
        g.assure_outs();

        let block = g.block_of(call);
        let mut hidden_args: SmallVec<[Node; 2]> = SmallVec::new();
        for &(res_pos, comp_ty) in &compounds {
            // The projection chain Proj(Proj(call, T_RESULT), res_pos).
            let res_tuple = g
                .outs(call)
                .iter()
                .copied()
                .find(|&u| g.opcode(u) == Opcode::Proj && g.proj_num(u) == pn::call::T_RESULT);
            let res_proj = res_tuple.and_then(|t| {
                g.outs(t)
                    .iter()
                    .copied()
                    .find(|&u| g.opcode(u) == Opcode::Proj && g.proj_num(u) == res_pos as u32)
            });

            // A CopyB reading the result directly tells us the final
            // destination.
            let copyb = res_proj.and_then(|rp| {
                g.outs(rp)
                    .iter()
                    .copied()
                    .find(|&u| g.opcode(u) == Opcode::CopyB && g.input(u, 2) == rp)
            });

            let dst = match copyb {
                Some(cb) => {
                    let dst = g.input(cb, 1);
                    let cb_mem = g.input(cb, 0);
                    // The copy itself vanishes; its memory users read on.
                    let mem_projs: Vec<Node> = g
                        .outs(cb)
                        .iter()
                        .copied()
                        .filter(|&u| g.opcode(u) == Opcode::Proj && g.proj_num(u) == pn::copyb::M)
                        .collect();
                    for mp in mem_projs {
                        g.exchange(mp, cb_mem);
                    }
                    g.kill(cb);
                    dst
                }
                None => {
                    // A caller-owned slot on the frame.
                    let frame = match g.frame_type.expand() {
                        Some(f) => f,
                        None => {
                            let name = idents.unique("frame_%u");
                            let f = universe.new_struct_type(name);
                            g.frame_type = Some(f).into();
                            f
                        }
                    };
                    let name = idents.unique("ret_slot_%u");
                    let slot = universe.new_entity(frame, name, comp_ty);
                    let no_mem = g.anchors.no_mem;
                    let frame_base = g.anchors.frame;
                    let addr = g.new_sel(modes, block, no_mem, frame_base, slot);
                    if let Some(rp) = res_proj {
                        // Consumers use the slot in place of the result.
                        g.exchange(rp, addr);
                    }
                    addr
                }
            };
            hidden_args.push(dst);
        }

        // Rebuild the call's inputs with the hidden arguments in place.
        let mem = g.input(call, 0);
        let ptr = g.input(call, 1);
        let old_args: Vec<Node> = (2..g.arity(call)).map(|i| g.input(call, i)).collect();
        let mut inputs = vec![mem, ptr];
        if in_front {
            inputs.extend(hidden_args.iter().copied());
            inputs.extend(old_args);
        } else {
            inputs.extend(old_args);
            inputs.extend(hidden_args.iter().copied());
        }
        g.set_inputs(call, &inputs);
        if let NodeAttr::Call(attr) = g.attr_mut(call) {
            attr.ty = lowered;
        }
        log::debug!("call {} now takes {} hidden pointers", call, compounds.len());
    }
}

/// Lower compound returns program-wide: method types, procedure bodies,
/// call sites.
pub fn lower_compound_return_calls(program: &mut Program, params: &LowerParams) {
    // Procedure bodies first: entities move to the lowered type.
    let irgs: Vec<Irg> = program.irgs().collect();
    for &irg in &irgs {
        let ent: Option<Entity> = program.graphs[irg].entity.expand();
        let ent = match ent {
            Some(e) => e,
            None => continue,
        };
        let mtp = program.universe.entity(ent).ty;
        if !program.universe.is_method_type(mtp) {
            continue;
        }
        if compound_results(&program.universe, mtp).is_empty() {
            continue;
        }
        let lowered = lower_method_type(&mut program.universe, mtp, params);
        let Program {
            graphs,
            universe,
            modes,
            ..
        } = program;
        lower_graph_returns(&mut graphs[irg], modes, universe, mtp, params);
        universe.entity_mut(ent).ty = lowered;
    }

    // Then every call site.
    for &irg in &irgs {
        lower_graph_calls(program, irg, params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tr::TypeState;

    // S f(int x) with S a two-field struct; f returns the address of a
    // local copy.
    fn program_with_compound_return() -> (Program, Entity, Type, Irg) {
        let mut p = Program::new();
        let int_name = p.idents.intern("int");
        let int_ty = p.universe.new_primitive_type(Some(int_name), mode::IS, &p.modes);
        let s_name = p.idents.intern("S");
        let s_ty = p.universe.new_struct_type(s_name);
        let fx = p.idents.intern("x");
        let fy = p.idents.intern("y");
        p.universe.new_entity(s_ty, fx, int_ty);
        p.universe.new_entity(s_ty, fy, int_ty);

        let mty = p.universe.new_method_type(vec![int_ty], vec![s_ty]);
        let owner_name = p.idents.intern("Globals");
        let owner = p.universe.new_struct_type(owner_name);
        let f_name = p.idents.intern("f");
        let ent = p.universe.new_entity(owner, f_name, mty);
        let irg = p.new_graph(ent);

        {
            let modes = &p.modes;
            let g = &mut p.graphs[irg];
            let frame_name = p.idents.unique("frame_%u");
            let frame = p.universe.new_struct_type(frame_name);
            g.frame_type = Some(frame).into();
            let local_name = p.idents.intern("local_s");
            let local = p.universe.new_entity(frame, local_name, s_ty);

            let block = g.anchors.start_block;
            let no_mem = g.anchors.no_mem;
            let addr = g.new_sel(modes, block, no_mem, g.anchors.frame, local);
            let mem = g.anchors.initial_mem;
            let ret = g.new_return(modes, block, mem, &[addr]);
            let end_block = g.anchors.end_block;
            g.add_in_edge(end_block, ret);
            g.set_matured(end_block);
        }
        (p, ent, mty, irg)
    }

    #[test]
    fn method_type_gains_hidden_pointer() {
        let (mut p, ent, mty, _irg) = program_with_compound_return();
        lower_compound_return_calls(&mut p, &LowerParams::default());

        let lowered = p.universe.type_data(mty).lowered.expand().expect("installed");
        let sig = p.universe.method_signature(lowered);
        assert_eq!(sig.params.len(), 2, "int plus the hidden pointer");
        assert!(sig.results.is_empty(), "no aggregate result survives");
        assert_eq!(p.universe.entity(ent).ty, lowered);
        // The hidden parameter is a pointer to S.
        let hidden = sig.params[1];
        assert!(matches!(
            p.universe.type_data(hidden).kind,
            crate::tr::TypeKind::Pointer { .. }
        ));
    }

    #[test]
    fn return_site_copies_through_hidden_pointer() {
        let (mut p, _ent, _mty, irg) = program_with_compound_return();
        lower_compound_return_calls(&mut p, &LowerParams::default());

        let g = &mut p.graphs[irg];
        let (_, nodes) = crate::ir::walk::node_orders(g);
        let g = &p.graphs[irg];
        assert!(
            nodes.iter().any(|&n| g.opcode(n) == Opcode::CopyB),
            "a CopyB materialises the result"
        );
        // The Return no longer carries a value.
        let end_block = g.anchors.end_block;
        let ret = g.block_pred(end_block, 0);
        assert_eq!(g.opcode(ret), Opcode::Return);
        assert_eq!(g.arity(ret), 1, "only the memory input remains");
    }

    #[test]
    fn lowering_is_idempotent() {
        let (mut p, ent, mty, irg) = program_with_compound_return();
        lower_compound_return_calls(&mut p, &LowerParams::default());
        let lowered = p.universe.type_data(mty).lowered.expand().unwrap();
        let n_types = p.universe.n_types();
        let n_nodes = p.graphs[irg].n_nodes();

        lower_compound_return_calls(&mut p, &LowerParams::default());
        assert_eq!(p.universe.type_data(mty).lowered.expand(), Some(lowered));
        assert_eq!(p.universe.entity(ent).ty, lowered);
        assert_eq!(p.universe.n_types(), n_types, "no new types on rerun");
        assert_eq!(p.graphs[irg].n_nodes(), n_nodes, "no new nodes on rerun");
    }

    #[test]
    fn call_site_passes_a_slot_address() {
        let (mut p, ent, mty, _f_irg) = program_with_compound_return();
        // A caller invoking f directly.
        let caller_mty = p.universe.new_method_type(vec![], vec![]);
        let owner = {
            let n = p.idents.intern("Globals2");
            p.universe.new_struct_type(n)
        };
        let caller_ent = {
            let n = p.idents.intern("g");
            p.universe.new_entity(owner, n, caller_mty)
        };
        let caller = p.new_graph(caller_ent);
        {
            let modes = &p.modes;
            let g = &mut p.graphs[caller];
            let block = g.anchors.start_block;
            let mem = g.anchors.initial_mem;
            let fptr = g.new_const(modes, crate::tarval::Tarval::from_entity(ent, mode::P));
            let one = g.new_const(modes, crate::tarval::Tarval::from_i64(1, mode::IS, modes));
            let call = g.new_call(modes, block, mem, fptr, &[one], mty);
            let call_mem = g.new_proj(modes, call, mode::M, pn::call::M);
            let ret = g.new_return(modes, block, call_mem, &[]);
            let end_block = g.anchors.end_block;
            g.add_in_edge(end_block, ret);
            g.set_matured(end_block);
        }
        lower_compound_return_calls(&mut p, &LowerParams::default());

        let g = &mut p.graphs[caller];
        let (_, nodes) = crate::ir::walk::node_orders(g);
        let g = &p.graphs[caller];
        let call = nodes
            .iter()
            .copied()
            .find(|&n| g.opcode(n) == Opcode::Call)
            .expect("call survives");
        // mem + ptr + int arg + hidden pointer.
        assert_eq!(g.arity(call), 4);
        let lowered = p.universe.type_data(mty).lowered.expand().unwrap();
        match g.attr(call) {
            NodeAttr::Call(attr) => assert_eq!(attr.ty, lowered),
            _ => unreachable!(),
        }
        // The hidden argument selects a frame slot.
        let hidden = g.input(call, 3);
        assert_eq!(g.opcode(hidden), Opcode::Sel);
        let frame = g.frame_type.expand().expect("caller got a frame");
        assert_ne!(p.universe.type_data(frame).state, TypeState::Fixed);
    }
}
