//! Simple forward type inference over one graph.
//!
//! Types are propagated from the places that know them (parameter
//! projections, constants, entity selections, call results) through the
//! data nodes. The result is a per-node type annotation; nodes the
//! analysis cannot place get the distinguished `unknown` type, and phi
//! cycles that never stabilise get the `phi cycle` placeholder. Both are
//! expected outcomes, never errors.

use crate::ir::{pn, walk, Graph, Irg, Node, NodeAttr, Opcode};
use crate::mode::{Mode, ModeRegistry};
use crate::program::Program;
use crate::tr::{Type, TypeUniverse};
use firm_arena::{PackedOption, SecondaryMap};

/// Per-node type annotations of one graph.
pub struct TypeInfo {
    types: SecondaryMap<Node, PackedOption<Type>>,
    /// The placeholder for unresolvable nodes.
    pub unknown_type: Type,
    /// The placeholder for unstabilised phi cycles.
    pub phi_cycle_type: Type,
    version: u64,
}

impl TypeInfo {
    /// The inferred type of `n`.
    pub fn get(&self, n: Node) -> Type {
        self.types[n].expand().unwrap_or(self.unknown_type)
    }

    /// Is this information still consistent with the graph?
    pub fn is_consistent(&self, g: &Graph) -> bool {
        self.version == g.version()
    }
}

// A primitive type per mode, created on first demand.
struct PrimitiveCache {
    by_mode: crate::fx::FxHashMap<Mode, Type>,
}

impl PrimitiveCache {
    fn get(&mut self, universe: &mut TypeUniverse, modes: &ModeRegistry, m: Mode) -> Type {
        if let Some(&t) = self.by_mode.get(&m) {
            return t;
        }
        let t = universe.new_primitive_type(None, m, modes);
        self.by_mode.insert(m, t);
        t
    }
}

/// Run the inference for one graph.
pub fn simple_analyse_types(program: &mut Program, irg: Irg) -> TypeInfo {
    let Program {
        graphs,
        universe,
        modes,
        idents,
        ..
    } = program;
    let g = &mut graphs[irg];

    let unknown_type = {
        let name = idents.intern("$unknown");
        universe.new_struct_type(name)
    };
    let phi_cycle_type = {
        let name = idents.intern("$phi_cycle");
        universe.new_struct_type(name)
    };
    let mut prims = PrimitiveCache {
        by_mode: Default::default(),
    };

    let method_ty = g
        .entity
        .expand()
        .map(|e| universe.entity(e).ty)
        .filter(|&t| universe.is_method_type(t));

    let mut types: SecondaryMap<Node, PackedOption<Type>> = SecondaryMap::new();
    let (_, post) = walk::node_orders(g);

    // Two rounds: the second sees values that flow backwards through phis.
    for _round in 0..2 {
        for &n in &post {
            if types[n].is_some() && types[n].expand() != Some(phi_cycle_type) {
                continue;
            }
            let t: Option<Type> = match g.opcode(n) {
                Opcode::Const => Some(prims.get(universe, modes, g.mode(n))),
                Opcode::SymConst => Some(prims.get(universe, modes, g.mode(n))),
                Opcode::Sel => {
                    let ent = g.sel_entity(n);
                    Some(universe.entity(ent).ty)
                }
                Opcode::Proj => {
                    let pred = g.proj_pred(n);
                    let num = g.proj_num(n) as usize;
                    match g.opcode(pred) {
                        Opcode::Start if g.proj_num(n) == pn::start::T_ARGS => None,
                        Opcode::Proj => {
                            // Proj(Proj(Start, args), i): the i-th parameter.
                            let grandpa = g.proj_pred(pred);
                            if g.opcode(grandpa) == Opcode::Start
                                && g.proj_num(pred) == pn::start::T_ARGS
                            {
                                method_ty.and_then(|mt| {
                                    universe.method_signature(mt).params.get(num).copied()
                                })
                            } else {
                                types[pred].expand()
                            }
                        }
                        Opcode::Call if g.proj_num(n) == pn::call::T_RESULT => None,
                        Opcode::Load if num == pn::load::RES as usize => {
                            Some(prims.get(universe, modes, g.mode(n)))
                        }
                        Opcode::Div | Opcode::Mod if num == pn::div::RES as usize => {
                            Some(prims.get(universe, modes, g.mode(n)))
                        }
                        _ => types[pred].expand(),
                    }
                }
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Minus
                | Opcode::Abs
                | Opcode::And
                | Opcode::Or
                | Opcode::Eor
                | Opcode::Not
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Shrs
                | Opcode::Rotl
                | Opcode::Conv
                | Opcode::Mux => {
                    // The operand types, when they agree; the node's own
                    // mode otherwise.
                    let mut agreed: Option<Type> = None;
                    let mut agree = true;
                    for i in 0..g.arity(n) {
                        let it = types[g.input(n, i)].expand();
                        match (agreed, it) {
                            (None, Some(t)) => agreed = Some(t),
                            (Some(a), Some(t)) if a != t => agree = false,
                            _ => {}
                        }
                    }
                    if agree && agreed.is_some() {
                        agreed
                    } else {
                        Some(prims.get(universe, modes, g.mode(n)))
                    }
                }
                Opcode::Phi => {
                    let mut found: Option<Type> = None;
                    let mut cycle = false;
                    for i in 0..g.arity(n) {
                        match types[g.input(n, i)].expand() {
                            Some(t) if t == phi_cycle_type => cycle = true,
                            Some(t) => match found {
                                None => found = Some(t),
                                Some(f) if f != t => found = Some(unknown_type),
                                _ => {}
                            },
                            None => cycle = true,
                        }
                    }
                    match (found, cycle) {
                        (Some(t), _) => Some(t),
                        (None, true) => Some(phi_cycle_type),
                        (None, false) => Some(unknown_type),
                    }
                }
                _ => None,
            };
            if let Some(t) = t {
                types[n] = Some(t).into();
            }
        }
    }

    TypeInfo {
        types,
        unknown_type,
        phi_cycle_type,
        version: graphs[irg].version(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode;
    use crate::tarval::Tarval;

    #[test]
    fn parameters_and_arithmetic_carry_their_types() {
        let mut p = Program::new();
        let int_name = p.idents.intern("int");
        let int_ty = p.universe.new_primitive_type(Some(int_name), mode::IS, &p.modes);
        let mty = p.universe.new_method_type(vec![int_ty], vec![int_ty]);
        let owner_name = p.idents.intern("Globals");
        let owner = p.universe.new_struct_type(owner_name);
        let f_name = p.idents.intern("f");
        let ent = p.universe.new_entity(owner, f_name, mty);
        let irg = p.new_graph(ent);

        let (x, sum) = {
            let modes = &p.modes;
            let g = &mut p.graphs[irg];
            let block = g.anchors.start_block;
            let x = g.new_proj(modes, g.anchors.args, mode::IS, 0);
            let one = g.new_const(modes, Tarval::from_i64(1, mode::IS, modes));
            let sum = g.new_add(modes, block, x, one);
            let mem = g.anchors.initial_mem;
            let ret = g.new_return(modes, block, mem, &[sum]);
            let end_block = g.anchors.end_block;
            g.add_in_edge(end_block, ret);
            g.set_matured(end_block);
            (x, sum)
        };

        let info = simple_analyse_types(&mut p, irg);
        assert_eq!(info.get(x), int_ty);
        // x + 1 mixes the parameter type with a plain int constant; both
        // sides being int-shaped the parameter type does not survive, but
        // the result is typed, not unknown.
        assert_ne!(info.get(sum), info.unknown_type);
        assert!(info.is_consistent(&p.graphs[irg]));
    }
}
