//! On-the-fly optimization applied by the node constructors.
//!
//! Three stages, in order:
//!
//! 1. `computed_value` folds an all-constant operation to a tarval.
//! 2. `equivalent_node` finds an existing node that already is the value
//!    (unit elements, projection shortcuts, trivial phis).
//! 3. `transform_node` rewrites a freshly created node into a cheaper form
//!    that needs new nodes (`x - x` into the zero constant).
//!
//! Value numbering (the `cse` module) runs last and catches everything that
//! is structurally a duplicate.

use crate::ir::node::NodeAttr;
use crate::ir::opcode::Opcode;
use crate::ir::{pn, Graph, Node};
use crate::mode::{Mode, ModeRegistry};
use crate::tarval::{Relation, Tarval};

/// The constant defining `n`, if `n` is a `Const`.
fn const_tv(g: &Graph, n: Node) -> Option<Tarval> {
    let n = g.skip_id(n);
    if g.opcode(n) == Opcode::Const {
        Some(g.const_value(n))
    } else {
        None
    }
}

fn rotl_bits(a: u64, s: u32, bits: u32) -> u64 {
    let s = s % bits;
    if s == 0 {
        a
    } else {
        ((a << s) | (a >> (bits - s))) & Tarval::mask(bits)
    }
}

/// Fold the operation to a tarval if the inputs allow it.
pub(crate) fn computed_value(
    g: &Graph,
    modes: &ModeRegistry,
    opcode: Opcode,
    m: Mode,
    inputs: &[Node],
    attr: &NodeAttr,
) -> Option<Tarval> {
    let bin = |f: fn(Tarval, Tarval, &ModeRegistry) -> Tarval| -> Option<Tarval> {
        let l = const_tv(g, inputs[0])?;
        let r = const_tv(g, inputs[1])?;
        Some(f(l, r, modes))
    };
    match opcode {
        Opcode::Add => bin(Tarval::add),
        Opcode::Sub => bin(Tarval::sub),
        Opcode::Mul => bin(Tarval::mul),
        Opcode::And => bin(Tarval::and),
        Opcode::Or => bin(Tarval::or),
        Opcode::Eor => bin(Tarval::xor),
        Opcode::Shl => bin(Tarval::shl),
        Opcode::Shr => bin(Tarval::shr),
        Opcode::Shrs => bin(Tarval::shrs),
        Opcode::Rotl => {
            let l = const_tv(g, inputs[0])?;
            let s = const_tv(g, inputs[1])?;
            let bits = modes.data(l.mode()).bits;
            Some(Tarval::from_bits(
                rotl_bits(l.as_u64()?, s.as_u64()? as u32, bits),
                l.mode(),
            ))
        }
        Opcode::Minus => Some(const_tv(g, inputs[0])?.neg(modes)),
        Opcode::Not => Some(const_tv(g, inputs[0])?.not(modes)),
        Opcode::Abs => {
            let v = const_tv(g, inputs[0])?;
            let neg = v.neg(modes);
            if v.compare(modes.zero(v.mode()), modes) == Relation::LESS {
                Some(neg)
            } else {
                Some(v)
            }
        }
        Opcode::Conv => Some(const_tv(g, inputs[0])?.convert_to(m, modes)),
        Opcode::Proj => {
            let pred = g.skip_id(inputs[0]);
            let num = match attr {
                NodeAttr::Proj(num) => *num,
                _ => return None,
            };
            match g.opcode(pred) {
                // The relation projection of a constant comparison.
                Opcode::Cmp => {
                    let l = const_tv(g, g.input(pred, 0))?;
                    let r = const_tv(g, g.input(pred, 1))?;
                    let outcome = l.compare(r, modes);
                    if outcome == Relation::FALSE {
                        return None;
                    }
                    let holds = Relation(num as u8).contains(outcome);
                    Some(Tarval::from_bits(holds as u64, crate::mode::B))
                }
                // The result projection of a constant division.
                Opcode::Div if num == pn::div::RES => {
                    let l = const_tv(g, g.input(pred, 1))?;
                    let r = const_tv(g, g.input(pred, 2))?;
                    let q = l.div(r, modes);
                    if q.is_constant() {
                        Some(q)
                    } else {
                        None
                    }
                }
                Opcode::Mod if num == pn::div::RES => {
                    let l = const_tv(g, g.input(pred, 1))?;
                    let r = const_tv(g, g.input(pred, 2))?;
                    let q = l.rem(r, modes);
                    if q.is_constant() {
                        Some(q)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        Opcode::Mux => {
            let sel = const_tv(g, inputs[0])?;
            let chosen = if sel.is_null() { inputs[1] } else { inputs[2] };
            const_tv(g, chosen)
        }
        _ => None,
    }
}

/// Find an existing node that already is this value.
pub(crate) fn equivalent_node(
    g: &Graph,
    modes: &ModeRegistry,
    opcode: Opcode,
    m: Mode,
    inputs: &[Node],
    attr: &NodeAttr,
) -> Option<Node> {
    let is_zero = |n: Node| const_tv(g, n).map(|tv| tv.is_null()).unwrap_or(false);
    let is_one = |n: Node| const_tv(g, n).map(|tv| tv.is_one()).unwrap_or(false);
    let is_all_one = |n: Node| {
        const_tv(g, n)
            .map(|tv| tv.is_all_one(modes))
            .unwrap_or(false)
    };
    // Unit-element rewrites only hold for wrapping arithmetic; IEEE zeros
    // and rounding spoil them for floats.
    let num = modes.is_num(m);
    match opcode {
        Opcode::Add if num => {
            if is_zero(inputs[0]) {
                return Some(inputs[1]);
            }
            if is_zero(inputs[1]) {
                return Some(inputs[0]);
            }
            None
        }
        Opcode::Sub if num && is_zero(inputs[1]) => Some(inputs[0]),
        Opcode::Mul if num => {
            if is_one(inputs[0]) {
                return Some(inputs[1]);
            }
            if is_one(inputs[1]) {
                return Some(inputs[0]);
            }
            // x * 0 is the zero constant, which already exists as an input.
            if is_zero(inputs[0]) {
                return Some(inputs[0]);
            }
            if is_zero(inputs[1]) {
                return Some(inputs[1]);
            }
            None
        }
        Opcode::And => {
            if is_all_one(inputs[0]) {
                return Some(inputs[1]);
            }
            if is_all_one(inputs[1]) {
                return Some(inputs[0]);
            }
            if is_zero(inputs[0]) {
                return Some(inputs[0]);
            }
            if is_zero(inputs[1]) {
                return Some(inputs[1]);
            }
            None
        }
        Opcode::Or | Opcode::Eor => {
            if is_zero(inputs[0]) {
                return Some(inputs[1]);
            }
            if is_zero(inputs[1]) {
                return Some(inputs[0]);
            }
            None
        }
        Opcode::Shl | Opcode::Shr | Opcode::Shrs | Opcode::Rotl if is_zero(inputs[1]) => {
            Some(inputs[0])
        }
        Opcode::Minus => {
            // -(-x) is x.
            let x = g.skip_id(inputs[0]);
            if g.opcode(x) == Opcode::Minus {
                return Some(g.input(x, 0));
            }
            None
        }
        Opcode::Not => {
            let x = g.skip_id(inputs[0]);
            if g.opcode(x) == Opcode::Not {
                return Some(g.input(x, 0));
            }
            None
        }
        Opcode::Conv => {
            let x = g.skip_id(inputs[0]);
            if g.mode(x) == m {
                return Some(x);
            }
            None
        }
        Opcode::Proj => {
            let pred = g.skip_id(inputs[0]);
            let num = match attr {
                NodeAttr::Proj(num) => *num as usize,
                _ => return None,
            };
            // Projecting a tuple element is the element.
            if g.opcode(pred) == Opcode::Tuple && num < g.arity(pred) {
                return Some(g.input(pred, num));
            }
            None
        }
        Opcode::Phi => {
            // A phi whose inputs all agree (self references aside) is that
            // one value.
            let mut unique: Option<Node> = None;
            for &p in inputs {
                let p = g.skip_id(p);
                if g.is_bad(p) {
                    continue;
                }
                match unique {
                    None => unique = Some(p),
                    Some(u) if u == p => {}
                    Some(_) => return None,
                }
            }
            unique
        }
        Opcode::Mux => {
            let (f, t) = (g.skip_id(inputs[1]), g.skip_id(inputs[2]));
            if f == t {
                return Some(f);
            }
            if let Some(sel) = const_tv(g, inputs[0]) {
                return Some(if sel.is_null() { f } else { t });
            }
            None
        }
        Opcode::Id => Some(g.skip_id(inputs[0])),
        Opcode::Sync if inputs.len() == 1 => Some(inputs[0]),
        Opcode::Tuple if inputs.len() == 0 => None,
        _ => None,
    }
}

/// Rewrite a freshly created node into a cheaper form. Returns the
/// replacement (possibly `n` unchanged); `n` stays dead on the arena when
/// replaced.
pub(crate) fn transform_node(g: &mut Graph, modes: &ModeRegistry, n: Node) -> Node {
    let opcode = g.opcode(n);
    let m = g.mode(n);
    match opcode {
        // x - x and x ^ x collapse to zero.
        Opcode::Sub | Opcode::Eor if modes.is_num(m) && g.arity(n) == 2 => {
            if g.input(n, 0) == g.input(n, 1) {
                let zero = modes.zero(m);
                return g.new_const(modes, zero);
            }
            n
        }
        _ => n,
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::opcode::Opcode;
    use crate::ir::{pn, Graph};
    use crate::mode::{self, ModeRegistry};
    use crate::tarval::{Relation, Tarval};

    fn graph() -> (ModeRegistry, Graph) {
        let modes = ModeRegistry::new();
        let g = Graph::new(&modes);
        (modes, g)
    }

    #[test]
    fn constants_fold() {
        let (modes, mut g) = graph();
        let block = g.anchors.start_block;
        let a = g.new_const(&modes, Tarval::from_i64(20, mode::IS, &modes));
        let b = g.new_const(&modes, Tarval::from_i64(22, mode::IS, &modes));
        let sum = g.new_add(&modes, block, a, b);
        assert_eq!(g.opcode(sum), Opcode::Const);
        assert_eq!(g.const_value(sum).as_i64(&modes), Some(42));
    }

    #[test]
    fn unit_elements_vanish() {
        let (modes, mut g) = graph();
        let block = g.anchors.start_block;
        let x = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let zero = g.new_const(&modes, modes.zero(mode::IS));
        let one = g.new_const(&modes, modes.one(mode::IS));
        assert_eq!(g.new_add(&modes, block, x, zero), x);
        assert_eq!(g.new_add(&modes, block, zero, x), x);
        assert_eq!(g.new_sub(&modes, block, x, zero), x);
        assert_eq!(g.new_mul(&modes, block, x, one), x);
        assert_eq!(g.new_mul(&modes, block, x, zero), zero);
        assert_eq!(g.new_shl(&modes, block, x, zero), x);
    }

    #[test]
    fn double_negation_cancels() {
        let (modes, mut g) = graph();
        let block = g.anchors.start_block;
        let x = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let neg = g.new_minus(&modes, block, x);
        assert_eq!(g.new_minus(&modes, block, neg), x);
        let not = g.new_not(&modes, block, x);
        assert_eq!(g.new_not(&modes, block, not), x);
    }

    #[test]
    fn self_subtraction_is_zero() {
        let (modes, mut g) = graph();
        let block = g.anchors.start_block;
        let x = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let d = g.new_sub(&modes, block, x, x);
        assert_eq!(g.opcode(d), Opcode::Const);
        assert!(g.const_value(d).is_null());
    }

    #[test]
    fn constant_compare_folds_through_proj() {
        let (modes, mut g) = graph();
        let block = g.anchors.start_block;
        let a = g.new_const(&modes, Tarval::from_i64(-5, mode::IS, &modes));
        let b = g.new_const(&modes, Tarval::from_i64(3, mode::IS, &modes));
        let cmp = g.new_cmp(&modes, block, a, b);
        let lt = g.new_proj(&modes, cmp, mode::B, Relation::LESS.0 as u32);
        assert_eq!(g.opcode(lt), Opcode::Const);
        assert!(g.const_value(lt).is_one());
        let gt = g.new_proj(&modes, cmp, mode::B, Relation::GREATER.0 as u32);
        assert!(g.const_value(gt).is_null());
    }

    #[test]
    fn tuple_projection_shortcuts() {
        let (modes, mut g) = graph();
        let block = g.anchors.start_block;
        let x = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let y = g.new_proj(&modes, g.anchors.args, mode::IS, 1);
        let t = g.new_tuple(&modes, block, &[x, y]);
        assert_eq!(g.new_proj(&modes, t, mode::IS, 1), y);
    }

    #[test]
    fn constant_division_folds() {
        let (modes, mut g) = graph();
        let block = g.anchors.start_block;
        let mem = g.anchors.no_mem;
        let a = g.new_const(&modes, Tarval::from_i64(42, mode::IS, &modes));
        let b = g.new_const(&modes, Tarval::from_i64(7, mode::IS, &modes));
        let div = g.new_div(&modes, block, mem, a, b);
        let res = g.new_proj(&modes, div, mode::IS, pn::div::RES);
        assert_eq!(g.opcode(res), Opcode::Const);
        assert_eq!(g.const_value(res).as_i64(&modes), Some(6));
        // Division by zero keeps the operation; nothing folds.
        let zero = g.new_const(&modes, modes.zero(mode::IS));
        let div0 = g.new_div(&modes, block, mem, a, zero);
        let res0 = g.new_proj(&modes, div0, mode::IS, pn::div::RES);
        assert_eq!(g.opcode(res0), Opcode::Proj);
    }
}
