//! Value numbering: structural node identification.
//!
//! Two nodes are the same value iff they have the same opcode, mode and
//! positionally identical inputs, their attributes compare equal, and, for
//! pinned opcodes, they sit in the same block. Commutative operands are
//! normalised at construction, so operand order never hides a match. The
//! graph keeps a hash table over this shape; `identify` returns the
//! existing node for a duplicate and leaves the duplicate dead on the
//! arena.

use crate::ir::node::NodeAttr;
use crate::ir::opcode::{OpPin, Opcode};
use crate::ir::{Graph, Node};
use core::hash::{Hash, Hasher};
use firm_arena::Idx;

fn attr_hash<H: Hasher>(attr: &NodeAttr, h: &mut H) {
    match attr {
        NodeAttr::None => 0u8.hash(h),
        NodeAttr::Block(_) => 1u8.hash(h),
        NodeAttr::Const(tv) => {
            2u8.hash(h);
            tv.hash(h);
        }
        NodeAttr::SymConst(kind) => {
            3u8.hash(h);
            kind.hash(h);
        }
        NodeAttr::Sel(e) => {
            4u8.hash(h);
            e.hash(h);
        }
        NodeAttr::Call(call) => {
            5u8.hash(h);
            call.ty.hash(h);
        }
        NodeAttr::Proj(num) => {
            6u8.hash(h);
            num.hash(h);
        }
        NodeAttr::Load(m) => {
            7u8.hash(h);
            m.hash(h);
        }
        NodeAttr::Alloc(a) => {
            8u8.hash(h);
            a.ty.hash(h);
        }
        NodeAttr::Free(t) => {
            9u8.hash(h);
            t.hash(h);
        }
        NodeAttr::CopyB(t) => {
            10u8.hash(h);
            t.hash(h);
        }
        NodeAttr::SpillSlot(_) => 11u8.hash(h),
        NodeAttr::User { op, data } => {
            12u8.hash(h);
            op.hash(h);
            data.hash(h);
        }
    }
}

fn shape_hash(g: &Graph, n: Node) -> u64 {
    let mut h = crate::fx::FxHasher::default();
    let data = &g.nodes[n];
    core::mem::discriminant(&data.opcode).hash(&mut h);
    if let Opcode::User(u) = data.opcode {
        u.hash(&mut h);
    }
    data.mode.index().hash(&mut h);
    if pin_matters(g, n) {
        data.block.expand().map(|b| b.index()).hash(&mut h);
    }
    for input in data.inputs.iter(&g.pool) {
        input.index().hash(&mut h);
    }
    attr_hash(&data.attr, &mut h);
    h.finish()
}

fn pin_matters(g: &Graph, n: Node) -> bool {
    match g.nodes[n].opcode {
        Opcode::User(_) => true,
        op => op.builtin_info().pin == OpPin::Pinned,
    }
}

fn shape_equal(g: &Graph, a: Node, b: Node) -> bool {
    let (da, db) = (&g.nodes[a], &g.nodes[b]);
    if da.opcode != db.opcode || da.mode != db.mode {
        return false;
    }
    if pin_matters(g, a) && da.block != db.block {
        return false;
    }
    if da.inputs.len(&g.pool) != db.inputs.len(&g.pool) {
        return false;
    }
    let eq_inputs = da
        .inputs
        .iter(&g.pool)
        .zip(db.inputs.iter(&g.pool))
        .all(|(x, y)| x == y);
    eq_inputs && da.attr == db.attr
}

/// Does this opcode take part in value numbering at all?
fn identifiable(op: Opcode) -> bool {
    match op {
        // Every block is its own identity, and the dynamic-arity
        // bookkeeping nodes grow after creation.
        Opcode::Block | Opcode::End | Opcode::Keep => false,
        // Backend ops are placed deliberately; merging them would undo
        // spilling decisions.
        Opcode::Spill | Opcode::Reload | Opcode::Perm | Opcode::Copy => false,
        _ => true,
    }
}

/// Look `n` up in the graph's value-numbering table. Returns the previously
/// known node with the same shape, or remembers and returns `n`.
pub fn identify(g: &mut Graph, n: Node) -> Node {
    if !identifiable(g.nodes[n].opcode) {
        return n;
    }
    let hash = shape_hash(g, n);
    if let Some(bucket) = g.cse.get(&hash) {
        for &candidate in bucket {
            if candidate != n && shape_equal(g, candidate, n) {
                return candidate;
            }
        }
    }
    g.cse.entry(hash).or_default().push(n);
    n
}

#[cfg(test)]
mod tests {
    use crate::ir::Graph;
    use crate::mode::{self, ModeRegistry};
    use crate::tarval::Tarval;

    #[test]
    fn equal_constants_are_one_node() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let a = g.new_const(&modes, Tarval::from_i64(42, mode::IS, &modes));
        let b = g.new_const(&modes, Tarval::from_i64(42, mode::IS, &modes));
        let c = g.new_const(&modes, Tarval::from_i64(42, mode::LS, &modes));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn commutative_operands_share_a_node() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let x = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let y = g.new_proj(&modes, g.anchors.args, mode::IS, 1);
        let xy = g.new_add(&modes, block, x, y);
        let yx = g.new_add(&modes, block, y, x);
        assert_eq!(xy, yx);
        // Subtraction does not commute.
        let s1 = g.new_sub(&modes, block, x, y);
        let s2 = g.new_sub(&modes, block, y, x);
        assert_ne!(s1, s2);
    }

    #[test]
    fn projections_number_apart() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let p0 = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let p0_again = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let p1 = g.new_proj(&modes, g.anchors.args, mode::IS, 1);
        assert_eq!(p0, p0_again);
        assert_ne!(p0, p1);
    }
}
