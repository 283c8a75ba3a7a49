//! Node records and their attribute payloads.

use crate::ident::Ident;
use crate::ir::opcode::{Opcode, UserOp};
use crate::mode::Mode;
use crate::tarval::Tarval;
use crate::tr::{Entity, Type};
use firm_arena::{IdxList, PackedOption};
use smallvec::SmallVec;

use crate::ir::Node;

/// Attribute of a `Block` node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockAttr {
    /// Whether the predecessor list is final.
    pub matured: bool,
}

/// What a `SymConst` stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymConstKind {
    /// The address of a linker symbol.
    Addr(Ident),
    /// The run-time tag of a type.
    TypeTag(Type),
    /// The size of a type, in bytes.
    Size(Type),
    /// The alignment of a type, in bytes.
    Align(Type),
    /// An enumeration constant.
    Enum(Type, u32),
}

/// Where an `Alloc` takes its storage from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// The current stack frame.
    Stack,
    /// The heap.
    Heap,
}

/// The set of methods a `Call` may invoke, as computed by callee analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalleeSet {
    /// Known internal implementations.
    pub entities: SmallVec<[Entity; 4]>,
    /// Whether an unknown external method may be called as well.
    pub includes_unknown: bool,
}

impl CalleeSet {
    /// No callable method at all: the call is unreachable.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && !self.includes_unknown
    }
}

/// Attribute of a `Call` node.
#[derive(Debug, Clone, PartialEq)]
pub struct CallAttr {
    /// The method type of the called signature.
    pub ty: Type,
    /// Callee analysis result, when computed.
    pub callees: Option<CalleeSet>,
}

/// Attribute of an `Alloc` node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocAttr {
    /// Type of the allocated object.
    pub ty: Type,
    /// Stack or heap.
    pub kind: AllocKind,
}

/// Per-opcode attribute payload.
///
/// Built-in opcodes get a typed variant; user opcodes carry an opaque blob
/// interpreted by their registered behaviour.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAttr {
    /// No attribute.
    None,
    /// `Block` payload.
    Block(BlockAttr),
    /// `Const` payload.
    Const(Tarval),
    /// `SymConst` payload.
    SymConst(SymConstKind),
    /// `Sel` payload: the selected member.
    Sel(Entity),
    /// `Call` payload.
    Call(CallAttr),
    /// `Proj` payload: the projection number.
    Proj(u32),
    /// `Load` payload: the loaded mode.
    Load(Mode),
    /// `Alloc` payload.
    Alloc(AllocAttr),
    /// `Free` payload: type of the released object.
    Free(Type),
    /// `CopyB` payload: type of the copied compound.
    CopyB(Type),
    /// `Spill`/`Reload` payload: the assigned frame slot, once known.
    SpillSlot(PackedOption<Entity>),
    /// User opcode payload.
    User {
        /// The registered opcode.
        op: UserOp,
        /// Opaque attribute bytes, copied verbatim and compared bytewise.
        data: Box<[u8]>,
    },
}

/// Back-edge markers, one bit per input.
///
/// Loop construction marks the loop-carried inputs of headers and their
/// phis here; everything else leaves the bits clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackedgeBits(SmallVec<[u64; 1]>);

impl BackedgeBits {
    /// Clear all bits.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Mark input `i` as a back-edge.
    pub fn set(&mut self, i: usize) {
        let word = i / 64;
        if word >= self.0.len() {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << (i % 64);
    }

    /// Is input `i` marked as a back-edge?
    pub fn get(&self, i: usize) -> bool {
        self.0
            .get(i / 64)
            .map(|w| (w >> (i % 64)) & 1 != 0)
            .unwrap_or(false)
    }

    /// Is any input marked?
    pub fn any(&self) -> bool {
        self.0.iter().any(|&w| w != 0)
    }
}

/// One node record.
///
/// The uniform shape of the C model: opcode, mode, the block the node sits
/// in (the "input at index −1"; absent exactly for Block nodes), the proper
/// inputs, the attribute payload, and the back-edge bits. Analysis scratch
/// (visited marks, link values) deliberately lives in side tables, not
/// here.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// The operation.
    pub opcode: Opcode,
    /// The produced value's mode.
    pub mode: Mode,
    /// The containing block; `None` only for `Block` nodes.
    pub block: PackedOption<Node>,
    /// The inputs, allocated in the graph's list pool.
    pub inputs: IdxList<Node>,
    /// The attribute payload.
    pub attr: NodeAttr,
    /// Back-edge markers for the inputs.
    pub backedges: BackedgeBits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backedge_bits_grow() {
        let mut bits = BackedgeBits::default();
        assert!(!bits.get(0));
        assert!(!bits.any());
        bits.set(1);
        bits.set(70);
        assert!(bits.get(1));
        assert!(bits.get(70));
        assert!(!bits.get(0));
        assert!(bits.any());
        bits.clear();
        assert!(!bits.any());
    }
}
