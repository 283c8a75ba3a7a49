//! The node and graph model.

mod cse;
mod graph;
mod node;
mod opcode;
mod opt;
pub mod verify;
pub mod walk;

pub use self::graph::{pn, Anchors, Graph, InfoState};
pub use self::node::{
    AllocAttr, AllocKind, BackedgeBits, BlockAttr, CallAttr, CalleeSet, NodeAttr, NodeData,
    SymConstKind,
};
pub use self::opcode::{
    Arity, OpFlags, OpInfo, OpPin, OpRegistry, Opcode, UserOp, UserOpBehavior,
};

use firm_arena::idx_impl;

/// A node handle, valid within its graph.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
idx_impl!(Node, "n");

/// A graph handle, valid within its program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Irg(u32);
idx_impl!(Irg, "irg");
