//! Incremental SSA construction.
//!
//! Front-ends address local variables by small integer slots and think in
//! terms of assignments; the IR wants one definition per value and phis at
//! the joins. The [`GraphBuilder`] bridges the two on the fly: it tracks
//! the current definition of every variable per block, places phis lazily
//! when a read crosses a join, keeps placeholder phis for blocks whose
//! predecessor lists are still open, and folds every phi that turns out
//! trivial, including the ones that only become trivial because another
//! one was folded. The result is minimal, pruned SSA without a separate
//! conversion pass.
//!
//! The protocol:
//!
//! 1. create blocks with [`GraphBuilder::new_block`], wire control flow
//!    with [`GraphBuilder::add_in_edge`];
//! 2. write variables with [`GraphBuilder::set_value`], read them with
//!    [`GraphBuilder::get_value`];
//! 3. call [`GraphBuilder::mature_block`] as soon as a block has all its
//!    predecessors; earlier is better, fewer placeholders;
//! 4. finish with [`GraphBuilder::finalize`], which matures everything
//!    still open and seals the graph.

#![warn(missing_docs)]

mod frontend;
mod variable;

pub use crate::frontend::GraphBuilder;
pub use crate::variable::Variable;
