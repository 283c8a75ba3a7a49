//! Front-end variable slots.

use firm_arena::idx_impl;

/// A front-end variable, addressed by a stable small integer.
///
/// Variables are per-procedure; the builder maps each (block, variable)
/// pair to its current defining node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(u32);
idx_impl!(Variable, "var");

impl Variable {
    /// Shorthand for slot `n`.
    pub fn with_index(n: usize) -> Self {
        use firm_arena::Idx;
        Variable::new(n)
    }
}
