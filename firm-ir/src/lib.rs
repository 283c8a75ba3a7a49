//! A graph-based SSA compiler middle-end and back-end core.
//!
//! A program is a set of per-procedure graphs over a shared universe of
//! types and entities. Each graph holds SSA nodes in an arena; nodes are
//! folded, simplified and value-numbered as they are constructed. On top
//! of the graphs sit the analyses (dominance, loop trees, control
//! dependence, the interprocedural call graph) and the chordal register
//! allocator (liveness, Belady spilling, coloring, copy minimisation, SSA
//! destruction, scheduling).
//!
//! The layering is strict: `ident`/`mode`/`tarval` know nothing of nodes,
//! the `tr` universe knows nothing of graphs, `ir` knows nothing of the
//! analyses, and `ana` knows nothing of the backend. Construction
//! ergonomics (variable slots, lazy phi placement) live in the separate
//! `firm-frontend` crate.

#![warn(missing_docs)]

pub mod ana;
pub mod be;
pub mod errors;
pub mod fx;
pub mod ident;
pub mod ir;
pub mod lower;
pub mod mode;
pub mod program;
pub mod tarval;
pub mod timing;
pub mod tr;

pub use crate::errors::{CodegenError, CodegenResult, VerifierErrors, VerifyLevel};
pub use crate::program::Program;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
