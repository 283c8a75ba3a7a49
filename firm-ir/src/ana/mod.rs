//! Analyses over graphs and over the whole program.
//!
//! Every analysis is a value computed from a graph, stamped with the
//! graph's structural version. `is_consistent` compares the stamp; a
//! stale analysis is simply recomputed. This is the explicit rendition of
//! the `none | consistent | inconsistent` protocol: absent, stamped equal,
//! stamped older.

pub mod cdep;
pub mod cfg;
pub mod cgana;
pub mod domtree;
pub mod execfreq;
pub mod irg_args;
pub mod loops;
pub mod scc;
#[cfg(test)]
pub mod testutil;
pub mod typeinfo;
