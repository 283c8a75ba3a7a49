//! HashMap/HashSet aliases using the fast, non-cryptographic FxHash hasher.
//!
//! Value numbering and the various analysis side tables hash small keys at
//! high rates; SipHash's DoS resistance buys nothing for compiler-internal
//! tables keyed by node ids.

pub use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
