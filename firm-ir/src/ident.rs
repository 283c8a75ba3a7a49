//! Interned identifiers.
//!
//! All names in the program (entities, types, linker symbols) are interned
//! once and referred to by a 32-bit [`Ident`] handle. Equal strings yield
//! the identical handle, so identifier equality is an integer compare, and
//! the handle stays valid for the lifetime of the interner.

use crate::fx::FxHashMap;
use firm_arena::{idx_impl, Idx, PrimaryMap};

/// An interned identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(u32);
idx_impl!(Ident, "id");

/// The string interner. One per program.
pub struct Interner {
    strings: PrimaryMap<Ident, Box<str>>,
    lookup: FxHashMap<Box<str>, Ident>,
    unique_counter: u32,
}

impl Interner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self {
            strings: PrimaryMap::new(),
            lookup: FxHashMap::default(),
            unique_counter: 0,
        }
    }

    /// Intern `s`, returning its unique handle.
    pub fn intern(&mut self, s: &str) -> Ident {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = self.strings.push(s.into());
        self.lookup.insert(s.into(), id);
        id
    }

    /// Get the string an identifier stands for.
    pub fn resolve(&self, id: Ident) -> &str {
        &self.strings[id]
    }

    /// Length in bytes of the interned string.
    pub fn len(&self, id: Ident) -> usize {
        self.strings[id].len()
    }

    /// Does the identifier start with `prefix`?
    pub fn starts_with(&self, id: Ident, prefix: &str) -> bool {
        self.resolve(id).starts_with(prefix)
    }

    /// Does the identifier end with `suffix`?
    pub fn ends_with(&self, id: Ident, suffix: &str) -> bool {
        self.resolve(id).ends_with(suffix)
    }

    /// Does the identifier contain `needle`?
    pub fn contains(&self, id: Ident, needle: &str) -> bool {
        self.resolve(id).contains(needle)
    }

    /// Create a fresh identifier from a template.
    ///
    /// Every `%u` in `template` is replaced by the current value of a
    /// process-unique counter, which is then advanced; the result is
    /// interned. `unique("L%u")` yields `L0`, `L1`, ...
    pub fn unique(&mut self, template: &str) -> Ident {
        let n = self.unique_counter;
        self.unique_counter += 1;
        let s = template.replace("%u", &n.to_string());
        self.intern(&s)
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_one_handle() {
        let mut i = Interner::new();
        let a = i.intern("main");
        let b = i.intern("main");
        let c = i.intern("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(i.resolve(a), "main");
        assert_eq!(i.len(c), 5);
    }

    #[test]
    fn predicates() {
        let mut i = Interner::new();
        let id = i.intern("_Z4mainv");
        assert!(i.starts_with(id, "_Z"));
        assert!(i.ends_with(id, "v"));
        assert!(i.contains(id, "main"));
        assert!(!i.contains(id, "zz"));
    }

    #[test]
    fn unique_advances() {
        let mut i = Interner::new();
        let a = i.unique("blk_%u");
        let b = i.unique("blk_%u");
        assert_ne!(a, b);
        assert_eq!(i.resolve(a), "blk_0");
        assert_eq!(i.resolve(b), "blk_1");
    }
}
