//! Arena maps: key-minting primary storage and dense side tables.

use crate::Idx;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};
use core::slice;
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// The arena proper: a mapping `K -> V` that also allocates the keys.
///
/// `push` mints the next dense key. Keys are never reused; logical deletion
/// is up to the caller (IR nodes are exchanged, not freed).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct PrimaryMap<K, V>
where
    K: Idx,
{
    elems: Vec<V>,
    unused: PhantomData<K>,
}

impl<K, V> PrimaryMap<K, V>
where
    K: Idx,
{
    /// Create a new empty map.
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            unused: PhantomData,
        }
    }

    /// Create a new empty map with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elems: Vec::with_capacity(capacity),
            unused: PhantomData,
        }
    }

    /// Check if `k` was minted by this map.
    pub fn is_valid(&self, k: K) -> bool {
        k.index() < self.elems.len()
    }

    /// Get the element at `k` if it exists.
    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    /// Get the element at `k` if it exists, mutable edition.
    pub fn get_mut(&mut self, k: K) -> Option<&mut V> {
        self.elems.get_mut(k.index())
    }

    /// Is this map completely empty?
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Get the total number of keys minted.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Iterate over all the keys in this map.
    pub fn keys(&self) -> Keys<K> {
        Keys::with_len(self.elems.len())
    }

    /// Iterate over all the values in this map.
    pub fn values(&self) -> slice::Iter<V> {
        self.elems.iter()
    }

    /// Iterate over all the values in this map, mutable edition.
    pub fn values_mut(&mut self) -> slice::IterMut<V> {
        self.elems.iter_mut()
    }

    /// Iterate over all the keys and values in this map.
    pub fn iter(&self) -> Iter<K, V> {
        Iter::new(self.elems.iter())
    }

    /// Iterate over all the keys and values in this map, mutable edition.
    pub fn iter_mut(&mut self) -> IterMut<K, V> {
        IterMut::new(self.elems.iter_mut())
    }

    /// Remove all entries from this map.
    pub fn clear(&mut self) {
        self.elems.clear()
    }

    /// Get the key that will be assigned to the next pushed value.
    pub fn next_key(&self) -> K {
        K::new(self.elems.len())
    }

    /// Append `v` to the mapping, assigning a new key which is returned.
    pub fn push(&mut self, v: V) -> K {
        let k = self.next_key();
        self.elems.push(v);
        k
    }
}

/// Immutable indexing into a `PrimaryMap`. The key must have been minted by
/// this map.
impl<K, V> Index<K> for PrimaryMap<K, V>
where
    K: Idx,
{
    type Output = V;

    fn index(&self, k: K) -> &V {
        &self.elems[k.index()]
    }
}

/// Mutable indexing into a `PrimaryMap`.
impl<K, V> IndexMut<K> for PrimaryMap<K, V>
where
    K: Idx,
{
    fn index_mut(&mut self, k: K) -> &mut V {
        &mut self.elems[k.index()]
    }
}

/// A dense side table `K -> V` for keys minted by some `PrimaryMap`.
///
/// The table behaves as if every key had an entry holding the default value
/// from the beginning; it grows on demand under mutable indexing. This is
/// the home for pass-local annotations that the C tradition would have
/// stored in a shared per-node scratch field.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SecondaryMap<K, V>
where
    K: Idx,
    V: Clone,
{
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K, V> SecondaryMap<K, V>
where
    K: Idx,
    V: Clone,
{
    /// Create a new empty map.
    pub fn new() -> Self
    where
        V: Default,
    {
        Self {
            elems: Vec::new(),
            default: Default::default(),
            unused: PhantomData,
        }
    }

    /// Create a new empty map with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self
    where
        V: Default,
    {
        Self {
            elems: Vec::with_capacity(capacity),
            default: Default::default(),
            unused: PhantomData,
        }
    }

    /// Create a new empty map with an explicit default value.
    pub fn with_default(default: V) -> Self {
        Self {
            elems: Vec::new(),
            default,
            unused: PhantomData,
        }
    }

    /// Get the element at `k` if it has been touched.
    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    /// Number of elements in the underlying vector. Not necessarily the
    /// length of the corresponding `PrimaryMap`.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Is this map completely empty?
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Remove all entries from this map.
    pub fn clear(&mut self) {
        self.elems.clear()
    }

    /// Iterate over all the keys and values in this map.
    pub fn iter(&self) -> Iter<K, V> {
        Iter::new(self.elems.iter())
    }

    /// Iterate over all the keys and values in this map, mutable edition.
    pub fn iter_mut(&mut self) -> IterMut<K, V> {
        IterMut::new(self.elems.iter_mut())
    }

    /// Iterate over all the keys in this map.
    pub fn keys(&self) -> Keys<K> {
        Keys::with_len(self.elems.len())
    }

    /// Resize the map to have `n` entries, filling with the default.
    pub fn resize(&mut self, n: usize) {
        let default = self.default.clone();
        self.elems.resize(n, default);
    }
}

/// Immutable indexing into a `SecondaryMap`. All keys are permitted;
/// untouched entries read as the default value.
impl<K, V> Index<K> for SecondaryMap<K, V>
where
    K: Idx,
    V: Clone,
{
    type Output = V;

    fn index(&self, k: K) -> &V {
        self.elems.get(k.index()).unwrap_or(&self.default)
    }
}

/// Mutable indexing into a `SecondaryMap`. The map grows as needed.
impl<K, V> IndexMut<K> for SecondaryMap<K, V>
where
    K: Idx,
    V: Clone,
{
    fn index_mut(&mut self, k: K) -> &mut V {
        let i = k.index();
        if i >= self.elems.len() {
            self.resize(i + 1);
        }
        &mut self.elems[i]
    }
}

/// Iterator over the keys of a map, in index order.
pub struct Keys<K: Idx> {
    pos: usize,
    len: usize,
    unused: PhantomData<K>,
}

impl<K: Idx> Keys<K> {
    /// Keys for a map with `len` entries.
    pub fn with_len(len: usize) -> Self {
        Self {
            pos: 0,
            len,
            unused: PhantomData,
        }
    }
}

impl<K: Idx> Iterator for Keys<K> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        if self.pos < self.len {
            let k = K::new(self.pos);
            self.pos += 1;
            Some(k)
        } else {
            None
        }
    }
}

/// Iterator over `(key, &value)` pairs, in key order.
pub struct Iter<'a, K: Idx, V> {
    inner: core::iter::Enumerate<slice::Iter<'a, V>>,
    unused: PhantomData<K>,
}

impl<'a, K: Idx, V> Iter<'a, K, V> {
    fn new(inner: slice::Iter<'a, V>) -> Self {
        Self {
            inner: inner.enumerate(),
            unused: PhantomData,
        }
    }
}

impl<'a, K: Idx, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(i, v)| (K::new(i), v))
    }
}

/// Iterator over `(key, &mut value)` pairs, in key order.
pub struct IterMut<'a, K: Idx, V> {
    inner: core::iter::Enumerate<slice::IterMut<'a, V>>,
    unused: PhantomData<K>,
}

impl<'a, K: Idx, V> IterMut<'a, K, V> {
    fn new(inner: slice::IterMut<'a, V>) -> Self {
        Self {
            inner: inner.enumerate(),
            unused: PhantomData,
        }
    }
}

impl<'a, K: Idx, V> Iterator for IterMut<'a, K, V> {
    type Item = (K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(i, v)| (K::new(i), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idx_impl;

    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct E(u32);
    idx_impl!(E, "e");

    #[test]
    fn primary_push_and_index() {
        let mut m: PrimaryMap<E, usize> = PrimaryMap::new();
        let e0 = m.push(12);
        let e1 = m.push(33);
        assert_eq!(m[e0], 12);
        assert_eq!(m[e1], 33);
        assert_eq!(m.len(), 2);
        assert!(m.is_valid(e1));
        assert!(!m.is_valid(E::new(2)));
        let keys: Vec<E> = m.keys().collect();
        assert_eq!(keys, [e0, e1]);
    }

    #[test]
    fn secondary_defaults_and_growth() {
        let mut m: SecondaryMap<E, i32> = SecondaryMap::new();
        let e0 = E::new(0);
        let e5 = E::new(5);
        assert_eq!(m[e5], 0);
        m[e5] = 7;
        assert_eq!(m[e5], 7);
        assert_eq!(m[e0], 0);
        assert_eq!(m.len(), 6);
    }

    #[test]
    fn secondary_explicit_default() {
        let mut m: SecondaryMap<E, u32> = SecondaryMap::with_default(u32::max_value());
        assert_eq!(m[E::new(3)], u32::max_value());
        m[E::new(1)] = 4;
        assert_eq!(m[E::new(1)], 4);
        assert_eq!(m[E::new(2)], u32::max_value());
    }
}
