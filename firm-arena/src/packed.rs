//! Compact optional index keys.
//!
//! Index newtypes reserve `u32::MAX`, so an optional key fits in the same
//! four bytes as the key itself. Node records are full of optional
//! references (the block of a Block node, the idom of an unreachable block)
//! and the savings add up.

use core::fmt;
use core::mem;
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Types with a reserved value that can never be created through the normal
/// constructors, usable as a `None` encoding.
pub trait ReservedValue {
    /// Create the reserved value.
    fn reserved_value() -> Self;

    /// Check whether `self` is the reserved value.
    fn is_reserved_value(&self) -> bool;
}

/// An `Option<T>` stored in the space of a bare `T`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct PackedOption<T: ReservedValue>(T);

impl<T: ReservedValue> PackedOption<T> {
    /// Returns `true` if the packed option is a `None` value.
    pub fn is_none(&self) -> bool {
        self.0.is_reserved_value()
    }

    /// Returns `true` if the packed option is a `Some` value.
    pub fn is_some(&self) -> bool {
        !self.0.is_reserved_value()
    }

    /// Expand the packed option into a normal `Option`.
    pub fn expand(self) -> Option<T> {
        if self.is_none() {
            None
        } else {
            Some(self.0)
        }
    }

    /// Unwrap a value or panic.
    pub fn unwrap(self) -> T {
        self.expand().unwrap()
    }

    /// Unwrap a value or panic with the given message.
    pub fn expect(self, msg: &str) -> T {
        self.expand().expect(msg)
    }

    /// Takes the value out of the packed option, leaving `None` in its place.
    pub fn take(&mut self) -> Option<T> {
        mem::replace(self, None.into()).expand()
    }
}

impl<T: ReservedValue> Default for PackedOption<T> {
    fn default() -> Self {
        Self(T::reserved_value())
    }
}

impl<T: ReservedValue> From<T> for PackedOption<T> {
    fn from(t: T) -> Self {
        debug_assert!(
            !t.is_reserved_value(),
            "the reserved value is not a legal key"
        );
        Self(t)
    }
}

impl<T: ReservedValue> From<Option<T>> for PackedOption<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            None => Self(T::reserved_value()),
            Some(t) => t.into(),
        }
    }
}

impl<T: ReservedValue> From<PackedOption<T>> for Option<T> {
    fn from(opt: PackedOption<T>) -> Self {
        opt.expand()
    }
}

impl<T> fmt::Debug for PackedOption<T>
where
    T: ReservedValue + fmt::Debug + Copy,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.expand() {
            None => write!(f, "None"),
            Some(t) => write!(f, "Some({:?})", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{idx_impl, Idx};

    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct K(u32);
    idx_impl!(K, "k");

    #[test]
    fn roundtrip() {
        let none: PackedOption<K> = None.into();
        assert!(none.is_none());
        assert_eq!(none.expand(), None);

        let some: PackedOption<K> = K::new(3).into();
        assert!(some.is_some());
        assert_eq!(some.expand(), Some(K::new(3)));
    }

    #[test]
    fn take_leaves_none() {
        let mut o: PackedOption<K> = K::new(1).into();
        assert_eq!(o.take(), Some(K::new(1)));
        assert!(o.is_none());
        assert_eq!(o.take(), None);
    }
}
