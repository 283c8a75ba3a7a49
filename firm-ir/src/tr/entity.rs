//! Entities: named slots inside types.

use crate::ident::Ident;
use crate::ir::Irg;
use crate::tarval::Tarval;
use crate::tr::Type;
use core::fmt;
use firm_arena::PackedOption;

/// Who may see and bind this entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Visible only inside this compilation unit.
    Local,
    /// Defined here, visible outside.
    ExternalVisible,
    /// Defined (allocated) outside; no body/initializer here.
    ExternalAllocated,
}

/// How real this entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peculiarity {
    /// An ordinary entity with storage or a body.
    Existent,
    /// A pure declaration (abstract method); never has a body.
    Description,
    /// Inherited without an own definition.
    Inherited,
}

/// Volatility of accesses through this entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    /// Accesses may be reordered and folded.
    NonVolatile,
    /// Every access is observable.
    Volatile,
}

/// How a pointer parameter is used inside a method.
///
/// A bit set of `READ`, `WRITE` (the pointed-to storage is written through
/// the pointer) and `STORE` (the pointer value itself is stored somewhere).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PtrAccess(pub u8);

impl PtrAccess {
    /// No access.
    pub const NONE: PtrAccess = PtrAccess(0);
    /// The pointed-to storage is read.
    pub const READ: PtrAccess = PtrAccess(1);
    /// The pointed-to storage is written.
    pub const WRITE: PtrAccess = PtrAccess(2);
    /// The pointer escapes into memory.
    pub const STORE: PtrAccess = PtrAccess(4);
    /// Everything at once (the conservative answer).
    pub const ALL: PtrAccess = PtrAccess(7);

    /// Set union.
    pub fn union(self, other: PtrAccess) -> PtrAccess {
        PtrAccess(self.0 | other.0)
    }

    /// Does this access include all bits of `other`?
    pub fn contains(self, other: PtrAccess) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Debug for PtrAccess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "none");
        }
        let mut sep = "";
        for (bit, name) in &[(1u8, "read"), (2, "write"), (4, "store")] {
            if self.0 & bit != 0 {
                write!(f, "{}{}", sep, name)?;
                sep = "|";
            }
        }
        Ok(())
    }
}

/// An entity initializer.
#[derive(Debug, Clone)]
pub enum Initializer {
    /// A single atomic value.
    Atomic(Tarval),
    /// A compound of sub-initializers, positionally matching the members.
    Compound(Vec<Initializer>),
    /// Zero-initialized storage.
    Null,
}

/// An entity record.
#[derive(Debug, Clone)]
pub struct EntityData {
    /// Source-level name.
    pub name: Ident,
    /// Linker-level name; defaults to `name`.
    pub ld_name: PackedOption<Ident>,
    /// The type this entity is a member of.
    pub owner: PackedOption<Type>,
    /// The entity's own type.
    pub ty: Type,
    /// Visibility.
    pub visibility: Visibility,
    /// Peculiarity.
    pub peculiarity: Peculiarity,
    /// Volatility.
    pub volatility: Volatility,
    /// Initial value, if any.
    pub initializer: Option<Initializer>,
    /// Byte offset inside the owner; -1 while layout is undefined.
    pub offset: i32,
    /// The IR graph of a method entity.
    pub graph: PackedOption<Irg>,
    /// Supertype methods this entity overwrites.
    pub overwrites: Vec<Entity>,
    /// Subtype methods overwriting this entity.
    pub overwritten_by: Vec<Entity>,
    /// Per-parameter pointer access, computed by argument analysis.
    pub param_access: Option<Vec<PtrAccess>>,
    /// Per-parameter optimization weights, computed by argument analysis.
    pub param_weights: Option<Vec<u32>>,
}

use crate::tr::Entity;

impl EntityData {
    /// A fresh local, existent, non-volatile entity.
    pub fn new(name: Ident, owner: Type, ty: Type) -> Self {
        Self {
            name,
            ld_name: None.into(),
            owner: Some(owner).into(),
            ty,
            visibility: Visibility::Local,
            peculiarity: Peculiarity::Existent,
            volatility: Volatility::NonVolatile,
            initializer: None,
            offset: -1,
            graph: None.into(),
            overwrites: Vec::new(),
            overwritten_by: Vec::new(),
            param_access: None,
            param_weights: None,
        }
    }

    /// The linker name, falling back to the source name.
    pub fn ld_ident(&self) -> Ident {
        self.ld_name.expand().unwrap_or(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_access_bits() {
        let rw = PtrAccess::READ.union(PtrAccess::WRITE);
        assert!(rw.contains(PtrAccess::READ));
        assert!(rw.contains(PtrAccess::WRITE));
        assert!(!rw.contains(PtrAccess::STORE));
        assert!(PtrAccess::ALL.contains(rw));
        assert_eq!(format!("{:?}", rw), "read|write");
        assert_eq!(format!("{:?}", PtrAccess::NONE), "none");
    }
}
