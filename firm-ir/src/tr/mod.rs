//! The type and entity universe.
//!
//! Types and entities are program-wide: they are created once, live in the
//! [`TypeUniverse`] arena for the whole compilation, and are shared by all
//! graphs. A type describes a value layout (primitive, pointer, array,
//! method, struct, class, union, enumeration); an entity is a named slot
//! inside an owner type (a field, a method, a global).
//!
//! Class types additionally span a supertype graph, and method entities a
//! pairwise `overwrites` relation; together they answer the devirtualization
//! query: which implementation does dynamic type `C` use for method `m`?

mod entity;

pub use self::entity::{
    EntityData, Initializer, Peculiarity, PtrAccess, Visibility, Volatility,
};

use crate::ident::Ident;
use crate::ir::Irg;
use crate::mode::{self, Mode, ModeRegistry};
use firm_arena::{idx_impl, Idx, PackedOption, PrimaryMap};

/// A type handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(u32);
idx_impl!(Type, "type");

/// An entity handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(u32);
idx_impl!(Entity, "ent");

/// Layout state of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeState {
    /// Size, alignment and member offsets have not been assigned yet.
    Undefined,
    /// Layout is final; structural changes are rejected.
    Fixed,
}

/// Variadicity of a method type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variadicity {
    /// Fixed parameter list.
    NonVariadic,
    /// Trailing variable arguments.
    Variadic,
}

/// Calling convention of a method type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallConv {
    /// The platform's default C convention.
    Cdecl,
    /// Callee pops the arguments.
    Stdcall,
    /// Register convention for internal calls.
    Register,
}

/// Per-kind classification used by generic type handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeKindInfo {
    /// Printable kind name.
    pub name: &'static str,
    /// Kind owns an ordered member list (struct, union, class).
    pub is_compound: bool,
    /// Values of this kind fit in a register mode.
    pub is_atomic: bool,
}

/// Payload of a method type.
#[derive(Debug, Clone)]
pub struct MethodSignature {
    /// Parameter types, in order.
    pub params: Vec<Type>,
    /// Result types, in order.
    pub results: Vec<Type>,
    /// Fixed or variadic parameter list.
    pub variadicity: Variadicity,
    /// Index of the first variadic parameter, if variadic.
    pub first_variadic: Option<usize>,
    /// Calling convention.
    pub calling_convention: CallConv,
}

/// The kind-specific part of a type.
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// An atomic value of some mode.
    Primitive,
    /// A pointer.
    Pointer {
        /// The pointed-to type.
        points_to: Type,
    },
    /// An array.
    Array {
        /// Element type.
        element: Type,
        /// Number of elements; `None` for unknown bounds.
        n_elems: Option<u32>,
        /// The entity describing one element (for address computations).
        element_entity: PackedOption<Entity>,
    },
    /// A method signature.
    Method(MethodSignature),
    /// A struct with ordered members.
    Struct {
        /// Member entities in declaration order.
        members: Vec<Entity>,
    },
    /// A union with ordered members.
    Union {
        /// Member entities in declaration order.
        members: Vec<Entity>,
    },
    /// A class: a struct plus inheritance.
    Class {
        /// Member entities in declaration order.
        members: Vec<Entity>,
        /// Direct supertypes.
        supertypes: Vec<Type>,
        /// Direct subtypes.
        subtypes: Vec<Type>,
    },
    /// An enumeration of named constants.
    Enumeration {
        /// The items: name and value.
        items: Vec<(Ident, crate::tarval::Tarval)>,
    },
}

impl TypeKind {
    /// Classification of this kind.
    pub fn info(&self) -> &'static TypeKindInfo {
        const PRIMITIVE: TypeKindInfo = TypeKindInfo {
            name: "primitive",
            is_compound: false,
            is_atomic: true,
        };
        const POINTER: TypeKindInfo = TypeKindInfo {
            name: "pointer",
            is_compound: false,
            is_atomic: true,
        };
        const ARRAY: TypeKindInfo = TypeKindInfo {
            name: "array",
            is_compound: false,
            is_atomic: false,
        };
        const METHOD: TypeKindInfo = TypeKindInfo {
            name: "method",
            is_compound: false,
            is_atomic: false,
        };
        const STRUCT: TypeKindInfo = TypeKindInfo {
            name: "struct",
            is_compound: true,
            is_atomic: false,
        };
        const UNION: TypeKindInfo = TypeKindInfo {
            name: "union",
            is_compound: true,
            is_atomic: false,
        };
        const CLASS: TypeKindInfo = TypeKindInfo {
            name: "class",
            is_compound: true,
            is_atomic: false,
        };
        const ENUMERATION: TypeKindInfo = TypeKindInfo {
            name: "enumeration",
            is_compound: false,
            is_atomic: true,
        };
        match self {
            TypeKind::Primitive => &PRIMITIVE,
            TypeKind::Pointer { .. } => &POINTER,
            TypeKind::Array { .. } => &ARRAY,
            TypeKind::Method(_) => &METHOD,
            TypeKind::Struct { .. } => &STRUCT,
            TypeKind::Union { .. } => &UNION,
            TypeKind::Class { .. } => &CLASS,
            TypeKind::Enumeration { .. } => &ENUMERATION,
        }
    }
}

/// A type record: shared header plus kind payload.
#[derive(Debug, Clone)]
pub struct TypeData {
    /// Optional name.
    pub name: PackedOption<Ident>,
    /// Kind payload.
    pub kind: TypeKind,
    /// Size in bytes; 0 while unknown.
    pub size: u32,
    /// Alignment in bytes; 0 while unknown.
    pub align: u32,
    /// Mode of atomic types.
    pub mode: PackedOption<Mode>,
    /// Layout state.
    pub state: TypeState,
    /// The lowered rendition installed by call-convention lowering.
    pub lowered: PackedOption<Type>,
}

/// The program-wide registry of types and entities.
pub struct TypeUniverse {
    types: PrimaryMap<Type, TypeData>,
    entities: PrimaryMap<Entity, EntityData>,
}

impl TypeUniverse {
    /// Create an empty universe.
    pub fn new() -> Self {
        Self {
            types: PrimaryMap::new(),
            entities: PrimaryMap::new(),
        }
    }

    // ---- type constructors ------------------------------------------------

    fn push_type(&mut self, data: TypeData) -> Type {
        self.types.push(data)
    }

    /// Create a primitive type of `m`.
    pub fn new_primitive_type(
        &mut self,
        name: Option<Ident>,
        m: Mode,
        modes: &ModeRegistry,
    ) -> Type {
        let bytes = (modes.data(m).bits + 7) / 8;
        self.push_type(TypeData {
            name: name.into(),
            kind: TypeKind::Primitive,
            size: bytes,
            align: bytes.max(1),
            mode: Some(m).into(),
            state: TypeState::Fixed,
            lowered: None.into(),
        })
    }

    /// Create a pointer type to `points_to`.
    pub fn new_pointer_type(&mut self, points_to: Type) -> Type {
        self.push_type(TypeData {
            name: None.into(),
            kind: TypeKind::Pointer { points_to },
            size: 8,
            align: 8,
            mode: Some(mode::P).into(),
            state: TypeState::Fixed,
            lowered: None.into(),
        })
    }

    /// Create an array type of `n_elems` elements (or unknown bounds).
    pub fn new_array_type(&mut self, element: Type, n_elems: Option<u32>) -> Type {
        let elem_size = self.types[element].size;
        self.push_type(TypeData {
            name: None.into(),
            kind: TypeKind::Array {
                element,
                n_elems,
                element_entity: None.into(),
            },
            size: n_elems.map(|n| n * elem_size).unwrap_or(0),
            align: self.types[element].align,
            mode: None.into(),
            state: TypeState::Undefined,
            lowered: None.into(),
        })
    }

    /// Create a method type.
    pub fn new_method_type(&mut self, params: Vec<Type>, results: Vec<Type>) -> Type {
        self.push_type(TypeData {
            name: None.into(),
            kind: TypeKind::Method(MethodSignature {
                params,
                results,
                variadicity: Variadicity::NonVariadic,
                first_variadic: None,
                calling_convention: CallConv::Cdecl,
            }),
            size: 0,
            align: 0,
            mode: Some(mode::P).into(),
            state: TypeState::Fixed,
            lowered: None.into(),
        })
    }

    /// Create an empty struct type.
    pub fn new_struct_type(&mut self, name: Ident) -> Type {
        self.push_type(TypeData {
            name: Some(name).into(),
            kind: TypeKind::Struct {
                members: Vec::new(),
            },
            size: 0,
            align: 0,
            mode: None.into(),
            state: TypeState::Undefined,
            lowered: None.into(),
        })
    }

    /// Create an empty union type.
    pub fn new_union_type(&mut self, name: Ident) -> Type {
        self.push_type(TypeData {
            name: Some(name).into(),
            kind: TypeKind::Union {
                members: Vec::new(),
            },
            size: 0,
            align: 0,
            mode: None.into(),
            state: TypeState::Undefined,
            lowered: None.into(),
        })
    }

    /// Create an empty class type.
    pub fn new_class_type(&mut self, name: Ident) -> Type {
        self.push_type(TypeData {
            name: Some(name).into(),
            kind: TypeKind::Class {
                members: Vec::new(),
                supertypes: Vec::new(),
                subtypes: Vec::new(),
            },
            size: 0,
            align: 0,
            mode: None.into(),
            state: TypeState::Undefined,
            lowered: None.into(),
        })
    }

    /// Create an enumeration type.
    pub fn new_enumeration_type(
        &mut self,
        name: Ident,
        items: Vec<(Ident, crate::tarval::Tarval)>,
    ) -> Type {
        self.push_type(TypeData {
            name: Some(name).into(),
            kind: TypeKind::Enumeration { items },
            size: 4,
            align: 4,
            mode: Some(mode::IS).into(),
            state: TypeState::Fixed,
            lowered: None.into(),
        })
    }

    // ---- type queries -----------------------------------------------------

    /// Access the full record of `t`.
    pub fn type_data(&self, t: Type) -> &TypeData {
        &self.types[t]
    }

    /// Access the full record of `t`, mutable edition.
    pub fn type_data_mut(&mut self, t: Type) -> &mut TypeData {
        &mut self.types[t]
    }

    /// Is `t` a method type?
    pub fn is_method_type(&self, t: Type) -> bool {
        matches!(self.types[t].kind, TypeKind::Method(_))
    }

    /// Is `t` a compound (struct/union/class) type?
    pub fn is_compound_type(&self, t: Type) -> bool {
        self.types[t].kind.info().is_compound
    }

    /// Is `t` a class type?
    pub fn is_class_type(&self, t: Type) -> bool {
        matches!(self.types[t].kind, TypeKind::Class { .. })
    }

    /// The method signature of a method type.
    pub fn method_signature(&self, t: Type) -> &MethodSignature {
        match &self.types[t].kind {
            TypeKind::Method(sig) => sig,
            _ => panic!("{} is not a method type", t),
        }
    }

    /// The method signature, mutable edition.
    pub fn method_signature_mut(&mut self, t: Type) -> &mut MethodSignature {
        match &mut self.types[t].kind {
            TypeKind::Method(sig) => sig,
            _ => panic!("{} is not a method type", t),
        }
    }

    /// The ordered member list of a compound type.
    pub fn members(&self, t: Type) -> &[Entity] {
        match &self.types[t].kind {
            TypeKind::Struct { members }
            | TypeKind::Union { members }
            | TypeKind::Class { members, .. } => members,
            _ => &[],
        }
    }

    /// Number of types created.
    pub fn n_types(&self) -> usize {
        self.types.len()
    }

    /// Iterate over all type handles.
    pub fn types(&self) -> impl Iterator<Item = Type> {
        firm_arena::Keys::with_len(self.types.len())
    }

    // ---- layout -----------------------------------------------------------

    /// Freeze the layout of `t` with the given size and alignment.
    pub fn set_layout_fixed(&mut self, t: Type, size: u32, align: u32) {
        let data = &mut self.types[t];
        data.size = size;
        data.align = align;
        data.state = TypeState::Fixed;
    }

    // ---- entities ---------------------------------------------------------

    /// Create an entity named `name` of type `ty` inside `owner`.
    ///
    /// Adding a member to a layout-fixed compound is a contract violation.
    pub fn new_entity(&mut self, owner: Type, name: Ident, ty: Type) -> Entity {
        assert!(
            self.types[owner].state == TypeState::Undefined
                || !self.types[owner].kind.info().is_compound,
            "cannot add members to layout-fixed {}",
            owner
        );
        let ent = self.entities.push(EntityData::new(name, owner, ty));
        match &mut self.types[owner].kind {
            TypeKind::Struct { members }
            | TypeKind::Union { members }
            | TypeKind::Class { members, .. } => members.push(ent),
            _ => {}
        }
        ent
    }

    /// Access the full record of `ent`.
    pub fn entity(&self, ent: Entity) -> &EntityData {
        &self.entities[ent]
    }

    /// Access the full record of `ent`, mutable edition.
    pub fn entity_mut(&mut self, ent: Entity) -> &mut EntityData {
        &mut self.entities[ent]
    }

    /// Number of entities created.
    pub fn n_entities(&self) -> usize {
        self.entities.len()
    }

    /// Iterate over all entity handles.
    pub fn entities(&self) -> impl Iterator<Item = Entity> {
        firm_arena::Keys::with_len(self.entities.len())
    }

    /// Associate a graph with a method entity.
    pub fn set_entity_graph(&mut self, ent: Entity, irg: Irg) {
        self.entities[ent].graph = Some(irg).into();
    }

    // ---- inheritance ------------------------------------------------------

    /// Record `sup` as a direct supertype of `class`.
    pub fn add_class_supertype(&mut self, class: Type, sup: Type) {
        match &mut self.types[class].kind {
            TypeKind::Class { supertypes, .. } => supertypes.push(sup),
            _ => panic!("{} is not a class type", class),
        }
        match &mut self.types[sup].kind {
            TypeKind::Class { subtypes, .. } => subtypes.push(class),
            _ => panic!("{} is not a class type", sup),
        }
    }

    /// Record that `ent` overwrites `overwritten` (a supertype method).
    pub fn add_entity_overwrites(&mut self, ent: Entity, overwritten: Entity) {
        self.entities[ent].overwrites.push(overwritten);
        self.entities[overwritten].overwritten_by.push(ent);
    }

    /// Find the unique implementation of `method` for dynamic type `class`.
    ///
    /// Searches `method` itself and its overwriters for one owned by
    /// `class`, then retries on the supertypes. `None` means no
    /// implementation is visible, which callers treat as unreachable.
    pub fn resolve_implementation(&self, class: Type, method: Entity) -> Option<Entity> {
        let mut worklist = vec![class];
        while let Some(cls) = worklist.pop() {
            let m = &self.entities[method];
            if m.peculiarity != Peculiarity::Description && m.owner.expand() == Some(cls) {
                return Some(method);
            }
            for &e in &m.overwritten_by {
                let ed = &self.entities[e];
                if ed.peculiarity != Peculiarity::Description && ed.owner.expand() == Some(cls) {
                    return Some(e);
                }
            }
            if let TypeKind::Class { supertypes, .. } = &self.types[cls].kind {
                worklist.extend(supertypes.iter().copied());
            }
        }
        None
    }

    /// Collect every implemented method that overwrites `method`,
    /// transitively, including `method` itself if implemented.
    ///
    /// `has_external` reports whether some overwriter is externally
    /// allocated, i.e. an unknown body may be called.
    pub fn collect_overwriters(&self, method: Entity) -> ImplSet {
        let mut set = ImplSet::default();
        let mut seen = crate::fx::FxHashSet::default();
        let mut worklist = vec![method];
        while let Some(e) = worklist.pop() {
            if !seen.insert(e) {
                continue;
            }
            let data = &self.entities[e];
            if data.peculiarity == Peculiarity::Existent {
                if data.visibility == Visibility::ExternalAllocated {
                    set.has_external = true;
                } else if !set.entities.contains(&e) {
                    set.entities.push(e);
                }
            }
            worklist.extend(data.overwritten_by.iter().copied());
        }
        set
    }
}

/// The set of implementations reachable from one declared method.
#[derive(Debug, Clone, Default)]
pub struct ImplSet {
    /// Implementations with a body in this program.
    pub entities: Vec<Entity>,
    /// Whether an external (unknown) implementation exists as well.
    pub has_external: bool,
}

impl ImplSet {
    /// Is the set completely empty (no body, no external)?
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && !self.has_external
    }
}

impl Default for TypeUniverse {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Interner;
    use crate::mode;

    fn setup() -> (TypeUniverse, Interner, ModeRegistry) {
        (TypeUniverse::new(), Interner::new(), ModeRegistry::new())
    }

    #[test]
    fn members_are_ordered() {
        let (mut tu, mut idents, modes) = setup();
        let int_ty = tu.new_primitive_type(None, mode::IS, &modes);
        let s = tu.new_struct_type(idents.intern("point"));
        let x = tu.new_entity(s, idents.intern("x"), int_ty);
        let y = tu.new_entity(s, idents.intern("y"), int_ty);
        assert_eq!(tu.members(s), &[x, y]);
        assert!(tu.is_compound_type(s));
        assert!(!tu.is_method_type(s));
    }

    #[test]
    #[should_panic]
    fn fixed_layout_rejects_members() {
        let (mut tu, mut idents, modes) = setup();
        let int_ty = tu.new_primitive_type(None, mode::IS, &modes);
        let s = tu.new_struct_type(idents.intern("sealed"));
        tu.set_layout_fixed(s, 4, 4);
        tu.new_entity(s, idents.intern("late"), int_ty);
    }

    #[test]
    fn implementation_resolution_walks_supertypes() {
        let (mut tu, mut idents, modes) = setup();
        let int_ty = tu.new_primitive_type(None, mode::IS, &modes);
        let mty = tu.new_method_type(vec![], vec![int_ty]);

        let base = tu.new_class_type(idents.intern("Base"));
        let mid = tu.new_class_type(idents.intern("Mid"));
        let leaf = tu.new_class_type(idents.intern("Leaf"));
        tu.add_class_supertype(mid, base);
        tu.add_class_supertype(leaf, mid);

        let base_f = tu.new_entity(base, idents.intern("f"), mty);
        let mid_f = tu.new_entity(mid, idents.intern("f"), mty);
        tu.add_entity_overwrites(mid_f, base_f);

        // Leaf has no own override, so Mid's body wins.
        assert_eq!(tu.resolve_implementation(leaf, base_f), Some(mid_f));
        assert_eq!(tu.resolve_implementation(mid, base_f), Some(mid_f));
        assert_eq!(tu.resolve_implementation(base, base_f), Some(base_f));
    }

    #[test]
    fn overwriter_collection_is_transitive() {
        let (mut tu, mut idents, modes) = setup();
        let int_ty = tu.new_primitive_type(None, mode::IS, &modes);
        let mty = tu.new_method_type(vec![], vec![int_ty]);
        let a = tu.new_class_type(idents.intern("A"));
        let b = tu.new_class_type(idents.intern("B"));
        let c = tu.new_class_type(idents.intern("C"));
        let af = tu.new_entity(a, idents.intern("f"), mty);
        let bf = tu.new_entity(b, idents.intern("f"), mty);
        let cf = tu.new_entity(c, idents.intern("f"), mty);
        tu.add_entity_overwrites(bf, af);
        tu.add_entity_overwrites(cf, bf);
        tu.entity_mut(cf).visibility = Visibility::ExternalAllocated;

        let impls = tu.collect_overwriters(af);
        assert!(impls.entities.contains(&af));
        assert!(impls.entities.contains(&bf));
        assert!(!impls.entities.contains(&cf));
        assert!(impls.has_external);
    }
}
