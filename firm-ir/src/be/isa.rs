//! Target ISA descriptors.
//!
//! The allocator core is target-independent; everything it needs to know
//! about a target is collected in an [`Isa`] value: the register classes,
//! which class a mode's values live in, which operations tie their result
//! to an operand, which are cheap enough to re-execute instead of
//! reloading, and the hooks the driver invokes at the documented pipeline
//! points.

use crate::ir::{Graph, Node, Opcode};
use crate::mode::{Mode, ModeRegistry, ModeSort};
use target_lexicon::Triple;

/// A register class handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegClass(pub u8);

/// Description of one register class.
#[derive(Debug, Clone)]
pub struct RegClassData {
    /// Printable name.
    pub name: &'static str,
    /// Number of registers in the class.
    pub n_regs: u32,
    /// Mask of registers excluded from allocation (stack pointer and
    /// friends).
    pub ignore: u64,
}

impl RegClassData {
    /// Registers available to the allocator.
    pub fn n_allocatable(&self) -> u32 {
        self.n_regs - self.ignore.count_ones()
    }
}

/// Pipeline hooks a target may install. Every hook defaults to absent.
#[derive(Default)]
pub struct IsaHooks {
    /// Before liveness and spilling.
    pub pre_ra: Option<fn(&mut Graph)>,
    /// After spilling, before coloring.
    pub before_ra: Option<fn(&mut Graph)>,
    /// After SSA destruction.
    pub after_ra: Option<fn(&mut Graph)>,
    /// After frame finalisation.
    pub finish: Option<fn(&mut Graph)>,
    /// Code emission entry.
    pub emit: Option<fn(&Graph)>,
}

/// A target description.
pub struct Isa {
    /// Printable name.
    pub name: &'static str,
    /// The target triple this descriptor was looked up for.
    pub triple: Triple,
    /// The register classes.
    pub classes: Vec<RegClassData>,
    /// Pipeline hooks.
    pub hooks: IsaHooks,
}

impl Isa {
    /// Look up a descriptor for `triple`.
    ///
    /// Real targets register themselves here; the build always carries the
    /// generic descriptor used by the tests, which every triple resolves
    /// to for now.
    pub fn lookup(triple: Triple) -> Isa {
        let mut isa = Self::generic(8);
        isa.triple = triple;
        isa
    }

    /// The generic descriptor: `gp_regs` general registers plus eight
    /// floating point registers, nothing reserved.
    pub fn generic(gp_regs: u32) -> Isa {
        Isa {
            name: "generic",
            triple: Triple::unknown(),
            classes: vec![
                RegClassData {
                    name: "gp",
                    n_regs: gp_regs,
                    ignore: 0,
                },
                RegClassData {
                    name: "fp",
                    n_regs: 8,
                    ignore: 0,
                },
            ],
            hooks: IsaHooks::default(),
        }
    }

    /// The class `m`-valued nodes are allocated in, if any.
    pub fn class_of(&self, modes: &ModeRegistry, m: Mode) -> Option<RegClass> {
        match modes.data(m).sort {
            ModeSort::Int | ModeSort::Reference | ModeSort::Boolean => Some(RegClass(0)),
            ModeSort::Float => Some(RegClass(1)),
            _ => None,
        }
    }

    /// The description of `rc`.
    pub fn class(&self, rc: RegClass) -> &RegClassData {
        &self.classes[rc.0 as usize]
    }

    /// Does `n` compute its value purely from its attributes and operands
    /// that stay available, so a reload can be replaced by re-execution?
    pub fn is_remat(&self, g: &Graph, n: Node) -> bool {
        match g.opcode(n) {
            Opcode::Const | Opcode::SymConst => true,
            _ => false,
        }
    }

    /// Does `n` tie its result register to its first operand?
    pub fn is_two_address(&self, g: &Graph, n: Node) -> bool {
        let _ = (g, n);
        false
    }

    /// A fixed register requirement for the value `n`, if the ABI or an
    /// encoding constraint pins it.
    pub fn precolor(&self, g: &Graph, n: Node) -> Option<u32> {
        let _ = (g, n);
        None
    }

    /// Fuse `reload` into its single user as a memory operand. Returns
    /// `true` when the target managed; the generic descriptor never does.
    pub fn fuse_memory_operand(&self, g: &mut Graph, reload: Node, user: Node) -> bool {
        let _ = (g, reload, user);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode;

    #[test]
    fn classes_by_mode_sort() {
        let modes = ModeRegistry::new();
        let isa = Isa::generic(4);
        assert_eq!(isa.class_of(&modes, mode::IS), Some(RegClass(0)));
        assert_eq!(isa.class_of(&modes, mode::P), Some(RegClass(0)));
        assert_eq!(isa.class_of(&modes, mode::D), Some(RegClass(1)));
        assert_eq!(isa.class_of(&modes, mode::M), None);
        assert_eq!(isa.class_of(&modes, mode::X), None);
        assert_eq!(isa.class(RegClass(0)).n_allocatable(), 4);
    }
}
