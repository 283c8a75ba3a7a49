//! Value modes.
//!
//! Every value-producing node carries a mode: the class of values it
//! produces. Modes combine a sort (integer, float, reference, ...), a bit
//! width, signedness, and the arithmetic performed on them. Modes are
//! registered once in the [`ModeRegistry`] and compared by handle, so mode
//! equality is an integer compare just like identifier equality.
//!
//! The standard modes are pre-registered in a fixed order, which makes the
//! handles below compile-time constants. Additional modes (odd widths,
//! vectors) can be registered before graph construction begins.

use crate::tarval::Tarval;
use core::fmt;
use firm_arena::Idx;

/// A mode handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mode(u32);

impl Idx for Mode {
    fn new(index: usize) -> Self {
        debug_assert!(index < u32::max_value() as usize);
        Mode(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl firm_arena::ReservedValue for Mode {
    fn reserved_value() -> Self {
        Mode(u32::max_value())
    }

    fn is_reserved_value(&self) -> bool {
        self.0 == u32::max_value()
    }
}

/// Internal control-flow mode of basic blocks.
pub const BB: Mode = Mode(0);
/// Control flow produced by jumps and branches.
pub const X: Mode = Mode(1);
/// Memory dependency state.
pub const M: Mode = Mode(2);
/// Tuple of values (projected with `Proj`).
pub const T: Mode = Mode(3);
/// Wildcard mode accepted anywhere (keep-alive inputs).
pub const ANY: Mode = Mode(4);
/// Mode of the `Bad` node.
pub const BAD: Mode = Mode(5);
/// Signed 8-bit integer.
pub const BS: Mode = Mode(6);
/// Unsigned 8-bit integer.
pub const BU: Mode = Mode(7);
/// Signed 16-bit integer.
pub const HS: Mode = Mode(8);
/// Unsigned 16-bit integer.
pub const HU: Mode = Mode(9);
/// Signed 32-bit integer.
pub const IS: Mode = Mode(10);
/// Unsigned 32-bit integer.
pub const IU: Mode = Mode(11);
/// Signed 64-bit integer.
pub const LS: Mode = Mode(12);
/// Unsigned 64-bit integer.
pub const LU: Mode = Mode(13);
/// IEEE single precision float.
pub const F: Mode = Mode(14);
/// IEEE double precision float.
pub const D: Mode = Mode(15);
/// Internal boolean (comparison results).
pub const B: Mode = Mode(16);
/// Reference (pointer) mode, 64 bit.
pub const P: Mode = Mode(17);

const N_STANDARD_MODES: u32 = 18;

/// What family of values a mode describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSort {
    /// Machine integers.
    Int,
    /// IEEE floats.
    Float,
    /// Addresses.
    Reference,
    /// Internal booleans.
    Boolean,
    /// Memory dependency state.
    Memory,
    /// Value tuples.
    Tuple,
    /// Control flow tokens.
    Control,
    /// Basic block headers.
    BlockSort,
    /// Auxiliary internal modes (`ANY`, `BAD`).
    Internal,
}

/// What arithmetic a mode's values obey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArith {
    /// No arithmetic defined.
    None,
    /// Two's complement, wrapping at the bit width.
    TwosComplement,
    /// IEEE 754.
    IeeeFloat,
}

/// Full description of a mode.
#[derive(Debug, Clone)]
pub struct ModeData {
    /// Printable name.
    pub name: &'static str,
    /// The mode's sort.
    pub sort: ModeSort,
    /// Width in bits. 0 for non-data modes.
    pub bits: u32,
    /// Signedness; meaningful for `Int` only.
    pub signed: bool,
    /// Arithmetic kind.
    pub arithmetic: ModeArith,
    /// Number of bits that shift amounts are taken modulo. 0 = unmasked.
    pub modulo_shift: u32,
    /// Number of vector lanes; 1 for scalars.
    pub vector_elems: u32,
}

impl ModeData {
    fn int(name: &'static str, bits: u32, signed: bool) -> Self {
        Self {
            name,
            sort: ModeSort::Int,
            bits,
            signed,
            arithmetic: ModeArith::TwosComplement,
            modulo_shift: bits,
            vector_elems: 1,
        }
    }

    fn float(name: &'static str, bits: u32) -> Self {
        Self {
            name,
            sort: ModeSort::Float,
            bits,
            signed: true,
            arithmetic: ModeArith::IeeeFloat,
            modulo_shift: 0,
            vector_elems: 1,
        }
    }

    fn special(name: &'static str, sort: ModeSort) -> Self {
        Self {
            name,
            sort,
            bits: 0,
            signed: false,
            arithmetic: ModeArith::None,
            modulo_shift: 0,
            vector_elems: 1,
        }
    }
}

/// The registry of all modes of a program.
pub struct ModeRegistry {
    modes: Vec<ModeData>,
}

impl ModeRegistry {
    /// Create a registry holding the standard modes.
    pub fn new() -> Self {
        let mut modes = Vec::with_capacity(N_STANDARD_MODES as usize);
        modes.push(ModeData::special("BB", ModeSort::BlockSort));
        modes.push(ModeData::special("X", ModeSort::Control));
        modes.push(ModeData::special("M", ModeSort::Memory));
        modes.push(ModeData::special("T", ModeSort::Tuple));
        modes.push(ModeData::special("ANY", ModeSort::Internal));
        modes.push(ModeData::special("BAD", ModeSort::Internal));
        modes.push(ModeData::int("Bs", 8, true));
        modes.push(ModeData::int("Bu", 8, false));
        modes.push(ModeData::int("Hs", 16, true));
        modes.push(ModeData::int("Hu", 16, false));
        modes.push(ModeData::int("Is", 32, true));
        modes.push(ModeData::int("Iu", 32, false));
        modes.push(ModeData::int("Ls", 64, true));
        modes.push(ModeData::int("Lu", 64, false));
        modes.push(ModeData::float("F", 32));
        modes.push(ModeData::float("D", 64));
        modes.push(ModeData {
            name: "b",
            sort: ModeSort::Boolean,
            bits: 1,
            signed: false,
            arithmetic: ModeArith::None,
            modulo_shift: 0,
            vector_elems: 1,
        });
        modes.push(ModeData {
            name: "P",
            sort: ModeSort::Reference,
            bits: 64,
            signed: false,
            arithmetic: ModeArith::TwosComplement,
            modulo_shift: 64,
            vector_elems: 1,
        });
        Self { modes }
    }

    /// Register an additional integer mode.
    pub fn register_int_mode(
        &mut self,
        name: &'static str,
        bits: u32,
        signed: bool,
    ) -> Mode {
        let m = Mode(self.modes.len() as u32);
        self.modes.push(ModeData::int(name, bits, signed));
        m
    }

    /// Register an additional vector mode over an existing scalar mode.
    pub fn register_vector_mode(
        &mut self,
        name: &'static str,
        elem: Mode,
        lanes: u32,
    ) -> Mode {
        let mut data = self.modes[elem.index()].clone();
        data.name = name;
        data.vector_elems = lanes;
        let m = Mode(self.modes.len() as u32);
        self.modes.push(data);
        m
    }

    /// Look up a mode's description.
    pub fn data(&self, m: Mode) -> &ModeData {
        &self.modes[m.index()]
    }

    /// Printable name of `m`.
    pub fn name(&self, m: Mode) -> &'static str {
        self.data(m).name
    }

    /// Is `m` a data-carrying mode (int, float, reference, boolean)?
    pub fn is_data(&self, m: Mode) -> bool {
        match self.data(m).sort {
            ModeSort::Int | ModeSort::Float | ModeSort::Reference | ModeSort::Boolean => true,
            _ => false,
        }
    }

    /// Is `m` an integer mode?
    pub fn is_int(&self, m: Mode) -> bool {
        self.data(m).sort == ModeSort::Int
    }

    /// Is `m` a float mode?
    pub fn is_float(&self, m: Mode) -> bool {
        self.data(m).sort == ModeSort::Float
    }

    /// Is `m` the reference mode family?
    pub fn is_reference(&self, m: Mode) -> bool {
        self.data(m).sort == ModeSort::Reference
    }

    /// Is `m` an integer or reference mode with defined wrapping arithmetic?
    pub fn is_num(&self, m: Mode) -> bool {
        self.data(m).arithmetic == ModeArith::TwosComplement
    }

    /// The smallest value of a data mode, as a tarval.
    pub fn min(&self, m: Mode) -> Tarval {
        let d = self.data(m);
        match d.sort {
            ModeSort::Int if d.signed => Tarval::from_bits(1u64 << (d.bits - 1), m),
            ModeSort::Int => Tarval::from_bits(0, m),
            ModeSort::Float => Tarval::from_f64(core::f64::NEG_INFINITY, m),
            _ => Tarval::bad(),
        }
    }

    /// The largest value of a data mode, as a tarval.
    pub fn max(&self, m: Mode) -> Tarval {
        let d = self.data(m);
        match d.sort {
            ModeSort::Int if d.signed => {
                Tarval::from_bits((1u64 << (d.bits - 1)) - 1, m)
            }
            ModeSort::Int => Tarval::from_bits(Tarval::mask(d.bits), m),
            ModeSort::Float => Tarval::from_f64(core::f64::INFINITY, m),
            _ => Tarval::bad(),
        }
    }

    /// The zero (or null) value of a data mode.
    pub fn zero(&self, m: Mode) -> Tarval {
        let d = self.data(m);
        match d.sort {
            ModeSort::Int | ModeSort::Reference | ModeSort::Boolean => Tarval::from_bits(0, m),
            ModeSort::Float => Tarval::from_f64(0.0, m),
            _ => Tarval::bad(),
        }
    }

    /// The one value of a data mode.
    pub fn one(&self, m: Mode) -> Tarval {
        let d = self.data(m);
        match d.sort {
            ModeSort::Int | ModeSort::Boolean => Tarval::from_bits(1, m),
            ModeSort::Float => Tarval::from_f64(1.0, m),
            _ => Tarval::bad(),
        }
    }

    /// The all-bits-one value (−1 for signed modes).
    pub fn all_one(&self, m: Mode) -> Tarval {
        let d = self.data(m);
        match d.sort {
            ModeSort::Int => Tarval::from_bits(Tarval::mask(d.bits), m),
            ModeSort::Boolean => Tarval::from_bits(1, m),
            _ => Tarval::bad(),
        }
    }

    /// The null reference.
    pub fn null(&self, m: Mode) -> Tarval {
        debug_assert!(self.is_reference(m));
        Tarval::from_bits(0, m)
    }

    /// Number of registered modes.
    pub fn len(&self) -> usize {
        self.modes.len()
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mode{}", self.0)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_modes() {
        let reg = ModeRegistry::new();
        assert_eq!(reg.name(IS), "Is");
        assert_eq!(reg.data(IS).bits, 32);
        assert!(reg.data(IS).signed);
        assert!(!reg.data(IU).signed);
        assert!(reg.is_reference(P));
        assert!(reg.is_float(D));
        assert!(!reg.is_data(M));
        assert!(reg.is_data(B));
    }

    #[test]
    fn characteristic_tarvals() {
        let reg = ModeRegistry::new();
        assert_eq!(reg.min(BS).as_i64(&reg), Some(-128));
        assert_eq!(reg.max(BS).as_i64(&reg), Some(127));
        assert_eq!(reg.max(BU).as_i64(&reg), Some(255));
        assert_eq!(reg.zero(IS).as_i64(&reg), Some(0));
        assert_eq!(reg.all_one(IS).as_i64(&reg), Some(-1));
    }

    #[test]
    fn registered_modes_get_fresh_handles() {
        let mut reg = ModeRegistry::new();
        let i128ish = reg.register_int_mode("Os", 63, true);
        assert_ne!(i128ish, LS);
        assert_eq!(reg.data(i128ish).bits, 63);
        let v4 = reg.register_vector_mode("Is4", IS, 4);
        assert_eq!(reg.data(v4).vector_elems, 4);
        assert_eq!(reg.data(v4).bits, 32);
    }
}
