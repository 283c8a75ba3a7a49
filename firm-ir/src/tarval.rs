//! Target values: materialised constants.
//!
//! A [`Tarval`] is the result of constant folding: a concrete value of some
//! mode. Integer payloads are stored as raw bits masked to the mode width;
//! floats as the bit pattern of the corresponding IEEE value; reference
//! constants may carry the entity whose address they denote (the payload
//! that callee analysis inspects). The two distinguished values `bad` and
//! `unknown` are propagated through every operation.

use crate::mode::{self, Mode, ModeArith, ModeRegistry, ModeSort};
use crate::tr::Entity;
use core::fmt;
use firm_arena::PackedOption;

/// Comparison outcome, as a set of the possible orderings.
///
/// A concrete comparison yields exactly one of `LESS`, `EQUAL`, `GREATER`
/// or `UNORDERED`; a `Cmp` projection queries whether the outcome is inside
/// an arbitrary subset (`LESS | EQUAL` is `<=`, and so on).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation(pub u8);

impl Relation {
    /// The empty relation (never true).
    pub const FALSE: Relation = Relation(0);
    /// Strictly less.
    pub const LESS: Relation = Relation(1);
    /// Equal.
    pub const EQUAL: Relation = Relation(2);
    /// Strictly greater.
    pub const GREATER: Relation = Relation(4);
    /// Unordered (any comparison involving a NaN).
    pub const UNORDERED: Relation = Relation(8);
    /// Less or equal.
    pub const LESS_EQUAL: Relation = Relation(1 | 2);
    /// Less or greater (ordered inequality).
    pub const LESS_GREATER: Relation = Relation(1 | 4);
    /// Greater or equal.
    pub const GREATER_EQUAL: Relation = Relation(2 | 4);
    /// Any outcome (always true).
    pub const TRUE: Relation = Relation(15);

    /// Does this relation include every outcome in `other`?
    pub fn contains(self, other: Relation) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set union.
    pub fn union(self, other: Relation) -> Relation {
        Relation(self.0 | other.0)
    }

    /// The negated relation (complement within `TRUE`).
    pub fn negated(self) -> Relation {
        Relation(!self.0 & 15)
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [(1, "<"), (2, "="), (4, ">"), (8, "!o")];
        let mut first = true;
        for &(bit, name) in &names {
            if self.0 & bit != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "false")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Payload {
    /// Raw bits, masked to the mode width.
    Bits(u64),
    /// Bits of an IEEE double; `F` values are kept as the nearest double.
    Float(u64),
    /// Address of an entity (reference mode).
    EntityAddr(Entity),
    /// Result of an undefined operation.
    Bad,
    /// A defined but unknown value.
    Unknown,
}

/// A target value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tarval {
    mode: PackedOption<Mode>,
    payload: Payload,
}

impl Tarval {
    /// Bit mask covering `bits` low bits.
    pub fn mask(bits: u32) -> u64 {
        if bits >= 64 {
            !0
        } else {
            (1u64 << bits) - 1
        }
    }

    /// The `bad` tarval.
    pub fn bad() -> Tarval {
        Tarval {
            mode: Some(mode::BAD).into(),
            payload: Payload::Bad,
        }
    }

    /// The `unknown` tarval of `m`.
    pub fn unknown(m: Mode) -> Tarval {
        Tarval {
            mode: Some(m).into(),
            payload: Payload::Unknown,
        }
    }

    /// An integer/boolean/reference constant from raw bits.
    pub fn from_bits(bits: u64, m: Mode) -> Tarval {
        Tarval {
            mode: Some(m).into(),
            payload: Payload::Bits(bits),
        }
    }

    /// An integer constant, masked to the width of `m`.
    pub fn from_i64(v: i64, m: Mode, reg: &ModeRegistry) -> Tarval {
        let bits = reg.data(m).bits;
        Tarval::from_bits(v as u64 & Self::mask(bits), m)
    }

    /// A float constant.
    pub fn from_f64(v: f64, m: Mode) -> Tarval {
        let stored = if m == mode::F { (v as f32) as f64 } else { v };
        Tarval {
            mode: Some(m).into(),
            payload: Payload::Float(stored.to_bits()),
        }
    }

    /// The address of `ent` as a reference constant.
    pub fn from_entity(ent: Entity, m: Mode) -> Tarval {
        Tarval {
            mode: Some(m).into(),
            payload: Payload::EntityAddr(ent),
        }
    }

    /// The value's mode.
    pub fn mode(&self) -> Mode {
        self.mode.expect("tarval has a mode")
    }

    /// Is this the `bad` tarval?
    pub fn is_bad(&self) -> bool {
        self.payload == Payload::Bad
    }

    /// Is this an `unknown` tarval?
    pub fn is_unknown(&self) -> bool {
        self.payload == Payload::Unknown
    }

    /// Is this a usable concrete constant?
    pub fn is_constant(&self) -> bool {
        !self.is_bad() && !self.is_unknown()
    }

    /// The entity whose address this value denotes, if any.
    pub fn entity(&self) -> Option<Entity> {
        match self.payload {
            Payload::EntityAddr(e) => Some(e),
            _ => None,
        }
    }

    /// Signed interpretation, if this is an integer-like constant.
    pub fn as_i64(&self, reg: &ModeRegistry) -> Option<i64> {
        match self.payload {
            Payload::Bits(bits) => {
                let d = reg.data(self.mode());
                if d.signed && d.bits < 64 {
                    let shift = 64 - d.bits;
                    Some(((bits << shift) as i64) >> shift)
                } else {
                    Some(bits as i64)
                }
            }
            _ => None,
        }
    }

    /// Unsigned interpretation, if this is an integer-like constant.
    pub fn as_u64(&self) -> Option<u64> {
        match self.payload {
            Payload::Bits(bits) => Some(bits),
            _ => None,
        }
    }

    /// Float interpretation, if this is a float constant.
    pub fn as_f64(&self) -> Option<f64> {
        match self.payload {
            Payload::Float(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }

    /// Is this the zero (or null) of its mode?
    pub fn is_null(&self) -> bool {
        match self.payload {
            Payload::Bits(0) => true,
            Payload::Float(bits) => f64::from_bits(bits) == 0.0,
            _ => false,
        }
    }

    /// Is this the one of its mode?
    pub fn is_one(&self) -> bool {
        match self.payload {
            Payload::Bits(1) => true,
            Payload::Float(bits) => f64::from_bits(bits) == 1.0,
            _ => false,
        }
    }

    /// Is this the all-bits-one value of its mode?
    pub fn is_all_one(&self, reg: &ModeRegistry) -> bool {
        match self.payload {
            Payload::Bits(bits) => bits == Self::mask(reg.data(self.mode()).bits),
            _ => false,
        }
    }

    fn binop_bits(
        self,
        other: Tarval,
        reg: &ModeRegistry,
        f: impl FnOnce(u64, u64, u32, bool) -> Option<u64>,
        g: impl FnOnce(f64, f64) -> f64,
    ) -> Tarval {
        if !self.is_constant() || !other.is_constant() {
            return Tarval::bad();
        }
        debug_assert_eq!(self.mode(), other.mode(), "tarval mode mismatch");
        let m = self.mode();
        let d = reg.data(m);
        match (self.payload, other.payload, d.arithmetic) {
            (Payload::Bits(a), Payload::Bits(b), ModeArith::TwosComplement) => {
                match f(a, b, d.bits, d.signed) {
                    Some(bits) => Tarval::from_bits(bits & Self::mask(d.bits), m),
                    None => Tarval::bad(),
                }
            }
            (Payload::Float(a), Payload::Float(b), ModeArith::IeeeFloat) => {
                Tarval::from_f64(g(f64::from_bits(a), f64::from_bits(b)), m)
            }
            _ => Tarval::bad(),
        }
    }

    /// Addition.
    pub fn add(self, other: Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop_bits(other, reg, |a, b, _, _| Some(a.wrapping_add(b)), |a, b| a + b)
    }

    /// Subtraction.
    pub fn sub(self, other: Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop_bits(other, reg, |a, b, _, _| Some(a.wrapping_sub(b)), |a, b| a - b)
    }

    /// Multiplication.
    pub fn mul(self, other: Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop_bits(other, reg, |a, b, _, _| Some(a.wrapping_mul(b)), |a, b| a * b)
    }

    /// Division; `bad` on division by zero.
    pub fn div(self, other: Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop_bits(
            other,
            reg,
            |a, b, bits, signed| {
                if b == 0 {
                    return None;
                }
                if signed {
                    let sa = Tarval::from_bits(a, mode::LS).sext(bits);
                    let sb = Tarval::from_bits(b, mode::LS).sext(bits);
                    Some(sa.wrapping_div(sb) as u64)
                } else {
                    Some(a / b)
                }
            },
            |a, b| a / b,
        )
    }

    /// Remainder; `bad` on division by zero.
    pub fn rem(self, other: Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop_bits(
            other,
            reg,
            |a, b, bits, signed| {
                if b == 0 {
                    return None;
                }
                if signed {
                    let sa = Tarval::from_bits(a, mode::LS).sext(bits);
                    let sb = Tarval::from_bits(b, mode::LS).sext(bits);
                    Some(sa.wrapping_rem(sb) as u64)
                } else {
                    Some(a % b)
                }
            },
            |a, b| a % b,
        )
    }

    // Sign extend own bits from `bits` width; helper for signed div/rem.
    fn sext(self, bits: u32) -> i64 {
        let raw = match self.payload {
            Payload::Bits(b) => b,
            _ => 0,
        };
        if bits >= 64 {
            raw as i64
        } else {
            let shift = 64 - bits;
            ((raw << shift) as i64) >> shift
        }
    }

    /// Arithmetic negation.
    pub fn neg(self, reg: &ModeRegistry) -> Tarval {
        if !self.is_constant() {
            return Tarval::bad();
        }
        let m = self.mode();
        match self.payload {
            Payload::Bits(a) => {
                Tarval::from_bits((!a).wrapping_add(1) & Self::mask(reg.data(m).bits), m)
            }
            Payload::Float(a) => Tarval::from_f64(-f64::from_bits(a), m),
            _ => Tarval::bad(),
        }
    }

    /// Bitwise and.
    pub fn and(self, other: Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop_bits(other, reg, |a, b, _, _| Some(a & b), |_, _| f64::NAN)
    }

    /// Bitwise or.
    pub fn or(self, other: Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop_bits(other, reg, |a, b, _, _| Some(a | b), |_, _| f64::NAN)
    }

    /// Bitwise exclusive or.
    pub fn xor(self, other: Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop_bits(other, reg, |a, b, _, _| Some(a ^ b), |_, _| f64::NAN)
    }

    /// Bitwise complement.
    pub fn not(self, reg: &ModeRegistry) -> Tarval {
        if !self.is_constant() {
            return Tarval::bad();
        }
        let m = self.mode();
        match self.payload {
            Payload::Bits(a) => Tarval::from_bits(!a & Self::mask(reg.data(m).bits), m),
            _ => Tarval::bad(),
        }
    }

    fn shift_amount(self, width: u32, modulo: u32) -> Option<u32> {
        let amount = self.as_u64()? as u32;
        let amount = if modulo != 0 { amount % modulo } else { amount };
        if amount >= width {
            None
        } else {
            Some(amount)
        }
    }

    /// Left shift. The amount may have any integer mode.
    pub fn shl(self, amount: Tarval, reg: &ModeRegistry) -> Tarval {
        if !self.is_constant() || !amount.is_constant() {
            return Tarval::bad();
        }
        let m = self.mode();
        let d = reg.data(m);
        match (self.payload, amount.shift_amount(d.bits, d.modulo_shift)) {
            (Payload::Bits(a), Some(s)) => Tarval::from_bits((a << s) & Self::mask(d.bits), m),
            _ => Tarval::bad(),
        }
    }

    /// Logical right shift.
    pub fn shr(self, amount: Tarval, reg: &ModeRegistry) -> Tarval {
        if !self.is_constant() || !amount.is_constant() {
            return Tarval::bad();
        }
        let m = self.mode();
        let d = reg.data(m);
        match (self.payload, amount.shift_amount(d.bits, d.modulo_shift)) {
            (Payload::Bits(a), Some(s)) => Tarval::from_bits(a >> s, m),
            _ => Tarval::bad(),
        }
    }

    /// Arithmetic right shift.
    pub fn shrs(self, amount: Tarval, reg: &ModeRegistry) -> Tarval {
        if !self.is_constant() || !amount.is_constant() {
            return Tarval::bad();
        }
        let m = self.mode();
        let d = reg.data(m);
        match (self.payload, amount.shift_amount(d.bits, d.modulo_shift)) {
            (Payload::Bits(a), Some(s)) => {
                let signed = self.sext(d.bits);
                Tarval::from_bits((signed >> s) as u64 & Self::mask(d.bits), m)
            }
            _ => Tarval::bad(),
        }
    }

    /// Ordered comparison.
    pub fn compare(self, other: Tarval, reg: &ModeRegistry) -> Relation {
        if !self.is_constant() || !other.is_constant() {
            return Relation::FALSE;
        }
        match (self.payload, other.payload) {
            (Payload::Bits(_), Payload::Bits(_)) => {
                let d = reg.data(self.mode());
                let ord = if d.signed {
                    self.sext(d.bits).cmp(&other.sext(d.bits))
                } else {
                    self.as_u64().cmp(&other.as_u64())
                };
                match ord {
                    core::cmp::Ordering::Less => Relation::LESS,
                    core::cmp::Ordering::Equal => Relation::EQUAL,
                    core::cmp::Ordering::Greater => Relation::GREATER,
                }
            }
            (Payload::Float(a), Payload::Float(b)) => {
                let (a, b) = (f64::from_bits(a), f64::from_bits(b));
                if a < b {
                    Relation::LESS
                } else if a > b {
                    Relation::GREATER
                } else if a == b {
                    Relation::EQUAL
                } else {
                    Relation::UNORDERED
                }
            }
            (Payload::EntityAddr(a), Payload::EntityAddr(b)) => {
                if a == b {
                    Relation::EQUAL
                } else {
                    Relation::LESS_GREATER
                }
            }
            _ => Relation::FALSE,
        }
    }

    /// Convert the value to another mode, rounding/truncating as the target
    /// requires. Returns `bad` for conversions without a defined result.
    pub fn convert_to(self, target: Mode, reg: &ModeRegistry) -> Tarval {
        if !self.is_constant() {
            return Tarval::bad();
        }
        if self.mode() == target {
            return self;
        }
        let from = reg.data(self.mode());
        let to = reg.data(target);
        match (self.payload, to.sort) {
            (Payload::Bits(_), ModeSort::Int) | (Payload::Bits(_), ModeSort::Reference) => {
                // Sign- or zero-extend from the source width, then mask.
                let wide = if from.signed {
                    self.sext(from.bits) as u64
                } else {
                    self.as_u64().unwrap()
                };
                Tarval::from_bits(wide & Self::mask(to.bits), target)
            }
            (Payload::Bits(_), ModeSort::Float) => {
                let v = if from.signed {
                    self.sext(from.bits) as f64
                } else {
                    self.as_u64().unwrap() as f64
                };
                Tarval::from_f64(v, target)
            }
            (Payload::Float(bits), ModeSort::Int) => {
                let v = f64::from_bits(bits);
                if v.is_nan() || v.is_infinite() {
                    return Tarval::bad();
                }
                Tarval::from_i64(v.trunc() as i64, target, reg)
            }
            (Payload::Float(_), ModeSort::Float) => {
                Tarval::from_f64(self.as_f64().unwrap(), target)
            }
            (Payload::EntityAddr(e), ModeSort::Reference) => Tarval::from_entity(e, target),
            _ => Tarval::bad(),
        }
    }

    /// Can the value be converted to `target` and back without loss?
    pub fn can_convert_lossless(self, target: Mode, reg: &ModeRegistry) -> bool {
        let there = self.convert_to(target, reg);
        if !there.is_constant() {
            return false;
        }
        there.convert_to(self.mode(), reg) == self
    }
}

impl fmt::Debug for Tarval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.payload {
            Payload::Bits(b) => write!(f, "{:#x}:{}", b, self.mode()),
            Payload::Float(b) => write!(f, "{}:{}", f64::from_bits(b), self.mode()),
            Payload::EntityAddr(e) => write!(f, "&{}", e),
            Payload::Bad => write!(f, "<bad>"),
            Payload::Unknown => write!(f, "<unknown>"),
        }
    }
}

impl fmt::Display for Tarval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode;

    #[test]
    fn wrapping_int_arithmetic() {
        let reg = ModeRegistry::new();
        let a = Tarval::from_i64(200, mode::BU, &reg);
        let b = Tarval::from_i64(100, mode::BU, &reg);
        assert_eq!(a.add(b, &reg).as_u64(), Some(44)); // 300 mod 256
        let max = reg.max(mode::IS);
        let one = reg.one(mode::IS);
        assert_eq!(max.add(one, &reg), reg.min(mode::IS));
    }

    #[test]
    fn signed_division() {
        let reg = ModeRegistry::new();
        let a = Tarval::from_i64(-7, mode::IS, &reg);
        let b = Tarval::from_i64(2, mode::IS, &reg);
        assert_eq!(a.div(b, &reg).as_i64(&reg), Some(-3));
        assert_eq!(a.rem(b, &reg).as_i64(&reg), Some(-1));
        let zero = reg.zero(mode::IS);
        assert!(a.div(zero, &reg).is_bad());
    }

    #[test]
    fn comparison_relations() {
        let reg = ModeRegistry::new();
        let a = Tarval::from_i64(-1, mode::IS, &reg);
        let b = Tarval::from_i64(1, mode::IS, &reg);
        assert_eq!(a.compare(b, &reg), Relation::LESS);
        assert!(Relation::LESS_EQUAL.contains(a.compare(b, &reg)));
        // Unsigned: -1 is the max value.
        let au = Tarval::from_i64(-1, mode::IU, &reg);
        let bu = Tarval::from_i64(1, mode::IU, &reg);
        assert_eq!(au.compare(bu, &reg), Relation::GREATER);
        let nan = Tarval::from_f64(core::f64::NAN, mode::D);
        assert_eq!(nan.compare(nan, &reg), Relation::UNORDERED);
    }

    #[test]
    fn conversions() {
        let reg = ModeRegistry::new();
        let v = Tarval::from_i64(-1, mode::BS, &reg);
        // Sign extension preserves the value.
        assert_eq!(v.convert_to(mode::IS, &reg).as_i64(&reg), Some(-1));
        assert!(v.can_convert_lossless(mode::IS, &reg));
        // 300 does not fit a byte.
        let big = Tarval::from_i64(300, mode::IS, &reg);
        assert!(!big.can_convert_lossless(mode::BS, &reg));
        // Int to float and back.
        let i = Tarval::from_i64(42, mode::IS, &reg);
        assert_eq!(i.convert_to(mode::D, &reg).as_f64(), Some(42.0));
    }

    #[test]
    fn shifts_respect_modulo() {
        let reg = ModeRegistry::new();
        let v = Tarval::from_i64(1, mode::IU, &reg);
        let by33 = Tarval::from_i64(33, mode::IU, &reg);
        // 32-bit mode shifts modulo 32.
        assert_eq!(v.shl(by33, &reg).as_u64(), Some(2));
        let neg = Tarval::from_i64(-8, mode::IS, &reg);
        let by1 = Tarval::from_i64(1, mode::IU, &reg);
        assert_eq!(neg.shrs(by1, &reg).as_i64(&reg), Some(-4));
        assert_eq!(
            neg.shr(by1, &reg).as_u64(),
            Some((Tarval::mask(32) - 7) >> 1)
        );
    }
}
