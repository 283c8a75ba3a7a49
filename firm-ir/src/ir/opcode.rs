//! Opcodes and their static properties.
//!
//! Built-in opcodes form a closed sum; everything the optimizer and the
//! verifier need to know about one (arity class, behaviour flags, pin
//! state) lives in its [`OpInfo`]. User opcodes extend the space at run
//! time through an [`OpRegistry`], which pairs an `OpInfo` with a behaviour
//! vtable; their node attribute payload is an opaque byte blob interpreted
//! only by that vtable.

use crate::mode::ModeRegistry;
use crate::tarval::Tarval;
use core::fmt;
use firm_arena::{idx_impl, Idx, PrimaryMap};

/// Handle of a run-time registered opcode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserOp(u32);
idx_impl!(UserOp, "op");

/// An operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Basic block header.
    Block,
    /// Procedure entry; projects the initial values.
    Start,
    /// Procedure exit; holds keep-alive edges.
    End,
    /// Unconditional jump.
    Jmp,
    /// Two-way branch on a boolean selector.
    Cond,
    /// Return to the caller.
    Return,
    /// Constant value.
    Const,
    /// Symbolic constant (address, type tag, size, alignment).
    SymConst,
    /// Member address selection.
    Sel,
    /// Procedure call.
    Call,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Arithmetic negation.
    Minus,
    /// Multiplication.
    Mul,
    /// Division (memory-using, fragile).
    Div,
    /// Remainder (memory-using, fragile).
    Mod,
    /// Absolute value.
    Abs,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Eor,
    /// Bitwise complement.
    Not,
    /// Left shift.
    Shl,
    /// Logical right shift.
    Shr,
    /// Arithmetic right shift.
    Shrs,
    /// Left rotation.
    Rotl,
    /// Mode conversion.
    Conv,
    /// Comparison; projected with a relation.
    Cmp,
    /// SSA join.
    Phi,
    /// Tuple projection.
    Proj,
    /// Value tuple.
    Tuple,
    /// Transparent forwarder left behind by `exchange`.
    Id,
    /// The unreachable value.
    Bad,
    /// A defined but unknown value.
    Unknown,
    /// The empty memory state.
    NoMem,
    /// Memory join.
    Sync,
    /// Memory read.
    Load,
    /// Memory write.
    Store,
    /// Storage allocation.
    Alloc,
    /// Storage release.
    Free,
    /// Block copy of a compound value.
    CopyB,
    /// Conditional select.
    Mux,
    /// Artificial liveness anchor inside a block.
    Keep,
    /// Backend: store a value to its spill slot.
    Spill,
    /// Backend: reload a spilled value.
    Reload,
    /// Backend: parallel register permutation.
    Perm,
    /// Backend: register-to-register copy.
    Copy,
    /// A run-time registered opcode.
    User(UserOp),
}

/// Arity class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// No inputs.
    Zero,
    /// Exactly one input.
    Unary,
    /// Exactly two inputs.
    Binary,
    /// Exactly three inputs.
    Ternary,
    /// Input count fixed per node at creation.
    Variable,
    /// Input count may change after creation (Block, End, Phi).
    Dynamic,
    /// Anything goes.
    Any,
}

/// Placement constraint of an opcode's nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpPin {
    /// Stays in the block it was created in.
    Pinned,
    /// May float to any block dominating all uses.
    Floats,
    /// Floats unless an exception edge pins it.
    ExceptionPinned,
}

/// Behaviour flag bits of an opcode.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFlags(pub u32);

impl OpFlags {
    /// No flags.
    pub const NONE: OpFlags = OpFlags(0);
    /// Operands commute.
    pub const COMMUTATIVE: OpFlags = OpFlags(1 << 0);
    /// Produces control flow.
    pub const CFOPCODE: OpFlags = OpFlags(1 << 1);
    /// Produces interprocedural control flow.
    pub const IP_CFOPCODE: OpFlags = OpFlags(1 << 2);
    /// May raise an exception.
    pub const FRAGILE: OpFlags = OpFlags(1 << 3);
    /// Control flow forks here.
    pub const FORKING: OpFlags = OpFlags(1 << 4);
    /// High-level construct removed by lowering.
    pub const HIGHLEVEL: OpFlags = OpFlags(1 << 5);
    /// Value depends only on its attributes (foldable, start-pinned).
    pub const CONSTLIKE: OpFlags = OpFlags(1 << 6);
    /// Admissible as a keep-alive input of `End`.
    pub const KEEP: OpFlags = OpFlags(1 << 7);
    /// Always placed in the start block.
    pub const START_BLOCK_PLACED: OpFlags = OpFlags(1 << 8);
    /// Reads or writes memory.
    pub const USES_MEMORY: OpFlags = OpFlags(1 << 9);
    /// Carries a label in dumps.
    pub const LABELED: OpFlags = OpFlags(1 << 10);
    /// Dumped without its block.
    pub const DUMP_NOBLOCK: OpFlags = OpFlags(1 << 11);
    /// A machine (backend) operation.
    pub const MACHINE: OpFlags = OpFlags(1 << 12);

    /// Set union.
    pub const fn union(self, other: OpFlags) -> OpFlags {
        OpFlags(self.0 | other.0)
    }

    /// Test whether all bits of `other` are set.
    pub fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Debug for OpFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OpFlags({:#x})", self.0)
    }
}

/// Static description of an opcode.
#[derive(Debug, Clone)]
pub struct OpInfo {
    /// Printable name.
    pub name: &'static str,
    /// Arity class.
    pub arity: Arity,
    /// Behaviour flags.
    pub flags: OpFlags,
    /// Placement constraint.
    pub pin: OpPin,
}

macro_rules! opinfo {
    ($name:expr, $arity:ident, $pin:ident) => {
        OpInfo {
            name: $name,
            arity: Arity::$arity,
            flags: OpFlags::NONE,
            pin: OpPin::$pin,
        }
    };
    ($name:expr, $arity:ident, $pin:ident, $($flag:ident)|+) => {
        OpInfo {
            name: $name,
            arity: Arity::$arity,
            flags: OpFlags(0 $(| OpFlags::$flag.0)+),
            pin: OpPin::$pin,
        }
    };
}

static BLOCK_INFO: OpInfo = opinfo!("Block", Dynamic, Pinned, CFOPCODE | LABELED);
static START_INFO: OpInfo = opinfo!("Start", Zero, Pinned, CFOPCODE | START_BLOCK_PLACED);
static END_INFO: OpInfo = opinfo!("End", Dynamic, Pinned, CFOPCODE);
static JMP_INFO: OpInfo = opinfo!("Jmp", Zero, Pinned, CFOPCODE);
static COND_INFO: OpInfo = opinfo!("Cond", Unary, Pinned, CFOPCODE | FORKING);
static RETURN_INFO: OpInfo = opinfo!("Return", Variable, Pinned, CFOPCODE | USES_MEMORY);
static CONST_INFO: OpInfo = opinfo!("Const", Zero, Floats, CONSTLIKE | START_BLOCK_PLACED);
static SYMCONST_INFO: OpInfo = opinfo!("SymConst", Zero, Floats, CONSTLIKE | START_BLOCK_PLACED);
static SEL_INFO: OpInfo = opinfo!("Sel", Variable, Floats, HIGHLEVEL);
static CALL_INFO: OpInfo = opinfo!("Call", Variable, Pinned, FRAGILE | USES_MEMORY | IP_CFOPCODE);
static ADD_INFO: OpInfo = opinfo!("Add", Binary, Floats, COMMUTATIVE);
static SUB_INFO: OpInfo = opinfo!("Sub", Binary, Floats);
static MINUS_INFO: OpInfo = opinfo!("Minus", Unary, Floats);
static MUL_INFO: OpInfo = opinfo!("Mul", Binary, Floats, COMMUTATIVE);
static DIV_INFO: OpInfo = opinfo!("Div", Ternary, ExceptionPinned, FRAGILE | USES_MEMORY);
static MOD_INFO: OpInfo = opinfo!("Mod", Ternary, ExceptionPinned, FRAGILE | USES_MEMORY);
static ABS_INFO: OpInfo = opinfo!("Abs", Unary, Floats);
static AND_INFO: OpInfo = opinfo!("And", Binary, Floats, COMMUTATIVE);
static OR_INFO: OpInfo = opinfo!("Or", Binary, Floats, COMMUTATIVE);
static EOR_INFO: OpInfo = opinfo!("Eor", Binary, Floats, COMMUTATIVE);
static NOT_INFO: OpInfo = opinfo!("Not", Unary, Floats);
static SHL_INFO: OpInfo = opinfo!("Shl", Binary, Floats);
static SHR_INFO: OpInfo = opinfo!("Shr", Binary, Floats);
static SHRS_INFO: OpInfo = opinfo!("Shrs", Binary, Floats);
static ROTL_INFO: OpInfo = opinfo!("Rotl", Binary, Floats);
static CONV_INFO: OpInfo = opinfo!("Conv", Unary, Floats);
static CMP_INFO: OpInfo = opinfo!("Cmp", Binary, Floats);
static PHI_INFO: OpInfo = opinfo!("Phi", Dynamic, Pinned);
static PROJ_INFO: OpInfo = opinfo!("Proj", Unary, Floats, DUMP_NOBLOCK);
static TUPLE_INFO: OpInfo = opinfo!("Tuple", Variable, Floats, DUMP_NOBLOCK);
static ID_INFO: OpInfo = opinfo!("Id", Unary, Floats, DUMP_NOBLOCK);
static BAD_INFO: OpInfo = opinfo!("Bad", Zero, Pinned, CONSTLIKE | START_BLOCK_PLACED | DUMP_NOBLOCK);
static UNKNOWN_INFO: OpInfo = opinfo!("Unknown", Zero, Pinned, CONSTLIKE | START_BLOCK_PLACED);
static NOMEM_INFO: OpInfo = opinfo!("NoMem", Zero, Pinned, CONSTLIKE | START_BLOCK_PLACED | DUMP_NOBLOCK);
static SYNC_INFO: OpInfo = opinfo!("Sync", Variable, Floats, USES_MEMORY);
static LOAD_INFO: OpInfo = opinfo!("Load", Binary, ExceptionPinned, FRAGILE | USES_MEMORY);
static STORE_INFO: OpInfo = opinfo!("Store", Ternary, ExceptionPinned, FRAGILE | USES_MEMORY);
static ALLOC_INFO: OpInfo = opinfo!("Alloc", Binary, Pinned, FRAGILE | USES_MEMORY);
static FREE_INFO: OpInfo = opinfo!("Free", Ternary, Pinned, USES_MEMORY);
static COPYB_INFO: OpInfo = opinfo!("CopyB", Ternary, Pinned, FRAGILE | USES_MEMORY | HIGHLEVEL);
static MUX_INFO: OpInfo = opinfo!("Mux", Ternary, Floats);
static KEEP_INFO: OpInfo = opinfo!("Keep", Dynamic, Pinned, KEEP);
static SPILL_INFO: OpInfo = opinfo!("Spill", Unary, Pinned, USES_MEMORY | MACHINE);
static RELOAD_INFO: OpInfo = opinfo!("Reload", Unary, Pinned, USES_MEMORY | MACHINE);
static PERM_INFO: OpInfo = opinfo!("Perm", Variable, Pinned, MACHINE);
static COPY_INFO: OpInfo = opinfo!("Copy", Unary, Pinned, MACHINE);

impl Opcode {
    /// Static description of a built-in opcode.
    ///
    /// Panics for `User` opcodes; those are described by their registry.
    pub fn builtin_info(self) -> &'static OpInfo {
        match self {
            Opcode::Block => &BLOCK_INFO,
            Opcode::Start => &START_INFO,
            Opcode::End => &END_INFO,
            Opcode::Jmp => &JMP_INFO,
            Opcode::Cond => &COND_INFO,
            Opcode::Return => &RETURN_INFO,
            Opcode::Const => &CONST_INFO,
            Opcode::SymConst => &SYMCONST_INFO,
            Opcode::Sel => &SEL_INFO,
            Opcode::Call => &CALL_INFO,
            Opcode::Add => &ADD_INFO,
            Opcode::Sub => &SUB_INFO,
            Opcode::Minus => &MINUS_INFO,
            Opcode::Mul => &MUL_INFO,
            Opcode::Div => &DIV_INFO,
            Opcode::Mod => &MOD_INFO,
            Opcode::Abs => &ABS_INFO,
            Opcode::And => &AND_INFO,
            Opcode::Or => &OR_INFO,
            Opcode::Eor => &EOR_INFO,
            Opcode::Not => &NOT_INFO,
            Opcode::Shl => &SHL_INFO,
            Opcode::Shr => &SHR_INFO,
            Opcode::Shrs => &SHRS_INFO,
            Opcode::Rotl => &ROTL_INFO,
            Opcode::Conv => &CONV_INFO,
            Opcode::Cmp => &CMP_INFO,
            Opcode::Phi => &PHI_INFO,
            Opcode::Proj => &PROJ_INFO,
            Opcode::Tuple => &TUPLE_INFO,
            Opcode::Id => &ID_INFO,
            Opcode::Bad => &BAD_INFO,
            Opcode::Unknown => &UNKNOWN_INFO,
            Opcode::NoMem => &NOMEM_INFO,
            Opcode::Sync => &SYNC_INFO,
            Opcode::Load => &LOAD_INFO,
            Opcode::Store => &STORE_INFO,
            Opcode::Alloc => &ALLOC_INFO,
            Opcode::Free => &FREE_INFO,
            Opcode::CopyB => &COPYB_INFO,
            Opcode::Mux => &MUX_INFO,
            Opcode::Keep => &KEEP_INFO,
            Opcode::Spill => &SPILL_INFO,
            Opcode::Reload => &RELOAD_INFO,
            Opcode::Perm => &PERM_INFO,
            Opcode::Copy => &COPY_INFO,
            Opcode::User(op) => panic!("{:?} has no builtin info", op),
        }
    }

    /// Is this opcode commutative?
    pub fn is_commutative(self) -> bool {
        match self {
            Opcode::User(_) => false,
            _ => self.builtin_info().flags.contains(OpFlags::COMMUTATIVE),
        }
    }

    /// Does this opcode produce control flow?
    pub fn is_cfop(self) -> bool {
        match self {
            Opcode::User(_) => false,
            _ => self.builtin_info().flags.contains(OpFlags::CFOPCODE),
        }
    }

    /// Is the value a pure function of its attributes?
    pub fn is_constlike(self) -> bool {
        match self {
            Opcode::User(_) => false,
            _ => self.builtin_info().flags.contains(OpFlags::CONSTLIKE),
        }
    }
}

/// Behaviour of a user opcode, supplied at registration.
///
/// The default methods describe an uninterpreted operation: nothing folds,
/// nothing is equivalent, attributes compare by bytes.
pub trait UserOpBehavior {
    /// Try to fold the node to a constant, given its input tarvals
    /// (`None` for non-constant inputs).
    fn computed_value(&self, _inputs: &[Option<Tarval>], _modes: &ModeRegistry) -> Option<Tarval> {
        None
    }

    /// Compare two attribute blobs for CSE purposes.
    fn attrs_equal(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }

    /// Hash an attribute blob for CSE purposes.
    fn hash_attrs(&self, attrs: &[u8]) -> u64 {
        use core::hash::{Hash, Hasher};
        let mut h = crate::fx::FxHasher::default();
        attrs.hash(&mut h);
        h.finish()
    }

    /// Verify a node of this opcode; return an error message on violation.
    fn verify(&self, _arity: usize) -> Result<(), String> {
        Ok(())
    }
}

struct UserOpData {
    info: OpInfo,
    behavior: Box<dyn UserOpBehavior>,
}

/// Registry of run-time registered opcodes.
pub struct OpRegistry {
    ops: PrimaryMap<UserOp, UserOpData>,
}

impl OpRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            ops: PrimaryMap::new(),
        }
    }

    /// Register a new opcode with its behaviour; returns its handle.
    pub fn register(&mut self, info: OpInfo, behavior: Box<dyn UserOpBehavior>) -> Opcode {
        Opcode::User(self.ops.push(UserOpData { info, behavior }))
    }

    /// Description of any opcode, built-in or registered.
    pub fn info(&self, op: Opcode) -> &OpInfo {
        match op {
            Opcode::User(u) => &self.ops[u].info,
            _ => op.builtin_info(),
        }
    }

    /// The behaviour vtable of a registered opcode.
    pub fn behavior(&self, op: UserOp) -> &dyn UserOpBehavior {
        &*self.ops[op].behavior
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Opcode::User(u) => write!(f, "{}", u),
            _ => write!(f, "{}", self.builtin_info().name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_properties() {
        assert!(Opcode::Add.is_commutative());
        assert!(!Opcode::Sub.is_commutative());
        assert!(Opcode::Jmp.is_cfop());
        assert!(Opcode::Const.is_constlike());
        assert_eq!(Opcode::Phi.builtin_info().arity, Arity::Dynamic);
        assert_eq!(Opcode::Load.builtin_info().pin, OpPin::ExceptionPinned);
        assert!(Opcode::Call
            .builtin_info()
            .flags
            .contains(OpFlags::USES_MEMORY));
    }

    struct Nop;
    impl UserOpBehavior for Nop {}

    #[test]
    fn user_ops_extend_the_space() {
        let mut reg = OpRegistry::new();
        let op = reg.register(
            OpInfo {
                name: "TargetNop",
                arity: Arity::Zero,
                flags: OpFlags::MACHINE,
                pin: OpPin::Pinned,
            },
            Box::new(Nop),
        );
        assert_eq!(reg.info(op).name, "TargetNop");
        match op {
            Opcode::User(u) => assert!(reg.behavior(u).attrs_equal(b"x", b"x")),
            _ => panic!("expected user opcode"),
        }
        // Built-ins resolve through the same registry.
        assert_eq!(reg.info(Opcode::Add).name, "Add");
    }
}
