//! Compiled-code data model: instruction streams, constant pools and
//! function prototypes.
//!
//! This crate defines the contract between the scope resolver (which emits
//! operand indices) and the interpreter (which trusts them). Nothing here
//! touches the runtime heap; constants are a compile-time representation
//! that the interpreter lowers into values when pushed.

use std::sync::Arc;

use bytes::BufMut;
use smol_str::SmolStr;

pub mod dis;
pub mod op;

pub use op::{Op, Operand};

/// Local slots addressable by a byte operand, per function frame.
pub const LOCAL_MAX: usize = 256;
/// Upvalues addressable by a byte operand, per closure.
pub const UPVALUE_MAX: usize = 256;
/// Size of the interpreter's global-variable slot table.
pub const GLOBAL_MAX: usize = 256;

/// An immutable compiled function.
///
/// Prototypes are shared (`Arc`) between the constant pool that owns them and
/// every closure instantiated over them; runtime function equality is
/// identity of this allocation.
#[derive(Debug)]
pub struct FunctionProto {
    pub name: Option<SmolStr>,
    /// Number of declared parameters. Calls with any other argument count
    /// are fatal.
    pub arity: u8,
    /// Captured-variable descriptors, in upvalue-index order. Keeping these
    /// on the prototype (rather than inline after the `Closure` instruction)
    /// preserves the fixed 0..=2 operand bytes per instruction.
    pub upvalues: Vec<UpvalueDesc>,
    pub chunk: Chunk,
}

impl FunctionProto {
    pub fn new(name: Option<SmolStr>, arity: u8) -> Self {
        FunctionProto {
            name,
            arity,
            upvalues: Vec::new(),
            chunk: Chunk::new(),
        }
    }
}

/// Where a closure finds one captured variable at instantiation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpvalueDesc {
    /// Local slot of the enclosing frame, or upvalue index of the enclosing
    /// closure, depending on `from_parent_local`.
    pub index: u8,
    pub from_parent_local: bool,
}

/// A constant pool entry.
///
/// Reals are stored as raw bits so the pool can be deduplicated with plain
/// equality; function entries compare by identity.
#[derive(Debug, Clone)]
pub enum Constant {
    Int(i64),
    Real(u64),
    Str(SmolStr),
    Function(Arc<FunctionProto>),
}

impl Constant {
    pub fn real(v: f64) -> Constant {
        Constant::Real(v.to_bits())
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Constant::Real(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Real(a), Constant::Real(b)) => a == b,
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Function(a), Constant::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// An instruction stream plus its constant pool.
#[derive(Debug, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    /// Emit an instruction with no operand.
    pub fn emit(&mut self, op: Op) {
        debug_assert_eq!(op.operand(), Operand::None);
        self.code.put_u8(op as u8);
    }

    /// Emit an instruction with a single byte operand.
    pub fn emit_with_byte(&mut self, op: Op, operand: u8) {
        debug_assert_eq!(op.operand(), Operand::Byte);
        self.code.put_u8(op as u8);
        self.code.put_u8(operand);
    }

    /// Emit an instruction with two byte operands.
    pub fn emit_with_bytes(&mut self, op: Op, a: u8, b: u8) {
        debug_assert_eq!(op.operand(), Operand::TwoBytes);
        self.code.put_u8(op as u8);
        self.code.put_u8(a);
        self.code.put_u8(b);
    }

    /// Emit a forward jump with a placeholder distance. Returns the offset
    /// of the distance bytes for a later `patch_jump`.
    pub fn emit_jump(&mut self, op: Op) -> usize {
        debug_assert_eq!(op.operand(), Operand::Short);
        self.code.put_u8(op as u8);
        self.code.put_u16(u16::MAX);
        self.code.len() - 2
    }

    /// Patch a forward jump to land just past the current end of the stream.
    ///
    /// # Panics
    ///
    /// Panics if the jump distance exceeds 16 bits.
    pub fn patch_jump(&mut self, offset: usize) {
        let distance = self.code.len() - offset - 2;
        assert!(distance <= u16::MAX as usize, "jump distance exceeds 16 bits");
        self.code[offset..offset + 2].copy_from_slice(&(distance as u16).to_be_bytes());
    }

    /// Emit a backward jump to `target`, an offset earlier in the stream.
    pub fn emit_loop(&mut self, target: usize) {
        self.code.put_u8(Op::Loop as u8);
        // distance is measured from the end of this instruction
        let distance = self.code.len() + 2 - target;
        assert!(distance <= u16::MAX as usize, "loop distance exceeds 16 bits");
        self.code.put_u16(distance as u16);
    }

    /// Intern a constant, reusing an existing pool slot when possible.
    ///
    /// # Panics
    ///
    /// Panics if the pool outgrows a byte-sized operand.
    pub fn add_constant(&mut self, constant: Constant) -> u8 {
        if let Some(idx) = self.constants.iter().position(|c| c == &constant) {
            return idx as u8;
        }
        let idx = self.constants.len();
        assert!(idx <= u8::MAX as usize, "too many constants in one chunk");
        self.constants.push(constant);
        idx as u8
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }
}
