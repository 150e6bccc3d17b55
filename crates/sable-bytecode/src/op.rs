use enum_ordinalize::Ordinalize;

/// The shape of the operand bytes following an opcode.
///
/// Every instruction is an opcode byte plus zero, one or two operand bytes.
/// Jump distances are the only 16-bit operands and are encoded big-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    None,
    /// A single byte: a slot, a constant index or a count.
    Byte,
    /// Two independent bytes (e.g. a member count and a parent count).
    TwoBytes,
    /// A 16-bit big-endian jump distance.
    Short,
}

macro_rules! define_ops {
    (
        $(#[$meta:meta])*
        $ty_vis:vis $type:ident,
        $(
            $(#[$variant_meta:meta])*
            $name:ident $(($operand:ident))?
        ),* $(,)?
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Ordinalize)]
        #[repr(u8)]
        $ty_vis enum $type {$(
            $(#[$variant_meta])*
            $name
        ),*}

        impl $type {
            /// Returns the operand shape of this instruction.
            pub fn operand(self) -> Operand {
                #[allow(path_statements)]
                match self {$(
                    $type::$name => {
                        Operand::None
                        $(; Operand::$operand)?
                    }
                ),*}
            }
        }

        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {$(
                    Self::$name => write!(f, stringify!($name))
                ),*}
            }
        }
    };
}

// Instruction definition.
//
// The numeric encoding is an implementation detail of this crate; only the
// `Op <-> u8` round trip through `ordinal`/`from_ordinal` is relied upon.
define_ops! {
    /// The opcode set executed by the interpreter.
    pub Op,

    // constants and literals
    /// Push the constant at the operand index of the pool
    Constant(Byte),
    /// Push null
    Null,
    /// Push boolean true
    True,
    /// Push boolean false
    False,

    // stack manipulation
    /// Pop the stack top
    Pop,
    /// Duplicate the stack top
    Dup,

    // variable load/stores
    /// Push the global slot at the operand index
    GetGlobal(Byte),
    /// Pop the stack top into the global slot at the operand index
    SetGlobal(Byte),
    /// Push the frame-relative local slot at the operand index
    GetLocal(Byte),
    /// Store the stack top (without popping) into the local slot
    SetLocal(Byte),
    /// Push the current closure's upvalue at the operand index
    GetUpvalue(Byte),
    /// Store the stack top (without popping) through the upvalue
    SetUpvalue(Byte),
    /// Close any upvalue pointing at the stack top, then pop it
    CloseUpvalue,

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    // integer-only bit operations
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,

    // logic and unary
    /// Boolean and; both operands must be booleans
    And,
    /// Boolean or; both operands must be booleans
    Or,
    /// Boolean negation
    Not,
    /// Numeric negation
    Neg,
    /// Integer factorial
    Factorial,

    // comparisons
    Less,
    Greater,
    /// Structural equality; defined for every value kind
    Equal,

    // compound construction
    /// Pop `n` elements into a new array
    Array(Byte),
    /// Pop `n` key/value pairs into a new dict
    Dict(Byte),
    /// Pop an index and a container, push the element
    GetIndex,
    /// Pop an index, a container and a value; write the element
    SetIndex,

    // control flow
    /// Unconditional forward jump
    Jump(Short),
    /// Forward jump if the stack top (peeked, not popped) is falsey
    JumpIfFalse(Short),
    /// Unconditional backward jump
    Loop(Short),

    // references
    /// Push a reference object aliasing the local slot at the operand index
    RefLocal(Byte),
    /// Push a reference object aliasing the global slot at the operand index
    RefGlobal(Byte),

    // functions
    /// Call the value below the `n` topmost arguments
    Call(Byte),
    /// Instantiate a closure over the function constant at the operand index
    Closure(Byte),
    /// Return the `n` topmost values to the caller
    Return(Byte),

    // classes and enums
    /// Assemble a class from the popped name, parent pairs and member pairs.
    /// Operands are the member count and the parent count.
    Class(TwoBytes),
    /// Assemble an enum from the popped name and variant pairs
    Enum(Byte),
    /// Pop a member name, replace the receiver below it with the member
    GetProperty,
    /// Pop a member name and a receiver, store the (peeked) stack top
    SetProperty,
    /// Pop a member name and a receiver, resolve through parent classes only
    GetBase,
}

impl Op {
    /// Decode an opcode byte. `None` for bytes outside the opcode set.
    pub fn decode(byte: u8) -> Option<Op> {
        Op::from_ordinal(byte)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordinal_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Op::decode(byte) {
                assert_eq!(op.ordinal(), byte);
            }
        }
        assert_eq!(Op::decode(Op::GetBase.ordinal()), Some(Op::GetBase));
    }

    #[test]
    fn operand_shapes() {
        assert_eq!(Op::Pop.operand(), Operand::None);
        assert_eq!(Op::Constant.operand(), Operand::Byte);
        assert_eq!(Op::Class.operand(), Operand::TwoBytes);
        assert_eq!(Op::JumpIfFalse.operand(), Operand::Short);
    }
}
