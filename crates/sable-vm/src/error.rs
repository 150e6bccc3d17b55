use thiserror::Error;

/// A fatal runtime fault.
///
/// There is no user-level catch construct; every fault aborts the run with
/// a diagnostic. Internal invariant violations (stale handles, corrupted
/// operand streams) are *not* faults: they panic, because the interpreter's
/// own state can no longer be trusted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Fault {
    #[error("invalid operands for '{op}': {lhs} {op} {rhs}")]
    BinaryType {
        op: &'static str,
        lhs: String,
        rhs: String,
    },
    #[error("invalid operand for '{op}': {operand}")]
    UnaryType {
        op: &'static str,
        operand: String,
    },
    #[error("expected {expected} argument(s) but got {got}")]
    ArityMismatch { expected: u8, got: u8 },
    #[error("value stack overflow")]
    StackOverflow,
    #[error("call stack overflow")]
    FrameOverflow,
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("invalid index: {0}")]
    BadIndex(String),
    #[error("cannot index into {0}")]
    NotIndexable(String),
    #[error("no member '{member}' in {owner}")]
    MissingMember { owner: String, member: String },
    #[error("no such key in dict: {0}")]
    MissingKey(String),
    #[error("not a class or enum: {0}")]
    NotAClass(String),
    #[error("cannot call {0}")]
    InvalidCallee(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    Native(String),
}
