//! The execution core: value model, object heap, tracing garbage collector
//! and the bytecode interpreter.
//!
//! Everything runs single-threaded. One [`Interpreter`] owns the heap, the
//! value stack, the call-frame stack and the global table; collection cycles
//! are synchronous and stop the world. There is no global state, so several
//! independent interpreters can coexist in one process.

pub mod error;
pub mod gc;
pub mod heap;
pub mod interp;
pub mod stdlib;
pub mod value;

pub use error::Fault;
pub use heap::{Handle, Heap, NativeFn, Obj};
pub use interp::Interpreter;
pub use value::Value;

/// Maximum call depth. Exceeding it is a fatal fault.
pub const FRAMES_MAX: usize = 64;
/// Capacity of the value stack. Exceeding it is a fatal fault.
pub const STACK_MAX: usize = FRAMES_MAX * sable_bytecode::LOCAL_MAX;
