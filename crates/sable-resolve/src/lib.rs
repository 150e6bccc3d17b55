//! Compile-time scope resolution.
//!
//! Maps every identifier occurrence to a `(kind, index)` storage location.
//! The indices emitted here are the contract the interpreter trusts without
//! re-validation: global indices address the VM's global slot table, local
//! indices are relative to a call frame's base, and upvalue indices address
//! the enclosing closure's capture array. Symbol tables exist only during
//! compilation of one function and are discarded once its chunk is emitted.

pub mod error;
pub mod table;


use fnv::FnvHashMap;
use smol_str::SmolStr;

pub use error::ResolveError;
pub use table::{Discarded, Mutability, Symbol, SymbolKind, SymbolTable};

/// The process-wide pool of global variable slots.
///
/// One pool is shared (via `Rc<RefCell<_>>`) by every symbol table of a
/// compilation unit; a slot, once reserved for a name, stays reserved for
/// the lifetime of the compiled unit.
#[derive(Debug, Default)]
pub struct GlobalPool {
    names: Vec<SmolStr>,
    index: FnvHashMap<SmolStr, u8>,
}

impl GlobalPool {
    pub fn new() -> Self {
        GlobalPool::default()
    }

    /// Reserve a fresh slot for `name`; an existing slot is a redeclaration.
    pub fn define(&mut self, name: &str) -> Result<u8, ResolveError> {
        if self.index.contains_key(name) {
            return Err(ResolveError::AlreadyDeclared(name.into()));
        }
        self.insert(name)
    }

    /// Find the slot for `name`, reserving a new one if it has none yet.
    pub fn intern(&mut self, name: &str) -> Result<u8, ResolveError> {
        if let Some(&idx) = self.index.get(name) {
            return Ok(idx);
        }
        self.insert(name)
    }

    fn insert(&mut self, name: &str) -> Result<u8, ResolveError> {
        if self.names.len() >= sable_bytecode::GLOBAL_MAX {
            return Err(ResolveError::TooManyGlobals);
        }
        let idx = self.names.len() as u8;
        self.names.push(name.into());
        self.index.insert(name.into(), idx);
        Ok(idx)
    }

    pub fn get(&self, name: &str) -> Option<u8> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
