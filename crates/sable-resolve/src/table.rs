use std::cell::{Cell, RefCell};
use std::rc::Rc;

use sable_bytecode::{UpvalueDesc, LOCAL_MAX, UPVALUE_MAX};
use smol_str::SmolStr;
use tracing::trace;

use crate::error::ResolveError;
use crate::GlobalPool;

/// Where a resolved identifier lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// A slot in the global table.
    Global(u8),
    /// A slot relative to the current frame's base.
    Local(u8),
    /// An index into the current closure's upvalue array.
    Upvalue(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Mutable,
    Const,
}

/// The result of defining or resolving one identifier occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: SmolStr,
    pub kind: SymbolKind,
    pub mutability: Mutability,
}

#[derive(Debug)]
struct Local {
    name: SmolStr,
    depth: u8,
    mutability: Mutability,
    /// Set when an inner function captures this slot; the block-exit code
    /// must then close the upvalue instead of plainly popping the slot.
    captured: Cell<bool>,
}

/// A local discarded by `end_scope`, in reverse declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discarded {
    pub slot: u8,
    pub captured: bool,
}

/// One function's symbol table, chained to the enclosing function's table.
///
/// Block scopes inside the function only bump `scope_depth`; a new table is
/// created per function nesting level. Resolution walks the chain outward,
/// capturing enclosing locals as upvalues on the way back in. The upvalue
/// list sits behind a `RefCell` because capture mutates tables that the
/// chain holds by shared reference.
#[derive(Debug)]
pub struct SymbolTable<'a> {
    enclosing: Option<&'a SymbolTable<'a>>,
    globals: Rc<RefCell<GlobalPool>>,
    locals: Vec<Local>,
    upvalues: RefCell<Vec<UpvalueDesc>>,
    scope_depth: u8,
}

impl<'a> SymbolTable<'a> {
    /// The table for top-level script code. Names declared at depth zero
    /// become globals.
    pub fn script(globals: Rc<RefCell<GlobalPool>>) -> Self {
        Self::with_enclosing(globals, None)
    }

    /// A table for a function body nested in `enclosing`'s function.
    pub fn function(enclosing: &'a SymbolTable<'a>) -> Self {
        Self::with_enclosing(enclosing.globals.clone(), Some(enclosing))
    }

    fn with_enclosing(
        globals: Rc<RefCell<GlobalPool>>,
        enclosing: Option<&'a SymbolTable<'a>>,
    ) -> Self {
        // slot 0 of every frame holds the callee; keep it out of reach
        // of user declarations.
        let reserved = Local {
            name: SmolStr::default(),
            depth: 0,
            mutability: Mutability::Const,
            captured: Cell::new(false),
        };
        SymbolTable {
            enclosing,
            globals,
            locals: vec![reserved],
            upvalues: RefCell::new(Vec::new()),
            scope_depth: 0,
        }
    }

    pub fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    /// Leave the innermost block scope, discarding the symbols declared in
    /// it. Slot indices freed here may be reused by later sibling scopes.
    pub fn end_scope(&mut self) -> Vec<Discarded> {
        debug_assert!(self.scope_depth > 0, "end_scope without begin_scope");
        let mut discarded = Vec::new();
        while let Some(local) = self.locals.last() {
            if local.depth < self.scope_depth {
                break;
            }
            discarded.push(Discarded {
                slot: (self.locals.len() - 1) as u8,
                captured: local.captured.get(),
            });
            self.locals.pop();
        }
        self.scope_depth -= 1;
        discarded
    }

    /// Declare a new symbol at the current scope depth.
    ///
    /// Redefinition at the same depth is an error; shadowing an outer scope
    /// is permitted.
    pub fn define(&mut self, name: &str, mutability: Mutability) -> Result<Symbol, ResolveError> {
        if self.enclosing.is_none() && self.scope_depth == 0 {
            let idx = self.globals.borrow_mut().define(name)?;
            return Ok(Symbol {
                name: name.into(),
                kind: SymbolKind::Global(idx),
                mutability,
            });
        }

        for local in self.locals.iter().rev() {
            if local.depth < self.scope_depth {
                break;
            }
            if local.name == name {
                return Err(ResolveError::AlreadyDeclared(name.into()));
            }
        }
        if self.locals.len() >= LOCAL_MAX {
            return Err(ResolveError::TooManyLocals);
        }

        let slot = self.locals.len() as u8;
        self.locals.push(Local {
            name: name.into(),
            depth: self.scope_depth,
            mutability,
            captured: Cell::new(false),
        });
        Ok(Symbol {
            name: name.into(),
            kind: SymbolKind::Local(slot),
            mutability,
        })
    }

    /// Map an identifier occurrence to its storage location.
    ///
    /// Searches the current function innermost-first, then captures from
    /// enclosing functions, and finally falls through to a global slot,
    /// creating one if the name was never declared anywhere.
    pub fn resolve(&self, name: &str) -> Result<Symbol, ResolveError> {
        if let Some((slot, local)) = self.resolve_local(name) {
            return Ok(Symbol {
                name: name.into(),
                kind: SymbolKind::Local(slot),
                mutability: local.mutability,
            });
        }
        if let Some((idx, mutability)) = self.capture(name)? {
            return Ok(Symbol {
                name: name.into(),
                kind: SymbolKind::Upvalue(idx),
                mutability,
            });
        }
        let idx = self.globals.borrow_mut().intern(name)?;
        Ok(Symbol {
            name: name.into(),
            kind: SymbolKind::Global(idx),
            mutability: Mutability::Mutable,
        })
    }

    fn resolve_local(&self, name: &str) -> Option<(u8, &Local)> {
        self.locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot as u8, local))
    }

    /// Capture `name` from an enclosing function, adding an upvalue
    /// descriptor to this table. Returns `None` if no enclosing function
    /// declares the name (it is then a global).
    fn capture(&self, name: &str) -> Result<Option<(u8, Mutability)>, ResolveError> {
        let Some(enclosing) = self.enclosing else {
            return Ok(None);
        };

        if let Some((slot, local)) = enclosing.resolve_local(name) {
            local.captured.set(true);
            trace!(name, slot, "captured enclosing local");
            let idx = self.add_upvalue(UpvalueDesc {
                index: slot,
                from_parent_local: true,
            })?;
            return Ok(Some((idx, local.mutability)));
        }

        if let Some((parent_idx, mutability)) = enclosing.capture(name)? {
            let idx = self.add_upvalue(UpvalueDesc {
                index: parent_idx,
                from_parent_local: false,
            })?;
            return Ok(Some((idx, mutability)));
        }

        Ok(None)
    }

    fn add_upvalue(&self, desc: UpvalueDesc) -> Result<u8, ResolveError> {
        let mut upvalues = self.upvalues.borrow_mut();
        if let Some(idx) = upvalues.iter().position(|existing| *existing == desc) {
            return Ok(idx as u8);
        }
        if upvalues.len() >= UPVALUE_MAX {
            return Err(ResolveError::TooManyUpvalues);
        }
        upvalues.push(desc);
        Ok((upvalues.len() - 1) as u8)
    }

    /// The captured-variable descriptors for the function's prototype, in
    /// upvalue-index order.
    pub fn upvalue_descriptors(&self) -> Vec<UpvalueDesc> {
        self.upvalues.borrow().clone()
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }
}
