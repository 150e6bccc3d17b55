//! Heap objects and the arena that owns them.
//!
//! Objects live in a generational [`SlotMap`]; a [`Handle`] is a copyable
//! key into it. Freeing an object invalidates its handle, so a use-after-free
//! is caught as a missing key instead of corrupting memory. The object graph
//! never stores references, only handles, which keeps the collector free of
//! unsafe code.

use std::mem::size_of;
use std::sync::Arc;

use slotmap::{SecondaryMap, SlotMap};
use smol_str::SmolStr;

use sable_bytecode::FunctionProto;

use crate::error::Fault;
use crate::value::Value;

slotmap::new_key_type! {
    /// A non-owning reference to a heap object.
    pub struct Handle;
}

/// A host function callable from bytecode.
///
/// Natives receive the heap so they can inspect and allocate objects. Their
/// allocations never trigger a collection cycle; argument and return values
/// are rooted by the caller.
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, Fault>;

/// Every kind of heap object. The enum is closed on purpose: the collector
/// and the equality and stringify walks all match exhaustively, so adding a
/// kind forces every traversal to be revisited.
#[derive(Debug)]
pub enum Obj {
    Str(String),
    Array(Vec<Value>),
    /// Key-value pairs in insertion order. Lookup is linear with structural
    /// key equality.
    Dict(Vec<(Value, Value)>),
    Function(Arc<FunctionProto>),
    Closure(Closure),
    Upvalue(UpvalueState),
    Native(Native),
    Class(Class),
    BoundMethod(BoundMethod),
    Enum(Enum),
    /// A first-class alias of a storage slot.
    Ref(Slot),
}

#[derive(Debug)]
pub struct Closure {
    pub proto: Arc<FunctionProto>,
    pub upvalues: Box<[Handle]>,
}

/// A captured variable. While the variable is still live on the stack the
/// upvalue stays `Open` and indexes the absolute stack slot; when the slot
/// is about to die the value migrates into the `Closed` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct Native {
    pub name: SmolStr,
    pub fun: NativeFn,
}

/// A class object. Members and parents keep declaration order, which makes
/// inherited-member lookup deterministic: own members first, then each
/// parent depth-first in the order written.
#[derive(Debug)]
pub struct Class {
    pub name: SmolStr,
    pub members: Vec<(SmolStr, Value)>,
    pub parents: Vec<(SmolStr, Handle)>,
}

/// A closure paired with the class it was fetched from, so that calling it
/// rebinds slot 0 to the receiver.
#[derive(Debug, Clone, Copy)]
pub struct BoundMethod {
    pub receiver: Handle,
    pub method: Handle,
}

#[derive(Debug)]
pub struct Enum {
    pub name: SmolStr,
    pub variants: Vec<(SmolStr, Value)>,
}

/// The storage location a [`Obj::Ref`] aliases. Stack slots are absolute
/// indices, so a ref must not outlive the frame that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Stack(usize),
    Global(usize),
}

/// Collection is first considered once this many bytes are live.
pub const INIT_GC_THRESHOLD: usize = 100 * 1024;

/// The object arena plus the collector's bookkeeping.
#[derive(Debug)]
pub struct Heap {
    pub(crate) objects: SlotMap<Handle, Obj>,
    bytes_allocated: usize,
    next_gc: usize,
    /// Lower bound for `next_gc` when the threshold is recomputed after a
    /// sweep.
    gc_floor: usize,
    /// Mark bits for the current cycle, kept out of the objects themselves.
    pub(crate) marked: SecondaryMap<Handle, ()>,
    /// Worklist of marked objects whose children are not yet marked.
    pub(crate) gray: Vec<Handle>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            objects: SlotMap::with_key(),
            bytes_allocated: 0,
            next_gc: INIT_GC_THRESHOLD,
            gc_floor: INIT_GC_THRESHOLD,
            marked: SecondaryMap::new(),
            gray: Vec::new(),
        }
    }

    /// Moves `obj` into the arena and returns its handle. Never collects;
    /// the interpreter checks [`Heap::wants_gc`] *before* building the
    /// object so that a cycle can't reap a half-linked allocation.
    pub fn alloc(&mut self, obj: Obj) -> Handle {
        self.bytes_allocated += Self::obj_size(&obj);
        self.objects.insert(obj)
    }

    /// Whether allocating `upcoming_bytes` more would cross the threshold.
    pub fn wants_gc(&self, upcoming_bytes: usize) -> bool {
        self.bytes_allocated + upcoming_bytes > self.next_gc
    }

    /// Panics on a stale handle. The collector only frees unreachable
    /// objects, so a stale handle here is a rooting bug, not a user error.
    pub fn get(&self, handle: Handle) -> &Obj {
        self.objects.get(handle).expect("stale object handle")
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut Obj {
        self.objects.get_mut(handle).expect("stale object handle")
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.objects.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    /// Lowers the collection threshold. The new value also becomes the floor
    /// used when the threshold is recomputed after a sweep. Mostly useful for
    /// exercising the collector without allocating 100 KiB of garbage first.
    pub fn set_gc_threshold(&mut self, bytes: usize) {
        self.next_gc = bytes;
        self.gc_floor = bytes;
    }

    pub(crate) fn rebuild_accounting(&mut self) {
        self.bytes_allocated = self.objects.values().map(Self::obj_size).sum();
        self.next_gc = self.gc_floor.max(self.bytes_allocated + self.bytes_allocated / 2);
    }

    /// Shallow size estimate used for the collection trigger. It only needs
    /// to be monotone in the real footprint, not exact.
    pub(crate) fn obj_size(obj: &Obj) -> usize {
        let payload = match obj {
            Obj::Str(s) => s.capacity(),
            Obj::Array(elems) => elems.capacity() * size_of::<Value>(),
            Obj::Dict(pairs) => pairs.capacity() * size_of::<(Value, Value)>(),
            Obj::Closure(c) => c.upvalues.len() * size_of::<Handle>(),
            Obj::Class(c) => {
                c.members.capacity() * size_of::<(SmolStr, Value)>()
                    + c.parents.capacity() * size_of::<(SmolStr, Handle)>()
            }
            Obj::Enum(e) => e.variants.capacity() * size_of::<(SmolStr, Value)>(),
            Obj::Function(_)
            | Obj::Upvalue(_)
            | Obj::Native(_)
            | Obj::BoundMethod(_)
            | Obj::Ref(_) => 0,
        };
        size_of::<Obj>() + payload
    }

    /// Structural equality over values.
    ///
    /// Scalars compare by kind and payload (an `Int` never equals a `Real`).
    /// Strings, arrays, dicts, classes and enums compare by content;
    /// functions, closures and bound methods by the identity of their
    /// compiled code; everything else by handle identity. Values of
    /// different kinds are never equal.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        self.values_equal_in(a, b, &mut Vec::new())
    }

    pub fn objects_equal(&self, a: Handle, b: Handle) -> bool {
        self.objects_equal_in(a, b, &mut Vec::new())
    }

    fn values_equal_in(&self, a: Value, b: Value, seen: &mut Vec<(Handle, Handle)>) -> bool {
        match (a, b) {
            (Value::Obj(a), Value::Obj(b)) => self.objects_equal_in(a, b, seen),
            _ => a == b,
        }
    }

    /// `seen` holds the handle pairs currently being compared further up the
    /// walk. Hitting one again means the comparison of that pair depends on
    /// itself; such a pair is equal iff everything else about it matches, so
    /// the recursion is cut short with `true`.
    fn objects_equal_in(&self, a: Handle, b: Handle, seen: &mut Vec<(Handle, Handle)>) -> bool {
        if a == b {
            return true;
        }
        if seen.contains(&(a, b)) {
            return true;
        }
        seen.push((a, b));
        let equal = match (self.get(a), self.get(b)) {
            (Obj::Str(a), Obj::Str(b)) => a == b,
            (Obj::Array(a), Obj::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(&x, &y)| self.values_equal_in(x, y, seen))
            }
            (Obj::Dict(a), Obj::Dict(b)) => {
                a.len() == b.len()
                    && a.iter().all(|&(k, v)| {
                        b.iter().any(|&(k2, v2)| {
                            self.values_equal_in(k, k2, seen)
                                && self.values_equal_in(v, v2, seen)
                        })
                    })
            }
            (Obj::Function(a), Obj::Function(b)) => Arc::ptr_eq(a, b),
            (Obj::Closure(a), Obj::Closure(b)) => Arc::ptr_eq(&a.proto, &b.proto),
            (Obj::BoundMethod(a), Obj::BoundMethod(b)) => {
                a.receiver == b.receiver && self.objects_equal_in(a.method, b.method, seen)
            }
            (Obj::Class(a), Obj::Class(b)) => {
                a.name == b.name
                    && a.members.len() == b.members.len()
                    && a.members.iter().all(|(k, v)| {
                        b.members
                            .iter()
                            .any(|(k2, v2)| k == k2 && self.values_equal_in(*v, *v2, seen))
                    })
                    && a.parents == b.parents
            }
            (Obj::Enum(a), Obj::Enum(b)) => {
                a.name == b.name
                    && a.variants.len() == b.variants.len()
                    && a.variants.iter().all(|(k, v)| {
                        b.variants
                            .iter()
                            .any(|(k2, v2)| k == k2 && self.values_equal_in(*v, *v2, seen))
                    })
            }
            (Obj::Ref(a), Obj::Ref(b)) => a == b,
            _ => false,
        };
        seen.pop();
        equal
    }

    /// Renders a value for diagnostics and `io.print`.
    pub fn stringify(&self, value: Value) -> String {
        self.stringify_in(value, &mut Vec::new())
    }

    fn stringify_in(&self, value: Value, seen: &mut Vec<Handle>) -> String {
        match value {
            Value::Null => "null".into(),
            Value::Int(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Obj(h) => self.stringify_obj(h, seen),
        }
    }

    /// `seen` holds the handles currently being rendered further up the
    /// walk; an object that contains itself renders as `...` at the point of
    /// recurrence.
    fn stringify_obj(&self, handle: Handle, seen: &mut Vec<Handle>) -> String {
        if seen.contains(&handle) {
            return "...".into();
        }
        seen.push(handle);
        let rendered = match self.get(handle) {
            Obj::Str(s) => s.clone(),
            Obj::Array(elems) => {
                let inner: Vec<String> =
                    elems.iter().map(|&v| self.stringify_in(v, seen)).collect();
                format!("[{}]", inner.join(","))
            }
            Obj::Dict(pairs) => {
                let inner: Vec<String> = pairs
                    .iter()
                    .map(|&(k, v)| {
                        format!("{}:{}", self.stringify_in(k, seen), self.stringify_in(v, seen))
                    })
                    .collect();
                format!("{{{}}}", inner.join(","))
            }
            Obj::Function(proto) => match &proto.name {
                Some(name) => format!("<fn {}>", name),
                None => "<fn>".into(),
            },
            Obj::Closure(c) => match &c.proto.name {
                Some(name) => format!("<fn {}>", name),
                None => "<fn>".into(),
            },
            Obj::Upvalue(UpvalueState::Closed(v)) => self.stringify_in(*v, seen),
            Obj::Upvalue(UpvalueState::Open(slot)) => format!("<upvalue @{}>", slot),
            Obj::Native(n) => format!("<native fn {}>", n.name),
            Obj::Class(c) => {
                let members: Vec<String> = c
                    .members
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, self.stringify_in(*v, seen)))
                    .collect();
                format!("class {} {{{}}}", c.name, members.join(","))
            }
            Obj::BoundMethod(b) => self.stringify_obj(b.method, seen),
            Obj::Enum(e) => {
                let variants: Vec<String> = e
                    .variants
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, self.stringify_in(*v, seen)))
                    .collect();
                format!("enum {} {{{}}}", e.name, variants.join(","))
            }
            Obj::Ref(_) => "<ref>".into(),
        };
        seen.pop();
        rendered
    }

    /// A short kind name for fault messages.
    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Real(_) => "real",
            Value::Bool(_) => "bool",
            Value::Obj(h) => match self.get(h) {
                Obj::Str(_) => "str",
                Obj::Array(_) => "array",
                Obj::Dict(_) => "dict",
                Obj::Function(_) => "function",
                Obj::Closure(_) => "function",
                Obj::Upvalue(_) => "upvalue",
                Obj::Native(_) => "native function",
                Obj::Class(_) => "class",
                Obj::BoundMethod(_) => "bound method",
                Obj::Enum(_) => "enum",
                Obj::Ref(_) => "ref",
            },
        }
    }

    /// Looks up `name` in a class, own members first, then parents in
    /// declaration order. A parent's own name resolves to the parent class
    /// itself.
    pub fn class_member(&self, class: Handle, name: &str) -> Option<Value> {
        let Obj::Class(c) = self.get(class) else {
            return None;
        };
        if let Some((_, v)) = c.members.iter().find(|(k, _)| k == name) {
            return Some(*v);
        }
        self.parent_member_of(c, name)
    }

    /// Like [`Heap::class_member`] but skips the class's own members, for
    /// explicit base access.
    pub fn class_parent_member(&self, class: Handle, name: &str) -> Option<Value> {
        let Obj::Class(c) = self.get(class) else {
            return None;
        };
        self.parent_member_of(c, name)
    }

    fn parent_member_of(&self, class: &Class, name: &str) -> Option<Value> {
        for (parent_name, parent) in &class.parents {
            if parent_name == name {
                return Some(Value::Obj(*parent));
            }
            if let Some(v) = self.class_member(*parent, name) {
                return Some(v);
            }
        }
        None
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test;
