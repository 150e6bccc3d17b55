//! Tracing mark-sweep collection.
//!
//! A cycle runs synchronously inside [`Interpreter::alloc`] whenever the
//! live-byte estimate crosses the heap's threshold, and always *before* the
//! triggering object is inserted. Roots are the value stack, every frame's
//! closure, the open-upvalue list and the global slots. Mark bits live in a
//! side table keyed by handle, not in the objects.

use tracing::debug;

use crate::heap::{Heap, Obj, UpvalueState};
use crate::interp::Interpreter;
use crate::value::Value;

impl Interpreter {
    /// Runs one full mark-sweep cycle.
    pub fn collect(&mut self) {
        let before_objects = self.heap.len();
        let before_bytes = self.heap.bytes_allocated();

        self.heap.begin_cycle();
        for i in 0..self.stack.len() {
            self.heap.mark_value(self.stack[i]);
        }
        for i in 0..self.frames.len() {
            self.heap.mark_object(self.frames[i].closure);
        }
        for i in 0..self.open_upvalues.len() {
            self.heap.mark_object(self.open_upvalues[i].1);
        }
        for i in 0..self.globals.len() {
            self.heap.mark_value(self.globals[i]);
        }
        self.heap.trace_gray();
        let freed = self.heap.sweep();

        debug!(
            freed,
            live = self.heap.len(),
            before_bytes,
            after_bytes = self.heap.bytes_allocated(),
            next_gc = self.heap.next_gc(),
            "collected {} of {} objects",
            freed,
            before_objects,
        );
    }
}

impl Heap {
    pub(crate) fn begin_cycle(&mut self) {
        self.marked.clear();
        self.gray.clear();
    }

    pub(crate) fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle);
        }
    }

    pub(crate) fn mark_object(&mut self, handle: crate::heap::Handle) {
        if self.marked.insert(handle, ()).is_none() {
            self.gray.push(handle);
        }
    }

    /// Drains the gray worklist, marking every child of every marked object.
    pub(crate) fn trace_gray(&mut self) {
        while let Some(handle) = self.gray.pop() {
            self.blacken(handle);
        }
    }

    fn blacken(&mut self, handle: crate::heap::Handle) {
        let mut values: Vec<Value> = Vec::new();
        let mut handles: Vec<crate::heap::Handle> = Vec::new();
        match self.objects.get(handle).expect("blackening a freed object") {
            Obj::Str(_) | Obj::Native(_) => {}
            // function constants are compile-time data, not heap objects
            Obj::Function(_) => {}
            // an open upvalue's slot is on the stack, which is a root;
            // a ref's slot likewise
            Obj::Upvalue(UpvalueState::Open(_)) | Obj::Ref(_) => {}
            Obj::Upvalue(UpvalueState::Closed(v)) => values.push(*v),
            Obj::Array(elems) => values.extend_from_slice(elems),
            Obj::Dict(pairs) => {
                for &(k, v) in pairs {
                    values.push(k);
                    values.push(v);
                }
            }
            Obj::Closure(c) => handles.extend_from_slice(&c.upvalues),
            Obj::Class(c) => {
                for (_, v) in &c.members {
                    values.push(*v);
                }
                for &(_, p) in &c.parents {
                    handles.push(p);
                }
            }
            Obj::BoundMethod(b) => {
                handles.push(b.receiver);
                handles.push(b.method);
            }
            Obj::Enum(e) => {
                for (_, v) in &e.variants {
                    values.push(*v);
                }
            }
        }
        for v in values {
            self.mark_value(v);
        }
        for h in handles {
            self.mark_object(h);
        }
    }

    /// Frees every unmarked object, rebuilds the byte estimate from the
    /// survivors and raises the threshold to 1.5x the live size. The mark
    /// table is cleared so stale bits can never leak into the next cycle.
    pub(crate) fn sweep(&mut self) -> usize {
        let before = self.objects.len();
        let marked = std::mem::take(&mut self.marked);
        self.objects.retain(|handle, _| marked.contains_key(handle));
        self.marked = marked;
        self.marked.clear();
        self.rebuild_accounting();
        before - self.objects.len()
    }
}

#[cfg(test)]
mod test;
