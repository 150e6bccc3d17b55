//! The bytecode dispatch loop.
//!
//! One instruction is an opcode byte plus its operand bytes, read through
//! the active [`Frame`]'s `Buf` cursor. Operand indices are trusted: the
//! resolver guarantees they are in range, so a malformed stream is a panic,
//! not a fault.
//!
//! Allocation discipline: any instruction that allocates keeps its operands
//! on the stack (peeked, not popped) until the new object exists, so a
//! collection triggered by the allocation can still see them.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Buf;
use tracing::trace;

use sable_bytecode::{Constant, FunctionProto, Op, GLOBAL_MAX};

use crate::error::Fault;
use crate::heap::{BoundMethod, Class, Closure, Enum, Heap, Obj, Slot, UpvalueState};
use crate::value::Value;
use crate::{stdlib, FRAMES_MAX, STACK_MAX};


/// One activation record. `base` is the absolute stack slot of the callee,
/// which doubles as local slot 0.
pub(crate) struct Frame {
    pub closure: crate::heap::Handle,
    pub proto: Arc<FunctionProto>,
    pub ip: usize,
    pub base: usize,
}

impl Buf for Frame {
    fn remaining(&self) -> usize {
        self.proto.chunk.code.len() - self.ip
    }

    fn chunk(&self) -> &[u8] {
        &self.proto.chunk.code[self.ip..]
    }

    fn advance(&mut self, cnt: usize) {
        self.ip += cnt;
    }
}

/// The execution context: heap, value stack, call frames, global slots and
/// the open-upvalue list. Nothing is shared between instances.
pub struct Interpreter {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) globals: Vec<Value>,
    /// Upvalues still pointing into the stack, sorted by slot.
    pub(crate) open_upvalues: Vec<(usize, crate::heap::Handle)>,
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter {
            heap: Heap::new(),
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: vec![Value::Null; GLOBAL_MAX],
            open_upvalues: Vec::new(),
        }
    }

    /// An interpreter with the builtin namespaces installed in the global
    /// slots the resolver reserves for them.
    pub fn with_stdlib() -> Interpreter {
        let mut vm = Interpreter::new();
        stdlib::install(&mut vm);
        vm
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn global(&self, idx: usize) -> Value {
        self.globals[idx]
    }

    pub fn set_global(&mut self, idx: usize, value: Value) {
        self.globals[idx] = value;
    }

    /// Runs a compiled script to completion and returns the values its
    /// top-level `Return` produced. Globals survive across runs; the value
    /// and frame stacks are reset.
    pub fn run(&mut self, script: Arc<FunctionProto>) -> Result<Vec<Value>, Fault> {
        debug_assert_eq!(script.arity, 0, "a script takes no arguments");
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();

        let closure = self.alloc(Obj::Closure(Closure {
            proto: script.clone(),
            upvalues: Vec::new().into(),
        }));
        self.push(Value::Obj(closure))?;
        self.frames.push(Frame {
            closure,
            proto: script,
            ip: 0,
            base: 0,
        });

        self.execute()?;
        Ok(self.stack.drain(..).collect())
    }

    fn execute(&mut self) -> Result<(), Fault> {
        loop {
            let byte = self.frame_mut().get_u8();
            let op = Op::decode(byte).expect("invalid opcode");
            match op {
                Op::Constant => {
                    let idx = self.read_u8() as usize;
                    let constant = self.frame().proto.chunk.constants[idx].clone();
                    let value = match constant {
                        Constant::Int(i) => Value::Int(i),
                        Constant::Real(bits) => Value::Real(f64::from_bits(bits)),
                        Constant::Str(s) => Value::Obj(self.alloc(Obj::Str(s.to_string()))),
                        Constant::Function(_) => {
                            panic!("function constants are instantiated by Closure")
                        }
                    };
                    self.push(value)?;
                }
                Op::Null => self.push(Value::Null)?,
                Op::True => self.push(Value::Bool(true))?,
                Op::False => self.push(Value::Bool(false))?,

                Op::Pop => {
                    self.pop();
                }
                Op::Dup => {
                    let top = self.peek(0);
                    self.push(top)?;
                }

                Op::GetGlobal => {
                    let idx = self.read_u8() as usize;
                    let value = self.globals[idx];
                    self.push(value)?;
                }
                Op::SetGlobal => {
                    let idx = self.read_u8() as usize;
                    let value = self.pop();
                    match self.ref_slot(self.globals[idx]) {
                        Some(slot) => self.write_slot(slot, value),
                        None => self.globals[idx] = value,
                    }
                }
                Op::GetLocal => {
                    let idx = self.read_u8() as usize;
                    let value = self.stack[self.frame().base + idx];
                    self.push(value)?;
                }
                Op::SetLocal => {
                    let idx = self.read_u8() as usize;
                    let value = self.peek(0);
                    let abs = self.frame().base + idx;
                    match self.ref_slot(self.stack[abs]) {
                        Some(slot) => self.write_slot(slot, value),
                        None => self.stack[abs] = value,
                    }
                }
                Op::GetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let handle = self.upvalue_handle(idx);
                    let value = match self.upvalue_state(handle) {
                        UpvalueState::Open(slot) => self.stack[slot],
                        UpvalueState::Closed(v) => v,
                    };
                    self.push(value)?;
                }
                Op::SetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let value = self.peek(0);
                    let handle = self.upvalue_handle(idx);
                    match self.upvalue_state(handle) {
                        UpvalueState::Open(slot) => self.stack[slot] = value,
                        UpvalueState::Closed(_) => {
                            *self.heap.get_mut(handle) =
                                Obj::Upvalue(UpvalueState::Closed(value));
                        }
                    }
                }
                Op::CloseUpvalue => {
                    let boundary = self.stack.len() - 1;
                    self.close_upvalues(boundary);
                    self.pop();
                }

                Op::Add => self.op_add()?,
                Op::Sub => {
                    self.binary_numeric("-", |a, b| Ok(a.wrapping_sub(b)), |a, b| a - b)?
                }
                Op::Mul => {
                    self.binary_numeric("*", |a, b| Ok(a.wrapping_mul(b)), |a, b| a * b)?
                }
                Op::Div => self.binary_numeric(
                    "/",
                    |a, b| {
                        if b == 0 {
                            Err(Fault::DivisionByZero)
                        } else {
                            Ok(a.wrapping_div(b))
                        }
                    },
                    |a, b| a / b,
                )?,
                Op::Rem => self.binary_numeric(
                    "%",
                    |a, b| {
                        if b == 0 {
                            Err(Fault::DivisionByZero)
                        } else {
                            Ok(a.wrapping_rem(b))
                        }
                    },
                    |a, b| a % b,
                )?,

                Op::BitAnd => self.binary_int("&", |a, b| a & b)?,
                Op::BitOr => self.binary_int("|", |a, b| a | b)?,
                Op::BitXor => self.binary_int("^", |a, b| a ^ b)?,
                Op::Shl => self.binary_int("<<", |a, b| a.wrapping_shl(b as u32))?,
                Op::Shr => self.binary_int(">>", |a, b| a.wrapping_shr(b as u32))?,

                Op::And => self.binary_bool("and", |a, b| a && b)?,
                Op::Or => self.binary_bool("or", |a, b| a || b)?,
                Op::Not => {
                    let v = self.pop();
                    let v = self.chase(v);
                    match v {
                        Value::Bool(b) => self.push(Value::Bool(!b))?,
                        _ => return Err(self.unary_fault("not", v)),
                    }
                }
                Op::Neg => {
                    let v = self.pop();
                    let v = self.chase(v);
                    match v {
                        Value::Int(i) => self.push(Value::Int(i.wrapping_neg()))?,
                        Value::Real(r) => self.push(Value::Real(-r))?,
                        _ => return Err(self.unary_fault("-", v)),
                    }
                }
                Op::Factorial => {
                    let v = self.pop();
                    let v = self.chase(v);
                    match v {
                        Value::Int(n) if n >= 0 => {
                            let r = (1..=n).fold(1i64, |acc, k| acc.wrapping_mul(k));
                            self.push(Value::Int(r))?;
                        }
                        _ => return Err(self.unary_fault("!", v)),
                    }
                }

                Op::Less => self.binary_compare(|ord| ord == Ordering::Less)?,
                Op::Greater => self.binary_compare(|ord| ord == Ordering::Greater)?,
                Op::Equal => {
                    let rhs = self.pop();
                    let rhs = self.chase(rhs);
                    let lhs = self.pop();
                    let lhs = self.chase(lhs);
                    let eq = self.heap.values_equal(lhs, rhs);
                    self.push(Value::Bool(eq))?;
                }

                Op::Array => {
                    let n = self.read_u8() as usize;
                    let start = self.stack.len() - n;
                    let elems = self.stack[start..].to_vec();
                    let handle = self.alloc(Obj::Array(elems));
                    self.stack.truncate(start);
                    self.push(Value::Obj(handle))?;
                }
                Op::Dict => {
                    let n = self.read_u8() as usize;
                    self.op_dict(n)?;
                }
                Op::GetIndex => self.op_get_index()?,
                Op::SetIndex => self.op_set_index()?,

                Op::Jump => {
                    let distance = self.read_u16() as usize;
                    self.frame_mut().ip += distance;
                }
                Op::JumpIfFalse => {
                    let distance = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += distance;
                    }
                }
                Op::Loop => {
                    let distance = self.read_u16() as usize;
                    self.frame_mut().ip -= distance;
                }

                Op::RefLocal => {
                    let idx = self.read_u8() as usize;
                    let slot = Slot::Stack(self.frame().base + idx);
                    let handle = self.alloc(Obj::Ref(slot));
                    self.push(Value::Obj(handle))?;
                }
                Op::RefGlobal => {
                    let idx = self.read_u8() as usize;
                    let handle = self.alloc(Obj::Ref(Slot::Global(idx)));
                    self.push(Value::Obj(handle))?;
                }

                Op::Call => {
                    let argc = self.read_u8();
                    self.call_value(argc)?;
                }
                Op::Closure => self.op_closure()?,
                Op::Return => {
                    if self.op_return()? {
                        return Ok(());
                    }
                }

                Op::Class => self.op_class()?,
                Op::Enum => self.op_enum()?,
                Op::GetProperty => self.op_get_property()?,
                Op::SetProperty => self.op_set_property()?,
                Op::GetBase => self.op_get_base()?,
            }
        }
    }

    // ---- stack and frame primitives ----

    fn frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    fn read_u8(&mut self) -> u8 {
        self.frame_mut().get_u8()
    }

    fn read_u16(&mut self) -> u16 {
        self.frame_mut().get_u16()
    }

    fn push(&mut self, value: Value) -> Result<(), Fault> {
        if self.stack.len() >= STACK_MAX {
            return Err(Fault::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("popping an empty stack")
    }

    fn peek(&self, depth: usize) -> Value {
        self.stack[self.stack.len() - 1 - depth]
    }

    /// Allocates, running a collection cycle first if the heap is over its
    /// threshold. The cycle happens before the object exists, so everything
    /// it must not reap is still rooted.
    pub(crate) fn alloc(&mut self, obj: Obj) -> crate::heap::Handle {
        if self.heap.wants_gc(Heap::obj_size(&obj)) {
            self.collect();
        }
        self.heap.alloc(obj)
    }

    // ---- references ----

    fn ref_slot(&self, value: Value) -> Option<Slot> {
        if let Value::Obj(h) = value {
            if let Obj::Ref(slot) = self.heap.get(h) {
                return Some(*slot);
            }
        }
        None
    }

    fn write_slot(&mut self, slot: Slot, value: Value) {
        match slot {
            Slot::Stack(i) => self.stack[i] = value,
            Slot::Global(i) => self.globals[i] = value,
        }
    }

    /// Substitutes a reference's pointee; every other value passes through.
    fn chase(&self, value: Value) -> Value {
        match self.ref_slot(value) {
            Some(Slot::Stack(i)) => self.stack[i],
            Some(Slot::Global(i)) => self.globals[i],
            None => value,
        }
    }

    // ---- upvalues ----

    fn upvalue_handle(&self, idx: usize) -> crate::heap::Handle {
        let Obj::Closure(c) = self.heap.get(self.frame().closure) else {
            panic!("frame closure is not a closure object");
        };
        c.upvalues[idx]
    }

    fn upvalue_state(&self, handle: crate::heap::Handle) -> UpvalueState {
        let Obj::Upvalue(state) = self.heap.get(handle) else {
            panic!("captured handle is not an upvalue");
        };
        *state
    }

    /// Returns the open upvalue for `slot`, creating one if no closure has
    /// captured that slot yet. Sharing the upvalue is what makes two
    /// closures over the same variable see each other's writes.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> crate::heap::Handle {
        match self.open_upvalues.binary_search_by_key(&slot, |&(s, _)| s) {
            Ok(i) => self.open_upvalues[i].1,
            Err(i) => {
                let handle = self.alloc(Obj::Upvalue(UpvalueState::Open(slot)));
                self.open_upvalues.insert(i, (slot, handle));
                handle
            }
        }
    }

    /// Closes every open upvalue at or above `boundary`, migrating the
    /// stack value into the upvalue object.
    pub(crate) fn close_upvalues(&mut self, boundary: usize) {
        while let Some(&(slot, handle)) = self.open_upvalues.last() {
            if slot < boundary {
                break;
            }
            let value = self.stack[slot];
            *self.heap.get_mut(handle) = Obj::Upvalue(UpvalueState::Closed(value));
            self.open_upvalues.pop();
        }
    }

    // ---- calls ----

    fn call_value(&mut self, argc: u8) -> Result<(), Fault> {
        let callee = self.peek(argc as usize);
        let callee = self.chase(callee);
        let Value::Obj(handle) = callee else {
            return Err(Fault::InvalidCallee(self.heap.stringify(callee)));
        };
        match self.heap.get(handle) {
            Obj::Closure(c) => {
                let proto = c.proto.clone();
                self.push_frame(handle, proto, argc)
            }
            Obj::BoundMethod(b) => {
                let BoundMethod { receiver, method } = *b;
                let Obj::Closure(c) = self.heap.get(method) else {
                    panic!("bound method over a non-closure");
                };
                let proto = c.proto.clone();
                // rebind slot 0 to the receiver class
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = Value::Obj(receiver);
                self.push_frame(method, proto, argc)
            }
            Obj::Native(n) => {
                let fun = n.fun;
                let split = self.stack.len() - argc as usize;
                let args: Vec<Value> = self.stack.split_off(split);
                self.pop();
                let ret = fun(&mut self.heap, &args)?;
                self.push(ret)
            }
            _ => Err(Fault::InvalidCallee(self.heap.stringify(callee))),
        }
    }

    fn push_frame(
        &mut self,
        closure: crate::heap::Handle,
        proto: Arc<FunctionProto>,
        argc: u8,
    ) -> Result<(), Fault> {
        if proto.arity != argc {
            return Err(Fault::ArityMismatch {
                expected: proto.arity,
                got: argc,
            });
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(Fault::FrameOverflow);
        }
        let base = self.stack.len() - argc as usize - 1;
        trace!(name = ?proto.name, base, "calling");
        self.frames.push(Frame {
            closure,
            proto,
            ip: 0,
            base,
        });
        Ok(())
    }

    fn op_closure(&mut self) -> Result<(), Fault> {
        let idx = self.read_u8() as usize;
        let proto = match &self.frame().proto.chunk.constants[idx] {
            Constant::Function(p) => p.clone(),
            _ => panic!("Closure over a non-function constant"),
        };
        let (base, parent) = {
            let f = self.frame();
            (f.base, f.closure)
        };
        let mut upvalues = Vec::with_capacity(proto.upvalues.len());
        for desc in &proto.upvalues {
            let handle = if desc.from_parent_local {
                self.capture_upvalue(base + desc.index as usize)
            } else {
                let Obj::Closure(c) = self.heap.get(parent) else {
                    panic!("frame closure is not a closure object");
                };
                c.upvalues[desc.index as usize]
            };
            upvalues.push(handle);
        }
        let closure = self.alloc(Obj::Closure(Closure {
            proto,
            upvalues: upvalues.into(),
        }));
        self.push(Value::Obj(closure))
    }

    /// Returns `true` when the script frame itself returned, which ends the
    /// run with the returned values left on the stack.
    fn op_return(&mut self) -> Result<bool, Fault> {
        let n = self.read_u8() as usize;
        let results: Vec<Value> = self.stack.split_off(self.stack.len() - n);
        let frame = self.frames.pop().expect("returning with no active frame");
        self.close_upvalues(frame.base);
        self.stack.truncate(frame.base);
        trace!(name = ?frame.proto.name, n, "returned");

        if self.frames.is_empty() {
            for v in results {
                self.push(v)?;
            }
            return Ok(true);
        }
        // a call expression always leaves at least one value
        if results.is_empty() {
            self.push(Value::Null)?;
        } else {
            for v in results {
                self.push(v)?;
            }
        }
        Ok(false)
    }

    // ---- arithmetic ----

    fn op_add(&mut self) -> Result<(), Fault> {
        let rhs = self.peek(0);
        let rhs = self.chase(rhs);
        let lhs = self.peek(1);
        let lhs = self.chase(lhs);
        let concat = match (lhs, rhs) {
            (Value::Obj(a), Value::Obj(b)) => match (self.heap.get(a), self.heap.get(b)) {
                (Obj::Str(x), Obj::Str(y)) => Some(format!("{}{}", x, y)),
                _ => None,
            },
            _ => None,
        };
        if let Some(joined) = concat {
            let handle = self.alloc(Obj::Str(joined));
            self.stack.truncate(self.stack.len() - 2);
            self.push(Value::Obj(handle))
        } else {
            self.binary_numeric("+", |a, b| Ok(a.wrapping_add(b)), |a, b| a + b)
        }
    }

    /// Int op Int stays integral; any real operand promotes both sides.
    fn binary_numeric(
        &mut self,
        op: &'static str,
        int_op: fn(i64, i64) -> Result<i64, Fault>,
        real_op: fn(f64, f64) -> f64,
    ) -> Result<(), Fault> {
        let rhs = self.pop();
        let rhs = self.chase(rhs);
        let lhs = self.pop();
        let lhs = self.chase(lhs);
        let out = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(int_op(a, b)?),
            (Value::Real(a), Value::Real(b)) => Value::Real(real_op(a, b)),
            (Value::Int(a), Value::Real(b)) => Value::Real(real_op(a as f64, b)),
            (Value::Real(a), Value::Int(b)) => Value::Real(real_op(a, b as f64)),
            _ => return Err(self.binary_fault(op, lhs, rhs)),
        };
        self.push(out)
    }

    fn binary_int(&mut self, op: &'static str, f: fn(i64, i64) -> i64) -> Result<(), Fault> {
        let rhs = self.pop();
        let rhs = self.chase(rhs);
        let lhs = self.pop();
        let lhs = self.chase(lhs);
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => self.push(Value::Int(f(a, b))),
            _ => Err(self.binary_fault(op, lhs, rhs)),
        }
    }

    fn binary_bool(&mut self, op: &'static str, f: fn(bool, bool) -> bool) -> Result<(), Fault> {
        let rhs = self.pop();
        let rhs = self.chase(rhs);
        let lhs = self.pop();
        let lhs = self.chase(lhs);
        match (lhs, rhs) {
            (Value::Bool(a), Value::Bool(b)) => self.push(Value::Bool(f(a, b))),
            _ => Err(self.binary_fault(op, lhs, rhs)),
        }
    }

    /// Ordering is only defined between numbers; anything else compares
    /// false, mirroring equality across kinds.
    fn binary_compare(&mut self, accept: fn(Ordering) -> bool) -> Result<(), Fault> {
        let rhs = self.pop();
        let rhs = self.chase(rhs);
        let lhs = self.pop();
        let lhs = self.chase(lhs);
        let out = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => accept(a.cmp(&b)),
            _ => match (lhs.as_real(), rhs.as_real()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).map(accept).unwrap_or(false),
                _ => false,
            },
        };
        self.push(Value::Bool(out))
    }

    fn binary_fault(&self, op: &'static str, lhs: Value, rhs: Value) -> Fault {
        Fault::BinaryType {
            op,
            lhs: self.heap.stringify(lhs),
            rhs: self.heap.stringify(rhs),
        }
    }

    fn unary_fault(&self, op: &'static str, operand: Value) -> Fault {
        Fault::UnaryType {
            op,
            operand: self.heap.stringify(operand),
        }
    }

    // ---- compound values ----

    /// Builds a dict from `n` key/value pairs (key below value, first pair
    /// deepest). A repeated key keeps its position and takes the last value.
    fn op_dict(&mut self, n: usize) -> Result<(), Fault> {
        let start = self.stack.len() - 2 * n;
        let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(n);
        for j in 0..n {
            let key = self.chase(self.stack[start + 2 * j]);
            let value = self.stack[start + 2 * j + 1];
            match pairs
                .iter_mut()
                .find(|(k, _)| self.heap.values_equal(*k, key))
            {
                Some(existing) => existing.1 = value,
                None => pairs.push((key, value)),
            }
        }
        let handle = self.alloc(Obj::Dict(pairs));
        self.stack.truncate(start);
        self.push(Value::Obj(handle))
    }

    fn element_index(&self, idx: Value, len: usize) -> Result<usize, Fault> {
        let Value::Int(i) = idx else {
            return Err(Fault::BadIndex(self.heap.stringify(idx)));
        };
        if i < 0 || i as usize >= len {
            return Err(Fault::IndexOutOfRange { index: i, len });
        }
        Ok(i as usize)
    }

    fn op_get_index(&mut self) -> Result<(), Fault> {
        let idx = self.peek(0);
        let idx = self.chase(idx);
        let target = self.peek(1);
        let target = self.chase(target);
        let Value::Obj(handle) = target else {
            return Err(Fault::NotIndexable(self.heap.type_name(target).into()));
        };

        // string indexing allocates, so it is handled before the borrow of
        // the other container kinds
        if let Obj::Str(s) = self.heap.get(handle) {
            let i = self.element_index(idx, s.chars().count())?;
            let piece = s.chars().nth(i).map(String::from).expect("index checked");
            let piece = self.alloc(Obj::Str(piece));
            self.stack.truncate(self.stack.len() - 2);
            return self.push(Value::Obj(piece));
        }

        let result = match self.heap.get(handle) {
            Obj::Array(elems) => elems[self.element_index(idx, elems.len())?],
            Obj::Dict(pairs) => pairs
                .iter()
                .find(|&&(k, _)| self.heap.values_equal(k, idx))
                .map(|&(_, v)| v)
                .ok_or_else(|| Fault::MissingKey(self.heap.stringify(idx)))?,
            _ => return Err(Fault::NotIndexable(self.heap.type_name(target).into())),
        };
        self.stack.truncate(self.stack.len() - 2);
        self.push(result)
    }

    fn op_set_index(&mut self) -> Result<(), Fault> {
        let idx = self.pop();
        let idx = self.chase(idx);
        let target = self.pop();
        let target = self.chase(target);
        let value = self.pop();
        let Value::Obj(handle) = target else {
            return Err(Fault::NotIndexable(self.heap.type_name(target).into()));
        };

        match self.heap.get(handle) {
            Obj::Array(elems) => {
                let i = self.element_index(idx, elems.len())?;
                let Obj::Array(elems) = self.heap.get_mut(handle) else {
                    unreachable!()
                };
                elems[i] = value;
            }
            Obj::Dict(pairs) => {
                let pos = pairs
                    .iter()
                    .position(|&(k, _)| self.heap.values_equal(k, idx));
                let Obj::Dict(pairs) = self.heap.get_mut(handle) else {
                    unreachable!()
                };
                match pos {
                    Some(p) => pairs[p].1 = value,
                    None => pairs.push((idx, value)),
                }
            }
            Obj::Str(s) => {
                // splice the replacement string over the addressed character
                let replacement = match value {
                    Value::Obj(vh) => match self.heap.get(vh) {
                        Obj::Str(r) => r.clone(),
                        _ => return Err(self.unary_fault("[]=", value)),
                    },
                    _ => return Err(self.unary_fault("[]=", value)),
                };
                let i = self.element_index(idx, s.chars().count())?;
                let (start, ch) = s.char_indices().nth(i).expect("index checked");
                let end = start + ch.len_utf8();
                let Obj::Str(s) = self.heap.get_mut(handle) else {
                    unreachable!()
                };
                s.replace_range(start..end, &replacement);
            }
            _ => return Err(Fault::NotIndexable(self.heap.type_name(target).into())),
        }
        Ok(())
    }

    // ---- classes and enums ----

    /// A name operand is always a string constant the resolver emitted.
    fn constant_name(&self, value: Value) -> smol_str::SmolStr {
        if let Value::Obj(h) = value {
            if let Obj::Str(s) = self.heap.get(h) {
                return smol_str::SmolStr::new(s);
            }
        }
        panic!("name operand is not a string");
    }

    /// Stack going in (top first): class name, then parent (name over
    /// value) pairs, then member pairs, each group in reverse declaration
    /// order because declarations push bottom-up.
    fn op_class(&mut self) -> Result<(), Fault> {
        let member_count = self.read_u8() as usize;
        let parent_count = self.read_u8() as usize;

        let name = self.constant_name(self.peek(0));
        let mut parents = Vec::with_capacity(parent_count);
        for i in 0..parent_count {
            let parent_name = self.constant_name(self.peek(1 + 2 * i));
            let parent = self.chase(self.peek(2 + 2 * i));
            let Some(handle) = parent.as_obj() else {
                return Err(Fault::NotAClass(self.heap.stringify(parent)));
            };
            if !matches!(self.heap.get(handle), Obj::Class(_)) {
                return Err(Fault::NotAClass(self.heap.stringify(parent)));
            }
            parents.push((parent_name, handle));
        }
        parents.reverse();

        let members_at = 1 + 2 * parent_count;
        let mut members = Vec::with_capacity(member_count);
        for i in 0..member_count {
            let member_name = self.constant_name(self.peek(members_at + 2 * i));
            let member = self.peek(members_at + 2 * i + 1);
            members.push((member_name, member));
        }
        members.reverse();

        let total = 1 + 2 * parent_count + 2 * member_count;
        let handle = self.alloc(Obj::Class(Class {
            name,
            members,
            parents,
        }));
        self.stack.truncate(self.stack.len() - total);
        self.push(Value::Obj(handle))
    }

    fn op_enum(&mut self) -> Result<(), Fault> {
        let variant_count = self.read_u8() as usize;
        let name = self.constant_name(self.peek(0));
        let mut variants = Vec::with_capacity(variant_count);
        for i in 0..variant_count {
            let variant_name = self.constant_name(self.peek(1 + 2 * i));
            let value = self.peek(2 + 2 * i);
            variants.push((variant_name, value));
        }
        variants.reverse();

        let total = 1 + 2 * variant_count;
        let handle = self.alloc(Obj::Enum(Enum { name, variants }));
        self.stack.truncate(self.stack.len() - total);
        self.push(Value::Obj(handle))
    }

    fn op_get_property(&mut self) -> Result<(), Fault> {
        let name = self.constant_name(self.peek(0));
        let receiver = self.peek(1);
        let receiver = self.chase(receiver);
        let Some(handle) = receiver.as_obj() else {
            return Err(Fault::NotAClass(self.heap.type_name(receiver).into()));
        };
        let result = match self.heap.get(handle) {
            Obj::Class(c) => {
                let owner = c.name.clone();
                let member = self.heap.class_member(handle, &name).ok_or_else(|| {
                    Fault::MissingMember {
                        owner: owner.to_string(),
                        member: name.to_string(),
                    }
                })?;
                match member {
                    // a closure fetched from a class comes out bound to it
                    Value::Obj(mh) if matches!(self.heap.get(mh), Obj::Closure(_)) => {
                        let bound = self.alloc(Obj::BoundMethod(BoundMethod {
                            receiver: handle,
                            method: mh,
                        }));
                        Value::Obj(bound)
                    }
                    _ => member,
                }
            }
            Obj::Enum(e) => e
                .variants
                .iter()
                .find(|(k, _)| *k == name)
                .map(|&(_, v)| v)
                .ok_or_else(|| Fault::MissingMember {
                    owner: e.name.to_string(),
                    member: name.to_string(),
                })?,
            _ => return Err(Fault::NotAClass(self.heap.type_name(receiver).into())),
        };
        self.stack.truncate(self.stack.len() - 2);
        self.push(result)
    }

    fn op_set_property(&mut self) -> Result<(), Fault> {
        let name_v = self.pop();
        let name = self.constant_name(name_v);
        let receiver = self.pop();
        let receiver = self.chase(receiver);
        let value = self.peek(0);
        let Some(handle) = receiver.as_obj() else {
            return Err(Fault::NotAClass(self.heap.type_name(receiver).into()));
        };
        let owner = match self.heap.get(handle) {
            Obj::Class(c) => c.name.to_string(),
            _ => return Err(Fault::NotAClass(self.heap.type_name(receiver).into())),
        };
        if self.heap.class_member(handle, &name).is_none() {
            return Err(Fault::MissingMember {
                owner,
                member: name.to_string(),
            });
        }
        // writes land on the class itself, shadowing an inherited member
        let Obj::Class(c) = self.heap.get_mut(handle) else {
            unreachable!()
        };
        match c.members.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => c.members.push((name, value)),
        }
        Ok(())
    }

    fn op_get_base(&mut self) -> Result<(), Fault> {
        let name_v = self.pop();
        let name = self.constant_name(name_v);
        let receiver = self.pop();
        let receiver = self.chase(receiver);
        let Some(handle) = receiver.as_obj() else {
            return Err(Fault::NotAClass(self.heap.type_name(receiver).into()));
        };
        let owner = match self.heap.get(handle) {
            Obj::Class(c) => c.name.to_string(),
            _ => return Err(Fault::NotAClass(self.heap.type_name(receiver).into())),
        };
        let member = self
            .heap
            .class_parent_member(handle, &name)
            .ok_or(Fault::MissingMember {
                owner,
                member: name.to_string(),
            })?;
        self.push(member)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
