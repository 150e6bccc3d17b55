use std::sync::Arc;

use pretty_assertions::assert_eq;

use sable_bytecode::FunctionProto;

use crate::heap::{Closure, Obj, UpvalueState, INIT_GC_THRESHOLD};
use crate::interp::Interpreter;
use crate::value::Value;

#[test]
fn an_unreachable_cycle_is_collected() {
    let mut vm = Interpreter::new();
    let a = vm.heap.alloc(Obj::Array(Vec::new()));
    let b = vm.heap.alloc(Obj::Array(vec![Value::Obj(a)]));
    if let Obj::Array(elems) = vm.heap.get_mut(a) {
        elems.push(Value::Obj(b));
    }
    vm.stack.push(Value::Obj(a));

    vm.collect();
    assert_eq!(vm.heap.len(), 2);

    vm.stack.pop();
    vm.collect();
    assert_eq!(vm.heap.len(), 0);
    assert!(!vm.heap.contains(a));
    assert!(!vm.heap.contains(b));
}

#[test]
fn globals_keep_objects_alive() {
    let mut vm = Interpreter::new();
    let s = vm.heap.alloc(Obj::Str("kept".into()));
    vm.globals[7] = Value::Obj(s);
    vm.collect();
    assert!(vm.heap.contains(s));

    vm.globals[7] = Value::Null;
    vm.collect();
    assert!(!vm.heap.contains(s));
}

#[test]
fn open_upvalues_are_roots() {
    let mut vm = Interpreter::new();
    let uv = vm.heap.alloc(Obj::Upvalue(UpvalueState::Open(0)));
    vm.open_upvalues.push((0, uv));
    vm.collect();
    assert!(vm.heap.contains(uv));
}

#[test]
fn a_closed_upvalue_keeps_its_value_alive() {
    let mut vm = Interpreter::new();
    let s = vm.heap.alloc(Obj::Str("captured".into()));
    let uv = vm
        .heap
        .alloc(Obj::Upvalue(UpvalueState::Closed(Value::Obj(s))));
    let proto = Arc::new(FunctionProto::new(None, 0));
    let closure = vm.heap.alloc(Obj::Closure(Closure {
        proto,
        upvalues: vec![uv].into(),
    }));
    vm.stack.push(Value::Obj(closure));

    vm.collect();
    assert_eq!(vm.heap.len(), 3);
    assert!(vm.heap.contains(s));
}

#[test]
fn the_threshold_tracks_the_live_set() {
    let mut vm = Interpreter::new();
    assert_eq!(vm.heap.next_gc(), INIT_GC_THRESHOLD);

    let big = vm.heap.alloc(Obj::Str("x".repeat(200 * 1024)));
    vm.globals[0] = Value::Obj(big);
    vm.collect();
    // 1.5x the live bytes, which are dominated by the big string
    assert!(vm.heap.next_gc() > INIT_GC_THRESHOLD);
    assert_eq!(vm.heap.len(), 1);

    vm.globals[0] = Value::Null;
    vm.collect();
    assert_eq!(vm.heap.len(), 0);
    assert_eq!(vm.heap.bytes_allocated(), 0);
    // never below the floor
    assert_eq!(vm.heap.next_gc(), INIT_GC_THRESHOLD);
}

#[test]
fn allocation_triggers_a_cycle_past_the_threshold() {
    let mut vm = Interpreter::new();
    vm.heap.set_gc_threshold(64);
    for _ in 0..32 {
        // unrooted garbage
        vm.alloc(Obj::Str("garbage".into()));
    }
    assert!(vm.heap.len() < 32);
    // the lowered floor survives the sweep's threshold recomputation
    assert!(vm.heap.next_gc() < INIT_GC_THRESHOLD);
}

#[test]
fn marked_state_does_not_leak_between_cycles() {
    let mut vm = Interpreter::new();
    let s = vm.heap.alloc(Obj::Str("transient".into()));
    vm.stack.push(Value::Obj(s));
    vm.collect();
    assert!(vm.heap.contains(s));

    // reachable last cycle, garbage this cycle
    vm.stack.pop();
    vm.collect();
    assert!(!vm.heap.contains(s));
}
