use pretty_assertions::assert_eq;

use crate::value::Value;

use super::{Handle, Heap, Obj};

fn self_referential_array(heap: &mut Heap) -> Handle {
    let h = heap.alloc(Obj::Array(Vec::new()));
    if let Obj::Array(elems) = heap.get_mut(h) {
        elems.push(Value::Obj(h));
    }
    h
}

#[test]
fn distinct_self_referential_arrays_compare_equal() {
    let mut heap = Heap::new();
    let a = self_referential_array(&mut heap);
    let b = self_referential_array(&mut heap);
    assert!(heap.objects_equal(a, b));
}

#[test]
fn a_cycle_with_a_differing_tail_compares_unequal() {
    let mut heap = Heap::new();
    let a = self_referential_array(&mut heap);
    let b = heap.alloc(Obj::Array(Vec::new()));
    if let Obj::Array(elems) = heap.get_mut(b) {
        elems.push(Value::Obj(b));
        elems.push(Value::Int(1));
    }
    assert!(!heap.objects_equal(a, b));
}

#[test]
fn mutually_referential_dicts_compare_equal() {
    let mut heap = Heap::new();
    let key_a = Value::Obj(heap.alloc(Obj::Str("other".into())));
    let key_b = Value::Obj(heap.alloc(Obj::Str("other".into())));
    let a = heap.alloc(Obj::Dict(Vec::new()));
    let b = heap.alloc(Obj::Dict(Vec::new()));
    if let Obj::Dict(pairs) = heap.get_mut(a) {
        pairs.push((key_a, Value::Obj(b)));
    }
    if let Obj::Dict(pairs) = heap.get_mut(b) {
        pairs.push((key_b, Value::Obj(a)));
    }
    assert!(heap.objects_equal(a, b));
}

#[test]
fn stringify_renders_a_cycle_as_ellipsis() {
    let mut heap = Heap::new();
    let a = self_referential_array(&mut heap);
    assert_eq!(heap.stringify(Value::Obj(a)), "[...]");

    let key = Value::Obj(heap.alloc(Obj::Str("me".into())));
    let d = heap.alloc(Obj::Dict(Vec::new()));
    if let Obj::Dict(pairs) = heap.get_mut(d) {
        pairs.push((key, Value::Obj(d)));
    }
    assert_eq!(heap.stringify(Value::Obj(d)), "{me:...}");
}

#[test]
fn stringify_repeats_a_shared_acyclic_child() {
    let mut heap = Heap::new();
    let inner = heap.alloc(Obj::Array(vec![Value::Int(1)]));
    let outer = heap.alloc(Obj::Array(vec![Value::Obj(inner), Value::Obj(inner)]));
    // sharing is not a cycle; both occurrences render in full
    assert_eq!(heap.stringify(Value::Obj(outer)), "[[1],[1]]");
}
