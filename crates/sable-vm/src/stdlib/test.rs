use pretty_assertions::assert_eq;

use crate::error::Fault;
use crate::heap::{Heap, Obj};
use crate::interp::Interpreter;
use crate::value::Value;

use super::render;

fn str_value(heap: &mut Heap, s: &str) -> Value {
    Value::Obj(heap.alloc(Obj::Str(s.into())))
}

#[test]
fn render_substitutes_placeholders_in_order() {
    let mut heap = Heap::new();
    let template = str_value(&mut heap, "x = {} and y = {}");
    let out = render(&heap, &[template, Value::Int(1), Value::Bool(true)]);
    assert_eq!(out, "x = 1 and y = true");
}

#[test]
fn render_keeps_unmatched_placeholders() {
    let mut heap = Heap::new();
    let template = str_value(&mut heap, "{} then {}");
    let out = render(&heap, &[template, Value::Int(9)]);
    assert_eq!(out, "9 then {}");
}

#[test]
fn render_without_a_template_joins_with_spaces() {
    let heap = Heap::new();
    let out = render(&heap, &[Value::Int(1), Value::Null, Value::Real(2.5)]);
    assert_eq!(out, "1 null 2.5");
}

#[test]
fn sizeof_counts_elements_and_characters() {
    let mut heap = Heap::new();
    let arr = Value::Obj(heap.alloc(Obj::Array(vec![Value::Int(1), Value::Int(2)])));
    assert_eq!(super::ds_sizeof(&mut heap, &[arr]), Ok(Value::Int(2)));

    let s = str_value(&mut heap, "héllo");
    assert_eq!(super::ds_sizeof(&mut heap, &[s]), Ok(Value::Int(5)));

    assert!(super::ds_sizeof(&mut heap, &[Value::Int(3)]).is_err());
}

#[test]
fn insert_and_erase_on_an_array() {
    let mut heap = Heap::new();
    let arr = Value::Obj(heap.alloc(Obj::Array(vec![Value::Int(1), Value::Int(3)])));

    super::ds_insert(&mut heap, &[arr, Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(heap.stringify(arr), "[1,2,3]");

    super::ds_erase(&mut heap, &[arr, Value::Int(0)]).unwrap();
    assert_eq!(heap.stringify(arr), "[2,3]");
}

#[test]
fn inserting_a_duplicate_dict_key_fails() {
    let mut heap = Heap::new();
    let key = str_value(&mut heap, "a");
    let dict = Value::Obj(heap.alloc(Obj::Dict(vec![(key, Value::Int(1))])));
    // a structurally equal key, not the same handle
    let same_key = str_value(&mut heap, "a");
    let result = super::ds_insert(&mut heap, &[dict, same_key, Value::Int(2)]);
    assert!(matches!(result, Err(Fault::Native(_))));
}

#[test]
fn erasing_a_missing_dict_key_fails() {
    let mut heap = Heap::new();
    let dict = Value::Obj(heap.alloc(Obj::Dict(Vec::new())));
    let key = str_value(&mut heap, "gone");
    assert_eq!(
        super::ds_erase(&mut heap, &[dict, key]),
        Err(Fault::MissingKey("gone".into()))
    );
}

#[test]
fn string_insert_and_erase_respect_char_boundaries() {
    let mut heap = Heap::new();
    let s = str_value(&mut heap, "héllo");
    let insertion = str_value(&mut heap, "x");

    super::ds_insert(&mut heap, &[s, Value::Int(2), insertion]).unwrap();
    assert_eq!(heap.stringify(s), "héxllo");

    super::ds_erase(&mut heap, &[s, Value::Int(1)]).unwrap();
    assert_eq!(heap.stringify(s), "hxllo");
}

#[test]
fn addressof_requires_a_heap_value() {
    let mut heap = Heap::new();
    let s = str_value(&mut heap, "obj");
    let rendered = super::mem_addressof(&mut heap, &[s]).unwrap();
    assert!(!heap.stringify(rendered).is_empty());

    assert!(super::mem_addressof(&mut heap, &[Value::Int(1)]).is_err());
}

#[test]
fn install_fills_the_namespace_slots() {
    let vm = Interpreter::with_stdlib();
    for (i, name) in super::NAMESPACES.iter().enumerate() {
        let Value::Obj(h) = vm.global(i) else {
            panic!("slot {} is empty", i);
        };
        let Obj::Class(class) = vm.heap().get(h) else {
            panic!("slot {} is not a namespace class", i);
        };
        assert_eq!(class.name.as_str(), *name);
    }
    // spot-check one member
    let io = vm.global(0).as_obj().unwrap();
    assert!(vm.heap().class_member(io, "println").is_some());
}
