//! Builtin namespaces: `io`, `ds`, `mem` and `time`.
//!
//! Each namespace is an ordinary class object whose members are native
//! functions, installed into the first global slots in [`NAMESPACES`] order.
//! The resolver must intern the same names first so the slot numbers agree.
//!
//! Natives allocate through [`Heap::alloc`] directly, which never starts a
//! collection cycle, so they are free to hold handles across allocations.

use std::time::{SystemTime, UNIX_EPOCH};

use smol_str::SmolStr;

use crate::error::Fault;
use crate::heap::{Class, Heap, Native, NativeFn, Obj};
use crate::interp::Interpreter;
use crate::value::Value;

#[cfg(test)]
mod test;

/// Builtin namespace names, in global-slot order.
pub const NAMESPACES: [&str; 4] = ["io", "ds", "mem", "time"];

/// Installs the builtin namespaces into global slots `0..NAMESPACES.len()`.
pub fn install(vm: &mut Interpreter) {
    let io = namespace(
        vm,
        "io",
        &[("print", io_print as NativeFn), ("println", io_println)],
    );
    let ds = namespace(
        vm,
        "ds",
        &[
            ("sizeof", ds_sizeof as NativeFn),
            ("insert", ds_insert),
            ("erase", ds_erase),
        ],
    );
    let mem = namespace(vm, "mem", &[("addressof", mem_addressof as NativeFn)]);
    let time = namespace(vm, "time", &[("clock", time_clock as NativeFn)]);
    for (i, v) in [io, ds, mem, time].into_iter().enumerate() {
        vm.set_global(i, v);
    }
}

fn namespace(vm: &mut Interpreter, name: &str, fns: &[(&str, NativeFn)]) -> Value {
    let mut members = Vec::with_capacity(fns.len());
    for &(fn_name, fun) in fns {
        let qualified = SmolStr::new(format!("{}.{}", name, fn_name));
        let handle = vm.heap_mut().alloc(Obj::Native(Native {
            name: qualified,
            fun,
        }));
        members.push((SmolStr::new(fn_name), Value::Obj(handle)));
    }
    let class = vm.heap_mut().alloc(Obj::Class(Class {
        name: SmolStr::new(name),
        members,
        parents: Vec::new(),
    }));
    Value::Obj(class)
}

fn expect_arity(args: &[Value], expected: u8) -> Result<(), Fault> {
    if args.len() != expected as usize {
        return Err(Fault::ArityMismatch {
            expected,
            got: args.len() as u8,
        });
    }
    Ok(())
}

fn as_str(heap: &Heap, value: Value) -> Option<&str> {
    match value {
        Value::Obj(h) => match heap.get(h) {
            Obj::Str(s) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

/// Renders print arguments. A leading string argument acts as a template:
/// each `{}` is replaced by the next argument, any left over stay literal.
/// Without a template the arguments are joined with spaces.
pub(crate) fn render(heap: &Heap, args: &[Value]) -> String {
    if args.is_empty() {
        return String::new();
    }
    match as_str(heap, args[0]) {
        Some(template) if args.len() > 1 => {
            let mut out = String::with_capacity(template.len());
            let mut rest = args[1..].iter();
            let mut pieces = template.split("{}");
            if let Some(first) = pieces.next() {
                out.push_str(first);
            }
            for piece in pieces {
                match rest.next() {
                    Some(&v) => out.push_str(&heap.stringify(v)),
                    None => out.push_str("{}"),
                }
                out.push_str(piece);
            }
            out
        }
        _ => {
            let rendered: Vec<String> = args.iter().map(|&v| heap.stringify(v)).collect();
            rendered.join(" ")
        }
    }
}

fn io_print(heap: &mut Heap, args: &[Value]) -> Result<Value, Fault> {
    print!("{}", render(heap, args));
    Ok(Value::Null)
}

fn io_println(heap: &mut Heap, args: &[Value]) -> Result<Value, Fault> {
    println!("{}", render(heap, args));
    Ok(Value::Null)
}

fn ds_sizeof(heap: &mut Heap, args: &[Value]) -> Result<Value, Fault> {
    expect_arity(args, 1)?;
    let size = match args[0] {
        Value::Obj(h) => match heap.get(h) {
            Obj::Array(elems) => Some(elems.len()),
            Obj::Dict(pairs) => Some(pairs.len()),
            Obj::Str(s) => Some(s.chars().count()),
            _ => None,
        },
        _ => None,
    };
    size.map(|n| Value::Int(n as i64)).ok_or_else(|| {
        Fault::Native(format!(
            "ds.sizeof: not a sized value: {}",
            heap.stringify(args[0])
        ))
    })
}

/// Index argument for the `ds` natives; `len` itself is allowed so that
/// insertion at the end works.
fn nat_index(heap: &Heap, value: Value, len: usize) -> Result<usize, Fault> {
    let Value::Int(i) = value else {
        return Err(Fault::BadIndex(heap.stringify(value)));
    };
    if i < 0 || i as usize > len {
        return Err(Fault::IndexOutOfRange { index: i, len });
    }
    Ok(i as usize)
}

fn char_to_byte(s: &str, i: usize) -> usize {
    s.char_indices().nth(i).map(|(b, _)| b).unwrap_or(s.len())
}

fn ds_insert(heap: &mut Heap, args: &[Value]) -> Result<Value, Fault> {
    expect_arity(args, 3)?;
    let Value::Obj(h) = args[0] else {
        return Err(Fault::NotIndexable(heap.type_name(args[0]).into()));
    };
    match heap.get(h) {
        Obj::Array(elems) => {
            let len = elems.len();
            let i = nat_index(heap, args[1], len)?;
            let Obj::Array(elems) = heap.get_mut(h) else {
                unreachable!()
            };
            elems.insert(i, args[2]);
        }
        Obj::Dict(_) => {
            let exists = {
                let Obj::Dict(pairs) = heap.get(h) else {
                    unreachable!()
                };
                pairs.iter().any(|&(k, _)| heap.values_equal(k, args[1]))
            };
            if exists {
                return Err(Fault::Native(format!(
                    "ds.insert: key already present: {}",
                    heap.stringify(args[1])
                )));
            }
            let Obj::Dict(pairs) = heap.get_mut(h) else {
                unreachable!()
            };
            pairs.push((args[1], args[2]));
        }
        Obj::Str(_) => {
            let insertion = match as_str(heap, args[2]) {
                Some(s) => s.to_string(),
                None => {
                    return Err(Fault::Native(format!(
                        "ds.insert: can only insert a string into a string, got {}",
                        heap.stringify(args[2])
                    )))
                }
            };
            let byte = {
                let Obj::Str(s) = heap.get(h) else {
                    unreachable!()
                };
                let i = nat_index(heap, args[1], s.chars().count())?;
                char_to_byte(s, i)
            };
            let Obj::Str(s) = heap.get_mut(h) else {
                unreachable!()
            };
            s.insert_str(byte, &insertion);
        }
        _ => return Err(Fault::NotIndexable(heap.type_name(args[0]).into())),
    }
    Ok(args[0])
}

fn ds_erase(heap: &mut Heap, args: &[Value]) -> Result<Value, Fault> {
    expect_arity(args, 2)?;
    let Value::Obj(h) = args[0] else {
        return Err(Fault::NotIndexable(heap.type_name(args[0]).into()));
    };
    match heap.get(h) {
        Obj::Array(elems) => {
            let len = elems.len();
            let Value::Int(i) = args[1] else {
                return Err(Fault::BadIndex(heap.stringify(args[1])));
            };
            if i < 0 || i as usize >= len {
                return Err(Fault::IndexOutOfRange { index: i, len });
            }
            let Obj::Array(elems) = heap.get_mut(h) else {
                unreachable!()
            };
            elems.remove(i as usize);
        }
        Obj::Dict(_) => {
            let pos = {
                let Obj::Dict(pairs) = heap.get(h) else {
                    unreachable!()
                };
                pairs
                    .iter()
                    .position(|&(k, _)| heap.values_equal(k, args[1]))
            };
            let Some(pos) = pos else {
                return Err(Fault::MissingKey(heap.stringify(args[1])));
            };
            let Obj::Dict(pairs) = heap.get_mut(h) else {
                unreachable!()
            };
            pairs.remove(pos);
        }
        Obj::Str(_) => {
            let range = {
                let Obj::Str(s) = heap.get(h) else {
                    unreachable!()
                };
                let count = s.chars().count();
                let Value::Int(i) = args[1] else {
                    return Err(Fault::BadIndex(heap.stringify(args[1])));
                };
                if i < 0 || i as usize >= count {
                    return Err(Fault::IndexOutOfRange {
                        index: i,
                        len: count,
                    });
                }
                let (start, ch) = s.char_indices().nth(i as usize).expect("index checked");
                start..start + ch.len_utf8()
            };
            let Obj::Str(s) = heap.get_mut(h) else {
                unreachable!()
            };
            s.replace_range(range, "");
        }
        _ => return Err(Fault::NotIndexable(heap.type_name(args[0]).into())),
    }
    Ok(args[0])
}

fn mem_addressof(heap: &mut Heap, args: &[Value]) -> Result<Value, Fault> {
    expect_arity(args, 1)?;
    let Value::Obj(h) = args[0] else {
        return Err(Fault::Native(format!(
            "mem.addressof: not a heap value: {}",
            heap.stringify(args[0])
        )));
    };
    let rendered = format!("{:?}", h);
    Ok(Value::Obj(heap.alloc(Obj::Str(rendered))))
}

fn time_clock(_heap: &mut Heap, args: &[Value]) -> Result<Value, Fault> {
    expect_arity(args, 0)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::Real(now.as_secs_f64()))
}
