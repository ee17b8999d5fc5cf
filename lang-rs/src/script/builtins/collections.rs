//! Arrays, lists, byte buffers, structs and objects.
//!
//! Collections are shared by reference, so the mutating natives
//! (`arraySet`, `listAdd`, `structSet`, ...) change the caller's value in
//! place.

use std::collections::VecDeque;
use std::rc::Rc;

use super::{int_arg, rest};
use crate::script::error::InterpretingError;
use crate::script::native::{fault, Descriptor, NativeFault, NativeRegistry};
use crate::script::ops::{bounded_len, resolve_index, truthy};
use crate::script::value::{
    DataObject, DataTypeSet, LangObject, StructObject, TypeConstraint, Value,
};

fn only(types: DataTypeSet) -> TypeConstraint {
    TypeConstraint::allow(types)
}

fn length_arg(arg: &DataObject) -> Result<usize, NativeFault> {
    let n = int_arg(arg)?;
    usize::try_from(n)
        .map_err(|_| fault(InterpretingError::NegativeArrayLen, format!("length {n} is negative")))
}

/// Split `name{TYPE|...}` into the member name and its constraint.
fn struct_member(spec: &str) -> Result<(String, Option<TypeConstraint>), NativeFault> {
    let spec = spec.trim();
    let (name, constraint) = match spec.split_once('{') {
        Some((name, tail)) => {
            let inner = tail.strip_suffix('}').ok_or_else(|| {
                fault(InterpretingError::InvalidArguments, format!("unclosed type constraint in \"{spec}\""))
            })?;
            let c = TypeConstraint::parse(inner).map_err(|e| fault(InterpretingError::InvalidArguments, e))?;
            (name, Some(c))
        }
        None => (spec, None),
    };
    let bare = name.strip_prefix('$').unwrap_or(name);
    if bare.is_empty() || !bare.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(fault(InterpretingError::InvalidArguments, format!("\"{name}\" is not a member name")));
    }
    Ok((format!("${bare}"), constraint))
}

pub(super) fn register(r: &mut NativeRegistry) {
    // ── Arrays ────────────────────────────────────────────────────────────────

    r.register(Descriptor::function("arrayCreate").number_param("$length"), |_, args, _| {
        let len = bounded_len(length_arg(&args[0])?, std::mem::size_of::<DataObject>())?;
        Ok(DataObject::array(vec![DataObject::null(); len]))
    });
    r.register(Descriptor::function("arrayOf").varargs("&elements"), |_, args, _| {
        Ok(DataObject::array(rest(&args[0])))
    });
    r.register(
        Descriptor::function("arrayLength").typed_param("&array", only(DataTypeSet::ARRAY)),
        |_, args, _| {
            let len = args[0].array().map_or(0, |a| a.borrow().len());
            Ok(DataObject::int(len as i32))
        },
    );
    r.register(
        Descriptor::function("arrayGet")
            .typed_param("&array", only(DataTypeSet::ARRAY))
            .number_param("$index"),
        |_, args, _| {
            let Some(a) = args[0].array() else { return Ok(DataObject::null()) };
            let a = a.borrow();
            let i = resolve_index(int_arg(&args[1])?, a.len())?;
            Ok(a[i].fresh_copy())
        },
    );
    r.register(
        Descriptor::function("arraySet")
            .typed_param("&array", only(DataTypeSet::ARRAY))
            .number_param("$index")
            .param("$value"),
        |_, args, _| {
            if let Some(a) = args[0].array() {
                let mut a = a.borrow_mut();
                let i = resolve_index(int_arg(&args[1])?, a.len())?;
                a[i] = args[2].fresh_copy();
            }
            Ok(DataObject::void())
        },
    );
    r.register(
        Descriptor::function("arrayMap")
            .typed_param("&array", only(DataTypeSet::ARRAY))
            .param("fp.func"),
        |it, args, scope| {
            let elements = rest(&args[0]);
            let mut out = Vec::with_capacity(elements.len());
            for e in elements {
                out.push(it.call_from_native(args[1].value(), vec![e], scope)?.fresh_copy());
            }
            Ok(DataObject::array(out))
        },
    );
    r.register(
        Descriptor::function("arrayFilter")
            .typed_param("&array", only(DataTypeSet::ARRAY))
            .param("fp.func"),
        |it, args, scope| {
            let mut out = Vec::new();
            for e in rest(&args[0]) {
                if truthy(it.call_from_native(args[1].value(), vec![e.clone()], scope)?.value()) {
                    out.push(e);
                }
            }
            Ok(DataObject::array(out))
        },
    );
    r.register(
        Descriptor::function("arrayForEach")
            .typed_param("&array", only(DataTypeSet::ARRAY))
            .param("fp.func"),
        |it, args, scope| {
            for e in rest(&args[0]) {
                it.call_from_native(args[1].value(), vec![e], scope)?;
            }
            Ok(DataObject::void())
        },
    );

    // ── Lists ─────────────────────────────────────────────────────────────────

    r.register(Descriptor::function("listOf").varargs("&elements"), |_, args, _| {
        Ok(DataObject::new(Value::new_list(rest(&args[0]).into_iter().collect())))
    });
    r.register(
        Descriptor::function("listAdd").typed_param("&list", only(DataTypeSet::LIST)).param("$value"),
        |_, args, _| {
            if let Some(l) = args[0].list() {
                l.borrow_mut().push_back(args[1].fresh_copy());
            }
            Ok(DataObject::void())
        },
    );
    r.register(
        Descriptor::function("listGet").typed_param("&list", only(DataTypeSet::LIST)).number_param("$index"),
        |_, args, _| {
            let Some(l) = args[0].list() else { return Ok(DataObject::null()) };
            let l = l.borrow();
            let i = resolve_index(int_arg(&args[1])?, l.len())?;
            Ok(l[i].fresh_copy())
        },
    );
    r.register(
        Descriptor::function("listRemoveAt")
            .typed_param("&list", only(DataTypeSet::LIST))
            .number_param("$index"),
        |_, args, _| {
            let Some(l) = args[0].list() else { return Ok(DataObject::null()) };
            let mut l = l.borrow_mut();
            let i = resolve_index(int_arg(&args[1])?, l.len())?;
            Ok(l.remove(i).unwrap_or_default())
        },
    );
    r.register(
        Descriptor::function("listSize").typed_param("&list", only(DataTypeSet::LIST)),
        |_, args, _| Ok(DataObject::int(args[0].list().map_or(0, |l| l.borrow().len()) as i32)),
    );

    // ── Byte buffers ──────────────────────────────────────────────────────────

    r.register(Descriptor::function("byteBufferCreate").number_param("$length"), |_, args, _| {
        let len = bounded_len(length_arg(&args[0])?, 1)?;
        Ok(DataObject::new(Value::new_byte_buffer(vec![0; len])))
    });
    r.register(Descriptor::function("byteBufferFromText").param("$text"), |_, args, _| {
        Ok(DataObject::new(Value::new_byte_buffer(args[0].to_string().into_bytes())))
    });
    r.register(
        Descriptor::function("byteBufferLength").typed_param("$buffer", only(DataTypeSet::BYTE_BUFFER)),
        |_, args, _| Ok(DataObject::int(args[0].byte_buffer().map_or(0, |b| b.borrow().len()) as i32)),
    );

    // ── Structs ───────────────────────────────────────────────────────────────

    r.register(Descriptor::function("structDefinition").varargs("&members"), |_, args, _| {
        let mut members: Vec<(String, Option<TypeConstraint>)> = Vec::new();
        for spec in rest(&args[0]) {
            let member = struct_member(&spec.to_string())?;
            if members.iter().any(|(n, _)| *n == member.0) {
                return Err(fault(
                    InterpretingError::InvalidArguments,
                    format!("member \"{}\" is declared twice", member.0),
                ));
            }
            members.push(member);
        }
        Ok(DataObject::new(Value::Struct(Rc::new(StructObject::definition(members)))))
    });
    r.register(
        Descriptor::function("structCreate")
            .typed_param("$definition", only(DataTypeSet::STRUCT))
            .varargs("&values"),
        |_, args, _| {
            let Some(def) = args[0].struct_object() else { return Ok(DataObject::null()) };
            if !def.is_definition() {
                return Err(fault(InterpretingError::InvalidArguments, "a struct instance is not a definition"));
            }
            let values = rest(&args[1]).into_iter().map(DataObject::into_value).collect();
            let instance = StructObject::instance(def, values)?;
            Ok(DataObject::new(Value::Struct(Rc::new(instance))))
        },
    );
    r.register(
        Descriptor::function("structGet")
            .typed_param("$struct", only(DataTypeSet::STRUCT))
            .param("$member"),
        |_, args, _| match args[0].struct_object() {
            Some(s) => Ok(s.get(&args[1].to_string())?.fresh_copy()),
            None => Ok(DataObject::null()),
        },
    );
    r.register(
        Descriptor::function("structSet")
            .typed_param("$struct", only(DataTypeSet::STRUCT))
            .param("$member")
            .param("$value"),
        |_, args, _| {
            if let Some(s) = args[0].struct_object() {
                s.set(&args[1].to_string(), args[2].value().clone())?;
            }
            Ok(DataObject::void())
        },
    );
    r.register(
        Descriptor::function("structGetMemberNames").typed_param("$struct", only(DataTypeSet::STRUCT)),
        |_, args, _| {
            let names = args[0].struct_object().map(|s| s.member_names()).unwrap_or_default();
            Ok(DataObject::array(names.into_iter().map(DataObject::text).collect()))
        },
    );

    // ── Objects ───────────────────────────────────────────────────────────────

    r.register(Descriptor::function("objectCreate").param("$className"), |_, args, _| {
        Ok(DataObject::new(Value::Object(Rc::new(LangObject::new(args[0].to_string())))))
    });
    r.register(
        Descriptor::function("objectSet")
            .typed_param("$object", only(DataTypeSet::OBJECT))
            .param("$member")
            .param("$value"),
        |_, args, _| {
            if let Some(o) = args[0].object() {
                o.set(&args[1].to_string(), args[2].value().clone())?;
            }
            Ok(DataObject::void())
        },
    );
    r.register(
        Descriptor::function("objectGet").typed_param("$object", only(DataTypeSet::OBJECT)).param("$member"),
        |_, args, _| {
            let member = args[1].to_string();
            args[0]
                .object()
                .and_then(|o| o.get(&member))
                .map(|m| m.fresh_copy())
                .ok_or_else(|| {
                    fault(InterpretingError::MemberNotAccessible, format!("no member \"{member}\""))
                })
        },
    );
    r.register(
        Descriptor::function("objectGetMemberNames").typed_param("$object", only(DataTypeSet::OBJECT)),
        |_, args, _| {
            let names = args[0].object().map(|o| o.member_names()).unwrap_or_default();
            Ok(DataObject::array(names.into_iter().map(DataObject::text).collect()))
        },
    );
    r.register(
        Descriptor::function("objectCall")
            .typed_param("$object", only(DataTypeSet::OBJECT))
            .param("$method")
            .varargs("&args"),
        |it, args, scope| {
            let method = args[1].to_string();
            let f = args[0]
                .object()
                .and_then(|o| o.get(&method))
                .filter(|m| m.function_pointer().is_some())
                .ok_or_else(|| {
                    fault(InterpretingError::MemberNotAccessible, format!("no method \"{method}\""))
                })?;
            let mut call_args = VecDeque::from(rest(&args[2]));
            call_args.push_front(args[0].fresh_copy());
            it.call_from_native(f.value(), call_args.into(), scope)
        },
    );
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::script::error::InterpretingError;
    use crate::script::interp::{Interpreter, InterpreterOptions};
    use pretty_assertions::assert_eq;

    fn show(src: &str) -> String {
        let mut it = Interpreter::new(InterpreterOptions { error_output: 0, ..Default::default() });
        it.eval(src).unwrap().map(|v| v.to_string()).unwrap_or_default()
    }

    fn errno(src: &str) -> String {
        show(&format!("{src}\nreturn $LANG_ERRNO"))
    }

    #[test]
    fn array_natives() {
        assert_eq!(show("return func.arrayCreate(3)"), "[null, null, null]");
        assert_eq!(show("&a = func.arrayOf(1, 2, 3)\nfunc.arraySet(&a, -1, x)\nreturn &a"), "[1, 2, x]");
        assert_eq!(show("&a = func.arrayOf(a, b)\nreturn func.arrayGet(&a, 1)"), "b");
        assert_eq!(show("return func.arrayLength(func.arrayOf(1, 2))"), "2");
        assert_eq!(
            errno("$r = func.arrayCreate(-1)"),
            InterpretingError::NegativeArrayLen.code().to_string()
        );
        assert_eq!(
            errno("$r = func.arrayCreate(2147483647)"),
            InterpretingError::InvalidArguments.code().to_string()
        );
        assert_eq!(
            errno("&a = func.arrayOf(1)\n$r = func.arrayGet(&a, 5)"),
            InterpretingError::IndexOutOfBounds.code().to_string()
        );
    }

    #[test]
    fn array_higher_order_functions() {
        assert_eq!(
            show("fp.sq = ($x) -> return parser.op($x * $x)\nreturn func.arrayMap(func.arrayOf(1, 2, 3), fp.sq)"),
            "[1, 4, 9]"
        );
        assert_eq!(
            show("fp.big = ($x) -> return parser.con($x > 1)\nreturn func.arrayFilter(func.arrayOf(1, 2, 3), fp.big)"),
            "[2, 3]"
        );
        let mut it = Interpreter::new(InterpreterOptions { error_output: 0, ..Default::default() });
        it.interpret("fp.p = ($x) -> func.print($x)\nfunc.arrayForEach(func.arrayOf(a, b), fp.p)").unwrap();
        assert_eq!(it.take_output(), vec!["ab"]);
    }

    #[test]
    fn list_natives() {
        assert_eq!(
            show("&l = func.listOf(1, 2)\nfunc.listAdd(&l, 3)\n$r = func.listRemoveAt(&l, 0)\nreturn &l"),
            "[2, 3]"
        );
        assert_eq!(show("&l = func.listOf(a, b)\nreturn func.listGet(&l, -1)"), "b");
        assert_eq!(show("return func.listSize(func.listOf())"), "0");
    }

    #[test]
    fn byte_buffers() {
        assert_eq!(show("return func.byteBufferFromText(AB)"), "[0x41, 0x42]");
        assert_eq!(show("return func.byteBufferLength(func.byteBufferCreate(4))"), "4");
        assert_eq!(
            errno("$r = func.byteBufferCreate(2147483647)"),
            InterpretingError::InvalidArguments.code().to_string()
        );
    }

    #[test]
    fn struct_natives() {
        let src = "$def = func.structDefinition(x, y{INT})\n\
                   $p = func.structCreate($def, a, 2)\n\
                   func.structSet($p, x, b)\n";
        assert_eq!(show(&format!("{src}return $p")), "{$x: b, $y: 2}");
        assert_eq!(show(&format!("{src}return func.structGet($p, y)")), "2");
        assert_eq!(show(&format!("{src}return func.structGetMemberNames($def)")), "[$x, $y]");
        assert_eq!(
            errno(&format!("{src}func.structSet($p, y, text)")),
            InterpretingError::IncompatibleDataType.code().to_string()
        );
        assert_eq!(
            errno("$def = func.structDefinition(x)\n$p = func.structCreate($def)"),
            InterpretingError::InvalidArgCount.code().to_string()
        );
    }

    #[test]
    fn object_natives() {
        let src = "$o = func.objectCreate(Counter)\n\
                   func.objectSet($o, $count, 1)\n\
                   fp.add = ($self, $n) -> return parser.op(func.objectGet($self, $count) + $n)\n\
                   func.objectSet($o, fp.inc, fp.add)\n";
        assert_eq!(show(&format!("{src}return func.objectCall($o, fp.inc, 4)")), "5");
        assert_eq!(show(&format!("{src}return $o")), "<Object: Counter>");
        assert_eq!(
            errno(&format!("{src}$r = func.objectGet($o, $missing)")),
            InterpretingError::MemberNotAccessible.code().to_string()
        );
    }
}
