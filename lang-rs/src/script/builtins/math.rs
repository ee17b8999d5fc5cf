//! Arithmetic, random numbers and type conversion natives.

use rand::Rng;

use super::{int_arg, invalid, rest};
use crate::script::ast::MathOperator;
use crate::script::error::{ErrorObject, InterpretingError};
use crate::script::native::{fault, Descriptor, NativeRegistry, NativeResult};
use crate::script::ops::{self, to_number, Number};
use crate::script::value::{DataObject, DataTypeSet, TypeConstraint, Value};

fn binary(r: &mut NativeRegistry, name: &str, op: MathOperator) {
    r.register(Descriptor::function(name).number_param("$a").number_param("$b"), move |_, args, _| {
        Ok(DataObject::new(ops::math_binary(op, &args[0], &args[1])?))
    });
}

fn number_of(arg: &DataObject) -> Result<Number, ErrorObject> {
    to_number(arg).ok_or_else(|| {
        ErrorObject::with_message(InterpretingError::NoNum, format!("\"{arg}\" is not a number"))
    })
}

/// Smallest or largest of the arguments, by numeric comparison.
fn extreme(args: &[DataObject], want: std::cmp::Ordering) -> NativeResult {
    let mut best = number_of(&args[0])?;
    for arg in rest(&args[1]) {
        let n = number_of(&arg)?;
        let ord = n.as_f64().partial_cmp(&best.as_f64());
        if ord == Some(want) {
            best = n;
        }
    }
    Ok(DataObject::new(best.into_value()))
}

fn convert(arg: &DataObject, f: impl FnOnce(Number) -> Value) -> NativeResult {
    Ok(DataObject::new(f(number_of(arg)?)))
}

pub(super) fn register(r: &mut NativeRegistry) {
    binary(r, "add", MathOperator::Add);
    binary(r, "sub", MathOperator::Sub);
    binary(r, "mul", MathOperator::Mul);
    binary(r, "div", MathOperator::Div);
    binary(r, "mod", MathOperator::Mod);
    binary(r, "pow", MathOperator::Pow);

    r.register(Descriptor::function("abs").number_param("$n"), |_, args, _| {
        let v = match number_of(&args[0])? {
            Number::Int(n) => n.checked_abs().map_or(Value::Long(i64::from(n).abs()), Value::Int),
            Number::Long(n) => Value::Long(n.wrapping_abs()),
            Number::Float(x) => Value::Float(x.abs()),
            Number::Double(x) => Value::Double(x.abs()),
        };
        Ok(DataObject::new(v))
    });
    r.register(Descriptor::function("sqrt").number_param("$n"), |_, args, _| {
        Ok(DataObject::double(number_of(&args[0])?.as_f64().sqrt()))
    });
    r.register(Descriptor::function("min").number_param("$first").varargs("&rest"), |_, args, _| {
        extreme(&args, std::cmp::Ordering::Less)
    });
    r.register(Descriptor::function("max").number_param("$first").varargs("&rest"), |_, args, _| {
        extreme(&args, std::cmp::Ordering::Greater)
    });

    r.register(Descriptor::function("rand"), |it, _, _| Ok(DataObject::int(it.rng.gen_range(0..=i32::MAX))));
    r.register(
        Descriptor::function("randRange").number_param("$min").number_param("$max"),
        |it, args, _| {
            let (lo, hi) = (int_arg(&args[0])?, int_arg(&args[1])?);
            if lo >= hi {
                return Err(invalid(format!("randRange needs min < max, got {lo} and {hi}")));
            }
            let n = it.rng.gen_range(lo..hi);
            Ok(DataObject::new(i32::try_from(n).map_or(Value::Long(n), Value::Int)))
        },
    );

    // ── Types ─────────────────────────────────────────────────────────────────

    r.register(Descriptor::function("typeOf").param("$value"), |_, args, _| {
        Ok(DataObject::new(Value::Type(args[0].data_type())))
    });
    r.register(
        Descriptor::function("isInstanceOf")
            .param("$value")
            .typed_param("$type", TypeConstraint::allow(DataTypeSet::TYPE)),
        |_, args, _| Ok(DataObject::boolean(args[1].type_value() == Some(args[0].data_type()))),
    );
    r.register(Descriptor::function("toText").param("$value"), |_, args, _| {
        Ok(DataObject::text(args[0].to_string()))
    });
    r.register(Descriptor::function("toChar").param("$value"), |_, args, _| {
        let c = match args[0].value() {
            Value::Char(c) => Some(*c),
            Value::Text(s) if s.chars().count() == 1 => s.chars().next(),
            other => to_number(other)
                .and_then(|n| u32::try_from(n.as_i64()).ok())
                .and_then(char::from_u32),
        };
        c.map(DataObject::char)
            .ok_or_else(|| fault(InterpretingError::NoChar, format!("\"{}\" can't be a char", args[0])))
    });
    r.register(Descriptor::function("toInt").param("$value"), |_, args, _| {
        convert(&args[0], |n| Value::Int(n.as_i64() as i32))
    });
    r.register(Descriptor::function("toLong").param("$value"), |_, args, _| {
        convert(&args[0], |n| Value::Long(n.as_i64()))
    });
    r.register(Descriptor::function("toFloat").param("$value"), |_, args, _| {
        convert(&args[0], |n| Value::Float(n.as_f64() as f32))
    });
    r.register(Descriptor::function("toDouble").param("$value"), |_, args, _| {
        convert(&args[0], |n| Value::Double(n.as_f64()))
    });
    r.register(Descriptor::function("toNumber").param("$value"), |_, args, _| {
        convert(&args[0], Number::into_value)
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::script::error::InterpretingError;
    use crate::script::interp::{Interpreter, InterpreterOptions};
    use crate::script::value::DataObject;
    use pretty_assertions::assert_eq;

    fn ret(src: &str) -> DataObject {
        let mut it = Interpreter::new(InterpreterOptions { error_output: 0, ..Default::default() });
        it.seed_random(7);
        it.eval(src).unwrap().unwrap()
    }

    #[test]
    fn arithmetic_natives() {
        assert_eq!(ret("return func.add(2, 3)").int(), 5);
        assert_eq!(ret("return func.mul(2.5, 2)").to_string(), "5.0");
        assert_eq!(ret("return func.pow(2, 10)").to_string(), "1024");
        assert_eq!(ret("return func.abs(-4)").int(), 4);
        assert_eq!(ret("return func.sqrt(16)").to_string(), "4.0");
    }

    #[test]
    fn number_params_reject_text() {
        let v = ret("$r = func.add(x, 1)\nreturn $LANG_ERRNO");
        assert_eq!(v.int(), InterpretingError::NoNum.code());
    }

    #[test]
    fn min_and_max() {
        assert_eq!(ret("return func.min(3, 1, 2)").int(), 1);
        assert_eq!(ret("return func.max(3, 7.5, 2)").to_string(), "7.5");
    }

    #[test]
    fn random_numbers_stay_in_range() {
        let v = ret("$r = func.randRange(5, 8)\nreturn $r").int();
        assert!((5..8).contains(&v));
        assert!(ret("return func.rand()").int() >= 0);
        let e = ret("$r = func.randRange(3, 3)\nreturn $LANG_ERRNO").int();
        assert_eq!(e, InterpretingError::InvalidArguments.code());
    }

    #[test]
    fn type_natives() {
        assert_eq!(ret("return func.typeOf(42)").to_string(), "INT");
        assert_eq!(ret("return func.typeOf(abc)").to_string(), "TEXT");
        assert!(ret("return func.isInstanceOf(1.5, $LANG_TYPE_DOUBLE)").int() == 1);
    }

    #[test]
    fn conversions() {
        assert_eq!(ret("return func.toInt(42abc)").data_type().name(), "ERROR");
        assert_eq!(ret("return func.toInt( 12 )").int(), 12);
        assert_eq!(ret("return func.toLong(3)").to_string(), "3");
        assert_eq!(ret("return func.toChar(65)").to_string(), "A");
        assert_eq!(ret("return func.toDouble(2)").to_string(), "2.0");
        assert_eq!(ret("return func.toNumber(0x10)").int(), 16);
    }
}
