//! Operator semantics behind math and condition nodes.
//!
//! Numeric operands promote along INT → LONG → FLOAT → DOUBLE; a CHAR takes
//! part as its code point and numeric TEXT is coerced.  Exact integer
//! division stays integral, inexact division yields a DOUBLE.
//!
//! | Operator | Operands | Result |
//! |----------|----------|--------|
//! | `+` | TEXT with anything | concatenation |
//! | `+` | ARRAY/LIST with anything | new collection (appended or joined) |
//! | `*` | TEXT × INT | repetition |
//! | `/ ~/ %` | integer ÷ 0 | `DIV_BY_ZERO` |
//! | `& \| ^ << >> >>>` | INT/LONG only | floats → `INVALID_ARGUMENTS` |
//! | `[i]` | TEXT/ARRAY/LIST/BYTE_BUFFER, negative counts from the end | element |

use std::cmp::Ordering;
use std::collections::VecDeque;

use super::ast::{ConditionOperator, MathOperator};
use super::error::{ErrorObject, InterpretingError};
use super::value::{DataObject, Value};
use crate::pattern;

/// Largest single text, buffer or array a script may ask for, in bytes.
pub const MAX_ALLOCATION: usize = 256 * 1024 * 1024;

/// `count` items of `item_size` bytes each, or `INVALID_ARGUMENTS` when
/// that would exceed [`MAX_ALLOCATION`].
pub fn bounded_len(count: usize, item_size: usize) -> Result<usize, ErrorObject> {
    match count.checked_mul(item_size) {
        Some(bytes) if bytes <= MAX_ALLOCATION => Ok(count),
        _ => Err(ErrorObject::with_message(
            InterpretingError::InvalidArguments,
            format!("{count} elements of {item_size} bytes exceed the {MAX_ALLOCATION} byte limit"),
        )),
    }
}

// ── Numbers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl Number {
    fn rank(self) -> u8 {
        match self {
            Number::Int(_) => 0,
            Number::Long(_) => 1,
            Number::Float(_) => 2,
            Number::Double(_) => 3,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Number::Int(n) => i64::from(n),
            Number::Long(n) => n,
            Number::Float(x) => x as i64,
            Number::Double(x) => x as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => f64::from(n),
            Number::Long(n) => n as f64,
            Number::Float(x) => f64::from(x),
            Number::Double(x) => x,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Number::Int(_) | Number::Long(_))
    }

    /// Convert to the variant of rank `rank`.
    fn widen(self, rank: u8) -> Number {
        match rank {
            0 => self,
            1 => Number::Long(self.as_i64()),
            2 => Number::Float(self.as_f64() as f32),
            _ => Number::Double(self.as_f64()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int(n) => Value::Int(n),
            Number::Long(n) => Value::Long(n),
            Number::Float(x) => Value::Float(x),
            Number::Double(x) => Value::Double(x),
        }
    }
}

fn integer_value(n: i64, long: bool) -> Value {
    match i32::try_from(n) {
        Ok(n) if !long => Value::Int(n),
        _ => Value::Long(n),
    }
}

fn is_decimal(s: &str) -> bool {
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let mut digits = 0;
    let mut dots = 0;
    for c in mantissa.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    if digits == 0 || dots > 1 {
        return false;
    }
    match exponent {
        None => true,
        Some(e) => {
            let e = e.strip_prefix(['+', '-']).unwrap_or(e);
            !e.is_empty() && e.bytes().all(|b| b.is_ascii_digit())
        }
    }
}

/// Parse a number literal: `42`, `-7`, `42L`, `1.5`, `1.5f`, `1e3`, `0xFF`,
/// `0b101`.  An integer that overflows INT becomes a LONG.
pub fn parse_number(text: &str) -> Option<Value> {
    let (neg, body) = match text.strip_prefix('-') {
        Some(b) => (true, b),
        None => (false, text),
    };
    if !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let radix = if let Some(h) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some((h, 16))
    } else if let Some(b) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        Some((b, 2))
    } else {
        None
    };
    if let Some((digits, radix)) = radix {
        let (digits, long) = match digits.strip_suffix(['L', 'l']) {
            Some(d) => (d, true),
            None => (digits, false),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return None;
        }
        let n = i64::from_str_radix(digits, radix).ok()?;
        return Some(integer_value(if neg { -n } else { n }, long));
    }

    if let Some(digits) = body.strip_suffix(['L', 'l']) {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        return text[..text.len() - 1].parse::<i64>().ok().map(Value::Long);
    }
    if let Some(digits) = body.strip_suffix(['f', 'F']) {
        if !is_decimal(digits) {
            return None;
        }
        return text[..text.len() - 1].parse::<f32>().ok().map(Value::Float);
    }
    if body.bytes().all(|b| b.is_ascii_digit()) {
        return Some(match text.parse::<i64>() {
            Ok(n) => integer_value(n, false),
            Err(_) => Value::Double(text.parse::<f64>().ok()?),
        });
    }
    if is_decimal(body) {
        return text.parse::<f64>().ok().map(Value::Double);
    }
    None
}

/// Numeric view of a value, if it has one.
///
/// Collections count as their length and errors as their code.
pub fn to_number(v: &Value) -> Option<Number> {
    Some(match v {
        Value::Int(n) => Number::Int(*n),
        Value::Long(n) => Number::Long(*n),
        Value::Float(x) => Number::Float(*x),
        Value::Double(x) => Number::Double(*x),
        Value::Char(c) => Number::Int(*c as i32),
        Value::Text(s) => match parse_number(s.trim())? {
            Value::Int(n) => Number::Int(n),
            Value::Long(n) => Number::Long(n),
            Value::Float(x) => Number::Float(x),
            Value::Double(x) => Number::Double(x),
            _ => return None,
        },
        Value::Error(e) => Number::Int(e.code()),
        Value::Array(a) => Number::Int(len_i32(a.borrow().len())),
        Value::List(l) => Number::Int(len_i32(l.borrow().len())),
        Value::ByteBuffer(b) => Number::Int(len_i32(b.borrow().len())),
        _ => return None,
    })
}

fn len_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

/// Lang truthiness: empty, zero, null and void are false.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Text(s) => !s.is_empty(),
        Value::Char(c) => *c != '\0',
        Value::Int(n) => *n != 0,
        Value::Long(n) => *n != 0,
        Value::Float(x) => *x != 0.0 && !x.is_nan(),
        Value::Double(x) => *x != 0.0 && !x.is_nan(),
        Value::ByteBuffer(b) => !b.borrow().is_empty(),
        Value::Array(a) => !a.borrow().is_empty(),
        Value::List(l) => !l.borrow().is_empty(),
        Value::Error(e) => e.code() != 0,
        Value::Null | Value::Void => false,
        Value::VarPointer(_)
        | Value::FunctionPointer(_)
        | Value::Struct(_)
        | Value::Object(_)
        | Value::Type(_) => true,
    }
}

fn no_num(v: &Value) -> ErrorObject {
    ErrorObject::with_message(
        InterpretingError::NoNum,
        format!("{} is not a number", v.data_type()),
    )
}

fn number_of(v: &Value) -> Result<Number, ErrorObject> {
    to_number(v).ok_or_else(|| no_num(v))
}

fn integer_of(v: &Value) -> Result<Number, ErrorObject> {
    let n = number_of(v)?;
    if n.is_integer() {
        Ok(n)
    } else {
        Err(ErrorObject::with_message(
            InterpretingError::InvalidArguments,
            "bitwise operators need INT or LONG operands",
        ))
    }
}

fn div_by_zero() -> ErrorObject {
    ErrorObject::new(InterpretingError::DivByZero)
}

// ── Math ──────────────────────────────────────────────────────────────────────

pub fn math_unary(op: MathOperator, v: &Value) -> Result<Value, ErrorObject> {
    match op {
        MathOperator::Pos => Ok(number_of(v)?.into_value()),
        MathOperator::Inv => Ok(match number_of(v)? {
            Number::Int(n) => Value::Int(n.wrapping_neg()),
            Number::Long(n) => Value::Long(n.wrapping_neg()),
            Number::Float(x) => Value::Float(-x),
            Number::Double(x) => Value::Double(-x),
        }),
        MathOperator::BitwiseNot => Ok(match integer_of(v)? {
            Number::Int(n) => Value::Int(!n),
            other => Value::Long(!other.as_i64()),
        }),
        other => Err(ErrorObject::with_message(
            InterpretingError::InvalidAstNode,
            format!("\"{}\" is not a unary operator", other.symbol()),
        )),
    }
}

pub fn math_binary(op: MathOperator, l: &Value, r: &Value) -> Result<Value, ErrorObject> {
    match op {
        MathOperator::GetItem => get_item(l, r),
        MathOperator::Add => add(l, r),
        MathOperator::Mul => match (l, r) {
            (Value::Text(s), _) => repeat(s, r),
            _ => arith(op, number_of(l)?, number_of(r)?),
        },
        MathOperator::Sub
        | MathOperator::Div
        | MathOperator::FloorDiv
        | MathOperator::Mod
        | MathOperator::Pow => arith(op, number_of(l)?, number_of(r)?),
        MathOperator::BitwiseAnd | MathOperator::BitwiseOr | MathOperator::BitwiseXor => {
            bitwise(op, integer_of(l)?, integer_of(r)?)
        }
        MathOperator::Lshift | MathOperator::Rshift | MathOperator::Rzshift => {
            shift(op, integer_of(l)?, integer_of(r)?.as_i64())
        }
        MathOperator::Pos | MathOperator::Inv | MathOperator::BitwiseNot => {
            Err(ErrorObject::with_message(
                InterpretingError::InvalidAstNode,
                format!("\"{}\" is not a binary operator", op.symbol()),
            ))
        }
    }
}

fn add(l: &Value, r: &Value) -> Result<Value, ErrorObject> {
    match (l, r) {
        (Value::Array(a), _) => {
            let mut items: Vec<DataObject> = a.borrow().iter().map(DataObject::fresh_copy).collect();
            extend_with(&mut items, r);
            Ok(Value::new_array(items))
        }
        (Value::List(list), _) => {
            let mut items: Vec<DataObject> =
                list.borrow().iter().map(DataObject::fresh_copy).collect();
            extend_with(&mut items, r);
            Ok(Value::new_list(VecDeque::from(items)))
        }
        (Value::ByteBuffer(a), Value::ByteBuffer(b)) => {
            let mut bytes = a.borrow().clone();
            bytes.extend_from_slice(&b.borrow());
            Ok(Value::new_byte_buffer(bytes))
        }
        (Value::Text(_), _) | (_, Value::Text(_)) => Ok(Value::Text(format!("{l}{r}"))),
        _ => arith(MathOperator::Add, number_of(l)?, number_of(r)?),
    }
}

fn extend_with(items: &mut Vec<DataObject>, v: &Value) {
    match v {
        Value::Array(a) => items.extend(a.borrow().iter().map(DataObject::fresh_copy)),
        Value::List(l) => items.extend(l.borrow().iter().map(DataObject::fresh_copy)),
        other => items.push(DataObject::new(other.clone())),
    }
}

fn repeat(s: &str, count: &Value) -> Result<Value, ErrorObject> {
    let n = number_of(count)?.as_i64();
    if n < 0 {
        return Err(ErrorObject::with_message(
            InterpretingError::NegativeRepeatCount,
            format!("can't repeat text {n} times"),
        ));
    }
    let n = bounded_len(usize::try_from(n).unwrap_or(usize::MAX), s.len())?;
    Ok(Value::Text(s.repeat(n)))
}

fn arith(op: MathOperator, a: Number, b: Number) -> Result<Value, ErrorObject> {
    let rank = a.rank().max(b.rank());
    Ok(match (a.widen(rank), b.widen(rank)) {
        (Number::Int(x), Number::Int(y)) => int_arith(op, i64::from(x), i64::from(y), false)?,
        (Number::Long(x), Number::Long(y)) => int_arith(op, x, y, true)?,
        (Number::Float(x), Number::Float(y)) => match op {
            MathOperator::Add => Value::Float(x + y),
            MathOperator::Sub => Value::Float(x - y),
            MathOperator::Mul => Value::Float(x * y),
            MathOperator::Div => Value::Float(x / y),
            MathOperator::FloorDiv => Value::Float((x / y).floor()),
            MathOperator::Mod => Value::Float(x % y),
            _ => Value::Float(x.powf(y)),
        },
        (x, y) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            match op {
                MathOperator::Add => Value::Double(x + y),
                MathOperator::Sub => Value::Double(x - y),
                MathOperator::Mul => Value::Double(x * y),
                MathOperator::Div => Value::Double(x / y),
                MathOperator::FloorDiv => Value::Double((x / y).floor()),
                MathOperator::Mod => Value::Double(x % y),
                _ => Value::Double(x.powf(y)),
            }
        }
    })
}

/// Integer arithmetic with INT/LONG wrap-around.  `long` selects the
/// result width.
fn int_arith(op: MathOperator, x: i64, y: i64, long: bool) -> Result<Value, ErrorObject> {
    let wrap = |n: i64| if long { Value::Long(n) } else { Value::Int(n as i32) };
    Ok(match op {
        MathOperator::Add => wrap(if long { x.wrapping_add(y) } else { x + y }),
        MathOperator::Sub => wrap(if long { x.wrapping_sub(y) } else { x - y }),
        MathOperator::Mul => wrap(x.wrapping_mul(y)),
        MathOperator::Div => {
            if y == 0 {
                return Err(div_by_zero());
            }
            if x.wrapping_rem(y) == 0 {
                wrap(x.wrapping_div(y))
            } else {
                Value::Double(x as f64 / y as f64)
            }
        }
        MathOperator::FloorDiv => {
            if y == 0 {
                return Err(div_by_zero());
            }
            let q = x.wrapping_div(y);
            let q = if x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q };
            wrap(q)
        }
        MathOperator::Mod => {
            if y == 0 {
                return Err(div_by_zero());
            }
            wrap(x.wrapping_rem(y))
        }
        _ => power(x, y, long),
    })
}

fn power(x: i64, y: i64, long: bool) -> Value {
    if y < 0 {
        return Value::Double((x as f64).powf(y as f64));
    }
    let Ok(exp) = u32::try_from(y) else {
        return Value::Double((x as f64).powf(y as f64));
    };
    if !long {
        if let Some(n) = i32::try_from(x).ok().and_then(|x| x.checked_pow(exp)) {
            return Value::Int(n);
        }
    }
    match x.checked_pow(exp) {
        Some(n) => Value::Long(n),
        None => Value::Double((x as f64).powf(y as f64)),
    }
}

fn bitwise(op: MathOperator, a: Number, b: Number) -> Result<Value, ErrorObject> {
    let apply = |x: i64, y: i64| match op {
        MathOperator::BitwiseAnd => x & y,
        MathOperator::BitwiseOr => x | y,
        _ => x ^ y,
    };
    Ok(match (a, b) {
        (Number::Int(x), Number::Int(y)) => Value::Int(apply(i64::from(x), i64::from(y)) as i32),
        _ => Value::Long(apply(a.as_i64(), b.as_i64())),
    })
}

fn shift(op: MathOperator, a: Number, by: i64) -> Result<Value, ErrorObject> {
    Ok(match a {
        Number::Int(x) => {
            let by = (by & 31) as u32;
            Value::Int(match op {
                MathOperator::Lshift => x.wrapping_shl(by),
                MathOperator::Rshift => x.wrapping_shr(by),
                _ => ((x as u32) >> by) as i32,
            })
        }
        other => {
            let x = other.as_i64();
            let by = (by & 63) as u32;
            Value::Long(match op {
                MathOperator::Lshift => x.wrapping_shl(by),
                MathOperator::Rshift => x.wrapping_shr(by),
                _ => ((x as u64) >> by) as i64,
            })
        }
    })
}

/// Resolve a possibly negative index against `len`.
pub fn resolve_index(index: i64, len: usize) -> Result<usize, ErrorObject> {
    let len_i = len as i64;
    let i = if index < 0 { len_i + index } else { index };
    if i < 0 || i >= len_i {
        return Err(ErrorObject::with_message(
            InterpretingError::IndexOutOfBounds,
            format!("Index {index} out of bounds for length {len}"),
        ));
    }
    Ok(i as usize)
}

fn get_item(l: &Value, r: &Value) -> Result<Value, ErrorObject> {
    if let Value::Struct(s) = l {
        return s.get(&r.to_string()).map(DataObject::into_value);
    }
    let index = number_of(r)?.as_i64();
    match l {
        Value::Array(a) => {
            let a = a.borrow();
            Ok(a[resolve_index(index, a.len())?].value().clone())
        }
        Value::List(list) => {
            let list = list.borrow();
            Ok(list[resolve_index(index, list.len())?].value().clone())
        }
        Value::ByteBuffer(b) => {
            let b = b.borrow();
            Ok(Value::Int(i32::from(b[resolve_index(index, b.len())?])))
        }
        Value::Text(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Char(chars[resolve_index(index, chars.len())?]))
        }
        other => Err(ErrorObject::with_message(
            InterpretingError::InvalidArguments,
            format!("{} can't be indexed", other.data_type()),
        )),
    }
}

// ── Conditions ────────────────────────────────────────────────────────────────

fn is_numeric(v: &Value) -> bool {
    matches!(
        v,
        Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_) | Value::Char(_)
    )
}

/// Numeric views of both sides when they are numbers or numeric text.
fn numeric_pair(l: &Value, r: &Value) -> Option<(Number, Number)> {
    let coercible = |v: &Value| is_numeric(v) || matches!(v, Value::Text(_));
    if !(coercible(l) && coercible(r)) || !(is_numeric(l) || is_numeric(r)) {
        return None;
    }
    Some((to_number(l)?, to_number(r)?))
}

fn compare_numbers(a: Number, b: Number) -> Option<Ordering> {
    if a.is_integer() && b.is_integer() {
        Some(a.as_i64().cmp(&b.as_i64()))
    } else {
        a.as_f64().partial_cmp(&b.as_f64())
    }
}

fn elements_equal(a: &[DataObject], b: &[DataObject]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_equals(x, y))
}

/// `==`: numbers compare across variants, numeric text is coerced.
pub fn loose_equals(l: &Value, r: &Value) -> bool {
    if let Some((a, b)) = numeric_pair(l, r) {
        return compare_numbers(a, b) == Some(Ordering::Equal);
    }
    match (l, r) {
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Text(s), Value::Char(c)) | (Value::Char(c), Value::Text(s)) => {
            let mut chars = s.chars();
            chars.next() == Some(*c) && chars.next().is_none()
        }
        (Value::Array(a), Value::Array(b)) => elements_equal(&a.borrow(), &b.borrow()),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| loose_equals(x, y))
        }
        (Value::Array(a), Value::List(b)) | (Value::List(b), Value::Array(a)) => {
            let (a, b) = (a.borrow(), b.borrow());
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| loose_equals(x, y))
        }
        (Value::ByteBuffer(a), Value::ByteBuffer(b)) => *a.borrow() == *b.borrow(),
        (Value::VarPointer(a), Value::VarPointer(b)) => a == b,
        (Value::FunctionPointer(a), Value::FunctionPointer(b)) => a.same_function(b),
        (Value::Struct(a), Value::Struct(b)) => std::rc::Rc::ptr_eq(a, b),
        (Value::Object(a), Value::Object(b)) => std::rc::Rc::ptr_eq(a, b),
        (Value::Error(a), Value::Error(b)) => a.err == b.err,
        (Value::Error(e), other) | (other, Value::Error(e)) if is_numeric(other) => {
            to_number(other).is_some_and(|n| n.as_i64() == i64::from(e.code()))
        }
        (Value::Type(a), Value::Type(b)) => a == b,
        (Value::Null, Value::Null) | (Value::Void, Value::Void) => true,
        _ => false,
    }
}

/// `===`: same data type and equal.
pub fn strict_equals(l: &Value, r: &Value) -> bool {
    l.data_type() == r.data_type() && loose_equals(l, r)
}

/// Ordering for `< > <= >=`; `None` when the values don't compare.
pub fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    if let Some((a, b)) = numeric_pair(l, r) {
        return compare_numbers(a, b);
    }
    match (l, r) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        (Value::Array(_) | Value::List(_) | Value::ByteBuffer(_), _)
        | (_, Value::Array(_) | Value::List(_) | Value::ByteBuffer(_)) => {
            let (a, b) = (to_number(l)?, to_number(r)?);
            compare_numbers(a, b)
        }
        _ => None,
    }
}

/// Evaluate a binary condition operator on two already-evaluated operands.
pub fn condition(op: ConditionOperator, l: &Value, r: &Value) -> Result<bool, ErrorObject> {
    Ok(match op {
        ConditionOperator::Equals => loose_equals(l, r),
        ConditionOperator::NotEquals => !loose_equals(l, r),
        ConditionOperator::StrictEquals => strict_equals(l, r),
        ConditionOperator::StrictNotEquals => !strict_equals(l, r),
        ConditionOperator::LessThan => compare(l, r) == Some(Ordering::Less),
        ConditionOperator::GreaterThan => compare(l, r) == Some(Ordering::Greater),
        ConditionOperator::LessThanOrEquals => {
            matches!(compare(l, r), Some(Ordering::Less | Ordering::Equal))
        }
        ConditionOperator::GreaterThanOrEquals => {
            matches!(compare(l, r), Some(Ordering::Greater | Ordering::Equal))
        }
        ConditionOperator::Matches => {
            let pattern = pattern::cached(&r.to_string()).map_err(|e| {
                ErrorObject::with_message(InterpretingError::InvalidRegexSyntax, e.to_string())
            })?;
            pattern.matches(&l.to_string())
        }
        ConditionOperator::And => truthy(l) && truthy(r),
        ConditionOperator::Or => truthy(l) || truthy(r),
        ConditionOperator::Truth => truthy(l),
        ConditionOperator::Not => !truthy(l),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
