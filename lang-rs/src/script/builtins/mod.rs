//! The standard library of `func.*` and `linker.*` natives.
//!
//! Every function is registered through a [`Descriptor`], so argument count
//! and type checks happen before the body runs.  Bodies therefore index
//! `args` directly: the descriptor guarantees the slots exist.
//!
//! | Module          | Contents                                            |
//! |-----------------|-----------------------------------------------------|
//! | [`io`]          | print family, `format`, error values               |
//! | [`math`]        | arithmetic, random numbers, type conversions       |
//! | [`text`]        | text helpers and regex functions                    |
//! | [`collections`] | arrays, lists, byte buffers, structs, objects       |
//! | [`system`]      | calls, `exec`, translations, tests, linker          |
//!
//! [`Descriptor`]: super::native::Descriptor

mod collections;
mod io;
mod math;
mod system;
mod text;

pub(crate) use system::TestState;

use super::error::InterpretingError;
use super::native::{fault, NativeFault, NativeRegistry};
use super::ops::to_number;
use super::value::{DataObject, Value};

pub(crate) fn register_all(r: &mut NativeRegistry) {
    io::register(r);
    math::register(r);
    text::register(r);
    collections::register(r);
    system::register(r);
}

/// The elements of a varargs slot.
fn rest(arg: &DataObject) -> Vec<DataObject> {
    match arg.value() {
        Value::Array(a) => a.borrow().clone(),
        _ => Vec::new(),
    }
}

/// Varargs joined the way the print family shows them.
fn joined(arg: &DataObject) -> String {
    rest(arg).iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// An integer argument; number parameters are already coerced.
fn int_arg(arg: &DataObject) -> Result<i64, NativeFault> {
    to_number(arg)
        .map(|n| n.as_i64())
        .ok_or_else(|| fault(InterpretingError::NoNum, format!("\"{arg}\" is not a number")))
}

fn invalid(message: impl Into<String>) -> NativeFault {
    fault(InterpretingError::InvalidArguments, message)
}
