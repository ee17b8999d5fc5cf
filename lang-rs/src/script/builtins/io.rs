//! Output, `func.format` and error-value helpers.

use std::fmt::Write as _;

use super::{int_arg, joined, rest};
use crate::script::error::{ErrorObject, InterpretingError};
use crate::script::native::{fault, Descriptor, NativeRegistry};
use crate::script::ops::{bounded_len, to_number};
use crate::script::value::{DataObject, DataTypeSet, TypeConstraint, Value};

fn error_param() -> TypeConstraint {
    TypeConstraint::allow(DataTypeSet::ERROR)
}

pub(super) fn register(r: &mut NativeRegistry) {
    r.register(Descriptor::function("print").varargs("&text"), |it, args, _| {
        it.print(&joined(&args[0]));
        Ok(DataObject::void())
    });
    r.register(Descriptor::function("println").varargs("&text"), |it, args, _| {
        let mut line = joined(&args[0]);
        line.push('\n');
        it.print(&line);
        Ok(DataObject::void())
    });
    r.register(Descriptor::function("printError").varargs("&text"), |it, args, _| {
        it.print_error(&joined(&args[0]));
        Ok(DataObject::void())
    });
    r.register(
        Descriptor::function("printTerminal").number_param("$level").varargs("&text"),
        |it, args, _| {
            let level = int_arg(&args[0])?;
            let text = joined(&args[1]);
            let name = match level {
                1 => "USER",
                2 => "DEBUG",
                3 => "CONFIG",
                4 => "INFO",
                5 => "WARNING",
                6 => "ERROR",
                7 => "CRITICAL",
                _ => return Err(fault(InterpretingError::InvalidLogLevel, format!("{level} is not a log level"))),
            };
            match level {
                2 | 3 => tracing::debug!(target: "lang::terminal", "{text}"),
                5 => tracing::warn!(target: "lang::terminal", "{text}"),
                6 | 7 => tracing::error!(target: "lang::terminal", "{text}"),
                _ => tracing::info!(target: "lang::terminal", "{text}"),
            }
            if it.flags.allow_term_redirect {
                it.print(&format!("[{name}]: {text}\n"));
            }
            Ok(DataObject::void())
        },
    );
    r.register(Descriptor::function("format").param("$format").varargs("&args"), |_, args, _| {
        Ok(DataObject::text(format_text(&args[0].to_string(), &rest(&args[1]))?))
    });

    // ── Error values ──────────────────────────────────────────────────────────

    r.register(Descriptor::function("getErrorCode").typed_param("$error", error_param()), |_, args, _| {
        Ok(DataObject::int(args[0].error().map_or(0, ErrorObject::code)))
    });
    r.register(Descriptor::function("getErrorText").typed_param("$error", error_param()), |_, args, _| {
        Ok(DataObject::text(args[0].error().map_or("", |e| e.err.description())))
    });
    r.register(
        Descriptor::function("getErrorString")
            .typed_param("$error", error_param())
            .deprecated(Some("1.2.0"), Some("func.getErrorText")),
        |_, args, _| Ok(DataObject::text(args[0].error().map_or("", |e| e.err.description()))),
    );
    r.register(Descriptor::function("getErrorMessage").typed_param("$error", error_param()), |_, args, _| {
        Ok(match args[0].error().and_then(ErrorObject::custom_message) {
            Some(m) => DataObject::text(m),
            None => DataObject::null(),
        })
    });
    r.register(
        Descriptor::function("withErrorMessage").typed_param("$error", error_param()).param("$message"),
        |_, args, _| {
            let err = args[0].error().map_or(InterpretingError::NoError, |e| e.err);
            Ok(DataObject::error(ErrorObject::with_message(err, args[1].to_string())))
        },
    );
}

fn next_arg<'a>(
    args: &mut impl Iterator<Item = &'a DataObject>,
    spec: char,
) -> Result<&'a DataObject, ErrorObject> {
    args.next().ok_or_else(|| {
        ErrorObject::with_message(InterpretingError::InvalidFormat, format!("no argument left for %{spec}"))
    })
}

/// Expand `%s %d %f %c %%`; `%.Nf` and `%.Ns` take a precision.
pub(crate) fn format_text(fmt: &str, args: &[DataObject]) -> Result<String, ErrorObject> {
    let mut out = String::with_capacity(fmt.len());
    let mut args = args.iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            let p = digits.parse::<usize>().map_err(|_| {
                ErrorObject::with_message(InterpretingError::InvalidFormat, "missing precision after %.")
            })?;
            precision = Some(bounded_len(p, 1)?);
        }
        let Some(spec) = chars.next() else {
            return Err(ErrorObject::with_message(InterpretingError::InvalidFormat, "format ends with %"));
        };
        match (spec, precision) {
            ('%', None) => out.push('%'),
            ('s', p) => {
                let text = next_arg(&mut args, spec)?.to_string();
                match p {
                    Some(p) => out.extend(text.chars().take(p)),
                    None => out.push_str(&text),
                }
            }
            ('d', None) => {
                let a = next_arg(&mut args, spec)?;
                let n = to_number(a).ok_or_else(|| {
                    ErrorObject::with_message(InterpretingError::NoNum, format!("%d needs a number, got \"{a}\""))
                })?;
                let _ = write!(out, "{}", n.as_i64());
            }
            ('f', p) => {
                let a = next_arg(&mut args, spec)?;
                let x = to_number(a)
                    .ok_or_else(|| {
                        ErrorObject::with_message(InterpretingError::NoNum, format!("%f needs a number, got \"{a}\""))
                    })?
                    .as_f64();
                let _ = match p {
                    Some(p) => write!(out, "{x:.p$}"),
                    None => write!(out, "{x}"),
                };
            }
            ('c', None) => {
                let a = next_arg(&mut args, spec)?;
                let c = match a.value() {
                    Value::Char(c) => Some(*c),
                    other => to_number(other).and_then(|n| u32::try_from(n.as_i64()).ok()).and_then(char::from_u32),
                };
                out.push(c.ok_or_else(|| {
                    ErrorObject::with_message(InterpretingError::NoChar, format!("%c needs a char, got \"{a}\""))
                })?);
            }
            (other, _) => {
                return Err(ErrorObject::with_message(
                    InterpretingError::InvalidFormat,
                    format!("%{other} is not a format sequence"),
                ));
            }
        }
    }
    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::interp::{Interpreter, InterpreterOptions};
    use pretty_assertions::assert_eq;

    fn output(src: &str) -> Vec<String> {
        let mut it = Interpreter::new(InterpreterOptions { error_output: 0, ..Default::default() });
        it.interpret(src).unwrap();
        it.take_output()
    }

    #[test]
    fn format_sequences() {
        let args = vec![DataObject::text("x"), DataObject::int(42), DataObject::double(1.5), DataObject::int(65)];
        assert_eq!(format_text("%s=%d %f %c 100%%", &args).unwrap(), "x=42 1.5 A 100%");
        assert_eq!(format_text("%.2f|%.3s", &[DataObject::double(3.14159), DataObject::text("abcdef")]).unwrap(), "3.14|abc");
    }

    #[test]
    fn format_errors() {
        assert_eq!(format_text("%q", &[]).unwrap_err().err, InterpretingError::InvalidFormat);
        assert_eq!(format_text("%s", &[]).unwrap_err().err, InterpretingError::InvalidFormat);
        assert_eq!(format_text("%d", &[DataObject::text("abc")]).unwrap_err().err, InterpretingError::NoNum);
        assert_eq!(format_text("50%", &[]).unwrap_err().err, InterpretingError::InvalidFormat);
        assert_eq!(
            format_text("%.999999999999f", &[DataObject::double(1.0)]).unwrap_err().err,
            InterpretingError::InvalidArguments
        );
    }

    #[test]
    fn print_family() {
        assert_eq!(output("func.print(a)\nfunc.println(b, c)\nfunc.println(d)"), vec!["ab, c", "d"]);
    }

    #[test]
    fn print_error_goes_to_error_output() {
        let mut it = Interpreter::new(InterpreterOptions::default());
        it.interpret("func.printError(oops)").unwrap();
        assert_eq!(it.error_output, vec!["oops"]);
        assert!(it.take_output().is_empty());
    }

    #[test]
    fn print_terminal_levels() {
        assert_eq!(output("func.printTerminal(5, disk almost full)"), vec!["[WARNING]: disk almost full"]);
        assert_eq!(output("lang.allowTermRedirect = 0\nfunc.printTerminal(4, quiet)"), Vec::<String>::new());
        assert_eq!(
            output("$r = func.printTerminal(9, x)\nfunc.println($LANG_ERRNO)"),
            vec![InterpretingError::InvalidLogLevel.code().to_string()]
        );
    }

    #[test]
    fn format_from_script() {
        assert_eq!(output("func.println(func.format(%s has %d items, box, 3))"), vec!["box has 3 items"]);
    }

    #[test]
    fn error_value_helpers() {
        let out = output(
            "$e = func.withErrorMessage($LANG_ERROR_NO_NUM, bad input)\n\
             func.println(func.getErrorCode($e))\n\
             func.println(func.getErrorText($e))\n\
             func.println(func.getErrorMessage($e))\n\
             func.println(func.getErrorMessage($LANG_ERROR_NO_NUM))",
        );
        assert_eq!(out, vec!["13", "No number", "bad input", "null"]);
    }

    #[test]
    fn deprecated_function_still_works() {
        assert_eq!(output("func.println(func.getErrorString($LANG_ERROR_DIV_BY_ZERO))"), vec!["Dividing by 0"]);
    }
}
