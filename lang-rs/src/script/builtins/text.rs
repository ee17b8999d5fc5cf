//! Text natives.  Indices count chars, not bytes; negative indices count
//! from the end.

use super::{int_arg, rest};
use crate::pattern::{self, Pattern};
use crate::script::error::InterpretingError;
use crate::script::native::{fault, Descriptor, NativeFault, NativeRegistry};
use crate::script::ops::{bounded_len, resolve_index};
use crate::script::value::DataObject;

fn regex(src: &str) -> Result<Pattern, NativeFault> {
    pattern::cached(src).map_err(|e| fault(InterpretingError::InvalidRegexSyntax, e.to_string()))
}

/// Resolve a possibly negative char boundary (`0..=len`).
fn boundary(index: i64, len: usize) -> Result<usize, NativeFault> {
    if index == len as i64 {
        return Ok(len);
    }
    Ok(resolve_index(index, len)?)
}

pub(super) fn register(r: &mut NativeRegistry) {
    r.register(Descriptor::function("len").param("$text"), |_, args, _| {
        Ok(DataObject::int(args[0].to_string().chars().count() as i32))
    });
    r.register(Descriptor::function("toUpper").param("$text"), |_, args, _| {
        Ok(DataObject::text(args[0].to_string().to_uppercase()))
    });
    r.register(Descriptor::function("toLower").param("$text"), |_, args, _| {
        Ok(DataObject::text(args[0].to_string().to_lowercase()))
    });
    r.register(Descriptor::function("trim").param("$text"), |_, args, _| {
        Ok(DataObject::text(args[0].to_string().trim()))
    });
    r.register(
        Descriptor::function("substring").param("$text").number_param("$start").varargs("&end"),
        |_, args, _| {
            let chars: Vec<char> = args[0].to_string().chars().collect();
            let start = boundary(int_arg(&args[1])?, chars.len())?;
            let end = match rest(&args[2]).first() {
                Some(e) => boundary(int_arg(e)?, chars.len())?,
                None => chars.len(),
            };
            if start > end {
                return Err(fault(
                    InterpretingError::IndexOutOfBounds,
                    format!("start {start} is after end {end}"),
                ));
            }
            Ok(DataObject::text(chars[start..end].iter().collect::<String>()))
        },
    );
    r.register(Descriptor::function("indexOf").param("$text").param("$search"), |_, args, _| {
        let text = args[0].to_string();
        let found = text
            .find(&args[1].to_string())
            .map_or(-1, |byte| text[..byte].chars().count() as i32);
        Ok(DataObject::int(found))
    });
    r.register(Descriptor::function("charAt").param("$text").number_param("$index"), |_, args, _| {
        let chars: Vec<char> = args[0].to_string().chars().collect();
        let i = resolve_index(int_arg(&args[1])?, chars.len())?;
        Ok(DataObject::char(chars[i]))
    });
    r.register(
        Descriptor::function("repeatText").param("$text").number_param("$count"),
        |_, args, _| {
            let count = int_arg(&args[1])?;
            let count = usize::try_from(count).map_err(|_| {
                fault(InterpretingError::NegativeRepeatCount, format!("can't repeat {count} times"))
            })?;
            let text = args[0].to_string();
            let count = bounded_len(count, text.len())?;
            Ok(DataObject::text(text.repeat(count)))
        },
    );

    // ── Regex ─────────────────────────────────────────────────────────────────

    r.register(Descriptor::function("split").param("$text").param("$regex"), |_, args, _| {
        let text = args[0].to_string();
        let parts = regex(&args[1].to_string())?
            .split(&text)
            .into_iter()
            .map(DataObject::text)
            .collect();
        Ok(DataObject::array(parts))
    });
    r.register(Descriptor::function("matches").param("$text").param("$regex"), |_, args, _| {
        Ok(DataObject::boolean(regex(&args[1].to_string())?.matches(&args[0].to_string())))
    });
    r.register(
        Descriptor::function("replace").param("$text").param("$regex").param("$replacement"),
        |_, args, _| {
            let p = regex(&args[1].to_string())?;
            Ok(DataObject::text(p.replace_all(&args[0].to_string(), &args[2].to_string())))
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
    fn basic_text_functions() {
        assert_eq!(show("return func.len(héllo)"), "5");
        assert_eq!(show("return func.toUpper(abc)"), "ABC");
        assert_eq!(show("return func.indexOf(hello, ll)"), "2");
        assert_eq!(show("return func.indexOf(hello, z)"), "-1");
        assert_eq!(show("return func.charAt(hello, -1)"), "o");
        assert_eq!(show("return func.repeatText(ab, 3)"), "ababab");
        assert_eq!(
            errno("$r = func.repeatText(ab, 100000000000)"),
            InterpretingError::InvalidArguments.code().to_string()
        );
    }

    #[test]
    fn substring_bounds() {
        assert_eq!(show("return func.substring(hello, 1, 3)"), "el");
        assert_eq!(show("return func.substring(hello, 2)"), "llo");
        assert_eq!(show("return func.substring(hello, 5)"), "");
        assert_eq!(
            show("$r = func.substring(hello, 9)\nreturn $LANG_ERRNO"),
            InterpretingError::IndexOutOfBounds.code().to_string()
        );
    }

    #[test]
    fn regex_functions() {
        assert_eq!(show("return func.split(a1b22c, \\\\d+)"), "[a, b, c]");
        assert_eq!(show("return func.matches(abc123, [a-z]+\\\\d+)"), "1");
        assert_eq!(show("return func.replace(2024-01-31, (\\\\d+)-(\\\\d+)-(\\\\d+), $3.$2.$1)"), "31.01.2024");
    }

    #[test]
    fn invalid_regex_sets_errno() {
        assert_eq!(
            show("$r = func.matches(abc, \\()\nreturn $LANG_ERRNO"),
            InterpretingError::InvalidRegexSyntax.code().to_string()
        );
    }
}
