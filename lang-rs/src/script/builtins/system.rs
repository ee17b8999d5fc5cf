//! Calls, `exec`, translations, the test natives and the linker.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use super::{int_arg, invalid, rest};
use crate::langfile;
use crate::script::error::{ErrorObject, InterpretingError};
use crate::script::interp::{lang_var_slot, split_path, Interpreter};
use crate::script::module;
use crate::script::native::{fault, Descriptor, NativeFault, NativeRegistry};
use crate::script::ops::{loose_equals, truthy};
use crate::script::scope::{ScopeId, ScopeRef};
use crate::script::value::{DataObject, Value};

// ── Test results ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct TestUnit {
    name: String,
    /// `(passed, description)` per assertion.
    results: Vec<(bool, String)>,
}

/// Assertion results collected while `lang.test` is on.
#[derive(Debug, Default)]
pub(crate) struct TestState {
    units: Vec<TestUnit>,
}

impl TestState {
    fn start_unit(&mut self, name: String) {
        self.units.push(TestUnit { name, results: Vec::new() });
    }

    fn record(&mut self, passed: bool, description: String) {
        if self.units.is_empty() {
            self.start_unit("default".to_owned());
        }
        if let Some(unit) = self.units.last_mut() {
            unit.results.push((passed, description));
        }
    }

    fn report(&self) -> String {
        let mut out = String::new();
        let (mut passed, mut total) = (0, 0);
        for unit in &self.units {
            let ok = unit.results.iter().filter(|(p, _)| *p).count();
            let _ = writeln!(out, "Unit \"{}\": {ok}/{} passed", unit.name, unit.results.len());
            for (_, description) in unit.results.iter().filter(|(p, _)| !p) {
                let _ = writeln!(out, "  FAILED {description}");
            }
            passed += ok;
            total += unit.results.len();
        }
        let _ = writeln!(out, "Total: {passed}/{total} passed");
        out
    }
}

fn require_test_mode(it: &Interpreter) -> Result<(), NativeFault> {
    if it.flags.test {
        Ok(())
    } else {
        Err(fault(InterpretingError::FunctionNotSupported, "test functions need lang.test = 1"))
    }
}

/// Register an assertion over the leading `arity` arguments; a trailing
/// varargs slot holds the optional message.
fn assertion(
    r: &mut NativeRegistry,
    name: &'static str,
    params: &[&str],
    check: fn(&[DataObject]) -> (bool, String),
) {
    let descriptor = params
        .iter()
        .fold(Descriptor::function(name), |d, p| d.param(p))
        .varargs("&message");
    let arity = params.len();
    r.register(descriptor, move |it, args, _| {
        require_test_mode(it)?;
        let (passed, detail) = check(&args[..arity]);
        let mut description = format!("{name}: {detail}");
        let message = super::joined(&args[arity]);
        if !message.is_empty() {
            let _ = write!(description, " ({message})");
        }
        if !passed {
            tracing::debug!(%description, "assertion failed");
        }
        it.tests.record(passed, description);
        Ok(DataObject::void())
    });
}

// ── Linker helpers ────────────────────────────────────────────────────────────

/// Run the script at `path` in a fresh scope under the module scope.
fn run_file(it: &mut Interpreter, path: &str, caller: ScopeId) -> Result<(DataObject, ScopeRef), NativeFault> {
    let caller = it.scope_or_global(caller);
    let path = it.resolve_script_path(path, &caller);
    let src = it
        .read_script(&path)
        .map_err(|e| fault(InterpretingError::FileNotFound, format!("{path}: {e}")))?;
    let global = it.global_scope();
    let file_scope = it.create_scope(Some(global));
    {
        let (dir, file) = split_path(&path);
        let mut s = file_scope.borrow_mut();
        s.insert("$LANG_PATH", lang_var_slot("$LANG_PATH", Value::Text(dir)));
        s.insert("$LANG_FILE", lang_var_slot("$LANG_FILE", Value::Text(file)));
    }
    tracing::debug!(%path, "running script file");
    let value = it.exec_source(&src, &file_scope)?;
    Ok((value, file_scope))
}

fn copy_translations(
    it: &mut Interpreter,
    entries: impl IntoIterator<Item = (String, String)>,
    target: &ScopeRef,
) -> Result<(), ErrorObject> {
    for (key, value) in entries {
        it.set_translation(target, &key, &value)?;
    }
    Ok(())
}

fn module_args(args: &[DataObject]) -> Vec<DataObject> {
    let mut all = vec![args[0].clone()];
    all.extend(rest(&args[1]));
    all
}

pub(super) fn register(r: &mut NativeRegistry) {
    // ── Functions and code ────────────────────────────────────────────────────

    r.register(Descriptor::function("call").param("fp.func").varargs("&args"), |it, args, scope| {
        it.call_from_native(args[0].value(), rest(&args[1]), scope)
    });
    r.register(Descriptor::function("exec").param("$code"), |it, args, scope| {
        let s = it.scope_or_global(scope);
        it.exec_source(&args[0].to_string(), &s)
    });
    r.register(Descriptor::function("sleep").number_param("$milliSeconds"), |_, args, _| {
        let ms = int_arg(&args[0])?;
        let ms = u64::try_from(ms).map_err(|_| invalid(format!("can't sleep {ms} ms")))?;
        std::thread::sleep(Duration::from_millis(ms));
        Ok(DataObject::void())
    });

    // ── Translations ──────────────────────────────────────────────────────────

    r.register(Descriptor::function("getTranslationValue").param("$key"), |it, args, scope| {
        let key = args[0].to_string();
        let s = it.scope_or_global(scope);
        it.get_translation(&s, &key)
            .map(DataObject::text)
            .ok_or_else(|| fault(InterpretingError::LangReqNotFound, format!("no translation for \"{key}\"")))
    });
    r.register(
        Descriptor::function("setTranslationValue").param("$key").param("$value"),
        |it, args, scope| {
            let s = it.scope_or_global(scope);
            it.set_translation(&s, &args[0].to_string(), &args[1].to_string())?;
            Ok(DataObject::void())
        },
    );
    r.register(Descriptor::function("removeTranslationValue").param("$key"), |it, args, scope| {
        let s = it.scope_or_global(scope);
        s.borrow_mut().translations_mut().remove(&args[0].to_string());
        Ok(DataObject::void())
    });

    // ── Tests ─────────────────────────────────────────────────────────────────

    r.register(Descriptor::function("testUnit").param("$name"), |it, args, _| {
        require_test_mode(it)?;
        it.tests.start_unit(args[0].to_string());
        Ok(DataObject::void())
    });
    assertion(r, "testAssertEquals", &["$actual", "$expected"], |a| {
        (loose_equals(&a[0], &a[1]), format!("expected \"{}\", got \"{}\"", a[1], a[0]))
    });
    assertion(r, "testAssertNotEquals", &["$actual", "$expected"], |a| {
        (!loose_equals(&a[0], &a[1]), format!("expected anything but \"{}\"", a[1]))
    });
    assertion(r, "testAssertTrue", &["$actual"], |a| {
        (truthy(&a[0]), format!("\"{}\" is not true", a[0]))
    });
    assertion(r, "testAssertFalse", &["$actual"], |a| {
        (!truthy(&a[0]), format!("\"{}\" is not false", a[0]))
    });
    assertion(r, "testAssertNull", &["$actual"], |a| {
        (a[0].is_null(), format!("{} is not null", a[0].data_type()))
    });
    assertion(r, "testAssertError", &["$actual", "$expected"], |a| {
        let same = match (a[0].error(), a[1].error()) {
            (Some(actual), Some(expected)) => actual.err == expected.err,
            _ => false,
        };
        (same, format!("expected error {}, got {}", a[1], a[0]))
    });
    r.register(Descriptor::function("testPrintResults"), |it, _, _| {
        require_test_mode(it)?;
        let report = it.tests.report();
        it.print(&report);
        Ok(DataObject::void())
    });

    // ── Linker ────────────────────────────────────────────────────────────────

    r.register(Descriptor::linker("loadModule").param("$name").varargs("&args"), |it, args, scope| {
        module::load(it, &args[0].to_string(), &module_args(&args), scope)
    });
    r.register(Descriptor::linker("unloadModule").param("$name").varargs("&args"), |it, args, scope| {
        module::unload(it, &args[0].to_string(), &module_args(&args), scope)
    });
    r.register(Descriptor::linker("include").param("$file"), |it, args, scope| {
        let (value, _) = run_file(it, &args[0].to_string(), scope)?;
        Ok(value)
    });
    r.register(Descriptor::linker("bindLibrary").param("$file"), |it, args, scope| {
        let (value, file_scope) = run_file(it, &args[0].to_string(), scope)?;
        let caller = it.scope_or_global(scope);
        let (vars, translations): (Vec<(String, DataObject)>, Vec<(String, String)>) = {
            let s = file_scope.borrow();
            (
                s.vars()
                    .filter(|(_, slot)| !slot.is_lang_var())
                    .map(|(name, slot)| (name.clone(), slot.clone()))
                    .collect(),
                s.translations().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )
        };
        {
            let mut c = caller.borrow_mut();
            for (name, slot) in vars {
                c.insert(name, slot);
            }
        }
        copy_translations(it, translations, &caller)?;
        Ok(value)
    });
    r.register(Descriptor::linker("link").param("$file"), |it, args, scope| {
        let caller = it.scope_or_global(scope);
        let path = it.resolve_script_path(&args[0].to_string(), &caller);
        let map = langfile::cache()
            .lock()
            .get_or_load(Path::new(&path))
            .map_err(|e| fault(InterpretingError::FileNotFound, e.to_string()))?;
        copy_translations(it, map.iter().map(|(k, v)| (k.clone(), v.clone())), &caller)?;
        Ok(DataObject::void())
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
