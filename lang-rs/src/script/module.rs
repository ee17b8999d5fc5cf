//! Native modules: load/unload lifecycle and the export API.
//!
//! A module moves through `Unloaded → Loading → Loaded → Unloading →
//! Unloaded`.  Its [`NativeModule::load`] hook receives a [`ModuleContext`]
//! through which it exports functions and variables; exporting outside the
//! `Loading` phase is a programmer error and reported as
//! [`ModuleError::InvalidState`].
//!
//! Exports are recorded per module so that unloading (or a failed load)
//! removes exactly what the module added.  An export may shadow an existing
//! native function or non-final variable; the shadowed entry comes back when
//! the module is unloaded.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use super::interp::Interpreter;
use super::native::{Descriptor, NativeFault, NativeFunction, NativeResult};
use super::scope::{ScopeId, MODULE_SCOPE};
use super::value::{DataObject, FunctionPointer, TypeConstraint, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleState::Unloaded => "unloaded",
            ModuleState::Loading => "loading",
            ModuleState::Loaded => "loaded",
            ModuleState::Unloading => "unloading",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("module \"{name}\" is {state}; exports are only allowed while loading")]
    InvalidState { name: String, state: ModuleState },
    #[error("\"{0}\" is not a valid identifier (only letters, digits and '_' are allowed)")]
    InvalidIdentifier(String),
    #[error("\"{0}\" starts with the reserved LANG prefix")]
    ReservedPrefix(String),
    #[error("\"{0}\" is final and can't be replaced by a module export")]
    FinalVariable(String),
    #[error("module \"{0}\" is not registered")]
    UnknownModule(String),
    #[error("module \"{0}\" is already loaded")]
    AlreadyLoaded(String),
    #[error("module \"{0}\" is not loaded")]
    NotLoaded(String),
}

/// Host-implemented module body.
pub trait NativeModule {
    /// Called by `linker.loadModule`; the returned value is the call's result.
    fn load(&mut self, ctx: &mut ModuleContext<'_>, args: &[DataObject]) -> NativeResult;

    /// Called by `linker.unloadModule` before the exports are removed.
    fn unload(&mut self, _ctx: &mut ModuleContext<'_>, _args: &[DataObject]) -> NativeResult {
        Ok(DataObject::void())
    }
}

/// Everything a module added, with whatever each export shadowed.
#[derive(Debug, Default)]
struct Exports {
    /// Qualified native names (`func.x`, `linker.x`).
    functions: Vec<(String, Option<Rc<NativeFunction>>)>,
    /// Sigil-qualified variable names in the module scope.
    variables: Vec<(String, Option<DataObject>)>,
}

pub struct ModuleEntry {
    /// `None` while the module's own hook is running.
    module: Option<Box<dyn NativeModule>>,
    state: ModuleState,
    exports: Exports,
}

impl ModuleEntry {
    pub fn new(module: Box<dyn NativeModule>) -> Self {
        Self { module: Some(module), state: ModuleState::Unloaded, exports: Exports::default() }
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn exported_functions(&self) -> impl Iterator<Item = &str> {
        self.exports.functions.iter().map(|(name, _)| name.as_str())
    }

    pub fn exported_variables(&self) -> impl Iterator<Item = &str> {
        self.exports.variables.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("state", &self.state)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// What a module sees while loading or unloading.
pub struct ModuleContext<'a> {
    pub interp: &'a mut Interpreter,
    name: &'a str,
    state: ModuleState,
    caller_scope: ScopeId,
    exports: &'a mut Exports,
}

fn validate_identifier(name: &str) -> Result<(), ModuleError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ModuleError::InvalidIdentifier(name.to_owned()));
    }
    Ok(())
}

fn reject_reserved(name: &str) -> Result<(), ModuleError> {
    if name.starts_with("LANG") {
        return Err(ModuleError::ReservedPrefix(name.to_owned()));
    }
    Ok(())
}

impl<'a> ModuleContext<'a> {
    pub fn module_name(&self) -> &str {
        self.name
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Scope the `linker.loadModule` call came from.
    pub fn caller_scope(&self) -> ScopeId {
        self.caller_scope
    }

    fn ensure_loading(&self) -> Result<(), ModuleError> {
        if self.state != ModuleState::Loading {
            return Err(ModuleError::InvalidState { name: self.name.to_owned(), state: self.state });
        }
        Ok(())
    }

    fn export_native<F>(&mut self, descriptor: Descriptor, f: F) -> Result<(), ModuleError>
    where
        F: Fn(&mut Interpreter, Vec<DataObject>, ScopeId) -> NativeResult + 'static,
    {
        self.ensure_loading()?;
        validate_identifier(&descriptor.name)?;
        let qualified = descriptor.qualified_name();
        let shadowed = self.interp.natives.get(&qualified);
        self.interp.natives.register(descriptor, f);
        tracing::debug!(module = self.name, function = %qualified, shadows = shadowed.is_some(), "exported function");
        self.exports.functions.push((qualified, shadowed));
        Ok(())
    }

    /// Export `func.<descriptor.name>`.
    pub fn export_function<F>(&mut self, mut descriptor: Descriptor, f: F) -> Result<(), ModuleError>
    where
        F: Fn(&mut Interpreter, Vec<DataObject>, ScopeId) -> NativeResult + 'static,
    {
        descriptor.linker = false;
        self.export_native(descriptor, f)
    }

    /// Export `linker.<descriptor.name>`.
    pub fn export_linker_function<F>(
        &mut self,
        mut descriptor: Descriptor,
        f: F,
    ) -> Result<(), ModuleError>
    where
        F: Fn(&mut Interpreter, Vec<DataObject>, ScopeId) -> NativeResult + 'static,
    {
        descriptor.linker = true;
        self.export_native(descriptor, f)
    }

    fn export_variable(
        &mut self,
        qualified: String,
        value: Value,
        constraint: TypeConstraint,
        final_data: bool,
    ) -> Result<(), ModuleError> {
        let mut slot = DataObject::new(value).with_name(qualified.clone()).with_constraint(constraint);
        if final_data {
            slot.set_final();
        }
        let global = self.interp.global_scope();
        let mut global = global.borrow_mut();
        let shadowed = global.get(&qualified).cloned();
        if shadowed.as_ref().is_some_and(DataObject::is_final) {
            return Err(ModuleError::FinalVariable(qualified));
        }
        global.insert(qualified.clone(), slot);
        tracing::debug!(module = self.name, variable = %qualified, shadows = shadowed.is_some(), "exported variable");
        self.exports.variables.push((qualified, shadowed));
        Ok(())
    }

    /// Export `$name`.
    pub fn export_normal_variable(
        &mut self,
        name: &str,
        value: Value,
        final_data: bool,
    ) -> Result<(), ModuleError> {
        self.ensure_loading()?;
        validate_identifier(name)?;
        reject_reserved(name)?;
        self.export_variable(format!("${name}"), value, TypeConstraint::any(), final_data)
    }

    /// Export `&name`.  A non-collection value is wrapped in an array.
    pub fn export_collection_variable(
        &mut self,
        name: &str,
        value: Value,
        final_data: bool,
    ) -> Result<(), ModuleError> {
        self.ensure_loading()?;
        validate_identifier(name)?;
        reject_reserved(name)?;
        let constraint = TypeConstraint::collection();
        let value = if constraint.allows(value.data_type()) {
            value
        } else {
            Value::new_array(vec![DataObject::new(value)])
        };
        self.export_variable(format!("&{name}"), value, constraint, final_data)
    }

    /// Export `fp.name`.
    pub fn export_function_pointer_variable(
        &mut self,
        name: &str,
        fp: FunctionPointer,
        final_data: bool,
    ) -> Result<(), ModuleError> {
        self.ensure_loading()?;
        validate_identifier(name)?;
        let qualified = format!("fp.{name}");
        let fp = if fp.name().is_some() { fp } else { fp.with_name(qualified.clone()) };
        let value = Value::FunctionPointer(std::rc::Rc::new(fp));
        self.export_variable(qualified, value, TypeConstraint::function_pointer(), final_data)
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

/// Undo the exports newest first, putting back whatever they shadowed.
fn remove_exports(interp: &mut Interpreter, exports: &mut Exports) {
    for (name, shadowed) in exports.functions.drain(..).rev() {
        interp.natives.remove(&name);
        if let Some(previous) = shadowed {
            interp.natives.insert(previous);
        }
    }
    let global = interp.global_scope();
    let mut global = global.borrow_mut();
    for (name, shadowed) in exports.variables.drain(..).rev() {
        global.remove(&name);
        if let Some(previous) = shadowed {
            global.insert(name, previous);
        }
    }
}

/// Move `name` into `phase` and hand out its module body and exports.
///
/// The entry stays in the table so the host can observe the transitional
/// state while the hook runs.
fn begin(
    interp: &mut Interpreter,
    name: &str,
    from: ModuleState,
    phase: ModuleState,
) -> Result<(Box<dyn NativeModule>, Exports), ModuleError> {
    let entry = interp
        .modules
        .get_mut(name)
        .ok_or_else(|| ModuleError::UnknownModule(name.to_owned()))?;
    let module = match entry.module.take() {
        Some(module) if entry.state == from => module,
        module => {
            entry.module = module;
            return Err(match from {
                ModuleState::Unloaded => ModuleError::AlreadyLoaded(name.to_owned()),
                _ => ModuleError::NotLoaded(name.to_owned()),
            });
        }
    };
    entry.state = phase;
    Ok((module, std::mem::take(&mut entry.exports)))
}

fn finish(
    interp: &mut Interpreter,
    name: &str,
    module: Box<dyn NativeModule>,
    exports: Exports,
    state: ModuleState,
) {
    let entry = interp.modules.entry(name.to_owned()).or_insert_with(|| ModuleEntry {
        module: None,
        state,
        exports: Exports::default(),
    });
    entry.module = Some(module);
    entry.state = state;
    entry.exports = exports;
}

/// Load the registered module `name`.
///
/// A failed load rolls its exports back and leaves the module `Unloaded`.
pub fn load(
    interp: &mut Interpreter,
    name: &str,
    args: &[DataObject],
    caller_scope: ScopeId,
) -> NativeResult {
    let (mut module, mut exports) = begin(interp, name, ModuleState::Unloaded, ModuleState::Loading)?;
    tracing::debug!(module = name, "loading module");
    let result = {
        let mut ctx = ModuleContext {
            interp: &mut *interp,
            name,
            state: ModuleState::Loading,
            caller_scope,
            exports: &mut exports,
        };
        module.load(&mut ctx, args)
    };

    let state = match &result {
        Ok(_) => {
            tracing::debug!(module = name, "module loaded");
            ModuleState::Loaded
        }
        Err(e) => {
            remove_exports(interp, &mut exports);
            tracing::warn!(module = name, error = ?e, "module load failed");
            ModuleState::Unloaded
        }
    };
    finish(interp, name, module, exports, state);
    result
}

/// Unload the module `name`, removing everything it exported.
pub fn unload(
    interp: &mut Interpreter,
    name: &str,
    args: &[DataObject],
    caller_scope: ScopeId,
) -> NativeResult {
    let (mut module, mut exports) = begin(interp, name, ModuleState::Loaded, ModuleState::Unloading)?;
    tracing::debug!(module = name, "unloading module");
    let result = {
        let mut ctx = ModuleContext {
            interp: &mut *interp,
            name,
            state: ModuleState::Unloading,
            caller_scope,
            exports: &mut exports,
        };
        module.unload(&mut ctx, args)
    };
    remove_exports(interp, &mut exports);
    finish(interp, name, module, exports, ModuleState::Unloaded);
    result
}

/// Map a module fault onto the host-facing `ModuleError` when it is one.
pub fn module_error(fault: &NativeFault) -> Option<&ModuleError> {
    match fault {
        NativeFault::Module(e) => Some(e),
        _ => None,
    }
}

/// Convenience for modules: the module scope id.
pub const fn module_scope() -> ScopeId {
    MODULE_SCOPE
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::error::InterpretingError;
    use crate::script::interp::InterpreterOptions;
    use crate::script::scope::lookup;

    struct Greeter;

    impl NativeModule for Greeter {
        fn load(&mut self, ctx: &mut ModuleContext<'_>, _args: &[DataObject]) -> NativeResult {
            ctx.export_function(Descriptor::function("greet").param("$who"), |_, args, _| {
                Ok(DataObject::text(format!("Hello, {}!", args[0].value())))
            })?;
            ctx.export_normal_variable("greeting", Value::from("hi"), true)?;
            ctx.export_collection_variable("names", Value::from("solo"), false)?;
            Ok(DataObject::text("loaded"))
        }
    }

    struct Reserved;

    impl NativeModule for Reserved {
        fn load(&mut self, ctx: &mut ModuleContext<'_>, _args: &[DataObject]) -> NativeResult {
            ctx.export_function(Descriptor::function("temp"), |_, _, _| Ok(DataObject::void()))?;
            ctx.export_normal_variable("LANGfoo", Value::Int(1), false)?;
            Ok(DataObject::void())
        }
    }

    struct Shadowing;

    impl NativeModule for Shadowing {
        fn load(&mut self, ctx: &mut ModuleContext<'_>, _args: &[DataObject]) -> NativeResult {
            ctx.export_function(Descriptor::function("toUpper").param("$text"), |_, _, _| {
                Ok(DataObject::text("shadowed"))
            })?;
            ctx.export_normal_variable("count", Value::Int(99), false)?;
            ctx.export_normal_variable("user", Value::Int(7), false)?;
            Ok(DataObject::void())
        }
    }

    struct Watcher;

    impl NativeModule for Watcher {
        fn load(&mut self, ctx: &mut ModuleContext<'_>, _args: &[DataObject]) -> NativeResult {
            let state = ctx.interp.module_state(ctx.module_name());
            Ok(DataObject::text(state.map(|s| s.to_string()).unwrap_or_default()))
        }

        fn unload(&mut self, ctx: &mut ModuleContext<'_>, _args: &[DataObject]) -> NativeResult {
            let state = ctx.interp.module_state(ctx.module_name());
            Ok(DataObject::text(state.map(|s| s.to_string()).unwrap_or_default()))
        }
    }

    fn interp() -> Interpreter {
        Interpreter::new(InterpreterOptions::default())
    }

    fn ret(it: &mut Interpreter, src: &str) -> String {
        it.eval(src).unwrap().map(|v| v.to_string()).unwrap_or_default()
    }

    #[test]
    fn load_exports_and_unload_removes() {
        let mut it = interp();
        it.register_module("greeter", Box::new(Greeter));
        let v = load(&mut it, "greeter", &[], MODULE_SCOPE).unwrap();
        assert_eq!(v.to_string(), "loaded");
        assert_eq!(it.module_state("greeter"), Some(ModuleState::Loaded));
        assert!(it.natives.contains("func.greet"));

        let global = it.global_scope();
        let greeting = lookup(&global, "$greeting").unwrap();
        assert!(greeting.is_final());
        assert_eq!(lookup(&global, "&names").unwrap().to_string(), "[solo]");

        unload(&mut it, "greeter", &[], MODULE_SCOPE).unwrap();
        assert_eq!(it.module_state("greeter"), Some(ModuleState::Unloaded));
        assert!(!it.natives.contains("func.greet"));
        assert!(lookup(&global, "$greeting").is_none());
    }

    #[test]
    fn unload_restores_shadowed_entries() {
        let mut it = interp();
        it.interpret("$count = 1").unwrap();
        it.register_module("shadow", Box::new(Shadowing));
        load(&mut it, "shadow", &[], MODULE_SCOPE).unwrap();
        assert_eq!(ret(&mut it, "return func.toUpper(a)"), "shadowed");
        assert_eq!(ret(&mut it, "return $count"), "99");

        unload(&mut it, "shadow", &[], MODULE_SCOPE).unwrap();
        assert_eq!(ret(&mut it, "return func.toUpper(a)"), "A");
        assert_eq!(ret(&mut it, "return $count"), "1");
        assert_eq!(ret(&mut it, "return $user"), "$user");
    }

    #[test]
    fn final_variables_cannot_be_shadowed() {
        let mut it = interp();
        it.interpret("final $user = 42").unwrap();
        it.register_module("shadow", Box::new(Shadowing));
        let err = load(&mut it, "shadow", &[], MODULE_SCOPE).unwrap_err();
        assert_eq!(module_error(&err), Some(&ModuleError::FinalVariable("$user".into())));
        assert_eq!(it.module_state("shadow"), Some(ModuleState::Unloaded));
        assert_eq!(ret(&mut it, "return $user"), "42");
        assert_eq!(ret(&mut it, "return func.toUpper(a)"), "A");
        assert_eq!(ret(&mut it, "return $count"), "$count");
    }

    #[test]
    fn transitional_states_are_visible_to_hooks() {
        let mut it = interp();
        it.register_module("watch", Box::new(Watcher));
        assert_eq!(load(&mut it, "watch", &[], MODULE_SCOPE).unwrap().to_string(), "loading");
        assert_eq!(it.module_state("watch"), Some(ModuleState::Loaded));
        assert_eq!(unload(&mut it, "watch", &[], MODULE_SCOPE).unwrap().to_string(), "unloading");
        assert_eq!(it.module_state("watch"), Some(ModuleState::Unloaded));
    }

    #[test]
    fn reserved_prefix_aborts_load() {
        let mut it = interp();
        it.register_module("bad", Box::new(Reserved));
        let err = load(&mut it, "bad", &[], MODULE_SCOPE).unwrap_err();
        assert_eq!(module_error(&err), Some(&ModuleError::ReservedPrefix("LANGfoo".into())));
        // Rolled back.
        assert!(!it.natives.contains("func.temp"));
        assert_eq!(it.module_state("bad"), Some(ModuleState::Unloaded));
    }

    #[test]
    fn lifecycle_errors() {
        let mut it = interp();
        assert!(matches!(
            load(&mut it, "nope", &[], MODULE_SCOPE),
            Err(NativeFault::Module(ModuleError::UnknownModule(_)))
        ));
        it.register_module("greeter", Box::new(Greeter));
        assert!(matches!(
            unload(&mut it, "greeter", &[], MODULE_SCOPE),
            Err(NativeFault::Module(ModuleError::NotLoaded(_)))
        ));
        load(&mut it, "greeter", &[], MODULE_SCOPE).unwrap();
        assert!(matches!(
            load(&mut it, "greeter", &[], MODULE_SCOPE),
            Err(NativeFault::Module(ModuleError::AlreadyLoaded(_)))
        ));
    }

    #[test]
    fn exports_outside_loading_are_rejected() {
        let mut it = interp();
        let mut exports = Exports::default();
        let mut ctx = ModuleContext {
            interp: &mut it,
            name: "m",
            state: ModuleState::Loaded,
            caller_scope: MODULE_SCOPE,
            exports: &mut exports,
        };
        let err = ctx.export_normal_variable("x", Value::Int(1), false).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidState { state: ModuleState::Loaded, .. }));
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(validate_identifier("ok_1").is_ok());
        assert_eq!(
            validate_identifier("bad-name"),
            Err(ModuleError::InvalidIdentifier("bad-name".into()))
        );
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn script_sees_module_load_errors() {
        let mut it = interp();
        it.register_module("bad", Box::new(Reserved));
        it.interpret("$r = linker.loadModule(bad)\nreturn $LANG_ERRNO").unwrap();
        let v = it.get_and_reset_return_value().unwrap();
        assert_eq!(v.int(), InterpretingError::ModuleLoadUnloadErr.code());
    }
}
