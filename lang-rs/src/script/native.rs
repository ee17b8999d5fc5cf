//! Native functions: descriptors, the registry and argument checking.
//!
//! A native function is a host closure plus a [`Descriptor`] that declares
//! its parameters.  The interpreter validates arguments against the
//! descriptor *before* the closure runs ([`check_arguments`]), so bodies can
//! rely on argument count, type constraints and numeric coercion.
//!
//! Failures inside a body come back as a [`NativeFault`]:
//!
//! | Fault | Seen by the script as |
//! |-------|-----------------------|
//! | `Lang(err)` | the error itself |
//! | `Host(NativeError)` | `SYSTEM_ERROR` carrying category and message |
//! | `Module(ModuleError)` | `MODULE_LOAD_UNLOAD_ERR` |
//! | panic | `SYSTEM_ERROR` with the panic message |
//! | `Signal(..)` | passed through (return/throw/stop) |

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use super::error::{ErrorObject, InterpretingError, NativeError};
use super::interp::{Interpreter, Signal};
use super::module::ModuleError;
use super::ops::to_number;
use super::scope::ScopeId;
use super::value::{sigil_constraint, DataObject, Parameter, TypeConstraint};

pub type NativeResult = Result<DataObject, NativeFault>;

/// Host-side callable shape shared by registry entries and external pointers.
pub type NativeCallable = Rc<dyn Fn(&mut Interpreter, Vec<DataObject>, ScopeId) -> NativeResult>;

#[derive(Debug)]
pub enum NativeFault {
    Lang(ErrorObject),
    Host(NativeError),
    Module(ModuleError),
    Signal(Signal),
}

impl From<ErrorObject> for NativeFault {
    fn from(e: ErrorObject) -> Self {
        NativeFault::Lang(e)
    }
}

impl From<InterpretingError> for NativeFault {
    fn from(e: InterpretingError) -> Self {
        NativeFault::Lang(ErrorObject::new(e))
    }
}

impl From<NativeError> for NativeFault {
    fn from(e: NativeError) -> Self {
        NativeFault::Host(e)
    }
}

impl From<std::io::Error> for NativeFault {
    fn from(e: std::io::Error) -> Self {
        NativeFault::Host(e.into())
    }
}

impl From<ModuleError> for NativeFault {
    fn from(e: ModuleError) -> Self {
        NativeFault::Module(e)
    }
}

impl From<Signal> for NativeFault {
    fn from(s: Signal) -> Self {
        NativeFault::Signal(s)
    }
}

/// Shorthand for a `Lang` fault with a message.
pub fn fault(err: InterpretingError, message: impl Into<String>) -> NativeFault {
    NativeFault::Lang(ErrorObject::with_message(err, message))
}

// ── Descriptors ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    pub removal_version: Option<String>,
    pub replacement: Option<String>,
}

/// Declared shape of a native function.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: String,
    /// Registered under `linker.` instead of `func.`.
    pub linker: bool,
    pub params: Vec<Parameter>,
    pub return_constraint: Option<TypeConstraint>,
    pub deprecation: Option<Deprecation>,
}

impl Descriptor {
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            linker: false,
            params: Vec::new(),
            return_constraint: None,
            deprecation: None,
        }
    }

    pub fn linker(name: impl Into<String>) -> Self {
        Self { linker: true, ..Self::function(name) }
    }

    pub fn param(mut self, name: &str) -> Self {
        self.params.push(Parameter::new(name));
        self
    }

    pub fn typed_param(mut self, name: &str, constraint: TypeConstraint) -> Self {
        let mut p = Parameter::new(name);
        p.constraint = Some(constraint);
        self.params.push(p);
        self
    }

    /// A parameter that must coerce to a number; the body sees the number.
    pub fn number_param(mut self, name: &str) -> Self {
        let mut p = Parameter::new(name);
        p.number = true;
        self.params.push(p);
        self
    }

    /// Collect every remaining argument into an array.
    pub fn varargs(mut self, name: &str) -> Self {
        let mut p = Parameter::new(name);
        p.varargs = true;
        self.params.push(p);
        self
    }

    pub fn returns(mut self, constraint: TypeConstraint) -> Self {
        self.return_constraint = Some(constraint);
        self
    }

    pub fn deprecated(mut self, removal_version: Option<&str>, replacement: Option<&str>) -> Self {
        self.deprecation = Some(Deprecation {
            removal_version: removal_version.map(str::to_owned),
            replacement: replacement.map(str::to_owned),
        });
        self
    }

    /// `func.name` or `linker.name`.
    pub fn qualified_name(&self) -> String {
        let prefix = if self.linker { "linker" } else { "func" };
        format!("{prefix}.{}", self.name)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.qualified_name())?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&p.name)?;
            if p.number {
                f.write_str("{number}")?;
            } else if let Some(c) = p.constraint {
                write!(f, "{c}")?;
            }
            if p.varargs {
                f.write_str("...")?;
            }
        }
        f.write_str(")")?;
        if let Some(c) = self.return_constraint {
            write!(f, ":{c}")?;
        }
        Ok(())
    }
}

/// A registered native function.
pub struct NativeFunction {
    pub descriptor: Descriptor,
    callable: NativeCallable,
}

impl NativeFunction {
    pub fn new<F>(descriptor: Descriptor, f: F) -> Self
    where
        F: Fn(&mut Interpreter, Vec<DataObject>, ScopeId) -> NativeResult + 'static,
    {
        Self { descriptor, callable: Rc::new(f) }
    }

    pub fn callable(&self) -> &NativeCallable {
        &self.callable
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction").field("descriptor", &self.descriptor).finish()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Native functions keyed by qualified name (`func.x` / `linker.x`).
#[derive(Debug, Default)]
pub struct NativeRegistry {
    functions: HashMap<String, Rc<NativeFunction>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, descriptor: Descriptor, f: F) -> Rc<NativeFunction>
    where
        F: Fn(&mut Interpreter, Vec<DataObject>, ScopeId) -> NativeResult + 'static,
    {
        let function = Rc::new(NativeFunction::new(descriptor, f));
        self.insert(function.clone());
        function
    }

    pub fn insert(&mut self, function: Rc<NativeFunction>) {
        let name = function.descriptor.qualified_name();
        if self.functions.insert(name.clone(), function).is_some() {
            tracing::debug!(function = %name, "native function replaced");
        }
    }

    pub fn get(&self, qualified_name: &str) -> Option<Rc<NativeFunction>> {
        self.functions.get(qualified_name).cloned()
    }

    pub fn remove(&mut self, qualified_name: &str) -> Option<Rc<NativeFunction>> {
        self.functions.remove(qualified_name)
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.functions.contains_key(qualified_name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// ── Argument checking ─────────────────────────────────────────────────────────

/// Validate `args` against `params` and bind them into fresh slots.
///
/// Each returned slot carries the parameter's name and effective constraint.
/// A `{number}` parameter receives the coerced number; a varargs parameter
/// receives an array of the remaining arguments.
pub fn check_arguments(
    params: &[Parameter],
    args: Vec<DataObject>,
) -> Result<Vec<DataObject>, ErrorObject> {
    let fixed = params.iter().filter(|p| !p.varargs).count();
    let has_varargs = params.iter().any(|p| p.varargs);
    if args.len() < fixed {
        return Err(ErrorObject::with_message(
            InterpretingError::InvalidArgCount,
            format!("Not enough arguments ({fixed} needed)"),
        ));
    }
    if !has_varargs && args.len() > fixed {
        return Err(ErrorObject::with_message(
            InterpretingError::InvalidArgCount,
            format!("Too many arguments ({fixed} needed)"),
        ));
    }

    let varargs_len = args.len() - fixed;
    let mut args = args.into_iter();
    let mut out = Vec::with_capacity(params.len());
    let mut position = 0;
    for p in params {
        if p.varargs {
            let mut rest = Vec::with_capacity(varargs_len);
            for arg in args.by_ref().take(varargs_len) {
                position += 1;
                rest.push(bind_argument(position, p, &arg)?);
            }
            out.push(DataObject::array(rest).with_name(p.name.clone()));
            continue;
        }
        let Some(arg) = args.next() else { break };
        position += 1;
        let slot = bind_argument(position, p, &arg)?;
        let constraint = effective_constraint(p);
        out.push(slot.with_name(p.name.clone()).with_constraint(constraint));
    }
    Ok(out)
}

fn effective_constraint(p: &Parameter) -> TypeConstraint {
    let sigil = if p.varargs { TypeConstraint::any() } else { sigil_constraint(&p.name) };
    match p.constraint {
        Some(c) => c.intersect(sigil),
        None => sigil,
    }
}

fn bind_argument(position: usize, p: &Parameter, arg: &DataObject) -> Result<DataObject, ErrorObject> {
    if p.number {
        return match to_number(arg) {
            Some(n) => Ok(DataObject::new(n.into_value())),
            None => Err(ErrorObject::with_message(
                InterpretingError::NoNum,
                format!("Argument {position} (\"{}\") must be a number", p.name),
            )),
        };
    }
    let constraint = effective_constraint(p);
    if !constraint.allows(arg.data_type()) {
        return Err(ErrorObject::with_message(
            InterpretingError::InvalidArguments,
            format!(
                "Argument {position} (\"{}\") must be one of {}",
                p.name,
                TypeConstraint::allow(constraint.allowed()).describe()
            ),
        ));
    }
    Ok(arg.fresh_copy())
}

/// Run a host callable, turning a panic into a `SYSTEM_ERROR` fault.
pub fn invoke(
    callable: &NativeCallable,
    interp: &mut Interpreter,
    args: Vec<DataObject>,
    scope: ScopeId,
) -> NativeResult {
    match panic::catch_unwind(AssertUnwindSafe(|| callable(interp, args, scope))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            tracing::error!(%message, "native function panicked");
            Err(fault(InterpretingError::SystemError, format!("panic: {message}")))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::{DataTypeSet, Value};
    use pretty_assertions::assert_eq;

    fn params(d: &Descriptor) -> &[Parameter] {
        &d.params
    }

    #[test]
    fn qualified_names_and_signature() {
        let d = Descriptor::function("add").number_param("$a").number_param("$b");
        assert_eq!(d.qualified_name(), "func.add");
        assert_eq!(d.to_string(), "func.add($a{number}, $b{number})");
        let l = Descriptor::linker("link").param("$file").varargs("&args");
        assert_eq!(l.qualified_name(), "linker.link");
        assert_eq!(l.to_string(), "linker.link($file, &args...)");
    }

    #[test]
    fn argument_count_messages() {
        let d = Descriptor::function("f").param("$a").param("$b");
        let err = check_arguments(params(&d), vec![DataObject::int(1)]).unwrap_err();
        assert_eq!(err.err, InterpretingError::InvalidArgCount);
        assert_eq!(err.message(), "Not enough arguments (2 needed)");

        let three = vec![DataObject::int(1), DataObject::int(2), DataObject::int(3)];
        let err = check_arguments(params(&d), three).unwrap_err();
        assert_eq!(err.message(), "Too many arguments (2 needed)");
    }

    #[test]
    fn number_parameters_coerce() {
        let d = Descriptor::function("add").number_param("$a");
        let bound = check_arguments(params(&d), vec![DataObject::text("5")]).unwrap();
        assert!(matches!(bound[0].value(), Value::Int(5)));
        assert_eq!(bound[0].variable_name(), Some("$a"));

        let err = check_arguments(params(&d), vec![DataObject::text("x")]).unwrap_err();
        assert_eq!(err.err, InterpretingError::NoNum);
        assert_eq!(err.message(), "Argument 1 (\"$a\") must be a number");
    }

    #[test]
    fn constraints_are_checked() {
        let d = Descriptor::function("f")
            .typed_param("$n", TypeConstraint::allow(DataTypeSet::INT | DataTypeSet::LONG));
        let err = check_arguments(params(&d), vec![DataObject::text("a")]).unwrap_err();
        assert_eq!(err.err, InterpretingError::InvalidArguments);
        assert_eq!(err.message(), "Argument 1 (\"$n\") must be one of [INT, LONG]");

        let d = Descriptor::function("g").param("&arr");
        let err = check_arguments(params(&d), vec![DataObject::int(1)]).unwrap_err();
        assert_eq!(err.err, InterpretingError::InvalidArguments);
    }

    #[test]
    fn varargs_collect_the_rest() {
        let d = Descriptor::function("f").param("$first").varargs("&rest");
        let args = vec![DataObject::int(1), DataObject::int(2), DataObject::int(3)];
        let bound = check_arguments(params(&d), args).unwrap();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[1].to_string(), "[2, 3]");

        let bound = check_arguments(params(&d), vec![DataObject::int(1)]).unwrap();
        assert_eq!(bound[1].to_string(), "[]");
    }

    #[test]
    fn registry_round_trip() {
        let mut reg = NativeRegistry::new();
        reg.register(Descriptor::function("one"), |_, _, _| Ok(DataObject::int(1)));
        reg.register(Descriptor::linker("two"), |_, _, _| Ok(DataObject::int(2)));
        assert_eq!(reg.names(), vec!["func.one".to_owned(), "linker.two".to_owned()]);
        assert!(reg.get("func.one").is_some());
        assert!(reg.remove("func.one").is_some());
        assert!(!reg.contains("func.one"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn panics_become_system_errors() {
        let mut interp = Interpreter::new(Default::default());
        let callable: NativeCallable = Rc::new(|_, _, _| panic!("boom"));
        match invoke(&callable, &mut interp, Vec::new(), 0) {
            Err(NativeFault::Lang(e)) => {
                assert_eq!(e.err, InterpretingError::SystemError);
                assert_eq!(e.message(), "panic: boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
