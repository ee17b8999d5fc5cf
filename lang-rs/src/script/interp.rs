//! Tree-walking evaluator and host-facing interpreter.
//!
//! Control flow that leaves a block early (`return`, `throw`, `break`,
//! `continue`, a stop request) travels as the `Err` side of [`Eval`].  Loops
//! and function boundaries catch what belongs to them:
//!
//! | Signal          | Caught by                                   |
//! |-----------------|---------------------------------------------|
//! | `Return`        | the innermost function call                 |
//! | `Throw`         | a matching `con.catch`, else the call site  |
//! | `Break(n)`      | the n-th enclosing loop                     |
//! | `Continue(n)`   | the n-th enclosing loop                     |
//! | `Stop`          | nothing; unwinds to the host                |
//!
//! Errors raised while evaluating are *errno-style*: they set `$LANG_ERRNO`
//! in the current scope and evaluate to an error value, unless an enclosing
//! try frame turns them into a `Throw`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::ast::{AssignOperator, MathOperator, Node, VarModifiers};
use super::builtins::{self, TestState};
use super::error::{ErrorObject, InterpretingError, LangError};
use super::module::{self, ModuleEntry, ModuleState, NativeModule};
use super::native::{self, check_arguments, Descriptor, NativeFault, NativeFunction, NativeRegistry, NativeResult};
use super::ops::{self, to_number};
use super::parser;
use super::scope::{find_defining, lookup, ScopeId, ScopeRef, ScopeTable, MODULE_SCOPE};
use super::value::{
    sigil_constraint, Callable, DataObject, DataType, FunctionPointer, LangFunction, TypeConstraint,
    Value, VarPointer,
};

/// Version reported by `$LANG_VERSION` and compared against `lang.version`.
pub const LANG_VERSION: &str = "1.0.0";

/// Reads a script file by path.
pub type FileLoader = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

/// Early exit from a block.
#[derive(Debug)]
pub enum Signal {
    Return(DataObject),
    Throw(ErrorObject),
    Break(u32),
    Continue(u32),
    Stop,
}

pub type Eval<T> = Result<T, Signal>;

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct InterpreterOptions {
    pub file_loader: FileLoader,
    /// Searched by `linker.include`/`linker.bindLibrary` for relative paths.
    pub library_dirs: Vec<PathBuf>,
    /// Mirror script output to stdout/stderr as it is produced.
    pub echo_output: bool,
    pub max_call_depth: usize,
    /// Initial `lang.errorOutput`: 0 silent, 1 errors, 2 errors and warnings.
    pub error_output: i32,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            file_loader: Arc::new(|path| std::fs::read_to_string(path).map_err(|e| e.to_string())),
            library_dirs: Vec::new(),
            echo_output: false,
            max_call_depth: 128,
            error_output: 1,
        }
    }
}

impl std::fmt::Debug for InterpreterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterOptions")
            .field("library_dirs", &self.library_dirs)
            .field("echo_output", &self.echo_output)
            .field("max_call_depth", &self.max_call_depth)
            .field("error_output", &self.error_output)
            .finish_non_exhaustive()
    }
}

/// Execution flags settable from scripts through `lang.*` translations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionFlags {
    pub error_output: i32,
    pub allow_term_redirect: bool,
    /// Enables the `func.test*` natives.
    pub test: bool,
}

/// Cross-thread stop request, checked between statements.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
enum TryFrame {
    Try,
    /// Only errors raised directly in this scope throw.
    SoftTry(ScopeId),
    NonTry,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter {
    scopes: ScopeTable,
    global: ScopeRef,
    pub(crate) natives: NativeRegistry,
    pub(crate) modules: HashMap<String, ModuleEntry>,
    options: InterpreterOptions,
    stop: StopHandle,
    try_frames: Vec<TryFrame>,
    call_depth: usize,
    /// Loops open in the current call frame.
    loop_depth: usize,
    /// A stack overflow still unwinding through the call frames.
    overflow: Option<ErrorObject>,
    return_value: Option<DataObject>,
    thrown: bool,
    pending_line: String,
    pub flags: ExecutionFlags,
    /// Lines written by `func.print`/`func.println`.
    pub output: Vec<String>,
    /// Lines written by `func.printError`.
    pub error_output: Vec<String>,
    pub(crate) tests: TestState,
    pub(crate) rng: StdRng,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("options", &self.options)
            .field("flags", &self.flags)
            .field("natives", &self.natives.len())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    pub fn new(options: InterpreterOptions) -> Self {
        let mut scopes = ScopeTable::new();
        let global = scopes.create(None);
        debug_assert_eq!(global.borrow().id(), MODULE_SCOPE);

        let mut natives = NativeRegistry::new();
        builtins::register_all(&mut natives);

        let flags = ExecutionFlags {
            error_output: options.error_output,
            allow_term_redirect: true,
            test: false,
        };
        let mut interp = Self {
            scopes,
            global,
            natives,
            modules: HashMap::new(),
            options,
            stop: StopHandle::default(),
            try_frames: Vec::new(),
            call_depth: 0,
            loop_depth: 0,
            overflow: None,
            return_value: None,
            thrown: false,
            pending_line: String::new(),
            flags,
            output: Vec::new(),
            error_output: Vec::new(),
            tests: TestState::default(),
            rng: StdRng::from_entropy(),
        };
        interp.init_lang_vars();
        tracing::debug!(natives = interp.natives.len(), "interpreter ready");
        interp
    }

    fn init_lang_vars(&mut self) {
        let mut vars: Vec<(String, Value)> = vec![
            ("$LANG_VERSION".into(), Value::from(LANG_VERSION)),
            ("$LANG_NAME".into(), Value::from("Lang")),
            ("$LANG_PATH".into(), Value::from("")),
            ("$LANG_FILE".into(), Value::from("")),
            ("$LANG_INT_MIN".into(), Value::Int(i32::MIN)),
            ("$LANG_INT_MAX".into(), Value::Int(i32::MAX)),
            ("$LANG_LONG_MIN".into(), Value::Long(i64::MIN)),
            ("$LANG_LONG_MAX".into(), Value::Long(i64::MAX)),
            ("$LANG_FLOAT_NAN".into(), Value::Float(f32::NAN)),
            ("$LANG_FLOAT_POS_INF".into(), Value::Float(f32::INFINITY)),
            ("$LANG_FLOAT_NEG_INF".into(), Value::Float(f32::NEG_INFINITY)),
            ("$LANG_DOUBLE_NAN".into(), Value::Double(f64::NAN)),
            ("$LANG_DOUBLE_POS_INF".into(), Value::Double(f64::INFINITY)),
            ("$LANG_DOUBLE_NEG_INF".into(), Value::Double(f64::NEG_INFINITY)),
            ("$LANG_RAND_MAX".into(), Value::Int(i32::MAX)),
            ("&LANG_ARGS".into(), Value::new_array(Vec::new())),
        ];
        vars.extend(DataType::ALL.iter().map(|t| (format!("$LANG_TYPE_{}", t.name()), Value::Type(*t))));
        vars.extend(InterpretingError::ALL.iter().map(|e| {
            (format!("$LANG_ERROR_{}", e.name()), Value::new_error(ErrorObject::new(*e)))
        }));

        let mut global = self.global.borrow_mut();
        for (name, value) in vars {
            global.insert(name.clone(), lang_var(name, value));
        }
    }

    // ── Host API ──────────────────────────────────────────────────────────────

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    pub fn global_scope(&self) -> ScopeRef {
        self.global.clone()
    }

    /// The live scope with `id`.
    pub fn scope(&self, id: ScopeId) -> Option<ScopeRef> {
        self.scopes.get(id)
    }

    /// `id`'s scope, or the module scope if it has been torn down.
    pub(crate) fn scope_or_global(&self, id: ScopeId) -> ScopeRef {
        self.scopes.get(id).unwrap_or_else(|| self.global.clone())
    }

    pub(crate) fn create_scope(&mut self, parent: Option<ScopeRef>) -> ScopeRef {
        self.scopes.create(parent)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn reset_stop_flag(&self) {
        self.stop.reset();
    }

    /// Run `src` in the module scope.
    pub fn interpret(&mut self, src: &str) -> Result<(), LangError> {
        self.interpret_in_scope(src, MODULE_SCOPE)
    }

    pub fn interpret_in_scope(&mut self, src: &str, scope: ScopeId) -> Result<(), LangError> {
        let Some(scope) = self.scopes.get(scope) else {
            return Err(LangError::Script(ErrorObject::with_message(
                InterpretingError::InvalidArguments,
                format!("scope {scope} does not exist"),
            )));
        };
        let ast = parser::parse(src);
        self.run_ast(&ast, &scope)
    }

    /// Read `path` through the file loader and run it, setting
    /// `$LANG_PATH` and `$LANG_FILE`.
    pub fn interpret_file(&mut self, path: &str) -> Result<(), LangError> {
        let src = (self.options.file_loader)(path)
            .map_err(|message| LangError::Io { path: path.to_owned(), message })?;
        let (dir, file) = split_path(path);
        {
            let mut global = self.global.borrow_mut();
            global.insert("$LANG_PATH", lang_var("$LANG_PATH".into(), Value::Text(dir)));
            global.insert("$LANG_FILE", lang_var("$LANG_FILE".into(), Value::Text(file)));
        }
        tracing::info!(path, "running script");
        self.interpret(src.as_str())
    }

    /// Run `src` and hand back its return (or thrown) value.
    pub fn eval(&mut self, src: &str) -> Result<Option<DataObject>, LangError> {
        self.interpret(src)?;
        Ok(self.get_and_reset_return_value())
    }

    fn run_ast(&mut self, ast: &Node, scope: &ScopeRef) -> Result<(), LangError> {
        self.return_value = None;
        self.thrown = false;
        self.try_frames.clear();
        self.overflow = None;
        let result = self.exec_block(ast, scope);
        self.flush_output();
        match result {
            Ok(()) | Err(Signal::Break(_)) | Err(Signal::Continue(_)) => Ok(()),
            Err(Signal::Return(v)) => {
                self.return_value = Some(v);
                Ok(())
            }
            Err(Signal::Throw(e)) => {
                tracing::debug!(error = %e, "script ended with a thrown error");
                self.return_value = Some(DataObject::error(e));
                self.thrown = true;
                Ok(())
            }
            Err(Signal::Stop) => Err(LangError::Stopped),
        }
    }

    /// Bind `&LANG_ARGS`.
    pub fn set_args(&mut self, args: &[String]) {
        let elements = args.iter().map(|a| DataObject::text(a.clone())).collect();
        self.global
            .borrow_mut()
            .insert("&LANG_ARGS", lang_var("&LANG_ARGS".into(), Value::new_array(elements)));
    }

    /// Take the last top-level return value.  Check [`is_thrown_value`]
    /// first if the distinction matters.
    ///
    /// [`is_thrown_value`]: Self::is_thrown_value
    pub fn get_and_reset_return_value(&mut self) -> Option<DataObject> {
        self.thrown = false;
        self.return_value.take()
    }

    pub fn is_thrown_value(&self) -> bool {
        self.thrown
    }

    pub fn translation_map(&self, scope: ScopeId) -> Option<BTreeMap<String, String>> {
        self.scopes.get(scope).map(|s| s.borrow().translations().clone())
    }

    pub fn register_native<F>(&mut self, descriptor: Descriptor, f: F) -> Rc<NativeFunction>
    where
        F: Fn(&mut Interpreter, Vec<DataObject>, ScopeId) -> NativeResult + 'static,
    {
        self.natives.register(descriptor, f)
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    pub fn register_module(&mut self, name: impl Into<String>, module: Box<dyn NativeModule>) {
        let name = name.into();
        tracing::debug!(module = %name, "module registered");
        self.modules.insert(name, ModuleEntry::new(module));
    }

    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.modules.get(name).map(ModuleEntry::state)
    }

    pub fn load_module(&mut self, name: &str, args: &[DataObject]) -> Result<DataObject, LangError> {
        fault_to_host(module::load(self, name, args, MODULE_SCOPE))
    }

    pub fn unload_module(&mut self, name: &str, args: &[DataObject]) -> Result<DataObject, LangError> {
        fault_to_host(module::unload(self, name, args, MODULE_SCOPE))
    }

    /// Seed the generator behind `func.rand`.
    pub fn seed_random(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    // ── Output ────────────────────────────────────────────────────────────────

    /// Append `text` to the output, splitting completed lines.
    pub fn print(&mut self, text: &str) {
        self.pending_line.push_str(text);
        while let Some(nl) = self.pending_line.find('\n') {
            let line: String = self.pending_line.drain(..=nl).collect();
            self.push_line(line.trim_end_matches('\n').to_owned());
        }
    }

    pub fn print_error(&mut self, text: &str) {
        if self.options.echo_output {
            eprintln!("{text}");
        }
        self.error_output.push(text.to_owned());
    }

    fn push_line(&mut self, line: String) {
        if self.options.echo_output {
            println!("{line}");
        }
        self.output.push(line);
    }

    pub fn flush_output(&mut self) {
        if !self.pending_line.is_empty() {
            let line = std::mem::take(&mut self.pending_line);
            self.push_line(line);
        }
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        self.flush_output();
        std::mem::take(&mut self.output)
    }

    // ── Errors ────────────────────────────────────────────────────────────────

    /// Raise an errno-style error in `scope`.
    pub(crate) fn raise(&mut self, err: ErrorObject, scope: &ScopeRef) -> Eval<DataObject> {
        self.raise_in(err, scope, true)
    }

    fn raise_in(&mut self, err: ErrorObject, scope: &ScopeRef, log: bool) -> Eval<DataObject> {
        if err.err.is_warning() {
            self.warn(&err);
            return Ok(DataObject::void());
        }
        let id = {
            let mut s = scope.borrow_mut();
            s.set_errno(err.code());
            s.id()
        };
        let throws = match self.try_frames.last() {
            Some(TryFrame::Try) => true,
            Some(TryFrame::SoftTry(owner)) => *owner == id,
            Some(TryFrame::NonTry) | None => false,
        };
        if log && self.flags.error_output >= 1 {
            if throws {
                tracing::debug!(code = err.code(), error = %err.err, message = err.message(), "error thrown");
            } else {
                tracing::error!(code = err.code(), error = %err.err, message = err.message(), "script error");
            }
        }
        if throws {
            Err(Signal::Throw(err))
        } else {
            Ok(DataObject::error(err))
        }
    }

    fn raise_unit(&mut self, err: ErrorObject, scope: &ScopeRef) -> Eval<()> {
        self.raise(err, scope).map(|_| ())
    }

    pub(crate) fn warn(&self, err: &ErrorObject) {
        if self.flags.error_output >= 2 {
            tracing::warn!(code = err.code(), warning = %err.err, message = err.message(), "script warning");
        }
    }

    fn check_stop(&self) -> Eval<()> {
        if self.stop.is_stop_requested() {
            return Err(Signal::Stop);
        }
        Ok(())
    }

    // ── Statements ────────────────────────────────────────────────────────────

    pub(crate) fn exec_block(&mut self, node: &Node, scope: &ScopeRef) -> Eval<()> {
        match node {
            Node::List(stmts) => {
                for stmt in stmts {
                    self.check_stop()?;
                    self.exec_stmt(stmt, scope)?;
                }
                Ok(())
            }
            other => {
                self.check_stop()?;
                self.exec_stmt(other, scope)
            }
        }
    }

    fn exec_stmt(&mut self, node: &Node, scope: &ScopeRef) -> Eval<()> {
        tracing::trace!(kind = ?node.node_type(), "exec");
        match node {
            Node::IfStatement(parts) => self.exec_if(parts, scope),
            Node::LoopStatement(parts) => self.exec_loop(parts, scope),
            Node::TryStatement(parts) => self.exec_try(parts, scope),
            Node::LoopStatementContinueBreak { number, is_continue } => {
                let levels = match number {
                    None => 1,
                    Some(n) => {
                        let v = self.evaluate(n, scope)?;
                        match to_number(&v).map(|n| n.as_i64()) {
                            Some(n) if n >= 1 => u32::try_from(n).unwrap_or(u32::MAX),
                            _ => {
                                return self.raise_unit(
                                    ErrorObject::with_message(
                                        InterpretingError::InvalidArguments,
                                        "the level of con.break/con.continue must be a positive number",
                                    ),
                                    scope,
                                );
                            }
                        }
                    }
                };
                Err(if *is_continue { Signal::Continue(levels) } else { Signal::Break(levels) })
            }
            Node::Return(value) => {
                let v = match value {
                    Some(n) => self.evaluate(n, scope)?,
                    None => DataObject::void(),
                };
                Err(Signal::Return(v.fresh_copy()))
            }
            Node::Throw { error, message } => {
                let v = self.evaluate(error, scope)?;
                let Some(err) = v.error().cloned() else {
                    return self.raise_unit(
                        ErrorObject::with_message(
                            InterpretingError::InvalidArguments,
                            format!("can't throw {}", v.data_type()),
                        ),
                        scope,
                    );
                };
                let err = match message {
                    Some(m) => {
                        let m = self.evaluate(m, scope)?;
                        ErrorObject::with_message(err.err, m.to_string())
                    }
                    None => err,
                };
                scope.borrow_mut().set_errno(err.code());
                Err(Signal::Throw(err))
            }
            other => self.evaluate(other, scope).map(|_| ()),
        }
    }

    fn exec_if(&mut self, parts: &[Node], scope: &ScopeRef) -> Eval<()> {
        // A malformed or unclosed statement is reported before any branch runs.
        for part in parts.iter().filter(|p| matches!(p, Node::ParsingError { .. })) {
            self.evaluate(part, scope)?;
        }
        for part in parts {
            match part {
                Node::IfStatementPartIf { condition, body } => {
                    let c = self.evaluate(condition, scope)?;
                    if ops::truthy(&c) {
                        return self.exec_block(body, scope);
                    }
                }
                Node::IfStatementPartElse { body } => return self.exec_block(body, scope),
                Node::ParsingError { .. } => {}
                other => {
                    self.evaluate(other, scope)?;
                }
            }
        }
        Ok(())
    }

    /// Run one loop iteration.  `Ok(false)` ends the loop.
    fn loop_body(&mut self, body: &Node, scope: &ScopeRef) -> Eval<bool> {
        self.check_stop()?;
        match self.exec_block(body, scope) {
            Ok(()) => Ok(true),
            // The outermost loop of a frame absorbs any remaining levels.
            Err(Signal::Break(n)) if n <= 1 || self.loop_depth <= 1 => Ok(false),
            Err(Signal::Break(n)) => Err(Signal::Break(n - 1)),
            Err(Signal::Continue(n)) if n <= 1 || self.loop_depth <= 1 => Ok(true),
            Err(Signal::Continue(n)) => Err(Signal::Continue(n - 1)),
            Err(other) => Err(other),
        }
    }

    fn exec_loop(&mut self, parts: &[Node], scope: &ScopeRef) -> Eval<()> {
        self.loop_depth += 1;
        let result = self.exec_loop_parts(parts, scope);
        self.loop_depth -= 1;
        result
    }

    fn exec_loop_parts(&mut self, parts: &[Node], scope: &ScopeRef) -> Eval<()> {
        for part in parts.iter().filter(|p| matches!(p, Node::ParsingError { .. })) {
            self.evaluate(part, scope)?;
        }
        let mut ran = false;
        for part in parts {
            match part {
                Node::LoopStatementPartElse { body } => {
                    if !ran {
                        self.exec_block(body, scope)?;
                    }
                }
                Node::ParsingError { .. } => {}
                other => ran = self.run_loop_part(other, scope)?,
            }
        }
        Ok(())
    }

    /// Returns whether the body ran at least once.
    fn run_loop_part(&mut self, part: &Node, scope: &ScopeRef) -> Eval<bool> {
        let mut ran = false;
        match part {
            Node::LoopStatementPartLoop { body } => loop {
                ran = true;
                if !self.loop_body(body, scope)? {
                    break;
                }
            },
            Node::LoopStatementPartWhile { condition, body } => {
                while ops::truthy(self.evaluate(condition, scope)?.value()) {
                    ran = true;
                    if !self.loop_body(body, scope)? {
                        break;
                    }
                }
            }
            Node::LoopStatementPartUntil { condition, body } => {
                while !ops::truthy(self.evaluate(condition, scope)?.value()) {
                    ran = true;
                    if !self.loop_body(body, scope)? {
                        break;
                    }
                }
            }
            Node::LoopStatementPartRepeat { var_pointer, count, body } => {
                let target = self.loop_target(var_pointer, scope)?;
                let count_value = self.evaluate(count, scope)?;
                let Some(n) = to_number(&count_value) else {
                    self.raise(
                        ErrorObject::with_message(
                            InterpretingError::NoNum,
                            format!("repeat count \"{count_value}\" is not a number"),
                        ),
                        scope,
                    )?;
                    return Ok(false);
                };
                for i in 0..n.as_i64().max(0) {
                    if let Some(t) = &target {
                        let index = i32::try_from(i).map_or(Value::Long(i), Value::Int);
                        self.write_pointer(t, index, scope)?;
                    }
                    ran = true;
                    if !self.loop_body(body, scope)? {
                        break;
                    }
                }
            }
            Node::LoopStatementPartForEach { var_pointer, collection, body } => {
                let target = self.loop_target(var_pointer, scope)?;
                let coll = self.evaluate(collection, scope)?;
                let items: Vec<Value> = match coll.value() {
                    Value::Array(a) => a.borrow().iter().map(|d| d.value().clone()).collect(),
                    Value::List(l) => l.borrow().iter().map(|d| d.value().clone()).collect(),
                    Value::Text(s) => s.chars().map(Value::Char).collect(),
                    Value::ByteBuffer(b) => b.borrow().iter().map(|&x| Value::Int(i32::from(x))).collect(),
                    Value::Struct(s) if !s.is_definition() => s
                        .member_names()
                        .iter()
                        .filter_map(|m| s.get(m).ok())
                        .map(DataObject::into_value)
                        .collect(),
                    other => {
                        self.raise(
                            ErrorObject::with_message(
                                InterpretingError::InvalidArguments,
                                format!("can't iterate over {}", other.data_type()),
                            ),
                            scope,
                        )?;
                        return Ok(false);
                    }
                };
                for item in items {
                    if let Some(t) = &target {
                        self.write_pointer(t, item, scope)?;
                    }
                    ran = true;
                    if !self.loop_body(body, scope)? {
                        break;
                    }
                }
            }
            other => {
                self.raise(
                    ErrorObject::with_message(
                        InterpretingError::InvalidAstNode,
                        format!("{:?} is not a loop part", other.node_type()),
                    ),
                    scope,
                )?;
            }
        }
        Ok(ran)
    }

    /// The slot a repeat/foreach loop writes each iteration into.
    fn loop_target(&mut self, node: &Node, scope: &ScopeRef) -> Eval<Option<VarPointer>> {
        match node {
            Node::NullValue => Ok(None),
            Node::UnprocessedVariableName(name) if !name.starts_with("$[") && !name.starts_with("$*") => {
                if let Some(p) = lookup(scope, name).and_then(|d| d.var_pointer().cloned()) {
                    return Ok(Some(p));
                }
                let id = scope.borrow().id();
                self.ensure_slot(scope, name);
                Ok(Some(VarPointer { scope: id, name: name.clone() }))
            }
            other => {
                let v = self.evaluate(other, scope)?;
                if let Some(p) = v.var_pointer() {
                    return Ok(Some(p.clone()));
                }
                self.raise(
                    ErrorObject::with_message(
                        InterpretingError::InvalidArguments,
                        "the loop target must be a variable pointer",
                    ),
                    scope,
                )?;
                Ok(None)
            }
        }
    }

    fn exec_try(&mut self, parts: &[Node], scope: &ScopeRef) -> Eval<()> {
        let Some((first, rest)) = parts.split_first() else { return Ok(()) };
        let (frame, body) = match first {
            Node::TryStatementPartTry { body } => (TryFrame::Try, body),
            Node::TryStatementPartSoftTry { body } => (TryFrame::SoftTry(scope.borrow().id()), body),
            Node::TryStatementPartNonTry { body } => (TryFrame::NonTry, body),
            other => return self.evaluate(other, scope).map(|_| ()),
        };

        self.try_frames.push(frame);
        let body_result = self.exec_block(body, scope);
        self.try_frames.pop();

        let mut outcome = match body_result {
            Err(Signal::Throw(err)) => {
                let mut handler = None;
                for part in rest {
                    if let Node::TryStatementPartCatch { errors, body } = part {
                        if self.catch_matches(errors.as_deref(), &err, scope)? {
                            handler = Some(body);
                            break;
                        }
                    }
                }
                match handler {
                    Some(body) => {
                        tracing::debug!(error = %err.err, "caught");
                        self.overflow = None;
                        scope.borrow_mut().set_errno(err.code());
                        self.exec_block(body, scope)
                    }
                    None => Err(Signal::Throw(err)),
                }
            }
            Ok(()) => match rest.iter().find(|p| matches!(p, Node::TryStatementPartElse { .. })) {
                Some(Node::TryStatementPartElse { body }) => self.exec_block(body, scope),
                _ => Ok(()),
            },
            other => other,
        };

        for part in rest {
            match part {
                Node::TryStatementPartFinally { body } => {
                    let finally = self.exec_block(body, scope);
                    if finally.is_err() {
                        outcome = finally;
                    }
                }
                Node::ParsingError { .. } => {
                    self.evaluate(part, scope)?;
                }
                _ => {}
            }
        }
        outcome
    }

    fn catch_matches(&mut self, errors: Option<&[Node]>, err: &ErrorObject, scope: &ScopeRef) -> Eval<bool> {
        let Some(errors) = errors else { return Ok(true) };
        let values = self.eval_args(errors, scope)?;
        Ok(values.iter().any(|v| match v.error() {
            Some(e) => e.err == err.err,
            None => to_number(v).is_some_and(|n| n.as_i64() == i64::from(err.code())),
        }))
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    pub(crate) fn evaluate(&mut self, node: &Node, scope: &ScopeRef) -> Eval<DataObject> {
        match node {
            Node::List(nodes) => match nodes.as_slice() {
                [] => Ok(DataObject::void()),
                [single] => self.evaluate(single, scope),
                many => {
                    let mut text = String::new();
                    for n in many {
                        text.push_str(&self.evaluate(n, scope)?.to_string());
                    }
                    Ok(DataObject::text(text))
                }
            },
            Node::ParsingError { error, line, message } => self.raise(
                ErrorObject::with_message(error.interpreting_error(), format!("line {line}: {message}")),
                scope,
            ),
            Node::Assignment { lvalue, rvalue, operator } => self.assign(lvalue, rvalue, *operator, scope),
            Node::VariableName { name, .. } | Node::UnprocessedVariableName(name) => {
                self.resolve_variable(name, scope)
            }
            Node::ArgumentUnpack(name) => self.resolve_variable(name, scope),
            Node::EscapeSequence(c) => Ok(DataObject::text(self.escape(*c))),
            Node::ArgumentSeparator(s) => Ok(DataObject::text(s.clone())),
            Node::FunctionCall { name, args } => self.call_named(name, args, scope),
            Node::FunctionCallPreviousNodeValue { callee, args } => {
                let f = self.evaluate(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                self.call_pointer(f.value(), args, scope)
            }
            Node::FunctionDefinition(def) => {
                let func = LangFunction {
                    params: def.params.clone(),
                    return_constraint: def.return_constraint,
                    body: def.body.clone(),
                    scope: scope.clone(),
                };
                Ok(DataObject::function_pointer(FunctionPointer::new(None, Callable::Normal(Rc::new(func)))))
            }
            Node::Math { operator, left, right } => {
                let l = self.evaluate(left, scope)?;
                let result = match right {
                    None => ops::math_unary(*operator, &l),
                    Some(r) => {
                        let r = self.evaluate(r, scope)?;
                        ops::math_binary(*operator, &l, &r)
                    }
                };
                match result {
                    Ok(v) => Ok(DataObject::new(v)),
                    Err(e) => self.raise(e, scope),
                }
            }
            Node::Condition { operator, left, right } => {
                let l = self.evaluate(left, scope)?;
                let r = match right {
                    Some(r) => self.evaluate(r, scope)?,
                    None => DataObject::void(),
                };
                match ops::condition(*operator, &l, &r) {
                    Ok(b) => Ok(DataObject::boolean(b)),
                    Err(e) => self.raise(e, scope),
                }
            }
            Node::IntValue(n) => Ok(DataObject::int(*n)),
            Node::LongValue(n) => Ok(DataObject::long(*n)),
            Node::FloatValue(x) => Ok(DataObject::new(Value::Float(*x))),
            Node::DoubleValue(x) => Ok(DataObject::double(*x)),
            Node::CharValue(c) => Ok(DataObject::char(*c)),
            Node::TextValue(s) => Ok(DataObject::text(s.clone())),
            Node::NullValue => Ok(DataObject::null()),
            Node::VoidValue => Ok(DataObject::void()),
            Node::ArrayValue(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(self.evaluate(item, scope)?.fresh_copy());
                }
                Ok(DataObject::array(elements))
            }
            Node::IfStatement(_)
            | Node::LoopStatement(_)
            | Node::TryStatement(_)
            | Node::Return(_)
            | Node::Throw { .. }
            | Node::LoopStatementContinueBreak { .. } => {
                self.exec_stmt(node, scope)?;
                Ok(DataObject::void())
            }
            part => self.raise(
                ErrorObject::with_message(
                    InterpretingError::InvalidAstNode,
                    format!("{:?} can't be evaluated on its own", part.node_type()),
                ),
                scope,
            ),
        }
    }

    fn escape(&self, c: char) -> String {
        match c {
            'n' => "\n".into(),
            't' => "\t".into(),
            'r' => "\r".into(),
            'f' => "\u{c}".into(),
            'a' => "\u{7}".into(),
            'b' => "\u{8}".into(),
            'v' => "\u{b}".into(),
            '0' => "\0".into(),
            's' => " ".into(),
            'e' => String::new(),
            c if c.is_alphanumeric() => {
                self.warn(&ErrorObject::with_message(
                    InterpretingError::UndefEscapeSequence,
                    format!("\"\\{c}\" is not a defined escape sequence"),
                ));
                c.to_string()
            }
            c => c.to_string(),
        }
    }

    /// Evaluate an argument list.  Pieces between separators concatenate
    /// into one text argument unless a piece stands alone.
    pub(crate) fn eval_args(&mut self, args: &[Node], scope: &ScopeRef) -> Eval<Vec<DataObject>> {
        let mut out = Vec::new();
        let mut pieces: Vec<DataObject> = Vec::new();
        let mut spread = false;
        for node in args {
            match node {
                Node::ArgumentSeparator(_) => {
                    if !(spread && pieces.is_empty()) {
                        out.push(merge_pieces(std::mem::take(&mut pieces)));
                    }
                    pieces.clear();
                    spread = false;
                }
                Node::ArgumentUnpack(name) => {
                    let v = self.resolve_variable(name, scope)?;
                    match v.value() {
                        Value::Array(a) => out.extend(a.borrow().iter().map(DataObject::fresh_copy)),
                        Value::List(l) => out.extend(l.borrow().iter().map(DataObject::fresh_copy)),
                        other => {
                            let err = self.raise(
                                ErrorObject::with_message(
                                    InterpretingError::InvalidArguments,
                                    format!("can't unpack {}", other.data_type()),
                                ),
                                scope,
                            )?;
                            out.push(err);
                        }
                    }
                    spread = true;
                }
                other => pieces.push(self.evaluate(other, scope)?),
            }
        }
        if !args.is_empty() && !(spread && pieces.is_empty()) {
            out.push(merge_pieces(pieces));
        }
        Ok(out)
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    pub(crate) fn resolve_variable(&mut self, name: &str, scope: &ScopeRef) -> Eval<DataObject> {
        if name == "$LANG_ERRNO" {
            let errno = scope.borrow_mut().take_errno();
            return Ok(DataObject::int(errno));
        }
        if let Some(rest) = name.strip_prefix("$*") {
            let stars = 1 + rest.chars().take_while(|&c| c == '*').count();
            let base = format!("${}", &name[1 + stars..]);
            let mut value = self.resolve_variable(&base, scope)?;
            for _ in 0..stars {
                let target = value.var_pointer().and_then(|p| self.pointer_target(p));
                value = match target {
                    Some(slot) => slot,
                    None => {
                        return self.raise(
                            ErrorObject::with_message(
                                InterpretingError::InvalidPtr,
                                format!("\"{base}\" can't be dereferenced"),
                            ),
                            scope,
                        );
                    }
                };
            }
            return Ok(value);
        }
        if let Some(inner) = name.strip_prefix("$[").and_then(|s| s.strip_suffix(']')) {
            return self.reference(inner, scope);
        }
        if name.starts_with("func.") || name.starts_with("linker.") {
            return match self.natives.get(name) {
                Some(f) => Ok(DataObject::function_pointer(FunctionPointer::new(
                    Some(name.to_owned()),
                    Callable::Native(f),
                ))),
                None => self.raise(
                    ErrorObject::with_message(InterpretingError::FunctionNotFound, format!("\"{name}\" was not found")),
                    scope,
                ),
            };
        }
        match lookup(scope, name) {
            Some(slot) => Ok(slot),
            // Undefined names read as their own text.
            None => Ok(DataObject::text(name)),
        }
    }

    /// `$[name]`: a pointer to the slot `name` resolves to.
    fn reference(&mut self, inner: &str, scope: &ScopeRef) -> Eval<DataObject> {
        if let Some(nested) = inner.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let target = self.reference(nested, scope)?;
            let hidden = format!("$[{nested}]");
            let id = scope.borrow().id();
            scope.borrow_mut().insert(hidden.clone(), target.fresh_copy().with_name(hidden.clone()));
            return Ok(DataObject::new(Value::VarPointer(VarPointer { scope: id, name: hidden })));
        }
        let target = if inner.starts_with(['$', '&']) || inner.starts_with("fp.") {
            inner.to_owned()
        } else {
            format!("${inner}")
        };
        let id = match find_defining(scope, &target) {
            Some(s) => s.borrow().id(),
            None => {
                self.ensure_slot(scope, &target);
                scope.borrow().id()
            }
        };
        Ok(DataObject::new(Value::VarPointer(VarPointer { scope: id, name: target })))
    }

    fn ensure_slot(&self, scope: &ScopeRef, name: &str) {
        let mut s = scope.borrow_mut();
        if !s.contains(name) {
            let initial = if name.starts_with('&') { Value::new_array(Vec::new()) } else { Value::Null };
            s.insert(name, DataObject::new(initial).with_name(name).with_constraint(sigil_constraint(name)));
        }
    }

    fn pointer_target(&self, p: &VarPointer) -> Option<DataObject> {
        self.scopes.get(p.scope).and_then(|s| s.borrow().get(&p.name).cloned())
    }

    pub(crate) fn write_pointer(&mut self, p: &VarPointer, value: Value, scope: &ScopeRef) -> Eval<()> {
        let Some(target) = self.scopes.get(p.scope) else {
            return self.raise_unit(
                ErrorObject::with_message(InterpretingError::InvalidPtr, format!("\"{}\" no longer exists", p.name)),
                scope,
            );
        };
        let result = {
            let mut t = target.borrow_mut();
            match t.get_mut(&p.name) {
                Some(slot) => slot.set(value),
                None => {
                    let mut slot = DataObject::default()
                        .with_name(p.name.clone())
                        .with_constraint(sigil_constraint(&p.name));
                    let r = slot.set(value);
                    t.insert(p.name.clone(), slot);
                    r
                }
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.raise_unit(e, scope),
        }
    }

    // ── Assignment ────────────────────────────────────────────────────────────

    fn assign(&mut self, lvalue: &Node, rvalue: &Node, op: AssignOperator, scope: &ScopeRef) -> Eval<DataObject> {
        let (name, modifiers, constraint, index) = match lvalue {
            Node::TextValue(key) => {
                let value = self.evaluate(rvalue, scope)?.to_string();
                if let Err(e) = self.set_translation(scope, key, &value) {
                    return self.raise(e, scope);
                }
                return Ok(DataObject::void());
            }
            Node::VariableName { name, modifiers, constraint, index } => (name, *modifiers, *constraint, index),
            other => {
                return self.raise(
                    ErrorObject::with_message(
                        InterpretingError::InvalidAssignment,
                        format!("{:?} is not assignable", other.node_type()),
                    ),
                    scope,
                );
            }
        };

        let value = match op.math() {
            None => self.evaluate(rvalue, scope)?,
            Some(math) => {
                let current = match index {
                    Some(idx) => {
                        let coll = self.resolve_variable(name, scope)?;
                        let i = self.evaluate(idx, scope)?;
                        match ops::math_binary(MathOperator::GetItem, &coll, &i) {
                            Ok(v) => DataObject::new(v),
                            Err(e) => return self.raise(e, scope),
                        }
                    }
                    None => self.resolve_variable(name, scope)?,
                };
                let r = self.evaluate(rvalue, scope)?;
                match ops::math_binary(math, &current, &r) {
                    Ok(v) => DataObject::new(v),
                    Err(e) => return self.raise(e, scope),
                }
            }
        };
        let value = match (op, value.into_value()) {
            (AssignOperator::Condition, v) => Value::from(ops::truthy(&v)),
            (_, Value::FunctionPointer(fp)) if fp.name().is_none() && name.starts_with("fp.") => {
                Value::FunctionPointer(Rc::new(fp.with_name(name.clone())))
            }
            (_, v) => v,
        };

        if let Some(idx) = index {
            self.assign_element(name, idx, value, scope)?;
        } else if name.starts_with("$*") {
            self.assign_through_pointer(name, value, scope)?;
        } else {
            self.write_variable(name, value, modifiers, constraint, scope)?;
        }
        Ok(DataObject::void())
    }

    fn write_variable(
        &mut self,
        name: &str,
        value: Value,
        modifiers: VarModifiers,
        constraint: Option<TypeConstraint>,
        scope: &ScopeRef,
    ) -> Eval<()> {
        let bare = name.trim_start_matches(['$', '&']);
        if !name.starts_with("fp.") && bare.starts_with("LANG") {
            let err = if lookup(scope, name).is_some() {
                ErrorObject::with_message(InterpretingError::FinalVarChange, format!("\"{name}\" is a LANG variable"))
            } else {
                ErrorObject::with_message(
                    InterpretingError::InvalidAssignment,
                    format!("\"{name}\" uses the reserved LANG prefix"),
                )
            };
            return self.raise_unit(err, scope);
        }

        let value = if name.starts_with('&') && !TypeConstraint::collection().allows(value.data_type()) {
            Value::new_array(vec![DataObject::new(value)])
        } else {
            value
        };
        let target = if modifiers.static_data { self.global.clone() } else { scope.clone() };
        let result = {
            let mut t = target.borrow_mut();
            match t.get_mut(name) {
                Some(slot) => {
                    let mut r = slot.set(value);
                    if r.is_ok() {
                        if let Some(c) = constraint {
                            r = slot.set_constraint(c.intersect(sigil_constraint(name)));
                        }
                    }
                    if r.is_ok() && modifiers.final_data {
                        slot.set_final();
                    }
                    r
                }
                None => {
                    let effective = match constraint {
                        Some(c) => c.intersect(sigil_constraint(name)),
                        None => sigil_constraint(name),
                    };
                    let mut slot = DataObject::default().with_name(name).with_constraint(effective);
                    let r = slot.set(value);
                    if r.is_ok() {
                        if modifiers.final_data {
                            slot.set_final();
                        }
                        if modifiers.static_data {
                            slot.set_static();
                        }
                        t.insert(name, slot);
                    }
                    r
                }
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.raise_unit(e, scope),
        }
    }

    fn assign_through_pointer(&mut self, name: &str, value: Value, scope: &ScopeRef) -> Eval<()> {
        let stars = name[1..].chars().take_while(|&c| c == '*').count();
        let base = format!("${}", &name[1 + stars..]);
        let mut ptr = self.resolve_variable(&base, scope)?.var_pointer().cloned();
        for _ in 1..stars {
            ptr = ptr.and_then(|p| self.pointer_target(&p)).and_then(|d| d.var_pointer().cloned());
        }
        match ptr {
            Some(p) => self.write_pointer(&p, value, scope),
            None => self.raise_unit(
                ErrorObject::with_message(InterpretingError::InvalidPtr, format!("\"{base}\" can't be dereferenced")),
                scope,
            ),
        }
    }

    fn assign_element(&mut self, name: &str, index: &Node, value: Value, scope: &ScopeRef) -> Eval<()> {
        let target = self.resolve_variable(name, scope)?;
        let index = self.evaluate(index, scope)?;
        let result = match target.value() {
            Value::Struct(s) => s.set(&index.to_string(), value),
            Value::Array(_) | Value::List(_) | Value::ByteBuffer(_) => match to_number(&index) {
                None => Err(ErrorObject::with_message(
                    InterpretingError::NoNum,
                    format!("index \"{index}\" is not a number"),
                )),
                Some(i) => set_element(target.value(), i.as_i64(), value),
            },
            other => Err(ErrorObject::with_message(
                InterpretingError::InvalidArguments,
                format!("\"{name}\" ({}) can't be indexed", other.data_type()),
            )),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.raise_unit(e, scope),
        }
    }

    // ── Translations ──────────────────────────────────────────────────────────

    /// Store `key = value` in `scope`'s translation map, applying `lang.*`
    /// execution flags.
    pub(crate) fn set_translation(&mut self, scope: &ScopeRef, key: &str, value: &str) -> Result<(), ErrorObject> {
        scope.borrow_mut().translations_mut().insert(key.to_owned(), value.to_owned());
        let invalid = || {
            ErrorObject::with_message(
                InterpretingError::InvalidExecFlagData,
                format!("\"{value}\" is not valid for {key}"),
            )
        };
        match key {
            "lang.errorOutput" => match value.trim().parse::<i32>() {
                Ok(n) => self.flags.error_output = n,
                Err(_) => self.warn(&invalid()),
            },
            "lang.allowTermRedirect" => match parse_flag(value) {
                Some(b) => self.flags.allow_term_redirect = b,
                None => self.warn(&invalid()),
            },
            "lang.test" => match parse_flag(value) {
                Some(b) => self.flags.test = b,
                None => self.warn(&invalid()),
            },
            "lang.version" => match compare_versions(value.trim(), LANG_VERSION) {
                None => self.warn(&invalid()),
                Some(std::cmp::Ordering::Greater) => {
                    return Err(ErrorObject::with_message(
                        InterpretingError::LangVerError,
                        format!("Lang {value} is newer than {LANG_VERSION}"),
                    ));
                }
                Some(std::cmp::Ordering::Less) => self.warn(&ErrorObject::with_message(
                    InterpretingError::LangVerWarning,
                    format!("Lang {value} is older than {LANG_VERSION}"),
                )),
                Some(std::cmp::Ordering::Equal) => {}
            },
            _ => {}
        }
        Ok(())
    }

    /// Look `key` up in `scope` and its ancestors.
    pub(crate) fn get_translation(&self, scope: &ScopeRef, key: &str) -> Option<String> {
        let mut cur = Some(scope.clone());
        while let Some(s) = cur {
            if let Some(v) = s.borrow().translations().get(key) {
                return Some(v.clone());
            }
            cur = s.borrow().parent().cloned();
        }
        None
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    fn call_named(&mut self, name: &str, args: &[Node], scope: &ScopeRef) -> Eval<DataObject> {
        let callee = if name.starts_with("func.") || name.starts_with("linker.") {
            match self.natives.get(name) {
                Some(f) => Value::FunctionPointer(Rc::new(FunctionPointer::new(
                    Some(name.to_owned()),
                    Callable::Native(f),
                ))),
                None => {
                    return self.raise(
                        ErrorObject::with_message(
                            InterpretingError::FunctionNotFound,
                            format!("\"{name}\" was not found"),
                        ),
                        scope,
                    );
                }
            }
        } else {
            match lookup(scope, name) {
                Some(slot) => slot.into_value(),
                None => {
                    return self.raise(
                        ErrorObject::with_message(
                            InterpretingError::FunctionNotFound,
                            format!("\"{name}\" was not found"),
                        ),
                        scope,
                    );
                }
            }
        };
        let args = self.eval_args(args, scope)?;
        self.call_pointer(&callee, args, scope)
    }

    pub(crate) fn call_pointer(&mut self, f: &Value, args: Vec<DataObject>, scope: &ScopeRef) -> Eval<DataObject> {
        let Some(fp) = f.function_pointer().cloned() else {
            return self.raise(
                ErrorObject::with_message(
                    InterpretingError::InvalidFuncPtr,
                    format!("{} is not callable", f.data_type()),
                ),
                scope,
            );
        };
        match fp.callable() {
            Callable::Normal(func) => self.call_function(func, args, scope),
            Callable::Native(n) => self.call_native(n, args, scope),
            Callable::External(c) => {
                let id = scope.borrow().id();
                let result = native::invoke(c, self, args, id);
                self.finish_native(result, None, scope)
            }
        }
    }

    fn call_function(&mut self, func: &Rc<LangFunction>, args: Vec<DataObject>, scope: &ScopeRef) -> Eval<DataObject> {
        if self.call_depth >= self.options.max_call_depth {
            let err = ErrorObject::with_message(
                InterpretingError::StackOverflow,
                format!("call depth exceeded {}", self.options.max_call_depth),
            );
            self.overflow = Some(err.clone());
            return self.raise(err, scope);
        }
        let bound = match check_arguments(&func.params, args) {
            Ok(b) => b,
            Err(e) => return self.raise(e, scope),
        };
        let call_scope = self.scopes.create(Some(func.scope.clone()));
        {
            let mut s = call_scope.borrow_mut();
            for slot in bound {
                let name = slot.variable_name().unwrap_or_default().to_owned();
                s.insert(name, slot);
            }
        }

        self.call_depth += 1;
        let outer_loops = std::mem::take(&mut self.loop_depth);
        let result = self.exec_block(&func.body, &call_scope);
        self.loop_depth = outer_loops;
        self.call_depth -= 1;

        // Every caller on the way out sees the overflow in its own errno.
        if let Some(err) = self.overflow.take() {
            if matches!(result, Err(Signal::Stop)) {
                return Err(Signal::Stop);
            }
            if self.call_depth > 0 {
                self.overflow = Some(err.clone());
            }
            return self.raise_in(err, scope, false);
        }

        let value = match result {
            Ok(()) | Err(Signal::Break(_)) | Err(Signal::Continue(_)) => DataObject::void(),
            Err(Signal::Return(v)) => v,
            Err(Signal::Throw(e)) => return self.raise(e, scope),
            Err(Signal::Stop) => return Err(Signal::Stop),
        };
        if let Some(c) = func.return_constraint {
            if !c.allows(value.data_type()) {
                return self.raise(
                    ErrorObject::with_message(
                        InterpretingError::IncompatibleDataType,
                        format!("returned {} violates {c}", value.data_type()),
                    ),
                    scope,
                );
            }
        }
        Ok(value)
    }

    fn call_native(&mut self, f: &Rc<NativeFunction>, args: Vec<DataObject>, scope: &ScopeRef) -> Eval<DataObject> {
        let d = &f.descriptor;
        if let Some(dep) = &d.deprecation {
            self.warn(&ErrorObject::with_message(
                InterpretingError::DeprecatedFuncCall,
                format!(
                    "{} is deprecated (removal in {}, use {} instead)",
                    d.qualified_name(),
                    dep.removal_version.as_deref().unwrap_or("a future version"),
                    dep.replacement.as_deref().unwrap_or("nothing"),
                ),
            ));
        }
        let args = match check_arguments(&d.params, args) {
            Ok(a) => a,
            Err(e) => {
                let e = ErrorObject::with_message(e.err, format!("{}: {}", d.qualified_name(), e.message()));
                return self.raise(e, scope);
            }
        };
        let id = scope.borrow().id();
        let result = native::invoke(f.callable(), self, args, id);
        self.finish_native(result, d.return_constraint, scope)
    }

    fn finish_native(
        &mut self,
        result: NativeResult,
        return_constraint: Option<TypeConstraint>,
        scope: &ScopeRef,
    ) -> Eval<DataObject> {
        match result {
            Ok(v) => match return_constraint {
                Some(c) if !c.allows(v.data_type()) => self.raise(
                    ErrorObject::with_message(
                        InterpretingError::IncompatibleDataType,
                        format!("native function returned {}, expected {c}", v.data_type()),
                    ),
                    scope,
                ),
                _ => Ok(v),
            },
            Err(NativeFault::Lang(e)) => self.raise(e, scope),
            Err(NativeFault::Host(e)) => {
                self.raise(ErrorObject::with_message(InterpretingError::SystemError, e.to_string()), scope)
            }
            Err(NativeFault::Module(e)) => {
                self.raise(ErrorObject::with_message(InterpretingError::ModuleLoadUnloadErr, e.to_string()), scope)
            }
            Err(NativeFault::Signal(s)) => Err(s),
        }
    }

    /// Call a function value on behalf of a native function.
    pub(crate) fn call_from_native(&mut self, f: &Value, args: Vec<DataObject>, scope: ScopeId) -> NativeResult {
        let scope = self.scope_or_global(scope);
        self.call_pointer(f, args, &scope).map_err(NativeFault::Signal)
    }

    /// Parse and run `src` in `scope`; a `return` yields its value.
    pub(crate) fn exec_source(&mut self, src: &str, scope: &ScopeRef) -> NativeResult {
        let ast = parser::parse(src);
        match self.exec_block(&ast, scope) {
            Ok(()) => Ok(DataObject::void()),
            Err(Signal::Return(v)) => Ok(v),
            Err(Signal::Break(_)) | Err(Signal::Continue(_)) => Ok(DataObject::void()),
            Err(s) => Err(NativeFault::Signal(s)),
        }
    }

    /// Resolve a script path against `$LANG_PATH` and the library dirs.
    pub(crate) fn resolve_script_path(&self, path: &str, scope: &ScopeRef) -> String {
        let p = Path::new(path);
        if p.is_absolute() {
            return path.to_owned();
        }
        let mut candidates = Vec::new();
        if let Some(dir) = lookup(scope, "$LANG_PATH") {
            let dir = dir.to_string();
            if !dir.is_empty() {
                candidates.push(Path::new(&dir).join(p));
            }
        }
        candidates.extend(self.options.library_dirs.iter().map(|d| d.join(p)));
        candidates
            .into_iter()
            .find(|c| c.exists())
            .map_or_else(|| path.to_owned(), |c| c.to_string_lossy().into_owned())
    }

    pub(crate) fn read_script(&self, path: &str) -> Result<String, String> {
        (self.options.file_loader)(path)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn lang_var(name: String, value: Value) -> DataObject {
    let mut slot = DataObject::new(value).with_name(name);
    slot.set_final();
    slot.set_lang_var();
    slot
}

pub(crate) fn split_path(path: &str) -> (String, String) {
    let p = Path::new(path);
    let dir = p.parent().map(|d| d.to_string_lossy().into_owned()).unwrap_or_default();
    let file = p.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    (dir, file)
}

pub(crate) fn lang_var_slot(name: &str, value: Value) -> DataObject {
    lang_var(name.to_owned(), value)
}

fn merge_pieces(mut pieces: Vec<DataObject>) -> DataObject {
    match pieces.len() {
        0 => DataObject::void(),
        1 => pieces.pop().unwrap_or_default(),
        _ => DataObject::text(pieces.iter().map(ToString::to_string).collect::<String>()),
    }
}

fn set_element(target: &Value, index: i64, value: Value) -> Result<(), ErrorObject> {
    match target {
        Value::Array(a) => {
            let mut a = a.borrow_mut();
            let i = ops::resolve_index(index, a.len())?;
            a[i] = DataObject::new(value);
        }
        Value::List(l) => {
            let mut l = l.borrow_mut();
            let i = ops::resolve_index(index, l.len())?;
            l[i] = DataObject::new(value);
        }
        Value::ByteBuffer(b) => {
            let byte = to_number(&value).ok_or_else(|| {
                ErrorObject::with_message(InterpretingError::NoNum, "a byte must be a number")
            })?;
            let mut b = b.borrow_mut();
            let i = ops::resolve_index(index, b.len())?;
            b[i] = byte.as_i64() as u8;
        }
        _ => {}
    }
    Ok(())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Compare dotted versions numerically; `None` if either is malformed.
pub(crate) fn compare_versions(a: &str, b: &str) -> Option<std::cmp::Ordering> {
    let parse = |v: &str| -> Option<Vec<u32>> { v.split('.').map(|p| p.parse().ok()).collect() };
    let (a, b) = (parse(a)?, parse(b)?);
    let len = a.len().max(b.len());
    let pad = |v: Vec<u32>| v.into_iter().chain(std::iter::repeat(0)).take(len).collect::<Vec<_>>();
    Some(pad(a).cmp(&pad(b)))
}

fn fault_to_host(result: NativeResult) -> Result<DataObject, LangError> {
    match result {
        Ok(v) => Ok(v),
        Err(NativeFault::Module(e)) => Err(LangError::Module(e)),
        Err(NativeFault::Lang(e)) => Err(LangError::Script(e)),
        Err(NativeFault::Host(e)) => Err(LangError::Native(e)),
        Err(NativeFault::Signal(Signal::Stop)) => Err(LangError::Stopped),
        Err(NativeFault::Signal(Signal::Throw(e))) => Err(LangError::Script(e)),
        Err(NativeFault::Signal(Signal::Return(v))) => Ok(v),
        Err(NativeFault::Signal(_)) => Ok(DataObject::void()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(src: &str) -> Interpreter {
        let mut it = Interpreter::new(InterpreterOptions { error_output: 0, ..Default::default() });
        it.interpret(src).unwrap();
        it
    }

    fn ret(src: &str) -> DataObject {
        run(src).get_and_reset_return_value().unwrap()
    }

    #[test]
    fn assignment_and_text_interpolation() {
        let mut it = run("$name = World\nfunc.println(Hello, $name!)");
        assert_eq!(it.take_output(), vec!["Hello, World!"]);
    }

    #[test]
    fn arithmetic_results() {
        assert_eq!(ret("return parser.op(1 + 2 * 3)").int(), 7);
        assert_eq!(ret("$x = 10\n$x += 5\nreturn $x").int(), 15);
        assert_eq!(ret("return parser.op(7 / 2)").to_string(), "3.5");
    }

    #[test]
    fn errno_is_read_and_clear() {
        let mut it = run("$x = parser.op(1 / 0)\n$a = $LANG_ERRNO\n$b = $LANG_ERRNO");
        let g = it.global_scope();
        assert_eq!(lookup(&g, "$a").unwrap().int(), InterpretingError::DivByZero.code());
        assert_eq!(lookup(&g, "$b").unwrap().int(), 0);
        assert!(it.get_and_reset_return_value().is_none());
    }

    #[test]
    fn lang_vars_are_final() {
        let it = run("$LANG_VERSION = 2\n$e = $LANG_ERRNO");
        let g = it.global_scope();
        assert_eq!(lookup(&g, "$LANG_VERSION").unwrap().to_string(), LANG_VERSION);
        assert_eq!(lookup(&g, "$e").unwrap().int(), InterpretingError::FinalVarChange.code());
        let it = run("$LANGnew = 1\n$e = $LANG_ERRNO");
        assert_eq!(lookup(&it.global_scope(), "$e").unwrap().int(), InterpretingError::InvalidAssignment.code());
    }

    #[test]
    fn undefined_variable_reads_as_text() {
        let mut it = run("func.println($missing)");
        assert_eq!(it.take_output(), vec!["$missing"]);
    }

    #[test]
    fn functions_and_recursion() {
        let src = "fp.fac = ($n) -> {\n\
                   \tcon.if($n < 2)\n\
                   \t\treturn 1\n\
                   \tcon.endif\n\
                   \treturn parser.op($n * fp.fac(parser.op($n - 1)))\n\
                   }\n\
                   return fp.fac(5)";
        assert_eq!(ret(src).int(), 120);
    }

    #[test]
    fn closures_see_defining_scope() {
        let v = ret("$base = 10\nfp.add = ($x) -> return parser.op($x + $base)\nreturn fp.add(5)");
        assert_eq!(v.int(), 15);
    }

    #[test]
    fn argument_count_is_checked() {
        let it = run("fp.f = ($a, $b) -> return $a\n$r = fp.f(1)\n$e = $LANG_ERRNO");
        let g = it.global_scope();
        assert_eq!(lookup(&g, "$e").unwrap().int(), InterpretingError::InvalidArgCount.code());
    }

    #[test]
    fn loops_with_break_and_else() {
        let mut it = run(
            "con.repeat($i, 5)\n\tcon.if(parser.con($i == 3))\n\t\tcon.break\n\tcon.endif\n\tfunc.print($i)\ncon.endloop\n\
             con.repeat($j, 0)\n\tfunc.print(x)\ncon.else\n\tfunc.print(E)\ncon.endloop",
        );
        assert_eq!(it.take_output(), vec!["012E"]);
    }

    #[test]
    fn nested_continue_levels() {
        let mut it = run(
            "con.repeat($i, 2)\n\tcon.repeat($j, 3)\n\t\tcon.if(parser.con($j == 1))\n\t\t\tcon.continue(2)\n\t\tcon.endif\n\
             \t\tfunc.print($i$j)\n\tcon.endloop\n\tfunc.print(!)\ncon.endloop",
        );
        assert_eq!(it.take_output(), vec!["0010"]);
    }

    #[test]
    fn foreach_over_array_and_text() {
        let mut it = run("&a = 1, 2, 3\ncon.foreach($e, &a)\n\tfunc.print($e)\ncon.endloop\ncon.foreach($c, abc)\n\tfunc.print($c-)\ncon.endloop");
        assert_eq!(it.take_output(), vec!["123a-b-c-"]);
    }

    #[test]
    fn try_catch_finally() {
        let mut it = run(
            "con.try\n\t$x = parser.op(1 / 0)\n\tfunc.print(unreached)\n\
             con.catch($LANG_ERROR_DIV_BY_ZERO)\n\tfunc.print(caught)\n\
             con.finally\n\tfunc.print(-done)\ncon.endtry",
        );
        assert_eq!(it.take_output(), vec!["caught-done"]);
    }

    #[test]
    fn softtry_only_throws_in_own_scope() {
        let mut it = run(
            "fp.f = () -> {\n\t$x = parser.op(1 / 0)\n\treturn inner\n}\n\
             con.softtry\n\tfunc.print(fp.f())\n\t$y = parser.op(1 / 0)\n\tfunc.print(unreached)\n\
             con.catch\n\tfunc.print(-caught)\ncon.endtry",
        );
        assert_eq!(it.take_output(), vec!["inner-caught"]);
    }

    #[test]
    fn try_else_runs_without_error() {
        let mut it = run("con.try\n\tfunc.print(ok)\ncon.catch\n\tfunc.print(bad)\ncon.else\n\tfunc.print(-else)\ncon.endtry");
        assert_eq!(it.take_output(), vec!["ok-else"]);
    }

    #[test]
    fn top_level_throw_is_reported() {
        let mut it = run("throw $LANG_ERROR_NO_NUM, custom");
        assert!(it.is_thrown_value());
        let v = it.get_and_reset_return_value().unwrap();
        assert_eq!(v.error().unwrap().err, InterpretingError::NoNum);
        assert_eq!(v.error().unwrap().message(), "custom");
    }

    #[test]
    fn pointers_alias_slots() {
        let v = ret("$x = 1\n$p = $[x]\n$*p = 42\nreturn $x");
        assert_eq!(v.int(), 42);
        assert_eq!(ret("$x = 7\n$p = $[x]\nreturn $*p").int(), 7);
    }

    #[test]
    fn element_assignment() {
        let v = ret("&a = 1, 2, 3\n&a[-1] = 9\nreturn &a");
        assert_eq!(v.to_string(), "[1, 2, 9]");
    }

    #[test]
    fn type_constraints_on_assignment() {
        let it = run("$x{INT} = 1\n$x = text\n$e = $LANG_ERRNO");
        let g = it.global_scope();
        assert_eq!(lookup(&g, "$x").unwrap().int(), 1);
        assert_eq!(lookup(&g, "$e").unwrap().int(), InterpretingError::IncompatibleDataType.code());
    }

    #[test]
    fn translations_and_flags() {
        let mut it = run("greeting = hello world\nlang.errorOutput = 0\nlang.test = 1");
        assert_eq!(it.translation_map(MODULE_SCOPE).unwrap()["greeting"], "hello world");
        assert_eq!(it.flags.error_output, 0);
        assert!(it.flags.test);
        it.interpret("lang.version = 99.0.0").unwrap();
        assert_eq!(
            it.global_scope().borrow().errno(),
            InterpretingError::LangVerError.code()
        );
    }

    #[test]
    fn escapes() {
        let mut it = run("func.print(a\\nb\\sc\\e\\!)");
        assert_eq!(it.take_output(), vec!["a", "b c!"]);
    }

    #[test]
    fn args_are_bound() {
        let mut it = Interpreter::new(InterpreterOptions::default());
        it.set_args(&["one".into(), "two".into()]);
        let v = it.eval("return &LANG_ARGS").unwrap().unwrap();
        assert_eq!(v.to_string(), "[one, two]");
    }

    #[test]
    fn stop_request_unwinds() {
        let mut it = Interpreter::new(InterpreterOptions::default());
        it.stop_handle().request_stop();
        assert!(matches!(it.interpret("con.loop\ncon.endloop"), Err(LangError::Stopped)));
        it.reset_stop_flag();
        assert!(it.interpret("$x = 1").is_ok());
    }

    #[test]
    fn unclosed_if_raises_eof_before_its_branch() {
        let mut it = run("con.if(1)\n\tfunc.print(a)\n\t$e = $LANG_ERRNO");
        assert_eq!(it.take_output(), vec!["a"]);
        let e = lookup(&it.global_scope(), "$e").unwrap().int();
        assert_eq!(e, InterpretingError::Eof.code());
    }

    #[test]
    fn unclosed_loop_raises_eof_before_iterating() {
        let it = run("con.repeat($i, 1)\n\t$e = $LANG_ERRNO");
        let e = lookup(&it.global_scope(), "$e").unwrap().int();
        assert_eq!(e, InterpretingError::Eof.code());
    }

    #[test]
    fn while_and_until_loops() {
        let mut it = run(
            "$i = 0\ncon.while(parser.con($i < 3))\n\tfunc.print($i)\n\t$i = parser.op($i + 1)\ncon.endloop\n\
             con.until(parser.con($i == 0))\n\t$i = parser.op($i - 1)\n\tfunc.print($i)\ncon.endloop",
        );
        assert_eq!(it.take_output(), vec!["012210"]);
    }

    #[test]
    fn overflow_caught_in_try_stays_caught() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                let it = run(
                    "fp.f = () -> return fp.f()\n\
                     fp.g = () -> {\n\tcon.try\n\t\tfp.f()\n\tcon.catch\n\t\treturn caught\n\tcon.endtry\n}\n\
                     $r = fp.g()\n$e = $LANG_ERRNO",
                );
                let global = it.global_scope();
                (lookup(&global, "$r").unwrap().to_string(), lookup(&global, "$e").unwrap().int())
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), ("caught".to_owned(), 0));
    }

    #[test]
    fn stack_overflow_is_an_error() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                let it = run("fp.f = () -> return fp.f()\n$r = fp.f()\n$e = $LANG_ERRNO");
                let e = lookup(&it.global_scope(), "$e").unwrap().int();
                e
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), InterpretingError::StackOverflow.code());
    }

    #[test]
    fn version_comparison() {
        assert_eq!(compare_versions("1.0.0", "1.0"), Some(std::cmp::Ordering::Equal));
        assert_eq!(compare_versions("0.9.9", "1.0.0"), Some(std::cmp::Ordering::Less));
        assert_eq!(compare_versions("x", "1.0.0"), None);
    }

    #[test]
    fn host_callable_function_pointer() {
        let mut it = Interpreter::new(InterpreterOptions::default());
        let fp = FunctionPointer::external("fp.twice", |_, args, _| {
            Ok(DataObject::int(args.first().map_or(0, |a| a.int()) * 2))
        });
        it.global_scope().borrow_mut().insert("fp.twice", DataObject::function_pointer(fp));
        assert_eq!(it.eval("return fp.twice(21)").unwrap().unwrap().int(), 42);
    }
}
