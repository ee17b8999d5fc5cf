//! The Lang language core.
//!
//! Source text goes through [`lexer`] and [`parser`] into an [`ast::Node`]
//! tree, which [`interp::Interpreter`] walks against a [`scope::Scope`].
//! Natives are described by [`native::Descriptor`]s and live in a
//! [`native::NativeRegistry`]; host modules plug in through
//! [`module::NativeModule`].
//!
//! # Quick start
//!
//! ```rust
//! use lang::script::{Interpreter, InterpreterOptions};
//!
//! let mut it = Interpreter::new(InterpreterOptions::default());
//! it.interpret("$x = 6\nfunc.println(parser.op($x * 7))").unwrap();
//! assert_eq!(it.take_output(), vec!["42"]);
//! ```

pub mod ast;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod module;
pub mod native;
pub mod ops;
pub mod parser;
pub mod scope;
pub mod value;

mod builtins;

pub use error::{ErrorObject, InterpretingError, LangError, NativeError};
pub use interp::{ExecutionFlags, Interpreter, InterpreterOptions, StopHandle, LANG_VERSION};
pub use module::{ModuleContext, ModuleError, ModuleState, NativeModule};
pub use native::{Descriptor, NativeFault, NativeResult};
pub use scope::{ScopeId, MODULE_SCOPE};
pub use value::{DataObject, DataType, DataTypeSet, FunctionPointer, TypeConstraint, Value};
