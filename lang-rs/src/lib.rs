//! Lang: an embeddable, dynamically typed scripting language with
//! per-scope translation maps.
//!
//! | Module        | Concern                                           |
//! |---------------|---------------------------------------------------|
//! | [`script`]    | lexer, parser, evaluator, natives, modules        |
//! | [`langfile`]  | `key = value` translation files and their cache   |
//! | [`pattern`]   | cached regex compilation                          |
//! | [`cli`]       | argv parsing for the `lang` runner                |
//! | [`logging`]   | tracing subscriber setup                          |

pub mod cli;
pub mod langfile;
pub mod logging;
pub mod pattern;
pub mod script;

pub use script::{
    DataObject, Descriptor, Interpreter, InterpreterOptions, LangError, NativeModule, Value,
};
