//! Error codes, error values and host-facing error types.
//!
//! Lang keeps three error channels apart:
//!
//! | Channel | Type | Surfaces as |
//! |---------|------|-------------|
//! | parse-time | [`ParsingError`](super::ast::ParsingError) | error node in the AST |
//! | script-level (errno) | [`InterpretingError`] / [`ErrorObject`] | `Value::Error` + `$LANG_ERRNO` |
//! | cancellation / host | [`LangError`] | `Err` from the top-level entry points |
//!
//! Codes above zero are errors, codes below zero are warnings which are only
//! logged.

use std::fmt;

use thiserror::Error;

use super::module::ModuleError;

// ── Error codes ───────────────────────────────────────────────────────────────

macro_rules! interpreting_errors {
    ($($variant:ident = $code:expr, $name:literal, $text:literal;)*) => {
        /// Stable errno codes, numbered the way Lang scripts observe them.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum InterpretingError {
            $($variant,)*
        }

        impl InterpretingError {
            /// Every code, in ascending table order.
            pub const ALL: &'static [InterpretingError] = &[$(InterpretingError::$variant,)*];

            pub fn code(self) -> i32 {
                match self {
                    $(InterpretingError::$variant => $code,)*
                }
            }

            /// Upper-case name used for `$LANG_ERROR_<NAME>`.
            pub fn name(self) -> &'static str {
                match self {
                    $(InterpretingError::$variant => $name,)*
                }
            }

            /// Default human-readable description.
            pub fn description(self) -> &'static str {
                match self {
                    $(InterpretingError::$variant => $text,)*
                }
            }
        }
    };
}

interpreting_errors! {
    NoError = 0, "NO_ERROR", "No Error";

    FinalVarChange = 1, "FINAL_VAR_CHANGE", "LANG or final vars must not be changed";
    ToManyInnerLinks = 2, "TO_MANY_INNER_LINKS", "To many inner links";
    NoLangFile = 3, "NO_LANG_FILE", "No .lang-File";
    FileNotFound = 4, "FILE_NOT_FOUND", "File not found";
    InvalidFuncPtr = 5, "INVALID_FUNC_PTR", "Function pointer is invalid";
    StackOverflow = 6, "STACK_OVERFLOW", "Stack overflow";
    NoTerminal = 7, "NO_TERMINAL", "No terminal available";
    InvalidArgCount = 8, "INVALID_ARG_COUNT", "Invalid argument count";
    InvalidLogLevel = 9, "INVALID_LOG_LEVEL", "Invalid log level";
    InvalidArrPtr = 10, "INVALID_ARR_PTR", "Invalid array pointer";
    NoHexNum = 11, "NO_HEX_NUM", "No hexadecimal number";
    NoChar = 12, "NO_CHAR", "No char";
    NoNum = 13, "NO_NUM", "No number";
    DivByZero = 14, "DIV_BY_ZERO", "Dividing by 0";
    NegativeArrayLen = 15, "NEGATIVE_ARRAY_LEN", "Negative array length";
    EmptyArray = 16, "EMPTY_ARRAY", "Empty array";
    LengthNan = 17, "LENGTH_NAN", "Length NAN";
    IndexOutOfBounds = 18, "INDEX_OUT_OF_BOUNDS", "Index out of bounds";
    ArgCountNotArrLen = 19, "ARG_COUNT_NOT_ARR_LEN", "Argument count is not array length";
    InvalidFuncPtrLoop = 20, "INVALID_FUNC_PTR_LOOP", "Invalid function pointer";
    InvalidArguments = 21, "INVALID_ARGUMENTS", "Invalid arguments";
    FunctionNotFound = 22, "FUNCTION_NOT_FOUND", "Function not found";
    Eof = 23, "EOF", "End of file was reached early";
    SystemError = 24, "SYSTEM_ERROR", "System Error";
    NegativeRepeatCount = 25, "NEGATIVE_REPEAT_COUNT", "Negative repeat count";
    LangReqNotFound = 26, "LANG_REQ_NOT_FOUND", "Lang request doesn't exist";
    FunctionNotSupported = 27, "FUNCTION_NOT_SUPPORTED", "Function not supported";
    BracketMismatch = 28, "BRACKET_MISMATCH", "Bracket mismatch";
    ContFlowArgMissing = 29, "CONT_FLOW_ARG_MISSING", "Control flow statement condition(s) or argument(s) is missing";
    InvalidAstNode = 30, "INVALID_AST_NODE", "Invalid AST node or AST node order";
    InvalidPtr = 31, "INVALID_PTR", "Invalid pointer";
    IncompatibleDataType = 32, "INCOMPATIBLE_DATA_TYPE", "Incompatible data type";
    LangArraysCopy = 33, "LANG_ARRAYS_COPY", "LANG arrays should not be copied";
    LangVerError = 34, "LANG_VER_ERROR", "Lang file's version is not compatible with this version";
    InvalidConPart = 35, "INVALID_CON_PART", "Invalid statement in control flow statement";
    InvalidFormat = 36, "INVALID_FORMAT", "Invalid format sequence";
    InvalidAssignment = 37, "INVALID_ASSIGNMENT", "Invalid assignment";
    NoBinNum = 38, "NO_BIN_NUM", "No binary number";
    NoOctNum = 39, "NO_OCT_NUM", "No octal number";
    NoBaseNNum = 40, "NO_BASE_N_NUM", "Number is not in base N";
    InvalidNumberBase = 41, "INVALID_NUMBER_BASE", "Invalid number base";
    InvalidRegexSyntax = 42, "INVALID_REGEX_SYNTAX", "Invalid RegEx syntax";
    InvalidTemplateSyntax = 43, "INVALID_TEMPLATE_SYNTAX", "Invalid translation template syntax";
    InvalidModule = 44, "INVALID_MODULE", "The Lang module is invalid";
    ModuleLoadUnloadErr = 45, "MODULE_LOAD_UNLOAD_ERR", "Error during load or unload of Lang module";
    MemberNotAccessible = 46, "MEMBER_NOT_ACCESSIBLE", "The member is not accessible from the current scope";

    DeprecatedFuncCall = -1, "DEPRECATED_FUNC_CALL", "A deprecated predefined function was called";
    NoTerminalWarning = -2, "NO_TERMINAL_WARNING", "No terminal available";
    LangVerWarning = -3, "LANG_VER_WARNING", "Lang file's version is not yet supported, higher Lang version is required";
    InvalidExecFlagData = -4, "INVALID_EXEC_FLAG_DATA", "Execution flag or lang data is invalid";
    VarShadowingWarning = -5, "VAR_SHADOWING_WARNING", "Variable name shadows another variable";
    UndefEscapeSequence = -6, "UNDEF_ESCAPE_SEQUENCE", "An undefined escape sequence was used";
    InvalidDocComment = -7, "INVALID_DOC_COMMENT", "Dangling or invalid doc comment";
}

impl InterpretingError {
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }

    pub fn is_warning(self) -> bool {
        self.code() < 0
    }
}

impl fmt::Display for InterpretingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error values ──────────────────────────────────────────────────────────────

/// The payload of a `Value::Error`: a code plus an optional custom message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorObject {
    pub err: InterpretingError,
    message: Option<String>,
}

impl ErrorObject {
    pub fn new(err: InterpretingError) -> Self {
        Self { err, message: None }
    }

    pub fn with_message(err: InterpretingError, message: impl Into<String>) -> Self {
        Self { err, message: Some(message.into()) }
    }

    pub fn code(&self) -> i32 {
        self.err.code()
    }

    /// The custom message, or the code's default description.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_else(|| self.err.description())
    }

    pub fn custom_message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl From<InterpretingError> for ErrorObject {
    fn from(err: InterpretingError) -> Self {
        Self::new(err)
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.err.name(), self.err.code(), self.message())
    }
}

// ── Native failures ───────────────────────────────────────────────────────────

/// A host-side failure inside a native function.
///
/// Never reaches the script raw: the call protocol wraps it into a
/// `SYSTEM_ERROR` value whose message carries `category` and `message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category}: {message}")]
pub struct NativeError {
    pub category: String,
    pub message: String,
}

impl NativeError {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self { category: category.into(), message: message.into() }
    }
}

impl From<std::io::Error> for NativeError {
    fn from(e: std::io::Error) -> Self {
        NativeError::new(format!("io::{:?}", e.kind()), e.to_string())
    }
}

// ── Host errors ───────────────────────────────────────────────────────────────

/// Errors reported to the embedding host by the top-level entry points.
#[derive(Debug, Error)]
pub enum LangError {
    /// A stop request unwound the whole call stack.
    #[error("execution was stopped")]
    Stopped,
    #[error("can't read {path}: {message}")]
    Io { path: String, message: String },
    #[error("module error: {0}")]
    Module(#[from] ModuleError),
    #[error("script error: {0}")]
    Script(ErrorObject),
    #[error("native error: {0}")]
    Native(#[from] NativeError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for &e in InterpretingError::ALL {
            assert_eq!(InterpretingError::from_code(e.code()), Some(e));
        }
        assert_eq!(InterpretingError::NoNum.code(), 13);
        assert_eq!(InterpretingError::SystemError.code(), 24);
        assert_eq!(InterpretingError::from_code(9999), None);
    }

    #[test]
    fn warnings_are_negative() {
        assert!(InterpretingError::DeprecatedFuncCall.is_warning());
        assert!(!InterpretingError::DivByZero.is_warning());
    }

    #[test]
    fn message_falls_back_to_description() {
        let e = ErrorObject::new(InterpretingError::DivByZero);
        assert_eq!(e.message(), "Dividing by 0");
        let e = ErrorObject::with_message(InterpretingError::DivByZero, "x / 0");
        assert_eq!(e.message(), "x / 0");
        assert_eq!(e.to_string(), "DIV_BY_ZERO (14): x / 0");
    }

    #[test]
    fn native_error_display() {
        let e = NativeError::new("io::NotFound", "missing");
        assert_eq!(e.to_string(), "io::NotFound: missing");
    }
}
