// ABOUTME: Runtime error types surfaced as diagnostics by the evaluator

use crate::diag::{DiagKind, Diagnostic};
use crate::value::Value;
use thiserror::Error;

/// Errors raised while walking the tree.
///
/// Variants that originate at a known source location carry it; errors raised
/// inside built-ins pick up the call site position when they cross the call
/// boundary (see [`RuntimeError::at`]).
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("undefined name `{name}`")]
    Undefined {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("{callee}: expected {expected} argument{}, got {actual}", if *.expected == "1" { "" } else { "s" })]
    ArityMismatch {
        callee: String,
        expected: String,
        actual: usize,
        line: usize,
        column: usize,
    },

    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: String,
        actual: String,
        line: usize,
        column: usize,
    },

    #[error("division by zero")]
    DivisionByZero { line: usize, column: usize },

    #[error("index {index} out of bounds for {target} of length {len}")]
    BadIndex {
        target: String,
        index: i64,
        len: usize,
        line: usize,
        column: usize,
    },

    #[error("no pattern matched the value {value}")]
    NoMatch {
        value: String,
        line: usize,
        column: usize,
    },

    #[error("unknown context `{name}`")]
    UnknownContext {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("cannot rebind `{name}`; bindings introduced by `let` are immutable")]
    Rebind {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("`{name}` is not bound by `maybe` and cannot be assigned")]
    AssignImmutable {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("value of type {actual} is not callable")]
    NotCallable {
        actual: String,
        line: usize,
        column: usize,
    },

    #[error("placeholder used outside of a pipe")]
    PlaceholderOutsidePipe { line: usize, column: usize },

    #[error("unknown decorator `#{name}`")]
    UnknownDecorator {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("timed out after {ms} ms")]
    Timeout { ms: i64 },

    #[error("send on a closed channel")]
    ChannelClosed,

    #[error("await can never complete: no runnable tasks or timers remain")]
    Deadlock,

    #[error("{message}")]
    Validation {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("{function}: {message}")]
    Io { function: String, message: String },

    #[error("{message}")]
    Message {
        message: String,
        line: usize,
        column: usize,
    },

    /// Promise rejection carrying the originating failure.
    #[error("promise rejected: {cause}")]
    Rejected { cause: Box<RuntimeError> },

    /// Internal early-exit signal for `return` / `<-`; never surfaces to
    /// callers because every function call boundary intercepts it.
    #[error("return outside of a function")]
    EarlyReturn(Value),
}

impl RuntimeError {
    pub fn type_error(expected: &str, actual: &Value) -> Self {
        RuntimeError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.type_name().to_string(),
            line: 0,
            column: 0,
        }
    }

    pub fn arity_error(callee: &str, expected: impl Into<String>, actual: usize) -> Self {
        RuntimeError::ArityMismatch {
            callee: callee.to_string(),
            expected: expected.into(),
            actual,
            line: 0,
            column: 0,
        }
    }

    pub fn runtime_error(function: &str, message: impl Into<String>) -> Self {
        RuntimeError::Io {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>, line: usize, column: usize) -> Self {
        RuntimeError::Message {
            message: message.into(),
            line,
            column,
        }
    }

    /// Stable diagnostic code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::Undefined { .. } => "UNDEFINED_NAME",
            RuntimeError::ArityMismatch { .. } => "ARITY_MISMATCH",
            RuntimeError::TypeMismatch { .. } => "TYPE_MISMATCH",
            RuntimeError::DivisionByZero { .. } => "DIVISION_BY_ZERO",
            RuntimeError::BadIndex { .. } => "BAD_INDEX",
            RuntimeError::NoMatch { .. } => "NO_MATCH",
            RuntimeError::UnknownContext { .. } => "UNKNOWN_CONTEXT",
            RuntimeError::Rebind { .. } => "REBIND",
            RuntimeError::AssignImmutable { .. } => "ASSIGN_IMMUTABLE",
            RuntimeError::NotCallable { .. } => "NOT_CALLABLE",
            RuntimeError::PlaceholderOutsidePipe { .. } => "PLACEHOLDER_OUTSIDE_PIPE",
            RuntimeError::UnknownDecorator { .. } => "UNKNOWN_DECORATOR",
            RuntimeError::Timeout { .. } => "TIMEOUT",
            RuntimeError::ChannelClosed => "CHANNEL_CLOSED",
            RuntimeError::Deadlock => "DEADLOCK",
            RuntimeError::Validation { .. } => "TYPE_VALIDATION",
            RuntimeError::Io { .. } => "IO_ERROR",
            RuntimeError::Message { .. } => "RUNTIME_ERROR",
            RuntimeError::Rejected { cause } => cause.code(),
            RuntimeError::EarlyReturn(_) => "RETURN_OUTSIDE_FUNCTION",
        }
    }

    /// Source position, if this error carries one.
    pub fn position(&self) -> Option<(usize, usize)> {
        let (line, column) = match self {
            RuntimeError::Undefined { line, column, .. }
            | RuntimeError::ArityMismatch { line, column, .. }
            | RuntimeError::TypeMismatch { line, column, .. }
            | RuntimeError::DivisionByZero { line, column }
            | RuntimeError::BadIndex { line, column, .. }
            | RuntimeError::NoMatch { line, column, .. }
            | RuntimeError::UnknownContext { line, column, .. }
            | RuntimeError::Rebind { line, column, .. }
            | RuntimeError::AssignImmutable { line, column, .. }
            | RuntimeError::NotCallable { line, column, .. }
            | RuntimeError::PlaceholderOutsidePipe { line, column }
            | RuntimeError::UnknownDecorator { line, column, .. }
            | RuntimeError::Validation { line, column, .. }
            | RuntimeError::Message { line, column, .. } => (*line, *column),
            RuntimeError::Rejected { cause } => return cause.position(),
            _ => return None,
        };
        if line == 0 {
            None
        } else {
            Some((line, column))
        }
    }

    /// Attach a position to an error that does not have one yet. Errors that
    /// already know where they happened keep their original location.
    pub fn at(self, line: usize, column: usize) -> Self {
        if self.position().is_some() {
            return self;
        }
        match self {
            RuntimeError::Undefined { name, .. } => RuntimeError::Undefined { name, line, column },
            RuntimeError::ArityMismatch {
                callee,
                expected,
                actual,
                ..
            } => RuntimeError::ArityMismatch {
                callee,
                expected,
                actual,
                line,
                column,
            },
            RuntimeError::TypeMismatch {
                expected, actual, ..
            } => RuntimeError::TypeMismatch {
                expected,
                actual,
                line,
                column,
            },
            RuntimeError::DivisionByZero { .. } => RuntimeError::DivisionByZero { line, column },
            RuntimeError::BadIndex {
                target, index, len, ..
            } => RuntimeError::BadIndex {
                target,
                index,
                len,
                line,
                column,
            },
            RuntimeError::NoMatch { value, .. } => RuntimeError::NoMatch {
                value,
                line,
                column,
            },
            RuntimeError::UnknownContext { name, .. } => {
                RuntimeError::UnknownContext { name, line, column }
            }
            RuntimeError::NotCallable { actual, .. } => RuntimeError::NotCallable {
                actual,
                line,
                column,
            },
            RuntimeError::PlaceholderOutsidePipe { .. } => {
                RuntimeError::PlaceholderOutsidePipe { line, column }
            }
            RuntimeError::Validation { message, .. } => RuntimeError::Validation {
                message,
                line,
                column,
            },
            RuntimeError::Message { message, .. } => RuntimeError::Message {
                message,
                line,
                column,
            },
            RuntimeError::Rejected { cause } => RuntimeError::Rejected {
                cause: Box::new(cause.at(line, column)),
            },
            other => other,
        }
    }

    /// Convert to the host-facing diagnostic shape. `fallback` supplies a
    /// position for errors that never picked one up.
    pub fn into_diagnostic(self, fallback: (usize, usize)) -> Diagnostic {
        let kind = match self {
            RuntimeError::Validation { .. } => DiagKind::Type,
            _ => DiagKind::Runtime,
        };
        let (line, column) = self.position().unwrap_or(fallback);
        let code = self.code();
        Diagnostic {
            kind,
            message: self.to_string(),
            line,
            column,
            code: Some(code),
            related: Vec::new(),
        }
    }
}
