//! # Built-in library
//!
//! Native functions registered into the root environment. Groups:
//!
//! - **[math]**: abs, floor, ceil, round, sqrt, pow, min, max
//! - **[lists]**: map, filter, reduce, range, head, tail, length, concat,
//!   push, take, drop, slice, zip, partition, sort, sortBy, unique, groupBy,
//!   flatten, flatMap
//! - **[strings]**: split, join, replace, trim, case conversion, toString,
//!   parseInt, parseFloat, regex primitives, base64/url/hex codecs
//! - **[records]**: keys, values, entries, merge
//! - **[json]**: toJson, parseJson
//! - **[fs]**: readFile, writeFile, fileExists, listFiles (sandboxed)
//! - **[time]**: now, today, addDays, diffDays
//! - **[concurrency]**: delay, parallel, race, then, channel, send, receive,
//!   close, isChannel
//! - **[network]**: fetch
//! - **[console]**: print
//!
//! Built-ins bypass the decorator/attachment machinery but are otherwise
//! called exactly like user functions. Each module submits its definitions
//! to the inventory; registration is a single collection pass.

use crate::env::Environment;
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::Value;
use std::rc::Rc;

pub mod concurrency;
pub mod console;
pub mod fs;
pub mod json;
pub mod lists;
pub mod math;
pub mod network;
pub mod records;
pub mod strings;
pub mod time;

/// Native function signature. Built-ins receive the evaluator so that
/// higher-order ones (`map`, `reduce`, `parallel`, ...) can call back into
/// user code and the async ones can reach the scheduler.
pub type NativeFn = fn(&mut Evaluator, &[Value]) -> Result<Value, RuntimeError>;

/// Accepted argument counts for a built-in.
#[derive(Debug, Clone, Copy)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn check(&self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == *k,
            Arity::Range(lo, hi) => n >= *lo && n <= *hi,
            Arity::AtLeast(lo) => n >= *lo,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Arity::Exact(k) => k.to_string(),
            Arity::Range(lo, hi) => format!("{}-{}", lo, hi),
            Arity::AtLeast(lo) => format!("at least {}", lo),
        }
    }
}

/// A registered built-in. `effect` marks observable side effects, which the
/// `#pure` decorator reports on.
#[derive(Debug)]
pub struct BuiltinDef {
    pub name: &'static str,
    pub arity: Arity,
    pub func: NativeFn,
    pub effect: bool,
    pub doc: &'static str,
}

inventory::collect!(BuiltinDef);

/// Bind every collected built-in into the given (root) environment.
pub fn register_builtins(env: &Rc<Environment>) {
    for def in inventory::iter::<BuiltinDef> {
        env.bind(def.name, Value::Builtin(def));
    }
}

/// All registered built-ins, for the REPL's `:builtins` listing.
pub fn all() -> Vec<&'static BuiltinDef> {
    let mut defs: Vec<_> = inventory::iter::<BuiltinDef>.into_iter().collect();
    defs.sort_by_key(|def| def.name);
    defs
}

// Shared argument accessors; they keep the type errors uniform across
// modules.

pub(crate) fn want_int(function: &str, args: &[Value], i: usize) -> Result<i64, RuntimeError> {
    match &args[i] {
        Value::Int(n) => Ok(*n),
        other => Err(RuntimeError::TypeMismatch {
            expected: "Int".to_string(),
            actual: format!("{} at argument {}", other.type_name(), i + 1),
            line: 0,
            column: 0,
        }
        .tag(function)),
    }
}

pub(crate) fn want_string<'a>(
    function: &str,
    args: &'a [Value],
    i: usize,
) -> Result<&'a str, RuntimeError> {
    match &args[i] {
        Value::String(s) => Ok(s),
        other => Err(RuntimeError::TypeMismatch {
            expected: "String".to_string(),
            actual: format!("{} at argument {}", other.type_name(), i + 1),
            line: 0,
            column: 0,
        }
        .tag(function)),
    }
}

pub(crate) fn want_list<'a>(
    function: &str,
    args: &'a [Value],
    i: usize,
) -> Result<&'a [Value], RuntimeError> {
    match &args[i] {
        Value::List(items) => Ok(items),
        other => Err(RuntimeError::TypeMismatch {
            expected: "List".to_string(),
            actual: format!("{} at argument {}", other.type_name(), i + 1),
            line: 0,
            column: 0,
        }
        .tag(function)),
    }
}

pub(crate) fn want_callable(
    function: &str,
    args: &[Value],
    i: usize,
) -> Result<Value, RuntimeError> {
    let value = &args[i];
    if value.is_callable() {
        Ok(value.clone())
    } else {
        Err(RuntimeError::TypeMismatch {
            expected: "Function".to_string(),
            actual: format!("{} at argument {}", value.type_name(), i + 1),
            line: 0,
            column: 0,
        }
        .tag(function))
    }
}

impl RuntimeError {
    /// Prefix a type error with the built-in it came from.
    fn tag(self, function: &str) -> RuntimeError {
        match self {
            RuntimeError::TypeMismatch {
                expected,
                actual,
                line,
                column,
            } => RuntimeError::TypeMismatch {
                expected: format!("{}: {}", function, expected),
                actual,
                line,
                column,
            },
            other => other,
        }
    }
}
