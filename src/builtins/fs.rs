//! Sandboxed filesystem built-ins.
//!
//! All paths are relative to the sandbox roots configured at startup; the
//! interpreter refuses filesystem access when no sandbox is attached.

use crate::builtins::{want_string, Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::sandbox::Sandbox;
use crate::value::Value;

fn sandbox<'a>(function: &str, ev: &'a Evaluator) -> Result<&'a Sandbox, RuntimeError> {
    ev.sandbox.as_ref().ok_or_else(|| {
        RuntimeError::runtime_error(function, "filesystem access is not configured")
    })
}

fn builtin_read_file(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let path = want_string("readFile", args, 0)?;
    let contents = sandbox("readFile", ev)?
        .read_file(path)
        .map_err(|e| RuntimeError::runtime_error("readFile", e.to_string()))?;
    Ok(Value::String(contents))
}

fn builtin_write_file(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let path = want_string("writeFile", args, 0)?;
    let contents = want_string("writeFile", args, 1)?;
    sandbox("writeFile", ev)?
        .write_file(path, contents)
        .map_err(|e| RuntimeError::runtime_error("writeFile", e.to_string()))?;
    Ok(Value::Null)
}

fn builtin_file_exists(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let path = want_string("fileExists", args, 0)?;
    let exists = sandbox("fileExists", ev)?
        .exists(path)
        .map_err(|e| RuntimeError::runtime_error("fileExists", e.to_string()))?;
    Ok(Value::Bool(exists))
}

fn builtin_list_files(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let path = if args.is_empty() {
        ""
    } else {
        want_string("listFiles", args, 0)?
    };
    let names = sandbox("listFiles", ev)?
        .list_files(path)
        .map_err(|e| RuntimeError::runtime_error("listFiles", e.to_string()))?;
    Ok(Value::List(names.into_iter().map(Value::String).collect()))
}

inventory::submit! {
    BuiltinDef { name: "readFile", arity: Arity::Exact(1), func: builtin_read_file, effect: true, doc: "Read a sandboxed file as a string." }
}
inventory::submit! {
    BuiltinDef { name: "writeFile", arity: Arity::Exact(2), func: builtin_write_file, effect: true, doc: "Write a string to a sandboxed file." }
}
inventory::submit! {
    BuiltinDef { name: "fileExists", arity: Arity::Exact(1), func: builtin_file_exists, effect: true, doc: "Whether a sandboxed path exists." }
}
inventory::submit! {
    BuiltinDef { name: "listFiles", arity: Arity::Range(0, 1), func: builtin_list_files, effect: true, doc: "Names in a sandboxed directory." }
}
