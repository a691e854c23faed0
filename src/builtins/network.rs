//! Network access: `fetch`.
//!
//! The request runs as a scheduled task, so `fetch(url)` returns a pending
//! promise immediately and the transfer happens when the scheduler reaches
//! the task (typically at the first await).

use crate::builtins::{want_string, Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::Value;

/// The blocking half of `fetch`. Registered as a task target only; it is
/// not submitted to the inventory and never appears in the environment.
static FETCH_REQUEST: BuiltinDef = BuiltinDef {
    name: "fetch",
    arity: Arity::Exact(1),
    func: fetch_request,
    effect: true,
    doc: "",
};

fn fetch_request(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let url = want_string("fetch", args, 0)?;
    let response = ureq::get(url)
        .call()
        .map_err(|e| RuntimeError::runtime_error("fetch", e.to_string()))?;
    let body = response
        .into_string()
        .map_err(|e| RuntimeError::runtime_error("fetch", e.to_string()))?;
    Ok(Value::String(body))
}

fn builtin_fetch(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    want_string("fetch", args, 0)?;
    let promise = ev
        .scheduler
        .spawn(Value::Builtin(&FETCH_REQUEST), vec![args[0].clone()]);
    Ok(Value::Promise(promise))
}

inventory::submit! {
    BuiltinDef { name: "fetch", arity: Arity::Exact(1), func: builtin_fetch, effect: true, doc: "HTTP GET returning a promise of the body text." }
}
