//! Console output.
//!
//! `print` returns its first argument so it can sit in the middle of a
//! pipe chain: `value /> print /> continueChain`.

use crate::builtins::{Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::Value;

fn builtin_print(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let rendered: Vec<String> = args.iter().map(|v| v.display_raw()).collect();
    println!("{}", rendered.join(" "));
    Ok(args.first().cloned().unwrap_or(Value::Null))
}

inventory::submit! {
    BuiltinDef { name: "print", arity: Arity::AtLeast(0), func: builtin_print, effect: true, doc: "Print values; returns the first argument." }
}
