//! Record operations: keys, values, entries, merge.

use crate::builtins::{Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::Value;
use indexmap::IndexMap;

fn want_record<'a>(
    function: &str,
    args: &'a [Value],
    i: usize,
) -> Result<&'a IndexMap<String, Value>, RuntimeError> {
    match &args[i] {
        Value::Record(entries) => Ok(entries),
        other => Err(RuntimeError::runtime_error(
            function,
            format!("expected Record, got {} at argument {}", other.type_name(), i + 1),
        )),
    }
}

fn builtin_keys(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let record = want_record("keys", args, 0)?;
    Ok(Value::List(
        record.keys().map(|k| Value::String(k.clone())).collect(),
    ))
}

fn builtin_values(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let record = want_record("values", args, 0)?;
    Ok(Value::List(record.values().cloned().collect()))
}

fn builtin_entries(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let record = want_record("entries", args, 0)?;
    Ok(Value::List(
        record
            .iter()
            .map(|(k, v)| Value::List(vec![Value::String(k.clone()), v.clone()]))
            .collect(),
    ))
}

/// Later fields win; field order is the first record's order followed by
/// keys only the second record has.
fn builtin_merge(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let left = want_record("merge", args, 0)?;
    let right = want_record("merge", args, 1)?;
    let mut merged = left.clone();
    for (key, value) in right {
        merged.insert(key.clone(), value.clone());
    }
    Ok(Value::Record(merged))
}

inventory::submit! {
    BuiltinDef { name: "keys", arity: Arity::Exact(1), func: builtin_keys, effect: false, doc: "Field names of a record, in insertion order." }
}
inventory::submit! {
    BuiltinDef { name: "values", arity: Arity::Exact(1), func: builtin_values, effect: false, doc: "Field values of a record, in insertion order." }
}
inventory::submit! {
    BuiltinDef { name: "entries", arity: Arity::Exact(1), func: builtin_entries, effect: false, doc: "[key, value] pairs of a record." }
}
inventory::submit! {
    BuiltinDef { name: "merge", arity: Arity::Exact(2), func: builtin_merge, effect: false, doc: "Merge two records; the second wins on conflicts." }
}
