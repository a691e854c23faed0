//! Numeric helpers beyond the arithmetic operators.

use crate::builtins::{Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::{compare_values, Value};
use std::cmp::Ordering;

fn number(function: &str, value: &Value) -> Result<f64, RuntimeError> {
    value
        .as_number()
        .ok_or_else(|| RuntimeError::runtime_error(function, format!("expected a number, got {}", value.type_name())))
}

fn builtin_abs(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(n.abs())),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => Err(RuntimeError::type_error("a number", other)),
    }
}

fn builtin_floor(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(n) => Ok(Value::Int(n.floor() as i64)),
        other => Err(RuntimeError::type_error("a number", other)),
    }
}

fn builtin_ceil(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(n) => Ok(Value::Int(n.ceil() as i64)),
        other => Err(RuntimeError::type_error("a number", other)),
    }
}

fn builtin_round(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(n) => Ok(Value::Int(n.round() as i64)),
        other => Err(RuntimeError::type_error("a number", other)),
    }
}

fn builtin_sqrt(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let n = number("sqrt", &args[0])?;
    if n < 0.0 {
        return Err(RuntimeError::runtime_error(
            "sqrt",
            "cannot take the square root of a negative number",
        ));
    }
    Ok(Value::Float(n.sqrt()))
}

fn builtin_pow(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    match (&args[0], &args[1]) {
        (Value::Int(base), Value::Int(exp)) if *exp >= 0 => {
            let exp = u32::try_from(*exp)
                .map_err(|_| RuntimeError::runtime_error("pow", "exponent too large"))?;
            base.checked_pow(exp)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::runtime_error("pow", "integer overflow"))
        }
        _ => {
            let base = number("pow", &args[0])?;
            let exp = number("pow", &args[1])?;
            Ok(Value::Float(base.powf(exp)))
        }
    }
}

/// min/max accept either a single list or the values themselves.
fn extremum(function: &str, args: &[Value], keep: Ordering) -> Result<Value, RuntimeError> {
    let items: Vec<Value> = match args {
        [Value::List(items)] => items.clone(),
        _ => args.to_vec(),
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| RuntimeError::runtime_error(function, "expected at least one value"))?;
    for candidate in iter {
        if compare_values(&candidate, &best)? == keep {
            best = candidate;
        }
    }
    Ok(best)
}

fn builtin_min(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    extremum("min", args, Ordering::Less)
}

fn builtin_max(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    extremum("max", args, Ordering::Greater)
}

inventory::submit! {
    BuiltinDef { name: "abs", arity: Arity::Exact(1), func: builtin_abs, effect: false, doc: "Absolute value." }
}
inventory::submit! {
    BuiltinDef { name: "floor", arity: Arity::Exact(1), func: builtin_floor, effect: false, doc: "Round down to an Int." }
}
inventory::submit! {
    BuiltinDef { name: "ceil", arity: Arity::Exact(1), func: builtin_ceil, effect: false, doc: "Round up to an Int." }
}
inventory::submit! {
    BuiltinDef { name: "round", arity: Arity::Exact(1), func: builtin_round, effect: false, doc: "Round to the nearest Int." }
}
inventory::submit! {
    BuiltinDef { name: "sqrt", arity: Arity::Exact(1), func: builtin_sqrt, effect: false, doc: "Square root as a Float." }
}
inventory::submit! {
    BuiltinDef { name: "pow", arity: Arity::Exact(2), func: builtin_pow, effect: false, doc: "base raised to exponent." }
}
inventory::submit! {
    BuiltinDef { name: "min", arity: Arity::AtLeast(1), func: builtin_min, effect: false, doc: "Smallest of the arguments or of a single list." }
}
inventory::submit! {
    BuiltinDef { name: "max", arity: Arity::AtLeast(1), func: builtin_max, effect: false, doc: "Largest of the arguments or of a single list." }
}
