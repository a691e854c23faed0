//! JSON encoding and decoding.
//!
//! Type mapping:
//! - Record <-> JSON object (insertion order preserved)
//! - List <-> JSON array
//! - Int / Float <-> JSON number
//! - String <-> JSON string
//! - Bool <-> JSON boolean
//! - Null <-> JSON null
//!
//! Functions, promises, and channels do not serialize.

use crate::builtins::{want_string, Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::Value;
use indexmap::IndexMap;

pub fn value_to_json(value: &Value) -> Result<serde_json::Value, RuntimeError> {
    match value {
        Value::Int(n) => Ok(serde_json::Value::Number((*n).into())),
        Value::Float(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                RuntimeError::runtime_error("toJson", format!("cannot represent {} in JSON", n))
            }),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Null => Ok(serde_json::Value::Null),
        Value::List(items) => {
            let converted: Result<Vec<_>, _> = items.iter().map(value_to_json).collect();
            Ok(serde_json::Value::Array(converted?))
        }
        Value::Record(entries) => {
            let mut object = serde_json::Map::new();
            for (key, value) in entries {
                object.insert(key.clone(), value_to_json(value)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        other => Err(RuntimeError::runtime_error(
            "toJson",
            format!("cannot convert {} to JSON", other.type_name()),
        )),
    }
}

pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(object) => {
            let mut record = IndexMap::with_capacity(object.len());
            for (key, value) in object {
                record.insert(key.clone(), json_to_value(value));
            }
            Value::Record(record)
        }
    }
}

/// Stable serialization of an argument list, used as the `#memo` cache key.
/// Values without a JSON form key on their type and display instead.
pub fn canonical_key(args: &[Value]) -> String {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        match value_to_json(arg) {
            Ok(json) => parts.push(json.to_string()),
            Err(_) => parts.push(format!("<{}:{}>", arg.type_name(), arg)),
        }
    }
    parts.join(",")
}

fn builtin_to_json(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let json = value_to_json(&args[0])?;
    serde_json::to_string(&json)
        .map(Value::String)
        .map_err(|e| RuntimeError::runtime_error("toJson", e.to_string()))
}

fn builtin_parse_json(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = want_string("parseJson", args, 0)?;
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| RuntimeError::runtime_error("parseJson", e.to_string()))?;
    Ok(json_to_value(&json))
}

inventory::submit! {
    BuiltinDef {
        name: "toJson",
        arity: Arity::Exact(1),
        func: builtin_to_json,
        effect: false,
        doc: "Encode a value as a JSON string.",
    }
}

inventory::submit! {
    BuiltinDef {
        name: "parseJson",
        arity: Arity::Exact(1),
        func: builtin_parse_json,
        effect: false,
        doc: "Parse a JSON string into a value.",
    }
}
