// ABOUTME: Runtime value types for the Lea interpreter

use crate::ast::FunctionLit;
use crate::builtins::BuiltinDef;
use crate::decorators::Decorated;
use crate::env::Environment;
use crate::error::RuntimeError;
use crate::scheduler::{Channel, Promise};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// A user function closed over its defining environment.
pub struct Closure {
    pub def: Rc<FunctionLit>,
    pub env: Rc<Environment>,
    /// Filled in when the function is bound with `let f = ...`, purely for
    /// readable logs and error messages.
    pub name: RefCell<Option<String>>,
}

impl Closure {
    pub fn display_name(&self) -> String {
        self.name
            .borrow()
            .clone()
            .unwrap_or_else(|| "<anonymous>".to_string())
    }
}

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
    Function(Rc<Closure>),
    Builtin(&'static BuiltinDef),
    Decorated(Rc<Decorated>),
    /// Opaque composition built by `</>`; stages apply left to right.
    Pipeline(Rc<Vec<Value>>),
    Promise(Promise),
    Channel(Channel),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bool(_) => "Bool",
            Value::Null => "Null",
            Value::List(_) => "List",
            Value::Record(_) => "Record",
            Value::Function(_)
            | Value::Builtin(_)
            | Value::Decorated(_)
            | Value::Pipeline(_) => "Function",
            Value::Promise(_) => "Promise",
            Value::Channel(_) => "Channel",
        }
    }

    /// Everything is truthy except `false` and `null`.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Decorated(_) | Value::Pipeline(_)
        )
    }

    /// Name used by `#log`/`#trace` and arity errors.
    pub fn callable_name(&self) -> String {
        match self {
            Value::Function(closure) => closure.display_name(),
            Value::Builtin(def) => def.name.to_string(),
            Value::Decorated(dec) => dec.inner.callable_name(),
            Value::Pipeline(_) => "<pipeline>".to_string(),
            other => other.type_name().to_string(),
        }
    }

    /// Numeric view used by arithmetic promotion.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Display form without quotes around strings, used by `print`, template
    /// interpolation, and string built-ins.
    pub fn display_raw(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => format!("{}", other),
        }
    }
}

/// Structural equality with numeric promotion; callables compare by identity.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            a.as_number() == b.as_number()
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Record(xs), Value::Record(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => std::ptr::eq(*x, *y),
        (Value::Decorated(x), Value::Decorated(y)) => Rc::ptr_eq(x, y),
        (Value::Pipeline(x), Value::Pipeline(y)) => Rc::ptr_eq(x, y),
        (Value::Promise(x), Value::Promise(y)) => x.ptr_eq(y),
        (Value::Channel(x), Value::Channel(y)) => x.ptr_eq(y),
        _ => false,
    }
}

/// Ordering for comparison operators and `sort`. Numbers compare with
/// promotion, strings lexicographically; anything else is a type error.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| RuntimeError::type_error("a comparable number", a)),
            _ => Err(RuntimeError::type_error("two comparable values", b)),
        },
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Record(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", key, value)?;
                }
                if entries.is_empty() {
                    write!(f, "}}")
                } else {
                    write!(f, " }}")
                }
            }
            Value::Function(closure) => match closure.name.borrow().as_deref() {
                Some(name) => write!(f, "<fn {}>", name),
                None => write!(f, "<fn>"),
            },
            Value::Builtin(def) => write!(f, "<builtin {}>", def.name),
            Value::Decorated(dec) => write!(f, "{}", dec.inner),
            Value::Pipeline(stages) => write!(f, "<pipeline of {}>", stages.len()),
            Value::Promise(p) => write!(f, "<promise {}>", p.state_name()),
            Value::Channel(_) => write!(f, "<channel>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_scalars() {
        assert_eq!(format!("{}", Value::Int(42)), "42");
        assert_eq!(format!("{}", Value::Float(2.5)), "2.5");
        assert_eq!(format!("{}", Value::Float(3.0)), "3.0");
        assert_eq!(format!("{}", Value::String("hi".into())), "\"hi\"");
        assert_eq!(format!("{}", Value::Null), "null");
    }

    #[test]
    fn test_display_collections() {
        let list = Value::List(vec![Value::Int(1), Value::String("a".into())]);
        assert_eq!(format!("{}", list), "[1, \"a\"]");

        let mut entries = IndexMap::new();
        entries.insert("b".to_string(), Value::Int(2));
        entries.insert("a".to_string(), Value::Int(1));
        // Insertion order is preserved.
        assert_eq!(format!("{}", Value::Record(entries)), "{ b: 2, a: 1 }");
    }

    #[test]
    fn test_numeric_equality_promotes() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::Int(1), &Value::Float(1.5)));
        assert!(!values_equal(&Value::Int(1), &Value::String("1".into())));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Int(0).truthy());
        assert!(Value::String(String::new()).truthy());
    }

    #[test]
    fn test_compare_strings_and_numbers() {
        assert_eq!(
            compare_values(&Value::Int(1), &Value::Float(1.5)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::String("a".into()), &Value::String("b".into())).unwrap(),
            Ordering::Less
        );
        assert!(compare_values(&Value::Int(1), &Value::Null).is_err());
    }
}
