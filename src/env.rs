// ABOUTME: Lexical environments: nested frames of named bindings

use crate::error::RuntimeError;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

/// One lexical frame. Frames form a parent chain; closures keep the frame
/// they captured alive through shared ownership.
pub struct Environment {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    /// Creates a new root environment with no parent.
    pub fn new() -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    /// Creates a child frame for a function call, match arm, or block.
    pub fn with_parent(parent: Rc<Environment>) -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
        })
    }

    /// Introduce a binding in this frame. Rebinding a name already present
    /// in the same frame is an error regardless of mutability.
    pub fn define(
        &self,
        name: &str,
        value: Value,
        mutable: bool,
        line: usize,
        column: usize,
    ) -> Result<(), RuntimeError> {
        let mut bindings = self.bindings.borrow_mut();
        if bindings.contains_key(name) {
            return Err(RuntimeError::Rebind {
                name: name.to_string(),
                line,
                column,
            });
        }
        bindings.insert(name.to_string(), Binding { value, mutable });
        Ok(())
    }

    /// Parameter and pattern binding: overwrites silently within the frame.
    pub fn bind(&self, name: &str, value: Value) {
        self.bindings.borrow_mut().insert(
            name.to_string(),
            Binding {
                value,
                mutable: false,
            },
        );
    }

    /// Look a name up through the parent chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.bindings.borrow().get(name) {
            return Some(binding.value.clone());
        }
        match &self.parent {
            Some(parent) => parent.get(name),
            None => None,
        }
    }

    /// Reassign a `maybe` binding in the frame that owns it.
    pub fn assign(
        &self,
        name: &str,
        value: Value,
        line: usize,
        column: usize,
    ) -> Result<(), RuntimeError> {
        {
            let mut bindings = self.bindings.borrow_mut();
            if let Some(binding) = bindings.get_mut(name) {
                if !binding.mutable {
                    return Err(RuntimeError::AssignImmutable {
                        name: name.to_string(),
                        line,
                        column,
                    });
                }
                binding.value = value;
                return Ok(());
            }
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value, line, column),
            None => Err(RuntimeError::Undefined {
                name: name.to_string(),
                line,
                column,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let env = Environment::new();
        env.define("x", Value::Int(42), false, 1, 1).unwrap();
        assert!(matches!(env.get("x"), Some(Value::Int(42))));
        assert!(env.get("missing").is_none());
    }

    #[test]
    fn test_let_rejects_rebinding_in_same_frame() {
        let env = Environment::new();
        env.define("x", Value::Int(1), false, 1, 1).unwrap();
        let err = env.define("x", Value::Int(2), false, 2, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::Rebind { .. }));
    }

    #[test]
    fn test_shadowing_in_child_frame() {
        let parent = Environment::new();
        parent.define("x", Value::Int(1), false, 1, 1).unwrap();
        let child = Environment::with_parent(parent.clone());
        child.define("x", Value::Int(2), false, 2, 1).unwrap();
        assert!(matches!(child.get("x"), Some(Value::Int(2))));
        assert!(matches!(parent.get("x"), Some(Value::Int(1))));
    }

    #[test]
    fn test_assign_walks_to_owning_frame() {
        let parent = Environment::new();
        parent.define("count", Value::Int(0), true, 1, 1).unwrap();
        let child = Environment::with_parent(parent.clone());
        child.assign("count", Value::Int(5), 2, 1).unwrap();
        assert!(matches!(parent.get("count"), Some(Value::Int(5))));
    }

    #[test]
    fn test_assign_to_immutable_fails() {
        let env = Environment::new();
        env.define("x", Value::Int(1), false, 1, 1).unwrap();
        let err = env.assign("x", Value::Int(2), 2, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::AssignImmutable { .. }));
    }

    #[test]
    fn test_assign_to_missing_is_undefined() {
        let env = Environment::new();
        let err = env.assign("ghost", Value::Int(1), 1, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::Undefined { .. }));
    }
}
