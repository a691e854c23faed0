// ABOUTME: Dynamically-scoped context registry backing `context`/`provide`

use crate::error::RuntimeError;
use crate::value::Value;
use std::collections::HashMap;

struct ContextEntry {
    default: Value,
    stack: Vec<Value>,
}

/// Process-scoped mapping from context name to a stack of provided values
/// plus the declared default. All access happens on the single evaluator
/// task, so no locking is involved.
#[derive(Default)]
pub struct ContextRegistry {
    entries: HashMap<String, ContextEntry>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        ContextRegistry::default()
    }

    /// `context NAME = default`. Redeclaring replaces the default but keeps
    /// any currently provided values.
    pub fn define(&mut self, name: &str, default: Value) {
        match self.entries.get_mut(name) {
            Some(entry) => entry.default = default,
            None => {
                self.entries.insert(
                    name.to_string(),
                    ContextEntry {
                        default,
                        stack: Vec::new(),
                    },
                );
            }
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Push a provided value. Fails for names never declared with `context`.
    pub fn push(
        &mut self,
        name: &str,
        value: Value,
        line: usize,
        column: usize,
    ) -> Result<(), RuntimeError> {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.stack.push(value);
                Ok(())
            }
            None => Err(RuntimeError::UnknownContext {
                name: name.to_string(),
                line,
                column,
            }),
        }
    }

    /// Pop the top provided value. Every push is paired with exactly one pop
    /// by the evaluator's scope handling, including on error paths.
    pub fn pop(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.stack.pop();
        }
    }

    /// Current value: top of the provided stack, else the declared default.
    pub fn current(&self, name: &str) -> Option<Value> {
        self.entries
            .get(name)
            .map(|entry| entry.stack.last().unwrap_or(&entry.default).clone())
    }

    /// Depth of the provided stack, used by tests to check balance.
    pub fn depth(&self, name: &str) -> usize {
        self.entries.get(name).map_or(0, |entry| entry.stack.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_applies_when_stack_empty() {
        let mut reg = ContextRegistry::new();
        reg.define("Limit", Value::Int(10));
        assert!(matches!(reg.current("Limit"), Some(Value::Int(10))));
    }

    #[test]
    fn test_push_and_pop_shadow_default() {
        let mut reg = ContextRegistry::new();
        reg.define("Limit", Value::Int(10));
        reg.push("Limit", Value::Int(3), 1, 1).unwrap();
        assert!(matches!(reg.current("Limit"), Some(Value::Int(3))));
        reg.pop("Limit");
        assert!(matches!(reg.current("Limit"), Some(Value::Int(10))));
    }

    #[test]
    fn test_provide_without_context_fails() {
        let mut reg = ContextRegistry::new();
        let err = reg.push("Ghost", Value::Null, 2, 5).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownContext { .. }));
    }

    #[test]
    fn test_unknown_context_reads_as_none() {
        let reg = ContextRegistry::new();
        assert!(reg.current("Nope").is_none());
    }
}
