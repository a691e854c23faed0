// ABOUTME: Built-in decorators applied to function definitions

use crate::ast::Pos;
use crate::builtins::json::canonical_key;
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::scheduler::{Promise, TimerAction};
use crate::value::{Closure, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

/// Decorator state lives inside the wrapper, so cross-call state like the
/// memo cache or retry bound is per-decorated-function.
pub enum DecoratorKind {
    Log,
    Time,
    Trace,
    Pure,
    Async,
    Spawn,
    Validate,
    Memo(RefCell<HashMap<String, Value>>),
    Retry(i64),
    Timeout(i64),
    Parallel(Option<usize>),
}

/// A function wrapped by one decorator. Chains nest: the first declared
/// decorator is the innermost wrapper.
pub struct Decorated {
    pub kind: DecoratorKind,
    pub inner: Value,
}

/// Build the wrapper for `#name(args)`. Decorator arguments were evaluated
/// in the definition environment.
pub fn make(
    name: &str,
    args: Vec<Value>,
    inner: Value,
    pos: Pos,
) -> Result<Value, RuntimeError> {
    let kind = match name {
        "log" => DecoratorKind::Log,
        "time" => DecoratorKind::Time,
        "trace" => DecoratorKind::Trace,
        "pure" => DecoratorKind::Pure,
        "async" => DecoratorKind::Async,
        "spawn" => DecoratorKind::Spawn,
        "validate" => DecoratorKind::Validate,
        "memo" => DecoratorKind::Memo(RefCell::new(HashMap::new())),
        "retry" => DecoratorKind::Retry(int_arg(name, &args, pos)?),
        "timeout" => DecoratorKind::Timeout(int_arg(name, &args, pos)?),
        "parallel" => {
            let limit = match args.first() {
                None => None,
                Some(Value::Int(n)) if *n > 0 => Some(*n as usize),
                Some(other) => {
                    return Err(RuntimeError::message(
                        format!(
                            "#parallel expects a positive Int limit, got {}",
                            other.type_name()
                        ),
                        pos.line,
                        pos.column,
                    ))
                }
            };
            DecoratorKind::Parallel(limit)
        }
        _ => {
            return Err(RuntimeError::UnknownDecorator {
                name: name.to_string(),
                line: pos.line,
                column: pos.column,
            })
        }
    };
    Ok(Value::Decorated(Rc::new(Decorated { kind, inner })))
}

fn int_arg(name: &str, args: &[Value], pos: Pos) -> Result<i64, RuntimeError> {
    match args.first() {
        Some(Value::Int(n)) => Ok(*n),
        _ => Err(RuntimeError::message(
            format!("#{} expects an Int argument", name),
            pos.line,
            pos.column,
        )),
    }
}

/// Invoke a decorated function: kind-specific behavior around the inner
/// call. Errors unwind inner-first so `#retry` can consume failures raised
/// by decorators declared before it.
pub fn call(
    ev: &mut Evaluator,
    dec: &Decorated,
    args: Vec<Value>,
    pos: Pos,
) -> Result<Value, RuntimeError> {
    match &dec.kind {
        DecoratorKind::Log => {
            let name = dec.inner.callable_name();
            log::info!("{}({}) called", name, render_args(&args));
            match ev.call_value(dec.inner.clone(), args, pos) {
                Ok(value) => {
                    log::info!("{} returned {}", name, value);
                    Ok(value)
                }
                Err(error) => {
                    log::info!("{} raised: {}", name, error);
                    Err(error)
                }
            }
        }
        DecoratorKind::Time => {
            let name = dec.inner.callable_name();
            let start = Instant::now();
            let result = ev.call_value(dec.inner.clone(), args, pos);
            log::info!(
                "{} took {:.3} ms",
                name,
                start.elapsed().as_secs_f64() * 1000.0
            );
            result
        }
        DecoratorKind::Trace => {
            let name = dec.inner.callable_name();
            let indent = "  ".repeat(ev.trace_depth);
            log::debug!("{}-> {}({})", indent, name, render_args(&args));
            ev.trace_depth += 1;
            let result = ev.call_value(dec.inner.clone(), args, pos);
            ev.trace_depth -= 1;
            match &result {
                Ok(value) => log::debug!("{}<- {} = {}", indent, name, value),
                Err(error) => log::debug!("{}<- {} raised: {}", indent, name, error),
            }
            result
        }
        DecoratorKind::Memo(cache) => {
            let key = canonical_key(&args);
            if let Some(cached) = cache.borrow().get(&key) {
                return Ok(cached.clone());
            }
            let value = ev.call_value(dec.inner.clone(), args, pos)?;
            cache.borrow_mut().insert(key, value.clone());
            Ok(value)
        }
        DecoratorKind::Retry(bound) => {
            let attempts = (*bound).max(0) as usize + 1;
            let mut last = None;
            for _ in 0..attempts {
                match ev.call_value(dec.inner.clone(), args.clone(), pos) {
                    Ok(value) => return Ok(value),
                    Err(error) => last = Some(error),
                }
            }
            Err(last.expect("at least one attempt"))
        }
        DecoratorKind::Timeout(ms) => {
            let result = ev.call_value(dec.inner.clone(), args, pos)?;
            match result {
                // Race the promise against a rejection timer; first
                // settlement wins because promises are single-assignment.
                Value::Promise(inner) => {
                    let target = ev.scheduler.chain(inner, None);
                    ev.scheduler.add_timer_for(
                        target.clone(),
                        *ms,
                        TimerAction::Reject(RuntimeError::Timeout { ms: *ms }),
                    );
                    Ok(Value::Promise(target))
                }
                ready => Ok(ready),
            }
        }
        DecoratorKind::Validate => {
            if let Some(closure) = find_closure(&dec.inner) {
                for (param, arg) in closure.def.params.iter().zip(&args) {
                    let Some(ann) = &param.type_ann else { continue };
                    if matches!(arg, Value::Null) {
                        return Err(RuntimeError::Validation {
                            message: format!(
                                "parameter `{}` is declared {} and rejects null",
                                param.name, ann
                            ),
                            line: pos.line,
                            column: pos.column,
                        });
                    }
                    if !type_matches(ann, arg) {
                        return Err(RuntimeError::Validation {
                            message: format!(
                                "parameter `{}` expects {}, got {}",
                                param.name,
                                ann,
                                arg.type_name()
                            ),
                            line: pos.line,
                            column: pos.column,
                        });
                    }
                }
                let return_ann = closure.def.return_ann.clone();
                let value = ev.call_value(dec.inner.clone(), args, pos)?;
                if let Some(ann) = return_ann {
                    if !type_matches(&ann, &value) {
                        return Err(RuntimeError::Validation {
                            message: format!(
                                "return value expects {}, got {}",
                                ann,
                                value.type_name()
                            ),
                            line: pos.line,
                            column: pos.column,
                        });
                    }
                }
                Ok(value)
            } else {
                ev.call_value(dec.inner.clone(), args, pos)
            }
        }
        DecoratorKind::Pure => {
            ev.pure_depth += 1;
            let result = ev.call_value(dec.inner.clone(), args, pos);
            ev.pure_depth -= 1;
            result
        }
        DecoratorKind::Async => match ev.call_value(dec.inner.clone(), args, pos) {
            // A promise-returning body keeps its promise; anything else is
            // wrapped in an already-settled one.
            Ok(Value::Promise(p)) => Ok(Value::Promise(p)),
            Ok(value) => Ok(Value::Promise(Promise::resolved(value))),
            Err(RuntimeError::EarlyReturn(value)) => {
                Err(RuntimeError::EarlyReturn(value))
            }
            Err(error) => Ok(Value::Promise(Promise::rejected(error))),
        },
        DecoratorKind::Spawn => {
            ev.scheduler.spawn(dec.inner.clone(), args);
            Ok(Value::Null)
        }
        DecoratorKind::Parallel(limit) => {
            let saved = ev.parallel_limit;
            ev.parallel_limit = Some(limit.unwrap_or(usize::MAX));
            let result = ev.call_value(dec.inner.clone(), args, pos);
            ev.parallel_limit = saved;
            result
        }
    }
}

/// Walk a decorator chain down to the closure, if there is one.
fn find_closure(value: &Value) -> Option<Rc<Closure>> {
    match value {
        Value::Function(closure) => Some(closure.clone()),
        Value::Decorated(dec) => find_closure(&dec.inner),
        _ => None,
    }
}

/// Annotation matching for `#validate`. Ints satisfy a Float annotation.
fn type_matches(ann: &str, value: &Value) -> bool {
    value.type_name() == ann || (ann == "Float" && matches!(value, Value::Int(_)))
}

fn render_args(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&arg.to_string());
    }
    out
}
