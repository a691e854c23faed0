//! Async and channel built-ins on the cooperative scheduler.
//!
//! - **delay** - promise resolving after a timer
//! - **parallel** - apply a function across a list, promise of ordered results
//! - **race** - first settlement among promises or zero-arg functions
//! - **then** - continuation chained onto a promise
//! - **channel / send / receive / close / isChannel** - bounded FIFO plumbing
//!
//! Suspension never blocks the thread on another task's progress: waiting
//! is done by driving scheduler turns until the condition holds.

use crate::builtins::{want_callable, want_int, want_list, Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::scheduler::{Channel, Promise, TimerAction};
use crate::value::Value;

fn builtin_delay(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let ms = want_int("delay", args, 0)?;
    let promise = ev
        .scheduler
        .add_timer(ms, TimerAction::Resolve(Value::Null));
    Ok(Value::Promise(promise))
}

/// `parallel(list, fn, opts?)` schedules one task per item and resolves with
/// the ordered results. `opts.limit` bounds how many run per scheduling
/// round; order of results is unaffected.
fn builtin_parallel(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("parallel", args, 0)?.to_vec();
    let f = want_callable("parallel", args, 1)?;
    if let Some(Value::Record(opts)) = args.get(2) {
        if let Some(limit) = opts.get("limit") {
            match limit {
                Value::Int(n) if *n >= 1 => {}
                other => {
                    return Err(RuntimeError::runtime_error(
                        "parallel",
                        format!("limit must be a positive Int, got {}", other.type_name()),
                    ))
                }
            }
        }
    }
    let promises: Vec<Promise> = items
        .into_iter()
        .map(|item| ev.scheduler.spawn(f.clone(), vec![item]))
        .collect();
    Ok(Value::Promise(ev.scheduler.gather(promises)))
}

/// `race(list)`: the list holds promises or zero-arg functions; the first
/// one to settle decides the outcome. Losers keep running but are ignored.
fn builtin_race(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("race", args, 0)?.to_vec();
    if items.is_empty() {
        return Err(RuntimeError::runtime_error(
            "race",
            "expected a non-empty list",
        ));
    }
    let mut sources = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Promise(p) => sources.push(p),
            f if f.is_callable() => sources.push(ev.scheduler.spawn(f, Vec::new())),
            other => {
                return Err(RuntimeError::runtime_error(
                    "race",
                    format!(
                        "expected promises or zero-argument functions, got {}",
                        other.type_name()
                    ),
                ))
            }
        }
    }
    Ok(Value::Promise(ev.scheduler.race(sources)))
}

fn builtin_then(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let source = match &args[0] {
        Value::Promise(p) => p.clone(),
        ready => Promise::resolved(ready.clone()),
    };
    let f = want_callable("then", args, 1)?;
    Ok(Value::Promise(ev.scheduler.chain(source, Some(f))))
}

fn builtin_channel(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let capacity = match args.first() {
        None => None,
        Some(value) => {
            let n = want_int("channel", args, 0)?;
            if n < 1 {
                return Err(RuntimeError::runtime_error(
                    "channel",
                    format!("capacity must be positive, got {}", value.display_raw()),
                ));
            }
            Some(n as usize)
        }
    };
    Ok(Value::Channel(Channel::new(capacity)))
}

fn want_channel(function: &str, args: &[Value], i: usize) -> Result<Channel, RuntimeError> {
    match &args[i] {
        Value::Channel(ch) => Ok(ch.clone()),
        other => Err(RuntimeError::runtime_error(
            function,
            format!("expected Channel, got {}", other.type_name()),
        )),
    }
}

/// Suspends (drives the scheduler) while the channel is full.
fn builtin_send(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let ch = want_channel("send", args, 0)?;
    let value = args[1].clone();
    loop {
        if ch.try_send(value.clone())? {
            return Ok(value);
        }
        if !ev.run_turn() {
            return Err(RuntimeError::Deadlock);
        }
    }
}

/// Suspends while the channel is empty; a drained closed channel yields null.
fn builtin_receive(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let ch = want_channel("receive", args, 0)?;
    loop {
        if let Some(value) = ch.try_recv() {
            return Ok(value);
        }
        if ch.is_closed() {
            return Ok(Value::Null);
        }
        if !ev.run_turn() {
            return Err(RuntimeError::Deadlock);
        }
    }
}

fn builtin_close(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    want_channel("close", args, 0)?.close();
    Ok(Value::Null)
}

fn builtin_is_channel(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::Channel(_))))
}

inventory::submit! {
    BuiltinDef { name: "delay", arity: Arity::Exact(1), func: builtin_delay, effect: false, doc: "Promise that resolves after the given milliseconds." }
}
inventory::submit! {
    BuiltinDef { name: "parallel", arity: Arity::Range(2, 3), func: builtin_parallel, effect: false, doc: "Apply a function across a list concurrently; resolves in input order." }
}
inventory::submit! {
    BuiltinDef { name: "race", arity: Arity::Exact(1), func: builtin_race, effect: false, doc: "First of several promises or thunks to settle." }
}
inventory::submit! {
    BuiltinDef { name: "then", arity: Arity::Exact(2), func: builtin_then, effect: false, doc: "Chain a function onto a promise's resolution." }
}
inventory::submit! {
    BuiltinDef { name: "channel", arity: Arity::Range(0, 1), func: builtin_channel, effect: false, doc: "New channel, optionally bounded." }
}
inventory::submit! {
    BuiltinDef { name: "send", arity: Arity::Exact(2), func: builtin_send, effect: true, doc: "Send into a channel; suspends while full." }
}
inventory::submit! {
    BuiltinDef { name: "receive", arity: Arity::Exact(1), func: builtin_receive, effect: true, doc: "Receive from a channel; suspends while empty." }
}
inventory::submit! {
    BuiltinDef { name: "close", arity: Arity::Exact(1), func: builtin_close, effect: true, doc: "Close a channel; existing values still drain." }
}
inventory::submit! {
    BuiltinDef { name: "isChannel", arity: Arity::Exact(1), func: builtin_is_channel, effect: false, doc: "Whether a value is a channel." }
}
