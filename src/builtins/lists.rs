//! List operations: map, filter, reduce, range, and friends.
//!
//! Higher-order functions call back into the evaluator, so a piped chain
//! like `nums /> filter((x) -> x > 2) /> map((x) -> x * x)` runs user code
//! per element. `map` consults the `#parallel` worker bound when one is
//! installed.

use crate::ast::Pos;
use crate::builtins::{want_callable, want_int, want_list, Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::{compare_values, values_equal, Value};
use indexmap::IndexMap;
use std::cmp::Ordering;

fn call(ev: &mut Evaluator, f: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
    ev.call_value(f.clone(), args, Pos::default())
}

fn builtin_map(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("map", args, 0)?.to_vec();
    let f = want_callable("map", args, 1)?;

    // Under #parallel, elements run as scheduled tasks with at most `limit`
    // in flight; results keep input order either way.
    if let Some(limit) = ev.parallel_limit {
        let limit = limit.max(1).min(items.len().max(1));
        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(limit) {
            let promises: Vec<_> = chunk
                .iter()
                .map(|item| ev.scheduler.spawn(f.clone(), vec![item.clone()]))
                .collect();
            let group = ev.scheduler.gather(promises);
            match ev.drive(&group)? {
                Value::List(values) => results.extend(values),
                other => results.push(other),
            }
        }
        return Ok(Value::List(results));
    }

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(call(ev, &f, vec![item])?);
    }
    Ok(Value::List(out))
}

fn builtin_filter(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("filter", args, 0)?.to_vec();
    let pred = want_callable("filter", args, 1)?;
    let mut out = Vec::new();
    for item in items {
        if call(ev, &pred, vec![item.clone()])?.truthy() {
            out.push(item);
        }
    }
    Ok(Value::List(out))
}

fn builtin_reduce(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("reduce", args, 0)?.to_vec();
    let mut acc = args[1].clone();
    let f = want_callable("reduce", args, 2)?;
    for item in items {
        acc = call(ev, &f, vec![acc, item])?;
    }
    Ok(acc)
}

fn builtin_range(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let (start, end) = if args.len() == 1 {
        (0, want_int("range", args, 0)?)
    } else {
        (want_int("range", args, 0)?, want_int("range", args, 1)?)
    };
    Ok(Value::List((start..end).map(Value::Int).collect()))
}

fn builtin_head(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("head", args, 0)?;
    Ok(items.first().cloned().unwrap_or(Value::Null))
}

fn builtin_tail(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("tail", args, 0)?;
    if items.is_empty() {
        Ok(Value::List(Vec::new()))
    } else {
        Ok(Value::List(items[1..].to_vec()))
    }
}

fn builtin_length(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Record(entries) => Ok(Value::Int(entries.len() as i64)),
        other => Err(RuntimeError::type_error("a List, String, or Record", other)),
    }
}

fn builtin_concat(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = want_list("concat", args, 0)?.to_vec();
    out.extend(want_list("concat", args, 1)?.iter().cloned());
    Ok(Value::List(out))
}

fn builtin_push(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = want_list("push", args, 0)?.to_vec();
    out.push(args[1].clone());
    Ok(Value::List(out))
}

fn builtin_take(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("take", args, 0)?;
    let n = want_int("take", args, 1)?.max(0) as usize;
    Ok(Value::List(items.iter().take(n).cloned().collect()))
}

fn builtin_drop(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("drop", args, 0)?;
    let n = want_int("drop", args, 1)?.max(0) as usize;
    Ok(Value::List(items.iter().skip(n).cloned().collect()))
}

fn builtin_slice(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("slice", args, 0)?;
    let start = want_int("slice", args, 1)?.max(0) as usize;
    let end = (want_int("slice", args, 2)?.max(0) as usize).min(items.len());
    if start >= end {
        return Ok(Value::List(Vec::new()));
    }
    Ok(Value::List(items[start..end].to_vec()))
}

fn builtin_zip(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let left = want_list("zip", args, 0)?;
    let right = want_list("zip", args, 1)?;
    Ok(Value::List(
        left.iter()
            .zip(right)
            .map(|(a, b)| Value::List(vec![a.clone(), b.clone()]))
            .collect(),
    ))
}

fn builtin_partition(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("partition", args, 0)?.to_vec();
    let pred = want_callable("partition", args, 1)?;
    let mut matching = Vec::new();
    let mut rest = Vec::new();
    for item in items {
        if call(ev, &pred, vec![item.clone()])?.truthy() {
            matching.push(item);
        } else {
            rest.push(item);
        }
    }
    Ok(Value::List(vec![Value::List(matching), Value::List(rest)]))
}

fn sort_with<F>(items: &mut [(Value, Value)], mut key_cmp: F) -> Result<(), RuntimeError>
where
    F: FnMut(&Value, &Value) -> Result<Ordering, RuntimeError>,
{
    let mut failure = None;
    items.sort_by(|a, b| match key_cmp(&a.0, &b.0) {
        Ok(ordering) => ordering,
        Err(error) => {
            failure.get_or_insert(error);
            Ordering::Equal
        }
    });
    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn builtin_sort(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut pairs: Vec<(Value, Value)> = want_list("sort", args, 0)?
        .iter()
        .map(|v| (v.clone(), v.clone()))
        .collect();
    sort_with(&mut pairs, compare_values)?;
    Ok(Value::List(pairs.into_iter().map(|(_, v)| v).collect()))
}

fn builtin_sort_by(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("sortBy", args, 0)?.to_vec();
    let key_fn = want_callable("sortBy", args, 1)?;
    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        let key = call(ev, &key_fn, vec![item.clone()])?;
        pairs.push((key, item));
    }
    sort_with(&mut pairs, compare_values)?;
    Ok(Value::List(pairs.into_iter().map(|(_, v)| v).collect()))
}

fn builtin_unique(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("unique", args, 0)?;
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.iter().any(|seen| values_equal(seen, item)) {
            out.push(item.clone());
        }
    }
    Ok(Value::List(out))
}

fn builtin_group_by(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("groupBy", args, 0)?.to_vec();
    let key_fn = want_callable("groupBy", args, 1)?;
    let mut groups: IndexMap<String, Value> = IndexMap::new();
    for item in items {
        let key = call(ev, &key_fn, vec![item.clone()])?.display_raw();
        match groups.entry(key).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(bucket) => bucket.push(item),
            _ => unreachable!("groupBy buckets are lists"),
        }
    }
    Ok(Value::Record(groups))
}

fn builtin_flatten(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("flatten", args, 0)?;
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::List(inner) => out.extend(inner.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    Ok(Value::List(out))
}

fn builtin_flat_map(ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("flatMap", args, 0)?.to_vec();
    let f = want_callable("flatMap", args, 1)?;
    let mut out = Vec::new();
    for item in items {
        match call(ev, &f, vec![item])? {
            Value::List(inner) => out.extend(inner),
            other => out.push(other),
        }
    }
    Ok(Value::List(out))
}

inventory::submit! {
    BuiltinDef { name: "map", arity: Arity::Exact(2), func: builtin_map, effect: false, doc: "Apply a function to each element of a list." }
}
inventory::submit! {
    BuiltinDef { name: "filter", arity: Arity::Exact(2), func: builtin_filter, effect: false, doc: "Keep the elements satisfying a predicate." }
}
inventory::submit! {
    BuiltinDef { name: "reduce", arity: Arity::Exact(3), func: builtin_reduce, effect: false, doc: "Fold a list into one value: reduce(list, init, f)." }
}
inventory::submit! {
    BuiltinDef { name: "range", arity: Arity::Range(1, 2), func: builtin_range, effect: false, doc: "Integers in [start, end): range(end) or range(start, end)." }
}
inventory::submit! {
    BuiltinDef { name: "head", arity: Arity::Exact(1), func: builtin_head, effect: false, doc: "First element of a list, or null." }
}
inventory::submit! {
    BuiltinDef { name: "tail", arity: Arity::Exact(1), func: builtin_tail, effect: false, doc: "Everything after the first element." }
}
inventory::submit! {
    BuiltinDef { name: "length", arity: Arity::Exact(1), func: builtin_length, effect: false, doc: "Number of elements, characters, or fields." }
}
inventory::submit! {
    BuiltinDef { name: "concat", arity: Arity::Exact(2), func: builtin_concat, effect: false, doc: "Concatenate two lists." }
}
inventory::submit! {
    BuiltinDef { name: "push", arity: Arity::Exact(2), func: builtin_push, effect: false, doc: "New list with a value appended." }
}
inventory::submit! {
    BuiltinDef { name: "take", arity: Arity::Exact(2), func: builtin_take, effect: false, doc: "First n elements." }
}
inventory::submit! {
    BuiltinDef { name: "drop", arity: Arity::Exact(2), func: builtin_drop, effect: false, doc: "All but the first n elements." }
}
inventory::submit! {
    BuiltinDef { name: "slice", arity: Arity::Exact(3), func: builtin_slice, effect: false, doc: "Elements in [start, end)." }
}
inventory::submit! {
    BuiltinDef { name: "zip", arity: Arity::Exact(2), func: builtin_zip, effect: false, doc: "Pair up two lists, shortest wins." }
}
inventory::submit! {
    BuiltinDef { name: "partition", arity: Arity::Exact(2), func: builtin_partition, effect: false, doc: "Split into [matching, rest] by a predicate." }
}
inventory::submit! {
    BuiltinDef { name: "sort", arity: Arity::Exact(1), func: builtin_sort, effect: false, doc: "Sort numbers or strings ascending." }
}
inventory::submit! {
    BuiltinDef { name: "sortBy", arity: Arity::Exact(2), func: builtin_sort_by, effect: false, doc: "Sort by a key function." }
}
inventory::submit! {
    BuiltinDef { name: "unique", arity: Arity::Exact(1), func: builtin_unique, effect: false, doc: "Remove duplicates, keeping first occurrences." }
}
inventory::submit! {
    BuiltinDef { name: "groupBy", arity: Arity::Exact(2), func: builtin_group_by, effect: false, doc: "Group elements into a record keyed by a function." }
}
inventory::submit! {
    BuiltinDef { name: "flatten", arity: Arity::Exact(1), func: builtin_flatten, effect: false, doc: "Flatten one level of nested lists." }
}
inventory::submit! {
    BuiltinDef { name: "flatMap", arity: Arity::Exact(2), func: builtin_flat_map, effect: false, doc: "Map then flatten one level." }
}
