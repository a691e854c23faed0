//! Time and date helpers.

use crate::builtins::{want_int, want_string, Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::Value;
use chrono::{Days, NaiveDate, Utc};

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(function: &str, s: &str) -> Result<NaiveDate, RuntimeError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| {
        RuntimeError::runtime_error(function, format!("`{}` is not a YYYY-MM-DD date", s))
    })
}

/// Milliseconds since the Unix epoch.
fn builtin_now(_ev: &mut Evaluator, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Int(Utc::now().timestamp_millis()))
}

fn builtin_today(_ev: &mut Evaluator, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::String(
        Utc::now().date_naive().format(DATE_FORMAT).to_string(),
    ))
}

fn builtin_add_days(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let date = parse_date("addDays", want_string("addDays", args, 0)?)?;
    let days = want_int("addDays", args, 1)?;
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted
        .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
        .ok_or_else(|| RuntimeError::runtime_error("addDays", "date out of range"))
}

fn builtin_diff_days(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = parse_date("diffDays", want_string("diffDays", args, 0)?)?;
    let b = parse_date("diffDays", want_string("diffDays", args, 1)?)?;
    Ok(Value::Int(a.signed_duration_since(b).num_days()))
}

inventory::submit! {
    BuiltinDef { name: "now", arity: Arity::Exact(0), func: builtin_now, effect: true, doc: "Milliseconds since the Unix epoch." }
}
inventory::submit! {
    BuiltinDef { name: "today", arity: Arity::Exact(0), func: builtin_today, effect: true, doc: "Today's date as YYYY-MM-DD." }
}
inventory::submit! {
    BuiltinDef { name: "addDays", arity: Arity::Exact(2), func: builtin_add_days, effect: false, doc: "Shift a YYYY-MM-DD date by a number of days." }
}
inventory::submit! {
    BuiltinDef { name: "diffDays", arity: Arity::Exact(2), func: builtin_diff_days, effect: false, doc: "Difference in days between two dates." }
}
