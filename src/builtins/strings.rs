//! String manipulation, regex primitives, and codecs.
//!
//! The codecs (base64, url, hex) are implemented here directly; they are
//! alphabet tables, not a dependency.

use crate::builtins::{want_list, want_string, Arity, BuiltinDef};
use crate::error::RuntimeError;
use crate::eval::Evaluator;
use crate::value::Value;

fn builtin_split(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("split", args, 0)?;
    let sep = want_string("split", args, 1)?;
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        s.split(sep).map(|p| Value::String(p.to_string())).collect()
    };
    Ok(Value::List(parts))
}

fn builtin_join(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = want_list("join", args, 0)?;
    let sep = want_string("join", args, 1)?;
    let parts: Vec<String> = items.iter().map(|v| v.display_raw()).collect();
    Ok(Value::String(parts.join(sep)))
}

fn builtin_replace(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("replace", args, 0)?;
    let from = want_string("replace", args, 1)?;
    let to = want_string("replace", args, 2)?;
    Ok(Value::String(s.replace(from, to)))
}

fn builtin_trim(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::String(want_string("trim", args, 0)?.trim().to_string()))
}

fn builtin_to_upper(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::String(
        want_string("toUpperCase", args, 0)?.to_uppercase(),
    ))
}

fn builtin_to_lower(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::String(
        want_string("toLowerCase", args, 0)?.to_lowercase(),
    ))
}

fn builtin_capitalize(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("capitalize", args, 0)?;
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    Ok(Value::String(out))
}

fn builtin_to_string(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::String(args[0].display_raw()))
}

fn builtin_parse_int(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("parseInt", args, 0)?;
    Ok(s.trim()
        .parse::<i64>()
        .map(Value::Int)
        .unwrap_or(Value::Null))
}

fn builtin_parse_float(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("parseFloat", args, 0)?;
    Ok(s.trim()
        .parse::<f64>()
        .map(Value::Float)
        .unwrap_or(Value::Null))
}

// ----------------------------------------------------------------------
// Regex primitives
// ----------------------------------------------------------------------

fn compile(function: &str, pattern: &str) -> Result<regex::Regex, RuntimeError> {
    regex::Regex::new(pattern)
        .map_err(|e| RuntimeError::runtime_error(function, format!("invalid pattern: {}", e)))
}

fn builtin_regex_match(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("regexMatch", args, 0)?;
    let re = compile("regexMatch", want_string("regexMatch", args, 1)?)?;
    Ok(Value::Bool(re.is_match(s)))
}

fn builtin_regex_find(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("regexFind", args, 0)?;
    let re = compile("regexFind", want_string("regexFind", args, 1)?)?;
    Ok(re
        .find(s)
        .map(|m| Value::String(m.as_str().to_string()))
        .unwrap_or(Value::Null))
}

fn builtin_regex_find_all(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("regexFindAll", args, 0)?;
    let re = compile("regexFindAll", want_string("regexFindAll", args, 1)?)?;
    Ok(Value::List(
        re.find_iter(s)
            .map(|m| Value::String(m.as_str().to_string()))
            .collect(),
    ))
}

fn builtin_regex_replace(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("regexReplace", args, 0)?;
    let re = compile("regexReplace", want_string("regexReplace", args, 1)?)?;
    let replacement = want_string("regexReplace", args, 2)?;
    Ok(Value::String(re.replace_all(s, replacement).into_owned()))
}

// ----------------------------------------------------------------------
// Codecs
// ----------------------------------------------------------------------

const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn b64_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let n = (u32::from(chunk[0]) << 16)
            | (u32::from(chunk.get(1).copied().unwrap_or(0)) << 8)
            | u32::from(chunk.get(2).copied().unwrap_or(0));
        out.push(B64_ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(B64_ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            B64_ALPHABET[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            B64_ALPHABET[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

fn b64_decode(s: &str) -> Result<Vec<u8>, String> {
    let mut buf = 0u32;
    let mut bits = 0u32;
    let mut out = Vec::new();
    for c in s.chars() {
        if c == '=' || c.is_ascii_whitespace() {
            continue;
        }
        let v = B64_ALPHABET
            .iter()
            .position(|&b| b as char == c)
            .ok_or_else(|| format!("invalid base64 character `{}`", c))? as u32;
        buf = (buf << 6) | v;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buf >> bits) as u8);
        }
    }
    Ok(out)
}

fn builtin_base64_encode(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("base64Encode", args, 0)?;
    Ok(Value::String(b64_encode(s.as_bytes())))
}

fn builtin_base64_decode(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("base64Decode", args, 0)?;
    let bytes =
        b64_decode(s).map_err(|e| RuntimeError::runtime_error("base64Decode", e))?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|_| RuntimeError::runtime_error("base64Decode", "decoded bytes are not UTF-8"))
}

fn is_url_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}

fn builtin_url_encode(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("urlEncode", args, 0)?;
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if is_url_unreserved(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    Ok(Value::String(out))
}

fn builtin_url_decode(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("urlDecode", args, 0)?;
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|pair| std::str::from_utf8(pair).ok())
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| {
                        RuntimeError::runtime_error("urlDecode", "malformed %XX escape")
                    })?;
                out.push(hex);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out)
        .map(Value::String)
        .map_err(|_| RuntimeError::runtime_error("urlDecode", "decoded bytes are not UTF-8"))
}

fn builtin_hex_encode(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("hexEncode", args, 0)?;
    let mut out = String::with_capacity(s.len() * 2);
    for b in s.bytes() {
        out.push_str(&format!("{:02x}", b));
    }
    Ok(Value::String(out))
}

fn builtin_hex_decode(_ev: &mut Evaluator, args: &[Value]) -> Result<Value, RuntimeError> {
    let s = want_string("hexDecode", args, 0)?;
    if s.len() % 2 != 0 {
        return Err(RuntimeError::runtime_error(
            "hexDecode",
            "hex input must have even length",
        ));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    for i in (0..s.len()).step_by(2) {
        let byte = u8::from_str_radix(&s[i..i + 2], 16)
            .map_err(|_| RuntimeError::runtime_error("hexDecode", "invalid hex digit"))?;
        out.push(byte);
    }
    String::from_utf8(out)
        .map(Value::String)
        .map_err(|_| RuntimeError::runtime_error("hexDecode", "decoded bytes are not UTF-8"))
}

inventory::submit! {
    BuiltinDef { name: "split", arity: Arity::Exact(2), func: builtin_split, effect: false, doc: "Split a string by a separator." }
}
inventory::submit! {
    BuiltinDef { name: "join", arity: Arity::Exact(2), func: builtin_join, effect: false, doc: "Join list elements with a separator." }
}
inventory::submit! {
    BuiltinDef { name: "replace", arity: Arity::Exact(3), func: builtin_replace, effect: false, doc: "Replace every occurrence of a substring." }
}
inventory::submit! {
    BuiltinDef { name: "trim", arity: Arity::Exact(1), func: builtin_trim, effect: false, doc: "Strip surrounding whitespace." }
}
inventory::submit! {
    BuiltinDef { name: "toUpperCase", arity: Arity::Exact(1), func: builtin_to_upper, effect: false, doc: "Uppercase a string." }
}
inventory::submit! {
    BuiltinDef { name: "toLowerCase", arity: Arity::Exact(1), func: builtin_to_lower, effect: false, doc: "Lowercase a string." }
}
inventory::submit! {
    BuiltinDef { name: "capitalize", arity: Arity::Exact(1), func: builtin_capitalize, effect: false, doc: "Uppercase the first character." }
}
inventory::submit! {
    BuiltinDef { name: "toString", arity: Arity::Exact(1), func: builtin_to_string, effect: false, doc: "Convert any value to its display string." }
}
inventory::submit! {
    BuiltinDef { name: "parseInt", arity: Arity::Exact(1), func: builtin_parse_int, effect: false, doc: "Parse an Int, or null on failure." }
}
inventory::submit! {
    BuiltinDef { name: "parseFloat", arity: Arity::Exact(1), func: builtin_parse_float, effect: false, doc: "Parse a Float, or null on failure." }
}
inventory::submit! {
    BuiltinDef { name: "regexMatch", arity: Arity::Exact(2), func: builtin_regex_match, effect: false, doc: "Whether a pattern matches anywhere." }
}
inventory::submit! {
    BuiltinDef { name: "regexFind", arity: Arity::Exact(2), func: builtin_regex_find, effect: false, doc: "First match of a pattern, or null." }
}
inventory::submit! {
    BuiltinDef { name: "regexFindAll", arity: Arity::Exact(2), func: builtin_regex_find_all, effect: false, doc: "All matches of a pattern." }
}
inventory::submit! {
    BuiltinDef { name: "regexReplace", arity: Arity::Exact(3), func: builtin_regex_replace, effect: false, doc: "Replace every match of a pattern." }
}
inventory::submit! {
    BuiltinDef { name: "base64Encode", arity: Arity::Exact(1), func: builtin_base64_encode, effect: false, doc: "Base64-encode a string." }
}
inventory::submit! {
    BuiltinDef { name: "base64Decode", arity: Arity::Exact(1), func: builtin_base64_decode, effect: false, doc: "Decode a base64 string." }
}
inventory::submit! {
    BuiltinDef { name: "urlEncode", arity: Arity::Exact(1), func: builtin_url_encode, effect: false, doc: "Percent-encode a string." }
}
inventory::submit! {
    BuiltinDef { name: "urlDecode", arity: Arity::Exact(1), func: builtin_url_decode, effect: false, doc: "Decode a percent-encoded string." }
}
inventory::submit! {
    BuiltinDef { name: "hexEncode", arity: Arity::Exact(1), func: builtin_hex_encode, effect: false, doc: "Hex-encode a string's bytes." }
}
inventory::submit! {
    BuiltinDef { name: "hexDecode", arity: Arity::Exact(1), func: builtin_hex_decode, effect: false, doc: "Decode a hex string." }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        assert_eq!(b64_encode(b"hi"), "aGk=");
        assert_eq!(b64_encode(b"hello"), "aGVsbG8=");
        assert_eq!(b64_decode("aGVsbG8=").unwrap(), b"hello");
        assert!(b64_decode("a!b").is_err());
    }
}
