//! Builtins Module for the view runtime
//!
//! Global objects (`Math`, `JSON`, `Object`, `Array`), global functions and the
//! methods available on strings, arrays and numbers. Anything that needs to call
//! back into user code (e.g. `items.map(fn)`) goes through [`Invoke`].

use crate::codegen::ESCAPE_FN;
use crate::escape::escape_value;
use crate::value::{format_number, join_array, Callable, Value};
use indexmap::IndexMap;
use serde::Serialize;
use std::cmp::Ordering;

/// Callback into the interpreter for calling function values.
pub trait Invoke {
    fn invoke(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, String>;
}

type BuiltinResult = Result<Value, String>;

/// Longest string a method may build, in bytes.
const MAX_STRING_LENGTH: usize = (1 << 29) - 24;
/// Arrays are dense, so a write past this index is refused.
const MAX_ARRAY_LENGTH: usize = 1 << 22;

const INVALID_STRING_LENGTH: &str = "RangeError: Invalid string length";
const INVALID_ARRAY_LENGTH: &str = "RangeError: Invalid array length";

const MATH_FUNCTIONS: &[&str] = &[
    "Math.floor",
    "Math.ceil",
    "Math.round",
    "Math.abs",
    "Math.min",
    "Math.max",
    "Math.pow",
    "Math.sqrt",
    "Math.trunc",
];

const GLOBAL_FUNCTIONS: &[&str] = &[
    "String",
    "Number",
    "Boolean",
    "parseInt",
    "parseFloat",
    "isNaN",
];

fn namespace(names: &[&'static str], prefix: &str) -> IndexMap<String, Value> {
    names
        .iter()
        .filter_map(|name| {
            name.strip_prefix(prefix)
                .map(|short| (short.to_string(), Value::Function(Callable::Builtin(*name))))
        })
        .collect()
}

/// Global bindings every render starts from, lowest precedence.
pub fn globals() -> Vec<(&'static str, Value)> {
    let mut math = namespace(MATH_FUNCTIONS, "Math.");
    math.insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    math.insert("E".to_string(), Value::Number(std::f64::consts::E));

    let mut globals = vec![
        ("Math", Value::object(math)),
        (
            "JSON",
            Value::object(namespace(&["JSON.stringify", "JSON.parse"], "JSON.")),
        ),
        (
            "Object",
            Value::object(namespace(
                &["Object.keys", "Object.values", "Object.entries", "Object.assign"],
                "Object.",
            )),
        ),
        (
            "Array",
            Value::object(namespace(&["Array.isArray"], "Array.")),
        ),
        ("NaN", Value::Number(f64::NAN)),
        ("Infinity", Value::Number(f64::INFINITY)),
        ("undefined", Value::Undefined),
    ];
    for name in GLOBAL_FUNCTIONS {
        globals.push((*name, Value::Function(Callable::Builtin(*name))));
    }
    globals
}

/// The default `escapeFunction` binding.
pub fn escape_function() -> Value {
    Value::Function(Callable::Builtin(ESCAPE_FN))
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn number_arg(args: &[Value], index: usize) -> f64 {
    arg(args, index).to_number()
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn call_builtin(name: &str, args: &[Value]) -> BuiltinResult {
    let value = match name {
        ESCAPE_FN => Value::String(escape_value(&arg(args, 0))),

        "Math.floor" => Value::Number(number_arg(args, 0).floor()),
        "Math.ceil" => Value::Number(number_arg(args, 0).ceil()),
        "Math.round" => Value::Number((number_arg(args, 0) + 0.5).floor()),
        "Math.abs" => Value::Number(number_arg(args, 0).abs()),
        "Math.sqrt" => Value::Number(number_arg(args, 0).sqrt()),
        "Math.trunc" => Value::Number(number_arg(args, 0).trunc()),
        "Math.pow" => Value::Number(number_arg(args, 0).powf(number_arg(args, 1))),
        "Math.min" => Value::Number(fold_numbers(args, f64::INFINITY, f64::min)),
        "Math.max" => Value::Number(fold_numbers(args, f64::NEG_INFINITY, f64::max)),

        "JSON.stringify" => json_stringify(&arg(args, 0), &arg(args, 2))?,
        "JSON.parse" => {
            let text = arg(args, 0).to_js_string();
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| format!("SyntaxError: {}", e))?;
            Value::from_json(&json)
        }

        "Object.keys" => Value::array(entries_of(&arg(args, 0)).into_iter().map(|(k, _)| Value::String(k)).collect()),
        "Object.values" => Value::array(entries_of(&arg(args, 0)).into_iter().map(|(_, v)| v).collect()),
        "Object.entries" => Value::array(
            entries_of(&arg(args, 0))
                .into_iter()
                .map(|(k, v)| Value::array(vec![Value::String(k), v]))
                .collect(),
        ),
        "Object.assign" => {
            let target = arg(args, 0);
            let Value::Object(map) = &target else {
                return Err("TypeError: Object.assign target must be an object".to_string());
            };
            for source in args.iter().skip(1) {
                for (key, value) in entries_of(source) {
                    map.borrow_mut().insert(key, value);
                }
            }
            target
        }

        "Array.isArray" => Value::Bool(matches!(arg(args, 0), Value::Array(_))),

        "String" => match args.first() {
            Some(value) => Value::String(value.to_js_string()),
            None => Value::String(String::new()),
        },
        "Number" => match args.first() {
            Some(value) => Value::Number(value.to_number()),
            None => Value::Number(0.0),
        },
        "Boolean" => Value::Bool(arg(args, 0).truthy()),
        "parseInt" => Value::Number(parse_int(&arg(args, 0).to_js_string(), &arg(args, 1))),
        "parseFloat" => Value::Number(parse_float(&arg(args, 0).to_js_string())),
        "isNaN" => Value::Bool(number_arg(args, 0).is_nan()),

        _ => return Err(format!("TypeError: {} is not a function", name)),
    };
    Ok(value)
}

fn fold_numbers(args: &[Value], init: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = pick(acc, n);
    }
    acc
}

/// Own enumerable entries: object fields, array and string indices.
pub(crate) fn entries_of(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(map) => map
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::String(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::String(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn json_stringify(value: &Value, indent: &Value) -> BuiltinResult {
    let Some(json) = value.to_json()? else {
        return Ok(Value::Undefined);
    };
    let width = match indent {
        Value::Number(n) if *n >= 1.0 => n.min(10.0) as usize,
        Value::String(s) if !s.is_empty() => {
            return pretty_json(&json, s.chars().take(10).collect::<String>().as_bytes())
        }
        _ => 0,
    };
    if width == 0 {
        return serde_json::to_string(&json)
            .map(Value::String)
            .map_err(|e| e.to_string());
    }
    pretty_json(&json, " ".repeat(width).as_bytes())
}

fn pretty_json(json: &serde_json::Value, indent: &[u8]) -> BuiltinResult {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    json.serialize(&mut serializer).map_err(|e| e.to_string())?;
    String::from_utf8(buf)
        .map(Value::String)
        .map_err(|e| e.to_string())
}

fn parse_int(text: &str, radix: &Value) -> f64 {
    let mut s = text.trim_start();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    let explicit = match radix {
        Value::Undefined => 0,
        other => other.to_number() as u32,
    };
    let mut radix = if explicit == 0 { 10 } else { explicit };
    if (explicit == 0 || explicit == 16) && (s.starts_with("0x") || s.starts_with("0X")) {
        s = &s[2..];
        radix = 16;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }

    let mut result = 0.0;
    let mut seen = false;
    for c in s.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                result = result * radix as f64 + d as f64;
                seen = true;
            }
            None => break,
        }
    }
    if seen {
        sign * result
    } else {
        f64::NAN
    }
}

fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if s.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let candidate: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        .collect();
    let mut end = candidate.len();
    while end > 0 {
        if let Ok(n) = candidate[..end].parse::<f64>() {
            return n;
        }
        end -= 1;
    }
    f64::NAN
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTY ACCESS
// ═══════════════════════════════════════════════════════════════════════════════

fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse::<usize>().ok()
}

pub fn get_property(target: &Value, key: &str) -> BuiltinResult {
    let value = match target {
        Value::Undefined | Value::Null => {
            return Err(format!(
                "TypeError: Cannot read properties of {} (reading '{}')",
                target.to_js_string(),
                key
            ))
        }
        Value::String(s) => match key {
            "length" => Value::Number(s.chars().count() as f64),
            _ => array_index(key)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default(),
        },
        Value::Array(items) => {
            let items = items.borrow();
            match key {
                "length" => Value::Number(items.len() as f64),
                _ => array_index(key)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            }
        }
        Value::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
        _ => Value::Undefined,
    };
    Ok(value)
}

pub fn set_property(target: &Value, key: &str, value: Value) -> Result<(), String> {
    match target {
        Value::Undefined | Value::Null => Err(format!(
            "TypeError: Cannot set properties of {} (setting '{}')",
            target.to_js_string(),
            key
        )),
        Value::Object(map) => {
            map.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            if key == "length" {
                let len = value.to_number();
                let in_range = len >= 0.0 && len <= MAX_ARRAY_LENGTH as f64;
                if !in_range || len.fract() != 0.0 {
                    return Err(INVALID_ARRAY_LENGTH.to_string());
                }
                items.resize(len as usize, Value::Undefined);
            } else if let Some(index) = array_index(key) {
                if index >= MAX_ARRAY_LENGTH {
                    return Err(INVALID_ARRAY_LENGTH.to_string());
                }
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
            }
            Ok(())
        }
        // Writes to primitives are silently dropped.
        _ => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// METHODS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn call_method(
    target: &Value,
    name: &str,
    args: Vec<Value>,
    host: &mut dyn Invoke,
) -> BuiltinResult {
    match target {
        Value::Object(map) => {
            let own = map.borrow().get(name).cloned();
            match own {
                Some(func @ Value::Function(_)) => host.invoke(&func, args),
                Some(_) => Err(format!("TypeError: {} is not a function", name)),
                None => match name {
                    "hasOwnProperty" => Ok(Value::Bool(
                        map.borrow().contains_key(&arg(&args, 0).to_property_key()),
                    )),
                    "toString" => Ok(Value::String(target.to_js_string())),
                    _ => Err(format!("TypeError: {} is not a function", name)),
                },
            }
        }
        Value::String(s) => string_method(s, name, &args, host),
        Value::Array(_) => array_method(target, name, args, host),
        Value::Number(n) => number_method(*n, name, &args),
        Value::Bool(b) if name == "toString" => Ok(Value::String(b.to_string())),
        Value::Undefined | Value::Null => Err(format!(
            "TypeError: Cannot read properties of {} (reading '{}')",
            target.to_js_string(),
            name
        )),
        _ => Err(format!("TypeError: {} is not a function", name)),
    }
}

/// Resolve a relative start/end argument against `len` (negative counts back).
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn char_index(s: &str, byte_index: usize) -> usize {
    s[..byte_index].chars().count()
}

fn string_method(s: &str, name: &str, args: &[Value], host: &mut dyn Invoke) -> BuiltinResult {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let text_arg = |i: usize| arg(args, i).to_js_string();

    let value = match name {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "trimStart" => Value::String(s.trim_start().to_string()),
        "trimEnd" => Value::String(s.trim_end().to_string()),
        "toString" => Value::String(s.to_string()),
        "includes" => Value::Bool(s.contains(&text_arg(0))),
        "startsWith" => Value::Bool(s.starts_with(&text_arg(0))),
        "endsWith" => Value::Bool(s.ends_with(&text_arg(0))),
        "indexOf" => Value::Number(
            s.find(&text_arg(0))
                .map(|b| char_index(s, b) as f64)
                .unwrap_or(-1.0),
        ),
        "charAt" => {
            let index = number_arg(args, 0);
            let index = if index.is_nan() { 0.0 } else { index };
            Value::String(
                chars
                    .get(index as usize)
                    .filter(|_| index >= 0.0)
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            )
        }
        "slice" => {
            let start = relative_index(&arg(args, 0), len, 0);
            let end = relative_index(&arg(args, 1), len, len);
            Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            })
        }
        "substring" => {
            let clamp = |v: Value, default: usize| -> usize {
                if matches!(v, Value::Undefined) {
                    return default;
                }
                let n = v.to_number();
                if n.is_nan() || n < 0.0 {
                    0
                } else {
                    (n as usize).min(len)
                }
            };
            let a = clamp(arg(args, 0), 0);
            let b = clamp(arg(args, 1), len);
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            Value::String(chars[start..end].iter().collect())
        }
        "split" => match args.first() {
            None | Some(Value::Undefined) => Value::array(vec![Value::String(s.to_string())]),
            Some(sep) => {
                let sep = sep.to_js_string();
                let parts: Vec<Value> = if sep.is_empty() {
                    chars.iter().map(|c| Value::String(c.to_string())).collect()
                } else {
                    s.split(sep.as_str())
                        .map(|p| Value::String(p.to_string()))
                        .collect()
                };
                match arg(args, 1) {
                    Value::Undefined => Value::array(parts),
                    limit => Value::array(
                        parts
                            .into_iter()
                            .take(limit.to_number().max(0.0) as usize)
                            .collect(),
                    ),
                }
            }
        },
        "replace" | "replaceAll" => {
            let pattern = text_arg(0);
            let replacement = arg(args, 1);
            let mut out = String::new();
            let mut rest = 0;
            let matches: Vec<usize> = if name == "replace" {
                s.find(&pattern).into_iter().collect()
            } else {
                s.match_indices(&pattern).map(|(i, _)| i).collect()
            };
            for start in matches {
                out.push_str(&s[rest..start]);
                let substitute = match &replacement {
                    Value::Function(_) => host
                        .invoke(
                            &replacement,
                            vec![
                                Value::String(pattern.clone()),
                                Value::Number(char_index(s, start) as f64),
                                Value::String(s.to_string()),
                            ],
                        )?
                        .to_js_string(),
                    other => other.to_js_string(),
                };
                out.push_str(&substitute);
                rest = start + pattern.len();
            }
            out.push_str(&s[rest..]);
            Value::String(out)
        }
        "repeat" => {
            let count = number_arg(args, 0);
            if count < 0.0 || count.is_infinite() {
                return Err("RangeError: Invalid count value".to_string());
            }
            let count = if count.is_nan() { 0.0 } else { count.trunc() };
            if s.len() as f64 * count > MAX_STRING_LENGTH as f64 {
                return Err(INVALID_STRING_LENGTH.to_string());
            }
            Value::String(s.repeat(count as usize))
        }
        "padStart" | "padEnd" => {
            let target = number_arg(args, 0);
            let target = if target.is_nan() { 0.0 } else { target.max(0.0) };
            let fill = match arg(args, 1) {
                Value::Undefined => " ".to_string(),
                other => other.to_js_string(),
            };
            if target <= len as f64 || fill.is_empty() {
                Value::String(s.to_string())
            } else if target > MAX_STRING_LENGTH as f64 {
                return Err(INVALID_STRING_LENGTH.to_string());
            } else {
                let target = target as usize;
                let padding: String = fill.chars().cycle().take(target - len).collect();
                Value::String(if name == "padStart" {
                    format!("{}{}", padding, s)
                } else {
                    format!("{}{}", s, padding)
                })
            }
        }
        "concat" => {
            let mut out = s.to_string();
            for value in args {
                out.push_str(&value.to_js_string());
            }
            Value::String(out)
        }
        _ => return Err(format!("TypeError: \"{}\".{} is not a function", s, name)),
    };
    Ok(value)
}

fn number_method(n: f64, name: &str, args: &[Value]) -> BuiltinResult {
    match name {
        "toFixed" => {
            let digits = number_arg(args, 0);
            let digits = if digits.is_nan() { 0.0 } else { digits };
            if !(0.0..=100.0).contains(&digits) {
                return Err("RangeError: toFixed() digits argument must be between 0 and 100".to_string());
            }
            Ok(Value::String(to_fixed(n, digits as usize)))
        }
        "toString" => Ok(Value::String(format_number(n))),
        _ => Err(format!("TypeError: {}.{} is not a function", format_number(n), name)),
    }
}

/// `Number.prototype.toFixed`: rounds the exact binary value half up.
fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() || n.abs() >= 1e21 {
        return format_number(n);
    }
    // Every f64 has at most 1074 fractional digits, so this expansion is exact.
    let exact = format!("{:.1074}", n.abs());
    let (int_part, frac_part) = exact.split_once('.').unwrap_or((exact.as_str(), ""));
    let mut kept: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().chain(std::iter::repeat(b'0')).take(digits))
        .collect();

    if frac_part.as_bytes().get(digits).is_some_and(|d| *d >= b'5') {
        let mut carry = true;
        for d in kept.iter_mut().rev() {
            if *d == b'9' {
                *d = b'0';
            } else {
                *d += 1;
                carry = false;
                break;
            }
        }
        if carry {
            kept.insert(0, b'1');
        }
    }

    let int_len = kept.len() - digits;
    let mut out = String::with_capacity(kept.len() + 2);
    if n < 0.0 {
        out.push('-');
    }
    out.extend(kept[..int_len].iter().map(|d| char::from(*d)));
    if digits > 0 {
        out.push('.');
        out.extend(kept[int_len..].iter().map(|d| char::from(*d)));
    }
    out
}

fn call_predicate(
    host: &mut dyn Invoke,
    func: &Value,
    item: &Value,
    index: usize,
    array: &Value,
) -> BuiltinResult {
    host.invoke(
        func,
        vec![item.clone(), Value::Number(index as f64), array.clone()],
    )
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn array_method(
    target: &Value,
    name: &str,
    args: Vec<Value>,
    host: &mut dyn Invoke,
) -> BuiltinResult {
    let Value::Array(items_ref) = target else {
        return Err(format!("TypeError: {} is not a function", name));
    };
    // Snapshot so callbacks may mutate the array.
    let items: Vec<Value> = items_ref.borrow().clone();
    let len = items.len();
    let callback = arg(&args, 0);

    let value = match name {
        "push" => {
            let mut items = items_ref.borrow_mut();
            items.extend(args);
            Value::Number(items.len() as f64)
        }
        "pop" => items_ref.borrow_mut().pop().unwrap_or_default(),
        "join" => {
            let sep = match arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_js_string(),
            };
            Value::String(join_array(items_ref, &sep))
        }
        "map" => {
            let mut out = Vec::with_capacity(len);
            for (i, item) in items.iter().enumerate() {
                out.push(call_predicate(host, &callback, item, i, target)?);
            }
            Value::array(out)
        }
        "filter" => {
            let mut out = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if call_predicate(host, &callback, item, i, target)?.truthy() {
                    out.push(item.clone());
                }
            }
            Value::array(out)
        }
        "forEach" => {
            for (i, item) in items.iter().enumerate() {
                call_predicate(host, &callback, item, i, target)?;
            }
            Value::Undefined
        }
        "find" | "findIndex" => {
            let mut found = None;
            for (i, item) in items.iter().enumerate() {
                if call_predicate(host, &callback, item, i, target)?.truthy() {
                    found = Some(i);
                    break;
                }
            }
            match (name, found) {
                ("find", Some(i)) => items[i].clone(),
                ("find", None) => Value::Undefined,
                (_, Some(i)) => Value::Number(i as f64),
                (_, None) => Value::Number(-1.0),
            }
        }
        "some" => {
            let mut result = false;
            for (i, item) in items.iter().enumerate() {
                if call_predicate(host, &callback, item, i, target)?.truthy() {
                    result = true;
                    break;
                }
            }
            Value::Bool(result)
        }
        "every" => {
            let mut result = true;
            for (i, item) in items.iter().enumerate() {
                if !call_predicate(host, &callback, item, i, target)?.truthy() {
                    result = false;
                    break;
                }
            }
            Value::Bool(result)
        }
        "reduce" => {
            let mut iter = items.iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some((_, first)) => first.clone(),
                    None => {
                        return Err(
                            "TypeError: Reduce of empty array with no initial value".to_string()
                        )
                    }
                },
            };
            for (i, item) in iter {
                acc = host.invoke(
                    &callback,
                    vec![acc, item.clone(), Value::Number(i as f64), target.clone()],
                )?;
            }
            acc
        }
        "includes" => Value::Bool(items.iter().any(|v| same_value_zero(v, &callback))),
        "indexOf" => Value::Number(
            items
                .iter()
                .position(|v| v.strict_equals(&callback))
                .map(|i| i as f64)
                .unwrap_or(-1.0),
        ),
        "slice" => {
            let start = relative_index(&arg(&args, 0), len, 0);
            let end = relative_index(&arg(&args, 1), len, len);
            Value::array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            })
        }
        "concat" => {
            let mut out = items;
            for value in args {
                match value {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            Value::array(out)
        }
        "reverse" => {
            items_ref.borrow_mut().reverse();
            target.clone()
        }
        "sort" => {
            let sorted = sort_values(items, |a, b| match (a, b) {
                (Value::Undefined, Value::Undefined) => Ok(Ordering::Equal),
                (Value::Undefined, _) => Ok(Ordering::Greater),
                (_, Value::Undefined) => Ok(Ordering::Less),
                _ if matches!(callback, Value::Undefined) => {
                    Ok(a.to_js_string().cmp(&b.to_js_string()))
                }
                _ => {
                    let n = host.invoke(&callback, vec![a.clone(), b.clone()])?.to_number();
                    Ok(if n > 0.0 {
                        Ordering::Greater
                    } else if n < 0.0 {
                        Ordering::Less
                    } else {
                        Ordering::Equal
                    })
                }
            })?;
            *items_ref.borrow_mut() = sorted;
            target.clone()
        }
        "toString" => Value::String(target.to_js_string()),
        _ => return Err(format!("TypeError: {} is not a function", name)),
    };
    Ok(value)
}

/// Stable insertion sort with a fallible comparator.
fn sort_values<F>(mut items: Vec<Value>, mut compare: F) -> Result<Vec<Value>, String>
where
    F: FnMut(&Value, &Value) -> Result<Ordering, String>,
{
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare(&items[j - 1], &items[j])? == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
    Ok(items)
}
