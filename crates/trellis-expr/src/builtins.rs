//! Built-in functions and methods available to expressions.

use std::rc::Rc;

use crate::error::{ExprError, ExprResult};
use crate::interpreter::Interpreter;
use crate::value::{Function, Value};

/// Global names bound in every evaluation.
pub(crate) const NAMESPACES: &[&str] = &[
    "Math", "JSON", "String", "Number", "Boolean", "Array", "Object",
];

const GLOBAL_FUNCTIONS: &[&str] = &[
    "Math.round",
    "Math.floor",
    "Math.ceil",
    "Math.min",
    "Math.max",
    "Math.abs",
    "JSON.stringify",
    "JSON.parse",
    "Number.isNaN",
    "Number.isFinite",
    "Array.isArray",
    "Object.keys",
    "Object.values",
    "Object.entries",
];

const STRING_METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "trim",
    "includes",
    "startsWith",
    "endsWith",
    "split",
    "slice",
    "replace",
    "replaceAll",
    "indexOf",
    "toString",
];

const ARRAY_METHODS: &[&str] = &[
    "map", "filter", "find", "findIndex", "some", "every", "forEach", "reduce", "includes",
    "join", "slice", "indexOf", "concat", "push", "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

/// Resolve `namespace.key` to a global function name.
pub(crate) fn lookup_global(namespace: &str, key: &str) -> Option<&'static str> {
    let full = format!("{namespace}.{key}");
    GLOBAL_FUNCTIONS.iter().copied().find(|name| *name == full)
}

pub(crate) fn is_method(receiver: &Value, name: &str) -> bool {
    let table = match receiver {
        Value::String(_) => STRING_METHODS,
        Value::Array(_) => ARRAY_METHODS,
        Value::Number(_) => NUMBER_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn callback(args: &[Value], method: &str) -> ExprResult<Rc<Function>> {
    match args.first() {
        Some(Value::Function(f)) => Ok(f.clone()),
        Some(other) => Err(ExprError::NotCallable(format!(
            "{} passed to {method}",
            other.to_js_string()
        ))),
        None => Err(ExprError::NotCallable(format!("undefined passed to {method}"))),
    }
}

/// Resolve a possibly negative `slice` bound against `len`.
fn relative_index(bound: Option<&Value>, len: usize, default: usize) -> usize {
    match bound {
        None | Some(Value::Undefined) => default,
        Some(value) => {
            let n = value.to_number();
            if n.is_nan() {
                0
            } else if n < 0.0 {
                (len as f64 + n).max(0.0) as usize
            } else {
                (n as usize).min(len)
            }
        }
    }
}

pub(crate) fn call_global(name: &str, args: Vec<Value>) -> ExprResult<Value> {
    let first = arg(&args, 0);
    let value = match name {
        "String" => Value::String(if args.is_empty() {
            String::new()
        } else {
            first.to_js_string()
        }),
        "Number" => Value::Number(if args.is_empty() {
            0.0
        } else {
            first.to_number()
        }),
        "Boolean" => Value::Bool(first.is_truthy()),
        "Math.round" => Value::Number((first.to_number() + 0.5).floor()),
        "Math.floor" => Value::Number(first.to_number().floor()),
        "Math.ceil" => Value::Number(first.to_number().ceil()),
        "Math.abs" => Value::Number(first.to_number().abs()),
        "Math.min" | "Math.max" => {
            let numbers: Vec<f64> = args.iter().map(Value::to_number).collect();
            if numbers.iter().any(|n| n.is_nan()) {
                Value::Number(f64::NAN)
            } else if name == "Math.min" {
                Value::Number(numbers.into_iter().fold(f64::INFINITY, f64::min))
            } else {
                Value::Number(numbers.into_iter().fold(f64::NEG_INFINITY, f64::max))
            }
        }
        "JSON.stringify" => match first.to_json() {
            Some(json) => Value::String(
                serde_json::to_string(&json).map_err(|e| ExprError::Runtime(e.to_string()))?,
            ),
            None => Value::Undefined,
        },
        "JSON.parse" => {
            let parsed: serde_json::Value = serde_json::from_str(&first.to_js_string())
                .map_err(|e| ExprError::Runtime(format!("JSON.parse: {e}")))?;
            Value::from_json(&parsed)
        }
        "Number.isNaN" => Value::Bool(matches!(first, Value::Number(n) if n.is_nan())),
        "Number.isFinite" => Value::Bool(matches!(first, Value::Number(n) if n.is_finite())),
        "Array.isArray" => Value::Bool(matches!(first, Value::Array(_))),
        "Object.keys" | "Object.values" | "Object.entries" => {
            let pairs: Vec<(String, Value)> = match first {
                Value::Object(map) => map.into_iter().collect(),
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
                _ => Vec::new(),
            };
            Value::Array(
                pairs
                    .into_iter()
                    .map(|(k, v)| match name {
                        "Object.keys" => Value::String(k),
                        "Object.values" => v,
                        _ => Value::Array(vec![Value::String(k), v]),
                    })
                    .collect(),
            )
        }
        other => return Err(ExprError::NotCallable(other.to_string())),
    };
    Ok(value)
}

pub(crate) fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> ExprResult<Value> {
    match receiver {
        Value::String(s) => string_method(s, name, &args),
        Value::Array(items) => array_method(interp, items, name, args),
        Value::Number(n) => number_method(*n, name, &args),
        other => Err(ExprError::NotCallable(format!("{}.{name}", other.type_of()))),
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> ExprResult<Value> {
    let first = arg(args, 0);
    let value = match name {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "toString" => Value::String(s.to_string()),
        "includes" => Value::Bool(s.contains(first.to_js_string().as_str())),
        "startsWith" => Value::Bool(s.starts_with(first.to_js_string().as_str())),
        "endsWith" => Value::Bool(s.ends_with(first.to_js_string().as_str())),
        "indexOf" => {
            let needle = first.to_js_string();
            Value::Number(match s.find(needle.as_str()) {
                Some(byte) => s[..byte].chars().count() as f64,
                None => -1.0,
            })
        }
        "split" => {
            let parts: Vec<Value> = match first {
                Value::Undefined => vec![Value::String(s.to_string())],
                sep => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::Array(parts)
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = relative_index(args.first(), chars.len(), 0);
            let end = relative_index(args.get(1), chars.len(), chars.len());
            Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            })
        }
        "replace" => Value::String(s.replacen(
            first.to_js_string().as_str(),
            &arg(args, 1).to_js_string(),
            1,
        )),
        "replaceAll" => Value::String(s.replace(
            first.to_js_string().as_str(),
            &arg(args, 1).to_js_string(),
        )),
        other => return Err(ExprError::NotCallable(format!("string.{other}"))),
    };
    Ok(value)
}

fn array_method(
    interp: &mut Interpreter,
    items: &[Value],
    name: &str,
    args: Vec<Value>,
) -> ExprResult<Value> {
    let indexed = |i: usize, item: &Value| vec![item.clone(), Value::Number(i as f64)];

    let value = match name {
        "map" => {
            let f = callback(&args, name)?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(interp.call_function(&f, indexed(i, item))?);
            }
            Value::Array(out)
        }
        "filter" => {
            let f = callback(&args, name)?;
            let mut out = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if interp.call_function(&f, indexed(i, item))?.is_truthy() {
                    out.push(item.clone());
                }
            }
            Value::Array(out)
        }
        "find" | "findIndex" => {
            let f = callback(&args, name)?;
            let mut found = None;
            for (i, item) in items.iter().enumerate() {
                if interp.call_function(&f, indexed(i, item))?.is_truthy() {
                    found = Some((i, item.clone()));
                    break;
                }
            }
            match (name, found) {
                ("find", Some((_, item))) => item,
                ("find", None) => Value::Undefined,
                (_, Some((i, _))) => Value::Number(i as f64),
                (_, None) => Value::Number(-1.0),
            }
        }
        "some" | "every" => {
            let f = callback(&args, name)?;
            let want = name == "some";
            let mut result = !want;
            for (i, item) in items.iter().enumerate() {
                if interp.call_function(&f, indexed(i, item))?.is_truthy() == want {
                    result = want;
                    break;
                }
            }
            Value::Bool(result)
        }
        "forEach" => {
            let f = callback(&args, name)?;
            for (i, item) in items.iter().enumerate() {
                interp.call_function(&f, indexed(i, item))?;
            }
            Value::Undefined
        }
        "reduce" => {
            let f = callback(&args, name)?;
            let mut iter = items.iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some((_, first)) => first.clone(),
                    None => {
                        return Err(ExprError::Runtime(
                            "Reduce of empty array with no initial value".to_string(),
                        ))
                    }
                },
            };
            for (i, item) in iter {
                acc = interp.call_function(&f, vec![acc, item.clone(), Value::Number(i as f64)])?;
            }
            acc
        }
        "includes" => {
            let needle = arg(&args, 0);
            Value::Bool(items.iter().any(|item| item.strict_equals(&needle)))
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            Value::Number(
                items
                    .iter()
                    .position(|item| item.strict_equals(&needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            )
        }
        "join" | "toString" => {
            let sep = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(sep) if name == "join" => sep.to_js_string(),
                Some(_) => ",".to_string(),
            };
            Value::String(
                items
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(&sep),
            )
        }
        "slice" => {
            let start = relative_index(args.first(), items.len(), 0);
            let end = relative_index(args.get(1), items.len(), items.len());
            Value::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            })
        }
        "concat" => {
            let mut out = items.to_vec();
            for value in args {
                match value {
                    Value::Array(more) => out.extend(more),
                    other => out.push(other),
                }
            }
            Value::Array(out)
        }
        // Push on a temporary: the result is the length the copy would have.
        "push" => Value::Number((items.len() + args.len()) as f64),
        other => return Err(ExprError::NotCallable(format!("array.{other}"))),
    };
    Ok(value)
}

fn number_method(n: f64, name: &str, args: &[Value]) -> ExprResult<Value> {
    match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() {
                0
            } else {
                digits.clamp(0.0, 100.0) as usize
            };
            Ok(Value::String(format!("{n:.digits$}")))
        }
        "toString" => Ok(Value::String(Value::Number(n).to_js_string())),
        other => Err(ExprError::NotCallable(format!("number.{other}"))),
    }
}
