//! Runtime values produced while interpreting an expression.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Number, Value as JsonValue};

use crate::ast::ArrowBody;
use crate::interpreter::FrameRef;

/// A runtime value.
///
/// Mirrors the value space of the binding language: JSON data plus
/// `undefined` and callable values. Objects and arrays are owned, so copying
/// a value out of a scope never aliases the scope.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Function(Rc<Function>),
}

/// A callable value.
pub enum Function {
    /// An arrow function with its captured frame.
    Closure {
        params: Vec<String>,
        body: ArrowBody,
        env: FrameRef,
    },
    /// A built-in method bound to its receiver, e.g. `"abc".toUpperCase`.
    Method { receiver: Value, name: String },
    /// A free built-in such as `Math.round` or `String`.
    Global(&'static str),
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Closure { params, .. } => write!(f, "Closure({})", params.join(", ")),
            Function::Method { name, .. } => write!(f, "Method({name})"),
            Function::Global(name) => write!(f, "Global({name})"),
        }
    }
}

impl Value {
    /// Convert JSON data into a runtime value.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Object(object_from_json(map)),
        }
    }

    /// Convert back into JSON.
    ///
    /// Returns `None` for `undefined` and functions. Nested `undefined`
    /// array entries become `null` and undefined object fields are dropped,
    /// the same way `JSON.stringify` treats them.
    pub fn to_json(&self) -> Option<JsonValue> {
        match self {
            Value::Undefined | Value::Function(_) => None,
            Value::Null => Some(JsonValue::Null),
            Value::Bool(b) => Some(JsonValue::Bool(*b)),
            Value::Number(n) => Some(number_to_json(*n)),
            Value::String(s) => Some(JsonValue::String(s.clone())),
            Value::Array(items) => Some(JsonValue::Array(
                items
                    .iter()
                    .map(|v| v.to_json().unwrap_or(JsonValue::Null))
                    .collect(),
            )),
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    if let Some(json) = v.to_json() {
                        out.insert(k.clone(), json);
                    }
                }
                Some(JsonValue::Object(out))
            }
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// JavaScript truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// String conversion following `String(value)`.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(_) => "function".to_string(),
        }
    }

    /// Numeric conversion following `Number(value)`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// Property read. Reads on `undefined`/`null` yield `undefined`.
    pub fn get_property(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.get(key).cloned().unwrap_or_default(),
            Value::Array(items) => {
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default()
            }
            Value::String(s) => {
                if key == "length" {
                    return Value::Number(s.chars().count() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default()
            }
            _ => Value::Undefined,
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            // Composite values are compared by identity; copies are never identical.
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if matches!(self, Value::Array(_) | Value::Object(_))
                    || matches!(other, Value::Array(_) | Value::Object(_))
                {
                    return false;
                }
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Convert a JSON object into runtime object storage.
pub fn object_from_json(map: &Map<String, JsonValue>) -> BTreeMap<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v)))
        .collect()
}

fn number_to_json(n: f64) -> JsonValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return JsonValue::Number(Number::from(n as i64));
    }
    Number::from_f64(n)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Format a number the way JavaScript prints it for common values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_integers_back_to_integer_json() {
        let value = Value::from_json(&json!({"count": 3, "ratio": 0.5}));
        assert_eq!(value.to_json(), Some(json!({"count": 3, "ratio": 0.5})));
    }

    #[test]
    fn undefined_has_no_json_form() {
        assert_eq!(Value::Undefined.to_json(), None);
        let arr = Value::Array(vec![Value::Undefined, Value::Number(1.0)]);
        assert_eq!(arr.to_json(), Some(json!([null, 1])));
    }

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn loose_equality_coerces_numbers_and_strings() {
        assert!(Value::from("1").loose_equals(&Value::Number(1.0)));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
        assert!(!Value::from("1").strict_equals(&Value::Number(1.0)));
    }

    #[test]
    fn formats_numbers_like_javascript() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }
}
