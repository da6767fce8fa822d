//! The polymorphic runtime value.
//!
//! Every expression evaluates to a [`Value`]. The variants share one
//! capability set: truthiness, numeric and string conversion, equality,
//! ordering, member and index access, iteration, and `contains`. Undefined
//! members and indexes resolve to [`Value::Nil`] rather than erroring.

pub mod accessor;
pub mod convert;
pub mod number;

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::options::Culture;
pub use number::Number;

/// A string value plus the marker the evaluator uses to avoid encoding the
/// same text twice. Capture results and `escape` output are pre-encoded.
#[derive(Debug, Clone)]
pub struct StrValue {
    text: Arc<str>,
    encoded: bool,
}

impl StrValue {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded
    }
}

impl PartialEq for StrValue {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

/// Inclusive integer range, enumerated lazily.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn at(&self, index: usize) -> i64 {
        self.start + index as i64
    }
}

type SerializeFn = dyn Fn(&(dyn Any + Send + Sync)) -> Option<JsonValue> + Send + Sync;

/// An opaque host value. Member access goes through the accessor registry;
/// objects constructed with [`Value::object_serializable`] additionally
/// support the serde bridge access strategy.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
    serializer: Option<Arc<SerializeFn>>,
}

impl ObjectRef {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub(crate) fn host(&self) -> &(dyn Any + Send + Sync) {
        &*self.inner
    }

    /// Serializes the host through serde, when the object was constructed
    /// with a serializable type.
    pub fn to_serialized(&self) -> Option<JsonValue> {
        self.serializer.as_ref().and_then(|s| s(&*self.inner))
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef<{}>", self.type_name)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// An invocable value for macro-like tags and host callbacks.
#[derive(Clone)]
pub struct FunctionValue {
    func: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
}

impl FunctionValue {
    pub fn invoke(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FunctionValue")
    }
}

impl PartialEq for FunctionValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    /// The `empty` comparison literal.
    Empty,
    /// The `blank` comparison literal.
    Blank,
    Bool(bool),
    Number(Number),
    Str(StrValue),
    DateTime(DateTime<FixedOffset>),
    Array(Arc<Vec<Value>>),
    Dictionary(Arc<IndexMap<String, Value>>),
    Object(ObjectRef),
    Range(RangeValue),
    Function(FunctionValue),
}

impl Value {
    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(StrValue {
            text: Arc::from(text.into()),
            encoded: false,
        })
    }

    /// A string that has already passed through the output encoder.
    pub fn encoded_str(text: impl Into<String>) -> Value {
        Value::Str(StrValue {
            text: Arc::from(text.into()),
            encoded: true,
        })
    }

    pub fn number(value: impl Into<Number>) -> Value {
        Value::Number(value.into())
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(items))
    }

    pub fn dictionary(map: IndexMap<String, Value>) -> Value {
        Value::Dictionary(Arc::new(map))
    }

    pub fn range(start: i64, end: i64) -> Value {
        Value::Range(RangeValue { start, end })
    }

    /// Wraps a host value as an opaque object. Member access resolves only
    /// through registered accessors.
    pub fn object<T: Any + Send + Sync>(value: T) -> Value {
        Value::Object(ObjectRef {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
            serializer: None,
        })
    }

    /// Wraps a host value that can also be reached through the serde bridge
    /// access strategy.
    pub fn object_serializable<T>(value: T) -> Value
    where
        T: Any + Send + Sync + serde::Serialize,
    {
        Value::Object(ObjectRef {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
            serializer: Some(Arc::new(|host| {
                host.downcast_ref::<T>()
                    .and_then(|v| serde_json::to_value(v).ok())
            })),
        })
    }

    pub fn function<F>(func: F) -> Value
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Value::Function(FunctionValue {
            func: Arc::new(func),
        })
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Empty => "empty",
            Value::Blank => "blank",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
            Value::Dictionary(_) => "dictionary",
            Value::Object(_) => "object",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
        }
    }

    /// Liquid truthiness: only `nil` and `false` are falsy. Empty strings,
    /// empty arrays, and zero are all truthy.
    pub fn to_bool(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Numeric coercion. Never fails: non-numeric input is zero.
    pub fn to_number(&self) -> Number {
        match self {
            Value::Number(n) => *n,
            Value::Str(s) => Number::parse(s.as_str()).unwrap_or(Number::ZERO),
            Value::Bool(true) => Number::from_i64(1),
            _ => Number::ZERO,
        }
    }

    /// String coercion. Never fails: `nil` renders as the empty string.
    pub fn to_display(&self, culture: &Culture) -> String {
        match self {
            Value::Nil | Value::Empty | Value::Blank | Value::Function(_) => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.format(culture),
            Value::Str(s) => s.as_str().to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S %z").to_string(),
            Value::Array(items) => {
                let mut out = String::new();
                for item in items.iter() {
                    out.push_str(&item.to_display(culture));
                }
                out
            }
            Value::Dictionary(_) => serde_json::to_string(&self.to_json()).unwrap_or_default(),
            Value::Object(obj) => match obj.to_serialized() {
                Some(json) => serde_json::to_string(&json).unwrap_or_default(),
                None => String::new(),
            },
            Value::Range(r) => format!("{}..{}", r.start, r.end),
        }
    }

    /// Converts back into host data.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Nil | Value::Empty | Value::Blank | Value::Function(_) => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => {
                if n.is_integer() {
                    JsonValue::Number(n.to_i64().into())
                } else {
                    serde_json::Number::from_f64(n.to_f64())
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null)
                }
            }
            Value::Str(s) => JsonValue::String(s.as_str().to_string()),
            Value::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Dictionary(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map.iter() {
                    out.insert(key.clone(), value.to_json());
                }
                JsonValue::Object(out)
            }
            Value::Object(obj) => obj.to_serialized().unwrap_or(JsonValue::Null),
            Value::Range(r) => {
                JsonValue::Array((r.start..=r.end).map(|i| JsonValue::Number(i.into())).collect())
            }
        }
    }

    /// Member access on the value itself: dictionary keys plus the builtin
    /// `size`/`first`/`last` pseudo-members. Opaque objects resolve through
    /// the accessor registry in the evaluator instead.
    pub fn builtin_member(&self, name: &str) -> Value {
        match self {
            Value::Dictionary(map) => {
                if let Some(v) = map.get(name) {
                    return v.clone();
                }
                match name {
                    "size" => Value::number(Number::from_i64(map.len() as i64)),
                    "first" => map
                        .iter()
                        .next()
                        .map(|(k, v)| Value::array(vec![Value::str(k.clone()), v.clone()]))
                        .unwrap_or(Value::Nil),
                    "last" => map
                        .iter()
                        .last()
                        .map(|(k, v)| Value::array(vec![Value::str(k.clone()), v.clone()]))
                        .unwrap_or(Value::Nil),
                    _ => Value::Nil,
                }
            }
            Value::Array(items) => match name {
                "size" => Value::number(Number::from_i64(items.len() as i64)),
                "first" => items.first().cloned().unwrap_or(Value::Nil),
                "last" => items.last().cloned().unwrap_or(Value::Nil),
                _ => Value::Nil,
            },
            Value::Str(s) => match name {
                "size" => Value::number(Number::from_i64(s.as_str().chars().count() as i64)),
                _ => Value::Nil,
            },
            Value::Range(r) => match name {
                "size" => Value::number(Number::from_i64(r.len() as i64)),
                "first" => Value::number(Number::from_i64(r.start)),
                "last" => Value::number(Number::from_i64(r.end)),
                _ => Value::Nil,
            },
            _ => Value::Nil,
        }
    }

    /// Index access: arrays by integer (negative counts from the end),
    /// dictionaries by key, ranges by position.
    pub fn get_index(&self, index: &Value) -> Value {
        match self {
            Value::Array(items) => {
                let idx = index.to_number().to_i64();
                let len = items.len() as i64;
                let idx = if idx < 0 { len + idx } else { idx };
                if idx < 0 || idx >= len {
                    Value::Nil
                } else {
                    items[idx as usize].clone()
                }
            }
            Value::Dictionary(_) => match index {
                Value::Str(key) => self.builtin_member(key.as_str()),
                _ => Value::Nil,
            },
            Value::Range(r) => {
                let idx = index.to_number().to_i64();
                if idx < 0 || idx as usize >= r.len() {
                    Value::Nil
                } else {
                    Value::number(Number::from_i64(r.at(idx as usize)))
                }
            }
            _ => Value::Nil,
        }
    }

    /// Number of items a loop over this value visits.
    pub fn iteration_len(&self) -> usize {
        match self {
            Value::Array(items) => items.len(),
            Value::Dictionary(map) => map.len(),
            Value::Range(r) => r.len(),
            _ => 0,
        }
    }

    /// Materializes the loop window after `offset`/`limit`/`reversed` have
    /// been applied, so lazy ranges never enumerate past the window.
    /// Dictionary iteration yields `[key, value]` pairs.
    pub fn slice_items(&self, offset: usize, limit: Option<usize>, reversed: bool) -> Vec<Value> {
        let total = self.iteration_len();
        let window = total.saturating_sub(offset).min(limit.unwrap_or(usize::MAX));
        let mut items: Vec<Value> = match self {
            Value::Array(all) => all.iter().skip(offset).take(window).cloned().collect(),
            Value::Dictionary(map) => map
                .iter()
                .skip(offset)
                .take(window)
                .map(|(k, v)| Value::array(vec![Value::str(k.clone()), v.clone()]))
                .collect(),
            Value::Range(r) => (0..window)
                .map(|i| Value::number(Number::from_i64(r.at(offset + i))))
                .collect(),
            _ => Vec::new(),
        };
        if reversed {
            items.reverse();
        }
        items
    }

    /// `contains` operator: substring for strings, element for arrays, key
    /// for dictionaries.
    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Value::Str(s) => {
                let needle = needle.to_display(&Culture::default());
                s.as_str().contains(needle.as_str())
            }
            Value::Array(items) => items.iter().any(|item| item == needle),
            Value::Dictionary(map) => match needle {
                Value::Str(key) => map.contains_key(key.as_str()),
                _ => false,
            },
            _ => false,
        }
    }

    /// Ordering for the comparison operators. Strings compare with numbers
    /// by parsing, mirroring equality.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Number(a), Value::Str(b)) => {
                Number::parse(b.as_str()).and_then(|b| a.partial_cmp(&b))
            }
            (Value::Str(a), Value::Number(b)) => {
                Number::parse(a.as_str()).and_then(|a| a.partial_cmp(b))
            }
            (Value::Str(a), Value::Str(b)) => Some(a.as_str().cmp(b.as_str())),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn is_empty_like(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Str(s) => s.as_str().is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Dictionary(map) => map.is_empty(),
            Value::Range(r) => r.is_empty(),
            _ => false,
        }
    }

    fn is_blank_like(&self) -> bool {
        match self {
            Value::Blank | Value::Nil | Value::Bool(false) => true,
            Value::Str(s) => s.as_str().trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Dictionary(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, _) => other.is_empty_like(),
            (_, Value::Empty) => self.is_empty_like(),
            (Value::Blank, _) => other.is_blank_like(),
            (_, Value::Blank) => self.is_blank_like(),
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            // A number equals a string iff the string parses to the same
            // numeric value.
            (Value::Number(a), Value::Str(b)) => Number::parse(b.as_str()) == Some(*a),
            (Value::Str(a), Value::Number(b)) => Number::parse(a.as_str()) == Some(*b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.as_slice() == b.as_slice(),
            (Value::Dictionary(a), Value::Dictionary(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, va)| b.get(key).is_some_and(|vb| va == vb))
            }
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::number(Number::from_i64(value as i64))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::number(Number::from_i64(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::number(Number::from_i64(value as i64))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::number(Number::from_f64(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::str(value)
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        Value::Number(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::array(value)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::dictionary(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::DateTime(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        convert::classify(&value, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness_law() {
        assert!(!Value::Nil.to_bool());
        assert!(!Value::Bool(false).to_bool());
        // Everything else is truthy, including zero and empty collections.
        assert!(Value::Bool(true).to_bool());
        assert!(Value::number(Number::ZERO).to_bool());
        assert!(Value::str("").to_bool());
        assert!(Value::array(vec![]).to_bool());
    }

    #[test]
    fn test_number_string_equality() {
        assert_eq!(Value::from(3), Value::str("3"));
        assert_eq!(Value::str("3.0"), Value::from(3));
        assert_ne!(Value::str("3x"), Value::from(3));
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(Value::Empty, Value::str(""));
        assert_eq!(Value::Empty, Value::array(vec![]));
        assert_ne!(Value::Empty, Value::Nil);
        assert_eq!(Value::Blank, Value::Nil);
        assert_eq!(Value::Blank, Value::str("  \t"));
        assert_eq!(Value::Blank, Value::Bool(false));
    }

    #[test]
    fn test_dictionary_iteration_yields_pairs() {
        let value: Value = json!({"a": 1, "b": 2}).into();
        let items = value.slice_items(0, None, false);
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            Value::array(vec![Value::str("a"), Value::from(1)])
        );
    }

    #[test]
    fn test_range_window_is_lazy() {
        let range = Value::range(1, 1_000_000);
        let items = range.slice_items(2, Some(3), false);
        assert_eq!(items, vec![Value::from(3), Value::from(4), Value::from(5)]);
    }

    #[test]
    fn test_negative_index() {
        let arr = Value::array(vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(arr.get_index(&Value::from(-1)), Value::from(3));
        assert_eq!(arr.get_index(&Value::from(5)), Value::Nil);
    }

    #[test]
    fn test_contains() {
        assert!(Value::str("hello world").contains(&Value::str("lo w")));
        let arr = Value::array(vec![Value::from(1), Value::str("x")]);
        assert!(arr.contains(&Value::str("x")));
        let dict: Value = json!({"k": 1}).into();
        assert!(dict.contains(&Value::str("k")));
    }

    #[test]
    fn test_coercions_never_fail() {
        assert_eq!(Value::Nil.to_display(&Culture::default()), "");
        assert_eq!(Value::str("abc").to_number(), Number::ZERO);
        assert_eq!(Value::str("4.5").to_number(), Number::parse("4.5").unwrap());
    }

    #[test]
    fn test_object_identity_equality() {
        #[derive(PartialEq)]
        struct Host(i32);
        let a = Value::object(Host(1));
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Value::object(Host(1)));
    }

    #[test]
    fn test_function_value_invokes() {
        let f = Value::function(|args| args.first().cloned().unwrap_or(Value::Nil));
        match f {
            Value::Function(func) => {
                assert_eq!(func.invoke(&[Value::from(7)]), Value::from(7));
            }
            _ => panic!("expected function value"),
        }
    }
}
