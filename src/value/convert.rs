//! Classification of host data into runtime values.
//!
//! Conversion follows an ordered chain: registered converters run first, in
//! registration order; the first one that answers wins. A converter may
//! produce a final runtime value or substitute a different host value, in
//! which case classification restarts on the substitute. Values that no
//! converter claims are dispatched on their JSON shape.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::{Number, Value};

/// Outcome of a single value converter.
pub enum Converted {
    /// Terminal: use this runtime value.
    Value(Value),
    /// Restart classification on a substitute host value.
    Substitute(JsonValue),
}

/// A host-value-to-runtime-value converter. Returning `None` passes the
/// value to the next converter in the chain.
pub type ValueConverter = Box<dyn Fn(&JsonValue) -> Option<Converted> + Send + Sync>;

// Substitution chains are user input; bound them instead of recursing
// forever on a converter that substitutes its own output.
const MAX_SUBSTITUTIONS: usize = 8;

pub fn classify(host: &JsonValue, converters: &[ValueConverter]) -> Value {
    let mut current = std::borrow::Cow::Borrowed(host);
    for _ in 0..MAX_SUBSTITUTIONS {
        match run_converters(&current, converters) {
            Some(Converted::Value(value)) => return value,
            Some(Converted::Substitute(substitute)) => {
                current = std::borrow::Cow::Owned(substitute);
            }
            None => return classify_shape(&current, converters),
        }
    }
    log::warn!("value converter substitution chain exceeded {MAX_SUBSTITUTIONS} steps");
    classify_shape(&current, converters)
}

fn run_converters(host: &JsonValue, converters: &[ValueConverter]) -> Option<Converted> {
    converters.iter().find_map(|convert| convert(host))
}

fn classify_shape(host: &JsonValue, converters: &[ValueConverter]) -> Value {
    match host {
        JsonValue::Null => Value::Nil,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            // Integers keep scale zero; floats get their natural scale.
            if let Some(i) = n.as_i64() {
                Value::number(Number::from_i64(i))
            } else if let Some(u) = n.as_u64() {
                Number::parse(&u.to_string())
                    .map(Value::number)
                    .unwrap_or(Value::Nil)
            } else {
                Value::number(Number::from_f64(n.as_f64().unwrap_or(0.0)))
            }
        }
        JsonValue::String(s) => Value::str(s.clone()),
        JsonValue::Array(items) => {
            Value::array(items.iter().map(|item| classify(item, converters)).collect())
        }
        JsonValue::Object(map) => {
            let mut dict = IndexMap::with_capacity(map.len());
            for (key, value) in map {
                dict.insert(key.clone(), classify(value, converters));
            }
            Value::dictionary(dict)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_dispatch() {
        assert_eq!(classify(&json!(null), &[]), Value::Nil);
        assert_eq!(classify(&json!(true), &[]), Value::Bool(true));
        assert_eq!(classify(&json!(42), &[]), Value::from(42));
        assert_eq!(classify(&json!("hi"), &[]), Value::str("hi"));
        assert_eq!(
            classify(&json!([1, "a"]), &[]),
            Value::array(vec![Value::from(1), Value::str("a")])
        );
    }

    #[test]
    fn test_first_converter_wins() {
        let converters: Vec<ValueConverter> = vec![
            Box::new(|v| {
                v.as_str()
                    .filter(|s| *s == "special")
                    .map(|_| Converted::Value(Value::from(1)))
            }),
            Box::new(|v| {
                v.as_str()
                    .filter(|s| *s == "special")
                    .map(|_| Converted::Value(Value::from(2)))
            }),
        ];
        assert_eq!(classify(&json!("special"), &converters), Value::from(1));
        assert_eq!(classify(&json!("plain"), &converters), Value::str("plain"));
    }

    #[test]
    fn test_substitute_restarts_classification() {
        let converters: Vec<ValueConverter> = vec![Box::new(|v| {
            v.as_str()
                .and_then(|s| s.strip_prefix("n:"))
                .map(|rest| Converted::Substitute(json!(rest.parse::<i64>().unwrap_or(0))))
        })];
        assert_eq!(classify(&json!("n:7"), &converters), Value::from(7));
    }

    #[test]
    fn test_substitution_chain_is_bounded() {
        let converters: Vec<ValueConverter> = vec![Box::new(|v| {
            v.as_str().map(|_| Converted::Substitute(json!("again")))
        })];
        // Falls out of the loop and classifies the last substitute by shape.
        assert_eq!(classify(&json!("loop"), &converters), Value::str("again"));
    }
}
