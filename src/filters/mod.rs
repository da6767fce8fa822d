//! Named filters.
//!
//! Filters are keyed by name and receive the input value, the argument
//! bundle, and the render context. They may read ambient state (culture,
//! timezone, clock) but never mutate scopes. Registration is
//! last-writer-wins; referencing a missing filter is an evaluation error
//! raised by the evaluator.

mod array;
mod math;
mod misc;
mod string;

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::render::RenderContext;
use crate::value::Value;

pub type FilterFn = Box<dyn Fn(Value, &FilterArgs, &RenderContext) -> Result<Value> + Send + Sync>;

/// Positional and named arguments of one filter application.
#[derive(Default)]
pub struct FilterArgs {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl FilterArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Value) {
        self.positional.push(value);
    }

    pub fn push_named(&mut self, name: String, value: Value) {
        self.named.push((name, value));
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Positional argument or `Nil` when absent.
    pub fn at(&self, index: usize) -> Value {
        self.positional.get(index).cloned().unwrap_or(Value::Nil)
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        string::register(&mut registry);
        array::register(&mut registry);
        math::register(&mut registry);
        misc::register(&mut registry);
        registry
    }

    /// Last writer wins per name.
    pub fn register(&mut self, name: impl Into<String>, filter: FilterFn) {
        self.filters.insert(name.into(), filter);
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Required positional argument, or a filter-argument error naming the
/// filter.
fn require_arg<'a>(args: &'a FilterArgs, filter: &str, index: usize) -> Result<&'a Value> {
    args.get(index).ok_or_else(|| {
        Error::filter_argument(filter, format!("missing required argument {}", index + 1))
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::render::RenderContext;

    /// Applies a registered filter outside a render, for unit tests.
    pub fn apply(name: &str, input: Value, args: Vec<Value>) -> Result<Value> {
        let ctx = RenderContext::new(serde_json::json!({}));
        let mut bundle = FilterArgs::new();
        for arg in args {
            bundle.push(arg);
        }
        let registry = FilterRegistry::with_builtins();
        let filter = registry.get(name).expect("filter not registered");
        filter(input, &bundle, &ctx)
    }

    pub fn apply_named(
        name: &str,
        input: Value,
        args: Vec<Value>,
        named: Vec<(&str, Value)>,
    ) -> Result<Value> {
        let ctx = RenderContext::new(serde_json::json!({}));
        let mut bundle = FilterArgs::new();
        for arg in args {
            bundle.push(arg);
        }
        for (key, value) in named {
            bundle.push_named(key.to_string(), value);
        }
        let registry = FilterRegistry::with_builtins();
        let filter = registry.get(name).expect("filter not registered");
        filter(input, &bundle, &ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_is_last_writer_wins() {
        let mut registry = FilterRegistry::with_builtins();
        assert!(registry.contains("upcase"));
        registry.register("upcase", Box::new(|_, _, _| Ok(Value::str("shadowed"))));
        let ctx = RenderContext::new(serde_json::json!({}));
        let out = registry.get("upcase").unwrap()(Value::str("x"), &FilterArgs::new(), &ctx);
        assert_eq!(out.unwrap(), Value::str("shadowed"));
    }

    #[test]
    fn test_full_builtin_set_is_registered() {
        let registry = FilterRegistry::with_builtins();
        for name in [
            "abs", "append", "at_least", "at_most", "capitalize", "ceil", "compact", "concat",
            "date", "default", "divided_by", "downcase", "escape", "escape_once", "first",
            "floor", "join", "last", "lstrip", "map", "minus", "modulo", "newline_to_br", "plus",
            "prepend", "remove", "remove_first", "replace", "replace_first", "reverse", "round",
            "rstrip", "size", "slice", "sort", "sort_natural", "split", "strip", "strip_html",
            "strip_newlines", "sum", "times", "truncate", "truncatewords", "uniq", "upcase",
            "url_decode", "url_encode", "where",
        ] {
            assert!(registry.contains(name), "missing builtin filter '{name}'");
        }
    }
}
