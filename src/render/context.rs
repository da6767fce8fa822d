//! Per-render mutable state.
//!
//! A [`RenderContext`] is created at render start and owned by exactly one
//! render: the scope stack, loop frames, counters, and guard state are never
//! shared across concurrent renders. Parsed templates and options are the
//! sharable pieces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::encode::TextEncoder;
use crate::error::{Error, Result};
use crate::loader::{TemplateCache, TemplateLoader};
use crate::options::{Culture, TemplateOptions};
use crate::parser::Parser;
use crate::value::accessor::{self, AccessorRegistry};
use crate::value::{convert, Number, ObjectRef, Value};

/// Cooperative cancellation signal, checked at statement boundaries and
/// loop iterations.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ForLoopFrame {
    pub length: usize,
    pub index0: usize,
}

/// Scope state swapped out while a `{% render %}` child runs isolated.
pub(crate) struct IsolatedState {
    scopes: Vec<HashMap<String, Value>>,
    loops: Vec<ForLoopFrame>,
    counters: HashMap<String, i64>,
    cycles: HashMap<String, usize>,
}

pub struct RenderContext {
    scopes: Vec<HashMap<String, Value>>,
    loops: Vec<ForLoopFrame>,
    /// `increment`/`decrement` counters live in their own namespace,
    /// independent of assigned variables.
    counters: HashMap<String, i64>,
    cycles: HashMap<String, usize>,
    model: Value,
    options: Arc<TemplateOptions>,
    accessors: AccessorRegistry,
    parser: Arc<Parser>,
    loader: Option<Arc<dyn TemplateLoader>>,
    partials: TemplateCache,
    cancellation: CancellationToken,
    steps: usize,
    iterations: usize,
    include_depth: usize,
    include_chain: Vec<String>,
}

impl RenderContext {
    /// Context over a host data model with default options.
    pub fn new(model: JsonValue) -> Self {
        Self::with_options(model, Arc::new(TemplateOptions::default()))
    }

    pub fn with_options(model: JsonValue, options: Arc<TemplateOptions>) -> Self {
        let model = convert::classify(&model, &options.converters);
        Self::with_value_model(model, options)
    }

    /// Context over a model that is already a runtime value.
    pub fn with_value_model(model: Value, options: Arc<TemplateOptions>) -> Self {
        let parser = Arc::new(Parser::with_options(&options));
        Self {
            scopes: vec![HashMap::new()],
            loops: Vec::new(),
            counters: HashMap::new(),
            cycles: HashMap::new(),
            model,
            options,
            accessors: AccessorRegistry::new(),
            parser,
            loader: None,
            partials: TemplateCache::new(false),
            cancellation: CancellationToken::new(),
            steps: 0,
            iterations: 0,
            include_depth: 0,
            include_chain: Vec::new(),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn TemplateLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_parser(mut self, parser: Arc<Parser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The context-level accessor layer; it overrides the options layer.
    pub fn accessors_mut(&mut self) -> &mut AccessorRegistry {
        &mut self.accessors
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    pub fn culture(&self) -> &Culture {
        &self.options.culture
    }

    pub fn timezone(&self) -> FixedOffset {
        self.options.timezone
    }

    /// Current time, honoring the options clock override.
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.options
            .now
            .unwrap_or_else(|| Utc::now().with_timezone(&self.options.timezone))
    }

    pub fn encoder(&self) -> &dyn TextEncoder {
        &*self.options.encoder
    }

    pub fn model(&self) -> &Value {
        &self.model
    }

    pub(crate) fn parser(&self) -> Arc<Parser> {
        Arc::clone(&self.parser)
    }

    pub(crate) fn loader(&self) -> Option<Arc<dyn TemplateLoader>> {
        self.loader.clone()
    }

    pub(crate) fn partials(&self) -> TemplateCache {
        self.partials.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    // --- scope stack ---

    pub fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Writes into the innermost scope.
    pub fn set_value(&mut self, name: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Reads outward through the scope stack.
    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    /// Identifier resolution order: scopes, then the `forloop` object, then
    /// the model. Unresolved names are `Nil`, not errors; objects in the
    /// model resolve through the accessor layers.
    pub(crate) async fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.get_value(name) {
            return value;
        }
        if name == "forloop" {
            if !self.loops.is_empty() {
                return self.forloop_value(self.loops.len());
            }
            return Value::Nil;
        }
        match &self.model {
            Value::Object(obj) => self.resolve_object_member(obj, name).await,
            model => model.builtin_member(name),
        }
    }

    pub(crate) async fn resolve_object_member(&self, obj: &ObjectRef, name: &str) -> Value {
        accessor::resolve_member(
            &[&self.accessors, &self.options.accessors],
            self.options.member_access,
            obj,
            name,
        )
        .await
    }

    // --- loop frames ---

    pub(crate) fn push_loop(&mut self, length: usize) {
        self.loops.push(ForLoopFrame { length, index0: 0 });
    }

    pub(crate) fn set_loop_index(&mut self, index0: usize) {
        if let Some(frame) = self.loops.last_mut() {
            frame.index0 = index0;
        }
    }

    pub(crate) fn pop_loop(&mut self) {
        self.loops.pop();
    }

    fn forloop_value(&self, depth: usize) -> Value {
        let frame = self.loops[depth - 1];
        let mut map = IndexMap::new();
        let index0 = frame.index0 as i64;
        let length = frame.length as i64;
        map.insert("index".into(), Value::number(Number::from_i64(index0 + 1)));
        map.insert("index0".into(), Value::number(Number::from_i64(index0)));
        map.insert("rindex".into(), Value::number(Number::from_i64(length - index0)));
        map.insert(
            "rindex0".into(),
            Value::number(Number::from_i64(length - index0 - 1)),
        );
        map.insert("first".into(), Value::Bool(frame.index0 == 0));
        map.insert("last".into(), Value::Bool(frame.index0 + 1 == frame.length));
        map.insert("length".into(), Value::number(Number::from_i64(length)));
        if depth > 1 {
            map.insert("parentloop".into(), self.forloop_value(depth - 1));
        }
        Value::dictionary(map)
    }

    // --- counters and cycles ---

    /// Returns the counter's current value and advances it. Counters start
    /// at zero and are independent of assigned variables.
    pub(crate) fn increment(&mut self, name: &str) -> i64 {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        let current = *counter;
        *counter += 1;
        current
    }

    /// Decrements first, then returns, so the first emission is `-1`.
    pub(crate) fn decrement(&mut self, name: &str) -> i64 {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        *counter -= 1;
        *counter
    }

    /// Returns the position for this hit of a cycle group and advances it.
    pub(crate) fn cycle_next(&mut self, key: String, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let position = self.cycles.entry(key).or_insert(0);
        let current = *position;
        *position = (current + 1) % len;
        current
    }

    // --- guards ---

    pub(crate) fn count_step(&mut self) -> Result<()> {
        self.steps += 1;
        match self.options.max_steps {
            Some(max) if self.steps > max => Err(Error::StepLimit(max)),
            _ => Ok(()),
        }
    }

    pub(crate) fn count_iteration(&mut self) -> Result<()> {
        self.iterations += 1;
        match self.options.max_iterations {
            Some(max) if self.iterations > max => Err(Error::IterationLimit(max)),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_output(&self, written: usize) -> Result<()> {
        match self.options.max_output {
            Some(max) if written > max => Err(Error::OutputLimit(max)),
            _ => Ok(()),
        }
    }

    /// Depth and cycle guard for `include`/`render`. Balanced by
    /// [`Self::exit_include`].
    pub(crate) fn enter_include(&mut self, name: &str) -> Result<()> {
        if self.include_depth >= self.options.max_recursion {
            return Err(Error::RecursionLimit(self.options.max_recursion));
        }
        if self.include_chain.iter().any(|entry| entry == name) {
            return Err(Error::CyclicInclude(name.to_string()));
        }
        self.include_depth += 1;
        self.include_chain.push(name.to_string());
        Ok(())
    }

    pub(crate) fn exit_include(&mut self) {
        self.include_depth = self.include_depth.saturating_sub(1);
        self.include_chain.pop();
    }

    // --- render isolation ---

    /// Swaps in fresh scope state for an isolated child render. Guard
    /// counters stay shared so limits hold across the whole render.
    pub(crate) fn isolate(&mut self) -> IsolatedState {
        IsolatedState {
            scopes: std::mem::replace(&mut self.scopes, vec![HashMap::new()]),
            loops: std::mem::take(&mut self.loops),
            counters: std::mem::take(&mut self.counters),
            cycles: std::mem::take(&mut self.cycles),
        }
    }

    pub(crate) fn restore(&mut self, saved: IsolatedState) {
        self.scopes = saved.scopes;
        self.loops = saved.loops;
        self.counters = saved.counters;
        self.cycles = saved.cycles;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_reads_search_outward() {
        let mut ctx = RenderContext::new(json!({}));
        ctx.set_value("a", Value::from(1));
        ctx.enter_scope();
        assert_eq!(ctx.get_value("a"), Some(Value::from(1)));
        ctx.set_value("a", Value::from(2));
        assert_eq!(ctx.get_value("a"), Some(Value::from(2)));
        ctx.exit_scope();
        assert_eq!(ctx.get_value("a"), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_model() {
        let ctx = RenderContext::new(json!({"name": "World"}));
        assert_eq!(ctx.lookup("name").await, Value::str("World"));
        assert_eq!(ctx.lookup("missing").await, Value::Nil);
    }

    #[test]
    fn test_counters_are_independent() {
        let mut ctx = RenderContext::new(json!({}));
        ctx.set_value("n", Value::from(100));
        assert_eq!(ctx.increment("n"), 0);
        assert_eq!(ctx.increment("n"), 1);
        assert_eq!(ctx.decrement("m"), -1);
        // The assigned variable is untouched.
        assert_eq!(ctx.get_value("n"), Some(Value::from(100)));
    }

    #[test]
    fn test_forloop_parentloop() {
        let mut ctx = RenderContext::new(json!({}));
        ctx.push_loop(3);
        ctx.set_loop_index(1);
        ctx.push_loop(2);
        ctx.set_loop_index(0);
        let forloop = ctx.forloop_value(ctx.loops.len());
        assert_eq!(forloop.builtin_member("index"), Value::from(1));
        assert_eq!(forloop.builtin_member("length"), Value::from(2));
        let parent = forloop.builtin_member("parentloop");
        assert_eq!(parent.builtin_member("index"), Value::from(2));
        assert_eq!(parent.builtin_member("rindex"), Value::from(2));
    }

    #[test]
    fn test_include_guards() {
        let options = Arc::new(TemplateOptions::new().with_max_recursion(2));
        let mut ctx = RenderContext::with_options(json!({}), options);
        ctx.enter_include("a").unwrap();
        ctx.enter_include("b").unwrap();
        assert!(matches!(
            ctx.enter_include("c"),
            Err(Error::RecursionLimit(2))
        ));
        ctx.exit_include();
        assert!(matches!(
            ctx.enter_include("a"),
            Err(Error::CyclicInclude(_))
        ));
    }

    #[test]
    fn test_isolation_swaps_scopes() {
        let mut ctx = RenderContext::new(json!({}));
        ctx.set_value("x", Value::from(1));
        let saved = ctx.isolate();
        assert_eq!(ctx.get_value("x"), None);
        ctx.set_value("y", Value::from(2));
        ctx.restore(saved);
        assert_eq!(ctx.get_value("x"), Some(Value::from(1)));
        assert_eq!(ctx.get_value("y"), None);
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let ctx = RenderContext::new(json!({})).with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
