//! Engine configuration.
//!
//! [`TemplateOptions`] collects everything a render can be parameterized
//! with: the filter registry, the value-converter chain, host accessors and
//! the access strategy, culture and timezone, the guard limits, and the
//! parser switches. Options are built once and treated as immutable while
//! renders are running.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::encode::{HtmlEncoder, TextEncoder};
use crate::filters::{FilterFn, FilterRegistry};
use crate::value::accessor::{AccessorRegistry, MemberAccessStrategy};
use crate::value::convert::ValueConverter;

/// Number and date formatting conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Culture {
    pub decimal_separator: char,
}

impl Default for Culture {
    fn default() -> Self {
        Culture {
            decimal_separator: '.',
        }
    }
}

pub struct TemplateOptions {
    pub filters: FilterRegistry,
    pub converters: Vec<ValueConverter>,
    pub accessors: AccessorRegistry,
    pub member_access: MemberAccessStrategy,
    pub culture: Culture,
    pub timezone: FixedOffset,
    /// Clock override for the `date` filter and `now` keyword.
    pub now: Option<DateTime<FixedOffset>>,
    pub encoder: Arc<dyn TextEncoder>,
    /// Include/render nesting limit.
    pub max_recursion: usize,
    /// Statement budget per render. `None` is unlimited.
    pub max_steps: Option<usize>,
    /// Iteration budget per render across all loops. `None` is unlimited.
    pub max_iterations: Option<usize>,
    /// Output byte budget per render. `None` is unlimited.
    pub max_output: Option<usize>,
    /// Permit tag arguments to span newlines.
    pub greedy_parser: bool,
    /// Default whitespace stripping around `{{ }}`.
    pub trim_output: bool,
    /// Default whitespace stripping around `{% %}`.
    pub trim_tags: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            filters: FilterRegistry::with_builtins(),
            converters: Vec::new(),
            accessors: AccessorRegistry::new(),
            member_access: MemberAccessStrategy::default(),
            culture: Culture::default(),
            timezone: Utc.fix(),
            now: None,
            encoder: Arc::new(HtmlEncoder),
            max_recursion: 100,
            max_steps: None,
            max_iterations: None,
            max_output: None,
            greedy_parser: true,
            trim_output: false,
            trim_tags: false,
        }
    }
}

impl TemplateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, name: impl Into<String>, filter: FilterFn) -> Self {
        self.filters.register(name, filter);
        self
    }

    pub fn with_converter(mut self, converter: ValueConverter) -> Self {
        self.converters.push(converter);
        self
    }

    pub fn with_member_access(mut self, strategy: MemberAccessStrategy) -> Self {
        self.member_access = strategy;
        self
    }

    pub fn with_culture(mut self, culture: Culture) -> Self {
        self.culture = culture;
        self
    }

    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_now(mut self, now: DateTime<FixedOffset>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn TextEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_max_recursion(mut self, limit: usize) -> Self {
        self.max_recursion = limit;
        self
    }

    pub fn with_max_steps(mut self, limit: usize) -> Self {
        self.max_steps = Some(limit);
        self
    }

    pub fn with_max_iterations(mut self, limit: usize) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    pub fn with_max_output(mut self, limit: usize) -> Self {
        self.max_output = Some(limit);
        self
    }

    pub fn with_greedy_parser(mut self, greedy: bool) -> Self {
        self.greedy_parser = greedy;
        self
    }

    pub fn with_trim_output(mut self, trim: bool) -> Self {
        self.trim_output = trim;
        self
    }

    pub fn with_trim_tags(mut self, trim: bool) -> Self {
        self.trim_tags = trim;
        self
    }
}

impl fmt::Debug for TemplateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateOptions")
            .field("member_access", &self.member_access)
            .field("culture", &self.culture)
            .field("timezone", &self.timezone)
            .field("now", &self.now)
            .field("max_recursion", &self.max_recursion)
            .field("max_steps", &self.max_steps)
            .field("max_iterations", &self.max_iterations)
            .field("max_output", &self.max_output)
            .field("greedy_parser", &self.greedy_parser)
            .field("trim_output", &self.trim_output)
            .field("trim_tags", &self.trim_tags)
            .finish_non_exhaustive()
    }
}
