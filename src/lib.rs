//! Liquid template engine.
//!
//! Templates compile once into an immutable statement tree and render many
//! times against per-render contexts, with context-sensitive output
//! escaping. Liquid is a safe templating language: templates evaluate a
//! restricted expression grammar, dereference variables through a
//! controlled accessor layer, and may invoke registered filters, but never
//! arbitrary code.
//!
//! ## Architecture
//!
//! Rendering is a two-stage pipeline:
//!
//! 1. **Parse**: the scanner tokenizes text, output, and tag constructs;
//!    the recursive-descent parser builds a statement tree through the tag
//!    registry. Parsing happens once per template.
//! 2. **Render**: the evaluator walks the statement tree against a
//!    [`RenderContext`], writing output incrementally and honoring
//!    `break`/`continue`/termination signals.
//!
//! ## Key components
//!
//! - [`Template`]: parse/render entry point.
//! - [`value::Value`]: the polymorphic runtime value.
//! - [`TemplateOptions`]: filters, converters, accessors, culture, guards.
//! - [`loader::TemplateLoader`]: resolution of `include`/`render` partials.
//!
//! ## Example
//!
//! ```
//! use rill::{RenderContext, Template};
//! use serde_json::json;
//!
//! # futures::executor::block_on(async {
//! let template = Template::parse("Hello {{ name }}!").unwrap();
//! let mut ctx = RenderContext::new(json!({ "name": "World" }));
//! assert_eq!(template.render(&mut ctx).await.unwrap(), "Hello World!");
//! # });
//! ```

pub mod ast;
pub mod encode;
pub mod error;
pub mod filters;
pub mod loader;
pub mod options;
pub mod parser;
pub mod render;
pub mod template;
pub mod value;

pub use ast::{Completion, Expression, Statement};
pub use encode::{HtmlEncoder, NullEncoder, TextEncoder, UrlEncoder};
pub use error::{Error, Result};
pub use filters::{FilterArgs, FilterRegistry};
pub use loader::{FileLoader, MemoryLoader, TemplateKind, TemplateLoader};
pub use options::{Culture, TemplateOptions};
pub use parser::{Parser, TagDefinition, TagRegistry};
pub use render::{CancellationToken, RenderContext, Renderer};
pub use template::Template;
pub use value::{Number, Value};
