//! The compiled template.
//!
//! A [`Template`] is the immutable result of parsing: an ordered statement
//! list behind an `Arc`, safe to share across concurrent renders. Parsing
//! happens once; rendering many times against fresh contexts.

use std::sync::Arc;

use crate::ast::{Completion, Statement};
use crate::error::{Error, Result};
use crate::parser::Parser;
use crate::render::{RenderContext, Renderer};

#[derive(Debug, Clone)]
pub struct Template {
    statements: Arc<Vec<Statement>>,
}

impl Template {
    /// Parses with the default tag set.
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with(source, &Parser::new())
    }

    /// Parses with a configured parser (custom tags, parser switches).
    pub fn parse_with(source: &str, parser: &Parser) -> Result<Self> {
        Ok(Self {
            statements: Arc::new(parser.parse(source)?),
        })
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub async fn render(&self, ctx: &mut RenderContext) -> Result<String> {
        let mut out = String::new();
        self.render_into(ctx, &mut out).await?;
        Ok(out)
    }

    /// Renders into an existing buffer. A cancelled render surfaces as an
    /// error after the partial output already written.
    pub async fn render_into(&self, ctx: &mut RenderContext, out: &mut String) -> Result<()> {
        let depth = ctx.scope_depth();
        let completion = Renderer::new().render(&self.statements, ctx, out).await?;
        debug_assert_eq!(ctx.scope_depth(), depth, "scope stack must stay balanced");
        if completion == Completion::Terminate && ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::NullEncoder;
    use crate::loader::MemoryLoader;
    use crate::options::TemplateOptions;
    use crate::render::CancellationToken;
    use serde_json::{json, Value as JsonValue};

    async fn render(source: &str, model: JsonValue) -> String {
        Template::parse(source)
            .unwrap()
            .render(&mut RenderContext::new(model))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_hello_world() {
        assert_eq!(
            render("Hello {{ name }}!", json!({"name": "World"})).await,
            "Hello World!"
        );
    }

    #[tokio::test]
    async fn test_loop_with_break() {
        assert_eq!(
            render(
                "{% for i in (1..3) %}{{ i }}{% if i == 2 %}{% break %}{% endif %}{% endfor %}",
                json!({})
            )
            .await,
            "12"
        );
    }

    #[tokio::test]
    async fn test_assign_with_filter_chain() {
        assert_eq!(
            render(
                r#"{% assign xs = "a,b,c" | split: "," %}{{ xs | join: "-" | upcase }}"#,
                json!({})
            )
            .await,
            "A-B-C"
        );
    }

    #[tokio::test]
    async fn test_capture_roundtrip() {
        assert_eq!(
            render(
                "{% capture g %}{{ 'x' | append: 'y' }}{% endcapture %}[{{ g }}]",
                json!({})
            )
            .await,
            "[xy]"
        );
    }

    #[tokio::test]
    async fn test_conditional_index_access() {
        let source = "{% if items.size > 0 %}{{ items[0].n }}{% else %}none{% endif %}";
        assert_eq!(render(source, json!({"items": [{"n": 42}]})).await, "42");
        assert_eq!(render(source, json!({"items": []})).await, "none");
    }

    #[tokio::test]
    async fn test_html_encoding() {
        assert_eq!(
            render("<b>{{ raw }}</b>", json!({"raw": "<i>&</i>"})).await,
            "<b>&lt;i&gt;&amp;&lt;/i&gt;</b>"
        );
    }

    #[tokio::test]
    async fn test_escape_filter_is_not_double_encoded() {
        // The value passes through escaping exactly once, never twice.
        assert_eq!(
            render("{{ s | escape }}", json!({"s": "<b>"})).await,
            "&lt;b&gt;"
        );
    }

    #[tokio::test]
    async fn test_null_encoder_writes_raw() {
        let options =
            Arc::new(TemplateOptions::new().with_encoder(Arc::new(NullEncoder)));
        let mut ctx = RenderContext::with_options(json!({"s": "<b>"}), options);
        let out = Template::parse("{{ s }}")
            .unwrap()
            .render(&mut ctx)
            .await
            .unwrap();
        assert_eq!(out, "<b>");
    }

    #[tokio::test]
    async fn test_empty_template_renders_empty() {
        assert_eq!(render("", json!({})).await, "");
    }

    #[tokio::test]
    async fn test_delimiter_free_text_roundtrips() {
        let text = "plain text, no delimiters: 100% & <tags> 'quotes'";
        assert_eq!(render(text, json!({})).await, text);
    }

    #[tokio::test]
    async fn test_assign_roundtrips_literals() {
        for (literal, expected) in [
            ("'s'", "s"),
            ("42", "42"),
            ("4.20", "4.20"),
            ("true", "true"),
            ("false", "false"),
        ] {
            let source = format!("{{% assign x = {literal} %}}{{{{ x }}}}");
            assert_eq!(render(&source, json!({})).await, expected);
        }
    }

    #[tokio::test]
    async fn test_render_is_pure() {
        // Context-equal inputs produce bit-identical output, repeatedly.
        let template = Template::parse(
            "{% for p in ps %}{{ p.name | upcase }}={{ p.n | times: 2 }};{% endfor %}",
        )
        .unwrap();
        let model = json!({"ps": [{"name": "a", "n": 1}, {"name": "b", "n": 2}]});
        let first = template
            .render(&mut RenderContext::new(model.clone()))
            .await
            .unwrap();
        for _ in 0..3 {
            let again = template
                .render(&mut RenderContext::new(model.clone()))
                .await
                .unwrap();
            assert_eq!(first, again);
        }
        assert_eq!(first, "A=2;B=4;");
    }

    #[tokio::test]
    async fn test_template_is_shareable() {
        let template = Template::parse("{{ n }}").unwrap();
        let clone = template.clone();
        let a = tokio::spawn(async move {
            template
                .render(&mut RenderContext::new(json!({"n": 1})))
                .await
                .unwrap()
        });
        let b = tokio::spawn(async move {
            clone
                .render(&mut RenderContext::new(json!({"n": 2})))
                .await
                .unwrap()
        });
        assert_eq!(a.await.unwrap(), "1");
        assert_eq!(b.await.unwrap(), "2");
    }

    #[tokio::test]
    async fn test_number_scale_preserved_through_render() {
        assert_eq!(
            render("{{ 1.0 }} {{ 1 }} {% if 1.0 == 1 %}eq{% endif %}", json!({})).await,
            "1.0 1 eq"
        );
    }

    #[tokio::test]
    async fn test_cancelled_render_errors() {
        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = RenderContext::new(json!({})).with_cancellation(token);
        let err = Template::parse("x")
            .unwrap()
            .render(&mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_include_through_loader() {
        let loader = Arc::new(
            MemoryLoader::new()
                .with_template("greeting", "Hello {{ name }}")
                .with_template("page", "<{% include 'greeting' %}>"),
        );
        let mut ctx = RenderContext::new(json!({"name": "World"})).with_loader(loader);
        let out = Template::parse("{% include 'page' %}")
            .unwrap()
            .render(&mut ctx)
            .await
            .unwrap();
        assert_eq!(out, "<Hello World>");
    }
}
