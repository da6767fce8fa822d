//! The evaluator.
//!
//! Renders a statement list front-to-back, writing into the output sink and
//! short-circuiting on non-`Normal` completions. Rendering is cooperative:
//! member access, filter inputs, and child-template loads may suspend, and a
//! render that never hits a pending future completes synchronously. Boxing
//! happens only at the recursion seams, not per statement.

pub mod context;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::ast::{Completion, Expression, IncludeStatement, Statement};
use crate::ast::BinaryOperator;
use crate::error::{Error, Result};
use crate::filters::FilterArgs;
use crate::loader::TemplateKind;
use crate::value::{Number, Value};

pub use context::{CancellationToken, RenderContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Renderer
    }

    /// Renders statements in source order. The cancellation signal is
    /// checked at every statement boundary.
    pub async fn render(
        &self,
        statements: &[Statement],
        ctx: &mut RenderContext,
        out: &mut String,
    ) -> Result<Completion> {
        for statement in statements {
            if ctx.is_cancelled() {
                return Ok(Completion::Terminate);
            }
            ctx.count_step()?;
            let completion = self.render_statement(statement, ctx, out).await?;
            ctx.check_output(out.len())?;
            if !completion.is_normal() {
                return Ok(completion);
            }
        }
        Ok(Completion::Normal)
    }

    fn render_boxed<'a>(
        &'a self,
        statements: &'a [Statement],
        ctx: &'a mut RenderContext,
        out: &'a mut String,
    ) -> BoxFuture<'a, Result<Completion>> {
        Box::pin(self.render(statements, ctx, out))
    }

    async fn render_statement(
        &self,
        statement: &Statement,
        ctx: &mut RenderContext,
        out: &mut String,
    ) -> Result<Completion> {
        match statement {
            Statement::Text(text) => {
                out.push_str(text);
                Ok(Completion::Normal)
            }

            Statement::Output(expr) => {
                let value = self.evaluate(expr, ctx).await?;
                self.write_value(&value, ctx, out);
                Ok(Completion::Normal)
            }

            Statement::Assign { name, value } => {
                let value = self.evaluate(value, ctx).await?;
                ctx.set_value(name.clone(), value);
                Ok(Completion::Normal)
            }

            Statement::Capture { name, body } => {
                let mut buffer = String::new();
                let completion = self.render_boxed(body, ctx, &mut buffer).await?;
                // The buffer already went through the encoder; mark it so
                // outputting the variable later does not encode twice.
                ctx.set_value(name.clone(), Value::encoded_str(buffer));
                Ok(completion)
            }

            Statement::Increment(name) => {
                let value = ctx.increment(name);
                out.push_str(&value.to_string());
                Ok(Completion::Normal)
            }

            Statement::Decrement(name) => {
                let value = ctx.decrement(name);
                out.push_str(&value.to_string());
                Ok(Completion::Normal)
            }

            Statement::Cycle { group, values } => {
                let mut evaluated = Vec::with_capacity(values.len());
                for value in values {
                    evaluated.push(self.evaluate(value, ctx).await?);
                }
                // Named groups share a position regardless of their value
                // lists; unnamed cycles are keyed by the rendered values.
                let key = match group {
                    Some(group) => {
                        let group = self.evaluate(group, ctx).await?;
                        format!("\u{1}{}", group.to_display(ctx.culture()))
                    }
                    None => evaluated
                        .iter()
                        .map(|v| v.to_display(ctx.culture()))
                        .collect::<Vec<_>>()
                        .join("\u{1}"),
                };
                let index = ctx.cycle_next(key, evaluated.len());
                if let Some(value) = evaluated.get(index) {
                    self.write_value(value, ctx, out);
                }
                Ok(Completion::Normal)
            }

            Statement::If {
                branches,
                else_body,
            } => {
                for branch in branches {
                    let condition = self.evaluate(&branch.condition, ctx).await?;
                    if condition.to_bool() {
                        return self.render_boxed(&branch.body, ctx, out).await;
                    }
                }
                match else_body {
                    Some(body) => self.render_boxed(body, ctx, out).await,
                    None => Ok(Completion::Normal),
                }
            }

            Statement::Unless {
                condition,
                body,
                else_body,
            } => {
                let condition = self.evaluate(condition, ctx).await?;
                if !condition.to_bool() {
                    self.render_boxed(body, ctx, out).await
                } else {
                    match else_body {
                        Some(body) => self.render_boxed(body, ctx, out).await,
                        None => Ok(Completion::Normal),
                    }
                }
            }

            Statement::Case {
                subject,
                whens,
                else_body,
            } => {
                let subject = self.evaluate(subject, ctx).await?;
                for when in whens {
                    for matcher in &when.matches {
                        let candidate = self.evaluate(matcher, ctx).await?;
                        if candidate == subject {
                            return self.render_boxed(&when.body, ctx, out).await;
                        }
                    }
                }
                match else_body {
                    Some(body) => self.render_boxed(body, ctx, out).await,
                    None => Ok(Completion::Normal),
                }
            }

            Statement::For(for_stmt) => {
                let source = self.evaluate(&for_stmt.source, ctx).await?;
                let offset = match &for_stmt.offset {
                    Some(expr) => self.evaluate(expr, ctx).await?.to_number().to_i64().max(0) as usize,
                    None => 0,
                };
                let limit = match &for_stmt.limit {
                    Some(expr) => {
                        Some(self.evaluate(expr, ctx).await?.to_number().to_i64().max(0) as usize)
                    }
                    None => None,
                };
                let items = source.slice_items(offset, limit, for_stmt.reversed);

                if items.is_empty() {
                    return match &for_stmt.else_body {
                        Some(body) => self.render_boxed(body, ctx, out).await,
                        None => Ok(Completion::Normal),
                    };
                }

                ctx.enter_scope();
                ctx.push_loop(items.len());
                let mut result = Completion::Normal;
                for (index, item) in items.into_iter().enumerate() {
                    if ctx.is_cancelled() {
                        result = Completion::Terminate;
                        break;
                    }
                    if let Err(err) = ctx.count_iteration() {
                        ctx.pop_loop();
                        ctx.exit_scope();
                        return Err(err);
                    }
                    ctx.set_loop_index(index);
                    ctx.set_value(for_stmt.var.clone(), item);
                    match self.render_boxed(&for_stmt.body, ctx, out).await {
                        Ok(Completion::Normal) | Ok(Completion::Continue) => {}
                        Ok(Completion::Break) => break,
                        Ok(Completion::Terminate) => {
                            result = Completion::Terminate;
                            break;
                        }
                        Err(err) => {
                            ctx.pop_loop();
                            ctx.exit_scope();
                            return Err(err);
                        }
                    }
                }
                ctx.pop_loop();
                ctx.exit_scope();
                Ok(result)
            }

            Statement::TableRow(row_stmt) => {
                let source = self.evaluate(&row_stmt.source, ctx).await?;
                let offset = match &row_stmt.offset {
                    Some(expr) => self.evaluate(expr, ctx).await?.to_number().to_i64().max(0) as usize,
                    None => 0,
                };
                let limit = match &row_stmt.limit {
                    Some(expr) => {
                        Some(self.evaluate(expr, ctx).await?.to_number().to_i64().max(0) as usize)
                    }
                    None => None,
                };
                let items = source.slice_items(offset, limit, false);
                let cols = match &row_stmt.cols {
                    Some(expr) => {
                        (self.evaluate(expr, ctx).await?.to_number().to_i64().max(1)) as usize
                    }
                    None => items.len().max(1),
                };

                ctx.enter_scope();
                out.push_str("<tr class=\"row1\">\n");
                let length = items.len();
                let mut result = Completion::Normal;
                for (index, item) in items.into_iter().enumerate() {
                    if ctx.is_cancelled() {
                        result = Completion::Terminate;
                        break;
                    }
                    if let Err(err) = ctx.count_iteration() {
                        ctx.exit_scope();
                        return Err(err);
                    }
                    let col0 = index % cols;
                    let row = index / cols + 1;
                    if col0 == 0 && index > 0 {
                        out.push_str(&format!("</tr>\n<tr class=\"row{row}\">\n"));
                    }
                    out.push_str(&format!("<td class=\"col{}\">", col0 + 1));
                    ctx.set_value(row_stmt.var.clone(), item);
                    ctx.set_value(
                        "tablerowloop",
                        tablerowloop_value(index, length, col0, cols, row),
                    );
                    let completion = self.render_boxed(&row_stmt.body, ctx, out).await;
                    out.push_str("</td>");
                    match completion {
                        Ok(Completion::Normal) | Ok(Completion::Continue) => {}
                        Ok(Completion::Break) => break,
                        Ok(Completion::Terminate) => {
                            result = Completion::Terminate;
                            break;
                        }
                        Err(err) => {
                            ctx.exit_scope();
                            return Err(err);
                        }
                    }
                }
                out.push_str("</tr>\n");
                ctx.exit_scope();
                Ok(result)
            }

            Statement::Break => Ok(Completion::Break),
            Statement::Continue => Ok(Completion::Continue),
            Statement::Comment => Ok(Completion::Normal),

            Statement::Include(include) => self.render_include(include, ctx, out).await,
            Statement::Render(render) => self.render_isolated(render, ctx, out).await,
        }
    }

    /// `include` shares the parent scope: parameters and the `with` binding
    /// go into a nested scope over it.
    async fn render_include(
        &self,
        include: &IncludeStatement,
        ctx: &mut RenderContext,
        out: &mut String,
    ) -> Result<Completion> {
        let name = self.evaluate(&include.name, ctx).await?.to_display(ctx.culture());
        let statements = self.load_partial(&name, ctx).await?;
        ctx.enter_include(&name)?;
        ctx.enter_scope();

        let completion = async {
            for (param, expr) in &include.params {
                let value = self.evaluate(expr, ctx).await?;
                ctx.set_value(param.clone(), value);
            }
            if let Some(with) = &include.with {
                let value = self.evaluate(with, ctx).await?;
                ctx.set_value(template_base_name(&name), value);
            }
            self.render_boxed(&statements, ctx, out).await
        }
        .await;

        ctx.exit_scope();
        ctx.exit_include();
        completion
    }

    /// `render` isolates the parent scope: the child sees only its explicit
    /// parameters and the model. `Break`/`Continue` do not cross the
    /// isolation boundary.
    async fn render_isolated(
        &self,
        render: &IncludeStatement,
        ctx: &mut RenderContext,
        out: &mut String,
    ) -> Result<Completion> {
        let name = self.evaluate(&render.name, ctx).await?.to_display(ctx.culture());
        let statements = self.load_partial(&name, ctx).await?;

        let mut bound = Vec::with_capacity(render.params.len() + 1);
        for (param, expr) in &render.params {
            bound.push((param.clone(), self.evaluate(expr, ctx).await?));
        }
        if let Some(with) = &render.with {
            let value = self.evaluate(with, ctx).await?;
            bound.push((template_base_name(&name), value));
        }

        ctx.enter_include(&name)?;
        let saved = ctx.isolate();
        for (param, value) in bound {
            ctx.set_value(param, value);
        }
        let completion = self.render_boxed(&statements, ctx, out).await;
        ctx.restore(saved);
        ctx.exit_include();

        match completion {
            Ok(Completion::Terminate) => Ok(Completion::Terminate),
            Ok(_) => Ok(Completion::Normal),
            Err(err) => Err(err),
        }
    }

    async fn load_partial(
        &self,
        name: &str,
        ctx: &RenderContext,
    ) -> Result<Arc<Vec<Statement>>> {
        let loader = ctx.loader().ok_or_else(|| {
            Error::loader(format!("no template loader configured, cannot load '{name}'"))
        })?;
        let path = loader.resolve(name, TemplateKind::Partial);
        let parser = ctx.parser();
        ctx.partials().get_or_parse(&path, &*loader, &parser).await
    }

    /// Output statements pass through the encoder exactly once; pre-encoded
    /// strings are written as-is.
    fn write_value(&self, value: &Value, ctx: &RenderContext, out: &mut String) {
        if let Value::Str(s) = value {
            if s.is_encoded() {
                out.push_str(s.as_str());
                return;
            }
        }
        if value.is_nil() {
            return;
        }
        let text = value.to_display(ctx.culture());
        ctx.encoder().encode(out, &text);
    }

    /// Expression evaluation. Only member access, index access, and filter
    /// resolution can suspend; arithmetic and literals never do.
    pub fn evaluate<'a>(
        &'a self,
        expr: &'a Expression,
        ctx: &'a RenderContext,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match expr {
                Expression::Literal(value) => Ok(value.clone()),

                Expression::Identifier(name) => Ok(ctx.lookup(name).await),

                Expression::Member(base, name) => {
                    let base = self.evaluate(base, ctx).await?;
                    match &base {
                        Value::Object(obj) => Ok(ctx.resolve_object_member(obj, name).await),
                        other => Ok(other.builtin_member(name)),
                    }
                }

                Expression::Index(base, index) => {
                    let base = self.evaluate(base, ctx).await?;
                    let index = self.evaluate(index, ctx).await?;
                    match (&base, &index) {
                        (Value::Object(obj), Value::Str(key)) => {
                            Ok(ctx.resolve_object_member(obj, key.as_str()).await)
                        }
                        _ => Ok(base.get_index(&index)),
                    }
                }

                Expression::Range(start, end) => {
                    let start = self.evaluate(start, ctx).await?.to_number().to_i64();
                    let end = self.evaluate(end, ctx).await?.to_number().to_i64();
                    Ok(Value::range(start, end))
                }

                Expression::Filter { input, name, args } => {
                    let input = self.evaluate(input, ctx).await?;
                    let mut filter_args = FilterArgs::new();
                    for arg in args {
                        let value = self.evaluate(&arg.value, ctx).await?;
                        match &arg.name {
                            Some(name) => filter_args.push_named(name.clone(), value),
                            None => filter_args.push(value),
                        }
                    }
                    let filter = ctx
                        .options()
                        .filters
                        .get(name)
                        .ok_or_else(|| Error::MissingFilter(name.clone()))?;
                    filter(input, &filter_args, ctx)
                }

                Expression::Binary { op, left, right } => {
                    match op {
                        BinaryOperator::And => {
                            let left = self.evaluate(left, ctx).await?;
                            if !left.to_bool() {
                                return Ok(Value::Bool(false));
                            }
                            let right = self.evaluate(right, ctx).await?;
                            Ok(Value::Bool(right.to_bool()))
                        }
                        BinaryOperator::Or => {
                            let left = self.evaluate(left, ctx).await?;
                            if left.to_bool() {
                                return Ok(Value::Bool(true));
                            }
                            let right = self.evaluate(right, ctx).await?;
                            Ok(Value::Bool(right.to_bool()))
                        }
                        _ => {
                            let left = self.evaluate(left, ctx).await?;
                            let right = self.evaluate(right, ctx).await?;
                            let result = match op {
                                BinaryOperator::Eq => left == right,
                                BinaryOperator::Ne => left != right,
                                BinaryOperator::Lt => {
                                    matches!(left.compare(&right), Some(std::cmp::Ordering::Less))
                                }
                                BinaryOperator::Le => matches!(
                                    left.compare(&right),
                                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                                ),
                                BinaryOperator::Gt => matches!(
                                    left.compare(&right),
                                    Some(std::cmp::Ordering::Greater)
                                ),
                                BinaryOperator::Ge => matches!(
                                    left.compare(&right),
                                    Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                                ),
                                BinaryOperator::Contains => left.contains(&right),
                                BinaryOperator::And | BinaryOperator::Or => unreachable!(),
                            };
                            Ok(Value::Bool(result))
                        }
                    }
                }
            }
        })
    }
}

fn tablerowloop_value(index: usize, length: usize, col0: usize, cols: usize, row: usize) -> Value {
    let mut map = indexmap::IndexMap::new();
    let as_number = |n: usize| Value::number(Number::from_i64(n as i64));
    map.insert("length".into(), as_number(length));
    map.insert("index".into(), as_number(index + 1));
    map.insert("index0".into(), as_number(index));
    map.insert("rindex".into(), as_number(length - index));
    map.insert("rindex0".into(), as_number(length - index - 1));
    map.insert("first".into(), Value::Bool(index == 0));
    map.insert("last".into(), Value::Bool(index + 1 == length));
    map.insert("col".into(), as_number(col0 + 1));
    map.insert("col0".into(), as_number(col0));
    map.insert("col_first".into(), Value::Bool(col0 == 0));
    map.insert("col_last".into(), Value::Bool(col0 + 1 == cols));
    map.insert("row".into(), as_number(row));
    Value::dictionary(map)
}

fn template_base_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.split('.').next().unwrap_or(base).to_string()
}
