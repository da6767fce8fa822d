//! Statement and tag parser.
//!
//! Tags are registered in a [`TagRegistry`] with one of four shapes: empty
//! (`{% break %}`), identifier (`{% increment n %}`), simple (grammar
//! callback over the argument tokens), and block (opening tag, body with
//! optional intermediate sub-tags, closing `{% endname %}`). Registering a
//! tag mutates the parser's grammar table; a configured parser is immutable
//! and reusable across templates.

pub mod expression;
pub mod lexer;

use std::collections::HashMap;

use crate::ast::{
    ConditionalBranch, ForStatement, IncludeStatement, Statement, TableRowStatement, WhenBranch,
};
use crate::error::{Error, Result};
use crate::options::TemplateOptions;

use expression::{
    parse_filter_expression, parse_logical_expression, parse_named_args, TokenCursor,
};
use lexer::{Lexer, Punct, SpannedToken, Token};

pub type EmptyTagFn = fn() -> Statement;
pub type IdentifierTagFn = fn(String) -> Statement;
pub type SimpleTagFn = fn(&mut TokenCursor<'_>) -> Result<Statement>;
pub type BlockTagFn = fn(&mut BlockParser<'_, '_, '_>, &mut TokenCursor<'_>) -> Result<Statement>;

/// The four registration shapes for tags.
pub enum TagDefinition {
    /// `{% name %}`
    Empty(EmptyTagFn),
    /// `{% name identifier %}`
    Identifier(IdentifierTagFn),
    /// `{% name args %}` with a grammar callback.
    Simple(SimpleTagFn),
    /// Opening tag plus body and terminating `{% endname %}`.
    Block(BlockTagFn),
}

pub struct TagRegistry {
    tags: HashMap<String, TagDefinition>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self {
            tags: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("break", TagDefinition::Empty(|| Statement::Break));
        registry.register("continue", TagDefinition::Empty(|| Statement::Continue));
        registry.register("increment", TagDefinition::Identifier(Statement::Increment));
        registry.register("decrement", TagDefinition::Identifier(Statement::Decrement));
        registry.register("assign", TagDefinition::Simple(assign_tag));
        registry.register("cycle", TagDefinition::Simple(cycle_tag));
        registry.register("include", TagDefinition::Simple(include_tag));
        registry.register("render", TagDefinition::Simple(render_tag));
        registry.register("if", TagDefinition::Block(if_tag));
        registry.register("unless", TagDefinition::Block(unless_tag));
        registry.register("case", TagDefinition::Block(case_tag));
        registry.register("for", TagDefinition::Block(for_tag));
        registry.register("tablerow", TagDefinition::Block(tablerow_tag));
        registry.register("capture", TagDefinition::Block(capture_tag));
        registry.register("raw", TagDefinition::Block(raw_tag));
        registry.register("comment", TagDefinition::Block(comment_tag));
        registry
    }

    /// Last writer wins, so user tags can shadow builtins.
    pub fn register(&mut self, name: impl Into<String>, definition: TagDefinition) {
        self.tags.insert(name.into(), definition);
    }

    fn get(&self, name: &str) -> Option<&TagDefinition> {
        self.tags.get(name)
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Template parser. Configure it once (tag registration, options), then use
/// it as an immutable factory for statement lists.
pub struct Parser {
    registry: TagRegistry,
    greedy: bool,
    trim_output: bool,
    trim_tags: bool,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            registry: TagRegistry::with_builtins(),
            greedy: true,
            trim_output: false,
            trim_tags: false,
        }
    }

    pub fn with_options(options: &TemplateOptions) -> Self {
        Self {
            registry: TagRegistry::with_builtins(),
            greedy: options.greedy_parser,
            trim_output: options.trim_output,
            trim_tags: options.trim_tags,
        }
    }

    pub fn register_tag(&mut self, name: impl Into<String>, definition: TagDefinition) {
        self.registry.register(name, definition);
    }

    pub fn parse(&self, source: &str) -> Result<Vec<Statement>> {
        let tokens = Lexer::new(source, self.greedy).tokenize()?;
        let mut state = ParseState {
            parser: self,
            tokens: &tokens,
            pos: 0,
            trim_next: false,
        };
        let (statements, _) = state.parse_statements(&[])?;
        Ok(statements)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// A terminator tag encountered while parsing a block body, with its
/// argument tokens (`elsif` conditions, `when` matches).
pub struct EndTag<'t> {
    pub name: &'t str,
    tokens: &'t [SpannedToken],
    pub offset: usize,
}

impl<'t> EndTag<'t> {
    pub fn cursor(&self) -> TokenCursor<'t> {
        TokenCursor::new(self.tokens, self.offset)
    }

    fn expect_no_args(&self) -> Result<()> {
        self.cursor().expect_done()
    }
}

struct ParseState<'p, 't> {
    parser: &'p Parser,
    tokens: &'t [Token],
    pos: usize,
    /// Strip leading whitespace from the next text run.
    trim_next: bool,
}

impl<'p, 't> ParseState<'p, 't> {
    /// Parses statements until end of input or one of `terminators`.
    /// Whitespace stripping is applied here, while the list is built.
    fn parse_statements(
        &mut self,
        terminators: &[&str],
    ) -> Result<(Vec<Statement>, Option<EndTag<'t>>)> {
        let tokens = self.tokens;
        let parser = self.parser;
        let mut statements = Vec::new();

        while let Some(token) = tokens.get(self.pos) {
            self.pos += 1;
            match token {
                Token::Text { text, .. } => {
                    let mut text = text.as_str();
                    if self.trim_next {
                        text = text.trim_start();
                        self.trim_next = false;
                    }
                    if !text.is_empty() {
                        statements.push(Statement::Text(text.to_string()));
                    }
                }
                Token::Output {
                    tokens: expr_tokens,
                    trim_left,
                    trim_right,
                    offset,
                } => {
                    if *trim_left || parser.trim_output {
                        trim_last_text(&mut statements);
                    }
                    self.trim_next = *trim_right || parser.trim_output;
                    let mut cursor = TokenCursor::new(expr_tokens, *offset);
                    let expr = parse_filter_expression(&mut cursor)?;
                    cursor.expect_done()?;
                    statements.push(Statement::Output(expr));
                }
                Token::Tag {
                    name,
                    tokens: arg_tokens,
                    trim_left,
                    trim_right,
                    offset,
                } => {
                    if *trim_left || parser.trim_tags {
                        trim_last_text(&mut statements);
                    }
                    self.trim_next = *trim_right || parser.trim_tags;

                    if terminators.contains(&name.as_str()) {
                        let end = EndTag {
                            name: name.as_str(),
                            tokens: arg_tokens,
                            offset: *offset,
                        };
                        return Ok((statements, Some(end)));
                    }

                    let mut cursor = TokenCursor::new(arg_tokens, *offset);
                    let statement = match parser.registry.get(name) {
                        Some(TagDefinition::Empty(build)) => {
                            cursor.expect_done()?;
                            build()
                        }
                        Some(TagDefinition::Identifier(build)) => {
                            let ident = cursor.expect_ident()?;
                            cursor.expect_done()?;
                            build(ident)
                        }
                        Some(TagDefinition::Simple(parse)) => {
                            let statement = parse(&mut cursor)?;
                            cursor.expect_done()?;
                            statement
                        }
                        Some(TagDefinition::Block(parse)) => {
                            let mut block = BlockParser { state: self };
                            parse(&mut block, &mut cursor)?
                        }
                        None => {
                            let message = if name.starts_with("end") {
                                format!("unexpected tag '{name}'")
                            } else {
                                format!("unknown tag '{name}'")
                            };
                            return Err(Error::parse(message, *offset));
                        }
                    };
                    statements.push(statement);
                }
            }
        }

        Ok((statements, None))
    }
}

fn trim_last_text(statements: &mut Vec<Statement>) {
    if let Some(Statement::Text(text)) = statements.last_mut() {
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            statements.pop();
        } else if trimmed.len() != text.len() {
            *text = trimmed.to_string();
        }
    }
}

/// Handle block tag callbacks use to parse their bodies.
pub struct BlockParser<'s, 'p, 't> {
    state: &'s mut ParseState<'p, 't>,
}

impl<'s, 'p, 't> BlockParser<'s, 'p, 't> {
    /// Parses a body until one of `terminators`, which is consumed and
    /// returned. Reaching end of input instead is a parse error.
    pub fn parse_until(&mut self, terminators: &[&str]) -> Result<(Vec<Statement>, EndTag<'t>)> {
        let offset = self.current_offset();
        let (statements, end) = self.state.parse_statements(terminators)?;
        match end {
            Some(end) => Ok((statements, end)),
            None => Err(Error::parse(
                format!("unclosed block, expected '{{% {} %}}'", terminators.join("' or '")),
                offset,
            )),
        }
    }

    fn current_offset(&self) -> usize {
        self.state
            .tokens
            .get(self.state.pos)
            .map(|t| match t {
                Token::Text { offset, .. }
                | Token::Output { offset, .. }
                | Token::Tag { offset, .. } => *offset,
            })
            .unwrap_or(0)
    }
}

fn assign_tag(cursor: &mut TokenCursor<'_>) -> Result<Statement> {
    let name = cursor.expect_ident()?;
    cursor.expect_punct(Punct::Assign, "'='")?;
    let value = parse_filter_expression(cursor)?;
    Ok(Statement::Assign { name, value })
}

/// `{% cycle a, b %}` or `{% cycle group: a, b %}`
fn cycle_tag(cursor: &mut TokenCursor<'_>) -> Result<Statement> {
    let first = parse_filter_expression(cursor)?;
    let (group, mut values) = if cursor.consume_punct(Punct::Colon) {
        (Some(first), vec![parse_filter_expression(cursor)?])
    } else {
        (None, vec![first])
    };
    while cursor.consume_punct(Punct::Comma) {
        values.push(parse_filter_expression(cursor)?);
    }
    Ok(Statement::Cycle { group, values })
}

fn include_args(cursor: &mut TokenCursor<'_>) -> Result<IncludeStatement> {
    let name = parse_filter_expression(cursor)?;
    let mut with = None;
    if cursor.consume_keyword("with") {
        with = Some(parse_filter_expression(cursor)?);
    }
    let params = if cursor.consume_punct(Punct::Comma) || !cursor.is_done() {
        parse_named_args(cursor)?
    } else {
        Vec::new()
    };
    Ok(IncludeStatement { name, with, params })
}

fn include_tag(cursor: &mut TokenCursor<'_>) -> Result<Statement> {
    Ok(Statement::Include(Box::new(include_args(cursor)?)))
}

fn render_tag(cursor: &mut TokenCursor<'_>) -> Result<Statement> {
    Ok(Statement::Render(Box::new(include_args(cursor)?)))
}

fn if_tag(block: &mut BlockParser<'_, '_, '_>, cursor: &mut TokenCursor<'_>) -> Result<Statement> {
    let mut condition = parse_logical_expression(cursor)?;
    cursor.expect_done()?;

    let mut branches = Vec::new();
    let mut else_body = None;
    loop {
        let (body, end) = block.parse_until(&["elsif", "else", "endif"])?;
        branches.push(ConditionalBranch { condition, body });
        match end.name {
            "elsif" => {
                let mut args = end.cursor();
                condition = parse_logical_expression(&mut args)?;
                args.expect_done()?;
            }
            "else" => {
                end.expect_no_args()?;
                let (body, end) = block.parse_until(&["endif"])?;
                end.expect_no_args()?;
                else_body = Some(body);
                break;
            }
            _ => {
                end.expect_no_args()?;
                break;
            }
        }
    }
    Ok(Statement::If {
        branches,
        else_body,
    })
}

fn unless_tag(
    block: &mut BlockParser<'_, '_, '_>,
    cursor: &mut TokenCursor<'_>,
) -> Result<Statement> {
    let condition = parse_logical_expression(cursor)?;
    cursor.expect_done()?;
    let (body, end) = block.parse_until(&["else", "endunless"])?;
    let else_body = if end.name == "else" {
        end.expect_no_args()?;
        let (body, end) = block.parse_until(&["endunless"])?;
        end.expect_no_args()?;
        Some(body)
    } else {
        end.expect_no_args()?;
        None
    };
    Ok(Statement::Unless {
        condition,
        body,
        else_body,
    })
}

fn case_tag(
    block: &mut BlockParser<'_, '_, '_>,
    cursor: &mut TokenCursor<'_>,
) -> Result<Statement> {
    let subject = parse_logical_expression(cursor)?;
    cursor.expect_done()?;

    // Content between `case` and the first `when` is discarded.
    let (_, mut end) = block.parse_until(&["when", "else", "endcase"])?;
    let mut whens = Vec::new();
    let mut else_body = None;
    loop {
        match end.name {
            "when" => {
                let mut args = end.cursor();
                let mut matches = vec![parse_filter_expression(&mut args)?];
                while args.consume_punct(Punct::Comma) || args.consume_keyword("or") {
                    matches.push(parse_filter_expression(&mut args)?);
                }
                args.expect_done()?;
                let (body, next) = block.parse_until(&["when", "else", "endcase"])?;
                whens.push(WhenBranch { matches, body });
                end = next;
            }
            "else" => {
                end.expect_no_args()?;
                let (body, next) = block.parse_until(&["endcase"])?;
                next.expect_no_args()?;
                else_body = Some(body);
                break;
            }
            _ => {
                end.expect_no_args()?;
                break;
            }
        }
    }
    Ok(Statement::Case {
        subject,
        whens,
        else_body,
    })
}

fn for_tag(block: &mut BlockParser<'_, '_, '_>, cursor: &mut TokenCursor<'_>) -> Result<Statement> {
    let var = cursor.expect_ident()?;
    if !cursor.consume_keyword("in") {
        return Err(cursor.unexpected("'in'"));
    }
    let source = parse_filter_expression(cursor)?;

    let mut limit = None;
    let mut offset = None;
    let mut reversed = false;
    while !cursor.is_done() {
        if cursor.consume_punct(Punct::Comma) {
            continue;
        }
        if cursor.consume_keyword("limit") {
            cursor.expect_punct(Punct::Colon, "':'")?;
            limit = Some(parse_filter_expression(cursor)?);
        } else if cursor.consume_keyword("offset") {
            cursor.expect_punct(Punct::Colon, "':'")?;
            offset = Some(parse_filter_expression(cursor)?);
        } else if cursor.consume_keyword("reversed") {
            reversed = true;
        } else {
            return Err(cursor.unexpected("'limit', 'offset' or 'reversed'"));
        }
    }

    let (body, end) = block.parse_until(&["else", "endfor"])?;
    let else_body = if end.name == "else" {
        end.expect_no_args()?;
        let (body, end) = block.parse_until(&["endfor"])?;
        end.expect_no_args()?;
        Some(body)
    } else {
        end.expect_no_args()?;
        None
    };

    Ok(Statement::For(Box::new(ForStatement {
        var,
        source,
        limit,
        offset,
        reversed,
        body,
        else_body,
    })))
}

fn tablerow_tag(
    block: &mut BlockParser<'_, '_, '_>,
    cursor: &mut TokenCursor<'_>,
) -> Result<Statement> {
    let var = cursor.expect_ident()?;
    if !cursor.consume_keyword("in") {
        return Err(cursor.unexpected("'in'"));
    }
    let source = parse_filter_expression(cursor)?;

    let mut cols = None;
    let mut limit = None;
    let mut offset = None;
    while !cursor.is_done() {
        if cursor.consume_punct(Punct::Comma) {
            continue;
        }
        if cursor.consume_keyword("cols") {
            cursor.expect_punct(Punct::Colon, "':'")?;
            cols = Some(parse_filter_expression(cursor)?);
        } else if cursor.consume_keyword("limit") {
            cursor.expect_punct(Punct::Colon, "':'")?;
            limit = Some(parse_filter_expression(cursor)?);
        } else if cursor.consume_keyword("offset") {
            cursor.expect_punct(Punct::Colon, "':'")?;
            offset = Some(parse_filter_expression(cursor)?);
        } else {
            return Err(cursor.unexpected("'cols', 'limit' or 'offset'"));
        }
    }

    let (body, end) = block.parse_until(&["endtablerow"])?;
    end.expect_no_args()?;

    Ok(Statement::TableRow(Box::new(TableRowStatement {
        var,
        source,
        cols,
        limit,
        offset,
        body,
    })))
}

fn capture_tag(
    block: &mut BlockParser<'_, '_, '_>,
    cursor: &mut TokenCursor<'_>,
) -> Result<Statement> {
    let name = cursor.expect_ident()?;
    cursor.expect_done()?;
    let (body, end) = block.parse_until(&["endcapture"])?;
    end.expect_no_args()?;
    Ok(Statement::Capture { name, body })
}

/// The lexer already scanned the body verbatim; it arrives as text.
fn raw_tag(block: &mut BlockParser<'_, '_, '_>, cursor: &mut TokenCursor<'_>) -> Result<Statement> {
    cursor.expect_done()?;
    let (body, end) = block.parse_until(&["endraw"])?;
    end.expect_no_args()?;
    let mut text = String::new();
    for statement in body {
        if let Statement::Text(t) = statement {
            text.push_str(&t);
        }
    }
    Ok(Statement::Text(text))
}

fn comment_tag(
    block: &mut BlockParser<'_, '_, '_>,
    cursor: &mut TokenCursor<'_>,
) -> Result<Statement> {
    cursor.expect_done()?;
    let (_, end) = block.parse_until(&["endcomment"])?;
    end.expect_no_args()?;
    Ok(Statement::Comment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;
    use crate::value::Value;

    fn parse(source: &str) -> Vec<Statement> {
        Parser::new().parse(source).unwrap()
    }

    #[test]
    fn test_empty_template() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_text_and_output() {
        let statements = parse("Hello {{ name }}!");
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], Statement::Text("Hello ".into()));
        assert_eq!(
            statements[1],
            Statement::Output(Expression::Identifier("name".into()))
        );
        assert_eq!(statements[2], Statement::Text("!".into()));
    }

    #[test]
    fn test_if_elsif_else() {
        let statements = parse("{% if a %}1{% elsif b %}2{% else %}3{% endif %}");
        match &statements[0] {
            Statement::If {
                branches,
                else_body,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[0].body, vec![Statement::Text("1".into())]);
                assert_eq!(branches[1].body, vec![Statement::Text("2".into())]);
                assert_eq!(
                    else_body.as_deref(),
                    Some(&[Statement::Text("3".into())][..])
                );
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_blocks() {
        let statements = parse("{% for x in xs %}{% if x %}y{% endif %}{% endfor %}");
        match &statements[0] {
            Statement::For(for_stmt) => {
                assert_eq!(for_stmt.var, "x");
                assert!(matches!(for_stmt.body[0], Statement::If { .. }));
            }
            other => panic!("expected for, got {other:?}"),
        }
    }

    #[test]
    fn test_for_parameters() {
        let statements = parse("{% for i in xs limit: 2 offset: 1 reversed %}{% endfor %}");
        match &statements[0] {
            Statement::For(for_stmt) => {
                assert!(for_stmt.limit.is_some());
                assert!(for_stmt.offset.is_some());
                assert!(for_stmt.reversed);
                assert!(for_stmt.body.is_empty());
            }
            other => panic!("expected for, got {other:?}"),
        }
    }

    #[test]
    fn test_for_else() {
        let statements = parse("{% for i in xs %}a{% else %}none{% endfor %}");
        match &statements[0] {
            Statement::For(for_stmt) => {
                assert_eq!(
                    for_stmt.else_body.as_deref(),
                    Some(&[Statement::Text("none".into())][..])
                );
            }
            other => panic!("expected for, got {other:?}"),
        }
    }

    #[test]
    fn test_case_when() {
        let statements = parse("{% case x %}{% when 1, 2 %}low{% when 'a' or 'b' %}letter{% else %}other{% endcase %}");
        match &statements[0] {
            Statement::Case {
                whens, else_body, ..
            } => {
                assert_eq!(whens.len(), 2);
                assert_eq!(whens[0].matches.len(), 2);
                assert_eq!(whens[1].matches.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected case, got {other:?}"),
        }
    }

    #[test]
    fn test_capture() {
        let statements = parse("{% capture g %}x{% endcapture %}");
        assert_eq!(
            statements[0],
            Statement::Capture {
                name: "g".into(),
                body: vec![Statement::Text("x".into())],
            }
        );
    }

    #[test]
    fn test_raw_and_comment() {
        let statements = parse("{% raw %}{{ x }}{% endraw %}{% comment %}ignored {{ y }}{% endcomment %}");
        assert_eq!(statements[0], Statement::Text("{{ x }}".into()));
        assert_eq!(statements[1], Statement::Comment);
    }

    #[test]
    fn test_include_and_render() {
        let statements = parse("{% include 'header' with site, a: 1 %}{% render 'footer', b: 2 %}");
        match &statements[0] {
            Statement::Include(include) => {
                assert_eq!(
                    include.name,
                    Expression::Literal(Value::str("header"))
                );
                assert!(include.with.is_some());
                assert_eq!(include.params.len(), 1);
            }
            other => panic!("expected include, got {other:?}"),
        }
        match &statements[1] {
            Statement::Render(render) => {
                assert_eq!(render.params[0].0, "b");
            }
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_groups() {
        let statements = parse("{% cycle 'a', 'b' %}{% cycle 'g': 'x', 'y' %}");
        match &statements[0] {
            Statement::Cycle { group, values } => {
                assert!(group.is_none());
                assert_eq!(values.len(), 2);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        match &statements[1] {
            Statement::Cycle { group, values } => {
                assert!(group.is_some());
                assert_eq!(values.len(), 2);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tag_is_parse_error() {
        let err = Parser::new().parse("{% bogus %}").unwrap_err();
        assert!(err.to_string().contains("unknown tag 'bogus'"));
        let err = Parser::new().parse("{% endif %}").unwrap_err();
        assert!(err.to_string().contains("unexpected tag 'endif'"));
    }

    #[test]
    fn test_unclosed_block_is_parse_error() {
        let err = Parser::new().parse("{% if a %}x").unwrap_err();
        assert!(err.to_string().contains("unclosed block"));
    }

    #[test]
    fn test_whitespace_stripping() {
        let statements = parse("a  {{- 'x' -}}  b");
        assert_eq!(statements[0], Statement::Text("a".into()));
        assert_eq!(statements[2], Statement::Text("b".into()));
    }

    #[test]
    fn test_stripping_is_idempotent() {
        // Parsing already-stripped text again yields the same AST.
        let first = parse("a  {%- if x -%}  b  {%- endif -%}  c");
        let second = parse("a{%- if x -%}b{%- endif -%}c");
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_tag_registration() {
        let mut parser = Parser::new();
        parser.register_tag("hr", TagDefinition::Empty(|| Statement::Text("<hr>".into())));
        parser.register_tag(
            "note",
            TagDefinition::Simple(|cursor| {
                let value = parse_filter_expression(cursor)?;
                Ok(Statement::Output(value))
            }),
        );
        let statements = parser.parse("{% hr %}{% note 'x' %}").unwrap();
        assert_eq!(statements[0], Statement::Text("<hr>".into()));
        assert_eq!(
            statements[1],
            Statement::Output(Expression::Literal(Value::str("x")))
        );
    }

    #[test]
    fn test_registration_shadows_builtin() {
        let mut parser = Parser::new();
        parser.register_tag("break", TagDefinition::Empty(|| Statement::Continue));
        let statements = parser.parse("{% break %}").unwrap();
        assert_eq!(statements[0], Statement::Continue);
    }
}
