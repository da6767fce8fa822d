//! Expression grammar.
//!
//! Recursive descent over the token stream of a single `{{ }}` or `{% %}`
//! construct. Output statements and filter inputs use the filter grammar
//! (`primary` plus a filter pipeline); conditions use the logical grammar,
//! where `and`/`or` share one precedence level and associate right-to-left.

use crate::ast::{BinaryOperator, Expression, FilterArg};
use crate::error::{Error, Result};
use crate::value::Value;

use super::lexer::{ExprToken, Punct, SpannedToken};

/// Cursor over the expression tokens of one construct.
pub struct TokenCursor<'t> {
    tokens: &'t [SpannedToken],
    pos: usize,
    construct_offset: usize,
}

impl<'t> TokenCursor<'t> {
    pub fn new(tokens: &'t [SpannedToken], construct_offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            construct_offset,
        }
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Source offset of the current token, for error messages.
    pub fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.construct_offset)
    }

    fn peek(&self) -> Option<&'t ExprToken> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, n: usize) -> Option<&'t ExprToken> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<&'t ExprToken> {
        let token = self.tokens.get(self.pos).map(|t| &t.token);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn consume_punct(&mut self, punct: Punct) -> bool {
        if self.peek() == Some(&ExprToken::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_punct(&mut self, punct: Punct, expected: &str) -> Result<()> {
        if self.consume_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    /// Consumes the given identifier keyword when it is next.
    pub fn consume_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(ExprToken::Ident(name)) if name == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    pub fn expect_ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(ExprToken::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    pub fn expect_done(&self) -> Result<()> {
        if self.is_done() {
            Ok(())
        } else {
            Err(self.unexpected("end of tag"))
        }
    }

    pub fn unexpected(&self, expected: &str) -> Error {
        let found = match self.peek() {
            Some(ExprToken::Ident(name)) => format!("'{name}'"),
            Some(ExprToken::Number(n)) => format!("number {n}"),
            Some(ExprToken::Str(s)) => format!("string \"{s}\""),
            Some(ExprToken::Punct(p)) => format!("{p:?}"),
            None => "end of input".to_string(),
        };
        Error::parse(format!("expected {expected}, found {found}"), self.offset())
    }
}

/// `expr := primary (filter)*`: the grammar for outputs, assignments, and
/// filter inputs.
pub fn parse_filter_expression(cursor: &mut TokenCursor<'_>) -> Result<Expression> {
    let mut expr = parse_term(cursor)?;
    while cursor.consume_punct(Punct::Pipe) {
        let name = cursor.expect_ident()?;
        let mut args = Vec::new();
        if cursor.consume_punct(Punct::Colon) {
            loop {
                args.push(parse_filter_arg(cursor)?);
                if !cursor.consume_punct(Punct::Comma) {
                    break;
                }
            }
        }
        expr = Expression::Filter {
            input: Box::new(expr),
            name,
            args,
        };
    }
    Ok(expr)
}

/// `arg := (ident (':'|'='))? logical`
fn parse_filter_arg(cursor: &mut TokenCursor<'_>) -> Result<FilterArg> {
    if let (Some(ExprToken::Ident(name)), Some(ExprToken::Punct(sep))) =
        (cursor.peek(), cursor.peek_at(1))
    {
        if matches!(sep, Punct::Colon | Punct::Assign) {
            let name = name.clone();
            cursor.advance();
            cursor.advance();
            let value = parse_logical_expression(cursor)?;
            return Ok(FilterArg {
                name: Some(name),
                value,
            });
        }
    }
    Ok(FilterArg {
        name: None,
        value: parse_logical_expression(cursor)?,
    })
}

/// `logical := comparison (('and'|'or') logical)?`: one precedence level,
/// right-to-left association.
pub fn parse_logical_expression(cursor: &mut TokenCursor<'_>) -> Result<Expression> {
    let left = parse_comparison(cursor)?;
    let op = if cursor.consume_keyword("and") {
        BinaryOperator::And
    } else if cursor.consume_keyword("or") {
        BinaryOperator::Or
    } else {
        return Ok(left);
    };
    let right = parse_logical_expression(cursor)?;
    Ok(Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn parse_comparison(cursor: &mut TokenCursor<'_>) -> Result<Expression> {
    let mut left = parse_term(cursor)?;
    loop {
        let op = match cursor.peek() {
            Some(ExprToken::Punct(Punct::EqEq)) => BinaryOperator::Eq,
            Some(ExprToken::Punct(Punct::NotEq)) => BinaryOperator::Ne,
            Some(ExprToken::Punct(Punct::Lt)) => BinaryOperator::Lt,
            Some(ExprToken::Punct(Punct::Le)) => BinaryOperator::Le,
            Some(ExprToken::Punct(Punct::Gt)) => BinaryOperator::Gt,
            Some(ExprToken::Punct(Punct::Ge)) => BinaryOperator::Ge,
            Some(ExprToken::Ident(name)) if name == "contains" => BinaryOperator::Contains,
            _ => return Ok(left),
        };
        cursor.advance();
        let right = parse_term(cursor)?;
        left = Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
}

/// `member := primary ('.' ident | '[' expr ']')*`, chained without bound.
fn parse_term(cursor: &mut TokenCursor<'_>) -> Result<Expression> {
    let mut expr = parse_primary(cursor)?;
    loop {
        if cursor.consume_punct(Punct::Dot) {
            let name = cursor.expect_ident()?;
            expr = Expression::Member(Box::new(expr), name);
        } else if cursor.consume_punct(Punct::LBracket) {
            let index = parse_filter_expression(cursor)?;
            cursor.expect_punct(Punct::RBracket, "']'")?;
            expr = Expression::Index(Box::new(expr), Box::new(index));
        } else {
            return Ok(expr);
        }
    }
}

fn parse_primary(cursor: &mut TokenCursor<'_>) -> Result<Expression> {
    match cursor.peek() {
        Some(ExprToken::Str(text)) => {
            let text = text.clone();
            cursor.advance();
            Ok(Expression::Literal(Value::str(text)))
        }
        Some(ExprToken::Number(n)) => {
            let n = *n;
            cursor.advance();
            Ok(Expression::Literal(Value::Number(n)))
        }
        Some(ExprToken::Ident(name)) => {
            let expr = match name.as_str() {
                "true" => Expression::Literal(Value::Bool(true)),
                "false" => Expression::Literal(Value::Bool(false)),
                "nil" | "null" => Expression::Literal(Value::Nil),
                "empty" => Expression::Literal(Value::Empty),
                "blank" => Expression::Literal(Value::Blank),
                other => Expression::Identifier(other.to_string()),
            };
            cursor.advance();
            Ok(expr)
        }
        Some(ExprToken::Punct(Punct::LParen)) => {
            cursor.advance();
            let first = parse_filter_expression(cursor)?;
            if cursor.consume_punct(Punct::DotDot) {
                let second = parse_filter_expression(cursor)?;
                cursor.expect_punct(Punct::RParen, "')'")?;
                Ok(Expression::Range(Box::new(first), Box::new(second)))
            } else {
                cursor.expect_punct(Punct::RParen, "')'")?;
                Ok(first)
            }
        }
        _ => Err(cursor.unexpected("expression")),
    }
}

/// `name: value, name: value` lists for include/render parameters.
pub fn parse_named_args(cursor: &mut TokenCursor<'_>) -> Result<Vec<(String, Expression)>> {
    let mut args = Vec::new();
    loop {
        let name = cursor.expect_ident()?;
        if !cursor.consume_punct(Punct::Colon) && !cursor.consume_punct(Punct::Assign) {
            return Err(cursor.unexpected("':'"));
        }
        let value = parse_filter_expression(cursor)?;
        args.push((name, value));
        if !cursor.consume_punct(Punct::Comma) {
            return Ok(args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::{Lexer, Token};
    use crate::value::Number;

    fn tokens_of(source: &str) -> Vec<SpannedToken> {
        let all = Lexer::new(source, true).tokenize().unwrap();
        match all.into_iter().next().unwrap() {
            Token::Output { tokens, .. } => tokens,
            Token::Tag { tokens, .. } => tokens,
            Token::Text { .. } => panic!("expected construct"),
        }
    }

    fn filter_expr(inner: &str) -> Expression {
        let tokens = tokens_of(&format!("{{{{ {inner} }}}}"));
        let mut cursor = TokenCursor::new(&tokens, 0);
        let expr = parse_filter_expression(&mut cursor).unwrap();
        cursor.expect_done().unwrap();
        expr
    }

    fn logical_expr(inner: &str) -> Expression {
        let tokens = tokens_of(&format!("{{{{ {inner} }}}}"));
        let mut cursor = TokenCursor::new(&tokens, 0);
        let expr = parse_logical_expression(&mut cursor).unwrap();
        cursor.expect_done().unwrap();
        expr
    }

    #[test]
    fn test_member_chain() {
        let expr = filter_expr("a.b[0].c");
        // ((a.b)[0]).c
        match expr {
            Expression::Member(base, name) => {
                assert_eq!(name, "c");
                assert!(matches!(*base, Expression::Index(_, _)));
            }
            _ => panic!("expected member access"),
        }
    }

    #[test]
    fn test_filter_pipeline_left_associative() {
        let expr = filter_expr("xs | join: '-' | upcase");
        match expr {
            Expression::Filter { input, name, args } => {
                assert_eq!(name, "upcase");
                assert!(args.is_empty());
                match *input {
                    Expression::Filter { name, args, .. } => {
                        assert_eq!(name, "join");
                        assert_eq!(args.len(), 1);
                        assert_eq!(args[0].name, None);
                    }
                    _ => panic!("expected inner filter"),
                }
            }
            _ => panic!("expected filter"),
        }
    }

    #[test]
    fn test_named_filter_args() {
        let expr = filter_expr("x | slice: 1, length: 2");
        match expr {
            Expression::Filter { args, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].name, None);
                assert_eq!(args[1].name.as_deref(), Some("length"));
            }
            _ => panic!("expected filter"),
        }
    }

    #[test]
    fn test_logical_is_right_associative() {
        let expr = logical_expr("a and b or c");
        // a and (b or c)
        match expr {
            Expression::Binary { op, right, .. } => {
                assert_eq!(op, BinaryOperator::And);
                match *right {
                    Expression::Binary { op, .. } => assert_eq!(op, BinaryOperator::Or),
                    _ => panic!("expected nested binary"),
                }
            }
            _ => panic!("expected binary"),
        }
    }

    #[test]
    fn test_comparison_operators() {
        let expr = logical_expr("items.size > 0");
        match expr {
            Expression::Binary { op, left, right } => {
                assert_eq!(op, BinaryOperator::Gt);
                assert!(matches!(*left, Expression::Member(_, _)));
                assert_eq!(*right, Expression::Literal(Value::from(0)));
            }
            _ => panic!("expected comparison"),
        }
    }

    #[test]
    fn test_contains_operator() {
        let expr = logical_expr("name contains 'x'");
        assert!(matches!(
            expr,
            Expression::Binary {
                op: BinaryOperator::Contains,
                ..
            }
        ));
    }

    #[test]
    fn test_range_literal() {
        let expr = filter_expr("(1..3)");
        match expr {
            Expression::Range(start, end) => {
                assert_eq!(*start, Expression::Literal(Value::Number(Number::from_i64(1))));
                assert_eq!(*end, Expression::Literal(Value::Number(Number::from_i64(3))));
            }
            _ => panic!("expected range"),
        }
    }

    #[test]
    fn test_keyword_literals() {
        assert_eq!(filter_expr("nil"), Expression::Literal(Value::Nil));
        assert_eq!(filter_expr("empty"), Expression::Literal(Value::Empty));
        assert_eq!(filter_expr("blank"), Expression::Literal(Value::Blank));
        assert_eq!(filter_expr("true"), Expression::Literal(Value::Bool(true)));
    }

    #[test]
    fn test_error_carries_offset() {
        let tokens = tokens_of("{{ a. }}");
        let mut cursor = TokenCursor::new(&tokens, 0);
        let err = parse_filter_expression(&mut cursor).unwrap_err();
        match err {
            Error::Parse { message, .. } => assert!(message.contains("identifier")),
            _ => panic!("expected parse error"),
        }
    }
}
