//! Template scanner.
//!
//! The scanner works in three lexical modes: text mode accumulates literal
//! characters until `{{` or `{%`, output mode tokenizes the inside of
//! `{{ ... }}`, and tag mode tokenizes the inside of `{% ... %}`. Delimiters
//! decorated with a dash (`{{-`, `-%}`, ...) request whitespace stripping,
//! which the statement parser applies while building the AST.
//!
//! `{% raw %}` and `{% comment %}` bodies are scanned here in text mode so
//! their content is never tokenized.

use crate::error::{Error, Result};
use crate::value::Number;

const OUTPUT_START: &str = "{{";
const OUTPUT_END: &str = "}}";
const TAG_START: &str = "{%";
const TAG_END: &str = "%}";

#[derive(Debug, Clone, PartialEq)]
pub enum Punct {
    Pipe,
    Colon,
    Comma,
    Dot,
    DotDot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprToken {
    Ident(String),
    Number(Number),
    Str(String),
    Punct(Punct),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: ExprToken,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text {
        text: String,
        offset: usize,
    },
    Output {
        tokens: Vec<SpannedToken>,
        trim_left: bool,
        trim_right: bool,
        offset: usize,
    },
    Tag {
        name: String,
        tokens: Vec<SpannedToken>,
        trim_left: bool,
        trim_right: bool,
        offset: usize,
    },
}

pub struct Lexer<'s> {
    source: &'s str,
    pos: usize,
    /// When false, a newline inside `{% %}` is a parse error.
    greedy: bool,
}

impl<'s> Lexer<'s> {
    pub fn new(source: &'s str, greedy: bool) -> Self {
        Self {
            source,
            pos: 0,
            greedy,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            let text_start = self.pos;
            let text = self.read_text();
            if !text.is_empty() {
                tokens.push(Token::Text {
                    text: text.to_string(),
                    offset: text_start,
                });
            }
            if self.is_at_end() {
                break;
            }

            if self.rest().starts_with(OUTPUT_START) {
                tokens.push(self.lex_output()?);
            } else {
                let tag = self.lex_tag()?;
                let body = match &tag {
                    Token::Tag { name, .. } if name == "raw" => Some("endraw"),
                    Token::Tag { name, .. } if name == "comment" => Some("endcomment"),
                    _ => None,
                };
                tokens.push(tag);
                if let Some(end_name) = body {
                    let (text, text_offset, end_tag) = self.lex_verbatim_until(end_name)?;
                    tokens.push(Token::Text {
                        text,
                        offset: text_offset,
                    });
                    tokens.push(end_tag);
                }
            }
        }

        Ok(tokens)
    }

    fn lex_output(&mut self) -> Result<Token> {
        let offset = self.pos;
        self.pos += OUTPUT_START.len();
        let trim_left = self.consume_char('-');
        let (tokens, trim_right) = self.lex_expr_tokens(OUTPUT_END, offset, false)?;
        Ok(Token::Output {
            tokens,
            trim_left,
            trim_right,
            offset,
        })
    }

    fn lex_tag(&mut self) -> Result<Token> {
        let offset = self.pos;
        self.pos += TAG_START.len();
        let trim_left = self.consume_char('-');
        self.skip_whitespace(offset, true)?;

        let name_offset = self.pos;
        let name = self.read_ident();
        if name.is_empty() {
            return Err(Error::parse("expected tag name", name_offset));
        }

        let (tokens, trim_right) = self.lex_expr_tokens(TAG_END, offset, true)?;
        Ok(Token::Tag {
            name,
            tokens,
            trim_left,
            trim_right,
            offset,
        })
    }

    /// Tokenizes until the closing delimiter, honoring a `-` immediately
    /// before it. Scanning token-by-token keeps delimiters inside string
    /// literals from closing the construct early.
    fn lex_expr_tokens(
        &mut self,
        end: &str,
        construct_offset: usize,
        in_tag: bool,
    ) -> Result<(Vec<SpannedToken>, bool)> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace(construct_offset, in_tag)?;
            if self.is_at_end() {
                return Err(Error::parse(
                    format!("unclosed construct, expected '{end}'"),
                    construct_offset,
                ));
            }
            if self.rest().starts_with(end) {
                self.pos += end.len();
                return Ok((tokens, false));
            }
            if self.rest().starts_with('-') && self.rest()[1..].starts_with(end) {
                self.pos += 1 + end.len();
                return Ok((tokens, true));
            }

            let offset = self.pos;
            let token = self.lex_expr_token()?;
            tokens.push(SpannedToken { token, offset });
        }
    }

    fn lex_expr_token(&mut self) -> Result<ExprToken> {
        let offset = self.pos;
        let c = self.peek().ok_or_else(|| Error::parse("unexpected end of input", offset))?;

        if c == '\'' || c == '"' {
            return self.lex_string(c);
        }
        if c.is_ascii_digit() || (c == '-' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) {
            return self.lex_number(offset);
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(ExprToken::Ident(self.read_ident()));
        }

        let punct = match c {
            '|' => Punct::Pipe,
            ':' => Punct::Colon,
            ',' => Punct::Comma,
            '[' => Punct::LBracket,
            ']' => Punct::RBracket,
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '.' => {
                if self.peek_at(1) == Some('.') {
                    self.pos += 2;
                    return Ok(ExprToken::Punct(Punct::DotDot));
                }
                Punct::Dot
            }
            '=' => {
                if self.peek_at(1) == Some('=') {
                    self.pos += 2;
                    return Ok(ExprToken::Punct(Punct::EqEq));
                }
                Punct::Assign
            }
            '!' => {
                if self.peek_at(1) == Some('=') {
                    self.pos += 2;
                    return Ok(ExprToken::Punct(Punct::NotEq));
                }
                return Err(Error::parse("unexpected character '!'", offset));
            }
            '<' => match self.peek_at(1) {
                Some('=') => {
                    self.pos += 2;
                    return Ok(ExprToken::Punct(Punct::Le));
                }
                Some('>') => {
                    self.pos += 2;
                    return Ok(ExprToken::Punct(Punct::NotEq));
                }
                _ => Punct::Lt,
            },
            '>' => {
                if self.peek_at(1) == Some('=') {
                    self.pos += 2;
                    return Ok(ExprToken::Punct(Punct::Ge));
                }
                Punct::Gt
            }
            other => {
                return Err(Error::parse(
                    format!("unexpected character '{other}'"),
                    offset,
                ))
            }
        };
        self.pos += c.len_utf8();
        Ok(ExprToken::Punct(punct))
    }

    /// Strings are single- or double-quoted with no escape sequences.
    fn lex_string(&mut self, quote: char) -> Result<ExprToken> {
        let start = self.pos;
        self.pos += quote.len_utf8();
        let content_start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let text = self.source[content_start..self.pos].to_string();
                self.pos += quote.len_utf8();
                return Ok(ExprToken::Str(text));
            }
            self.pos += c.len_utf8();
        }
        Err(Error::parse("unterminated string literal", start))
    }

    fn lex_number(&mut self, offset: usize) -> Result<ExprToken> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = &self.source[start..self.pos];
        Number::parse(text)
            .map(ExprToken::Number)
            .ok_or_else(|| Error::parse(format!("invalid number literal '{text}'"), offset))
    }

    /// Scans verbatim text until the named end tag, returning the body and
    /// the end tag token. Used for `raw` and `comment`.
    fn lex_verbatim_until(&mut self, end_name: &str) -> Result<(String, usize, Token)> {
        let body_start = self.pos;
        let mut scan = self.pos;
        while scan < self.source.len() {
            if self.source[scan..].starts_with(TAG_START) {
                let mut probe = scan + TAG_START.len();
                let trim_left = self.source[probe..].starts_with('-');
                if trim_left {
                    probe += 1;
                }
                let after_ws = probe
                    + self.source[probe..]
                        .find(|c: char| !c.is_whitespace())
                        .unwrap_or(0);
                let name_matches = self.source[after_ws..].starts_with(end_name)
                    && self.source[after_ws + end_name.len()..]
                        .chars()
                        .next()
                        .map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_');
                if name_matches {
                    let body = self.source[body_start..scan].to_string();
                    self.pos = scan;
                    let end_tag = self.lex_tag()?;
                    if let Token::Tag { ref name, ref tokens, offset, .. } = end_tag {
                        if name != end_name {
                            return Err(Error::parse(
                                format!("expected '{{% {end_name} %}}'"),
                                offset,
                            ));
                        }
                        if !tokens.is_empty() {
                            return Err(Error::parse(
                                format!("'{end_name}' takes no arguments"),
                                offset,
                            ));
                        }
                    }
                    return Ok((body, body_start, end_tag));
                }
            }
            scan += self.source[scan..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(1);
        }
        Err(Error::parse(
            format!("unclosed block, expected '{{% {end_name} %}}'"),
            body_start,
        ))
    }

    fn read_text(&mut self) -> &'s str {
        let start = self.pos;
        while !self.is_at_end() {
            let rest = self.rest();
            if rest.starts_with(OUTPUT_START) || rest.starts_with(TAG_START) {
                break;
            }
            self.pos += rest.chars().next().map(char::len_utf8).unwrap_or(1);
        }
        &self.source[start..self.pos]
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        if self
            .peek()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            self.pos += 1;
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                self.pos += 1;
            }
        }
        self.source[start..self.pos].to_string()
    }

    fn skip_whitespace(&mut self, construct_offset: usize, in_tag: bool) -> Result<()> {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            if c == '\n' && in_tag && !self.greedy {
                return Err(Error::parse(
                    "tag arguments may not span newlines",
                    construct_offset,
                ));
            }
            self.pos += c.len_utf8();
        }
        Ok(())
    }

    fn rest(&self) -> &'s str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn consume_char(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }
}
