//! Locating the select-list items of a raw SQL query.
//!
//! A raw query's result type decides which columns are read, so the select
//! list has to be known: mapped objects (`select u from ...`) are expanded to
//! their columns, and every item gets an alias. This is not a SQL parser; it
//! recognises just enough structure to find the items:
//!
//! ```text
//! query       := select_expr (("union" ["all"] | "intersect" | "except") select_expr)*
//! select_expr := <words> "select" ["distinct" ["on" group] | "all"]
//!                field ("," field)* ["from" <words>]
//! field       := (group | word)+
//! ```
//!
//! A group is a balanced parenthesized span, which hides sub-selects. Words
//! are quoted strings (`'...'` with `''` escapes, `"..."`) or runs of other
//! non-space characters.

use dbo_core::error::{QueryError, QueryErrorKind};
use dbo_core::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^']|'')*'|"[^"]*"|[(),]|[^\s()'",]+"#)
        .expect("token pattern is valid")
});

/// Byte range of one select-list item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectField {
    pub begin: usize,
    pub end: usize,
}

impl SelectField {
    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.begin..self.end]
    }
}

/// The items of one `select`.
pub type SelectFieldList = Vec<SelectField>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Word,
    Comma,
    Group,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: Kind,
    begin: usize,
    end: usize,
}

fn parse_error(sql: &str, message: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        code: None,
        message: format!("Error parsing SQL query: {message}"),
        source: None,
    })
}

/// Split into words, commas and parenthesized groups.
fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut last = 0;

    for m in TOKEN.find_iter(sql) {
        if !sql[last..m.start()].trim().is_empty() {
            return Err(parse_error(sql, "unterminated quote"));
        }
        last = m.end();
        match m.as_str() {
            "(" => open.push(m.start()),
            ")" => {
                let begin = open
                    .pop()
                    .ok_or_else(|| parse_error(sql, "unbalanced ')'"))?;
                if open.is_empty() {
                    tokens.push(Token {
                        kind: Kind::Group,
                        begin,
                        end: m.end(),
                    });
                }
            }
            _ if !open.is_empty() => {}
            "," => tokens.push(Token {
                kind: Kind::Comma,
                begin: m.start(),
                end: m.end(),
            }),
            _ => tokens.push(Token {
                kind: Kind::Word,
                begin: m.start(),
                end: m.end(),
            }),
        }
    }
    if !sql[last..].trim().is_empty() {
        return Err(parse_error(sql, "unterminated quote"));
    }
    if !open.is_empty() {
        return Err(parse_error(sql, "unbalanced '('"));
    }
    Ok(tokens)
}

struct Parser<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn is_keyword(&self, token: Token, keyword: &str) -> bool {
        token.kind == Kind::Word && self.sql[token.begin..token.end].eq_ignore_ascii_case(keyword)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| self.is_keyword(t, keyword))
    }

    fn at_compound(&self) -> bool {
        self.at_keyword("union") || self.at_keyword("intersect") || self.at_keyword("except")
    }

    fn select_expr(&mut self) -> Result<SelectFieldList> {
        while !self.at_keyword("select") {
            if self.peek().is_none() {
                return Err(parse_error(self.sql, "expected 'select'"));
            }
            self.pos += 1;
        }
        self.pos += 1;

        if self.at_keyword("distinct") {
            self.pos += 1;
            if self.at_keyword("on") {
                self.pos += 1;
                match self.peek() {
                    Some(t) if t.kind == Kind::Group => self.pos += 1,
                    _ => return Err(parse_error(self.sql, "expected '(' after 'distinct on'")),
                }
            }
        } else if self.at_keyword("all") {
            self.pos += 1;
        }

        let mut fields = Vec::new();
        loop {
            fields.push(self.field()?);
            match self.peek() {
                Some(t) if t.kind == Kind::Comma => self.pos += 1,
                _ => break,
            }
        }

        if self.at_keyword("from") {
            self.pos += 1;
            while self.peek().is_some() && !self.at_compound() {
                self.pos += 1;
            }
        }
        Ok(fields)
    }

    fn field(&mut self) -> Result<SelectField> {
        let mut span: Option<SelectField> = None;
        while let Some(token) = self.peek() {
            if token.kind == Kind::Comma || self.at_keyword("from") || self.at_compound() {
                break;
            }
            span = Some(match span {
                None => SelectField {
                    begin: token.begin,
                    end: token.end,
                },
                Some(s) => SelectField {
                    begin: s.begin,
                    end: token.end,
                },
            });
            self.pos += 1;
        }
        span.ok_or_else(|| parse_error(self.sql, "empty select list item"))
    }

    fn query(&mut self) -> Result<Vec<SelectFieldList>> {
        let mut lists = vec![self.select_expr()?];
        while self.at_compound() {
            let union = self.at_keyword("union");
            self.pos += 1;
            if union && self.at_keyword("all") {
                self.pos += 1;
            }
            lists.push(self.select_expr()?);
        }
        if self.peek().is_some() {
            return Err(parse_error(self.sql, "unexpected input after select list"));
        }
        Ok(lists)
    }
}

/// The select-list items of every `select` in `sql`.
pub fn parse_sql(sql: &str) -> Result<Vec<SelectFieldList>> {
    let tokens = tokenize(sql)?;
    Parser {
        sql,
        tokens,
        pos: 0,
    }
    .query()
}
