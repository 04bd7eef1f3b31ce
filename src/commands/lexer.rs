//! Splits a console line into positional and keyword arguments.
//!
//! Tokens are separated by whitespace. A token is either a double-quoted string
//! (backslash escapes allowed), `true`/`false`, a decimal integer or a bare word.
//! `name=value` is a keyword argument; positional arguments cannot follow one.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::LexError;
use crate::models::value::{Kwargs, Value};

static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\A\s+").expect("static pattern"));
static KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A([a-zA-Z](?:[a-zA-Z0-9_-]*[a-zA-Z0-9])?)=").expect("static pattern"));
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)\A"((?:[^"\\]|\\.)*)""#).expect("static pattern"));
static ESCAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\\(.)").expect("static pattern"));
static BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A[a-zA-Z0-9\-_=/\\<>.~:+,@\[\]]+").expect("static pattern"));
static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\A[0-9]+\z").expect("static pattern"));

struct Lexer<'a> {
    line: &'a str,
    /// Byte offset into `line`.
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    /// Character column of the byte offset `at`, as shown in errors.
    fn column(&self, at: usize) -> usize {
        self.line[..at].chars().count()
    }

    fn skip_whitespace(&mut self) {
        if let Some(m) = SPACES.find(self.rest()) {
            self.pos += m.end();
        }
    }

    fn at_boundary(&self) -> bool {
        self.rest().chars().next().map_or(true, char::is_whitespace)
    }

    /// Fails on whatever glues onto the end of the token just read.
    fn expect_boundary(&self) -> Result<(), LexError> {
        match self.rest().chars().next() {
            Some(c) if !c.is_whitespace() => Err(LexError::UnexpectedChar(self.column(self.pos), c)),
            _ => Ok(()),
        }
    }

    /// Reads `name=` if the upcoming token is a keyword argument.
    fn keyword(&mut self) -> Option<String> {
        let caps = KEY.captures(self.rest())?;
        self.pos += caps.get(0)?.end();
        Some(caps[1].to_string())
    }

    fn value(&mut self) -> Result<Value, LexError> {
        if self.rest().starts_with('"') {
            self.quoted()
        } else {
            self.bare()
        }
    }

    fn quoted(&mut self) -> Result<Value, LexError> {
        let start = self.pos;
        let caps = QUOTED
            .captures(self.rest())
            .ok_or_else(|| LexError::UnterminatedString(self.column(start)))?;
        let text = ESCAPE
            .replace_all(&caps[1], |c: &Captures| match &c[1] {
                "n" => "\n".to_string(),
                "t" => "\t".to_string(),
                other => other.to_string(),
            })
            .into_owned();
        self.pos += caps[0].len();
        self.expect_boundary()?;
        Ok(Value::Str(text))
    }

    fn bare(&mut self) -> Result<Value, LexError> {
        let token = match BARE.find(self.rest()) {
            Some(m) => m.as_str(),
            None => "",
        };
        self.pos += token.len();
        self.expect_boundary()?;
        Ok(match token {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            t if INTEGER.is_match(t) => t.parse().map(Value::Int).unwrap_or_else(|_| Value::from(t)),
            t => Value::from(t),
        })
    }
}

pub fn analyze(line: &str) -> Result<(Vec<Value>, Kwargs), LexError> {
    let mut lexer = Lexer { line, pos: 0 };
    let mut args = vec![];
    let mut kwargs = Kwargs::new();
    loop {
        lexer.skip_whitespace();
        if lexer.rest().is_empty() {
            break;
        }
        if let Some(key) = lexer.keyword() {
            if lexer.at_boundary() {
                return Err(LexError::MissingValue(key));
            }
            let value = lexer.value()?;
            kwargs.insert(key, value);
            continue;
        }
        let value = lexer.value()?;
        if !kwargs.is_empty() {
            return Err(LexError::PositionalAfterKeyword(value.to_string()));
        }
        args.push(value);
    }
    Ok((args, kwargs))
}
