use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use serde::{Deserialize, Serialize};

pub type Kwargs = BTreeMap<String, Value>;

/// Loosely-typed value carried by command arguments, campaign files and `simulation.conf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Python-style literal, as written to `simulation.conf` and shown in signatures.
    pub fn to_literal(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::Str(s) => quote(s),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_literal).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", quote(k), v.to_literal()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }

    /// Parses a Python-style literal. Returns `None` on any trailing garbage.
    pub fn parse_literal(text: &str) -> Option<Value> {
        let mut chars = text.trim().chars().peekable();
        let value = parse_value(&mut chars)?;
        skip_ws(&mut chars);
        if chars.peek().is_some() {
            return None;
        }
        Some(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => f.write_str(&other.to_literal()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// Splits a leading quoted string off `text`; returns it unescaped along with the remaining text.
pub fn take_quoted(text: &str) -> Option<(String, &str)> {
    let mut chars = text.chars().peekable();
    if !matches!(chars.peek(), Some('"' | '\'')) {
        return None;
    }
    let quoted = parse_string(&mut chars)?;
    let rest: usize = chars.map(char::len_utf8).sum();
    Some((quoted, &text[text.len() - rest..]))
}

pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn skip_ws(chars: &mut Peekable<Chars<'_>>) {
    while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
        chars.next();
    }
}

fn parse_value(chars: &mut Peekable<Chars<'_>>) -> Option<Value> {
    skip_ws(chars);
    match *chars.peek()? {
        '"' | '\'' => parse_string(chars).map(Value::Str),
        '[' | '(' => parse_list(chars),
        '{' => parse_map(chars),
        c if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => parse_number(chars),
        c if c.is_ascii_alphabetic() => {
            let mut word = String::new();
            while matches!(chars.peek(), Some(c) if c.is_ascii_alphanumeric() || *c == '_') {
                word.extend(chars.next());
            }
            match word.as_str() {
                "True" => Some(Value::Bool(true)),
                "False" => Some(Value::Bool(false)),
                "None" => Some(Value::None),
                "inf" | "nan" | "NaN" => word.parse::<f64>().ok().map(Value::Float),
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_string(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let delimiter = chars.next()?;
    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            },
            c if c == delimiter => return Some(out),
            c => out.push(c),
        }
    }
}

fn parse_list(chars: &mut Peekable<Chars<'_>>) -> Option<Value> {
    let close = if chars.next()? == '[' { ']' } else { ')' };
    let mut items = Vec::new();
    loop {
        skip_ws(chars);
        if chars.peek() == Some(&close) {
            chars.next();
            return Some(Value::List(items));
        }
        items.push(parse_value(chars)?);
        skip_ws(chars);
        match chars.next()? {
            ',' => continue,
            c if c == close => return Some(Value::List(items)),
            _ => return None,
        }
    }
}

fn parse_map(chars: &mut Peekable<Chars<'_>>) -> Option<Value> {
    chars.next();
    let mut map = BTreeMap::new();
    loop {
        skip_ws(chars);
        match chars.peek()? {
            '}' => {
                chars.next();
                return Some(Value::Map(map));
            }
            '"' | '\'' => {}
            _ => return None,
        }
        let key = parse_string(chars)?;
        skip_ws(chars);
        if chars.next()? != ':' {
            return None;
        }
        let value = parse_value(chars)?;
        map.insert(key, value);
        skip_ws(chars);
        match chars.next()? {
            ',' => continue,
            '}' => return Some(Value::Map(map)),
            _ => return None,
        }
    }
}

fn parse_number(chars: &mut Peekable<Chars<'_>>) -> Option<Value> {
    let mut text = String::new();
    while matches!(chars.peek(), Some(c) if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
    {
        text.extend(chars.next());
    }
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().map(Value::Float)
    } else {
        match text.parse::<i64>() {
            Ok(i) => Some(Value::Int(i)),
            Err(_) if matches!(text.as_str(), "-inf" | "+inf") => text.parse::<f64>().ok().map(Value::Float),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalar_literals() {
        assert_eq!(Value::parse_literal("50.0"), Some(Value::Float(50.0)));
        assert_eq!(Value::parse_literal("-3"), Some(Value::Int(-3)));
        assert_eq!(Value::parse_literal("True"), Some(Value::Bool(true)));
        assert_eq!(Value::parse_literal("None"), Some(Value::None));
        assert_eq!(
            Value::parse_literal("'single quoted'"),
            Some(Value::Str("single quoted".to_string()))
        );
    }

    #[test]
    fn parses_nested_collections() {
        let parsed = Value::parse_literal(r#"["a", [1, 2.5], {"k": False}]"#).unwrap();
        let mut inner = BTreeMap::new();
        inner.insert("k".to_string(), Value::Bool(false));
        assert_eq!(
            parsed,
            Value::List(vec![
                Value::from("a"),
                Value::List(vec![Value::Int(1), Value::Float(2.5)]),
                Value::Map(inner),
            ])
        );
    }

    #[test]
    fn rejects_bare_words_and_trailing_text() {
        assert_eq!(Value::parse_literal("z1"), None);
        assert_eq!(Value::parse_literal("1 2"), None);
        assert_eq!(Value::parse_literal("\"open"), None);
    }

    #[test]
    fn literal_output_is_parseable() {
        let value = Value::List(vec![
            Value::from("quote \" and \\ and\nnewline"),
            Value::Float(1e-7),
            Value::Float(200.0),
            Value::None,
        ]);
        assert_eq!(Value::parse_literal(&value.to_literal()), Some(value));
    }

    #[test]
    fn infinite_and_nan_floats_read_back_as_floats() {
        for f in [f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(Value::parse_literal(&Value::Float(f).to_literal()), Some(Value::Float(f)));
        }
        match Value::parse_literal(&Value::Float(f64::NAN).to_literal()) {
            Some(Value::Float(f)) => assert!(f.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(Value::parse_literal("info"), None);
    }

    #[test]
    fn quoted_prefix_is_split_off() {
        assert_eq!(
            take_quoted(r#""a = \"b\"" = 1"#),
            Some(("a = \"b\"".to_string(), " = 1"))
        );
        assert_eq!(take_quoted("plain = 1"), None);
    }

    #[test]
    fn deserializes_json_numbers_by_shape() {
        let v: Value = serde_json::from_str(r#"{"n": 10, "r": 50.5, "t": null}"#).unwrap();
        let map = v.as_map().unwrap();
        assert_eq!(map["n"], Value::Int(10));
        assert_eq!(map["r"], Value::Float(50.5));
        assert!(map["t"].is_none());
    }
}
