use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::error;

use crate::error::CommandError;
use crate::models::value::{quote, take_quoted, Kwargs, Value};

pub const CONFIG_FILE: &str = "simulation.conf";
const SEPARATOR: &str = " = ";

/// Reads `<dir>/simulation.conf`. Values that are not valid literals are kept as raw strings.
pub fn read_config(dir: &Path) -> Kwargs {
    let path = dir.join(CONFIG_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(_) => {
            error!("Configuration file '{}' does not exist !", CONFIG_FILE);
            return Kwargs::new();
        }
    };
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Kwargs {
    let mut config = Kwargs::new();
    for line in text.lines() {
        if line.trim().starts_with('#') {
            continue;
        }
        let Some((key, raw)) = split_line(line) else {
            continue;
        };
        let raw = raw.trim();
        let value = Value::parse_literal(raw).unwrap_or_else(|| Value::Str(raw.to_string()));
        config.insert(key, value);
    }
    config
}

fn split_line(line: &str) -> Option<(String, &str)> {
    let line = line.trim_start();
    if line.starts_with('"') {
        let (key, rest) = take_quoted(line)?;
        let raw = rest.trim_start().strip_prefix(SEPARATOR.trim())?;
        return Some((key, raw));
    }
    let (key, raw) = line.split_once(SEPARATOR)?;
    Some((key.trim().to_string(), raw))
}

/// Quotes keys that `split_line` could not read back bare.
fn render_key(key: &str) -> String {
    let plain = !key.is_empty()
        && key.trim() == key
        && !key.contains(SEPARATOR)
        && !key.contains('\n')
        && !key.starts_with(['#', '"']);
    if plain {
        key.to_string()
    } else {
        quote(key)
    }
}

pub fn write_config(dir: &Path, config: &Kwargs) -> Result<(), CommandError> {
    let path = dir.join(CONFIG_FILE);
    fs::write(&path, render_config(config))
        .map_err(|e| CommandError::io(format!("writing {}", path.display()), e))
}

pub fn render_config(config: &Kwargs) -> String {
    let keys: Vec<String> = config.keys().map(|k| render_key(k)).collect();
    let width = keys.iter().map(|k| k.chars().count()).max().unwrap_or(0);
    let mut out = String::new();
    for (key, value) in keys.iter().zip(config.values()) {
        let _ = writeln!(out, "{:<width$}{}{}", key, SEPARATOR, value.to_literal(), width = width);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample() -> Kwargs {
        let mut config = Kwargs::new();
        config.insert("repeat".to_string(), Value::Int(1));
        config.insert("max_range".to_string(), Value::Float(50.0));
        config.insert("debug".to_string(), Value::Bool(true));
        config.insert("goal".to_string(), Value::from(""));
        config.insert("title".to_string(), Value::from("Sinkhole = attack"));
        config.insert(
            "blocks".to_string(),
            Value::List(vec![Value::from("hello-flood"), Value::Int(3)]),
        );
        config.insert("ext_lib".to_string(), Value::None);
        config
    }

    #[test]
    fn write_then_read_reproduces_mapping() {
        let dir = TempDir::new().unwrap();
        let config = sample();
        write_config(dir.path(), &config).unwrap();
        assert_eq!(read_config(dir.path()), config);
    }

    #[test]
    fn keys_are_sorted_and_aligned() {
        let rendered = render_config(&sample());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "blocks    = [\"hello-flood\", 3]");
        assert!(lines.iter().all(|l| l.find(" = ") == Some(9)));
    }

    #[test]
    fn comments_and_garbage_lines_are_skipped() {
        let parsed = parse_config("# header\nnot a pair\ntarget = z1\nn = 10\n");
        let mut expected = BTreeMap::new();
        expected.insert("target".to_string(), Value::from("z1"));
        expected.insert("n".to_string(), Value::Int(10));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn awkward_keys_and_infinite_floats_survive_a_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = Kwargs::new();
        config.insert("a = b".to_string(), Value::Int(1));
        config.insert(" padded ".to_string(), Value::from("x"));
        config.insert("#hash".to_string(), Value::Bool(false));
        config.insert("max_range".to_string(), Value::Float(f64::INFINITY));
        config.insert("min_range".to_string(), Value::Float(f64::NEG_INFINITY));
        write_config(dir.path(), &config).unwrap();
        assert_eq!(read_config(dir.path()), config);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_config(dir.path()).is_empty());
    }
}
