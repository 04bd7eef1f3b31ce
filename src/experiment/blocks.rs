//! Building blocks: named sets of constants and ContikiRPL source edits that make up an attack.
//!
//! In `building-blocks.json`, an upper-case key that is not a C file name is a constant
//! (`"RPL_CONF_MIN_HOPRANKINC": 0`), any other key edits a file of the RPL library
//! (`"rpl-icmp6.c": ["source line", "replacement line"]`).

use std::path::Path;

use log::warn;
use serde_json::{Map, Value as Json};

use crate::error::CommandError;
use crate::experiment::structure::load_commented_json;

pub const BUILDING_BLOCKS_FILE: &str = "building-blocks.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// File name inside the RPL library folder.
    pub file: String,
    /// Literal text, or a regex whose first group (or whole match) gets replaced.
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    pub constants: Vec<(String, String)>,
    pub replacements: Vec<Replacement>,
}

impl Resolved {
    /// Loads the building blocks file only when some blocks are selected.
    pub fn load(file: &Path, blocks: &[String]) -> Result<Self, CommandError> {
        if blocks.is_empty() {
            return Ok(Resolved::default());
        }
        match load_commented_json(file)? {
            Json::Object(available) => Ok(resolve(&available, blocks)),
            _ => Err(CommandError::InvalidValue(format!(
                "building blocks file {} is not a JSON object",
                file.display()
            ))),
        }
    }

    /// `#define` lines for the malicious mote source.
    pub fn defines(&self) -> String {
        self.constants
            .iter()
            .map(|(name, value)| format!("#define {} {}", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn is_constant(key: &str) -> bool {
    key.to_uppercase() == key && !key.ends_with(".c") && !key.ends_with(".h")
}

fn constant_value(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Bool(b) => u8::from(*b).to_string(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

fn replacement(file: &str, value: &Json) -> Option<Replacement> {
    let pair = value.as_array()?;
    let from = pair.first()?.as_str()?;
    let to = match pair.get(1) {
        None | Some(Json::Null) => "",
        Some(to) => to.as_str()?,
    };
    Some(Replacement {
        file: file.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// Collects constants and replacements of `blocks`, in block order. The first setting wins.
pub fn resolve(available: &Map<String, Json>, blocks: &[String]) -> Resolved {
    let mut resolved = Resolved::default();
    for block in blocks {
        let Some(entries) = available.get(block).and_then(Json::as_object) else {
            warn!(" > Building-block '{}' does not exist", block);
            continue;
        };
        for (key, value) in entries {
            if is_constant(key) {
                match resolved.constants.iter().find(|(name, _)| name == key) {
                    Some((_, current)) => {
                        warn!(" > Building-block '{}': '{}' is already set to {}", block, key, current)
                    }
                    None => resolved.constants.push((key.clone(), constant_value(value))),
                }
                continue;
            }
            let Some(replacement) = replacement(key, value) else {
                warn!(" > Building-block '{}': '{}' is not a [source, replacement] pair", block, key);
                continue;
            };
            let duplicate = resolved
                .replacements
                .iter()
                .any(|r| r.file == replacement.file && r.from == replacement.from);
            if duplicate {
                warn!(
                    " > Building-block '{}': line '{}' is already replaced in {}",
                    block, replacement.from, key
                );
            } else {
                resolved.replacements.push(replacement);
            }
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn available() -> Map<String, Json> {
        match json!({
            "hello-flood": {"RPL_CONF_DIO_INTERVAL_MIN": 0, "RPL_CONF_DIO_REDUNDANCY": 0},
            "decreased-rank": {
                "RPL_CONF_DIO_INTERVAL_MIN": 5,
                "RPL_CONF_MIN_HOPRANKINC": "0",
                "rpl-private.h": ["#define RPL_MAX_RANKINC", "#define RPL_MAX_RANKINC 0 //"]
            },
            "increased-version": {"rpl-icmp6.c": ["dag->version;", "dag->version++;"]},
            "version-again": {"rpl-icmp6.c": ["dag->version;", null]},
            "broken": {"rpl-dag.c": "not a pair"}
        }) {
            Json::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn names(blocks: &[&str]) -> Vec<String> {
        blocks.iter().map(|b| b.to_string()).collect()
    }

    #[test]
    fn constants_keep_the_first_value_set() {
        let resolved = resolve(&available(), &names(&["hello-flood", "decreased-rank"]));
        assert_eq!(
            resolved.defines(),
            "#define RPL_CONF_DIO_INTERVAL_MIN 0\n#define RPL_CONF_DIO_REDUNDANCY 0\n#define RPL_CONF_MIN_HOPRANKINC 0"
        );
        assert_eq!(resolved.replacements.len(), 1);
        assert_eq!(resolved.replacements[0].file, "rpl-private.h");
    }

    #[test]
    fn same_line_is_replaced_once() {
        let resolved = resolve(&available(), &names(&["increased-version", "version-again", "broken", "nope"]));
        assert_eq!(
            resolved.replacements,
            vec![Replacement {
                file: "rpl-icmp6.c".to_string(),
                from: "dag->version;".to_string(),
                to: "dag->version++;".to_string(),
            }]
        );
        assert!(resolved.constants.is_empty());
    }

    #[test]
    fn file_is_read_only_when_blocks_are_selected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(BUILDING_BLOCKS_FILE);
        assert_eq!(Resolved::load(&file, &[]).unwrap(), Resolved::default());
        assert!(Resolved::load(&file, &names(&["hello-flood"])).is_err());

        fs::write(&file, "// attacks\n{\"hello-flood\": {\"RPL_CONF_DIO_INTERVAL_MIN\": 0}}").unwrap();
        let resolved = Resolved::load(&file, &names(&["hello-flood"])).unwrap();
        assert_eq!(resolved.defines(), "#define RPL_CONF_DIO_INTERVAL_MIN 0");
    }
}
