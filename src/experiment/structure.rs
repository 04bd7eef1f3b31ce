use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use serde_json::{Map, Value as Json};

use crate::error::CommandError;
use crate::logging::CRITICAL;

/// One entry of the expected experiment tree.
#[derive(Debug, Clone, Copy)]
pub enum Node {
    File(&'static str),
    /// Folder whose content is checked against the given entries.
    Dir(&'static str, &'static [Node]),
    /// Folder whose content is not checked.
    AnyDir(&'static str),
}

impl Node {
    fn name(&self) -> &'static str {
        match self {
            Node::File(name) | Node::Dir(name, _) | Node::AnyDir(name) => name,
        }
    }

    /// Exact names match; `root.*` matches any extension of `root`.
    fn matches(&self, item: &str) -> bool {
        let name = self.name();
        match name.strip_suffix(".*") {
            Some(stem) => item == stem || item.strip_prefix(stem).is_some_and(|rest| rest.starts_with('.')),
            None => item == name,
        }
    }
}

const MALICIOUS_MOTES: &[Node] = &[
    Node::File("Makefile"),
    Node::File("root.*"),
    Node::File("sensor.*"),
    Node::File("malicious.*"),
];

const MOTES: &[Node] = &[Node::File("root.*"), Node::File("sensor.*")];

const WITH_MALICIOUS: &[Node] = &[
    Node::File("Makefile"),
    Node::File("simulation.csc"),
    Node::File("script.js"),
    Node::Dir("data", &[]),
    Node::Dir("motes", MALICIOUS_MOTES),
    Node::AnyDir("results"),
];

const WITHOUT_MALICIOUS: &[Node] = &[
    Node::File("Makefile"),
    Node::File("simulation.csc"),
    Node::File("script.js"),
    Node::Dir("data", &[]),
    Node::Dir("motes", MOTES),
    Node::AnyDir("results"),
];

pub const EXPERIMENT_STRUCTURE: &[Node] = &[
    Node::File("simulation.conf"),
    Node::File("report.md"),
    Node::Dir("with-malicious", WITH_MALICIOUS),
    Node::Dir("without-malicious", WITHOUT_MALICIOUS),
];

fn remove_entry(path: &Path) -> Result<(), CommandError> {
    debug!(" > Removing {}", path.display());
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| CommandError::io(format!("removing {}", path.display()), e))
}

/// Checks `path` against `nodes`. With `create`, missing folders are made; with `remove`, unexpected entries go.
pub fn check_structure(path: &Path, nodes: &[Node], create: bool, remove: bool) -> Result<bool, CommandError> {
    if create && !path.exists() {
        fs::create_dir_all(path).map_err(|e| CommandError::io(format!("creating {}", path.display()), e))?;
    }
    if !path.is_dir() {
        return Ok(false);
    }
    if create {
        for node in nodes {
            if let Node::Dir(name, _) | Node::AnyDir(name) = node {
                let dir = path.join(name);
                if !dir.exists() {
                    fs::create_dir_all(&dir)
                        .map_err(|e| CommandError::io(format!("creating {}", dir.display()), e))?;
                }
            }
        }
    }
    let entries = fs::read_dir(path).map_err(|e| CommandError::io(format!("reading {}", path.display()), e))?;
    let mut found = vec![false; nodes.len()];
    for entry in entries.filter_map(Result::ok) {
        let item = entry.file_name().to_string_lossy().into_owned();
        let Some(index) = nodes.iter().position(|n| n.matches(&item)) else {
            if remove {
                remove_entry(&entry.path())?;
            }
            continue;
        };
        found[index] = match nodes[index] {
            Node::File(_) | Node::AnyDir(_) => true,
            Node::Dir(_, children) => check_structure(&entry.path(), children, create, remove)?,
        };
    }
    Ok(found.into_iter().all(|f| f))
}

pub fn is_experiment(path: &Path) -> bool {
    check_structure(path, EXPERIMENT_STRUCTURE, false, false).unwrap_or(false)
}

fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses a JSON file whose lines may be commented out with `//`.
pub fn load_commented_json(path: &Path) -> Result<Json, CommandError> {
    let text =
        fs::read_to_string(path).map_err(|e| CommandError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&strip_comments(&text)).map_err(|source| CommandError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves a campaign name to `<experiments>/<name>.json`.
pub fn campaign_path(experiments: &Path, exp_file: &str) -> PathBuf {
    let mut path = PathBuf::from(exp_file);
    if path.parent().map_or(true, |p| p.as_os_str().is_empty()) {
        path = experiments.join(path);
    }
    if path.extension().map_or(true, |e| e != "json") {
        path.set_extension("json");
    }
    path
}

/// Experiments of a campaign file, in file order.
pub fn get_experiments(path: &Path, silent: bool) -> Result<Map<String, Json>, CommandError> {
    if !path.exists() {
        error!(target: CRITICAL, "Simulation campaign JSON file does not exist !");
        warn!("Make sure you've generated a JSON simulation campaign file by using 'prepare' command.");
        return Err(CommandError::InvalidValue(format!(
            "campaign {} does not exist",
            path.display()
        )));
    }
    match load_commented_json(path) {
        Ok(Json::Object(experiments)) => Ok(experiments),
        Ok(_) => Err(CommandError::InvalidValue(format!(
            "campaign {} is not a JSON object",
            path.display()
        ))),
        Err(e) => {
            if !silent {
                error!(
                    "JSON file '{}' cannot be read ! (check that the syntax is correct)",
                    path.display()
                );
            }
            Err(e)
        }
    }
}

pub fn list_campaigns(experiments: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(experiments) else {
        return vec![];
    };
    let mut campaigns: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
        .filter(|p| load_commented_json(p).is_ok())
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    campaigns.sort();
    campaigns
}

pub fn list_experiments(experiments: &Path, check: bool) -> Vec<String> {
    let Ok(entries) = fs::read_dir(experiments) else {
        return vec![];
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir() && (!check || is_experiment(p)))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn complete_experiment(path: &Path) {
        for file in ["simulation.conf", "report.md"] {
            touch(&path.join(file));
        }
        for sim in ["with-malicious", "without-malicious"] {
            for file in ["Makefile", "simulation.csc", "script.js", "motes/root.z1", "motes/sensor.z1"] {
                touch(&path.join(sim).join(file));
            }
            fs::create_dir_all(path.join(sim).join("data")).unwrap();
            fs::create_dir_all(path.join(sim).join("results")).unwrap();
        }
        touch(&path.join("with-malicious/motes/Makefile"));
        touch(&path.join("with-malicious/motes/malicious.z1"));
    }

    #[test]
    fn wildcard_names_match_any_extension() {
        assert!(Node::File("root.*").matches("root.z1"));
        assert!(Node::File("root.*").matches("root"));
        assert!(!Node::File("root.*").matches("rooted.z1"));
    }

    #[test]
    fn complete_tree_is_recognized() {
        let dir = TempDir::new().unwrap();
        let exp = dir.path().join("E1");
        complete_experiment(&exp);
        assert!(is_experiment(&exp));
        fs::remove_file(exp.join("with-malicious/motes/malicious.z1")).unwrap();
        assert!(!is_experiment(&exp));
    }

    #[test]
    fn create_makes_folders_and_remove_drops_strays() {
        let dir = TempDir::new().unwrap();
        let exp = dir.path().join("E1");
        touch(&exp.join("stray.txt"));
        touch(&exp.join("with-malicious/results/keep.csv"));
        let complete = check_structure(&exp, EXPERIMENT_STRUCTURE, true, true).unwrap();
        assert!(!complete);
        assert!(!exp.join("stray.txt").exists());
        assert!(exp.join("with-malicious/results/keep.csv").exists());
        assert!(exp.join("without-malicious/motes").is_dir());
        assert!(exp.join("with-malicious/data").is_dir());
    }

    #[test]
    fn listings_are_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        complete_experiment(&dir.path().join("b-exp"));
        complete_experiment(&dir.path().join("a-exp"));
        fs::create_dir_all(dir.path().join("broken")).unwrap();
        fs::write(dir.path().join("camp.json"), "// comment\n{\"E1\": {}}").unwrap();
        fs::write(dir.path().join("bad.json"), "{").unwrap();
        assert_eq!(list_experiments(dir.path(), true), vec!["a-exp", "b-exp"]);
        assert_eq!(list_experiments(dir.path(), false), vec!["a-exp", "b-exp", "broken"]);
        assert_eq!(list_campaigns(dir.path()), vec!["camp.json"]);
    }

    #[test]
    fn campaign_experiments_keep_file_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("camp.json");
        fs::write(&path, "{\"BASE\": {}, \"zeta\": {}, \"alpha\": {\"simulation\": {\"repeat\": 2}}}").unwrap();
        let experiments = get_experiments(&path, false).unwrap();
        let names: Vec<&String> = experiments.keys().collect();
        assert_eq!(names, vec!["BASE", "zeta", "alpha"]);
        assert!(get_experiments(&dir.path().join("none.json"), true).is_err());
    }

    #[test]
    fn campaign_names_resolve_into_experiments_folder() {
        let base = Path::new("/srv/exp");
        assert_eq!(campaign_path(base, "camp"), PathBuf::from("/srv/exp/camp.json"));
        assert_eq!(campaign_path(base, "/tmp/c.json"), PathBuf::from("/tmp/c.json"));
    }
}
