//! Private copy of the Contiki tree an experiment builds its motes against.
//!
//! Only the folders the targeted platforms need are copied. Debug flags, building-block edits
//! and external RPL libraries are applied to the copy, never to the shared installation.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::error::CommandError;
use crate::experiment::blocks::Replacement;

/// Folders to copy; `{}` stands for the platform, `-` entries are left out of their parent folder.
const CONTIKI_FILES: &[&str] = &[
    "core",
    "dev/{}",
    "platform/{}",
    "cpu/{}",
    "Makefile.include",
    "tools",
    "-tools/code-style",
    "-tools/coffee-manager",
    "-tools/collect-view",
    "-tools/cooja",
    "-tools/csc",
    "-tools/cygwin",
    "-tools/mspsim",
    "-tools/powertrace",
    "-tools/release-tools",
    "-tools/wpcapslip",
    "-tools/avr-makecoffeedata",
    "-tools/avr-makefsdata",
    "-tools/avr-make-symbols",
];

/// RPL sources whose `DEBUG` level follows the `debug` parameter.
const DEBUG_FILES: &[&str] = &["rpl-icmp6.c"];

static CPU_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"cpu/([a-zA-Z0-9]+)(?:\s+|/)").expect("static pattern"));
static DEV_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"dev/([a-zA-Z0-9]+)(?:\s+|/)").expect("static pattern"));
static DEBUG_LEVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#define DEBUG DEBUG_([A-Z]+)$").expect("static pattern"));

fn io_err(action: &str, path: &Path) -> impl FnOnce(io::Error) -> CommandError {
    let context = format!("{} {}", action, path.display());
    move |e| CommandError::io(context, e)
}

/// `cpu` and `dev` subfolders referenced by the platform Makefiles of `target`.
fn platform_items(contiki: &Path, target: &str) -> [(&'static str, BTreeSet<String>); 2] {
    let mut items = [("cpu", BTreeSet::new()), ("dev", BTreeSet::new())];
    let platform = contiki.join("platform").join(target);
    for makefile in [format!("Makefile.{}", target), "Makefile.common".to_string()] {
        let Ok(text) = fs::read_to_string(platform.join(makefile)) else {
            continue;
        };
        for (item, found) in items.iter_mut() {
            let pattern = if *item == "cpu" { &CPU_ITEM } else { &DEV_ITEM };
            for caps in pattern.captures_iter(&text) {
                let name = &caps[1];
                if contiki.join(*item).join(name).exists() {
                    found.insert(format!("{}/{}", item, name));
                }
            }
        }
    }
    items
}

/// Relative paths of the Contiki tree needed to build for `targets`.
pub fn includes(contiki: &Path, targets: &[&str]) -> Vec<String> {
    let mut includes = BTreeSet::new();
    let mut excludes: Vec<(&str, &str)> = Vec::new();
    for entry in CONTIKI_FILES {
        if let Some(excluded) = entry.strip_prefix('-') {
            if let Some((folder, name)) = excluded.split_once('/') {
                excludes.push((folder, name));
            }
        } else if entry.starts_with("platform/") {
            includes.extend(targets.iter().map(|t| entry.replace("{}", t)));
        } else if !entry.contains("{}") {
            includes.insert(entry.to_string());
        }
    }
    for target in targets {
        for (item, found) in platform_items(contiki, target) {
            if found.is_empty() {
                includes.insert(item.to_string());
            } else {
                includes.extend(found);
            }
        }
    }
    // a whole cpu or dev folder supersedes its subfolders
    for item in ["cpu", "dev"] {
        if includes.contains(item) {
            let prefix = format!("{}/", item);
            includes.retain(|i| !i.starts_with(&prefix));
        }
    }
    let folders: BTreeSet<&str> = excludes.iter().map(|(folder, _)| *folder).collect();
    for folder in folders {
        if !includes.remove(folder) {
            continue;
        }
        let Ok(entries) = fs::read_dir(contiki.join(folder)) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !excludes.contains(&(folder, name.as_str())) {
                includes.insert(format!("{}/{}", folder, name));
            }
        }
    }
    includes.into_iter().collect()
}

/// Copies a file or a whole folder.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), CommandError> {
    if src.is_dir() {
        fs::create_dir_all(dst).map_err(io_err("creating", dst))?;
        for entry in fs::read_dir(src).map_err(io_err("listing", src))? {
            let entry = entry.map_err(io_err("listing", src))?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(io_err("creating", parent))?;
    }
    fs::copy(src, dst).map_err(io_err("copying", src))?;
    Ok(())
}

/// Copies what `targets` need from `contiki` into `<parent>/<contiki folder name>`.
pub fn copy_reduced(contiki: &Path, parent: &Path, targets: &[&str]) -> Result<PathBuf, CommandError> {
    if !contiki.is_dir() {
        return Err(CommandError::InvalidValue(format!(
            "Contiki folder {} does not exist",
            contiki.display()
        )));
    }
    let name = contiki.file_name().unwrap_or_else(|| OsStr::new("contiki"));
    let local = parent.join(name);
    debug!(" > Copying Contiki to {}...", local.display());
    for include in includes(contiki, targets) {
        let src = contiki.join(&include);
        if src.exists() {
            copy_tree(&src, &local.join(&include))?;
        } else {
            debug!(" > {} is not part of this Contiki installation", include);
        }
    }
    Ok(local)
}

/// Removes a private copy, ignoring a missing one.
pub fn remove(local: &Path) {
    if let Err(e) = fs::remove_dir_all(local) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(" > Could not remove {}: {}", local.display(), e);
        }
    }
}

pub fn rpl_folder(contiki: &Path) -> PathBuf {
    contiki.join("core").join("net").join("rpl")
}

/// Sets the `DEBUG` level of the RPL sources to `DEBUG_PRINT` or `DEBUG_NONE`.
pub fn apply_debug_flags(rpl: &Path, debug: bool) -> Result<(), CommandError> {
    let line = format!("#define DEBUG DEBUG_{}", if debug { "PRINT" } else { "NONE" });
    for name in DEBUG_FILES {
        let path = rpl.join(name);
        let text = fs::read_to_string(&path).map_err(io_err("reading", &path))?;
        let text = DEBUG_LEVEL.replace_all(&text, line.as_str());
        fs::write(&path, text.as_bytes()).map_err(io_err("writing", &path))?;
    }
    debug!(" > Debug flags set to {}", line);
    Ok(())
}

/// Swaps the RPL library for an external one.
pub fn replace_rpl(rpl: &Path, ext_lib: &Path) -> Result<(), CommandError> {
    debug!(" > Using external RPL library {}", ext_lib.display());
    if let Err(e) = fs::remove_dir_all(rpl) {
        if e.kind() != io::ErrorKind::NotFound {
            return Err(CommandError::io(format!("removing {}", rpl.display()), e));
        }
    }
    copy_tree(ext_lib, rpl)
}

/// Edits one line: a literal match is replaced as is, otherwise `from` is tried as a regex
/// whose first group (or whole match) is replaced.
fn replace_line(line: &str, from: &str, pattern: Option<&Regex>, to: &str) -> Option<String> {
    if line.contains(from) {
        return Some(line.replace(from, to));
    }
    let caps = pattern?.captures(line)?;
    let found = caps.get(1).or_else(|| caps.get(0))?.as_str();
    Some(line.replace(found, to))
}

/// Applies building-block edits to the RPL library sources.
pub fn apply_replacements(rpl: &Path, replacements: &[Replacement]) -> Result<(), CommandError> {
    for replacement in replacements {
        let path = rpl.join(&replacement.file);
        let text = fs::read_to_string(&path).map_err(io_err("reading", &path))?;
        let pattern = Regex::new(&replacement.from).ok();
        let mut replaced = false;
        let lines: Vec<String> = text
            .split_inclusive('\n')
            .map(|line| {
                let (body, end) = line.strip_suffix('\n').map_or((line, ""), |body| (body, "\n"));
                match replace_line(body, &replacement.from, pattern.as_ref(), &replacement.to) {
                    Some(edited) => {
                        replaced = true;
                        edited + end
                    }
                    None => line.to_string(),
                }
            })
            .collect();
        if replaced {
            debug!(" > Replaced '{}' in {}", replacement.from, replacement.file);
            fs::write(&path, lines.concat()).map_err(io_err("writing", &path))?;
        } else {
            debug!(" > '{}' not found in {}", replacement.from, replacement.file);
        }
    }
    Ok(())
}
