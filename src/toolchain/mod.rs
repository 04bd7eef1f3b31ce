//! Calls into the external build and simulation toolchain.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use log::{debug, error};
use regex::Regex;

use crate::commands::context::CommandContext;
use crate::error::CommandError;
use crate::logging::CRITICAL;

const NOISY_PREFIXES: [&str; 4] = ["cp ", "mkdir ", "  CC", "  AR"];

fn is_noise(line: &str) -> bool {
    line.trim().is_empty()
        || NOISY_PREFIXES.iter().any(|p| line.starts_with(p))
        || line.contains("warning")
}

/// Keeps the lines of a failed build that are worth showing.
pub fn filter_output(output: &str) -> Vec<&str> {
    output.lines().filter(|line| !is_noise(line)).collect()
}

/// Runs `cmdline` through `sh -c` in `cwd` and returns its stdout and stderr, interleaved.
///
/// The child leads its own process group so the console's interrupt does not reach it;
/// the group id is reported to the supervisor for `kill`.
pub fn run(cwd: &Path, cmdline: &str, ctx: &CommandContext) -> Result<String, CommandError> {
    ctx.check_cancelled()?;
    debug!("Running '{}' in {}", cmdline, cwd.display());
    let child = Command::new("sh")
        .arg("-c")
        .arg(format!("exec 2>&1; {}", cmdline))
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| CommandError::io(format!("spawning '{}'", cmdline), e))?;
    let pid = child.id();
    ctx.child_spawned(pid);
    let output = child.wait_with_output();
    ctx.child_exited(pid);
    let output = output.map_err(|e| CommandError::io(format!("waiting for '{}'", cmdline), e))?;
    let text = String::from_utf8_lossy(&output.stdout).into_owned();

    if output.status.success() {
        return Ok(text);
    }
    ctx.check_cancelled()?;
    let shown = filter_output(&text);
    if !shown.is_empty() {
        error!(target: CRITICAL, "{}", shown.join("\n"));
    }
    Err(CommandError::CommandFailed {
        command: cmdline.to_string(),
        code: output.status.code(),
    })
}

static BLOCK_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:(FATAL|ERROR)|INFO)").expect("static pattern"));

/// Error blocks of a simulator log: from a `FATAL`/`ERROR` line up to the next `INFO` line.
pub fn simulation_errors(output: &str) -> Vec<String> {
    let mut blocks = vec![];
    let mut buffer: Vec<&str> = vec![];
    for line in output.lines() {
        match BLOCK_MARKER.captures(line) {
            Some(caps) if caps.get(1).is_some() => buffer.push(line),
            Some(_) => {
                if !buffer.is_empty() {
                    blocks.push(buffer.join("\n"));
                    buffer.clear();
                }
            }
            None if !buffer.is_empty() => buffer.push(line),
            None => {}
        }
    }
    if !buffer.is_empty() {
        blocks.push(buffer.join("\n"));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::experiment::build_cache::BuildCache;
    use crate::models::{message::TaskMessage, task::TaskHandle};
    use crate::worker::process::{CancelToken, ChildTracker};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx() -> CommandContext {
        CommandContext::new(Arc::new(Settings::default()), Arc::new(BuildCache::default()))
    }

    #[test]
    fn noisy_build_lines_are_dropped() {
        let output = "mkdir obj_z1\n  CC ../../core/net/ip/uip.c\nfoo.c:12: warning: unused\nfoo.c:40: error: boom\n";
        assert_eq!(filter_output(output), vec!["foo.c:40: error: boom"]);
    }

    #[test]
    fn output_of_successful_command_is_returned() {
        let dir = TempDir::new().unwrap();
        let out = run(dir.path(), "echo hello; echo oops >&2", &ctx()).unwrap();
        assert_eq!(out, "hello\noops\n");
    }

    #[test]
    fn failing_command_reports_its_code() {
        let dir = TempDir::new().unwrap();
        let err = run(dir.path(), "exit 3", &ctx()).unwrap_err();
        assert!(matches!(err, CommandError::CommandFailed { code: Some(3), .. }));
        assert_eq!(err.to_string(), "Command 'exit 3' failed.");
    }

    #[test]
    fn children_are_reported_to_the_supervisor() {
        let dir = TempDir::new().unwrap();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let ctx = ctx().into_task(
            "make",
            ChildTracker::new(TaskHandle(4), sender),
            CancelToken::default(),
        );
        run(dir.path(), "true", &ctx).unwrap();
        let messages: Vec<TaskMessage> = receiver.try_iter().collect();
        assert!(matches!(messages[0], TaskMessage::ChildSpawned(TaskHandle(4), _)));
        assert!(matches!(messages[1], TaskMessage::ChildExited(TaskHandle(4), _)));
    }

    #[test]
    fn cancelled_context_does_not_spawn() {
        let dir = TempDir::new().unwrap();
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let cancel = CancelToken::default();
        cancel.cancel();
        let ctx = ctx().into_task("run", ChildTracker::new(TaskHandle(1), sender), cancel);
        assert!(matches!(
            run(dir.path(), "touch marker", &ctx),
            Err(CommandError::Cancelled)
        ));
        assert!(!dir.path().join("marker").exists());
    }

    #[test]
    fn simulator_error_blocks_end_at_info() {
        let log = "INFO start\nERROR bad mote\n  at line 3\nINFO resumed\nFATAL crash\n";
        assert_eq!(
            simulation_errors(log),
            vec!["ERROR bad mote\n  at line 3".to_string(), "FATAL crash".to_string()]
        );
    }

    #[test]
    fn indented_markers_count_and_clean_logs_have_no_blocks() {
        assert_eq!(simulation_errors("  FATAL x\n  INFO y\n"), vec!["  FATAL x".to_string()]);
        assert!(simulation_errors("INFO a\nmote 1 ERRORS: 0\n").is_empty());
    }
}
