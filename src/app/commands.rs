//! Session commands: task table, kill, verbosity, listings and framework configuration.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::warn;

use crate::app::table::Table;
use crate::commands::context::{CommandArgs, CommandContext};
use crate::commands::descriptor::{Autocomplete, CommandDescriptor};
use crate::commands::pipeline::Shell;
use crate::commands::registry::CommandRegistry;
use crate::config::settings::{expand_home, Settings};
use crate::error::{CommandError, CommandResult};
use crate::experiment::{self, params::WSN_GEN_ALGORITHMS, structure};
use crate::logging;
use crate::manager::supervisor::TaskSupervisor;

/// Commands that only make sense with a task supervisor.
pub const PARALLEL_ONLY: [&str; 2] = ["kill", "status"];

fn session(ctx: &CommandContext) -> Result<&Arc<Shell>, CommandError> {
    ctx.shell()
        .ok_or_else(|| CommandError::InvalidValue("this command needs the console session".to_string()))
}

fn supervisor(shell: &Shell) -> Result<&Arc<TaskSupervisor>, CommandError> {
    shell
        .supervisor()
        .ok_or_else(|| CommandError::InvalidValue("no task pool in sequential mode".to_string()))
}

pub fn status(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let shell = session(ctx)?;
    let supervisor = supervisor(shell)?;
    supervisor.cleanup();
    let records = supervisor.records();
    // an empty line re-runs status with `restart`; unchanged tables are not printed twice
    if !shell.status_changed(&records) && args.bool_or("restart", false) {
        return Ok(None);
    }
    if records.is_empty() {
        return Ok(Some("No task currently running".to_string()));
    }
    let mut table = Table::new("Status of opened tasks", &[("Task", 15), ("Status", 10), ("Result", 40)]);
    for record in records {
        table.row(vec![record.label(), record.status.to_string(), record.result]);
    }
    Ok(Some(table.render()))
}

pub fn kill(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let shell = session(ctx)?;
    let task = args.str("task")?;
    match supervisor(shell)?.find_pending(&task) {
        Some(handle) => {
            let status = supervisor(shell)?.kill(handle);
            Ok(status.map(|s| format!("Task {} is now {}", task, s)))
        }
        None => {
            warn!(" [!] Task {} does not exist or is not a pending task", task);
            Ok(None)
        }
    }
}

fn pending_tasks(shell: &Shell) -> Vec<String> {
    shell
        .supervisor()
        .map(|s| s.pending_labels())
        .unwrap_or_default()
}

pub fn loglevel(args: &CommandArgs, _ctx: &CommandContext) -> CommandResult {
    let level = args.str("level")?;
    if logging::set_level(&level) {
        Ok(Some(format!(" [I] Verbose level is now set to: {}", level)))
    } else {
        warn!(" [!] Unknown verbose level: {}", level);
        Ok(None)
    }
}

fn log_levels(_shell: &Shell) -> Vec<String> {
    logging::level_names()
}

pub fn list(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let experiments = &ctx.settings.experiments_folder;
    let (title, items) = match args.str("item_type")?.as_str() {
        "experiments" => ("Available experiments", structure::list_experiments(experiments, true)),
        "campaigns" => ("Available campaigns", structure::list_campaigns(experiments)),
        "wsn-generation-algorithms" => (
            "Available WSN generation algorithms",
            WSN_GEN_ALGORITHMS.iter().map(|a| a.to_string()).collect(),
        ),
        other => {
            warn!(" [!] Unknown item type: {}", other);
            return Ok(None);
        }
    };
    let mut table = Table::new(title, &[("Name", 25)]);
    for item in items {
        table.row(vec![format!("- {}", item)]);
    }
    Ok(Some(table.render()))
}

pub fn config(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let contiki_folder = PathBuf::from(args.str("contiki_folder")?);
    let experiments_folder = PathBuf::from(args.str("experiments_folder")?);
    let expanded = expand_home(&experiments_folder);
    fs::create_dir_all(&expanded).map_err(|e| CommandError::io(format!("creating {}", expanded.display()), e))?;
    let settings = Settings {
        contiki_folder,
        experiments_folder,
        ..(*ctx.settings).clone()
    };
    let file = ctx.settings.file();
    settings.save(&file)?;
    Ok(Some(format!("Configuration written to {}", file.display())))
}

pub fn descriptors() -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor::new("status", status)
            .doc("Display process pool status.\n:param restart: only show the table when it changed")
            .param_default("restart", false)
            .reexec_on_emptyline(),
        CommandDescriptor::new("kill", kill)
            .doc("Kill a task from the pool.\n:param task: task label, as shown by 'status'")
            .param("task")
            .examples(&["my-simulation[run]"])
            .autocomplete(Autocomplete::Lazy(pending_tasks)),
        CommandDescriptor::new("loglevel", loglevel)
            .doc("Change the log level (info|warning|error|debug) [default: info].\n:param level: verbosity name")
            .param("level")
            .examples(&["debug", "info"])
            .autocomplete(Autocomplete::Lazy(log_levels)),
        CommandDescriptor::new("list", list)
            .doc("List all available items of a specified type.\n:param item_type: experiments/campaigns/wsn-generation-algorithms")
            .param("item_type")
            .examples(&["experiments", "campaigns", "wsn-generation-algorithms"])
            .autocomplete(Autocomplete::Static(vec![
                "campaigns",
                "experiments",
                "wsn-generation-algorithms",
            ]))
            .reexec_on_emptyline(),
        CommandDescriptor::new("config", config)
            .doc("Create a new configuration file.\n:param contiki_folder: Contiki folder\n:param experiments_folder: experiments folder")
            .param_default("contiki_folder", "~/contiki")
            .param_default("experiments_folder", "~/Experiments")
            .start_msg("CREATING CONFIGURATION FILE")
            .examples(&["/opt/contiki", "~/contiki ~/Documents/experiments"]),
    ]
}

/// Every operator command; `kill` and `status` only when a task pool backs the session.
pub fn registry(parallel: bool) -> Result<CommandRegistry, CommandError> {
    let mut registry = CommandRegistry::default();
    let commands = descriptors().into_iter().chain(experiment::commands::descriptors());
    for descriptor in commands.filter(|d| parallel || !PARALLEL_ONLY.contains(&d.name)) {
        registry.register(descriptor)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::pipeline::tests::ScriptedPrompt;
    use crate::commands::pipeline::{Dispatch, Invocation};
    use crossbeam_channel::bounded;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Arc<Settings> {
        Arc::new(Settings {
            experiments_folder: dir.path().to_path_buf(),
            crash_reports: false,
            workers: Some(1),
            file: Some(dir.path().join("rpla.toml")),
            ..Settings::default()
        })
    }

    fn sequential(dir: &TempDir) -> Arc<Shell> {
        Arc::new(Shell::new(
            registry(false).unwrap(),
            settings(dir),
            Box::new(ScriptedPrompt(VecDeque::new())),
        ))
    }

    fn completed(dispatch: Dispatch) -> String {
        match dispatch {
            Dispatch::Completed(Some(text)) => text,
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn sequential_registry_has_no_pool_commands() {
        let names = registry(false).unwrap().names();
        assert!(names.contains(&"make_all"));
        assert!(!names.contains(&"status"));
        assert!(!names.contains(&"kill"));
        assert!(registry(true).unwrap().names().contains(&"kill"));
    }

    #[test]
    fn list_renders_algorithms_and_rejects_unknown_types() {
        let dir = TempDir::new().unwrap();
        let shell = sequential(&dir);
        let text = completed(shell.invoke("list", Invocation::line("wsn-generation-algorithms")).unwrap());
        assert!(text.contains("Available WSN generation algorithms"));
        assert!(text.contains("- quadrants"));
        assert_eq!(
            shell.invoke("list", Invocation::line("motes")).unwrap(),
            Dispatch::Completed(None)
        );
    }

    #[test]
    fn config_writes_the_settings_file() {
        let dir = TempDir::new().unwrap();
        let shell = sequential(&dir);
        let experiments = dir.path().join("exp");
        let line = format!("/opt/contiki {}", experiments.display());
        completed(shell.invoke("config", Invocation::line(line)).unwrap());
        assert!(experiments.is_dir());
        let saved = Settings::load(&dir.path().join("rpla.toml")).unwrap();
        assert_eq!(saved.contiki_folder, PathBuf::from("/opt/contiki"));
        assert_eq!(saved.experiments_folder, experiments);
    }

    #[test]
    fn status_and_kill_follow_the_task_table() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let supervisor = Arc::new(TaskSupervisor::new(&settings));
        supervisor.start();
        let (release, wait) = bounded::<()>(1);
        let mut registry = registry(true).unwrap();
        registry
            .register(
                CommandDescriptor::new("wait", move |_, _| {
                    let _ = wait.recv_timeout(Duration::from_secs(5));
                    Ok(None)
                })
                .param("name")
                .pooled(),
            )
            .unwrap();
        let shell = Arc::new(
            Shell::new(registry, settings, Box::new(ScriptedPrompt(VecDeque::new())))
                .with_supervisor(Arc::clone(&supervisor)),
        );

        assert_eq!(
            completed(shell.invoke("status", Invocation::line("")).unwrap()),
            "No task currently running"
        );
        let Dispatch::Submitted(handle) = shell.invoke("wait", Invocation::line("E1")).unwrap() else {
            panic!("wait should be pooled");
        };
        let table = completed(shell.invoke("status", Invocation::line("")).unwrap());
        assert!(table.contains("E1[wait]"));
        assert_eq!(
            shell.invoke("status", Invocation::line("restart=true")).unwrap(),
            Dispatch::Completed(None)
        );

        assert_eq!(
            shell.invoke("kill", Invocation::line("E2[wait]")).unwrap(),
            Dispatch::Completed(None)
        );
        release.send(()).unwrap();
        supervisor.wait_settled(handle, Duration::from_secs(5));
        assert!(!supervisor.task_pending("E1"));
    }
}
