mod app;
mod commands;
mod config;
mod error;
mod experiment;
mod logging;
mod manager;
mod models;
mod toolchain;
mod worker;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;

use app::console::{Console, ConsolePrompt};
use commands::pipeline::{Dispatch, Invocation, Shell};
use config::settings::{Settings, SETTINGS_FILE};
use manager::supervisor::TaskSupervisor;

/// RPL attacks simulation framework console.
#[derive(Parser, Debug)]
#[command(name = "rpla", version)]
struct Cli {
    /// Run every command in the foreground, without the task pool
    #[arg(short, long)]
    sequential: bool,

    /// Settings file
    #[arg(long, default_value = SETTINGS_FILE)]
    settings: PathBuf,

    /// Command to run once instead of opening the console
    command: Option<String>,

    /// Arguments of the one-shot command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn one_shot(shell: Shell, command: &str, args: &[String]) -> ExitCode {
    let shell = Arc::new(shell);
    match shell.invoke(command, Invocation::line(args.join(" "))) {
        Ok(dispatch) if dispatch.is_aborted() => ExitCode::FAILURE,
        Ok(Dispatch::Completed(Some(text))) => {
            println!("{}", text.replace('\r', ""));
            ExitCode::SUCCESS
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    let settings = match Settings::load(&cli.settings) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let parallel = !cli.sequential && cli.command.is_none();
    let registry = match app::commands::registry(parallel) {
        Ok(registry) => registry,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(command) = cli.command.as_deref() {
        let shell = Shell::new(registry, settings, Box::new(ConsolePrompt));
        return one_shot(shell, command, &cli.args);
    }

    let mut shell = Shell::new(registry, Arc::clone(&settings), Box::new(ConsolePrompt));
    if parallel {
        let supervisor = Arc::new(TaskSupervisor::new(&settings));
        supervisor.start();
        shell = shell.with_supervisor(supervisor);
    }
    match Console::new(Arc::new(shell)).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
