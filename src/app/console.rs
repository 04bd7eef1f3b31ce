use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    style::Stylize,
    terminal,
};
use log::{debug, error, warn};

use crate::commands::pipeline::{Dispatch, Invocation, Prompt, Shell};
use crate::error::CommandError;

const MAX_HISTORY_ENTRIES: usize = 10;
const BUILTINS: [&str; 4] = ["clear", "exit", "help", "history"];
const WELCOME: &str = "Type help or ? to list commands.";

/// Answers confirmation questions from the terminal, leaving raw mode while the operator types.
pub struct ConsolePrompt;

impl Prompt for ConsolePrompt {
    fn ask(&mut self, question: &str) -> String {
        let raw = terminal::is_raw_mode_enabled().unwrap_or(false);
        if raw {
            let _ = terminal::disable_raw_mode();
        }
        print!("\r{}", question);
        let _ = io::stdout().flush();
        let mut answer = String::new();
        if io::stdin().read_line(&mut answer).is_err() {
            answer.clear();
        }
        if raw {
            let _ = terminal::enable_raw_mode();
        }
        answer.trim().to_string()
    }
}

/// Marks the running console; a second console refuses to start while the file exists.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Fails with the PID found in an existing file.
    pub fn acquire(path: &Path) -> Result<PidFile, String> {
        if path.is_file() {
            let pid = fs::read_to_string(path).unwrap_or_default();
            return Err(pid.trim().to_string());
        }
        if let Err(e) = fs::write(path, std::process::id().to_string()) {
            debug!("Could not write {}: {}", path.display(), e);
        }
        Ok(PidFile {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Last distinct lines typed at the console.
#[derive(Debug, Default)]
struct History {
    entries: Vec<String>,
    index: usize,
}

impl History {
    fn push(&mut self, line: &str) {
        let line = line.trim();
        let repeated = self.entries.last().is_some_and(|last| last == line);
        if !line.is_empty() && !line.starts_with("history") && !repeated {
            if self.entries.len() >= MAX_HISTORY_ENTRIES {
                self.entries.remove(0);
            }
            self.entries.push(line.to_string());
        }
        self.index = self.entries.len();
    }

    fn older(&mut self) -> Option<&str> {
        if self.index > 0 {
            self.index -= 1;
        }
        self.entries.get(self.index).map(String::as_str)
    }

    /// `None` once past the newest entry, i.e. back to an empty line.
    fn newer(&mut self) -> Option<&str> {
        if self.index < self.entries.len() {
            self.index += 1;
        }
        self.entries.get(self.index).map(String::as_str)
    }
}

enum Input {
    Line(String),
    Eof,
}

pub struct Console {
    shell: Arc<Shell>,
    prompt: String,
    history: History,
    last_command: Option<String>,
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn print_lines(text: &str) {
    for line in text.lines() {
        println!("\r{}", line);
    }
}

impl Console {
    pub fn new(shell: Arc<Shell>) -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
        let prompt = format!(
            "{}{}{}{}{}{} ",
            user.magenta(),
            "@".cyan(),
            hostname().blue(),
            ":".cyan(),
            "rpl-attacks".red(),
            ">>".cyan()
        );
        Console {
            shell,
            prompt,
            history: History::default(),
            last_command: None,
        }
    }

    /// Runs the console until `exit` or Ctrl+D, then waits for the task pool to drain.
    pub fn run(mut self) -> Result<(), CommandError> {
        let pidfile = match PidFile::acquire(&self.shell.settings().pidfile) {
            Ok(pidfile) => pidfile,
            Err(pid) => {
                warn!(
                    "RPL Attacks Framework is already running in another terminal (PID: {})",
                    pid
                );
                return Ok(());
            }
        };
        println!("{}", WELCOME);

        terminal::enable_raw_mode().map_err(|e| CommandError::io("enabling raw mode", e))?;
        let result = self.interact();
        let _ = terminal::disable_raw_mode();
        drop(pidfile);
        result.map_err(|e| CommandError::io("reading console input", e))?;

        self.graceful_exit()
    }

    fn interact(&mut self) -> io::Result<()> {
        loop {
            match self.read_line()? {
                Input::Line(line) => {
                    if !self.execute(&line)? {
                        return Ok(());
                    }
                }
                Input::Eof => {
                    println!("\r");
                    return Ok(());
                }
            }
        }
    }

    fn graceful_exit(&self) -> Result<(), CommandError> {
        let Some(supervisor) = self.shell.supervisor() else {
            return Ok(());
        };
        let interrupted = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
            .map_err(|e| CommandError::io("registering SIGINT handler", e))?;
        supervisor.graceful_shutdown(&interrupted);
        Ok(())
    }

    fn redraw(&self, input: &str) -> io::Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        write!(stdout, "{}{}", self.prompt, input)?;
        stdout.flush()
    }

    fn read_line(&mut self) -> io::Result<Input> {
        let mut input = String::new();
        self.redraw(&input)?;
        loop {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
            match key.code {
                KeyCode::Enter => {
                    println!("\r");
                    return Ok(Input::Line(input));
                }
                KeyCode::Char('c') if ctrl => {
                    input.clear();
                    println!("\r");
                }
                KeyCode::Char('d') if ctrl => {
                    if input.is_empty() {
                        return Ok(Input::Eof);
                    }
                }
                KeyCode::Up => {
                    if let Some(entry) = self.history.older() {
                        input = entry.to_string();
                    }
                }
                KeyCode::Down => {
                    input = self.history.newer().unwrap_or_default().to_string();
                }
                KeyCode::Tab => {
                    let candidates = self.complete(&input);
                    match candidates.as_slice() {
                        [] => {}
                        [single] => input = complete_input(&input, single),
                        many => {
                            println!("\r");
                            print_lines(&many.join("  "));
                        }
                    }
                }
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) => input.push(c),
                _ => continue,
            }
            self.redraw(&input)?;
        }
    }

    /// Completion candidates for the word under the cursor.
    fn complete(&self, input: &str) -> Vec<String> {
        match input.split_once(' ') {
            None => {
                let mut names: Vec<String> = BUILTINS
                    .iter()
                    .copied()
                    .chain(self.shell.registry().names())
                    .filter(|name| name.starts_with(input))
                    .map(str::to_string)
                    .collect();
                names.sort();
                names
            }
            Some(("help", topic)) => self
                .shell
                .registry()
                .names()
                .into_iter()
                .filter(|name| name.starts_with(topic.trim()))
                .map(str::to_string)
                .collect(),
            Some((name, rest)) => {
                let Some(descriptor) = self.shell.registry().get(name) else {
                    return vec![];
                };
                let word = rest.rsplit(' ').next().unwrap_or_default();
                descriptor
                    .autocomplete
                    .as_ref()
                    .map(|a| a.candidates(&self.shell, word))
                    .unwrap_or_default()
            }
        }
    }

    /// Handles one line; returns `false` when the console should stop.
    fn execute(&mut self, line: &str) -> io::Result<bool> {
        let line = line.trim();
        if line.is_empty() {
            if let Some((name, args)) = self.reexec_line() {
                self.dispatch(&name, &args);
            }
            return Ok(true);
        }
        self.history.push(line);
        self.last_command = Some(line.to_string());
        let (name, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match name {
            "exit" => return Ok(false),
            "help" | "?" => self.help(args.trim()),
            "history" => {
                println!("\rLast {} commands", self.history.entries.len());
                for entry in &self.history.entries {
                    println!("\r > {}", entry);
                }
            }
            "clear" => {
                execute!(
                    io::stdout(),
                    terminal::Clear(terminal::ClearType::All),
                    cursor::MoveTo(0, 0)
                )?;
            }
            _ => self.dispatch(name, args),
        }
        Ok(true)
    }

    /// Command to run again on an empty line, if the last one asks for it.
    fn reexec_line(&self) -> Option<(String, String)> {
        let last = self.last_command.as_deref()?;
        let (name, args) = last.split_once(char::is_whitespace).unwrap_or((last, ""));
        let descriptor = self.shell.registry().get(name)?;
        if !descriptor.reexec_on_emptyline {
            return None;
        }
        if name == "status" {
            return Some((name.to_string(), "restart=true".to_string()));
        }
        Some((name.to_string(), args.to_string()))
    }

    fn dispatch(&self, name: &str, args: &str) {
        match self.shell.invoke(name, Invocation::line(args)) {
            Ok(Dispatch::Completed(Some(text))) => print_lines(&text),
            Ok(Dispatch::Submitted(handle)) => debug!("Task {} submitted", handle),
            Ok(_) => {}
            Err(e) => error!("{}", e),
        }
    }

    fn help(&self, topic: &str) {
        if topic.is_empty() {
            println!("\rDocumented commands (type help <topic>):");
            println!("\r{}", "=".repeat(40));
            let mut names: Vec<&str> = BUILTINS.to_vec();
            names.extend(self.shell.registry().names());
            names.sort();
            for chunk in names.chunks(6) {
                println!("\r{}", chunk.iter().map(|n| format!("{:<12}", n)).collect::<String>());
            }
            return;
        }
        match self.shell.registry().get(topic) {
            Some(descriptor) => print_lines(&descriptor.help_text()),
            None if BUILTINS.contains(&topic) => println!("\r    Console builtin: {}", topic),
            None => warn!(" [!] Unknown command: {}", topic),
        }
    }
}

/// Replaces the last word of `input` by `candidate`.
fn complete_input(input: &str, candidate: &str) -> String {
    match input.rsplit_once(' ') {
        Some((head, _)) => format!("{} {}", head, candidate),
        None => candidate.to_string(),
    }
}
