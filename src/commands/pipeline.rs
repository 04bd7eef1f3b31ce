use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use crate::commands::behavior::{ExecutionBehavior, PooledCommand, SyncCommand};
use crate::commands::context::{CommandArgs, CommandContext};
use crate::commands::descriptor::{render_message, BehaviorKind, CommandDescriptor, Severity};
use crate::commands::lexer;
use crate::commands::monitor::CrashReporter;
use crate::commands::registry::CommandRegistry;
use crate::config::Settings;
use crate::error::CommandError;
use crate::experiment::build_cache::BuildCache;
use crate::manager::supervisor::TaskSupervisor;
use crate::models::task::{TaskHandle, TaskRecord};
use crate::models::value::{Kwargs, Value};

/// Source of yes/no answers for confirmation gates.
pub trait Prompt: Send {
    fn ask(&mut self, question: &str) -> String;
}

pub enum Invocation {
    /// Console input: the line is lexed, `kwargs` are merged over the lexed keywords.
    Line { line: String, kwargs: Kwargs },
    Call { args: Vec<Value>, kwargs: Kwargs },
}

impl Invocation {
    pub fn line(line: impl Into<String>) -> Self {
        Invocation::Line {
            line: line.into(),
            kwargs: Kwargs::new(),
        }
    }

    pub fn call(args: Vec<Value>, kwargs: Kwargs) -> Self {
        Invocation::Call { args, kwargs }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    UnknownCommand(String),
    InvalidCommand,
    BadArguments,
    MissingArgument(String),
    Gate(String),
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Aborted(AbortReason),
    /// Another task on the same subject is still active.
    Refused { blocking: String },
    Submitted(TaskHandle),
    Completed(Option<String>),
}

impl Dispatch {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Dispatch::Aborted(_) | Dispatch::Refused { .. })
    }
}

/// One operator session: the commands, the optional task supervisor and the shared state handed to commands.
pub struct Shell {
    registry: CommandRegistry,
    supervisor: Option<Arc<TaskSupervisor>>,
    settings: Arc<Settings>,
    build_cache: Arc<BuildCache>,
    prompt: Mutex<Box<dyn Prompt>>,
    last_status: Mutex<Option<u64>>,
}

impl Shell {
    pub fn new(registry: CommandRegistry, settings: Arc<Settings>, prompt: Box<dyn Prompt>) -> Self {
        Shell {
            registry,
            supervisor: None,
            settings,
            build_cache: Arc::new(BuildCache::default()),
            prompt: Mutex::new(prompt),
            last_status: Mutex::new(None),
        }
    }

    pub fn with_supervisor(mut self, supervisor: Arc<TaskSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> Option<&Arc<TaskSupervisor>> {
        self.supervisor.as_ref()
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn is_parallel(&self) -> bool {
        self.supervisor.is_some()
    }

    pub fn confirm(&self, question: &str) -> bool {
        let mut prompt = self.prompt.lock().unwrap_or_else(PoisonError::into_inner);
        prompt.ask(question).trim() == "yes"
    }

    pub fn task_pending(&self, subject: &str) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(|s| s.task_pending(subject))
    }

    /// Records `records` as last shown and tells whether they differ from the previous snapshot.
    pub fn status_changed(&self, records: &[TaskRecord]) -> bool {
        let mut hasher = DefaultHasher::new();
        for record in records {
            (record.handle, record.status, &record.result).hash(&mut hasher);
        }
        let digest = hasher.finish();
        let mut last = self.last_status.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = *last != Some(digest);
        *last = Some(digest);
        changed
    }

    /// Runs `name` through argument checks, expansion and gates, then dispatches it.
    pub fn invoke(self: &Arc<Self>, name: &str, invocation: Invocation) -> Result<Dispatch, CommandError> {
        let Some(descriptor) = self.registry.get(name) else {
            warn!(" [!] Unknown command: {}", name);
            return Ok(Dispatch::Aborted(AbortReason::UnknownCommand(name.to_string())));
        };

        let (args, kwargs) = match invocation {
            Invocation::Line { line, kwargs: extra } => match lexer::analyze(&line) {
                Ok((args, mut kwargs)) => {
                    kwargs.extend(extra);
                    (args, kwargs)
                }
                Err(e) => {
                    warn!(" [!] Invalid command: {} {}", name, line.trim());
                    debug!("{}", e);
                    return Ok(Dispatch::Aborted(AbortReason::InvalidCommand));
                }
            },
            Invocation::Call { args, kwargs } => (args, kwargs),
        };
        let subject = args.first().map(|v| v.to_string());
        let silent = kwargs.get("silent").and_then(Value::as_bool).unwrap_or(false);

        let signature = &descriptor.signature;
        if args.len() < signature.required() || args.len() > signature.params.len() {
            return Ok(bad_arguments(&descriptor));
        }
        let mut bound = match signature.bind(args, kwargs) {
            Ok(bound) => bound,
            Err(param) => {
                debug!("'{}' received more than one value", param);
                return Ok(bad_arguments(&descriptor));
            }
        };

        if let Some(reason) = self.expand(&descriptor, &mut bound) {
            return Ok(Dispatch::Aborted(reason));
        }
        if let Some(reason) = self.check_gates(&descriptor, &bound, silent) {
            return Ok(Dispatch::Aborted(reason));
        }

        let ctx = CommandContext::new(Arc::clone(&self.settings), Arc::clone(&self.build_cache))
            .with_shell(Arc::clone(self));

        if let (Some(supervisor), Some(subject), true) =
            (&self.supervisor, &subject, descriptor.is_pooled())
        {
            let nested = matches!(
                descriptor.behavior,
                BehaviorKind::Pooled {
                    nested_children: true
                }
            );
            let handle = match supervisor.reserve(subject, descriptor.name, nested) {
                Ok(handle) => handle,
                Err(blocking) => {
                    warn!("A task is still pending on this experiment ({})", blocking);
                    return Ok(Dispatch::Refused { blocking });
                }
            };
            self.start_message(&descriptor, &bound);
            let mut behavior =
                PooledCommand::new(Arc::clone(supervisor), Arc::clone(&descriptor), handle);
            if self.settings.crash_reports {
                behavior = behavior
                    .with_crash_reports(CrashReporter::new(self.settings.experiments_folder.clone()));
            }
            behavior.run(bound, ctx)?;
            return Ok(Dispatch::Submitted(handle));
        }

        self.start_message(&descriptor, &bound);
        SyncCommand::new(descriptor).run(bound, ctx).map(Dispatch::Completed)
    }

    fn expand(&self, descriptor: &CommandDescriptor, bound: &mut CommandArgs) -> Option<AbortReason> {
        let expand = descriptor.expand.as_ref()?;
        let Some(value) = bound.get(expand.arg).map(|v| v.to_string()) else {
            debug!("Nothing to expand: '{}' is missing", expand.arg);
            return Some(AbortReason::MissingArgument(expand.arg.to_string()));
        };
        let expanded = expand.expand(&self.settings, &value);
        let expanded_str = expanded.to_string_lossy().into_owned();
        match expand.new_arg {
            Some(new_arg) if !descriptor.signature.has(new_arg) => bound.set(new_arg, expanded_str),
            Some(_) => {}
            None => bound.set(expand.arg, expanded_str),
        }
        if bound.get("path").is_none() {
            let parent = expanded
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            bound.set("path", parent);
        }
        None
    }

    fn check_gates(
        &self,
        descriptor: &CommandDescriptor,
        bound: &CommandArgs,
        silent: bool,
    ) -> Option<AbortReason> {
        for gate in &descriptor.gates {
            let Some(value) = bound.get(gate.arg).map(|v| v.to_string()) else {
                return Some(AbortReason::MissingArgument(gate.arg.to_string()));
            };
            if !gate.violated(Path::new(&value)) {
                continue;
            }
            let message = gate
                .message
                .map(|m| render_message(m, bound))
                .unwrap_or_else(|| value.clone());
            if let Some(level) = gate.level {
                if !silent {
                    level.log(&message);
                }
                if level.is_fatal() {
                    return Some(AbortReason::Gate(message));
                }
            }
            if let Some(question) = gate.confirm.filter(|_| gate.asks()) {
                let ask = gate.ask_param.is_some_and(|p| bound.bool_or(p, false));
                if ask && !self.confirm(question) {
                    return Some(AbortReason::Declined);
                }
            }
        }
        None
    }

    fn start_message(&self, descriptor: &CommandDescriptor, bound: &CommandArgs) {
        if let Some(msg) = descriptor.start_msg {
            info!("{}", render_message(msg, bound));
        }
    }
}

fn bad_arguments(descriptor: &CommandDescriptor) -> Dispatch {
    Severity::Critical.log("Bad input arguments !");
    info!("This command has the following signature: {}", descriptor.usage());
    info!("Please check the documentation for more information.");
    Dispatch::Aborted(AbortReason::BadArguments)
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("commands", &self.registry.names())
            .field("parallel", &self.is_parallel())
            .finish()
    }
}
