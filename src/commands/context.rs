use std::path::PathBuf;
use std::sync::Arc;

use crate::commands::pipeline::Shell;
use crate::config::Settings;
use crate::error::CommandError;
use crate::experiment::build_cache::BuildCache;
use crate::models::value::{Kwargs, Value};
use crate::worker::process::{CancelToken, ChildTracker};

/// Arguments of one invocation, bound by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs {
    named: Kwargs,
}

impl CommandArgs {
    pub fn new(named: Kwargs) -> Self {
        Self { named }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name).filter(|v| !v.is_none())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.named.insert(name.to_string(), value.into());
    }

    pub fn kwargs(&self) -> &Kwargs {
        &self.named
    }

    pub fn str(&self, name: &str) -> Result<String, CommandError> {
        match self.get(name) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(Value::List(_)) | Some(Value::Map(_)) => Err(CommandError::InvalidValue(format!(
                "'{}' should be a string",
                name
            ))),
            Some(other) => Ok(other.to_string()),
            None => Err(CommandError::MissingArgument(name.to_string())),
        }
    }

    pub fn path(&self, name: &str) -> Result<PathBuf, CommandError> {
        self.str(name).map(PathBuf::from)
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(default)
    }
}

/// What a command implementation sees besides its arguments.
#[derive(Clone)]
pub struct CommandContext {
    pub settings: Arc<Settings>,
    pub build_cache: Arc<BuildCache>,
    /// Name of the command when running as a pooled task.
    pub task: Option<String>,
    shell: Option<Arc<Shell>>,
    tracker: Option<ChildTracker>,
    cancel: CancelToken,
}

impl CommandContext {
    pub fn new(settings: Arc<Settings>, build_cache: Arc<BuildCache>) -> Self {
        Self {
            settings,
            build_cache,
            task: None,
            shell: None,
            tracker: None,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_shell(mut self, shell: Arc<Shell>) -> Self {
        self.shell = Some(shell);
        self
    }

    /// Context for a job leaving the console thread: the shell stays behind.
    pub fn into_task(mut self, name: &str, tracker: ChildTracker, cancel: CancelToken) -> Self {
        self.shell = None;
        self.task = Some(name.to_string());
        self.tracker = Some(tracker);
        self.cancel = cancel;
        self
    }

    pub fn shell(&self) -> Option<&Arc<Shell>> {
        self.shell.as_ref()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<(), CommandError> {
        if self.is_cancelled() {
            Err(CommandError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn child_spawned(&self, pid: u32) {
        if let Some(tracker) = &self.tracker {
            tracker.spawned(pid);
        }
    }

    pub fn child_exited(&self, pid: u32) {
        if let Some(tracker) = &self.tracker {
            tracker.exited(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_values_count_as_absent() {
        let mut args = CommandArgs::default();
        args.set("path", Value::None);
        assert!(args.contains("path"));
        assert!(args.get("path").is_none());
        assert!(matches!(
            args.str("path"),
            Err(CommandError::MissingArgument(_))
        ));
    }

    #[test]
    fn scalar_values_render_as_strings() {
        let mut args = CommandArgs::default();
        args.set("n", 12i64);
        args.set("ask", false);
        assert_eq!(args.str("n").unwrap(), "12");
        assert!(!args.bool_or("ask", true));
        assert!(args.bool_or("missing", true));
    }

    #[test]
    fn task_context_drops_the_shell() {
        let ctx = CommandContext::new(Arc::new(Settings::default()), Arc::new(BuildCache::default()));
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let tracker = ChildTracker::new(crate::models::task::TaskHandle(1), sender);
        let cancel = CancelToken::default();
        let task = ctx.into_task("make", tracker, cancel.clone());
        assert!(task.shell().is_none());
        assert_eq!(task.task.as_deref(), Some("make"));
        cancel.cancel();
        assert!(matches!(task.check_cancelled(), Err(CommandError::Cancelled)));
    }
}
