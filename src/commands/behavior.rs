use std::sync::Arc;

use log::debug;

use crate::commands::context::{CommandArgs, CommandContext};
use crate::commands::descriptor::CommandDescriptor;
use crate::commands::monitor::{CommandMonitor, CrashReporter};
use crate::error::CommandResult;
use crate::manager::supervisor::TaskSupervisor;
use crate::models::task::{TaskHandle, TaskStatus};

/// How a command body gets executed once its arguments are ready.
pub trait ExecutionBehavior {
    fn run(&mut self, args: CommandArgs, ctx: CommandContext) -> CommandResult;
}

/// Runs the body on the calling thread; errors propagate to the caller.
pub struct SyncCommand {
    descriptor: Arc<CommandDescriptor>,
}

impl SyncCommand {
    pub fn new(descriptor: Arc<CommandDescriptor>) -> Self {
        Self { descriptor }
    }
}

impl ExecutionBehavior for SyncCommand {
    fn run(&mut self, args: CommandArgs, ctx: CommandContext) -> CommandResult {
        let raw = self.descriptor.raw();
        raw(&args, &ctx)
    }
}

/// Hands the body to the worker pool as the job of a reserved task record.
pub struct PooledCommand {
    supervisor: Arc<TaskSupervisor>,
    descriptor: Arc<CommandDescriptor>,
    handle: TaskHandle,
    reporter: Option<CrashReporter>,
}

impl PooledCommand {
    pub fn new(
        supervisor: Arc<TaskSupervisor>,
        descriptor: Arc<CommandDescriptor>,
        handle: TaskHandle,
    ) -> Self {
        Self {
            supervisor,
            descriptor,
            handle,
            reporter: None,
        }
    }

    pub fn with_crash_reports(mut self, reporter: CrashReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

impl ExecutionBehavior for PooledCommand {
    fn run(&mut self, args: CommandArgs, ctx: CommandContext) -> CommandResult {
        if self.supervisor.status(self.handle) == Some(TaskStatus::Pending) {
            debug!("Task {} is already pending", self.handle);
            return Ok(None);
        }
        let ctx = ctx.into_task(
            self.descriptor.name,
            self.supervisor.tracker(self.handle),
            self.supervisor.cancel_token(self.handle),
        );
        let mut monitor = CommandMonitor::new(self.descriptor.raw());
        if let Some(reporter) = self.reporter.take() {
            monitor = monitor.with_crash_reports(reporter);
        }
        match self.supervisor.submit(self.handle, monitor.into_job(args, ctx)) {
            Ok(()) => debug!("Task {} submitted", self.handle),
            // the record is already CRASHED
            Err(e) => debug!("Task {} not submitted: {}", self.handle, e),
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::experiment::build_cache::BuildCache;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn submission_to_a_closed_pool_leaves_a_crashed_record() {
        let settings = Settings {
            workers: Some(1),
            ..Settings::default()
        };
        let supervisor = Arc::new(TaskSupervisor::new(&settings));
        supervisor.start();
        supervisor.graceful_shutdown(&AtomicBool::new(false));

        let handle = supervisor.reserve("E1", "make", false).unwrap();
        let descriptor = Arc::new(
            CommandDescriptor::new("make", |_, _| Ok(Some("made".to_string())))
                .param("name")
                .pooled(),
        );
        let ctx = CommandContext::new(Arc::new(settings), Arc::new(BuildCache::default()));
        let result = PooledCommand::new(Arc::clone(&supervisor), descriptor, handle).run(CommandArgs::default(), ctx);
        assert_eq!(result.unwrap(), None);
        assert_eq!(supervisor.status(handle), Some(TaskStatus::Crashed));
    }
}
