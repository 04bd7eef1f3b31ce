use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Local;
use log::debug;

use crate::commands::context::{CommandArgs, CommandContext};
use crate::commands::descriptor::CommandFn;
use crate::config::settings::{CRASH_REPORT_PREFIX, CRASH_REPORT_TITLE};
use crate::error::{CommandError, ErrorInfo, Outcome};
use crate::worker::pool::Job;

pub const NO_RESULT: &str = "No result";

static REPORT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Writes a report file for each failed task.
#[derive(Debug, Clone)]
pub struct CrashReporter {
    dir: PathBuf,
}

impl CrashReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn write(&self, info: &ErrorInfo, task: &str, details: &str) -> Result<PathBuf, CommandError> {
        let now = Local::now();
        let path = self.dir.join(format!(
            "{}-{}-{}.txt",
            CRASH_REPORT_PREFIX,
            now.format("%Y%m%d%H%M%S"),
            REPORT_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        let body = render_report(info, task, details, &now.format("%Y-%m-%d %H:%M:%S").to_string());
        fs::create_dir_all(&self.dir)
            .map_err(|e| CommandError::io(format!("creating {}", self.dir.display()), e))?;
        fs::write(&path, body)
            .map_err(|e| CommandError::io(format!("writing {}", path.display()), e))?;
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn render_report(info: &ErrorInfo, task: &str, details: &str, at: &str) -> String {
    let fields = [("Class", info.class.as_str()), ("At time", at), ("For task", task)];
    let width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0) + 1;
    let mut report = format!("{}\n{}\n", CRASH_REPORT_TITLE, "=".repeat(CRASH_REPORT_TITLE.len()));
    for (key, value) in fields {
        report.push_str(&format!("\n- {:<width$}: {}", key, value, width = width));
    }
    report.push_str(&format!("\n\n{}\n\n{}\n", info.message, details));
    report
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs a command body and normalizes whatever happens into an [`Outcome`].
pub struct CommandMonitor {
    command: CommandFn,
    reporter: Option<CrashReporter>,
}

impl CommandMonitor {
    pub fn new(command: CommandFn) -> Self {
        Self {
            command,
            reporter: None,
        }
    }

    pub fn with_crash_reports(mut self, reporter: CrashReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn call(&self, args: &CommandArgs, ctx: &CommandContext) -> Outcome {
        if ctx.is_cancelled() {
            return Err(ErrorInfo::from(&CommandError::Cancelled));
        }
        let (info, details) =
            match panic::catch_unwind(AssertUnwindSafe(|| (self.command)(args, ctx))) {
                Ok(Ok(result)) => return Ok(result.unwrap_or_else(|| NO_RESULT.to_string())),
                Ok(Err(e)) => (ErrorInfo::from(&e), format!("{:?}", e)),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    (ErrorInfo::new("Panic", message.clone()), message)
                }
            };
        // the status table shows pooled failures
        debug!("{}", info);
        if let Some(reporter) = &self.reporter {
            let task = task_label(args, ctx);
            match reporter.write(&info, &task, &details) {
                Ok(path) => debug!("Crash report written to {}", path.display()),
                Err(e) => debug!("Could not write crash report: {}", e),
            }
        }
        Err(info)
    }

    pub fn into_job(self, args: CommandArgs, ctx: CommandContext) -> Job {
        Box::new(move || self.call(&args, &ctx))
    }
}

fn task_label(args: &CommandArgs, ctx: &CommandContext) -> String {
    let subject = args
        .get("name")
        .or_else(|| args.get("exp_file"))
        .map(|v| v.to_string())
        .unwrap_or_default();
    format!("{}[{}]", subject, ctx.task.as_deref().unwrap_or("?"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::experiment::build_cache::BuildCache;
    use crate::worker::process::CancelToken;
    use std::sync::{Arc, Mutex, OnceLock};
    use tempfile::TempDir;

    fn ctx() -> CommandContext {
        CommandContext::new(Arc::new(Settings::default()), Arc::new(BuildCache::default()))
    }

    fn monitor<F>(f: F) -> CommandMonitor
    where
        F: Fn(&CommandArgs, &CommandContext) -> crate::error::CommandResult + Send + Sync + 'static,
    {
        CommandMonitor::new(Arc::new(f))
    }

    #[test]
    fn value_passes_through() {
        let outcome = monitor(|_, _| Ok(Some("Cleaned".to_string()))).call(&CommandArgs::default(), &ctx());
        assert_eq!(outcome, Ok("Cleaned".to_string()));
    }

    #[test]
    fn missing_value_is_reported_as_no_result() {
        let outcome = monitor(|_, _| Ok(None)).call(&CommandArgs::default(), &ctx());
        assert_eq!(outcome, Ok(NO_RESULT.to_string()));
    }

    #[test]
    fn errors_become_error_info() {
        let outcome = monitor(|_, _| {
            Err(CommandError::CommandFailed {
                command: "make".to_string(),
                code: Some(2),
            })
        })
        .call(&CommandArgs::default(), &ctx());
        assert_eq!(
            outcome,
            Err(ErrorInfo::new("CommandFailed", "Command 'make' failed."))
        );
    }

    #[test]
    fn panics_are_caught() {
        let outcome = monitor(|_, _| panic!("boom")).call(&CommandArgs::default(), &ctx());
        assert_eq!(outcome, Err(ErrorInfo::new("Panic", "boom")));
    }

    #[test]
    fn cancelled_jobs_do_not_run() {
        let cancel = CancelToken::default();
        cancel.cancel();
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let tracker = crate::worker::process::ChildTracker::new(crate::models::task::TaskHandle(1), sender);
        let ctx = ctx().into_task("make", tracker, cancel);
        let outcome = monitor(|_, _| panic!("must not run")).call(&CommandArgs::default(), &ctx);
        assert_eq!(outcome.unwrap_err().class, "Cancelled");
    }

    #[test]
    fn failures_leave_a_crash_report() {
        let dir = TempDir::new().unwrap();
        let mut args = CommandArgs::default();
        args.set("name", "E1");
        let outcome = monitor(|_, _| Err(CommandError::Simulation("no mote".to_string())))
            .with_crash_reports(CrashReporter::new(dir.path()))
            .call(&args, &ctx());
        assert!(outcome.is_err());
        let reports: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(reports.len(), 1);
        let text = fs::read_to_string(reports[0].as_ref().unwrap().path()).unwrap();
        assert!(text.starts_with(CRASH_REPORT_TITLE));
        assert!(text.contains("\n- Class    : SimulationError\n- At time  : "));
        assert!(text.contains("\n- For task : E1[?]\n\nno mote\n"));
    }

    #[test]
    fn missing_report_folder_is_created() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("nested/reports");
        let path = CrashReporter::new(&reports)
            .write(&ErrorInfo::new("Panic", "boom"), "E1[make]", "boom")
            .unwrap();
        assert!(path.starts_with(&reports));
        assert!(path.exists());
    }

    static CAPTURE: OnceLock<Mutex<Vec<(log::Level, String)>>> = OnceLock::new();

    struct Capture;

    impl log::Log for Capture {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if let Some(lines) = CAPTURE.get() {
                lines.lock().unwrap().push((record.level(), record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    fn captured() -> &'static Mutex<Vec<(log::Level, String)>> {
        CAPTURE.get_or_init(|| {
            let _ = log::set_logger(&Capture);
            log::set_max_level(log::LevelFilter::Trace);
            Mutex::new(vec![])
        })
    }

    #[test]
    fn pooled_failures_stay_out_of_the_console() {
        let lines = captured();
        let dir = TempDir::new().unwrap();
        let outcome = monitor(|_, _| Err(CommandError::Simulation("mote 7 vanished".to_string())))
            .with_crash_reports(CrashReporter::new(dir.path()))
            .call(&CommandArgs::default(), &ctx());
        assert!(outcome.is_err());
        let loud: Vec<_> = lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, text)| *level <= log::Level::Warn && (text.contains("mote 7") || text.contains("report")))
            .cloned()
            .collect();
        assert!(loud.is_empty(), "{:?}", loud);
    }
}
