use std::fmt;

use chrono::{DateTime, Duration, Local};

pub const RESULT_NOT_DEFINED: &str = "Not defined yet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Init,
    Pending,
    Success,
    Fail,
    Cancelled,
    Crashed,
    Killed,
    Undefined,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Init | TaskStatus::Pending)
    }

    /// Init counts as active: the slot is reserved between the pending check and submission.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Init => "INIT",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Fail => "FAIL",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Crashed => "CRASHED",
            TaskStatus::Killed => "KILLED",
            TaskStatus::Undefined => "UNDEFINED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub handle: TaskHandle,
    pub subject: String,
    pub command: String,
    pub status: TaskStatus,
    pub result: String,
    pub expires_at: Option<DateTime<Local>>,
    /// Process groups spawned by the task's toolchain calls.
    pub children: Vec<u32>,
    /// Children fork their own subprocesses and need a grace period between termination attempts.
    pub nested_children: bool,
}

impl TaskRecord {
    pub fn new(handle: TaskHandle, subject: String, command: String) -> Self {
        Self {
            handle,
            subject,
            command,
            status: TaskStatus::Init,
            result: RESULT_NOT_DEFINED.to_string(),
            expires_at: None,
            children: vec![],
            nested_children: false,
        }
    }

    /// Name shown to the operator, e.g. `my-sim[make]`.
    pub fn label(&self) -> String {
        format!("{}[{}]", self.subject, self.command)
    }

    /// Applies a status transition. Terminal records are frozen; returns false when ignored.
    pub fn transition(
        &mut self,
        status: TaskStatus,
        result: Option<String>,
        expiration: Duration,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if let Some(result) = result {
            self.result = result;
        }
        self.expires_at = if status.is_terminal() {
            Some(Local::now() + expiration)
        } else {
            None
        };
        true
    }

    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        matches!(self.expires_at, Some(expires) if now > expires)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new(TaskHandle(1), "E1".to_string(), "make".to_string())
    }

    #[test]
    fn new_record_is_init_without_expiry() {
        let rec = record();
        assert_eq!(rec.status, TaskStatus::Init);
        assert_eq!(rec.result, RESULT_NOT_DEFINED);
        assert!(rec.expires_at.is_none());
        assert_eq!(rec.label(), "E1[make]");
    }

    #[test]
    fn expiry_is_set_only_for_terminal_states() {
        let mut rec = record();
        assert!(rec.transition(TaskStatus::Pending, None, Duration::seconds(60)));
        assert!(rec.expires_at.is_none());
        assert!(rec.transition(
            TaskStatus::Success,
            Some("done".to_string()),
            Duration::seconds(60)
        ));
        assert!(rec.expires_at.is_some());
        assert_eq!(rec.result, "done");
    }

    #[test]
    fn terminal_records_ignore_further_transitions() {
        let mut rec = record();
        rec.transition(TaskStatus::Pending, None, Duration::seconds(60));
        rec.transition(TaskStatus::Cancelled, None, Duration::seconds(60));
        assert!(!rec.transition(
            TaskStatus::Success,
            Some("late".to_string()),
            Duration::seconds(60)
        ));
        assert_eq!(rec.status, TaskStatus::Cancelled);
        assert_eq!(rec.result, RESULT_NOT_DEFINED);
    }

    #[test]
    fn expired_only_after_deadline() {
        let mut rec = record();
        assert!(!rec.is_expired(Local::now()));
        rec.transition(TaskStatus::Fail, None, Duration::seconds(-1));
        assert!(rec.is_expired(Local::now()));
    }
}
