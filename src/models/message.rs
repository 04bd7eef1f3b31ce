use super::task::TaskHandle;
use crate::error::Outcome;

#[derive(Debug)]
pub enum TaskMessage {
    /// Worker result; `None` when the job produced no recognizable outcome.
    Finished(TaskHandle, Option<Outcome>),
    ChildSpawned(TaskHandle, u32),
    ChildExited(TaskHandle, u32),
}
