use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::Sender;

use crate::models::{message::TaskMessage, task::TaskHandle};

/// Sends `signal` to every process of the group led by `pgid`.
pub fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub fn terminate_group(pgid: u32) -> io::Result<()> {
    signal_group(pgid, libc::SIGTERM)
}

pub fn kill_group(pgid: u32) -> io::Result<()> {
    signal_group(pgid, libc::SIGKILL)
}

pub fn group_alive(pgid: u32) -> bool {
    signal_group(pgid, 0).is_ok()
}

/// Reports toolchain processes spawned on behalf of a task back to the supervisor.
#[derive(Debug, Clone)]
pub struct ChildTracker {
    handle: TaskHandle,
    sender: Sender<TaskMessage>,
}

impl ChildTracker {
    pub fn new(handle: TaskHandle, sender: Sender<TaskMessage>) -> Self {
        Self { handle, sender }
    }

    pub fn spawned(&self, pid: u32) {
        let _ = self.sender.send(TaskMessage::ChildSpawned(self.handle, pid));
    }

    pub fn exited(&self, pid: u32) {
        let _ = self.sender.send(TaskMessage::ChildExited(self.handle, pid));
    }
}

/// Cooperative cancellation flag shared between the supervisor and a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
