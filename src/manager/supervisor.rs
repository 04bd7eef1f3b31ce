use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::config::settings::{KillSettings, Settings};
use crate::error::Outcome;
use crate::models::{
    message::TaskMessage,
    task::{TaskHandle, TaskRecord, TaskStatus},
};
use crate::worker::{
    pool::{AsyncResult, Callback, Job, PoolClosed, ResultError, WorkerPool},
    process::{group_alive, kill_group, terminate_group, CancelToken, ChildTracker},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct TaskTable {
    records: HashMap<TaskHandle, TaskRecord>,
    results: HashMap<TaskHandle, AsyncResult>,
    cancels: HashMap<TaskHandle, CancelToken>,
}

impl TaskTable {
    fn transition(
        &mut self,
        handle: TaskHandle,
        status: TaskStatus,
        result: Option<String>,
        expiration: chrono::Duration,
    ) -> bool {
        let Some(record) = self.records.get_mut(&handle) else {
            return false;
        };
        let applied = record.transition(status, result, expiration);
        if applied && status.is_terminal() {
            debug!(" > Process {} is over.", record.label());
            self.results.remove(&handle);
            self.cancels.remove(&handle);
        }
        applied
    }

    fn apply_outcome(
        &mut self,
        handle: TaskHandle,
        payload: Option<Outcome>,
        expiration: chrono::Duration,
    ) {
        let (status, result) = match payload {
            Some(Ok(result)) => (TaskStatus::Success, Some(result)),
            Some(Err(info)) => (TaskStatus::Fail, Some(info.to_string())),
            None => (TaskStatus::Undefined, None),
        };
        self.transition(handle, status, result, expiration);
    }

    fn cleanup(&mut self) {
        let now = Local::now();
        self.records.retain(|_, record| !record.is_expired(now));
        let records = &self.records;
        self.results.retain(|handle, _| records.contains_key(handle));
        self.cancels.retain(|handle, _| records.contains_key(handle));
    }

    fn active_for(&self, subject: &str) -> Option<&TaskRecord> {
        self.records
            .values()
            .find(|record| record.subject == subject && record.status.is_active())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the worker pool and the table of task records.
pub struct TaskSupervisor {
    table: Arc<Mutex<TaskTable>>,
    pool: Mutex<WorkerPool>,
    sender: Sender<TaskMessage>,
    receiver: Receiver<TaskMessage>,
    next_id: AtomicU64,
    expiration: chrono::Duration,
    kill: KillSettings,
}

impl TaskSupervisor {
    pub fn new(settings: &Settings) -> Self {
        let (sender, receiver) = unbounded();
        TaskSupervisor {
            table: Arc::new(Mutex::new(TaskTable::default())),
            pool: Mutex::new(WorkerPool::new(settings.workers())),
            sender,
            receiver,
            next_id: AtomicU64::new(0),
            expiration: chrono::Duration::from_std(settings.task_expiration())
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            kill: settings.kill.clone(),
        }
    }

    pub fn start(&self) {
        let table = Arc::clone(&self.table);
        let receiver = self.receiver.clone();
        let expiration = self.expiration;

        spawn_message_thread(receiver, table, expiration);
    }

    pub fn workers(&self) -> usize {
        lock(&self.pool).size()
    }

    /// Removes records whose expiry has passed.
    pub fn cleanup(&self) {
        lock(&self.table).cleanup();
    }

    /// Creates an `INIT` record for `subject` unless another task on it is still active.
    /// Returns the label of the blocking task on refusal. Check and insert happen under one lock.
    pub fn reserve(
        &self,
        subject: &str,
        command: &str,
        nested_children: bool,
    ) -> Result<TaskHandle, String> {
        let mut table = lock(&self.table);
        table.cleanup();
        if let Some(blocking) = table.active_for(subject) {
            return Err(blocking.label());
        }
        let handle = TaskHandle(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut record = TaskRecord::new(handle, subject.to_string(), command.to_string());
        record.nested_children = nested_children;
        table.records.insert(handle, record);
        table.cancels.insert(handle, CancelToken::default());
        Ok(handle)
    }

    pub fn tracker(&self, handle: TaskHandle) -> ChildTracker {
        ChildTracker::new(handle, self.sender.clone())
    }

    pub fn cancel_token(&self, handle: TaskHandle) -> CancelToken {
        lock(&self.table)
            .cancels
            .entry(handle)
            .or_default()
            .clone()
    }

    /// Marks the record `PENDING` and hands the job to the pool.
    pub fn submit(&self, handle: TaskHandle, job: Job) -> Result<(), PoolClosed> {
        lock(&self.table).transition(handle, TaskStatus::Pending, None, self.expiration);
        let sender = self.sender.clone();
        let callback: Callback = Box::new(move |payload| {
            let _ = sender.send(TaskMessage::Finished(handle, payload));
        });
        let submitted = lock(&self.pool).submit(job, callback);
        match submitted {
            Ok(result) => {
                let mut table = lock(&self.table);
                if table.records.get(&handle).map(|r| r.status) == Some(TaskStatus::Pending) {
                    table.results.insert(handle, result);
                }
                Ok(())
            }
            Err(e) => {
                lock(&self.table).transition(
                    handle,
                    TaskStatus::Crashed,
                    Some(e.to_string()),
                    self.expiration,
                );
                Err(e)
            }
        }
    }

    pub fn apply(&self, handle: TaskHandle, payload: Option<Outcome>) {
        lock(&self.table).apply_outcome(handle, payload, self.expiration);
    }

    pub fn status(&self, handle: TaskHandle) -> Option<TaskStatus> {
        lock(&self.table).records.get(&handle).map(|r| r.status)
    }

    pub fn record(&self, handle: TaskHandle) -> Option<TaskRecord> {
        lock(&self.table).records.get(&handle).cloned()
    }

    /// Snapshot of the table ordered by label.
    pub fn records(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = lock(&self.table).records.values().cloned().collect();
        records.sort_by(|a, b| a.label().cmp(&b.label()).then(a.handle.cmp(&b.handle)));
        records
    }

    pub fn task_pending(&self, subject: &str) -> bool {
        lock(&self.table).active_for(subject).is_some()
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.table)
            .records
            .values()
            .any(|r| r.status.is_active())
    }

    pub fn pending_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = lock(&self.table)
            .records
            .values()
            .filter(|r| r.status == TaskStatus::Pending)
            .map(TaskRecord::label)
            .collect();
        labels.sort();
        labels
    }

    pub fn find_pending(&self, label: &str) -> Option<TaskHandle> {
        lock(&self.table)
            .records
            .values()
            .find(|r| r.status == TaskStatus::Pending && r.label() == label)
            .map(|r| r.handle)
    }

    /// Stops a pending task. Returns the resulting status, or `None` when the record was not pending.
    pub fn kill(&self, handle: TaskHandle) -> Option<TaskStatus> {
        let (children, nested) = {
            let table = lock(&self.table);
            let record = table.records.get(&handle)?;
            if record.status != TaskStatus::Pending {
                return None;
            }
            (record.children.clone(), record.nested_children)
        };

        let result = lock(&self.table).results.remove(&handle);
        if let Some(result) = result {
            match result.get(self.kill.result_timeout()) {
                Ok(payload) => {
                    self.apply(handle, payload);
                    return self.status(handle);
                }
                Err(ResultError::Lost) => {
                    lock(&self.table).transition(
                        handle,
                        TaskStatus::Crashed,
                        None,
                        self.expiration,
                    );
                    return self.status(handle);
                }
                Err(ResultError::Timeout) => {}
            }
        }

        if let Some(token) = lock(&self.table).cancels.get(&handle) {
            token.cancel();
        }
        let mut crashed = false;
        for pgid in &children {
            if let Err(e) = terminate_group(*pgid) {
                debug!("Could not signal process group {}: {}", pgid, e);
                crashed = true;
            }
        }
        if nested && !crashed {
            self.reap_nested(&children);
        }
        let status = if crashed {
            TaskStatus::Crashed
        } else {
            TaskStatus::Cancelled
        };
        lock(&self.table).transition(handle, status, None, self.expiration);
        info!("Task '{}' killed.", handle);
        self.status(handle)
    }

    /// Re-signals process groups that survive the first termination, doubling the grace period each round.
    fn reap_nested(&self, children: &[u32]) {
        let mut delay = self.kill.backoff();
        for _ in 0..self.kill.retries {
            thread::sleep(delay);
            let alive: Vec<u32> = children.iter().copied().filter(|p| group_alive(*p)).collect();
            if alive.is_empty() {
                return;
            }
            for pgid in alive {
                let _ = terminate_group(pgid);
            }
            delay *= 2;
        }
        for pgid in children.iter().copied().filter(|p| group_alive(*p)) {
            let _ = kill_group(pgid);
        }
    }

    /// Forced termination of an active task; the record ends up `KILLED`.
    pub fn terminate(&self, handle: TaskHandle) {
        let children = {
            let table = lock(&self.table);
            let Some(record) = table.records.get(&handle) else {
                return;
            };
            if let Some(token) = table.cancels.get(&handle) {
                token.cancel();
            }
            record.children.clone()
        };
        for pgid in children {
            let _ = kill_group(pgid);
        }
        lock(&self.table).transition(handle, TaskStatus::Killed, None, self.expiration);
    }

    /// Polls until the record leaves its active states or the timeout elapses.
    pub fn wait_settled(&self, handle: TaskHandle, timeout: Duration) -> Option<TaskStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status(handle)?;
            if status.is_terminal() || Instant::now() >= deadline {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Waits for active tasks to drain; once `interrupted` is raised, kills them and drops the queue.
    pub fn graceful_shutdown(&self, interrupted: &AtomicBool) {
        if self.has_pending() {
            info!(" > Waiting for opened processes to finish...");
            warn!("Hit CTRL+C a second time to force process termination.");
            while self.has_pending() {
                if interrupted.load(Ordering::SeqCst) {
                    info!(" > Terminating opened processes...");
                    let active: Vec<TaskHandle> = lock(&self.table)
                        .records
                        .values()
                        .filter(|r| r.status.is_active())
                        .map(|r| r.handle)
                        .collect();
                    for handle in active {
                        self.terminate(handle);
                    }
                    lock(&self.pool).terminate();
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        lock(&self.pool).close();
    }
}

fn spawn_message_thread(
    receiver: Receiver<TaskMessage>,
    table: Arc<Mutex<TaskTable>>,
    expiration: chrono::Duration,
) {
    thread::spawn(move || loop {
        match receiver.recv() {
            Ok(message) => match message {
                TaskMessage::Finished(handle, payload) => {
                    lock(&table).apply_outcome(handle, payload, expiration)
                }
                TaskMessage::ChildSpawned(handle, pid) => handle_child_spawned(handle, pid, &table),
                TaskMessage::ChildExited(handle, pid) => handle_child_exited(handle, pid, &table),
            },
            Err(e) => {
                debug!("Supervisor channel closed: {}", e);
                break;
            }
        }
    });
}

fn handle_child_spawned(handle: TaskHandle, pid: u32, table: &Arc<Mutex<TaskTable>>) {
    if let Some(record) = lock(table).records.get_mut(&handle) {
        if record.status.is_active() {
            record.children.push(pid);
        }
    }
}

fn handle_child_exited(handle: TaskHandle, pid: u32, table: &Arc<Mutex<TaskTable>>) {
    if let Some(record) = lock(table).records.get_mut(&handle) {
        record.children.retain(|p| *p != pid);
    }
}
