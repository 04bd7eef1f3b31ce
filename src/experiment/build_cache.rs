use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;

use crate::worker::process::CancelToken;

const WAIT_STEP: Duration = Duration::from_millis(100);

/// Root and sensor binaries can be shared between experiments with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub target: String,
    pub root: String,
    pub sensor: String,
    pub debug: bool,
}

impl BuildKey {
    pub fn binaries(&self) -> [String; 2] {
        [format!("root.{}", self.target), format!("sensor.{}", self.target)]
    }

    fn built_in(&self, folder: &Path) -> bool {
        self.binaries().iter().all(|name| folder.join(name).is_file())
    }
}

enum Slot {
    Compiling,
    Ready(PathBuf),
}

/// Folders holding already compiled root/sensor motes, shared by all tasks of a session.
#[derive(Default)]
pub struct BuildCache {
    slots: Mutex<HashMap<BuildKey, Slot>>,
    changed: Condvar,
}

pub enum Claim<'a> {
    /// The caller compiles and must publish the result through the guard.
    Compile(CompileGuard<'a>),
    /// Binaries are available in this folder.
    Reuse(PathBuf),
}

pub struct CompileGuard<'a> {
    cache: &'a BuildCache,
    key: BuildKey,
    published: bool,
}

impl CompileGuard<'_> {
    pub fn publish(mut self, folder: PathBuf) {
        debug!(" > Binaries for {:?} available in {}", self.key, folder.display());
        self.cache.lock().insert(self.key.clone(), Slot::Ready(folder));
        self.published = true;
        self.cache.changed.notify_all();
    }
}

impl Drop for CompileGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.cache.lock().remove(&self.key);
            self.cache.changed.notify_all();
        }
    }
}

impl BuildCache {
    fn lock(&self) -> MutexGuard<'_, HashMap<BuildKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits while another task compiles the same key. Returns `None` once `cancel` is raised.
    ///
    /// A folder is only handed out for reuse if it is not `own` and still holds both binaries.
    pub fn claim(&self, key: BuildKey, own: &Path, cancel: &CancelToken) -> Option<Claim<'_>> {
        let mut slots = self.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match slots.get(&key) {
                Some(Slot::Compiling) => {
                    slots = self
                        .changed
                        .wait_timeout(slots, WAIT_STEP)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                Some(Slot::Ready(folder)) if folder != own && key.built_in(folder) => {
                    return Some(Claim::Reuse(folder.clone()))
                }
                _ => {
                    slots.insert(key.clone(), Slot::Compiling);
                    return Some(Claim::Compile(CompileGuard {
                        cache: self,
                        key,
                        published: false,
                    }));
                }
            }
        }
    }

    /// Drops `folder` for `key`, e.g. after its binaries could not be copied.
    pub fn forget(&self, key: &BuildKey, folder: &Path) {
        let mut slots = self.lock();
        if matches!(slots.get(key), Some(Slot::Ready(f)) if f == folder) {
            debug!(" > Forgetting binaries of {:?} in {}", key, folder.display());
            slots.remove(key);
        }
    }
}
