use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

pub const SETTINGS_FILE: &str = "~/.rpla.toml";
pub const CRASH_REPORT_TITLE: &str = "RPL ATTACKS FRAMEWORK - CRASH REPORT";
pub const CRASH_REPORT_PREFIX: &str = "crash-report";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub contiki_folder: PathBuf,
    pub experiments_folder: PathBuf,
    pub templates_folder: PathBuf,
    pub pidfile: PathBuf,
    pub task_expiration_secs: u64,
    pub workers: Option<usize>,
    pub crash_reports: bool,
    pub kill: KillSettings,
    /// File the settings were loaded from.
    #[serde(skip)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSettings {
    pub result_timeout_ms: u64,
    pub retries: u32,
    pub backoff_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            contiki_folder: PathBuf::from("~/contiki"),
            experiments_folder: PathBuf::from("~/Experiments"),
            templates_folder: PathBuf::from("templates"),
            pidfile: PathBuf::from("/tmp/rpla.pid"),
            task_expiration_secs: 60,
            workers: None,
            crash_reports: true,
            kill: KillSettings::default(),
            file: None,
        }
    }
}

impl Default for KillSettings {
    fn default() -> Self {
        Self {
            result_timeout_ms: 100,
            retries: 3,
            backoff_ms: 250,
        }
    }
}

impl KillSettings {
    pub fn result_timeout(&self) -> Duration {
        Duration::from_millis(self.result_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Settings {
    /// Loads the settings file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CommandError> {
        let path = expand_home(path);
        let mut settings = if path.exists() {
            let text = fs::read_to_string(&path)
                .map_err(|e| CommandError::io(format!("reading {}", path.display()), e))?;
            toml::from_str::<Settings>(&text).map_err(|e| CommandError::Toml(e.to_string()))?
        } else {
            Settings::default()
        };
        settings.file = Some(path);
        Ok(settings.expanded())
    }

    pub fn save(&self, path: &Path) -> Result<(), CommandError> {
        let path = expand_home(path);
        let text = toml::to_string_pretty(self).map_err(|e| CommandError::Toml(e.to_string()))?;
        fs::write(&path, text)
            .map_err(|e| CommandError::io(format!("writing {}", path.display()), e))
    }

    fn expanded(mut self) -> Self {
        self.contiki_folder = expand_home(&self.contiki_folder);
        self.experiments_folder = expand_home(&self.experiments_folder);
        self.templates_folder = expand_home(&self.templates_folder);
        self.pidfile = expand_home(&self.pidfile);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1)
    }

    pub fn task_expiration(&self) -> Duration {
        Duration::from_secs(self.task_expiration_secs)
    }

    pub fn file(&self) -> PathBuf {
        self.file
            .clone()
            .unwrap_or_else(|| expand_home(Path::new(SETTINGS_FILE)))
    }

    pub fn experiment_templates(&self) -> PathBuf {
        self.templates_folder.join("experiment")
    }
}

pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.task_expiration_secs, 60);
        assert_eq!(settings.kill.retries, 3);
        assert!(settings.workers() >= 1);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rpla.toml");
        fs::write(
            &path,
            "experiments_folder = \"/srv/exp\"\nworkers = 2\n[kill]\nretries = 5\n",
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.experiments_folder, PathBuf::from("/srv/exp"));
        assert_eq!(settings.workers(), 2);
        assert_eq!(settings.kill.retries, 5);
        assert_eq!(settings.kill.result_timeout_ms, 100);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rpla.toml");
        let settings = Settings {
            contiki_folder: dir.path().join("contiki"),
            experiments_folder: dir.path().join("exp"),
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.contiki_folder, settings.contiki_folder);
        assert_eq!(loaded.experiments_folder, settings.experiments_folder);
    }

    #[test]
    fn tilde_is_expanded() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/contiki")), home.join("contiki"));
        }
        assert_eq!(expand_home(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
