//! Console log output: `log` records are bridged into a `tracing-subscriber` formatter
//! that writes `\r`-framed lines, so they stay readable while the console is in raw mode.

use std::fmt;
use std::io;

use chrono::Local;
use crossterm::style::{Color, Stylize};
use log::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_log::NormalizeEvent;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Target used for messages that abort an operation.
pub const CRITICAL: &str = "critical";

pub const LOG_LEVELS: [(&str, LevelFilter); 4] = [
    ("debug", LevelFilter::Debug),
    ("info", LevelFilter::Info),
    ("warning", LevelFilter::Warn),
    ("error", LevelFilter::Error),
];

/// `<date> rpla[<pid>] <LEVEL> <message>`, framed by `\r` and `\r\n`.
struct ConsoleFormat {
    pid: u32,
}

fn level_label(level: Level, target: &str) -> (&'static str, Color) {
    if target == CRITICAL {
        return ("CRITICAL", Color::Magenta);
    }
    match level {
        Level::ERROR => ("ERROR", Color::Red),
        Level::WARN => ("WARNING", Color::Yellow),
        Level::INFO => ("INFO", Color::Green),
        _ => ("DEBUG", Color::Blue),
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        // records coming from `log` carry their real target in their fields
        let normalized = event.normalized_metadata();
        let metadata = normalized.as_ref().unwrap_or_else(|| event.metadata());
        let (label, color) = level_label(*metadata.level(), metadata.target());
        write!(
            writer,
            "\r{} rpla[{}] {} ",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.pid,
            label.with(color)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        write!(writer, "\r\n")
    }
}

fn console_format() -> ConsoleFormat {
    ConsoleFormat {
        pid: std::process::id(),
    }
}

/// Installs the console subscriber and the `log` bridge. Verbosity is then driven by [`set_level`].
pub fn init() {
    let installed = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::TRACE)
        .event_format(console_format())
        .try_init();
    if installed.is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

pub fn parse_level(name: &str) -> Option<LevelFilter> {
    LOG_LEVELS
        .iter()
        .find(|(label, _)| *label == name)
        .map(|(_, level)| *level)
}

pub fn set_level(name: &str) -> bool {
    match parse_level(name) {
        Some(level) => {
            log::set_max_level(level);
            true
        }
        None => false,
    }
}

pub fn level_names() -> Vec<String> {
    LOG_LEVELS.iter().map(|(name, _)| name.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(emit: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(Level::TRACE)
            .event_format(console_format())
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn lines_are_framed_for_raw_mode() {
        let out = capture(|| tracing::warn!("Experiment already exists"));
        assert!(out.starts_with('\r'));
        assert!(out.ends_with("Experiment already exists\r\n"));
        assert!(out.contains(&format!("rpla[{}]", std::process::id())));
        assert!(out.contains("WARNING"));
    }

    #[test]
    fn critical_target_gets_its_own_label() {
        let out = capture(|| tracing::error!(target: "critical", "Make aborted."));
        assert!(out.contains("CRITICAL"));
        assert!(!out.contains("ERROR"));
    }

    #[test]
    fn known_level_names_map_to_filters() {
        assert_eq!(parse_level("warning"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn unknown_level_leaves_verbosity_untouched() {
        let before = log::max_level();
        assert!(!set_level("loud"));
        assert_eq!(log::max_level(), before);
    }
}
