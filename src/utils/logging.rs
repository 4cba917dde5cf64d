//! Logging initialization for agentrun.
//!
//! Supports three formats:
//! - `pretty`: multi-line human-readable output
//! - `component`: compact single-line output; use the [`log_component!`]
//!   macro to add a `component` field for per-subsystem filtering
//! - `json`: structured JSON lines for log aggregators
//!
//! Runs open an `agent_run` span carrying the run id, so every line logged
//! while a run is active can be attributed to it.

use std::fs::File;
use std::io;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted. Falls
/// back to `RUST_LOG` if set, otherwise uses `cfg.level`. Returns `false` if
/// a global subscriber was already installed.
///
/// If `cfg.file` cannot be opened, JSON logs go to stderr instead.
pub fn init_logging(cfg: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let installed = match cfg.format {
        LogFormat::Json => match cfg.file.as_deref().and_then(open_log_file) {
            Some(file) => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(move || LogWriter::from_file(&file))
                .try_init(),
            None => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .try_init(),
        },
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init(),
        LogFormat::Component => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(io::stderr)
            .compact()
            .try_init(),
    };
    installed.is_ok()
}

fn open_log_file(path: &str) -> Option<Arc<File>> {
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(Arc::new(file)),
        Err(e) => {
            eprintln!("agentrun: cannot open log file {}: {}; logging to stderr", path, e);
            None
        }
    }
}

/// Per-event writer: the shared log file, or stderr if the handle cannot be
/// cloned.
enum LogWriter {
    File(File),
    Stderr(io::Stderr),
}

impl LogWriter {
    fn from_file(file: &Arc<File>) -> Self {
        match file.try_clone() {
            Ok(file) => LogWriter::File(file),
            Err(_) => LogWriter::Stderr(io::stderr()),
        }
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogWriter::File(f) => f.write(buf),
            LogWriter::Stderr(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogWriter::File(f) => f.flush(),
            LogWriter::Stderr(s) => s.flush(),
        }
    }
}

/// Emit a component-tagged tracing event.
///
/// Works with any tracing level (`trace`, `debug`, `info`, `warn`, `error`).
/// The `component` field makes it easy to grep logs by subsystem:
///
/// ```
/// # use agentrun::log_component;
/// log_component!(info, "invoker", "wave dispatched");
/// log_component!(warn, "context", "token budget low", used = 8000u64, limit = 10000u64);
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_logging_config() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.format, LogFormat::Component);
        assert_eq!(cfg.level, "info");
        assert!(cfg.file.is_none());
    }

    #[test]
    fn test_log_format_deserialize() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"format":"json","level":"debug"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "debug");

        let cfg: LoggingConfig = serde_json::from_str(r#"{"format":"pretty"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert_eq!(cfg.level, "info");
    }

    #[test]
    fn test_unopenable_log_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing_parent = dir.path().join("no").join("such").join("run.log");
        assert!(open_log_file(missing_parent.to_str().unwrap()).is_none());
    }

    #[test]
    fn test_log_writer_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let file = open_log_file(path.to_str().unwrap()).unwrap();

        let mut writer = LogWriter::from_file(&file);
        writer.write_all(b"{\"msg\":\"one\"}\n").unwrap();
        writer.flush().unwrap();
        LogWriter::from_file(&file)
            .write_all(b"{\"msg\":\"two\"}\n")
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let cfg = LoggingConfig {
            level: "warn".into(),
            ..Default::default()
        };
        init_logging(&cfg);
        assert!(!init_logging(&cfg));
    }
}
