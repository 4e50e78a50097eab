//! Console and file logging for the `booking` binary.
//!
//! [`init`] installs the global subscriber first thing so startup is logged;
//! [`apply`] then narrows it to the `[logging]` section once the config is
//! loaded. Console output goes to stderr so command output on stdout stays
//! clean.

use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Local;
use thiserror::Error;
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("logging is not initialized")]
    NotInitialized,

    #[error("invalid log level '{level}': {source}")]
    InvalidLevel {
        level: String,
        #[source]
        source: ParseError,
    },

    #[error("cannot reload log filter: {0}")]
    Reload(#[from] reload::Error),

    #[error("cannot open log file '{path}': {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// --- Line format ---

/// `<time> <LEVEL> <target>: <fields>`. The file copy carries the full
/// local date and offset; the console only the time of day.
struct LineFormat {
    full_date: bool,
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[1;31m",
        Level::WARN => "\x1b[1;33m",
        Level::INFO => "\x1b[1;32m",
        Level::DEBUG => "\x1b[1;34m",
        Level::TRACE => "\x1b[1;35m",
    }
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let (color, dim, reset) = if writer.has_ansi_escapes() {
            (level_color(meta.level()), "\x1b[2m", "\x1b[0m")
        } else {
            ("", "", "")
        };

        let now = Local::now();
        let stamp = if self.full_date {
            now.format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        } else {
            now.format("%H:%M:%S%.3f")
        };

        write!(
            writer,
            "{dim}{stamp}{reset} {color}{:>5}{reset} {dim}{}:{reset} ",
            meta.level(),
            meta.target()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// --- Sinks ---

type FileSlot = Arc<Mutex<Option<File>>>;

fn lock_file(slot: &FileSlot) -> MutexGuard<'_, Option<File>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes to the log file once one is opened; discards until then.
#[derive(Clone)]
struct FileWriter(FileSlot);

struct LockedFile<'a>(MutexGuard<'a, Option<File>>);

impl Write for LockedFile<'_> {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        match self.0.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.as_mut().map_or(Ok(()), File::flush)
    }
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = LockedFile<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LockedFile(lock_file(&self.0))
    }
}

static CONSOLE_ON: AtomicBool = AtomicBool::new(true);

fn console_on(_: &Metadata<'_>) -> bool {
    CONSOLE_ON.load(Ordering::Relaxed)
}

struct Handles {
    level: reload::Handle<EnvFilter, Registry>,
    file: FileSlot,
}

static HANDLES: OnceLock<Handles> = OnceLock::new();

fn handles() -> Result<&'static Handles, LoggingError> {
    HANDLES.get().ok_or(LoggingError::NotInitialized)
}

// --- Public API ---

/// Installs the global subscriber: console on, level from `RUST_LOG` or
/// `info`, no file. Later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (level, level_handle) = reload::Layer::new(filter);
    let file = FileSlot::default();

    let console_layer = tracing_subscriber::fmt::layer()
        .event_format(LineFormat { full_date: false })
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr.with_filter(console_on));

    let file_layer = tracing_subscriber::fmt::layer()
        .event_format(LineFormat { full_date: true })
        .with_ansi(false)
        .with_writer(FileWriter(file.clone()));

    if tracing_subscriber::registry()
        .with(level)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok()
    {
        let _ = HANDLES.set(Handles {
            level: level_handle,
            file,
        });
    }
}

/// Replaces the level filter. Takes a bare level or any `EnvFilter`
/// directive list.
pub fn set_level(level: &str) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_new(level).map_err(|source| LoggingError::InvalidLevel {
        level: level.to_string(),
        source,
    })?;
    handles()?.level.reload(filter)?;
    Ok(())
}

/// Appends log lines to `path`, replacing any file already open. The
/// directory must exist.
pub fn log_to_file(path: &Path) -> Result<(), LoggingError> {
    let slot = &handles()?.file;
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenFile {
            path: path.to_path_buf(),
            source,
        })?;
    *lock_file(slot) = Some(file);
    Ok(())
}

/// Shows or hides console output. The log file is unaffected.
pub fn set_console(enabled: bool) {
    CONSOLE_ON.store(enabled, Ordering::Relaxed);
}

/// Applies the `[logging]` section. An explicit `RUST_LOG` wins over the
/// configured level.
pub fn apply(
    config: &LoggingConfig,
    console: bool,
) -> Result<(), LoggingError> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        set_level(&config.level)?;
    }
    if let Some(path) = &config.file {
        log_to_file(path)?;
    }
    set_console(console);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test: the subscriber is process-global.
    #[test]
    fn configured_logging_reaches_the_file() {
        assert!(matches!(set_level("debug"), Err(LoggingError::NotInitialized)));

        init();

        assert!(set_level("booking_core=trace,warn").is_ok());
        assert!(matches!(
            set_level("booking_core=verbose"),
            Err(LoggingError::InvalidLevel { .. })
        ));
        assert!(matches!(
            log_to_file(Path::new("/nonexistent-dir/booking.log")),
            Err(LoggingError::OpenFile { .. })
        ));

        let dir = std::env::temp_dir().join(format!("booking-logging-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("booking.log");
        let config = LoggingConfig {
            level: "info".to_string(),
            file: Some(path.clone()),
        };
        set_level("info").unwrap();
        apply(&config, false).unwrap();

        tracing::info!(order = 7, "logged to file");
        tracing::debug!("filtered out");

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(" INFO booking_cli::logging::tests: "), "{text}");
        assert!(text.contains("logged to file"));
        assert!(text.contains("order=7"));
        assert!(!text.contains("filtered out"));

        set_console(true);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
