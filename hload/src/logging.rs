use std::{error::Error, io::Write, path::Path, time::SystemTime};

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use simple_logger::SimpleLogger;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};

/// Level of the log file, independent of the console verbosity.
const FILE_LEVEL: LevelFilter = LevelFilter::Debug;

/// Initializes logging to stderr and, optionally, to a log file.
///
/// The returned guard flushes the log file when dropped, so it must be kept
/// alive for the whole run.
pub fn init(verbosity: usize, log_file: Option<&Path>) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let stderr = SimpleLogger::new()
        .with_level(LevelFilter::Off)
        .with_module_level("hload", level)
        .with_utc_timestamps();

    let Some(path) = log_file else {
        stderr.init()?;
        return Ok(None);
    };

    let (logger, guard) = Tee::new(stderr, path)?;
    log::set_max_level(logger.max_level());
    log::set_boxed_logger(Box::new(logger))?;

    Ok(Some(guard))
}

/// Logger writing both to stderr and to a file.
struct Tee {
    stderr: SimpleLogger,
    file: Mutex<NonBlocking>,
}

impl Tee {
    fn new(stderr: SimpleLogger, path: &Path) -> Result<(Self, WorkerGuard), Box<dyn Error>> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let name = path
            .file_name()
            .ok_or_else(|| format!("invalid log file path: '{}'", path.display()))?;

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name.to_string_lossy())
            .build(dir)?;
        let (file, guard) = tracing_appender::non_blocking(appender);

        let m = Self { stderr, file: Mutex::new(file) };

        Ok((m, guard))
    }

    fn max_level(&self) -> LevelFilter {
        self.stderr.max_level().max(FILE_LEVEL)
    }

    #[inline]
    fn file_enabled(metadata: &Metadata) -> bool {
        metadata.level() <= FILE_LEVEL && metadata.target().starts_with("hload")
    }
}

impl Log for Tee {
    fn enabled(&self, metadata: &Metadata) -> bool {
        Self::file_enabled(metadata) || self.stderr.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.stderr.log(record);

        if Self::file_enabled(record.metadata()) {
            let line = format!(
                "{} {:<5} [{}] {}\n",
                humantime::format_rfc3339_millis(SystemTime::now()),
                record.level(),
                record.target(),
                record.args()
            );
            // Nowhere to report a failing log sink.
            let _ = self.file.lock().write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        self.stderr.flush();
        let _ = self.file.lock().flush();
    }
}
