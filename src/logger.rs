use crate::env;
use console::style;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

struct Logger {
    level: LevelFilter,
    term_level: LevelFilter,
    file_level: LevelFilter,
    log_file: Option<Mutex<File>>,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if record.level() <= self.file_level
            && let Some(log_file) = &self.log_file
        {
            let mut log_file = log_file.lock().unwrap_or_else(|e| e.into_inner());
            let out = format!(
                "{} {} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            );
            let _ = writeln!(log_file, "{out}");
        }
        if record.level() <= self.term_level {
            eprintln!("{}", self.render(record));
        }
    }

    fn flush(&self) {}
}

impl Logger {
    fn new() -> Self {
        let term_level = *env::TAFIL_LOG;
        let file_level = *env::TAFIL_LOG_FILE_LEVEL;
        let log_file = env::TAFIL_LOG_FILE.as_deref().and_then(init_log_file);
        let level = if log_file.is_some() {
            term_level.max(file_level)
        } else {
            term_level
        };
        Self {
            level,
            term_level,
            file_level,
            log_file: log_file.map(Mutex::new),
        }
    }

    fn render(&self, record: &Record) -> String {
        let prefix = match record.level() {
            Level::Error => style("ERROR").red().bold(),
            Level::Warn => style("WARN").yellow().bold(),
            Level::Info => style("INFO").cyan().bold(),
            Level::Debug => style("DEBUG").magenta(),
            Level::Trace => style("TRACE").dim(),
        };
        match self.term_level {
            LevelFilter::Trace | LevelFilter::Debug => {
                let target = style(record.target()).dim();
                format!("{prefix} {target} {}", record.args())
            }
            _ => format!("{prefix} {}", record.args()),
        }
    }
}

fn init_log_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("tafil: could not create log dir {}: {err}", parent.display());
        return None;
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("tafil: could not open log file {}: {err}", path.display());
            None
        }
    }
}

static LOGGER: Lazy<Logger> = Lazy::new(Logger::new);

pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if let Err(err) = log::set_logger(&*LOGGER).map(|()| log::set_max_level(LOGGER.level)) {
            eprintln!("tafil: could not initialize logger: {err}");
        }
    });
}
