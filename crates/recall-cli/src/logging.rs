use crate::config::RecallConfig;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

/// Keeps the log file handle alive for the life of the process.
pub struct LogGuard {
    _file: Option<Arc<Mutex<File>>>,
}

/// Stdout belongs to verb output, so logs go to the debug log file and,
/// in debug mode, to stderr.
pub fn init_logging(config: &RecallConfig) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("RECALL_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let file = match open_log_file(&config.log_path()) {
        Ok(file) => Some(Arc::new(Mutex::new(file))),
        Err(err) => {
            if config.debug {
                eprintln!("log_file_error: {err}");
            }
            None
        }
    };
    let to_stderr = config.debug || file.is_none();

    let writer_file = file.clone();
    let make_writer =
        BoxMakeWriter::new(move || LogWriter::new(writer_file.clone(), to_stderr));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(LogGuard { _file: file })
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

struct LogWriter {
    stderr: Option<io::Stderr>,
    file: Option<Arc<Mutex<File>>>,
}

impl LogWriter {
    fn new(file: Option<Arc<Mutex<File>>>, to_stderr: bool) -> Self {
        Self {
            stderr: to_stderr.then(io::stderr),
            file,
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(stderr) = &mut self.stderr {
            let _ = stderr.write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(stderr) = &mut self.stderr {
            let _ = stderr.flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}
