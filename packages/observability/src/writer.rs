//! Append-only JSONL file sink.
//!
//! The JSON formatter hands over one record per `write` call; the record is
//! written and flushed under a single lock so that concurrent CLI processes
//! appending to the same file never see half a line.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to the central log file.
#[derive(Clone)]
pub struct CentralLogWriter {
    path: Arc<PathBuf>,
    file: Arc<Mutex<File>>,
}

impl CentralLogWriter {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: Arc::new(path.to_path_buf()),
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for CentralLogWriter {
    fn write(&mut self, record: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.write_all(record)?;
        file.flush()?;
        Ok(record.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for CentralLogWriter {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
