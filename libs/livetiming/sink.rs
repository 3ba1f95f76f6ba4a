//! Output sinks
//!
//! The inbound path never touches the file directly: lines go through a
//! [`SinkWriter`], which owns the sink on a dedicated thread fed by an
//! unbounded crossbeam channel. Writes keep their order and each line is
//! flushed before the next is taken.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink is closed")]
    Closed,

    #[error("Sink thread failed: {0}")]
    Thread(String),
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// Line-oriented output
pub trait Sink: Send {
    /// Write one line; it must be durable when this returns
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Release the sink; a second call is a no-op
    fn close(&mut self) -> Result<()>;
}

/// File sink flushing after every line
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Open `path`, truncating unless `append` is set
    pub fn open(path: impl AsRef<Path>, append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)?;
        info!(path = %path.display(), append, "Opened output file");

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(path = %self.path.display(), "Closed output file");
        }
        Ok(())
    }
}

/// Moves sink writes onto one dedicated thread
pub struct SinkWriter {
    tx: Mutex<Option<Sender<String>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    written: Arc<AtomicU64>,
}

impl SinkWriter {
    pub fn spawn(mut sink: impl Sink + 'static) -> Result<Self> {
        let (tx, rx) = unbounded::<String>();
        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);

        let handle = std::thread::Builder::new()
            .name("livetiming-sink".into())
            .spawn(move || {
                // Ends once every sender is gone and the channel is drained
                for line in rx {
                    match sink.write_line(&line) {
                        Ok(()) => {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => error!("Failed to write line: {}", e),
                    }
                }
                if let Err(e) = sink.close() {
                    error!("Failed to close sink: {}", e);
                }
            })
            .map_err(SinkError::Io)?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
            written,
        })
    }

    /// Queue a line; fails once closed
    pub fn write(&self, line: String) -> Result<()> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(line).map_err(|_| SinkError::Closed),
            None => Err(SinkError::Closed),
        }
    }

    /// Drain pending lines and close the sink
    ///
    /// Blocks until the writer thread finishes. Only the first call does
    /// anything; it returns true, later calls return false.
    pub fn close(&self) -> Result<bool> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }

        drop(self.tx.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| SinkError::Thread("writer thread panicked".into()))?;
        }
        info!(lines = self.lines_written(), "Output closed");
        Ok(true)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Lines successfully written so far
    pub fn lines_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close sink on drop: {}", e);
        }
    }
}
