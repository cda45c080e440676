//! Durable resume cursors
//!
//! A single line-oriented file maps cursor keys to their last value:
//!
//! ```text
//! {"index":"course_updated","value":"1700000000"}
//! {"index":"orders","value":"42"}
//! ```
//!
//! Every update reads the whole file, replaces or appends one record and
//! rewrites the file in place. Updates are funnelled through one background
//! worker so the poll loop never waits on file I/O; lookups block the caller.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum ResumeStoreError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Poisoned,
}

impl From<std::io::Error> for ResumeStoreError {
    fn from(err: std::io::Error) -> Self {
        ResumeStoreError::Io(err)
    }
}

impl From<serde_json::Error> for ResumeStoreError {
    fn from(err: serde_json::Error) -> Self {
        ResumeStoreError::Serialization(err)
    }
}

impl std::fmt::Display for ResumeStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeStoreError::Io(e) => write!(f, "IO error: {}", e),
            ResumeStoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ResumeStoreError::Poisoned => write!(f, "Resume store lock poisoned"),
        }
    }
}

impl std::error::Error for ResumeStoreError {}

/// One line of the resume file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub index: String,
    pub value: String,
}

impl ResumeRecord {
    pub fn new(index: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            value: value.into(),
        }
    }
}

/// File-backed key → cursor store guarded by a single lock
#[derive(Debug)]
pub struct ResumeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResumeStore {
    /// Open the store, creating an empty file if none exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ResumeStoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        OpenOptions::new().create(true).append(true).open(path)?;

        log::info!("📌 Resume store: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored cursor for `index`, or `None` when absent or unreadable
    ///
    /// The first matching line wins. Malformed lines are skipped.
    pub fn read(&self, index: &str) -> Option<String> {
        let _guard = self.lock.lock().ok()?;

        let file = File::open(&self.path).ok()?;
        for line in BufReader::new(file).split(b'\n') {
            let line = line.ok()?;
            if let Ok(record) = serde_json::from_slice::<ResumeRecord>(&line) {
                if record.index == index {
                    return Some(record.value);
                }
            }
        }
        None
    }

    /// Set `index` to `value`, rewriting the whole file
    ///
    /// Malformed lines are dropped and duplicate indices collapse onto their
    /// first occurrence.
    pub fn update(&self, index: &str, value: &str) -> Result<(), ResumeStoreError> {
        let _guard = self.lock.lock().map_err(|_| ResumeStoreError::Poisoned)?;

        let mut records = self.load_records()?;

        match records.iter_mut().find(|record| record.index == index) {
            Some(record) => record.value = value.to_string(),
            None => records.push(ResumeRecord::new(index, value)),
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in &records {
            let json = serde_json::to_string(record)?;
            writeln!(writer, "{}", json)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        Ok(())
    }

    fn load_records(&self) -> Result<Vec<ResumeRecord>, ResumeStoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<ResumeRecord> = Vec::new();
        for line in BufReader::new(file).split(b'\n') {
            let line = line?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record: ResumeRecord = match serde_json::from_slice(&line) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!(
                        "⚠️  Dropping malformed resume line ({}): {}",
                        e,
                        String::from_utf8_lossy(&line)
                    );
                    continue;
                }
            };
            if records.iter().any(|r| r.index == record.index) {
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }
}

/// Cloneable handle used by the poll loop
///
/// Updates are queued without blocking; lookups run on the blocking pool and
/// are awaited. Dropping every handle lets the worker drain and exit.
#[derive(Clone)]
pub struct ResumeHandle {
    store: Arc<ResumeStore>,
    tx: mpsc::UnboundedSender<ResumeRecord>,
}

impl ResumeHandle {
    /// Queue a cursor update for the background worker
    pub fn enqueue(&self, index: impl Into<String>, value: impl Into<String>) {
        let record = ResumeRecord::new(index, value);
        if let Err(e) = self.tx.send(record) {
            log::error!("❌ Resume worker gone, dropping cursor update for {}", e.0.index);
        }
    }

    /// Stored cursor for `index`
    pub async fn lookup(&self, index: &str) -> Option<String> {
        let store = self.store.clone();
        let index = index.to_string();
        match tokio::task::spawn_blocking(move || store.read(&index)).await {
            Ok(value) => value,
            Err(e) => {
                log::warn!("⚠️  Resume lookup task failed: {}", e);
                None
            }
        }
    }
}

/// Spawn the single writer that drains queued cursor updates in order
pub fn spawn_resume_worker(store: Arc<ResumeStore>) -> (ResumeHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel::<ResumeRecord>();
    let handle = ResumeHandle {
        store: store.clone(),
        tx,
    };
    let worker = tokio::spawn(resume_writer_task(rx, store));
    (handle, worker)
}

async fn resume_writer_task(mut rx: mpsc::UnboundedReceiver<ResumeRecord>, store: Arc<ResumeStore>) {
    log::info!("📝 Resume writer started");

    while let Some(record) = rx.recv().await {
        let store = store.clone();
        let index = record.index.clone();
        let result = tokio::task::spawn_blocking(move || store.update(&record.index, &record.value)).await;

        match result {
            Ok(Ok(())) => log::debug!("✅ Resume cursor {} persisted", index),
            Ok(Err(e)) => log::error!("❌ Failed to persist resume cursor {}: {}", index, e),
            Err(e) => log::error!("❌ Resume write task for {} failed: {}", index, e),
        }
    }

    log::info!("📝 Resume writer drained, stopping");
}
