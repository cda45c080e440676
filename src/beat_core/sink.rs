//! Event publishing backends
//!
//! The runner treats publishing as fire-and-forget: a failed publish is
//! logged and the pass carries on.

use super::event::MetricEvent;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Closed,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Closed => write!(f, "Event channel closed"),
        }
    }
}

impl std::error::Error for SinkError {}

#[async_trait]
pub trait EventSink: Send {
    /// Publish a single event
    async fn publish(&mut self, event: &MetricEvent) -> Result<(), SinkError>;

    /// Flush pending writes
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Get sink type for logging
    fn sink_type(&self) -> &'static str;
}

/// Appends events as JSON lines
///
/// Before a line would push the file past `max_size_mb` the file is shifted
/// to `<path>.1`, older generations move up by one and the oldest beyond
/// `max_rotations` is overwritten.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
    max_bytes: u64,
    max_rotations: u32,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = open_append(&path)?;
        let bytes_written = file.metadata()?.len();
        log::info!("📝 Writing events to: {} ({} bytes present)", path.display(), bytes_written);

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            bytes_written,
            max_bytes: max_size_mb.saturating_mul(1024 * 1024),
            max_rotations: max_rotations.max(1),
        })
    }

    fn generation(&self, n: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;

        for n in (1..=self.max_rotations).rev() {
            let from = if n == 1 { self.path.clone() } else { self.generation(n - 1) };
            if from.exists() {
                std::fs::rename(&from, self.generation(n))?;
            }
        }

        self.writer = BufWriter::new(open_append(&self.path)?);
        self.bytes_written = 0;
        log::info!("📄 Rotated {} (keeping {})", self.path.display(), self.max_rotations);
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[async_trait]
impl EventSink for JsonlSink {
    async fn publish(&mut self, event: &MetricEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        if self.bytes_written > 0 && self.bytes_written + line.len() as u64 > self.max_bytes {
            self.rotate()?;
        }

        self.writer.write_all(&line)?;
        self.writer.flush()?;
        self.bytes_written += line.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "JSONL"
    }
}

/// Prints events as JSON lines on stdout
#[derive(Default)]
pub struct StdoutSink;

#[async_trait]
impl EventSink for StdoutSink {
    async fn publish(&mut self, event: &MetricEvent) -> Result<(), SinkError> {
        let json = serde_json::to_string(event)?;
        writeln!(std::io::stdout().lock(), "{}", json)?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        std::io::stdout().flush()?;
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "stdout"
    }
}

/// Forwards events to an in-process consumer
pub struct ChannelSink {
    tx: mpsc::Sender<MetricEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<MetricEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&mut self, event: &MetricEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).await.map_err(|_| SinkError::Closed)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beat_core::event::QueryType;
    use crate::beat_core::value::TypedValue;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_event() -> MetricEvent {
        let mut event = MetricEvent::new(Utc::now(), QueryType::SingleRow);
        event.insert("connections", TypedValue::Int(12));
        event
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("events.jsonl");
        let mut sink = JsonlSink::new(&path, 100, 3).unwrap();

        sink.publish(&sample_event()).await.unwrap();
        sink.publish(&sample_event()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["connections"], 12);
        assert_eq!(parsed["type"], "single-row");
    }

    #[tokio::test]
    async fn test_jsonl_sink_rotates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        // Zero-size limit: every line after the first lands in a fresh file
        let mut sink = JsonlSink::new(&path, 0, 2).unwrap();

        for _ in 0..4 {
            sink.publish(&sample_event()).await.unwrap();
        }

        assert!(dir.path().join("events.jsonl.1").exists());
        assert!(dir.path().join("events.jsonl.2").exists());
        assert!(!dir.path().join("events.jsonl.3").exists());
        for name in ["events.jsonl", "events.jsonl.1", "events.jsonl.2"] {
            let contents = std::fs::read_to_string(dir.path().join(name)).unwrap();
            assert_eq!(contents.lines().count(), 1, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_and_reports_close() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);

        sink.publish(&sample_event()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.get("connections"), Some(&TypedValue::Int(12)));

        drop(rx);
        assert!(matches!(sink.publish(&sample_event()).await, Err(SinkError::Closed)));
    }
}
