//! Beat Core - Periodic SQL Poller
//!
//! Runs a fixed list of read-only queries on a schedule and turns each result
//! row into a structured metric event.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (interval tick)
//!     ↓
//! QueryRunner ── ResumeHandle ⇄ resume worker → resume file
//!     ↓
//! DataSource (SQLite, read-only) → Row
//!     ↓
//! RowTranslator + DeltaEngine (counter → per-second rate)
//!     ↓
//! EventSink → JSONL, stdout or channel
//! ```

pub mod delta;
pub mod event;
pub mod placeholder;
pub mod resume_store;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod translator;
pub mod value;

pub use delta::{DeltaEngine, DeltaRecord};
pub use event::{MetricEvent, QueryType};
pub use placeholder::ResumePlaceholder;
pub use resume_store::{spawn_resume_worker, ResumeHandle, ResumeRecord, ResumeStore, ResumeStoreError};
pub use runner::{PassError, PassSummary, QueryRunner, QuerySpec};
pub use scheduler::{run_scheduler, SchedulerReport};
pub use sink::{ChannelSink, EventSink, JsonlSink, SinkError, StdoutSink};
pub use source::{DataSource, Row, RowStream, SourceError, SqliteDataSource};
pub use translator::{RowTranslator, TranslateError};
pub use value::{ColumnType, ColumnValue, TypedValue};
