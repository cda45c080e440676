//! Query runner - one poll pass over every configured query
//!
//! Per query:
//! 1. Resolve the resume placeholder (resume-multiple-rows only)
//! 2. Execute against the data source
//! 3. Translate rows into events and publish them
//! 4. Queue the new cursor when the pass produced events
//!
//! A failed query execution aborts the rest of the pass. A failed row only
//! stops the rows of its own query.

use super::delta::DeltaEngine;
use super::event::{MetricEvent, QueryType};
use super::placeholder::ResumePlaceholder;
use super::resume_store::ResumeHandle;
use super::sink::EventSink;
use super::source::{DataSource, SourceError};
use super::translator::RowTranslator;
use chrono::Utc;
use serde::Deserialize;
use std::time::Instant;

/// One configured query
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuerySpec {
    pub query: String,
    #[serde(rename = "type")]
    pub query_type: QueryType,
}

impl QuerySpec {
    pub fn new(query: impl Into<String>, query_type: QueryType) -> Self {
        Self {
            query: query.into(),
            query_type,
        }
    }
}

#[derive(Debug)]
pub enum PassError {
    Query { index: usize, source: SourceError },
}

impl std::fmt::Display for PassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassError::Query { index, source } => write!(f, "Query #{} failed: {}", index + 1, source),
        }
    }
}

impl std::error::Error for PassError {}

/// Counters for one query or one whole pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub queries_run: usize,
    pub events_published: usize,
    pub cursor_updates: usize,
}

impl PassSummary {
    fn absorb(&mut self, other: PassSummary) {
        self.queries_run += other.queries_run;
        self.events_published += other.events_published;
        self.cursor_updates += other.cursor_updates;
    }
}

pub struct QueryRunner {
    source: Box<dyn DataSource>,
    sink: Box<dyn EventSink>,
    resume: ResumeHandle,
    translator: RowTranslator,
    delta: DeltaEngine,
    queries: Vec<QuerySpec>,
}

impl QueryRunner {
    pub fn new(
        source: Box<dyn DataSource>,
        sink: Box<dyn EventSink>,
        resume: ResumeHandle,
        translator: RowTranslator,
        queries: Vec<QuerySpec>,
    ) -> Self {
        Self {
            source,
            sink,
            resume,
            translator,
            delta: DeltaEngine::new(),
            queries,
        }
    }

    pub fn delta_engine(&self) -> &DeltaEngine {
        &self.delta
    }

    pub fn queries(&self) -> &[QuerySpec] {
        &self.queries
    }

    /// Run every query once, in order
    pub async fn run_pass(&mut self) -> Result<PassSummary, PassError> {
        let started = Instant::now();
        let mut summary = PassSummary::default();

        for index in 0..self.queries.len() {
            let outcome = self
                .run_query(index)
                .await
                .map_err(|source| PassError::Query { index, source })?;
            summary.absorb(outcome);
        }

        if let Err(e) = self.sink.flush().await {
            log::warn!("⚠️  Failed to flush {} sink: {}", self.sink.sink_type(), e);
        }

        log::info!(
            "📊 Pass complete: {} queries, {} events, {} cursor updates in {:?}",
            summary.queries_run,
            summary.events_published,
            summary.cursor_updates,
            started.elapsed()
        );
        log::debug!("   └─ Delta keys tracked: {}", self.delta.len());

        Ok(summary)
    }

    async fn run_query(&mut self, index: usize) -> Result<PassSummary, SourceError> {
        let spec = self.queries[index].clone();
        let query_type = spec.query_type;
        let (query, placeholder) = resolve_query(&self.resume, index, &spec).await;

        log::debug!("🔎 Query #{} ({}): {}", index + 1, query_type.as_str(), query);

        let observed_at = Utc::now();
        let rows = self.source.execute(&query)?;

        let mut outcome = PassSummary {
            queries_run: 1,
            ..PassSummary::default()
        };
        let mut shared_event = match query_type {
            QueryType::TwoColumns => Some(MetricEvent::new(observed_at, query_type)),
            _ => None,
        };
        let mut last_event: Option<MetricEvent> = None;

        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    log::error!("❌ Query #{} error reading rows: {}", index + 1, e);
                    break;
                }
            };

            if let Some(event) = shared_event.as_mut() {
                if let Err(e) = self
                    .translator
                    .append_two_column_row(&mut self.delta, event, &row, observed_at)
                {
                    log::error!("❌ Query #{} error appending two-columns event: {}", index + 1, e);
                    break;
                }
                continue;
            }

            match self
                .translator
                .translate_row(&mut self.delta, query_type, &row, observed_at)
            {
                Ok(Some(event)) => {
                    if publish_event(self.sink.as_mut(), &event, index).await {
                        outcome.events_published += 1;
                    }
                    if query_type == QueryType::ResumeMultipleRows {
                        last_event = Some(event);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("❌ Query #{} error generating event from row: {}", index + 1, e);
                    break;
                }
            }

            if query_type.first_row_only() {
                break;
            }
        }

        if let Some(event) = shared_event.and_then(MetricEvent::into_publishable) {
            if publish_event(self.sink.as_mut(), &event, index).await {
                outcome.events_published += 1;
            }
        }

        if let (Some(event), Some(placeholder)) = (last_event, placeholder) {
            if self.queue_cursor(index, &event, &placeholder) {
                outcome.cursor_updates += 1;
            }
        }

        Ok(outcome)
    }

    fn queue_cursor(&self, index: usize, event: &MetricEvent, placeholder: &ResumePlaceholder) -> bool {
        if !placeholder.tracks_cursor() {
            return false;
        }

        match event.get(&placeholder.column) {
            Some(value) => {
                let cursor = value.to_string();
                log::debug!("   └─ Cursor {} -> {}", placeholder.name, cursor);
                self.resume.enqueue(placeholder.name.clone(), cursor);
                true
            }
            None => {
                log::warn!(
                    "⚠️  Query #{}: cursor column '{}' missing from last event, cursor not advanced",
                    index + 1,
                    placeholder.column
                );
                false
            }
        }
    }
}

/// Substitute the stored cursor (or its default) into the query text
async fn resolve_query(
    resume: &ResumeHandle,
    index: usize,
    spec: &QuerySpec,
) -> (String, Option<ResumePlaceholder>) {
    if spec.query_type != QueryType::ResumeMultipleRows {
        return (spec.query.clone(), None);
    }

    let Some(placeholder) = ResumePlaceholder::find(&spec.query) else {
        log::warn!(
            "⚠️  Query #{} is resume-multiple-rows but has no {{name|default|column}} placeholder",
            index + 1
        );
        return (spec.query.clone(), None);
    };

    let cursor = resume
        .lookup(&placeholder.name)
        .await
        .filter(|value| !value.is_empty());

    let value = match cursor {
        Some(value) => value,
        None => {
            log::debug!(
                "   ├─ No cursor for {}, using default '{}'",
                placeholder.name,
                placeholder.default
            );
            placeholder.default.clone()
        }
    };

    (placeholder.substitute(&spec.query, &value), Some(placeholder))
}

async fn publish_event(sink: &mut dyn EventSink, event: &MetricEvent, index: usize) -> bool {
    match sink.publish(event).await {
        Ok(()) => {
            log::info!("📤 Query #{} {} event sent", index + 1, event.query_type.as_str());
            true
        }
        Err(e) => {
            log::warn!("⚠️  Query #{} failed to publish event: {}", index + 1, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beat_core::resume_store::{spawn_resume_worker, ResumeStore};
    use crate::beat_core::sink::ChannelSink;
    use crate::beat_core::source::{Row, RowStream};
    use crate::beat_core::value::TypedValue;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    /// Scripted source: each execute pops the next canned response
    struct ScriptedSource {
        responses: VecDeque<Result<Vec<Result<Row, SourceError>>, SourceError>>,
        executed: Arc<Mutex<Vec<String>>>,
    }

    impl DataSource for ScriptedSource {
        fn execute(&mut self, query: &str) -> Result<RowStream, SourceError> {
            self.executed.lock().unwrap().push(query.to_string());
            match self.responses.pop_front() {
                Some(Ok(rows)) => Ok(rows.into_iter()),
                Some(Err(e)) => Err(e),
                None => Ok(Vec::new().into_iter()),
            }
        }

        fn source_type(&self) -> &'static str {
            "scripted"
        }
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().copied().collect()
    }

    fn ok_rows(rows: Vec<Row>) -> Result<Vec<Result<Row, SourceError>>, SourceError> {
        Ok(rows.into_iter().map(Ok).collect())
    }

    struct Harness {
        runner: QueryRunner,
        events: mpsc::Receiver<MetricEvent>,
        executed: Arc<Mutex<Vec<String>>>,
        store: Arc<ResumeStore>,
        _dir: tempfile::TempDir,
    }

    fn harness(
        queries: Vec<QuerySpec>,
        responses: Vec<Result<Vec<Result<Row, SourceError>>, SourceError>>,
    ) -> Harness {
        let dir = tempdir().unwrap();
        let store = Arc::new(ResumeStore::open(dir.path().join("resume.db")).unwrap());
        let (resume, _worker) = spawn_resume_worker(store.clone());
        let (tx, events) = mpsc::channel(64);
        let executed = Arc::new(Mutex::new(Vec::new()));
        let source = ScriptedSource {
            responses: responses.into(),
            executed: executed.clone(),
        };
        let runner = QueryRunner::new(
            Box::new(source),
            Box::new(ChannelSink::new(tx)),
            resume,
            RowTranslator::new("__DELTA", "__DELTAKEY"),
            queries,
        );
        Harness {
            runner,
            events,
            executed,
            store,
            _dir: dir,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<MetricEvent>) -> Vec<MetricEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_single_row_uses_first_row_only() {
        let mut h = harness(
            vec![QuerySpec::new("SELECT 1", QueryType::SingleRow)],
            vec![ok_rows(vec![row(&[("a", "1")]), row(&[("a", "2")])])],
        );

        let summary = h.runner.run_pass().await.unwrap();
        assert_eq!(summary.events_published, 1);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("a"), Some(&TypedValue::Int(1)));
    }

    #[tokio::test]
    async fn test_show_slave_delay_uses_first_row_delay_only() {
        let mut h = harness(
            vec![
                QuerySpec::new("SHOW SLAVE STATUS", QueryType::ShowSlaveDelay),
                QuerySpec::new("SHOW SLAVE STATUS", QueryType::ShowSlaveDelay),
            ],
            vec![
                ok_rows(vec![
                    row(&[
                        ("Slave_IO_State", "Waiting for master"),
                        ("Seconds_Behind_Master", "3"),
                    ]),
                    row(&[("Seconds_Behind_Master", "99")]),
                ]),
                ok_rows(vec![row(&[("Slave_IO_State", "Connecting"), ("Master_Port", "3306")])]),
            ],
        );

        let summary = h.runner.run_pass().await.unwrap();
        assert_eq!(summary.queries_run, 2);
        assert_eq!(summary.events_published, 1);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].query_type, QueryType::ShowSlaveDelay);
        assert_eq!(events[0].fields.len(), 1);
        assert_eq!(events[0].get("Seconds_Behind_Master"), Some(&TypedValue::Int(3)));
        assert!(h.runner.delta_engine().is_empty());
    }

    #[tokio::test]
    async fn test_two_columns_publishes_one_shared_event() {
        let mut h = harness(
            vec![QuerySpec::new("SHOW GLOBAL STATUS", QueryType::TwoColumns)],
            vec![ok_rows(vec![
                row(&[("Variable_name", "metricA"), ("Value", "10")]),
                row(&[("Variable_name", "metricB__DELTA"), ("Value", "20")]),
            ])],
        );

        h.runner.run_pass().await.unwrap();

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].query_type, QueryType::TwoColumns);
        assert_eq!(events[0].get("metricA"), Some(&TypedValue::Int(10)));
        assert!(events[0].get("metricB_PERSECOND").is_none());
    }

    #[tokio::test]
    async fn test_two_columns_without_fields_is_not_published() {
        let mut h = harness(
            vec![QuerySpec::new("SHOW GLOBAL STATUS", QueryType::TwoColumns)],
            vec![ok_rows(vec![row(&[("Variable_name", "x__DELTA"), ("Value", "1")])])],
        );

        let summary = h.runner.run_pass().await.unwrap();
        assert_eq!(summary.events_published, 0);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_aborts_pass() {
        let mut h = harness(
            vec![
                QuerySpec::new("SELECT broken", QueryType::SingleRow),
                QuerySpec::new("SELECT 1", QueryType::SingleRow),
            ],
            vec![
                Err(SourceError::Scan("connection refused".to_string())),
                ok_rows(vec![row(&[("a", "1")])]),
            ],
        );

        let err = h.runner.run_pass().await.unwrap_err();
        assert!(matches!(err, PassError::Query { index: 0, .. }));
        assert_eq!(h.executed.lock().unwrap().len(), 1);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_row_error_stops_only_its_query() {
        let mut h = harness(
            vec![
                QuerySpec::new("SELECT rows", QueryType::MultipleRows),
                QuerySpec::new("SELECT 1", QueryType::SingleRow),
            ],
            vec![
                ok_rows(vec![
                    row(&[("db__DELTAKEY", "a"), ("n", "1")]),
                    row(&[("name", "b"), ("bytes__DELTA", "5")]),
                    row(&[("db__DELTAKEY", "c"), ("n", "3")]),
                ]),
                ok_rows(vec![row(&[("ok", "1")])]),
            ],
        );

        let summary = h.runner.run_pass().await.unwrap();
        assert_eq!(summary.queries_run, 2);
        assert_eq!(summary.events_published, 2);

        let events = drain(&mut h.events);
        assert_eq!(events[0].get("db"), Some(&TypedValue::Str("a".to_string())));
        assert_eq!(events[1].get("ok"), Some(&TypedValue::Int(1)));
    }

    #[tokio::test]
    async fn test_resume_cursor_substitution_and_update() {
        let query = "SELECT id, title FROM course WHERE id > {cur|0|id} ORDER BY id";
        let mut h = harness(
            vec![QuerySpec::new(query, QueryType::ResumeMultipleRows)],
            vec![
                ok_rows(vec![
                    row(&[("id", "41"), ("title", "a")]),
                    row(&[("id", "42"), ("title", "b")]),
                ]),
                ok_rows(vec![]),
            ],
        );

        let summary = h.runner.run_pass().await.unwrap();
        assert_eq!(summary.events_published, 2);
        assert_eq!(summary.cursor_updates, 1);

        // Wait until the background writer has persisted the cursor
        for _ in 0..100 {
            if h.store.read("cur").is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(h.store.read("cur"), Some("42".to_string()));

        let summary = h.runner.run_pass().await.unwrap();
        assert_eq!(summary.cursor_updates, 0);

        let executed = h.executed.lock().unwrap().clone();
        assert_eq!(executed[0], "SELECT id, title FROM course WHERE id > 0 ORDER BY id");
        assert_eq!(executed[1], "SELECT id, title FROM course WHERE id > 42 ORDER BY id");
        assert_eq!(h.store.read("cur"), Some("42".to_string()));
    }

    #[tokio::test]
    async fn test_resume_missing_cursor_column_does_not_advance() {
        let mut h = harness(
            vec![QuerySpec::new(
                "SELECT title FROM t WHERE id > {cur|7|id}",
                QueryType::ResumeMultipleRows,
            )],
            vec![ok_rows(vec![row(&[("title", "a")])])],
        );

        let summary = h.runner.run_pass().await.unwrap();
        assert_eq!(summary.events_published, 1);
        assert_eq!(summary.cursor_updates, 0);
        assert_eq!(h.executed.lock().unwrap()[0], "SELECT title FROM t WHERE id > 7");
    }

    #[tokio::test]
    async fn test_non_resume_queries_are_not_substituted() {
        let query = "SELECT '{cur|0|id}' AS literal";
        let mut h = harness(
            vec![QuerySpec::new(query, QueryType::SingleRow)],
            vec![ok_rows(vec![row(&[("literal", "x")])])],
        );

        h.runner.run_pass().await.unwrap();
        assert_eq!(h.executed.lock().unwrap()[0], query);
    }
}
