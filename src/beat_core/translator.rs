//! Row → event translation
//!
//! Column names drive the behaviour:
//! - `<name><key wildcard>` columns identify the row for multi-row delta state
//!   and are emitted under `<name>`
//! - `<name><delta wildcard>` columns are counters, emitted as a per-second
//!   rate under `<name>_PERSECOND`
//! - everything else is emitted as-is under its own name

use super::delta::DeltaEngine;
use super::event::{MetricEvent, QueryType};
use super::source::Row;
use super::value::{infer_value, ColumnValue};
use chrono::{DateTime, Utc};

pub const SLAVE_DELAY_COLUMN: &str = "Seconds_Behind_Master";
pub const RATE_SUFFIX: &str = "_PERSECOND";

#[derive(Debug, Clone, PartialEq)]
pub enum TranslateError {
    MissingKeyColumn(QueryType),
    TooFewColumns { expected: usize, found: usize },
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::MissingKeyColumn(query_type) => write!(
                f,
                "query type {} requires at least one delta key column",
                query_type.as_str()
            ),
            TranslateError::TooFewColumns { expected, found } => {
                write!(f, "expected {} columns per row, got {}", expected, found)
            }
        }
    }
}

impl std::error::Error for TranslateError {}

/// How delta state is keyed for a query type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeltaKeying {
    ColumnName,
    RowIdentity,
}

impl DeltaKeying {
    fn for_query_type(query_type: QueryType) -> Self {
        if query_type.is_multi_row() {
            DeltaKeying::RowIdentity
        } else {
            DeltaKeying::ColumnName
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowTranslator {
    delta_wildcard: String,
    key_wildcard: String,
}

impl RowTranslator {
    pub fn new(delta_wildcard: impl Into<String>, key_wildcard: impl Into<String>) -> Self {
        Self {
            delta_wildcard: delta_wildcard.into(),
            key_wildcard: key_wildcard.into(),
        }
    }

    fn is_key_column(&self, column: &str) -> bool {
        column.ends_with(&self.key_wildcard)
    }

    fn is_delta_column(&self, column: &str) -> bool {
        !self.is_key_column(column) && column.ends_with(&self.delta_wildcard)
    }

    /// Output field name for a result column
    pub fn field_name(&self, column: &str) -> String {
        if let Some(base) = column.strip_suffix(self.key_wildcard.as_str()) {
            base.to_string()
        } else if let Some(base) = column.strip_suffix(self.delta_wildcard.as_str()) {
            format!("{}{}", base, RATE_SUFFIX)
        } else {
            column.to_string()
        }
    }

    /// Concatenated values of every row-identity column
    fn row_identity(&self, row: &Row, query_type: QueryType) -> Result<String, TranslateError> {
        let mut identity = String::new();
        let mut found = false;
        for (column, value) in &row.columns {
            if self.is_key_column(column) {
                identity.push_str(value);
                found = true;
            }
        }
        if found {
            Ok(identity)
        } else {
            Err(TranslateError::MissingKeyColumn(query_type))
        }
    }

    /// Build one event from one row
    ///
    /// Returns `Ok(None)` when the row produced no fields (for example a
    /// first-cycle row made only of delta columns).
    pub fn translate_row(
        &self,
        engine: &mut DeltaEngine,
        query_type: QueryType,
        row: &Row,
        observed_at: DateTime<Utc>,
    ) -> Result<Option<MetricEvent>, TranslateError> {
        if row.is_empty() {
            return Ok(None);
        }

        let mut event = MetricEvent::new(observed_at, query_type);

        if query_type == QueryType::ShowSlaveDelay {
            if let Some(raw) = row.value(SLAVE_DELAY_COLUMN) {
                event.insert(SLAVE_DELAY_COLUMN, infer_value(raw));
            }
            return Ok(event.into_publishable());
        }

        let keying = DeltaKeying::for_query_type(query_type);
        let mut identity: Option<String> = None;

        for (column, raw) in &row.columns {
            let field = self.field_name(column);
            let value = ColumnValue::infer(raw);

            if !self.is_delta_column(column) {
                event.insert(field, value.typed);
                continue;
            }

            let key = match keying {
                DeltaKeying::RowIdentity => {
                    if identity.is_none() {
                        identity = Some(self.row_identity(row, query_type)?);
                    }
                    format!("{}{}", identity.as_deref().unwrap_or(""), column)
                }
                DeltaKeying::ColumnName => column.clone(),
            };

            if let Some(rate) = engine.observe(&key, &value, observed_at) {
                event.insert(field, rate);
            }
        }

        Ok(event.into_publishable())
    }

    /// Fold a (metric name, value) row into the shared two-columns event
    pub fn append_two_column_row(
        &self,
        engine: &mut DeltaEngine,
        event: &mut MetricEvent,
        row: &Row,
        observed_at: DateTime<Utc>,
    ) -> Result<(), TranslateError> {
        if row.len() < 2 {
            return Err(TranslateError::TooFewColumns {
                expected: 2,
                found: row.len(),
            });
        }

        let name = &row.columns[0].1;
        let value = ColumnValue::infer(&row.columns[1].1);
        let field = self.field_name(name);

        if self.is_delta_column(name) {
            if let Some(rate) = engine.observe(name, &value, observed_at) {
                event.insert(field, rate);
            }
        } else {
            event.insert(field, value.typed);
        }

        Ok(())
    }
}
