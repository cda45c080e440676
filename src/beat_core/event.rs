//! Metric events and query types

use super::value::TypedValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryType {
    SingleRow,
    MultipleRows,
    TwoColumns,
    ShowSlaveDelay,
    ResumeMultipleRows,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::SingleRow => "single-row",
            QueryType::MultipleRows => "multiple-rows",
            QueryType::TwoColumns => "two-columns",
            QueryType::ShowSlaveDelay => "show-slave-delay",
            QueryType::ResumeMultipleRows => "resume-multiple-rows",
        }
    }

    /// Query types whose rows are keyed by row-identity columns
    pub fn is_multi_row(&self) -> bool {
        matches!(self, QueryType::MultipleRows | QueryType::ResumeMultipleRows)
    }

    /// Query types that only look at the first returned row
    pub fn first_row_only(&self) -> bool {
        matches!(self, QueryType::SingleRow | QueryType::ShowSlaveDelay)
    }
}

/// Keys written by `MetricEvent` itself; a field of the same name is renamed
/// with a `column_` prefix.
pub const RESERVED_FIELDS: [&str; 2] = ["@timestamp", "type"];

/// One published document: timestamp, query type and metric fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub query_type: QueryType,
    #[serde(flatten)]
    pub fields: BTreeMap<String, TypedValue>,
}

impl MetricEvent {
    pub fn new(timestamp: DateTime<Utc>, query_type: QueryType) -> Self {
        Self {
            timestamp,
            query_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: TypedValue) {
        let name = name.into();
        match field_key(&name) {
            Some(renamed) => self.fields.insert(renamed, value),
            None => self.fields.insert(name, value),
        };
    }

    /// Field by its column name (reserved names are looked up renamed)
    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        match field_key(name) {
            Some(renamed) => self.fields.get(&renamed),
            None => self.fields.get(name),
        }
    }

    /// An event without metric fields is never published
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Drop the event if it carries nothing beyond timestamp and type
    pub fn into_publishable(self) -> Option<Self> {
        if self.has_fields() {
            Some(self)
        } else {
            None
        }
    }
}

fn field_key(name: &str) -> Option<String> {
    RESERVED_FIELDS
        .contains(&name)
        .then(|| format!("column_{}", name))
}
