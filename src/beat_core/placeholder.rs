//! Resume placeholder embedded in query text
//!
//! Syntax: `{name|default|column}`. `name` is the cursor key in the resume
//! store, `default` is substituted while no cursor exists yet, and `column` is
//! the event field whose last value becomes the next cursor.

use regex::Regex;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w*)\|(\w*)\|(\w*)\}").expect("placeholder regex is valid"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlaceholder {
    /// Literal placeholder text as found in the query
    pub token: String,
    pub name: String,
    pub default: String,
    pub column: String,
}

impl ResumePlaceholder {
    /// First placeholder in the query, if any
    pub fn find(query: &str) -> Option<Self> {
        let caps = placeholder_regex().captures(query)?;
        Some(Self {
            token: caps[0].to_string(),
            name: caps[1].to_string(),
            default: caps[2].to_string(),
            column: caps[3].to_string(),
        })
    }

    /// Replace the placeholder text with a cursor value
    pub fn substitute(&self, query: &str, value: &str) -> String {
        query.replace(&self.token, value)
    }

    /// Cursor tracking needs both a key and a source column
    pub fn tracks_cursor(&self) -> bool {
        !self.name.is_empty() && !self.column.is_empty()
    }
}
