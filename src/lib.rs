//! querybeat - periodic SQL poller that turns query results into metric events

pub mod beat_core;
pub mod config;
