// The log entry record — immutable once constructed

use super::{Category, LogExtra, LogLevel, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where in the source an entry was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSite {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl SourceSite {
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        SourceSite {
            file: file.into(),
            function: function.into(),
            line,
        }
    }
}

/// A single immutable log record.
///
/// Entries are identified by a random 128-bit id rendered as the canonical
/// UUID string; the buffer dedups on it when the main and priority rings
/// overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    /// Wall-clock capture time, ISO-8601 with fractional seconds on the wire.
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: Category,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<LogExtra>,
}

impl LogEntry {
    pub fn new(level: LogLevel, category: Category, message: impl Into<String>) -> Self {
        LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            source: None,
            metadata: None,
            extra: None,
        }
    }

    pub fn with_source(mut self, source: SourceSite) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_extra(mut self, extra: LogExtra) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Rough in-memory footprint used for the buffer's usage cap.
    pub const ESTIMATED_BYTES: usize = 512;
}
