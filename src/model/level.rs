// Log severity levels and their stable numeric mapping

use serde::{Deserialize, Serialize};

/// Severity of a log entry, ordered from chattiest to most severe.
///
/// The numeric severity values are stable across releases so external
/// consumers (viewers, host logging bridges) can map them without chasing
/// enum reorderings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// Stable numeric severity: 1, 5, 9, 13, 17, 21.
    pub fn severity(&self) -> u8 {
        match self {
            LogLevel::Verbose => 1,
            LogLevel::Debug => 5,
            LogLevel::Info => 9,
            LogLevel::Warning => 13,
            LogLevel::Error => 17,
            LogLevel::Fatal => 21,
        }
    }

    /// Entries at this level are protected from rate limiting and mirrored
    /// into the priority ring.
    pub fn is_priority(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Fatal)
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        write!(f, "{}", name)
    }
}
