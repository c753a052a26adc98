//! On-disk persistence for offline buffering and crash capture.

mod journal;

pub use journal::{Journal, JournalError, FILE_PREFIX};
