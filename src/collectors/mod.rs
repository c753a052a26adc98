//! Automatic entry collectors and the narrow interface they emit through.

pub mod crash;
pub mod lifecycle;
pub mod network;
pub mod performance;
pub mod ui;

use crate::model::LogEntry;
use std::sync::Arc;

pub use crash::CrashCollector;
pub use lifecycle::{LifecycleCollector, LifecycleEvent};
pub use network::{NetworkCollector, NetworkEvent};
pub use performance::{PerformanceCollector, PerformanceProbe, PerformanceSample};
pub use ui::UiCollector;

/// Handle collectors emit entries through.
///
/// Holds callbacks, never the engine itself, so a collector can outlive a
/// stopped engine without keeping it alive (the callbacks hold a weak
/// reference internally).
#[derive(Clone)]
pub struct EntrySink {
    emit: Arc<dyn Fn(LogEntry) + Send + Sync>,
    emergency_flush: Arc<dyn Fn() + Send + Sync>,
}

impl EntrySink {
    pub fn new(
        emit: Arc<dyn Fn(LogEntry) + Send + Sync>,
        emergency_flush: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        EntrySink {
            emit,
            emergency_flush,
        }
    }

    /// Hand one entry to the engine's normal ingest path.
    pub fn emit(&self, entry: LogEntry) {
        (self.emit)(entry);
    }

    /// Synchronous drain-to-journal; crash capture only.
    pub fn emergency_flush(&self) {
        (self.emergency_flush)();
    }
}

/// Lifecycle contract every automatic collector follows. The engine starts
/// collectors in registration order and stops them in reverse.
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;
    fn start(&self, sink: EntrySink);
    fn stop(&self);
}
