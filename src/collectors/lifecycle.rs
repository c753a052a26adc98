// Application lifecycle collector — host-reported foreground/background
// transitions

use super::{Collector, EntrySink};
use crate::model::{Category, LogEntry, LogLevel};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Launch,
    Foreground,
    Background,
    Terminate,
    LowMemory,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LifecycleEvent::Launch => "App launched",
            LifecycleEvent::Foreground => "App entered foreground",
            LifecycleEvent::Background => "App entered background",
            LifecycleEvent::Terminate => "App will terminate",
            LifecycleEvent::LowMemory => "Low memory warning",
        };
        write!(f, "{}", text)
    }
}

pub struct LifecycleCollector {
    sink: RwLock<Option<EntrySink>>,
    /// Shared with the performance sampler when the background policy
    /// pauses it.
    backgrounded: Arc<AtomicBool>,
}

impl LifecycleCollector {
    pub fn new(backgrounded: Arc<AtomicBool>) -> Self {
        LifecycleCollector {
            sink: RwLock::new(None),
            backgrounded,
        }
    }

    pub fn on_lifecycle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Background => self.backgrounded.store(true, Ordering::SeqCst),
            LifecycleEvent::Foreground | LifecycleEvent::Launch => {
                self.backgrounded.store(false, Ordering::SeqCst)
            }
            _ => {}
        }

        let sink = self.sink.read().clone();
        let Some(sink) = sink else {
            return;
        };
        sink.emit(LogEntry::new(
            LogLevel::Info,
            Category::LIFECYCLE,
            event.to_string(),
        ));
    }
}

impl Collector for LifecycleCollector {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    fn start(&self, sink: EntrySink) {
        *self.sink.write() = Some(sink);
    }

    fn stop(&self) {
        *self.sink.write() = None;
    }
}
