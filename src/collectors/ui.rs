// UI navigation collector
//
// View appearance cannot be hooked portably, so the host calls
// `on_view_event` from its navigation layer; the outbound contract matches
// the automatic interceptors on platforms that have them.

use super::{Collector, EntrySink};
use crate::model::{Category, LogEntry, LogExtra, LogLevel, UiExtra};
use parking_lot::RwLock;

pub struct UiCollector {
    sink: RwLock<Option<EntrySink>>,
}

impl UiCollector {
    pub fn new() -> Self {
        UiCollector {
            sink: RwLock::new(None),
        }
    }

    pub fn on_view_event(&self, event_type: &str, view_name: &str, detail: Option<String>) {
        let sink = self.sink.read().clone();
        let Some(sink) = sink else {
            return;
        };
        let message = match &detail {
            Some(detail) => format!("{} {} ({})", event_type, view_name, detail),
            None => format!("{} {}", event_type, view_name),
        };
        let entry = LogEntry::new(LogLevel::Debug, Category::UI, message).with_extra(
            LogExtra::Ui(UiExtra {
                event_type: event_type.to_string(),
                view_name: view_name.to_string(),
                detail,
            }),
        );
        sink.emit(entry);
    }
}

impl Collector for UiCollector {
    fn name(&self) -> &'static str {
        "ui"
    }

    fn start(&self, sink: EntrySink) {
        *self.sink.write() = Some(sink);
    }

    fn stop(&self) {
        *self.sink.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_view_event_emits_ui_entry() {
        let collector = UiCollector::new();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        collector.start(EntrySink::new(
            Arc::new(move |entry| captured_clone.lock().push(entry)),
            Arc::new(|| {}),
        ));

        collector.on_view_event("appear", "SettingsScreen", None);

        let captured = captured.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].category, Category::UI);
        assert!(matches!(captured[0].extra, Some(LogExtra::Ui(_))));
    }
}
