// Network event collector — turns completed HTTP exchanges into entries
//
// There is no portable way to globally intercept a host's HTTP client, so
// the host's transport adapter reports exchanges here explicitly. Because
// reporting is explicit there is no re-entrancy hazard to flag requests
// against: the SDK itself never routes its own traffic through the host
// client.

use super::{Collector, EntrySink};
use crate::config::PrivacyConfig;
use crate::model::{Category, LogEntry, LogExtra, LogLevel, NetworkExtra};
use crate::privacy::Redactor;
use parking_lot::RwLock;
use std::collections::HashMap;

/// One completed (or failed) HTTP exchange as reported by the host.
#[derive(Debug, Clone, Default)]
pub struct NetworkEvent {
    pub method: String,
    pub url: String,
    pub status_code: Option<u16>,
    /// Transport-level failure, when the exchange never produced a status.
    pub error: Option<String>,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub request_body: Option<Vec<u8>>,
    pub response_body: Option<Vec<u8>>,
    pub duration_ms: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

pub struct NetworkCollector {
    redactor: Redactor,
    max_body_size: usize,
    sink: RwLock<Option<EntrySink>>,
}

impl NetworkCollector {
    pub fn new(privacy: &PrivacyConfig) -> Self {
        NetworkCollector {
            redactor: Redactor::new(privacy),
            max_body_size: privacy.max_body_size,
            sink: RwLock::new(None),
        }
    }

    /// Build and emit the entry for one exchange. Redaction and body
    /// truncation happen here, before the event touches the buffer, so
    /// nothing pre-redaction is ever persisted.
    pub fn record(&self, event: NetworkEvent) {
        let sink = self.sink.read().clone();
        let Some(sink) = sink else {
            return;
        };

        let level = level_for(event.status_code, event.error.is_some());
        let status_text = match event.status_code {
            Some(code) => code.to_string(),
            None => event
                .error
                .clone()
                .unwrap_or_else(|| "no response".to_string()),
        };
        let url = self.redactor.redact_url(&event.url);
        let message = format!(
            "{} {} -> {} ({:.0}ms)",
            event.method, url, status_text, event.duration_ms
        );

        let extra = NetworkExtra {
            method: event.method,
            url,
            status_code: event.status_code,
            request_headers: self.redactor.redact_headers(&event.request_headers),
            response_headers: self.redactor.redact_headers(&event.response_headers),
            request_body: truncate_body(event.request_body.as_deref(), self.max_body_size),
            response_body: truncate_body(event.response_body.as_deref(), self.max_body_size),
            duration_ms: event.duration_ms,
            bytes_sent: event.bytes_sent,
            bytes_received: event.bytes_received,
        };

        let entry = LogEntry::new(level, Category::NETWORK, message)
            .with_extra(LogExtra::Network(extra));
        sink.emit(entry);
    }
}

impl Collector for NetworkCollector {
    fn name(&self) -> &'static str {
        "network"
    }

    fn start(&self, sink: EntrySink) {
        *self.sink.write() = Some(sink);
    }

    fn stop(&self) {
        *self.sink.write() = None;
    }
}

/// 2xx informational, 3xx/4xx a warning, 5xx an error; exchanges without a
/// status are errors only when the transport reported one.
fn level_for(status: Option<u16>, has_error: bool) -> LogLevel {
    match status {
        Some(code) if (200..300).contains(&code) => LogLevel::Info,
        Some(code) if (300..500).contains(&code) => LogLevel::Warning,
        Some(_) => LogLevel::Error,
        None if has_error => LogLevel::Error,
        None => LogLevel::Info,
    }
}

/// Lossy-UTF-8 slice of at most `max` bytes; 0 disables capture.
fn truncate_body(body: Option<&[u8]>, max: usize) -> Option<String> {
    if max == 0 {
        return None;
    }
    let body = body?;
    let slice = &body[..body.len().min(max)];
    Some(String::from_utf8_lossy(slice).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn collector_with_capture() -> (NetworkCollector, Arc<Mutex<Vec<LogEntry>>>) {
        let collector = NetworkCollector::new(&PrivacyConfig::default());
        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        collector.start(EntrySink::new(
            Arc::new(move |entry| captured_clone.lock().push(entry)),
            Arc::new(|| {}),
        ));
        (collector, captured)
    }

    #[test]
    fn test_status_level_mapping() {
        assert_eq!(level_for(Some(200), false), LogLevel::Info);
        assert_eq!(level_for(Some(301), false), LogLevel::Warning);
        assert_eq!(level_for(Some(404), false), LogLevel::Warning);
        assert_eq!(level_for(Some(500), false), LogLevel::Error);
        assert_eq!(level_for(None, true), LogLevel::Error);
        assert_eq!(level_for(None, false), LogLevel::Info);
    }

    #[test]
    fn test_recorded_entry_is_redacted() {
        let (collector, captured) = collector_with_capture();

        let mut request_headers = HashMap::new();
        request_headers.insert("Authorization".to_string(), "Bearer xyz".to_string());
        collector.record(NetworkEvent {
            method: "GET".into(),
            url: "https://api.example.com/items?token=s3cr3t".into(),
            status_code: Some(200),
            request_headers,
            duration_ms: 12.0,
            ..Default::default()
        });

        let captured = captured.lock();
        assert_eq!(captured.len(), 1);
        let entry = &captured[0];
        assert_eq!(entry.category, Category::NETWORK);
        let Some(LogExtra::Network(extra)) = &entry.extra else {
            panic!("expected network extra");
        };
        assert!(!extra.url.contains("s3cr3t"));
        assert_eq!(extra.request_headers["Authorization"], "<redacted>");
    }

    #[test]
    fn test_body_truncation_and_disable() {
        assert_eq!(
            truncate_body(Some(b"hello world"), 5),
            Some("hello".to_string())
        );
        assert_eq!(truncate_body(Some(b"hello"), 0), None);
        assert_eq!(truncate_body(None, 100), None);
    }

    #[test]
    fn test_stopped_collector_drops_events() {
        let (collector, captured) = collector_with_capture();
        collector.stop();
        collector.record(NetworkEvent {
            method: "GET".into(),
            url: "https://example.com".into(),
            status_code: Some(200),
            ..Default::default()
        });
        assert!(captured.lock().is_empty());
    }
}
