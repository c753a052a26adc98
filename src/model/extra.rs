// Domain-specific payloads carried by automatic collector entries

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One captured HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkExtra {
    pub method: String,
    /// Sanitized URL — query parameters pass the redactor before storage.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Round-trip duration in milliseconds.
    pub duration_ms: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One parsed stack frame of a crash report.
///
/// Frames the symbolizer could not parse carry only `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl CrashFrame {
    pub fn unparsed(raw: impl Into<String>) -> Self {
        CrashFrame {
            index: None,
            module: None,
            address: None,
            symbol: None,
            raw: Some(raw.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub frames: Vec<CrashFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiExtra {
    pub event_type: String,
    pub view_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceExtra {
    /// CPU usage in percent of one core.
    pub cpu: f64,
    pub memory_mb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
}

/// Collector-specific payload attached to an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum LogExtra {
    Network(NetworkExtra),
    Crash(CrashExtra),
    Ui(UiExtra),
    Performance(PerformanceExtra),
}
