// SDK configuration — built by the host, moved into the engine at start,
// immutable thereafter.

use crate::collectors::PerformanceProbe;
use crate::model::{Category, LogLevel};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which automatic collectors the engine registers at start.
///
/// Registration order is the field order here; stop runs in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorSet {
    pub network: bool,
    pub ui: bool,
    pub lifecycle: bool,
    pub performance: bool,
    pub crash: bool,
}

impl CollectorSet {
    pub fn all() -> Self {
        CollectorSet {
            network: true,
            ui: true,
            lifecycle: true,
            performance: true,
            crash: true,
        }
    }

    pub fn none() -> Self {
        CollectorSet {
            network: false,
            ui: false,
            lifecycle: false,
            performance: false,
            crash: false,
        }
    }
}

impl Default for CollectorSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Entry gatekeeping: which levels and categories pass `should_log`.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Minimum level for categories without a per-category override.
    pub global_min: LogLevel,
    pub per_category: HashMap<Category, LogLevel>,
    pub disabled: HashSet<Category>,
}

/// On-disk data-at-rest class applied to journal files on creation.
///
/// Only meaningful on platforms with file protection classes; a no-op
/// elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileProtection {
    Complete,
    #[default]
    CompleteUntilFirstUserAuthentication,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP port for the WebSocket listener. 0 asks the OS for an ephemeral
    /// port; the advertiser picks up whatever was bound.
    pub port: u16,
    /// mDNS instance name. `None` falls back to the (possibly anonymized)
    /// device name.
    pub service_name: Option<String>,
    pub anonymize_device_name: bool,
    pub advertise_app_name: bool,
    pub max_connections: usize,
    pub heartbeat_interval: Duration,
    pub requires_pairing: bool,
    /// Fixed pairing code; `None` generates a random 6-digit PIN at start.
    pub pairing_code: Option<String>,
    pub max_pairing_attempts: u32,
    pub pairing_cooldown: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            port: 9394,
            service_name: None,
            anonymize_device_name: false,
            advertise_app_name: true,
            max_connections: 4,
            heartbeat_interval: Duration::from_secs(15),
            requires_pairing: true,
            pairing_code: None,
            max_pairing_attempts: 3,
            pairing_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Journal root. `None` resolves to a `porby/logs` subdirectory under
    /// the platform temp directory; mobile hosts should pass their
    /// application-support path.
    pub base_dir: Option<PathBuf>,
    pub max_file_size: u64,
    pub max_file_count: usize,
    pub max_retention: Duration,
    pub flush_on_connect: bool,
    pub max_replay_entries: usize,
    pub protection: FileProtection,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            enabled: true,
            base_dir: None,
            max_file_size: 1024 * 1024,
            max_file_count: 10,
            max_retention: Duration::from_secs(24 * 3600),
            flush_on_connect: true,
            max_replay_entries: 1000,
            protection: FileProtection::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrivacyConfig {
    /// Header names replaced by `placeholder` (matched case-insensitively).
    pub redacted_headers: Vec<String>,
    pub redacted_metadata_keys: Vec<String>,
    pub redacted_query_params: Vec<String>,
    /// Body capture limit in bytes; 0 disables body capture entirely.
    pub max_body_size: usize,
    pub placeholder: String,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        PrivacyConfig {
            redacted_headers: vec![
                "authorization".into(),
                "cookie".into(),
                "set-cookie".into(),
                "proxy-authorization".into(),
                "x-api-key".into(),
            ],
            redacted_metadata_keys: vec![
                "password".into(),
                "token".into(),
                "secret".into(),
                "api_key".into(),
            ],
            redacted_query_params: vec![
                "token".into(),
                "key".into(),
                "password".into(),
                "secret".into(),
            ],
            max_body_size: 16 * 1024,
            placeholder: "<redacted>".into(),
        }
    }
}

/// What collectors do while the host app is backgrounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackgroundPolicy {
    /// Keep sampling and streaming.
    #[default]
    Continue,
    /// Pause the performance sampler until foreground.
    PauseSampling,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub max_buffer_count: usize,
    pub flush_interval: Duration,
    /// 0 disables rate limiting.
    pub max_logs_per_second: u32,
    pub performance_sample_interval: Duration,
    pub background_policy: BackgroundPolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_buffer_count: 1000,
            flush_interval: Duration::from_millis(100),
            max_logs_per_second: 0,
            performance_sample_interval: Duration::from_secs(10),
            background_policy: BackgroundPolicy::default(),
        }
    }
}

/// Device identity advertised in the handshake and mDNS record.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub model: String,
    pub os_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        DeviceInfo {
            name: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-device".into()),
            model: std::env::consts::OS.to_string(),
            os_version: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub identifier: String,
}

/// Root configuration. Moved into [`crate::engine::LogEngine::start`] and
/// never mutated afterwards; viewer commands layer runtime overrides on top
/// without touching this struct.
#[derive(Clone, Default)]
pub struct Config {
    pub enabled: bool,
    /// Refuse to start in release builds when set.
    pub debug_builds_only: bool,
    pub filter: FilterConfig,
    pub collectors: CollectorSet,
    pub transport: TransportConfig,
    pub persistence: PersistenceConfig,
    pub privacy: PrivacyConfig,
    pub limits: LimitsConfig,
    pub device: DeviceInfo,
    pub app: AppInfo,
    /// Host-supplied metrics source for the performance collector.
    pub performance_probe: Option<Arc<dyn PerformanceProbe>>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("enabled", &self.enabled)
            .field("filter", &self.filter)
            .field("collectors", &self.collectors)
            .field("transport", &self.transport)
            .field("persistence", &self.persistence)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Check the configuration for values that work but are probably not
    /// what the integrator wanted. Warnings are keyed so hosts can filter
    /// them; they never prevent startup.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.transport.port != 0 && self.transport.port < 1024 {
            warnings.push(ConfigWarning {
                key: "transport.port",
                message: format!(
                    "port {} is in the privileged range and may fail to bind",
                    self.transport.port
                ),
            });
        }

        let flush = self.limits.flush_interval;
        if flush < Duration::from_millis(16) || flush > Duration::from_secs(5) {
            warnings.push(ConfigWarning {
                key: "limits.flushInterval",
                message: format!(
                    "flush interval {:?} is outside the recommended [16ms, 5s] range",
                    flush
                ),
            });
        }

        if self.persistence.enabled && self.persistence.max_file_size == 0 {
            warnings.push(ConfigWarning {
                key: "persistence.maxFileSize",
                message: "persistence is enabled but maxFileSize is 0; every batch rotates"
                    .to_string(),
            });
        }

        if !self.transport.requires_pairing {
            warnings.push(ConfigWarning {
                key: "transport.requiresPairing",
                message: "pairing is disabled; any viewer on the local network can read logs"
                    .to_string(),
            });
        }

        if self.privacy.max_body_size > 100 * 1024 {
            warnings.push(ConfigWarning {
                key: "privacy.maxBodySize",
                message: format!(
                    "body capture of {} bytes will inflate entry sizes considerably",
                    self.privacy.max_body_size
                ),
            });
        }

        warnings
    }
}

/// A non-fatal configuration finding, keyed for host-side filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(config: &Config) -> Vec<&'static str> {
        config.validate().iter().map(|w| w.key).collect()
    }

    #[test]
    fn test_default_config_has_no_warnings() {
        let config = Config {
            enabled: true,
            ..Default::default()
        };
        assert!(keys(&config).is_empty());
    }

    #[test]
    fn test_every_warning_key_fires() {
        let mut config = Config::default();
        config.transport.port = 80;
        config.limits.flush_interval = Duration::from_millis(5);
        config.persistence.max_file_size = 0;
        config.transport.requires_pairing = false;
        config.privacy.max_body_size = 200 * 1024;

        let keys = keys(&config);
        for expected in [
            "transport.port",
            "limits.flushInterval",
            "persistence.maxFileSize",
            "transport.requiresPairing",
            "privacy.maxBodySize",
        ] {
            assert!(keys.contains(&expected), "missing warning {}", expected);
        }

        // Both ends of the flush-interval band are out of range.
        config.limits.flush_interval = Duration::from_secs(6);
        assert!(config
            .validate()
            .iter()
            .any(|w| w.key == "limits.flushInterval"));
    }
}
