// Porby Core — in-process logging SDK
//
// Entries flow: producers -> engine (filter, rate limit) -> ring buffer ->
// timed drain -> transport. The transport streams to authenticated viewers
// over a local-network WebSocket (discovered via mDNS) and journals to disk
// when nobody is watching; the journal replays on the next authenticated
// connection. Fatal signals drain the buffer straight into the journal
// before the process dies.

pub mod collectors;
pub mod config;
pub mod engine;
pub mod model;
pub mod privacy;
pub mod store;
pub mod transport;

pub use collectors::{
    LifecycleEvent, NetworkEvent, PerformanceProbe, PerformanceSample,
};
pub use config::{
    AppInfo, BackgroundPolicy, CollectorSet, Config, ConfigWarning, DeviceInfo, FileProtection,
    FilterConfig, LimitsConfig, PersistenceConfig, PrivacyConfig, TransportConfig,
};
pub use engine::{engine, EngineError, LogEngine};
pub use model::{
    Category, LogEntry, LogExtra, LogLevel, Metadata, MetadataValue, SourceSite,
};
pub use privacy::Redactor;
pub use transport::ConnectionState;
