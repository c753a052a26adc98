//! The engine — gatekeeping, rate limiting, buffering, timed flushing,
//! collector lifecycle, and the crash-time emergency path.

mod buffer;
mod rate_limit;

pub use buffer::{RingBuffer, DEFAULT_PRIORITY_CAPACITY, MIN_MAIN_CAPACITY};
pub use rate_limit::RateLimiter;

use crate::collectors::{
    Collector, CrashCollector, EntrySink, LifecycleCollector, LifecycleEvent, NetworkCollector,
    NetworkEvent, PerformanceCollector, UiCollector,
};
use crate::config::Config;
use crate::model::{Category, LogEntry, LogLevel, Metadata, MetadataValue, SourceSite};
use crate::privacy::Redactor;
use crate::transport::protocol::Command;
use crate::transport::{ConnectionState, Transport, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

/// Hard cap on estimated buffer memory before the engine force-flushes and
/// shrinks, independent of the host's memory warnings.
const USAGE_CAP_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to build SDK runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Runtime view of the filter configuration. Starts as a copy of the
/// immutable config and absorbs viewer commands from there.
struct FilterState {
    enabled: bool,
    global_min: LogLevel,
    per_category: HashMap<Category, LogLevel>,
    disabled: HashSet<Category>,
}

impl FilterState {
    fn from_config(config: &Config) -> Self {
        FilterState {
            enabled: true,
            global_min: config.filter.global_min,
            per_category: config.filter.per_category.clone(),
            disabled: config.filter.disabled.clone(),
        }
    }

    fn allows(&self, level: LogLevel, category: &Category) -> bool {
        if !self.enabled || self.disabled.contains(category) {
            return false;
        }
        let minimum = self
            .per_category
            .get(category)
            .copied()
            .unwrap_or(self.global_min);
        level >= minimum
    }
}

impl Default for FilterState {
    fn default() -> Self {
        FilterState {
            enabled: true,
            global_min: LogLevel::Verbose,
            per_category: HashMap::new(),
            disabled: HashSet::new(),
        }
    }
}

/// Everything owned while running: torn down in `stop`, in reverse order of
/// construction.
struct RunningState {
    runtime: tokio::runtime::Runtime,
    flush_task: tokio::task::JoinHandle<()>,
    collectors: Vec<Arc<dyn Collector>>,
}

/// Typed handles to the registered collectors, for the host-facing entry
/// points. Empty while stopped.
#[derive(Default)]
struct CollectorHandles {
    network: Option<Arc<NetworkCollector>>,
    ui: Option<Arc<UiCollector>>,
    lifecycle: Option<Arc<LifecycleCollector>>,
    performance: Option<Arc<PerformanceCollector>>,
}

struct Shared {
    running: AtomicBool,
    state: Mutex<Option<RunningState>>,
    config: RwLock<Option<Arc<Config>>>,
    filter: RwLock<FilterState>,
    buffer: RingBuffer,
    limiter: RwLock<RateLimiter>,
    redactor: RwLock<Option<Redactor>>,
    transport: RwLock<Option<Arc<Transport>>>,
    backgrounded: Arc<AtomicBool>,
    connection_state: RwLock<ConnectionState>,
    state_observer: RwLock<Option<Arc<dyn Fn(ConnectionState) + Send + Sync>>>,
    handles: RwLock<CollectorHandles>,
}

/// Process-wide coordinator. One instance per process is the intended
/// shape (see [`engine()`]), but instances are self-contained so tests can
/// run several.
pub struct LogEngine {
    shared: Arc<Shared>,
}

static ENGINE: OnceLock<LogEngine> = OnceLock::new();

/// The once-initialized process-wide engine.
pub fn engine() -> &'static LogEngine {
    ENGINE.get_or_init(LogEngine::new)
}

impl LogEngine {
    pub fn new() -> Self {
        LogEngine {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                state: Mutex::new(None),
                config: RwLock::new(None),
                filter: RwLock::new(FilterState::default()),
                buffer: RingBuffer::default(),
                limiter: RwLock::new(RateLimiter::new(0)),
                redactor: RwLock::new(None),
                transport: RwLock::new(None),
                backgrounded: Arc::new(AtomicBool::new(false)),
                connection_state: RwLock::new(ConnectionState::Waiting),
                state_observer: RwLock::new(None),
                handles: RwLock::new(CollectorHandles::default()),
            }),
        }
    }

    /// Bring the SDK up. Idempotent: a second start while running is a
    /// no-op. Configuration problems are warnings, never startup failures;
    /// only an unbindable port or a dead runtime abort the start.
    pub fn start(&self, config: Config) -> Result<(), EngineError> {
        let mut state_slot = self.shared.state.lock();
        if state_slot.is_some() {
            tracing::debug!("Engine already running; start ignored");
            return Ok(());
        }

        if config.debug_builds_only && !cfg!(debug_assertions) {
            tracing::info!("Engine restricted to debug builds; not starting");
            return Ok(());
        }
        if !config.enabled {
            tracing::info!("Engine disabled by configuration");
            return Ok(());
        }

        for warning in config.validate() {
            tracing::warn!("Config warning [{}]: {}", warning.key, warning.message);
        }

        let config = Arc::new(config);
        *self.shared.config.write() = Some(Arc::clone(&config));
        *self.shared.filter.write() = FilterState::from_config(&config);
        *self.shared.redactor.write() = Some(Redactor::new(&config.privacy));
        *self.shared.limiter.write() = RateLimiter::new(config.limits.max_logs_per_second);
        self.shared
            .buffer
            .reset(config.limits.max_buffer_count, DEFAULT_PRIORITY_CAPACITY);
        self.shared.backgrounded.store(false, Ordering::SeqCst);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("porby-sdk")
            .enable_all()
            .build()?;
        let guard = runtime.enter();

        let weak = Arc::downgrade(&self.shared);
        let on_command = Arc::new(move |command: Command| {
            if let Some(shared) = weak.upgrade() {
                Shared::apply_command(&shared, command);
            }
        });
        let on_state = {
            let weak = Arc::downgrade(&self.shared);
            Arc::new(move |state: ConnectionState| {
                if let Some(shared) = weak.upgrade() {
                    *shared.connection_state.write() = state;
                    let observer = shared.state_observer.read().clone();
                    if let Some(observer) = observer {
                        observer(state);
                    }
                }
            }) as Arc<dyn Fn(ConnectionState) + Send + Sync>
        };
        let transport = Transport::start(Arc::clone(&config), on_command, Some(on_state))?;
        *self.shared.transport.write() = Some(Arc::clone(&transport));

        let flush_task = {
            let weak = Arc::downgrade(&self.shared);
            let transport = Arc::clone(&transport);
            let period = config.limits.flush_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let Some(shared) = weak.upgrade() else { return };
                    let batch = shared.buffer.drain();
                    if !batch.is_empty() {
                        transport.send(batch);
                    }
                }
            })
        };

        let collectors = self.register_collectors(&config);
        drop(guard);

        self.shared.running.store(true, Ordering::SeqCst);
        *state_slot = Some(RunningState {
            runtime,
            flush_task,
            collectors,
        });
        tracing::info!(
            "Porby engine started; listener {:?}",
            transport.local_addr()
        );
        Ok(())
    }

    /// Register the collectors the bitset asks for, in a fixed order; stop
    /// later walks the same list backwards. Runs inside the runtime so
    /// samplers can spawn their tasks.
    fn register_collectors(&self, config: &Arc<Config>) -> Vec<Arc<dyn Collector>> {
        let sink = self.collector_sink();
        let mut handles = CollectorHandles::default();
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();

        if config.collectors.network {
            let collector = Arc::new(NetworkCollector::new(&config.privacy));
            handles.network = Some(Arc::clone(&collector));
            collectors.push(collector);
        }
        if config.collectors.ui {
            let collector = Arc::new(UiCollector::new());
            handles.ui = Some(Arc::clone(&collector));
            collectors.push(collector);
        }
        if config.collectors.lifecycle {
            let collector = Arc::new(LifecycleCollector::new(Arc::clone(
                &self.shared.backgrounded,
            )));
            handles.lifecycle = Some(Arc::clone(&collector));
            collectors.push(collector);
        }
        if config.collectors.performance {
            let collector = Arc::new(PerformanceCollector::new(
                config.performance_probe.clone(),
                config.limits.performance_sample_interval,
                config.limits.background_policy,
                Arc::clone(&self.shared.backgrounded),
            ));
            handles.performance = Some(Arc::clone(&collector));
            collectors.push(collector);
        }
        if config.collectors.crash {
            collectors.push(Arc::new(CrashCollector::new()));
        }

        *self.shared.handles.write() = handles;
        for collector in &collectors {
            collector.start(sink.clone());
            tracing::debug!("Collector {} registered", collector.name());
        }
        collectors
    }

    fn collector_sink(&self) -> EntrySink {
        let weak = Arc::downgrade(&self.shared);
        let weak_flush = weak.clone();
        EntrySink::new(
            Arc::new(move |entry| {
                if let Some(shared) = weak.upgrade() {
                    Shared::ingest(&shared, entry);
                }
            }),
            Arc::new(move || {
                if let Some(shared) = weak_flush.upgrade() {
                    Shared::emergency_flush(&shared);
                }
            }),
        )
    }

    /// Tear everything down: collectors in reverse registration order, then
    /// the flush timer, one final drain, then transport and runtime.
    /// Idempotent.
    pub fn stop(&self) {
        let mut state_slot = self.shared.state.lock();
        let Some(state) = state_slot.take() else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);

        for collector in state.collectors.iter().rev() {
            collector.stop();
            tracing::debug!("Collector {} stopped", collector.name());
        }
        *self.shared.handles.write() = CollectorHandles::default();

        state.flush_task.abort();

        let transport = self.shared.transport.write().take();
        if let Some(transport) = &transport {
            let batch = self.shared.buffer.drain();
            if !batch.is_empty() {
                transport.send(batch);
            }
            transport.stop();
        }

        state.runtime.shutdown_timeout(Duration::from_secs(1));
        *self.shared.config.write() = None;
        tracing::info!("Porby engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The bound listener address while running.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.shared
            .transport
            .read()
            .as_ref()
            .and_then(|t| t.local_addr())
    }

    /// Last observed viewer connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.connection_state.read()
    }

    /// Host callback for pairing-status UI; invoked on every transition.
    pub fn set_connection_state_observer(
        &self,
        observer: Arc<dyn Fn(ConnectionState) + Send + Sync>,
    ) {
        *self.shared.state_observer.write() = Some(observer);
    }

    pub fn should_log(&self, level: LogLevel, category: &Category) -> bool {
        if !self.is_running() {
            return false;
        }
        self.shared.filter.read().allows(level, category)
    }

    /// The public ingest path used by the façade. Metadata is redacted
    /// before it touches the buffer.
    pub fn log(
        &self,
        level: LogLevel,
        category: Category,
        message: impl Into<String>,
        metadata: Option<Metadata>,
        source: Option<SourceSite>,
    ) {
        if !self.should_log(level, &category) {
            return;
        }
        let mut entry = LogEntry::new(level, category, message);
        if let Some(metadata) = metadata {
            let redacted = match &*self.shared.redactor.read() {
                Some(redactor) => redactor.redact_metadata(&metadata),
                None => metadata,
            };
            entry = entry.with_metadata(redacted);
        }
        if let Some(source) = source {
            entry = entry.with_source(source);
        }
        Shared::ingest(&self.shared, entry);
    }

    /// Bridge for a host logging system. An explicit `source` label lands
    /// under the `_source` metadata key.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        level: LogLevel,
        category: Category,
        message: &str,
        metadata: Option<Metadata>,
        source: Option<&str>,
        file: &str,
        function: &str,
        line: u32,
    ) {
        let mut metadata = metadata.unwrap_or_default();
        if let Some(source) = source {
            metadata.insert(
                "_source".to_string(),
                MetadataValue::String(source.to_string()),
            );
        }
        let metadata = if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        };
        self.log(
            level,
            category,
            message,
            metadata,
            Some(SourceSite::new(file, function, line)),
        );
    }

    /// Host-signalled memory pressure: flush what we have and halve the
    /// buffer (floor 50).
    pub fn on_memory_warning(&self) {
        if !self.is_running() {
            return;
        }
        tracing::info!("Memory warning: flushing and shrinking buffer");
        Shared::flush_now(&self.shared);
        let target = (self.shared.buffer.max_main() / 2).max(MIN_MAIN_CAPACITY);
        self.shared.buffer.reduce_max_size(target);
    }

    /// Synchronous crash-path drain: journal first, then a best-effort send
    /// to any live viewer. Takes no locks beyond the ring mutex and the
    /// transport handle.
    pub fn emergency_flush(&self) {
        Shared::emergency_flush(&self.shared);
    }

    // ----- explicit collector entry points (host-facing) -----

    pub fn record_network_event(&self, event: NetworkEvent) {
        if let Some(collector) = &self.shared.handles.read().network {
            collector.record(event);
        }
    }

    pub fn on_view_event(&self, event_type: &str, view_name: &str, detail: Option<String>) {
        if let Some(collector) = &self.shared.handles.read().ui {
            collector.on_view_event(event_type, view_name, detail);
        }
    }

    pub fn on_lifecycle_event(&self, event: LifecycleEvent) {
        if let Some(collector) = &self.shared.handles.read().lifecycle {
            collector.on_lifecycle_event(event);
        }
    }
}

impl Default for LogEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    /// Producer-side append: a brief limiter check and a brief buffer
    /// mutex, nothing that can block on I/O. Error/fatal entries bypass
    /// the limiter.
    fn ingest(shared: &Arc<Shared>, entry: LogEntry) {
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        if !entry.level.is_priority() && shared.limiter.read().should_limit() {
            return;
        }
        shared.buffer.append(entry);

        if shared.buffer.estimated_bytes() > USAGE_CAP_BYTES {
            tracing::warn!("Buffer usage cap hit: flushing and shrinking");
            Shared::flush_now(shared);
            let target = (USAGE_CAP_BYTES / LogEntry::ESTIMATED_BYTES).max(MIN_MAIN_CAPACITY);
            shared.buffer.reduce_max_size(target);
        }
    }

    /// Drain and route immediately on the caller thread.
    fn flush_now(shared: &Arc<Shared>) {
        let batch = shared.buffer.drain();
        if batch.is_empty() {
            return;
        }
        if let Some(transport) = &*shared.transport.read() {
            transport.send(batch);
        }
    }

    fn emergency_flush(shared: &Arc<Shared>) {
        let batch = shared.buffer.drain();
        if batch.is_empty() {
            return;
        }
        if let Some(transport) = &*shared.transport.read() {
            transport.emergency_persist(&batch);
            transport.emergency_send(&batch);
        }
    }

    /// Viewer commands mutate the runtime overlay only; the configuration
    /// the host handed over stays untouched.
    fn apply_command(shared: &Arc<Shared>, command: Command) {
        match command {
            Command::SetLogLevel { level } => {
                tracing::info!("Viewer set global minimum level to {}", level);
                shared.filter.write().global_min = level;
            }
            Command::SetCategoryLevel { category, level } => {
                shared
                    .filter
                    .write()
                    .per_category
                    .insert(Category::from(category), level);
            }
            Command::SetEnabled { enabled, category } => match category {
                Some(category) => {
                    let mut filter = shared.filter.write();
                    let category = Category::from(category);
                    if enabled {
                        filter.disabled.remove(&category);
                    } else {
                        filter.disabled.insert(category);
                    }
                }
                None => shared.filter.write().enabled = enabled,
            },
            Command::ClearLogs => {
                let _ = shared.buffer.drain();
                if let Some(transport) = &*shared.transport.read() {
                    transport.clear_journal();
                }
            }
            Command::RequestPerformanceSnapshot => {
                if let Some(collector) = &shared.handles.read().performance {
                    collector.sample_now();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_respects_levels_and_categories() {
        let mut config = Config::default();
        config.filter.global_min = LogLevel::Info;
        config
            .filter
            .per_category
            .insert(Category::NETWORK, LogLevel::Warning);
        config.filter.disabled.insert(Category::from("noisy"));

        let filter = FilterState::from_config(&config);
        assert!(filter.allows(LogLevel::Info, &Category::APP));
        assert!(!filter.allows(LogLevel::Debug, &Category::APP));
        assert!(!filter.allows(LogLevel::Info, &Category::NETWORK));
        assert!(filter.allows(LogLevel::Error, &Category::NETWORK));
        assert!(!filter.allows(LogLevel::Fatal, &Category::from("noisy")));
    }

    #[test]
    fn test_commands_mutate_the_runtime_overlay() {
        let engine = LogEngine::new();
        let apply = |command| Shared::apply_command(&engine.shared, command);

        // Stopped engines log nothing regardless of the overlay.
        assert!(!engine.should_log(LogLevel::Fatal, &Category::APP));
        engine.shared.running.store(true, Ordering::SeqCst);

        apply(Command::SetLogLevel {
            level: LogLevel::Error,
        });
        assert_eq!(engine.shared.filter.read().global_min, LogLevel::Error);

        apply(Command::SetEnabled {
            enabled: false,
            category: Some("ui".to_string()),
        });
        assert!(engine.shared.filter.read().disabled.contains(&Category::UI));
        apply(Command::SetEnabled {
            enabled: true,
            category: Some("ui".to_string()),
        });
        assert!(!engine.shared.filter.read().disabled.contains(&Category::UI));

        // Category-less setEnabled toggles the SDK-wide flag.
        apply(Command::SetEnabled {
            enabled: false,
            category: None,
        });
        assert!(!engine.should_log(LogLevel::Fatal, &Category::APP));
        engine.shared.running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn test_ingest_rate_limit_bypass_for_priority() {
        let engine = LogEngine::new();
        engine.shared.running.store(true, Ordering::SeqCst);
        *engine.shared.limiter.write() = RateLimiter::new(1);

        let ingest = |level, message: &str| {
            Shared::ingest(&engine.shared, LogEntry::new(level, Category::APP, message))
        };
        ingest(LogLevel::Info, "info1");
        ingest(LogLevel::Info, "info2");
        ingest(LogLevel::Error, "error1");

        let batch = engine.shared.buffer.drain();
        let messages: Vec<&str> = batch.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["info1", "error1"]);
        engine.shared.running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn test_memory_warning_halves_buffer() {
        let engine = LogEngine::new();
        engine.shared.running.store(true, Ordering::SeqCst);
        engine.shared.buffer.reset(400, 100);

        engine.on_memory_warning();
        assert_eq!(engine.shared.buffer.max_main(), 200);

        // Repeated warnings bottom out at the floor.
        for _ in 0..10 {
            engine.on_memory_warning();
        }
        assert_eq!(engine.shared.buffer.max_main(), MIN_MAIN_CAPACITY);
        engine.shared.running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let engine = LogEngine::new();
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }
}
