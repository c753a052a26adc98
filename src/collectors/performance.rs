// Performance metrics collector — periodic sampling of a host-supplied probe

use super::{Collector, EntrySink};
use crate::config::BackgroundPolicy;
use crate::model::{Category, LogEntry, LogExtra, LogLevel, PerformanceExtra};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One reading from the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceSample {
    pub cpu: f64,
    pub memory_mb: f64,
    /// Display-synchronized FPS where the platform supports it.
    pub fps: Option<f64>,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
}

/// Host-side metrics source. Platform probes (mach task info, /proc, display
/// link) live outside this crate; the SDK only schedules and records.
pub trait PerformanceProbe: Send + Sync {
    fn sample(&self) -> PerformanceSample;
}

pub struct PerformanceCollector {
    probe: Option<Arc<dyn PerformanceProbe>>,
    interval: Duration,
    policy: BackgroundPolicy,
    backgrounded: Arc<AtomicBool>,
    sink: Mutex<Option<EntrySink>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PerformanceCollector {
    pub fn new(
        probe: Option<Arc<dyn PerformanceProbe>>,
        interval: Duration,
        policy: BackgroundPolicy,
        backgrounded: Arc<AtomicBool>,
    ) -> Self {
        PerformanceCollector {
            probe,
            interval,
            policy,
            backgrounded,
            sink: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Take one sample immediately; also serves the viewer's
    /// snapshot-on-demand command.
    pub fn sample_now(&self) {
        let Some(probe) = &self.probe else {
            return;
        };
        let sink = self.sink.lock().clone();
        let Some(sink) = sink else {
            return;
        };
        Self::emit_sample(&sink, probe.sample());
    }

    fn emit_sample(sink: &EntrySink, sample: PerformanceSample) {
        let message = format!(
            "cpu {:.1}% mem {:.1}MB{}",
            sample.cpu,
            sample.memory_mb,
            sample
                .fps
                .map(|fps| format!(" fps {:.0}", fps))
                .unwrap_or_default()
        );
        let entry = LogEntry::new(LogLevel::Verbose, Category::PERFORMANCE, message)
            .with_extra(LogExtra::Performance(PerformanceExtra {
                cpu: sample.cpu,
                memory_mb: sample.memory_mb,
                fps: sample.fps,
                disk_read_bytes: sample.disk_read_bytes,
                disk_write_bytes: sample.disk_write_bytes,
            }));
        sink.emit(entry);
    }
}

impl Collector for PerformanceCollector {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn start(&self, sink: EntrySink) {
        *self.sink.lock() = Some(sink.clone());
        let Some(probe) = self.probe.clone() else {
            tracing::debug!("No performance probe configured; sampler idle");
            return;
        };

        let interval = self.interval;
        let policy = self.policy;
        let backgrounded = self.backgrounded.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if policy == BackgroundPolicy::PauseSampling
                    && backgrounded.load(Ordering::SeqCst)
                {
                    continue;
                }
                Self::emit_sample(&sink, probe.sample());
            }
        });
        *self.task.lock() = Some(task);
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        *self.sink.lock() = None;
    }
}
