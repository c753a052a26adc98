// Network path monitoring — WiFi interface appearance triggers a listener
// restart because the old TCP socket may be bound to a gone-away interface.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Answers "does this device currently have a WiFi interface with an
/// address". Trait so tests (and exotic hosts) can inject transitions.
pub trait NetworkPathProbe: Send + Sync {
    fn has_wifi(&self) -> bool;
}

/// Default probe: enumerate interfaces and look for a non-loopback address
/// on a WiFi-shaped interface name.
pub struct SystemPathProbe;

impl NetworkPathProbe for SystemPathProbe {
    fn has_wifi(&self) -> bool {
        let Ok(interfaces) = if_addrs::get_if_addrs() else {
            return false;
        };
        interfaces.iter().any(|iface| {
            !iface.is_loopback() && is_wifi_name(&iface.name)
        })
    }
}

fn is_wifi_name(name: &str) -> bool {
    // en0 on Apple hardware, wlan*/wlp* on Linux.
    name.starts_with("en") || name.starts_with("wlan") || name.starts_with("wlp")
}

/// Periodically polls the probe on its own task and invokes the callback on
/// a non-WiFi → WiFi transition. WiFi loss is only logged; entries fall
/// back to the journal naturally once sends start failing.
pub struct PathMonitor {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl PathMonitor {
    pub fn spawn(
        probe: Arc<dyn NetworkPathProbe>,
        on_wifi_gained: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self::spawn_with_interval(probe, on_wifi_gained, POLL_INTERVAL)
    }

    pub fn spawn_with_interval(
        probe: Arc<dyn NetworkPathProbe>,
        on_wifi_gained: Arc<dyn Fn() + Send + Sync>,
        poll_interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut had_wifi = probe.has_wifi();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = stop_rx.changed() => return,
                }

                let has_wifi = probe.has_wifi();
                match (had_wifi, has_wifi) {
                    (false, true) => {
                        tracing::info!("WiFi path appeared; restarting listener");
                        on_wifi_gained();
                    }
                    (true, false) => {
                        tracing::info!(
                            "WiFi path lost; entries will journal until a viewer reconnects"
                        );
                    }
                    _ => {}
                }
                had_wifi = has_wifi;
            }
        });

        PathMonitor { stop_tx, task }
    }

    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
        self.task.abort();
    }
}
