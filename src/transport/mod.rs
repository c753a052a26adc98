//! Transport — WebSocket server, mDNS advertiser, pairing, journal routing,
//! and the network path monitor, glued behind one start/stop surface.

pub mod advertiser;
pub mod monitor;
pub mod pairing;
pub mod protocol;
pub mod server;

use crate::config::Config;
use crate::model::LogEntry;
use crate::store::{Journal, JournalError};
use advertiser::MdnsAdvertiser;
use monitor::{NetworkPathProbe, PathMonitor, SystemPathProbe};
use pairing::PairingManager;
use parking_lot::Mutex;
use protocol::{Handshake, HandshakeApp, HandshakeDevice, PROTOCOL_VERSION};
use server::{CommandHandler, StateHandler, WsServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use server::ConnectionState;

/// Delay between tearing the listener down and rebinding after a network
/// path change.
const RESTART_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Cannot bind listener on port {0}")]
    InvalidPort(u16),
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Routes drained batches to the network when an authenticated viewer is
/// live, to the journal otherwise; replays the journal to every freshly
/// authenticated viewer.
pub struct Transport {
    config: Arc<Config>,
    server: Arc<WsServer>,
    journal: Option<Arc<Journal>>,
    advertiser: Mutex<Option<MdnsAdvertiser>>,
    monitor: Mutex<Option<PathMonitor>>,
    is_restarting: AtomicBool,
}

impl Transport {
    /// Bring up journal, pairing, listener, advertiser, and path monitor.
    /// Must run inside the SDK runtime.
    pub fn start(
        config: Arc<Config>,
        on_command: CommandHandler,
        on_state: Option<StateHandler>,
    ) -> Result<Arc<Self>, TransportError> {
        Self::start_with_probe(config, on_command, on_state, Arc::new(SystemPathProbe))
    }

    pub fn start_with_probe(
        config: Arc<Config>,
        on_command: CommandHandler,
        on_state: Option<StateHandler>,
        path_probe: Arc<dyn NetworkPathProbe>,
    ) -> Result<Arc<Self>, TransportError> {
        let journal = if config.persistence.enabled {
            Some(Journal::open(&config.persistence)?)
        } else {
            None
        };

        let pairing = if config.transport.requires_pairing {
            let manager = Arc::new(PairingManager::new(
                config.transport.pairing_code.clone(),
                config.transport.max_pairing_attempts,
                config.transport.pairing_cooldown,
            ));
            // The PIN is intentionally written to the developer log; that is
            // how the person holding the device reads it off.
            tracing::info!("Viewer pairing PIN: {}", manager.active_code());
            Some(manager)
        } else {
            None
        };

        let server = WsServer::new(
            config.transport.max_connections,
            config.transport.heartbeat_interval,
            pairing,
            build_handshake(&config),
        );
        server.set_command_handler(on_command);
        if let Some(on_state) = on_state {
            server.set_state_handler(on_state);
        }

        let transport = Arc::new(Transport {
            config: Arc::clone(&config),
            server,
            journal,
            advertiser: Mutex::new(None),
            monitor: Mutex::new(None),
            is_restarting: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&transport);
        transport
            .server
            .set_authenticated_handler(Arc::new(move |viewer| {
                if let Some(transport) = weak.upgrade() {
                    transport.on_viewer_authenticated(viewer);
                }
            }));

        let addr = transport.server.start(config.transport.port)?;
        transport.publish_advertisement(addr.port());

        let weak = Arc::downgrade(&transport);
        let monitor = PathMonitor::spawn(
            path_probe,
            Arc::new(move || {
                if let Some(transport) = weak.upgrade() {
                    transport.restart_listener();
                }
            }),
        );
        *transport.monitor.lock() = Some(monitor);

        Ok(transport)
    }

    fn publish_advertisement(&self, port: u16) {
        let pairing_required = self.config.transport.requires_pairing;
        match MdnsAdvertiser::publish(&self.config, pairing_required, port) {
            Ok(advertiser) => *self.advertiser.lock() = Some(advertiser),
            // Advertising is best-effort: a viewer can still connect by
            // address, so a failed daemon must not take the SDK down.
            Err(e) => tracing::warn!("mDNS advertising unavailable: {}", e),
        }
    }

    /// Stop monitor, listener, and advertiser, then flush and join the
    /// journal worker.
    pub fn stop(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        self.server.stop();
        if let Some(advertiser) = self.advertiser.lock().take() {
            advertiser.stop();
        }
        if let Some(journal) = &self.journal {
            journal.shutdown();
        }
    }

    /// Route one drained batch: live viewers win, the journal catches the
    /// rest. A batch with no destination is dropped by design.
    pub fn send(&self, batch: Vec<LogEntry>) {
        if batch.is_empty() {
            return;
        }
        if self.server.has_authenticated_viewers() {
            self.server.send(batch);
        } else if let Some(journal) = &self.journal {
            journal.queue_save(batch);
        }
    }

    /// Viewer-issued wipe: drop every journaled batch.
    pub fn clear_journal(&self) {
        if let Some(journal) = &self.journal {
            journal.clear_replayed_entries();
        }
    }

    /// Crash-path persistence: inline, lock-light, best-effort.
    pub fn emergency_persist(&self, batch: &[LogEntry]) {
        if let Some(journal) = &self.journal {
            journal.emergency_save(batch);
        }
    }

    /// Best-effort crash-path send to whoever is still connected.
    pub fn emergency_send(&self, batch: &[LogEntry]) {
        if self.server.has_authenticated_viewers() {
            self.server.send(batch.to_vec());
        }
    }

    pub fn has_authenticated_viewers(&self) -> bool {
        self.server.has_authenticated_viewers()
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.local_addr()
    }

    /// Journal replay for a freshly authenticated viewer. Runs synchronously
    /// on the connection's context so the replay frame is queued before any
    /// live batch that flushes afterwards.
    fn on_viewer_authenticated(&self, viewer: Uuid) {
        if !self.config.persistence.flush_on_connect {
            return;
        }
        let Some(journal) = &self.journal else {
            return;
        };

        let entries = journal.load_for_replay();
        if !entries.is_empty() {
            tracing::info!("Replaying {} journaled entries to viewer {}", entries.len(), viewer);
            self.server.send_replay(entries, viewer);
        }
        journal.clear_replayed_entries();
    }

    /// The TCP listener may be bound to an interface that no longer exists
    /// after a path change, so rebind it. Guarded against overlapping
    /// restarts.
    fn restart_listener(self: &Arc<Self>) {
        if self.is_restarting.swap(true, Ordering::SeqCst) {
            return;
        }
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            transport.server.stop();
            if let Some(advertiser) = transport.advertiser.lock().take() {
                advertiser.stop();
            }
            tokio::time::sleep(RESTART_DELAY).await;

            match transport.server.start(transport.config.transport.port) {
                Ok(addr) => {
                    transport.publish_advertisement(addr.port());
                    tracing::info!("Listener restarted on {}", addr);
                }
                Err(e) => tracing::error!("Listener restart failed: {}", e),
            }
            transport.is_restarting.store(false, Ordering::SeqCst);
        });
    }

    #[cfg(test)]
    pub(crate) fn server(&self) -> &Arc<WsServer> {
        &self.server
    }

    #[cfg(test)]
    pub(crate) fn journal(&self) -> Option<&Arc<Journal>> {
        self.journal.as_ref()
    }
}

fn build_handshake(config: &Config) -> Handshake {
    let device_name = if config.transport.anonymize_device_name {
        "Porby Device".to_string()
    } else {
        config.device.name.clone()
    };
    Handshake {
        protocol_version: PROTOCOL_VERSION,
        sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        device: HandshakeDevice {
            name: device_name,
            model: config.device.model.clone(),
            os_version: config.device.os_version.clone(),
        },
        app: HandshakeApp {
            name: config.app.name.clone(),
            version: config.app.version.clone(),
            identifier: config.app.identifier.clone(),
        },
        pairing_required: config.transport.requires_pairing,
        capabilities: vec![
            "logReplay".to_string(),
            "commands".to_string(),
            "performanceSnapshot".to_string(),
        ],
    }
}
