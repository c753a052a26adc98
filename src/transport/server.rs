// WebSocket server — accept, per-connection sessions, auth gating,
// broadcast, replay

use super::pairing::{PairingManager, PairingOutcome};
use super::protocol::{self, Command, Handshake, WireMessage};
use super::TransportError;
use crate::model::LogEntry;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;
use warp::ws::WebSocket;
use warp::Filter;

/// Coarse connection status surfaced to the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No viewer connected; entries journal.
    Waiting,
    /// Viewers connected, none authenticated yet.
    ViewerConnected(usize),
    /// At least one viewer authenticated.
    ViewerAuthenticated(usize),
}

pub type CommandHandler = Arc<dyn Fn(Command) + Send + Sync>;
pub type AuthenticatedHandler = Arc<dyn Fn(Uuid) + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

struct Session {
    outbound: mpsc::UnboundedSender<WireMessage>,
}

/// One listener plus per-connection session state.
///
/// Sessions move `pending → ready → (authenticated | closed)`: the
/// handshake is pushed the moment the socket is up, authentication is
/// granted by the pairing manager (or immediately when pairing is off),
/// and only authenticated sessions ever see log traffic.
pub struct WsServer {
    max_connections: usize,
    heartbeat_interval: Duration,
    pairing: Option<Arc<PairingManager>>,
    handshake: Handshake,
    sessions: RwLock<HashMap<Uuid, Session>>,
    authenticated: RwLock<HashSet<Uuid>>,
    on_command: RwLock<Option<CommandHandler>>,
    on_authenticated: RwLock<Option<AuthenticatedHandler>>,
    on_state: RwLock<Option<StateHandler>>,
    closing: Mutex<Option<watch::Sender<bool>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl WsServer {
    pub fn new(
        max_connections: usize,
        heartbeat_interval: Duration,
        pairing: Option<Arc<PairingManager>>,
        handshake: Handshake,
    ) -> Arc<Self> {
        Arc::new(WsServer {
            max_connections,
            heartbeat_interval,
            pairing,
            handshake,
            sessions: RwLock::new(HashMap::new()),
            authenticated: RwLock::new(HashSet::new()),
            on_command: RwLock::new(None),
            on_authenticated: RwLock::new(None),
            on_state: RwLock::new(None),
            closing: Mutex::new(None),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            local_addr: RwLock::new(None),
        })
    }

    pub fn set_command_handler(&self, handler: CommandHandler) {
        *self.on_command.write() = Some(handler);
    }

    pub fn set_authenticated_handler(&self, handler: AuthenticatedHandler) {
        *self.on_authenticated.write() = Some(handler);
    }

    pub fn set_state_handler(&self, handler: StateHandler) {
        *self.on_state.write() = Some(handler);
    }

    /// Bind the listener (port 0 = ephemeral) and start accepting. Must run
    /// inside the SDK runtime.
    pub fn start(self: &Arc<Self>, port: u16) -> Result<SocketAddr, TransportError> {
        let server = Arc::clone(self);
        let route = warp::path::end().and(warp::ws()).map(move |ws: warp::ws::Ws| {
            let server = Arc::clone(&server);
            ws.on_upgrade(move |socket| server.run_socket(socket))
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (addr, listener) = warp::serve(route)
            .try_bind_with_graceful_shutdown(
                SocketAddr::from(([0, 0, 0, 0], port)),
                async move {
                    let _ = shutdown_rx.await;
                },
            )
            .map_err(|e| {
                tracing::error!("Listener bind failed on port {}: {}", port, e);
                TransportError::InvalidPort(port)
            })?;

        let (closing_tx, _) = watch::channel(false);
        *self.closing.lock() = Some(closing_tx);
        *self.shutdown.lock() = Some(shutdown_tx);
        *self.local_addr.write() = Some(addr);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(listener));
        tasks.push(self.spawn_heartbeat());

        tracing::info!("WebSocket server listening on {}", addr);
        Ok(addr)
    }

    fn spawn_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let server = Arc::clone(self);
        let period = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                server.broadcast_all(WireMessage::Ping);
            }
        })
    }

    /// Stop accepting, close every connection, forget all session state.
    pub fn stop(&self) {
        if let Some(closing) = self.closing.lock().take() {
            let _ = closing.send(true);
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.sessions.write().clear();
        self.authenticated.write().clear();
        *self.local_addr.write() = None;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    pub fn has_authenticated_viewers(&self) -> bool {
        match self.pairing {
            None => !self.sessions.read().is_empty(),
            Some(_) => !self.authenticated.read().is_empty(),
        }
    }

    /// Deliver a drained batch to every authorized session.
    pub fn send(&self, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        let message = if entries.len() == 1 {
            let mut entries = entries;
            WireMessage::Log(Box::new(entries.remove(0)))
        } else {
            WireMessage::LogBatch(entries)
        };

        let sessions = self.sessions.read();
        let authenticated = self.authenticated.read();
        for (id, session) in sessions.iter() {
            if self.pairing.is_none() || authenticated.contains(id) {
                let _ = session.outbound.send(message.clone());
            }
        }
    }

    /// Replayed journal contents go to exactly one freshly authenticated
    /// session, before any live traffic it will observe.
    pub fn send_replay(&self, entries: Vec<LogEntry>, target: Uuid) {
        if entries.is_empty() {
            return;
        }
        let sessions = self.sessions.read();
        if let Some(session) = sessions.get(&target) {
            let _ = session.outbound.send(WireMessage::LogReplay(entries));
        }
    }

    fn broadcast_all(&self, message: WireMessage) {
        let sessions = self.sessions.read();
        for session in sessions.values() {
            let _ = session.outbound.send(message.clone());
        }
    }

    fn send_to(&self, target: &Uuid, message: WireMessage) {
        let sessions = self.sessions.read();
        if let Some(session) = sessions.get(target) {
            let _ = session.outbound.send(message);
        }
    }

    async fn run_socket(self: Arc<Self>, socket: WebSocket) {
        if self.sessions.read().len() >= self.max_connections {
            tracing::warn!("Connection limit reached; rejecting viewer");
            return;
        }

        let id = Uuid::new_v4();
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();

        self.sessions.write().insert(
            id,
            Session {
                outbound: out_tx.clone(),
            },
        );
        self.emit_state();
        tracing::debug!("Viewer {} connected", id);

        // Outbound pump: session queue -> binary frames.
        let pump = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let Ok(bytes) = protocol::encode(&message) else {
                    continue;
                };
                if ws_tx.send(warp::ws::Message::binary(bytes)).await.is_err() {
                    break;
                }
            }
        });

        // Ready: the handshake goes out before anything else.
        let _ = out_tx.send(WireMessage::Handshake(self.handshake.clone()));

        let mut closing = match self.closing.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                // Server already stopping.
                pump.abort();
                self.remove_session(&id);
                return;
            }
        };

        loop {
            let frame = tokio::select! {
                frame = ws_rx.next() => frame,
                _ = closing.changed() => break,
            };
            let Some(result) = frame else { break };
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!("Viewer {} receive error: {}", id, e);
                    break;
                }
            };
            if message.is_close() {
                break;
            }
            if !(message.is_binary() || message.is_text()) {
                continue;
            }
            match protocol::decode(message.as_bytes()) {
                Ok(wire) => self.handle_inbound(id, wire),
                Err(e) => {
                    // Unknown type or malformed frame: this connection is
                    // done, the others stay.
                    tracing::warn!("Viewer {} protocol error: {}; closing", id, e);
                    break;
                }
            }
        }

        pump.abort();
        self.remove_session(&id);
        tracing::debug!("Viewer {} disconnected", id);
    }

    pub(crate) fn handle_inbound(&self, from: Uuid, message: WireMessage) {
        match message {
            WireMessage::Ping => self.broadcast_all(WireMessage::Pong),
            WireMessage::Command(command) => {
                let allowed =
                    self.pairing.is_none() || self.authenticated.read().contains(&from);
                if !allowed {
                    tracing::debug!("Dropping command from unauthenticated viewer {}", from);
                    return;
                }
                let handler = self.on_command.read().clone();
                if let Some(handler) = handler {
                    handler(command);
                }
            }
            WireMessage::PairingRequest { code } => self.handle_pairing_request(from, &code),
            // Viewer-bound traffic; the server side ignores these.
            WireMessage::Handshake(_)
            | WireMessage::PairingResponse { .. }
            | WireMessage::Log(_)
            | WireMessage::LogBatch(_)
            | WireMessage::LogReplay(_)
            | WireMessage::Pong => {}
        }
    }

    fn handle_pairing_request(&self, from: Uuid, code: &str) {
        let outcome = match &self.pairing {
            None => PairingOutcome::Accepted,
            Some(manager) => manager.validate(code),
        };

        match outcome {
            PairingOutcome::Accepted => {
                self.authenticated.write().insert(from);
                self.send_to(
                    &from,
                    WireMessage::PairingResponse {
                        accepted: true,
                        reason: None,
                    },
                );
                self.emit_state();
                let handler = self.on_authenticated.read().clone();
                if let Some(handler) = handler {
                    handler(from);
                }
            }
            PairingOutcome::Rejected(reason) => {
                tracing::info!("Pairing rejected for viewer {}: {}", from, reason);
                self.send_to(
                    &from,
                    WireMessage::PairingResponse {
                        accepted: false,
                        reason: Some(reason),
                    },
                );
            }
        }
    }

    fn remove_session(&self, id: &Uuid) {
        self.sessions.write().remove(id);
        self.authenticated.write().remove(id);
        self.emit_state();
    }

    fn emit_state(&self) {
        let connected = self.sessions.read().len();
        let authenticated = self.authenticated.read().len();
        let state = if connected == 0 {
            ConnectionState::Waiting
        } else if authenticated > 0 {
            ConnectionState::ViewerAuthenticated(authenticated)
        } else {
            ConnectionState::ViewerConnected(connected)
        };
        let handler = self.on_state.read().clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_test_session(&self, id: Uuid) -> mpsc::UnboundedReceiver<WireMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.write().insert(id, Session { outbound: tx });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, LogLevel};
    use crate::transport::protocol::{Handshake, HandshakeApp, HandshakeDevice};

    fn handshake() -> Handshake {
        Handshake {
            protocol_version: protocol::PROTOCOL_VERSION,
            sdk_version: "0.1.0".into(),
            device: HandshakeDevice::default(),
            app: HandshakeApp::default(),
            pairing_required: true,
            capabilities: vec![],
        }
    }

    fn paired_server() -> Arc<WsServer> {
        let manager = Arc::new(PairingManager::new(
            Some("123456".to_string()),
            3,
            Duration::from_secs(30),
        ));
        WsServer::new(4, Duration::from_secs(15), Some(manager), handshake())
    }

    fn open_server() -> Arc<WsServer> {
        WsServer::new(4, Duration::from_secs(15), None, handshake())
    }

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, Category::APP, message)
    }

    #[test]
    fn test_pairing_happy_path_then_log_delivery() {
        let server = paired_server();
        let id = Uuid::new_v4();
        let mut rx = server.insert_test_session(id);

        // A wrong code first: rejected with the remaining-attempts reason.
        server.handle_inbound(
            id,
            WireMessage::PairingRequest {
                code: "000000".into(),
            },
        );
        match rx.try_recv() {
            Ok(WireMessage::PairingResponse {
                accepted: false,
                reason: Some(reason),
            }) => assert_eq!(reason, "Invalid code. 2 attempts remaining"),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(!server.has_authenticated_viewers());

        server.handle_inbound(
            id,
            WireMessage::PairingRequest {
                code: "123456".into(),
            },
        );
        assert!(matches!(
            rx.try_recv(),
            Ok(WireMessage::PairingResponse {
                accepted: true,
                reason: None
            })
        ));
        assert!(server.has_authenticated_viewers());

        server.send(vec![entry("hello")]);
        match rx.try_recv() {
            Ok(WireMessage::Log(e)) => assert_eq!(e.message, "hello"),
            other => panic!("expected log delivery, got {:?}", other),
        }
    }

    #[test]
    fn test_unauthenticated_viewer_receives_no_log_traffic() {
        let server = paired_server();
        let auth_id = Uuid::new_v4();
        let other_id = Uuid::new_v4();
        let mut auth_rx = server.insert_test_session(auth_id);
        let mut other_rx = server.insert_test_session(other_id);

        server.handle_inbound(
            auth_id,
            WireMessage::PairingRequest {
                code: "123456".into(),
            },
        );
        let _ = auth_rx.try_recv(); // pairing response

        server.send(vec![entry("a"), entry("b")]);
        assert!(matches!(auth_rx.try_recv(), Ok(WireMessage::LogBatch(_))));
        assert!(other_rx.try_recv().is_err(), "unauthenticated viewer got traffic");
    }

    #[test]
    fn test_no_pairing_accepts_any_code_and_counts_connections() {
        let server = open_server();
        let id = Uuid::new_v4();
        let mut rx = server.insert_test_session(id);

        // With pairing off, a mere connection already counts as a viewer
        // and any code authenticates.
        assert!(server.has_authenticated_viewers());
        server.handle_inbound(
            id,
            WireMessage::PairingRequest {
                code: "anything".into(),
            },
        );
        assert!(matches!(
            rx.try_recv(),
            Ok(WireMessage::PairingResponse { accepted: true, .. })
        ));
    }

    #[test]
    fn test_ping_broadcasts_pong_to_everyone() {
        let server = paired_server();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = server.insert_test_session(a);
        let mut rx_b = server.insert_test_session(b);

        server.handle_inbound(a, WireMessage::Ping);
        assert!(matches!(rx_a.try_recv(), Ok(WireMessage::Pong)));
        assert!(matches!(rx_b.try_recv(), Ok(WireMessage::Pong)));
    }

    #[test]
    fn test_command_gated_on_authentication() {
        let server = paired_server();
        let id = Uuid::new_v4();
        let mut rx = server.insert_test_session(id);

        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        server.set_command_handler(Arc::new(move |command| {
            received_clone.lock().push(command);
        }));

        server.handle_inbound(id, WireMessage::Command(Command::ClearLogs));
        assert!(received.lock().is_empty(), "unauthenticated command leaked");

        server.handle_inbound(
            id,
            WireMessage::PairingRequest {
                code: "123456".into(),
            },
        );
        let _ = rx.try_recv();
        server.handle_inbound(id, WireMessage::Command(Command::ClearLogs));
        assert_eq!(received.lock().as_slice(), &[Command::ClearLogs]);
    }

    #[test]
    fn test_replay_targets_one_session() {
        let server = paired_server();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = server.insert_test_session(a);
        let mut rx_b = server.insert_test_session(b);

        server.send_replay(vec![entry("old")], a);
        assert!(matches!(rx_a.try_recv(), Ok(WireMessage::LogReplay(_))));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_waiting_state_emitted_when_last_viewer_leaves() {
        let server = paired_server();
        let states = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let states_clone = states.clone();
        server.set_state_handler(Arc::new(move |state| {
            states_clone.lock().push(state);
        }));

        let id = Uuid::new_v4();
        let _rx = server.insert_test_session(id);
        server.remove_session(&id);

        // Removal also scrubbed the authenticated set.
        assert!(server.authenticated.read().is_empty());
        assert_eq!(states.lock().last(), Some(&ConnectionState::Waiting));
    }
}
