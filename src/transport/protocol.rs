// Wire protocol — tagged messages and their JSON codec

use crate::model::{LogEntry, LogLevel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bumped only for breaking wire changes; also advertised in the mDNS TXT
/// record.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum accepted inbound frame: viewers send control traffic only, so
/// anything bigger is a broken or hostile peer.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Frame too large: {0} bytes (max {MAX_INBOUND_FRAME})")]
    FrameTooLarge(usize),
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Device identity presented to the viewer in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeDevice {
    pub name: String,
    pub model: String,
    pub os_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeApp {
    pub name: String,
    pub version: String,
    pub identifier: String,
}

/// First message the server pushes on every fresh connection, before any
/// authentication gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub protocol_version: u32,
    pub sdk_version: String,
    pub device: HandshakeDevice,
    pub app: HandshakeApp,
    pub pairing_required: bool,
    pub capabilities: Vec<String>,
}

/// Runtime commands a viewer may issue after authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    SetLogLevel {
        level: LogLevel,
    },
    SetCategoryLevel {
        category: String,
        level: LogLevel,
    },
    SetEnabled {
        enabled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    ClearLogs,
    RequestPerformanceSnapshot,
}

/// Every frame on the wire is exactly one of these, encoded as a tagged
/// JSON object with `type` and, where applicable, `payload`.
///
/// Unknown `type` values are a hard decode error (the connection is
/// cancelled); unknown fields inside a known type are ignored for forward
/// compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WireMessage {
    Handshake(Handshake),
    Log(Box<LogEntry>),
    LogBatch(Vec<LogEntry>),
    LogReplay(Vec<LogEntry>),
    Ping,
    Pong,
    Command(Command),
    PairingRequest {
        code: String,
    },
    PairingResponse {
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

pub fn encode(message: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode(bytes: &[u8]) -> Result<WireMessage, ProtocolError> {
    if bytes.len() > MAX_INBOUND_FRAME {
        return Err(ProtocolError::FrameTooLarge(bytes.len()));
    }
    Ok(serde_json::from_slice(bytes)?)
}
