//! Wire protocol: the frames exchanged between cluster peers.
//!
//! Frames are length-prefixed: a 4-byte big-endian payload length, then the
//! payload. The payload serialization is `serde_json`, so every frame
//! variant round-trips through the same codec regardless of payload shape.

use std::io;

use grove_shared::{CorrelationId, ExitReason, MonitorId, NodeId, ServerId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Guards against a corrupt or hostile length prefix turning one frame into
/// an unbounded allocation.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnOptions {
    pub name: Option<String>,
    pub registration: Option<RegistrationKind>,
    pub init_args: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationKind {
    Local,
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntryWire {
    pub name: String,
    pub server_id: ServerId,
    pub node: NodeId,
    pub registered_at_ms: u64,
    pub priority: u32,
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Handshake {
        protocol_version: u16,
        node_id: NodeId,
        nonce: [u8; 16],
        hmac: Vec<u8>,
    },
    /// Sent once, immediately after a successful handshake: the known-peer
    /// gossip exchange.
    PeerList {
        peers: Vec<NodeId>,
    },
    Heartbeat {
        node_id: NodeId,
        epoch_ms: u64,
    },
    Call {
        correlation: CorrelationId,
        target: ServerId,
        payload: serde_json::Value,
    },
    CallReply {
        correlation: CorrelationId,
        result: Result<serde_json::Value, String>,
    },
    Cast {
        target: ServerId,
        payload: serde_json::Value,
    },
    Spawn {
        correlation: CorrelationId,
        behavior_name: String,
        options: SpawnOptions,
    },
    SpawnReply {
        correlation: CorrelationId,
        result: Result<ServerId, String>,
    },
    MonitorInstall {
        correlation: CorrelationId,
        watcher: ServerId,
        target: ServerId,
    },
    MonitorReply {
        correlation: CorrelationId,
        monitor: MonitorId,
    },
    ProcessDown {
        monitor: MonitorId,
        reason: ExitReason,
    },
    Demonitor {
        monitor: MonitorId,
    },
    RegistrySync {
        entries: Vec<GlobalEntryWire>,
        full_sync: bool,
    },
    RegistryUnregister {
        name: String,
    },
}

pub const PROTOCOL_VERSION: u16 = 1;

pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> io::Result<()> {
    let payload = serde_json::to_vec(frame)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() as u64 > MAX_FRAME_BYTES as u64 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> io::Result<Frame> {
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    serde_json::from_slice(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
