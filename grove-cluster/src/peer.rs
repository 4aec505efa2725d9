//! One peer connection: handshake, framed read/write loops, reconnection.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use grove_shared::{NodeConfig, NodeId};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::wire::{read_frame, write_frame, Frame, PROTOCOL_VERSION};

type HmacSha256 = Hmac<Sha256>;

/// A live, handshaken connection to one peer. Holds only the outbound
/// queue; the read side is driven entirely by its background task, which
/// forwards decoded frames to the cluster's shared inbound channel.
pub struct PeerConnection {
    pub node_id: NodeId,
    pub outbound: mpsc::UnboundedSender<Frame>,
}

fn compute_hmac(secret: &str, nonce: &[u8; 16], node_id: &NodeId) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(nonce);
    mac.update(node_id.to_string().as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn verify_hmac(secret: &str, nonce: &[u8; 16], node_id: &NodeId, given: &[u8]) -> bool {
    let expected = compute_hmac(secret, nonce, node_id);
    expected.ct_eq(given).into()
}

fn random_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    for byte in nonce.iter_mut() {
        *byte = fastrand::u8(..);
    }
    nonce
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("io error during handshake: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected frame during handshake")]
    UnexpectedFrame,
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u16, remote: u16 },
    #[error("hmac verification failed")]
    BadHmac,
    #[error("peer announced a node id already connected: {0}")]
    DuplicateNode(NodeId),
}

/// Run both sides of the handshake over an already-connected stream. The
/// dialer sends first; the acceptor replies.
pub async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    config: &NodeConfig,
    local_id: &NodeId,
    is_dialer: bool,
) -> Result<NodeId, HandshakeError> {
    let my_nonce = random_nonce();
    let my_hmac = config
        .cluster_secret
        .as_deref()
        .map(|secret| compute_hmac(secret, &my_nonce, local_id))
        .unwrap_or_default();
    let my_frame = Frame::Handshake {
        protocol_version: PROTOCOL_VERSION,
        node_id: local_id.clone(),
        nonce: my_nonce,
        hmac: my_hmac,
    };

    let their_frame = if is_dialer {
        write_frame(stream, &my_frame).await?;
        read_frame(stream).await?
    } else {
        let incoming = read_frame(stream).await?;
        write_frame(stream, &my_frame).await?;
        incoming
    };

    match their_frame {
        Frame::Handshake {
            protocol_version,
            node_id,
            nonce,
            hmac,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(HandshakeError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: protocol_version,
                });
            }
            if let Some(secret) = config.cluster_secret.as_deref() {
                if !verify_hmac(secret, &nonce, &node_id, &hmac) {
                    return Err(HandshakeError::BadHmac);
                }
            }
            Ok(node_id)
        }
        _ => Err(HandshakeError::UnexpectedFrame),
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Spawn the read and write loops for an established connection. Decoded
/// frames are forwarded to `inbound`; the returned `PeerConnection` is how
/// the rest of the cluster sends frames to this peer.
pub fn spawn_peer_tasks(
    node_id: NodeId,
    stream: TcpStream,
    inbound: mpsc::UnboundedSender<(NodeId, Frame)>,
    on_disconnect: mpsc::UnboundedSender<NodeId>,
) -> PeerConnection {
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_write_loop(write_half, outbound_rx));
    tokio::spawn(run_read_loop(
        read_half,
        node_id.clone(),
        inbound,
        on_disconnect,
    ));

    PeerConnection {
        node_id,
        outbound: outbound_tx,
    }
}

async fn run_write_loop(
    mut write_half: WriteHalf<TcpStream>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        if write_frame(&mut write_half, &frame).await.is_err() {
            break;
        }
    }
}

async fn run_read_loop(
    mut read_half: ReadHalf<TcpStream>,
    node_id: NodeId,
    inbound: mpsc::UnboundedSender<(NodeId, Frame)>,
    on_disconnect: mpsc::UnboundedSender<NodeId>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(frame) => {
                if inbound.send((node_id.clone(), frame)).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    let _ = on_disconnect.send(node_id);
}

/// Connect to `addr`, perform the handshake, and spawn its peer tasks.
pub async fn dial(
    node_id: NodeId,
    local_id: &NodeId,
    config: Arc<NodeConfig>,
    inbound: mpsc::UnboundedSender<(NodeId, Frame)>,
    on_disconnect: mpsc::UnboundedSender<NodeId>,
) -> Result<PeerConnection, HandshakeError> {
    let addr = format!("{}:{}", node_id.host(), node_id.port());
    let mut stream = TcpStream::connect(&addr).await?;
    let confirmed_id = handshake(&mut stream, &config, local_id, true).await?;
    Ok(spawn_peer_tasks(confirmed_id, stream, inbound, on_disconnect))
}
