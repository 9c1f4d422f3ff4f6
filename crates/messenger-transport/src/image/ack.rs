//! Ack router: the one owner of a transfer's ack-wait state.
//!
//! Packet tasks register their (row, offset) and get a oneshot back. The
//! router reads every datagram arriving on the transfer's socket and
//! completes the matching oneshot with the ack's flag. Acks for another
//! transfer, for unregistered keys, or repeated acks are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use messenger_core::wire;
use messenger_core::TransportError;

use super::reassembly::PacketKey;

struct Register {
    key: PacketKey,
    reply: oneshot::Sender<bool>,
}

/// Handle used by packet tasks. Cheap to clone.
#[derive(Clone)]
pub(crate) struct AckRouter {
    commands: mpsc::Sender<Register>,
}

impl AckRouter {
    /// Create the handle and the routing loop. The loop ends once every
    /// handle is dropped.
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        sender: String,
        filename: String,
    ) -> (Self, impl std::future::Future<Output = ()>) {
        let (commands, rx) = mpsc::channel(64);
        (Self { commands }, route(socket, sender, filename, rx))
    }

    /// Start waiting for the ack of `key`. Must be called before the first
    /// send of that packet.
    pub(crate) async fn register(
        &self,
        key: PacketKey,
    ) -> Result<oneshot::Receiver<bool>, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Register { key, reply })
            .await
            .map_err(|_| TransportError::Cancelled)?;
        Ok(rx)
    }
}

async fn route(
    socket: Arc<UdpSocket>,
    sender: String,
    filename: String,
    mut commands: mpsc::Receiver<Register>,
) {
    let mut waiting: HashMap<PacketKey, oneshot::Sender<bool>> = HashMap::new();
    let mut buf = vec![0u8; 2048];

    loop {
        tokio::select! {
            // Registrations are queued before their packet is sent, so
            // draining them first means an ack never beats its waiter.
            biased;

            cmd = commands.recv() => match cmd {
                Some(Register { key, reply }) => {
                    waiting.insert(key, reply);
                }
                None => return,
            },

            received = socket.recv(&mut buf) => {
                let len = match received {
                    Ok(len) => len,
                    Err(e) => {
                        // Connected UDP surfaces ICMP unreachable here.
                        tracing::debug!(error = %e, "ack socket error");
                        continue;
                    }
                };
                let ack = match wire::decode_ack(&buf[..len]) {
                    Ok(ack) => ack,
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring malformed ack");
                        continue;
                    }
                };
                if ack.sender != sender || ack.filename != filename {
                    tracing::trace!(sender = %ack.sender, filename = %ack.filename, "ack for another transfer");
                    continue;
                }
                let key = PacketKey { row: ack.row, offset: ack.offset };
                match waiting.remove(&key) {
                    Some(reply) => {
                        tracing::trace!(row = ack.row, offset = ack.offset, ok = ack.ok, "ack");
                        let _ = reply.send(ack.ok);
                    }
                    None => tracing::trace!(row = ack.row, offset = ack.offset, "unexpected ack"),
                }
            }
        }
    }
}
