//! Image receiving: read datagrams, decode off the read path, hand
//! packets to the single dispatcher that owns reassembly state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;

use messenger_core::wire;
use messenger_core::{ImageAckPacket, ImageDataPacket, TransportError, TransportSettings};

use super::reassembly::{Accepted, ReceivedImage, Reassembler};

/// Largest datagram the listener will read.
const DATAGRAM_BUFFER: usize = 64 * 1024;

/// Decoded packets waiting for the dispatcher.
const INBOUND_QUEUE: usize = 1024;

pub struct ImageListener {
    socket: Arc<UdpSocket>,
    assembly_timeout: Duration,
}

impl ImageListener {
    pub async fn bind(addr: &str, settings: &TransportSettings) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            socket: Arc::new(socket),
            assembly_timeout: settings.assembly_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until shutdown, pushing completed images to `out`.
    /// Transfers still incomplete at shutdown are discarded.
    pub async fn run(
        self,
        out: mpsc::Sender<ReceivedImage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TransportError> {
        tracing::info!(addr = ?self.local_addr().ok(), "image listener started");

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let dispatcher = Dispatcher {
            socket: self.socket.clone(),
            reassembler: Reassembler::new(self.assembly_timeout),
            inbound: inbound_rx,
            out,
            sweep_every: sweep_interval(self.assembly_timeout),
        };

        // Dropped on return: aborts the dispatcher and any pending decode.
        let mut dispatch_task = JoinSet::new();
        dispatch_task.spawn(dispatcher.run());
        let mut decoders = JoinSet::new();

        let mut buf = vec![0u8; DATAGRAM_BUFFER];
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("image listener shutting down");
                    return Ok(());
                }

                Some(_) = decoders.join_next(), if !decoders.is_empty() => {}

                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "image socket read failed");
                            continue;
                        }
                    };
                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    let inbound = inbound_tx.clone();
                    decoders.spawn(async move {
                        match wire::decode_image_packet(&datagram) {
                            Ok(packet) => {
                                let _ = inbound.send((packet, from)).await;
                            }
                            Err(e) => {
                                tracing::debug!(%from, len = datagram.len(), error = %e, "dropping malformed datagram");
                            }
                        }
                    });
                }
            }
        }
    }
}

/// Eviction sweeps run a few times per timeout window.
fn sweep_interval(assembly_timeout: Duration) -> Duration {
    (assembly_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(30))
}

struct Dispatcher {
    socket: Arc<UdpSocket>,
    reassembler: Reassembler,
    inbound: mpsc::Receiver<(ImageDataPacket, SocketAddr)>,
    out: mpsc::Sender<ReceivedImage>,
    sweep_every: Duration,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_every);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = self.inbound.recv() => {
                    let Some((packet, from)) = msg else { return };
                    self.handle(packet, from).await;
                }

                _ = sweep.tick() => {
                    for key in self.reassembler.evict_idle(Instant::now()) {
                        tracing::warn!(sender = %key.sender, filename = %key.filename, "dropping idle image transfer");
                    }
                }
            }
        }
    }

    async fn handle(&mut self, packet: ImageDataPacket, from: SocketAddr) {
        let mut ack = ImageAckPacket::acknowledging(&packet, true);
        let (row, offset) = (packet.row, packet.offset);

        let outcome = self.reassembler.accept(packet, Instant::now());
        ack.ok = outcome.ack_ok();
        match &outcome {
            Accepted::Stored { received, expected } => {
                tracing::trace!(%from, row, offset, received, expected, "fragment stored");
            }
            Accepted::Duplicate => {
                tracing::debug!(%from, row, offset, "duplicate fragment");
            }
            Accepted::Completed(img) => {
                tracing::info!(
                    sender = %img.sender,
                    filename = %img.filename,
                    width = img.grid.width(),
                    height = img.grid.height(),
                    "image received"
                );
            }
            Accepted::Rejected(reason) => {
                tracing::warn!(%from, sender = %ack.sender, filename = %ack.filename, row, offset, %reason, "rejecting fragment");
            }
        }

        match wire::encode_ack(&ack) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, from).await {
                    tracing::debug!(%from, error = %e, "ack send failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not encode ack"),
        }

        if let Accepted::Completed(img) = outcome {
            if self.out.send(img).await.is_err() {
                tracing::debug!("image output closed, discarding image");
            }
        }
    }
}
