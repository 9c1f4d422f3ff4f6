//! Image sending: fragment, pace, transmit, wait for acks, retry.
//!
//! Every packet runs its own retry loop on a task drawn from a bounded
//! pool. All tasks share one rate limiter and one socket. The first packet
//! that cannot be delivered ends the transfer and aborts the rest.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot, Semaphore};
use tokio::task::JoinSet;

use messenger_core::wire::{self, FILENAME_MAX_LENGTH, USERNAME_MAX_LENGTH};
use messenger_core::{ImageDataPacket, PixelGrid, TransportError, TransportSettings, PAYLOAD_PIXELS};

use super::ack::AckRouter;
use super::reassembly::PacketKey;
use crate::qos::RateLimiter;

/// Split `grid` into one packet per PAYLOAD_PIXELS block of each row,
/// top to bottom, left to right. A row's last block is zero padded.
pub fn fragment(grid: &PixelGrid, sender: &str, filename: &str) -> Vec<ImageDataPacket> {
    let mut packets = Vec::new();
    for y in 0..grid.height() {
        for (offset, block) in grid.row(y).chunks(PAYLOAD_PIXELS).enumerate() {
            let mut pixels = Box::new([0u32; PAYLOAD_PIXELS]);
            for (word, px) in pixels.iter_mut().zip(block) {
                *word = px.pack();
            }
            packets.push(ImageDataPacket {
                sender: sender.to_string(),
                filename: filename.to_string(),
                width: grid.width() as u64,
                height: grid.height() as u64,
                row: y as u64,
                offset: offset as u64,
                pixels,
            });
        }
    }
    packets
}

/// Deliver `grid` to the image listener at `addr`.
pub async fn send_image(
    addr: &str,
    grid: &PixelGrid,
    filename: &str,
    sender: &str,
    settings: &TransportSettings,
) -> Result<(), TransportError> {
    send_image_with_shutdown(addr, grid, filename, sender, settings, None).await
}

/// As [`send_image`], but a signal on `shutdown` aborts the transfer with
/// [`TransportError::Cancelled`].
pub async fn send_image_with_shutdown(
    addr: &str,
    grid: &PixelGrid,
    filename: &str,
    sender: &str,
    settings: &TransportSettings,
    mut shutdown: Option<broadcast::Receiver<()>>,
) -> Result<(), TransportError> {
    wire::check_bounded("sender", sender, USERNAME_MAX_LENGTH).map_err(TransportError::outbound)?;
    wire::check_bounded("filename", filename, FILENAME_MAX_LENGTH)
        .map_err(TransportError::outbound)?;

    let socket = match tokio::time::timeout(settings.connect_timeout, open_socket(addr)).await {
        Ok(result) => Arc::new(result?),
        Err(_) => {
            return Err(TransportError::Timeout {
                addr: addr.to_string(),
                elapsed: settings.connect_timeout,
            })
        }
    };

    let packets = fragment(grid, sender, filename);
    let total = packets.len();
    tracing::info!(
        addr,
        filename,
        width = grid.width(),
        height = grid.height(),
        total_packets = total,
        "sending image"
    );

    // Both sets abort whatever they still hold when this function returns.
    let mut router_task = JoinSet::new();
    let (router, route) = AckRouter::new(socket.clone(), sender.to_string(), filename.to_string());
    router_task.spawn(route);

    let limiter = Arc::new(RateLimiter::new(settings.send_interval));
    let pool = Arc::new(Semaphore::new(settings.max_in_flight));
    let mut in_flight = JoinSet::new();
    let mut pending = packets.into_iter().peekable();
    let mut acked = 0usize;

    while pending.peek().is_some() || !in_flight.is_empty() {
        tokio::select! {
            biased;

            _ = cancelled(&mut shutdown) => {
                tracing::info!(addr, filename, acked, total_packets = total, "image send cancelled");
                return Err(TransportError::Cancelled);
            }

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                let result = joined.unwrap_or_else(|e| Err(TransportError::Io(std::io::Error::other(e))));
                if let Err(e) = result {
                    tracing::warn!(addr, filename, error = %e, "image send failed");
                    return Err(e);
                }
                acked += 1;
            }

            permit = pool.clone().acquire_owned(), if pending.peek().is_some() => {
                let Ok(permit) = permit else { return Err(TransportError::Cancelled) };
                let Some(packet) = pending.next() else { continue };

                let key = PacketKey { row: packet.row, offset: packet.offset };
                let datagram = Bytes::from(wire::encode_image_packet(&packet).map_err(TransportError::outbound)?);
                let delivery = PacketDelivery {
                    key,
                    datagram,
                    socket: socket.clone(),
                    limiter: limiter.clone(),
                    router: router.clone(),
                    ack_timeout: settings.ack_timeout,
                    max_attempts: settings.max_retries,
                };
                in_flight.spawn(async move {
                    let _permit = permit;
                    delivery.run().await
                });
            }
        }
    }

    tracing::info!(addr, filename, total_packets = total, "image delivered");
    Ok(())
}

async fn open_socket(addr: &str) -> Result<UdpSocket, TransportError> {
    let connection_error = |source| TransportError::Connection {
        addr: addr.to_string(),
        source,
    };

    let resolved = tokio::net::lookup_host(addr).await.map_err(connection_error)?;
    let target = pick_target(resolved).ok_or_else(|| {
        connection_error(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "address resolved to nothing",
        ))
    })?;

    let local: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await.map_err(connection_error)?;
    socket.connect(target).await.map_err(connection_error)?;
    Ok(socket)
}

/// Prefer an IPv4 address. Listeners bind the IPv4 wildcard by default
/// and `localhost` may resolve to `::1` first.
fn pick_target(resolved: impl IntoIterator<Item = SocketAddr>) -> Option<SocketAddr> {
    let mut first = None;
    for addr in resolved {
        if addr.is_ipv4() {
            return Some(addr);
        }
        first.get_or_insert(addr);
    }
    first
}

async fn cancelled(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Retry loop for one packet.
struct PacketDelivery {
    key: PacketKey,
    datagram: Bytes,
    socket: Arc<UdpSocket>,
    limiter: Arc<RateLimiter>,
    router: AckRouter,
    ack_timeout: Duration,
    max_attempts: u32,
}

impl PacketDelivery {
    async fn run(self) -> Result<(), TransportError> {
        let PacketKey { row, offset } = self.key;
        let mut ack: oneshot::Receiver<bool> = self.router.register(self.key).await?;

        for attempt in 1..=self.max_attempts {
            self.limiter.acquire().await;
            if let Err(e) = self.socket.send(&self.datagram).await {
                // Counts as a lost attempt.
                tracing::debug!(row, offset, attempt, error = %e, "packet send failed");
            } else {
                tracing::trace!(row, offset, attempt, "packet sent");
            }

            match tokio::time::timeout(self.ack_timeout, &mut ack).await {
                Ok(Ok(true)) => return Ok(()),
                Ok(Ok(false)) => return Err(TransportError::Rejected { row, offset }),
                Ok(Err(_)) => return Err(TransportError::Cancelled),
                Err(_) => tracing::debug!(row, offset, attempt, "ack timed out"),
            }
        }

        Err(TransportError::Delivery {
            row,
            offset,
            attempts: self.max_attempts,
        })
    }
}
