//! Messenger integration test harness.
//!
//! Every test runs real peers over loopback sockets bound to port 0, so
//! tests are independent and need no setup:
//!
//!   cargo test --test integration
//!
//! Each test owns the listeners it starts and stops them through their
//! shutdown channel (or by dropping them).

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use messenger_core::{PixelGrid, Rgba, TransportSettings};
use messenger_transport::{Listening, Transport};

mod image;
mod listen;
mod text;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Short timeouts and no pacing so failure paths finish quickly.
pub fn fast_settings() -> TransportSettings {
    TransportSettings {
        connect_timeout: Duration::from_secs(1),
        io_timeout: Duration::from_secs(1),
        ack_timeout: Duration::from_millis(300),
        send_interval: Duration::from_millis(1),
        max_retries: 3,
        max_in_flight: 4,
        assembly_timeout: Duration::from_secs(10),
        queue_capacity: 16,
    }
}

/// A running peer on loopback.
pub struct Peer {
    pub transport: Transport,
    pub listening: Listening,
    pub shutdown: broadcast::Sender<()>,
}

impl Peer {
    pub async fn start(settings: TransportSettings) -> Peer {
        let (shutdown, _) = broadcast::channel(1);
        let transport = Transport::new(settings);
        let listening = transport
            .listen("127.0.0.1:0", "127.0.0.1:0", &shutdown)
            .await
            .expect("listeners should bind on loopback");
        Peer {
            transport,
            listening,
            shutdown,
        }
    }

    pub fn tcp_addr(&self) -> String {
        self.listening.tcp_addr().to_string()
    }

    pub fn udp_addr(&self) -> String {
        self.listening.udp_addr().to_string()
    }
}

/// Every pixel distinct enough that misplaced blocks show up.
pub fn test_grid(width: usize, height: usize) -> PixelGrid {
    PixelGrid::from_fn(width, height, |x, y| {
        Rgba::new(x as u8, y as u8, (x >> 8) as u8 ^ (y * 31) as u8, 0xff)
    })
    .expect("test grid dimensions are valid")
}

/// Receive from `rx`, failing the test after `secs` seconds.
pub async fn recv_within<T>(rx: &mut mpsc::Receiver<T>, secs: u64) -> T {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("timed out waiting for output")
        .expect("output queue closed")
}

/// A bound UDP socket that never answers.
pub async fn black_hole() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

/// Read datagrams until the socket stays quiet for `quiet`.
pub async fn drain(socket: &UdpSocket, quiet: Duration) -> Vec<Vec<u8>> {
    let mut seen = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    while let Ok(Ok(len)) = tokio::time::timeout(quiet, socket.recv(&mut buf)).await {
        seen.push(buf[..len].to_vec());
    }
    seen
}
