use crate::*;

use std::collections::HashSet;

use anyhow::Result;
use messenger_core::wire::{self, ImageAckPacket};
use messenger_core::TransportError;

/// A single-packet 10x1 image arrives pixel-identical.
#[tokio::test]
async fn test_image_single_packet() -> Result<()> {
    let mut receiver = Peer::start(fast_settings()).await;
    let grid = test_grid(10, 1);

    Transport::new(fast_settings())
        .send_image(&receiver.udp_addr(), &grid, "tiny.png", "alice")
        .await?;

    let img = recv_within(&mut receiver.listening.image_rx, 5).await;
    assert_eq!(img.grid, grid);
    assert_eq!(img.filename, "tiny.png");
    assert_eq!(img.sender, "alice");
    Ok(())
}

/// Rows wider than one block, with a partial last block, reassemble
/// exactly even though packets race each other through the pool.
#[tokio::test]
async fn test_image_multi_row_partial_width() -> Result<()> {
    let mut receiver = Peer::start(fast_settings()).await;
    let grid = test_grid(600, 7);

    let settings = TransportSettings {
        max_in_flight: 16,
        ..fast_settings()
    };
    Transport::new(settings)
        .send_image(&receiver.udp_addr(), &grid, "wide.png", "alice")
        .await?;

    let img = recv_within(&mut receiver.listening.image_rx, 10).await;
    assert_eq!(img.grid, grid);
    Ok(())
}

/// Transfers from different senders with the same filename stay apart.
#[tokio::test]
async fn test_image_parallel_transfers_are_independent() -> Result<()> {
    let mut receiver = Peer::start(fast_settings()).await;
    let addr = receiver.udp_addr();
    let from_alice = test_grid(300, 2);
    let from_bob = PixelGrid::from_fn(300, 2, |x, _| Rgba::new(0, 0, x as u8, 1))?;

    let transport = Transport::new(fast_settings());
    let (a, b) = tokio::join!(
        transport.send_image(&addr, &from_alice, "same.png", "alice"),
        transport.send_image(&addr, &from_bob, "same.png", "bob"),
    );
    a?;
    b?;

    let mut got = vec![
        recv_within(&mut receiver.listening.image_rx, 5).await,
        recv_within(&mut receiver.listening.image_rx, 5).await,
    ];
    got.sort_by(|x, y| x.sender.cmp(&y.sender));
    assert_eq!(got[0].sender, "alice");
    assert_eq!(got[0].grid, from_alice);
    assert_eq!(got[1].sender, "bob");
    assert_eq!(got[1].grid, from_bob);
    Ok(())
}

/// Two senders pushing the same transfer concurrently: overlapping
/// packets are acknowledged to both, and the image that comes out is the
/// original.
#[tokio::test]
async fn test_image_concurrent_duplicate_senders() -> Result<()> {
    let mut receiver = Peer::start(fast_settings()).await;
    let addr = receiver.udp_addr();
    let grid = test_grid(520, 4);

    let first = Transport::new(fast_settings());
    let second = Transport::new(fast_settings());
    let (a, b) = tokio::join!(
        first.send_image(&addr, &grid, "dup.png", "alice"),
        second.send_image(&addr, &grid, "dup.png", "alice"),
    );
    a?;
    b?;

    let img = recv_within(&mut receiver.listening.image_rx, 5).await;
    assert_eq!(img.grid, grid);
    assert_no_more_images(&mut receiver).await;
    Ok(())
}

/// The same single-packet image from two senders, and then once more
/// after it completed, is delivered exactly once.
#[tokio::test]
async fn test_image_repeated_single_packet_delivered_once() -> Result<()> {
    let mut receiver = Peer::start(fast_settings()).await;
    let addr = receiver.udp_addr();
    let grid = test_grid(10, 1);

    let first = Transport::new(fast_settings());
    let second = Transport::new(fast_settings());
    let (a, b) = tokio::join!(
        first.send_image(&addr, &grid, "once.png", "alice"),
        second.send_image(&addr, &grid, "once.png", "alice"),
    );
    a?;
    b?;
    let img = recv_within(&mut receiver.listening.image_rx, 5).await;
    assert_eq!(img.grid, grid);

    // A retransmit after completion is still acknowledged.
    first.send_image(&addr, &grid, "once.png", "alice").await?;
    assert_no_more_images(&mut receiver).await;
    Ok(())
}

/// A peer advertised as `localhost` is reachable over UDP while its
/// listener is bound on the IPv4 wildcard.
#[tokio::test]
async fn test_image_to_localhost_reaches_ipv4_wildcard() -> Result<()> {
    let (shutdown, _) = broadcast::channel(1);
    let transport = Transport::new(fast_settings());
    let mut listening = transport.listen("0.0.0.0:0", "0.0.0.0:0", &shutdown).await?;
    let target = format!("localhost:{}", listening.udp_addr().port());
    let grid = test_grid(300, 2);

    transport.send_image(&target, &grid, "local.png", "alice").await?;

    let img = recv_within(&mut listening.image_rx, 5).await;
    assert_eq!(img.grid, grid);
    Ok(())
}

async fn assert_no_more_images(receiver: &mut Peer) {
    let extra = tokio::time::timeout(Duration::from_millis(500), receiver.listening.image_rx.recv()).await;
    assert!(extra.is_err(), "image delivered more than once");
}

/// With no receiver answering, the packet is sent exactly max_retries
/// times and the transfer fails naming it.
#[tokio::test]
async fn test_image_retry_exhaustion() {
    let (hole, addr) = black_hole().await;
    let settings = TransportSettings {
        ack_timeout: Duration::from_millis(50),
        ..fast_settings()
    };

    let err = Transport::new(settings)
        .send_image(&addr.to_string(), &test_grid(10, 1), "lost.png", "alice")
        .await
        .unwrap_err();
    assert!(
        matches!(err, TransportError::Delivery { row: 0, offset: 0, attempts: 3 }),
        "{err}"
    );

    let datagrams = drain(&hole, Duration::from_millis(200)).await;
    assert_eq!(datagrams.len(), 3);
    assert!(datagrams.iter().all(|d| d.len() == wire::IMAGE_DATA_SIZE));
}

/// The first undeliverable packet ends the transfer: with a pool of one,
/// no later packet is ever sent.
#[tokio::test]
async fn test_image_fail_fast() {
    let (hole, addr) = black_hole().await;
    let settings = TransportSettings {
        ack_timeout: Duration::from_millis(50),
        max_in_flight: 1,
        ..fast_settings()
    };

    let err = Transport::new(settings)
        .send_image(&addr.to_string(), &test_grid(300, 3), "lost.png", "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Delivery { .. }), "{err}");

    let datagrams = drain(&hole, Duration::from_millis(200)).await;
    assert_eq!(datagrams.len(), 3);
    let keys: HashSet<_> = datagrams
        .iter()
        .map(|d| {
            let p = wire::decode_image_packet(d).unwrap();
            (p.row, p.offset)
        })
        .collect();
    assert_eq!(keys.len(), 1, "only the failing packet may have been sent");
}

/// Fake receiver that ignores the first copy of every packet and
/// acknowledges retransmissions with `ok`.
async fn lossy_receiver(socket: UdpSocket, ok: bool) {
    let mut seen = HashSet::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else { return };
        let Ok(packet) = wire::decode_image_packet(&buf[..len]) else { continue };
        if seen.insert((packet.row, packet.offset)) && ok {
            continue;
        }
        let ack = wire::encode_ack(&ImageAckPacket::acknowledging(&packet, ok)).unwrap();
        socket.send_to(&ack, from).await.unwrap();
    }
}

/// Lost packets are recovered by retransmission.
#[tokio::test]
async fn test_image_retransmission_recovers_loss() -> Result<()> {
    let (socket, addr) = black_hole().await;
    tokio::spawn(lossy_receiver(socket, true));
    let settings = TransportSettings {
        ack_timeout: Duration::from_millis(100),
        ..fast_settings()
    };

    Transport::new(settings)
        .send_image(&addr.to_string(), &test_grid(300, 2), "flaky.png", "alice")
        .await?;
    Ok(())
}

/// A negative ack ends the transfer at once, without retrying.
#[tokio::test]
async fn test_image_negative_ack_is_rejected() {
    let (socket, addr) = black_hole().await;
    tokio::spawn(lossy_receiver(socket, false));
    let settings = TransportSettings {
        ack_timeout: Duration::from_secs(5),
        max_in_flight: 1,
        ..fast_settings()
    };

    let started = tokio::time::Instant::now();
    let err = Transport::new(settings)
        .send_image(&addr.to_string(), &test_grid(10, 1), "bad.png", "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Rejected { row: 0, offset: 0 }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Oversized filename or sender is refused before any packet leaves.
#[tokio::test]
async fn test_image_oversized_names() {
    let (hole, addr) = black_hole().await;
    let long = "f".repeat(65);
    let transport = Transport::new(fast_settings());

    let err = transport
        .send_image(&addr.to_string(), &test_grid(4, 4), &long, "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Validation { field: "filename", .. }));

    let err = transport
        .send_image(&addr.to_string(), &test_grid(4, 4), "ok.png", &long)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Validation { field: "sender", .. }));

    assert!(drain(&hole, Duration::from_millis(100)).await.is_empty());
}
