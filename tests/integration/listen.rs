use crate::*;

use messenger_core::TransportError;
use tokio::io::AsyncWriteExt;

/// A port already in use is reported by `listen`, before any loop runs.
#[tokio::test]
async fn test_listen_tcp_bind_conflict() {
    let held = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = held.local_addr().unwrap().to_string();
    let (shutdown, _) = broadcast::channel(1);

    let err = Transport::new(fast_settings())
        .listen(&taken, "127.0.0.1:0", &shutdown)
        .await
        .err()
        .expect("bind should fail");
    assert!(matches!(err, TransportError::Bind { ref addr, .. } if *addr == taken));
}

/// Shutdown stops both loops cleanly and closes both output queues.
#[tokio::test]
async fn test_listen_shutdown_closes_outputs() {
    let mut peer = Peer::start(fast_settings()).await;
    peer.shutdown.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), peer.listening.group.wait())
        .await
        .expect("group should stop promptly")
        .expect("clean shutdown is not an error");

    assert!(peer.listening.text_rx.recv().await.is_none());
    assert!(peer.listening.image_rx.recv().await.is_none());
}

/// Garbage on either socket is contained; the peer keeps receiving.
#[tokio::test]
async fn test_listen_survives_garbage() {
    let mut peer = Peer::start(fast_settings()).await;

    let mut conn = tokio::net::TcpStream::connect(peer.tcp_addr()).await.unwrap();
    conn.write_all(b"0000not-a-length").await.unwrap();
    drop(conn);

    let junk = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    junk.send_to(b"\x01\x01garbage", peer.udp_addr()).await.unwrap();

    // A peer can message itself.
    peer.transport.send_text(&peer.tcp_addr(), "still here").await.unwrap();
    assert_eq!(recv_within(&mut peer.listening.text_rx, 5).await, "still here");

    let grid = test_grid(10, 1);
    peer.transport
        .send_image(&peer.udp_addr(), &grid, "ok.png", "alice")
        .await
        .unwrap();
    assert_eq!(recv_within(&mut peer.listening.image_rx, 5).await.grid, grid);
}
