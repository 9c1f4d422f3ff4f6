use crate::*;

use anyhow::Result;
use messenger_core::TransportError;

/// A text message reaches the receiver's output queue verbatim.
#[tokio::test]
async fn test_text_hello_delivered() -> Result<()> {
    let mut receiver = Peer::start(fast_settings()).await;
    let sender = Transport::new(fast_settings());

    sender.send_text(&receiver.tcp_addr(), "hello").await?;
    assert_eq!(recv_within(&mut receiver.listening.text_rx, 5).await, "hello");
    Ok(())
}

/// Empty and multi-byte payloads survive framing untouched.
#[tokio::test]
async fn test_text_edge_payloads() -> Result<()> {
    let mut receiver = Peer::start(fast_settings()).await;
    let sender = Transport::new(fast_settings());

    for text in ["", "héllo wörld ✓", "line one\nline two\n"] {
        sender.send_text(&receiver.tcp_addr(), text).await?;
        assert_eq!(recv_within(&mut receiver.listening.text_rx, 5).await, text);
    }
    Ok(())
}

/// Concurrent senders each get their own connection and message.
#[tokio::test]
async fn test_text_concurrent_senders() -> Result<()> {
    let mut receiver = Peer::start(fast_settings()).await;
    let addr = receiver.tcp_addr();

    let mut sends = tokio::task::JoinSet::new();
    for i in 0..8 {
        let addr = addr.clone();
        sends.spawn(async move {
            Transport::new(fast_settings())
                .send_text(&addr, &format!("message {i}"))
                .await
        });
    }
    while let Some(result) = sends.join_next().await {
        result??;
    }

    let mut got = Vec::new();
    for _ in 0..8 {
        got.push(recv_within(&mut receiver.listening.text_rx, 5).await);
    }
    got.sort();
    let mut want: Vec<_> = (0..8).map(|i| format!("message {i}")).collect();
    want.sort();
    assert_eq!(got, want);
    Ok(())
}

/// Dialing a port nobody listens on fails with a connection error that
/// names the address.
#[tokio::test]
async fn test_text_send_to_closed_port() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let addr = format!("127.0.0.1:{port}");
    let err = Transport::new(fast_settings())
        .send_text(&addr, "anyone?")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connection { .. }), "{err}");
    assert!(err.to_string().contains(&addr));
}

/// Oversized text is refused before dialing.
#[tokio::test]
async fn test_text_too_large_is_validation_error() {
    let huge = "x".repeat(messenger_core::wire::MAX_TEXT_LEN + 1);
    // Nothing listens here; validation must fail first.
    let err = Transport::new(fast_settings())
        .send_text("127.0.0.1:9", &huge)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Validation { field: "text", .. }));
}
