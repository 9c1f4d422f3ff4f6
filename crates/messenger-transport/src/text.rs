//! Text channel: one framed UTF-8 message per TCP connection.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use messenger_core::wire;
use messenger_core::{TransportError, TransportSettings};

/// Dial `addr`, write one text frame and close the connection.
pub async fn send_text(
    addr: &str,
    text: &str,
    settings: &TransportSettings,
) -> Result<(), TransportError> {
    // Size check happens before any socket is opened.
    let frame = wire::encode_text(text).map_err(TransportError::outbound)?;

    let mut stream = match tokio::time::timeout(settings.connect_timeout, TcpStream::connect(addr))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(TransportError::Connection {
                addr: addr.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(TransportError::Timeout {
                addr: addr.to_string(),
                elapsed: settings.connect_timeout,
            })
        }
    };

    let write = async {
        stream.write_all(&frame).await?;
        stream.shutdown().await
    };
    match tokio::time::timeout(settings.io_timeout, write).await {
        Ok(Ok(())) => {
            tracing::debug!(addr, bytes = text.len(), "text sent");
            Ok(())
        }
        Ok(Err(source)) => Err(TransportError::Connection {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(TransportError::Timeout {
            addr: addr.to_string(),
            elapsed: settings.io_timeout,
        }),
    }
}

/// Read exactly one text frame from an accepted connection.
pub async fn receive_text<R>(conn: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    Ok(wire::decode_text(conn).await?)
}

/// Accept loop for inbound text connections.
pub struct TextListener {
    listener: TcpListener,
    io_timeout: Duration,
}

impl TextListener {
    pub async fn bind(addr: &str, io_timeout: Duration) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            io_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown. Each connection is read on its own task and
    /// its text pushed to `out`. An accept error ends the loop.
    pub async fn run(
        self,
        out: mpsc::Sender<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TransportError> {
        let addr = self.local_addr().ok();
        tracing::info!(addr = ?addr, "text listener started");

        // Dropped on return, which aborts any connection still being read.
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("text listener shutting down");
                    return Ok(());
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(TransportError::Accept)?;
                    connections.spawn(handle_connection(stream, peer, self.io_timeout, out.clone()));
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    io_timeout: Duration,
    out: mpsc::Sender<String>,
) {
    let text = match tokio::time::timeout(io_timeout, receive_text(&mut stream)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(%peer, error = %e, "dropping text connection");
            return;
        }
        Err(_) => {
            tracing::warn!(%peer, timeout = ?io_timeout, "text connection timed out");
            return;
        }
    };
    drop(stream);

    tracing::debug!(%peer, bytes = text.len(), "text received");
    if out.send(text).await.is_err() {
        tracing::debug!(%peer, "text output closed, discarding message");
    }
}
