//! Transport facade: what the peer process calls.

use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use messenger_core::{PixelGrid, TransportError, TransportSettings};

use crate::image::{self, ImageListener, ReceivedImage};
use crate::text::{self, TextListener};

#[derive(Debug, Clone, Default)]
pub struct Transport {
    settings: TransportSettings,
}

impl Transport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    /// Bind both listeners, then run them until `shutdown` fires or one
    /// fails. Bind errors are returned before anything is spawned.
    pub async fn listen(
        &self,
        tcp_addr: &str,
        udp_addr: &str,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<Listening, TransportError> {
        let text_listener = TextListener::bind(tcp_addr, self.settings.io_timeout).await?;
        let image_listener = ImageListener::bind(udp_addr, &self.settings).await?;
        let tcp_local = text_listener.local_addr()?;
        let udp_local = image_listener.local_addr()?;

        let (text_tx, text_rx) = mpsc::channel(self.settings.queue_capacity);
        let (image_tx, image_rx) = mpsc::channel(self.settings.queue_capacity);

        let mut tasks = JoinSet::new();
        tasks.spawn(fail_group(
            text_listener.run(text_tx, shutdown.subscribe()),
            shutdown.clone(),
        ));
        tasks.spawn(fail_group(
            image_listener.run(image_tx, shutdown.subscribe()),
            shutdown.clone(),
        ));

        tracing::info!(tcp = %tcp_local, udp = %udp_local, "listening");

        Ok(Listening {
            text_rx,
            image_rx,
            group: ListenGroup {
                tasks,
                first_error: None,
            },
            tcp_addr: tcp_local,
            udp_addr: udp_local,
        })
    }

    pub async fn send_text(&self, addr: &str, text: &str) -> Result<(), TransportError> {
        text::send_text(addr, text, &self.settings).await
    }

    pub async fn send_image(
        &self,
        addr: &str,
        grid: &PixelGrid,
        filename: &str,
        sender: &str,
    ) -> Result<(), TransportError> {
        image::send_image(addr, grid, filename, sender, &self.settings).await
    }

    pub async fn send_image_with_shutdown(
        &self,
        addr: &str,
        grid: &PixelGrid,
        filename: &str,
        sender: &str,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TransportError> {
        image::send_image_with_shutdown(addr, grid, filename, sender, &self.settings, Some(shutdown))
            .await
    }
}

/// A loop failure stops its sibling through the shared shutdown signal.
async fn fail_group<F>(run: F, shutdown: broadcast::Sender<()>) -> Result<(), TransportError>
where
    F: std::future::Future<Output = Result<(), TransportError>>,
{
    let result = run.await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "listener failed, stopping");
        let _ = shutdown.send(());
    }
    result
}

/// Running listeners and their output queues.
pub struct Listening {
    pub text_rx: mpsc::Receiver<String>,
    pub image_rx: mpsc::Receiver<ReceivedImage>,
    pub group: ListenGroup,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
}

impl Listening {
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }
}

/// Both listener loops. Dropping the group stops them.
pub struct ListenGroup {
    tasks: JoinSet<Result<(), TransportError>>,
    // Kept across calls so a cancelled `wait` loses nothing.
    first_error: Option<TransportError>,
}

impl ListenGroup {
    /// Wait for both loops to end. Returns the first error, or `Ok` after a
    /// clean shutdown. Cancel safe.
    pub async fn wait(&mut self) -> Result<(), TransportError> {
        while let Some(joined) = self.tasks.join_next().await {
            let result =
                joined.unwrap_or_else(|e| Err(TransportError::Io(std::io::Error::other(e))));
            if let Err(e) = result {
                self.first_error.get_or_insert(e);
            }
        }
        match self.first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
