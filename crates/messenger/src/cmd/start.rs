//! `start`: register with the directory, then print texts and save
//! images until Ctrl-C.

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;

use messenger_core::wire::{self, USERNAME_MAX_LENGTH};
use messenger_core::{MessengerConfig, PeerRecord};
use messenger_transport::Transport;

use crate::directory::DirectoryClient;
use crate::images;

pub async fn cmd_start(config: &MessengerConfig, directory: &DirectoryClient) -> Result<()> {
    let username = config.identity.username.as_str();
    if username.is_empty() {
        bail!("no username configured (set identity.username or MESSENGER_IDENTITY__USERNAME)");
    }
    wire::check_bounded("username", username, USERNAME_MAX_LENGTH)?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let transport = Transport::new(config.transport.settings());
    let mut listening = transport
        .listen(
            &config.network.tcp_bind_addr(),
            &config.network.udp_bind_addr(),
            &shutdown_tx,
        )
        .await
        .context("failed to start listeners")?;

    // Advertise the ports actually bound, which differ from config when it asks for 0.
    let record = PeerRecord {
        username: username.to_string(),
        tcp_addr: config.network.advertise_addr(listening.tcp_addr().port()),
        udp_addr: config.network.advertise_addr(listening.udp_addr().port()),
    };
    if let Err(e) = directory.register(&record).await {
        let _ = shutdown_tx.send(());
        listening.group.wait().await.ok();
        return Err(e).context("failed to register with directory");
    }
    println!("listening as {record}");

    loop {
        tokio::select! {
            Some(text) = listening.text_rx.recv() => {
                println!("received message: {text:?}");
            }

            Some(image) = listening.image_rx.recv() => {
                match images::save_received(&config.storage.images_path, &image) {
                    Ok(path) => {
                        tracing::info!(sender = %image.sender, path = %path.display(), "image saved");
                        println!("received image from {}: {}", image.sender, path.display());
                    }
                    Err(e) => {
                        tracing::warn!(sender = %image.sender, filename = %image.filename, error = %e, "could not save image");
                    }
                }
            }

            result = listening.group.wait() => {
                result.context("listener failed")?;
                tracing::info!("shutting down");
                return Ok(());
            }
        }
    }
}
