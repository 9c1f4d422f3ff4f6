//! Outbound messages.

use std::path::Path;

use anyhow::{bail, Context, Result};

use messenger_core::TransportSettings;
use messenger_transport::Transport;

use crate::directory::DirectoryClient;
use crate::images;

pub async fn cmd_send_text(
    directory: &DirectoryClient,
    settings: TransportSettings,
    username: &str,
    text: &str,
) -> Result<()> {
    let peer = directory
        .get_peer(username)
        .await
        .with_context(|| format!("failed to look up {username}"))?;

    Transport::new(settings)
        .send_text(&peer.tcp_addr, text)
        .await
        .with_context(|| format!("failed to send text to {username} at {}", peer.tcp_addr))?;

    println!("sent {} bytes to {username}", text.len());
    Ok(())
}

/// Decode the file at `path` and deliver it to `username` over UDP. The
/// receiver sees the file's base name and `sender`.
pub async fn cmd_send_image(
    directory: &DirectoryClient,
    settings: TransportSettings,
    sender: &str,
    username: &str,
    path: &Path,
) -> Result<()> {
    if sender.is_empty() {
        bail!("no username configured (set identity.username or MESSENGER_IDENTITY__USERNAME)");
    }
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} does not name a file", path.display()))?;

    let peer = directory
        .get_peer(username)
        .await
        .with_context(|| format!("failed to look up {username}"))?;
    let grid = images::load_grid(path)?;
    println!(
        "sending {filename} ({}x{}) to {username}...",
        grid.width(),
        grid.height()
    );

    Transport::new(settings)
        .send_image(&peer.udp_addr, &grid, filename, sender)
        .await
        .with_context(|| format!("failed to send {filename} to {username} at {}", peer.udp_addr))?;

    println!("sent {filename} to {username}");
    Ok(())
}
