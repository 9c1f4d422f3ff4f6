//! Directory lookups.

use anyhow::{Context, Result};

use crate::directory::DirectoryClient;

pub async fn cmd_get(directory: &DirectoryClient, username: &str) -> Result<()> {
    let peer = directory
        .get_peer(username)
        .await
        .with_context(|| format!("failed to look up {username}"))?;
    println!("peer info: {peer}");
    Ok(())
}

pub async fn cmd_get_all(directory: &DirectoryClient) -> Result<()> {
    let peers = directory.list_peers().await.context("failed to list peers")?;

    if peers.is_empty() {
        println!("No peers registered.");
        return Ok(());
    }

    println!("Registered peers ({}):", peers.len());
    for p in &peers {
        println!("  {p}");
    }
    Ok(())
}
