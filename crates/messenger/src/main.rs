//! messenger: peer-to-peer text and image messenger.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use messenger_core::MessengerConfig;

mod cmd;
mod directory;
mod images;

use directory::DirectoryClient;

fn print_usage() {
    println!("messenger: peer-to-peer messenger");
    println!();
    println!("Usage: messenger [--config <path>] <command>");
    println!();
    println!("Commands:");
    println!("  start                         Register with the directory and receive messages");
    println!("  get <username>                Show a peer's addresses");
    println!("  get --all                     List every registered peer");
    println!("  send text <username> <text>   Send a text message");
    println!("  send image <username> <path>  Send a PNG, JPEG or GIF image");
    println!();
    println!("Logging is controlled with RUST_LOG (e.g. RUST_LOG=info).");
}

fn load_config(explicit: Option<PathBuf>) -> MessengerConfig {
    let loaded = match explicit {
        Some(path) => MessengerConfig::load_from(&path),
        None => {
            if let Err(e) = MessengerConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            MessengerConfig::load()
        }
    };
    loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MessengerConfig::default()
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --config option
    let mut config_path = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            i += 1;
            config_path = Some(PathBuf::from(
                args.get(i).context("--config requires a value")?,
            ));
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    let config = load_config(config_path);
    let directory = DirectoryClient::new(&config.directory.server);

    match remaining.as_slice() {
        ["start"] => cmd::start::cmd_start(&config, &directory).await,
        ["get", "--all"] => cmd::get::cmd_get_all(&directory).await,
        ["get", username] => cmd::get::cmd_get(&directory, username).await,
        ["send", "text", username, words @ ..] if !words.is_empty() => {
            let text = words.join(" ");
            cmd::send::cmd_send_text(&directory, config.transport.settings(), username, &text).await
        }
        ["send", "image", username, path] => {
            cmd::send::cmd_send_image(
                &directory,
                config.transport.settings(),
                &config.identity.username,
                username,
                Path::new(path),
            )
            .await
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
