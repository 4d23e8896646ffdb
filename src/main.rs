//! # livefeed
//!
//! Connects to a live-feed server, subscribes to the requested topics and
//! prints status changes, notifications and inbound messages as JSON lines
//! on stdout until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use livefeed_client::{FeedConfig, LiveFeed};
use livefeed_core::{InboundMessage, Notification};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;

/// Live-feed command-line client.
#[derive(Parser, Debug)]
#[command(name = "livefeed", about = "Live dashboard feed client")]
struct Cli {
    /// Channel endpoint (`ws://` or `wss://`). Overrides settings.
    #[arg(long)]
    url: Option<String>,

    /// Settings file (defaults to `~/.livefeed/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Topic to subscribe to. Repeatable.
    #[arg(long = "topic", value_name = "TOPIC")]
    topics: Vec<String>,

    /// Log level filter (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,
}

fn emit(line: &Value) {
    println!("{line}");
}

fn message_line(message: &InboundMessage) -> Value {
    json!({
        "type": "message",
        "topic": message.route(),
        "receivedAt": message.received_at.to_rfc3339(),
        "payload": message.payload,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.settings {
        Some(path) => livefeed_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => livefeed_settings::load_settings().context("Failed to load settings")?,
    };
    if let Some(url) = args.url {
        settings.endpoint = Some(url);
    }
    let level = args.log_level.as_deref().unwrap_or(&settings.log_level);
    livefeed_core::logging::init_subscriber(level);

    let config = FeedConfig::from_settings(&settings);
    if config.endpoint.is_none() {
        anyhow::bail!("No usable endpoint: pass --url or set `endpoint`/`origin` in settings");
    }
    tracing::info!(endpoint = ?config.endpoint, topics = args.topics.len(), "starting feed");

    let feed = LiveFeed::connect(config);
    for topic in &args.topics {
        feed.subscribe(topic.as_str());
    }

    let mut status = feed.watch_status();
    let mut last = feed.watch_last_message();
    let mut notes = feed.notifications();
    emit(&json!({"type": "status", "status": *status.borrow_and_update()}));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                emit(&json!({"type": "status", "status": current}));
            }
            changed = last.changed() => {
                if changed.is_err() {
                    break;
                }
                let message = last.borrow_and_update().clone();
                if let Some(message) = message {
                    emit(&message_line(&message));
                }
            }
            note = notes.recv() => match note {
                Ok(note) => {
                    emit(&json!({"type": "notification", "notification": note}));
                    if matches!(note, Notification::ConnectionLost { .. }) {
                        tracing::warn!("retries exhausted; waiting for interrupt");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    feed.shutdown().await;
    Ok(())
}
