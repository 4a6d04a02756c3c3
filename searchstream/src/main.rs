// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use searchstream::config;
use searchstream::transport::HttpSearchTransport;
use searchstream::{ChannelCallbacks, RequestId, StreamHub};

use std::io::Read;
use std::path::PathBuf;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "searchstream",
    about = "Run one streaming search and print each update as a JSON line"
)]
struct Cli {
    /// Path to the searchstream.yaml config file
    #[arg(long, default_value = "searchstream.yaml", env = "SEARCHSTREAM_CONFIG")]
    config: String,

    /// Search request body (JSON file, or - for stdin)
    #[arg(long, default_value = "-")]
    body: String,

    /// Request id to use instead of a generated one
    #[arg(long)]
    id: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = config::FileSource {
        path: PathBuf::from(&cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        environment = %config.environment,
        mailbox_capacity = config.controller.mailbox_capacity,
        max_buffer_bytes = config.controller.max_buffer_bytes,
        fingerprint = %config.fingerprint,
        "config loaded"
    );

    let Some(transport_config) = config.transport.clone() else {
        tracing::error!("config has no transport section");
        std::process::exit(1);
    };

    let body = match read_body(&cli.body) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(body = %cli.body, "failed to read request body: {e}");
            std::process::exit(1);
        }
    };

    let transport = match HttpSearchTransport::new(transport_config) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("failed to build http client: {e}");
            std::process::exit(1);
        }
    };

    let hub = StreamHub::new(&config.controller);
    let id = cli.id.map(RequestId::from).unwrap_or_else(RequestId::generate);
    let (callbacks, mut updates) = ChannelCallbacks::new();

    if let Err(e) = transport
        .open_stream(&hub, id.clone(), callbacks, body, None)
        .await
    {
        tracing::error!(request_id = %id, "failed to open stream: {e}");
        std::process::exit(1);
    }

    let mut failed = false;
    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(update) = update else { break };
                println!("{}", update.to_json());
                if update.is_final() {
                    failed = matches!(update, searchstream::StreamUpdate::Error(..));
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(request_id = %id, "interrupted, cancelling");
                hub.cancel_stream(&id).await;
                break;
            }
        }
    }

    hub.shutdown().await;
    if failed {
        std::process::exit(1);
    }
}

fn read_body(arg: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let text = if arg == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        std::fs::read_to_string(arg)?
    };
    Ok(serde_json::from_str(&text)?)
}
