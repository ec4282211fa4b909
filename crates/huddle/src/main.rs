//! # huddle
//!
//! Loads settings, initialises logging and serves the chat relay until Ctrl-C.

#![deny(unsafe_code)]

mod relay;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_server::{Hub, ShutdownCoordinator};
use huddle_settings::HuddleSettings;

/// WebSocket room hub.
#[derive(Parser, Debug)]
#[command(name = "huddle", about = "WebSocket room hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.huddle/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Echo broadcasts back to the publishing connection at the transport.
    #[arg(long)]
    publish_to_self: bool,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut HuddleSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        if self.publish_to_self {
            settings.hub.publish_to_self = true;
        }
    }
}

fn load(cli: &Cli) -> Result<HuddleSettings> {
    let path = cli.settings.clone().unwrap_or_else(huddle_settings::settings_path);
    let mut settings = huddle_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    if settings.logging.json {
        huddle_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        huddle_core::logging::init_subscriber(&settings.logging.level);
    }

    let hub = Hub::builder()
        .settings(settings.clone())
        .plugin(relay::profile_plugin())
        .plugin(relay::stats_plugin())
        .build()
        .await;
    relay::install(&hub).context("Failed to create routes")?;

    let shutdown = ShutdownCoordinator::new();
    let handle = hub
        .listen(&settings.server.bind_addr(), shutdown.token())
        .await
        .context("Failed to bind server")?;
    tracing::info!(
        "huddle listening on ws://{} ({} routes, {} methods)",
        handle.local_addr(),
        hub.routes().len(),
        hub.methods().len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let _ = shutdown.drain(handle, None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
