//! # Tunnel Agent
//!
//! Connects out to a relay's control channel, registers a tunnel id, and
//! forwards every admitted stream to a local service — the counterpart to
//! `tunnel-server`'s Proxy Engine, described "for completeness" alongside
//! the server-side design.

mod agent;
mod config;
mod relay;
mod state;

use clap::Parser;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_agent=info".into()),
        )
        .init();

    let config = Config::parse();
    agent::run(config).await
}
