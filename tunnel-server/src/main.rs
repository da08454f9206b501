//! # Tunnel Relay Server
//!
//! The public-facing half of the reverse tunnel: terminates the agent
//! control channel over gRPC, admits public TCP connections, resolves them
//! to a registered agent by subdomain, and pumps bytes between the two.
//!
//! ## Architecture
//!
//! ```text
//! Public client ──TCP──► Relay Server ──gRPC (bidi)──► Agent ──TCP──► Local Service
//! ```
//!
//! ## Modules
//!
//! - [`config`] — CLI configuration
//! - [`state`]  — shared state for the admin HTTP API
//! - [`api`]    — admin API endpoints

mod api;
mod config;
mod state;

use std::sync::Arc;

use axum::{routing::get, Router};
use clap::Parser;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tower_http::cors::CorsLayer;
use tracing::info;

use tunnel_core::{ControlChannelService, ProxyEngine};
use tunnel_directory::InMemoryDirectory;
use tunnel_protocol::TunnelControlServer;

use crate::config::Config;
use crate::state::AdminState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_server=info".into()),
        )
        .init();

    let config = Config::parse();

    let sessions = tunnel_core::SessionRegistry::new();
    let streams = tunnel_core::StreamRegistry::new();
    let directory = Arc::new(InMemoryDirectory::new());

    let control_listener = TcpListener::bind(config.control_addr).await?;
    let control_service = ControlChannelService::new(sessions.clone(), streams.clone());
    info!(addr = %config.control_addr, "control channel listening");
    let control_server = tokio::spawn(async move {
        Server::builder()
            .add_service(TunnelControlServer::new(control_service))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(
                control_listener,
            ))
            .await
    });

    let public_listener = TcpListener::bind(config.public_addr).await?;
    let engine = ProxyEngine::new(
        sessions.clone(),
        streams,
        directory.clone(),
        config.idle_timeout(),
    );
    info!(addr = %config.public_addr, "public proxy listening");
    let proxy_server = tokio::spawn(engine.serve(public_listener));

    let admin_state = AdminState { sessions };
    let admin_app = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/api/sessions", get(api::list_sessions))
        .layer(CorsLayer::permissive())
        .with_state(admin_state);
    let admin_listener = TcpListener::bind(config.admin_addr).await?;
    info!(addr = %config.admin_addr, "admin API listening");
    let admin_server = tokio::spawn(async move { axum::serve(admin_listener, admin_app).await });

    tokio::select! {
        res = control_server => {
            res??;
        }
        res = proxy_server => {
            res??;
        }
        res = admin_server => {
            res??;
        }
    }

    Ok(())
}
