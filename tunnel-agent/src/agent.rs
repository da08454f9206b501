//! # Agent Control-Channel Connection Loop
//!
//! Dials the relay, registers the tunnel id, and dispatches `NewConnection`
//! / `Data` frames to per-stream relay tasks until the channel drops, then
//! reconnects. Mirrors the teacher's `run_agent_loop` reconnect shape
//! (`agent.rs`) and the original Go client's `Run`/`listenServer` split
//! (`cli/client.go`), collapsed onto a gRPC bidi stream instead of a raw
//! WebSocket + cobra command.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use tunnel_protocol::{register, server_to_client, ClientToServer, TunnelControlClient};

use crate::config::Config;
use crate::relay::handle_stream_relay;
use crate::state::AgentState;

/// Delay before retrying after a disconnect or failed dial.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Outbound channel capacity: the Register frame plus every relay task's
/// `Data` frames share this one queue feeding the bidi call.
const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Runs the agent forever: connect, register, relay, reconnect on any
/// failure. Returns only if the caller cancels it.
pub async fn run(config: Config) -> anyhow::Result<()> {
    loop {
        match run_once(&config).await {
            Ok(()) => info!("control channel closed cleanly"),
            Err(err) => error!(%err, "control channel session ended"),
        }
        info!(delay_secs = RECONNECT_DELAY.as_secs(), "reconnecting");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn run_once(config: &Config) -> anyhow::Result<()> {
    info!(server = %config.server, tunnel_id = %config.tunnel_id, "connecting to relay");
    let mut client = TunnelControlClient::connect(config.server.clone()).await?;

    let (tx, rx) = mpsc::channel::<ClientToServer>(OUTBOUND_CHANNEL_CAPACITY);
    tx.send(register(config.tunnel_id.clone())).await?;

    let mut inbound = client
        .establish_tunnel(ReceiverStream::new(rx))
        .await?
        .into_inner();

    info!("registered, awaiting connections");
    let state = Arc::new(AgentState::new());

    while let Some(frame) = inbound.next().await {
        let frame = frame?;
        match frame.message {
            Some(server_to_client::Message::NewConnection(nc)) => {
                spawn_connection(config.local.clone(), nc.connection_id, tx.clone(), state.clone());
            }
            Some(server_to_client::Message::Data(data)) => {
                state.route(&data.connection_id, data.chunk).await;
            }
            None => {}
        }
    }

    Ok(())
}

/// Pre-registers the connection's inbound queue before dialing the local
/// target, so `Data` frames that arrive mid-dial are buffered instead of
/// lost (mirrors the teacher's pre-registration-before-connect ordering).
fn spawn_connection(
    local_addr: String,
    connection_id: String,
    outbound: mpsc::Sender<ClientToServer>,
    state: Arc<AgentState>,
) {
    let inbound_rx = state.register(connection_id.clone());
    tokio::spawn(async move {
        match TcpStream::connect(&local_addr).await {
            Ok(local_stream) => {
                info!(%connection_id, %local_addr, "connected to local service");
                handle_stream_relay(local_stream, connection_id, outbound, inbound_rx, state).await;
            }
            Err(err) => {
                warn!(%connection_id, %local_addr, %err, "failed to dial local service");
                state.remove(&connection_id);
            }
        }
    });
}
