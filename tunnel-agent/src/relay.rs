//! # Local TCP ↔ Control-Channel Relay
//!
//! The agent-side mirror of the relay's two pumps: one task moves bytes
//! from the local service onto the control channel as `Data` frames, the
//! other drains the connection's inbound queue onto the local socket.
//! Grounded in the teacher's `handle_stream_relay` (`relay.rs`), replacing
//! its WebSocket/base64 framing with direct `Data` frames on the shared
//! gRPC outbound channel.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use tunnel_protocol::{client_data, ClientToServer};

use crate::state::AgentState;

const READ_CHUNK_SIZE: usize = 4096;

/// Runs both directions for one logical stream until either side exits,
/// then removes the connection's entry from `state`.
pub async fn handle_stream_relay(
    local_stream: TcpStream,
    connection_id: String,
    outbound: mpsc::Sender<ClientToServer>,
    inbound: mpsc::Receiver<Vec<u8>>,
    state: Arc<AgentState>,
) {
    let (read_half, write_half) = local_stream.into_split();

    let local_to_server = tokio::spawn(local_to_server_pump(
        read_half,
        connection_id.clone(),
        outbound,
    ));
    let server_to_local = tokio::spawn(server_to_local_pump(write_half, inbound));

    tokio::select! {
        _ = local_to_server => {},
        _ = server_to_local => {},
    }

    state.remove(&connection_id);
    debug!(%connection_id, "stream relay finished");
}

async fn local_to_server_pump(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    connection_id: String,
    outbound: mpsc::Sender<ClientToServer>,
) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                // Canonical end-of-stream sentinel (§6.1, §9): an empty
                // chunk on the agent→server direction tells the relay no
                // more local-service bytes are coming for this connection,
                // so it can half-close the public socket instead of
                // waiting out the idle deadline.
                let _ = outbound.send(client_data(connection_id, Vec::new())).await;
                break;
            }
            Ok(n) => {
                if outbound
                    .send(client_data(connection_id.clone(), buf[..n].to_vec()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                debug!(%connection_id, %err, "local read error");
                break;
            }
        }
    }
}

/// An empty chunk is the end-of-stream sentinel for the downstream
/// (public→agent) direction: half-close the local socket's write side so
/// the local service sees EOF on the request without losing the ability
/// to still send its response.
async fn server_to_local_pump(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut inbound: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(chunk) = inbound.recv().await {
        if chunk.is_empty() {
            let _ = write_half.shutdown().await;
            continue;
        }
        if write_half.write_all(&chunk).await.is_err() {
            break;
        }
    }
}
