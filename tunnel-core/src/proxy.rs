//! # Proxy Engine (§4.3)
//!
//! The orchestrator: accepts public TCP, peels the initial HTTP request to
//! extract the subdomain, resolves it through the Directory, looks up the
//! Session, allocates a logical stream, and runs the two directional
//! pumps until both exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tunnel_directory::TunnelDirectory;
use tunnel_protocol::{new_connection, server_data};

use crate::error::CoreError;
use crate::http::{admit_request, PushbackReader};
use crate::session::{SessionHandle, SessionRegistry};
use crate::stream::{new_queue, StreamInbound, StreamRegistry};

/// Read chunk size for Pump B (§4.3: "read a chunk (≤ 4 KiB)").
const READ_CHUNK_SIZE: usize = 4096;

/// Read-idle deadline applied between reads on the public→agent pump
/// (§4.3, §5). Default matches the spec's 2 seconds.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct ProxyEngine {
    sessions: SessionRegistry,
    streams: StreamRegistry,
    directory: Arc<dyn TunnelDirectory>,
    idle_timeout: Duration,
}

impl ProxyEngine {
    pub fn new(
        sessions: SessionRegistry,
        streams: StreamRegistry,
        directory: Arc<dyn TunnelDirectory>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            streams,
            directory,
            idle_timeout,
        }
    }

    /// Runs the accept loop forever, spawning one admission task per
    /// connection. Returns only if the listener itself fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), CoreError> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let engine = self.clone();
            tokio::spawn(async move {
                engine.handle_connection(socket, peer).await;
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer: std::net::SocketAddr) {
        if let Err(err) = socket.set_nodelay(true) {
            debug!(%peer, %err, "failed to set TCP_NODELAY");
        }
        if let Err(err) = self.admit_and_pump(socket).await {
            debug!(%peer, %err, "connection ended without completing admission");
        }
    }

    /// The full admission protocol (§4.3 steps 1-8).
    async fn admit_and_pump(&self, socket: TcpStream) -> Result<(), CoreError> {
        let (read_half, write_half) = socket.into_split();
        let mut reader = PushbackReader::new(read_half);

        // Steps 1-2: parse the request, extract the subdomain. A
        // malformed prefix is treated like any other admission failure —
        // silently drop, no error page (§7).
        let admitted = match admit_request(&mut reader).await {
            Ok(admitted) => admitted,
            Err(err) => {
                debug!(%err, "malformed request prefix, dropping connection");
                return Ok(());
            }
        };

        // Step 3: directory lookup. Absence and error both collapse to a
        // routing miss (§9 open question).
        let tunnel_id = match self.directory.find_by_subdomain(&admitted.subdomain).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(subdomain = %admitted.subdomain, "routing miss: unknown subdomain");
                return Ok(());
            }
            Err(err) => {
                warn!(subdomain = %admitted.subdomain, %err, "directory lookup failed, treating as routing miss");
                return Ok(());
            }
        };

        // Step 4: session lookup.
        let session = match self.sessions.get(&tunnel_id) {
            Some(session) => session,
            None => {
                debug!(%tunnel_id, "routing miss: no live session for tunnel");
                return Ok(());
            }
        };

        // Step 5: allocate a stream id.
        let stream_id = Uuid::new_v4().to_string();

        // Step 6: announce the connection. A send failure drops the
        // connection without touching the Stream Registry.
        if session.send(new_connection(stream_id.clone())).await.is_err() {
            debug!(%tunnel_id, %stream_id, "failed to announce new connection, session is dead");
            return Ok(());
        }

        // Step 7: create and register the inbound queue.
        let (producer, inbound) = new_queue();
        let cancel = inbound.cancel_token();
        self.streams.add(stream_id.clone(), producer);
        info!(%tunnel_id, %stream_id, "stream admitted");

        // Step 8: run both pumps to completion, then tear down. `cancel` is
        // shared between them so whichever pump exits first can interrupt
        // the other's blocked read/recv instead of waiting it out.
        let pump_a = tokio::spawn(pump_inbound(inbound, write_half, cancel.clone()));
        let pump_b = tokio::spawn(pump_outbound(
            session,
            stream_id.clone(),
            reader,
            cancel,
            self.idle_timeout,
            admitted.canonical_bytes,
        ));
        let _ = tokio::join!(pump_a, pump_b);

        self.streams.remove(&stream_id);
        info!(%tunnel_id, %stream_id, "stream closed");
        Ok(())
    }
}

/// Pump A — inbound (agent → public). Drains the stream's queue and
/// writes each chunk to the public socket; on queue closure, an empty
/// chunk (the agent's end-of-stream sentinel for this connection_id, §6.1)
/// or a write failure, shuts down the write half and cancels `cancel` so
/// Pump B's blocked public read is interrupted too — shutting down this
/// task's own write half only closes the half *this* task owns, and does
/// nothing to wake a different task parked on the other half's read.
async fn pump_inbound(
    mut inbound: StreamInbound,
    mut write_half: OwnedWriteHalf,
    cancel: CancellationToken,
) {
    loop {
        match inbound.recv().await {
            Some(chunk) if chunk.is_empty() => break,
            Some(chunk) => {
                if write_half.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            None => break,
        }
    }
    let _ = write_half.shutdown().await;
    cancel.cancel();
}

/// Pump B — outbound (public → agent). Sends the preserved request as the
/// first `Data` frame, then relays subsequent reads under a read-idle
/// deadline; on exit, cancels `cancel` to force Pump A out of a `recv` on
/// an otherwise-idle queue. Also selects on `cancel` itself so that when
/// Pump A exits first (sentinel, write failure), this task's own blocked
/// public read is interrupted immediately instead of waiting out
/// `idle_timeout`.
async fn pump_outbound(
    session: SessionHandle,
    stream_id: String,
    mut reader: PushbackReader<OwnedReadHalf>,
    cancel: CancellationToken,
    idle_timeout: Duration,
    first_chunk: Vec<u8>,
) {
    if session
        .send(server_data(stream_id.clone(), first_chunk))
        .await
        .is_err()
    {
        cancel.cancel();
        return;
    }

    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%stream_id, "peer pump exited, stopping outbound read");
                break;
            }
            result = timeout(idle_timeout, reader.read(&mut buf)) => {
                match result {
                    Ok(Ok(0)) => {
                        // Clean EOF on the public socket: extend the
                        // agent→server sentinel (§6.1) symmetrically so the
                        // agent can half-close its local write side instead
                        // of waiting on its own request-body read timeout
                        // (§9 open question, decided: implement the
                        // symmetric signal rather than leave it
                        // unspecified). An idle-timeout or read error gets
                        // no such signal — only a clean EOF means "no more
                        // request bytes".
                        let _ = session.send(server_data(stream_id.clone(), Vec::new())).await;
                        break;
                    }
                    Ok(Ok(n)) => {
                        if session
                            .send(server_data(stream_id.clone(), buf[..n].to_vec()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Err(_)) => break,
                    Err(_elapsed) => {
                        debug!(%stream_id, "public read idle deadline elapsed");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
}
