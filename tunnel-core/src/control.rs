//! # Control-Channel Handler (§4.3, §4.4 Session state machine)
//!
//! Serves the agent side of the bidirectional control-channel RPC: the
//! first frame must be `Register` (any other first frame, or none at all,
//! terminates the channel with `INVALID_ARGUMENT` — §3, §7, grounded in
//! the original `codes.InvalidArgument` in `tunnel_server.go`), after which
//! the handler publishes the Session and demultiplexes `Data` frames to
//! the Stream Registry until the channel closes.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use tunnel_protocol::{client_to_server, ClientToServer, ServerToClient, TunnelControl};

use crate::session::{SessionHandle, SessionRegistry};
use crate::stream::StreamRegistry;

/// Bound on the control channel's own outbound queue (`NewConnection` and
/// `Data` frames waiting to be written to the agent). Generous relative to
/// the per-stream inbound bound since it's shared by every stream on this
/// session.
const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct ControlChannelService {
    sessions: SessionRegistry,
    streams: StreamRegistry,
}

impl ControlChannelService {
    pub fn new(sessions: SessionRegistry, streams: StreamRegistry) -> Self {
        Self { sessions, streams }
    }
}

#[tonic::async_trait]
impl TunnelControl for ControlChannelService {
    type EstablishTunnelStream =
        std::pin::Pin<Box<dyn futures::Stream<Item = Result<ServerToClient, Status>> + Send + 'static>>;

    async fn establish_tunnel(
        &self,
        request: Request<Streaming<ClientToServer>>,
    ) -> Result<Response<Self::EstablishTunnelStream>, Status> {
        let mut inbound = request.into_inner();

        let first = inbound
            .message()
            .await
            .map_err(|e| Status::internal(format!("error reading first frame: {e}")))?;

        let tunnel_id = match first {
            Some(ClientToServer {
                message: Some(client_to_server::Message::Register(reg)),
            }) => reg.tunnel_id,
            _ => {
                return Err(Status::invalid_argument(
                    "first frame on control channel must be Register",
                ))
            }
        };

        let (tx, rx) = mpsc::channel::<ServerToClient>(OUTBOUND_CHANNEL_CAPACITY);
        let handle = SessionHandle::new(tunnel_id.clone(), tx);
        let session_id = handle.session_id;
        self.sessions.add(handle);
        info!(tunnel_id, %session_id, "session registered");

        let sessions = self.sessions.clone();
        let streams = self.streams.clone();
        tokio::spawn(async move {
            demultiplex(&mut inbound, &streams).await;
            sessions.remove(&tunnel_id, session_id);
            info!(tunnel_id, %session_id, "session evicted");
        });

        let out = ReceiverStream::new(rx).map(Ok);
        Ok(Response::new(Box::pin(out)))
    }
}

/// The receive loop: for every `Data` frame, look up its stream in the
/// Stream Registry and enqueue the chunk, blocking up to the queue's bound
/// (§4.3, §7 Queue-full). A miss (the stream already tore down) silently
/// discards the chunk. Returns once the channel reaches EOF or errors.
async fn demultiplex(inbound: &mut Streaming<ClientToServer>, streams: &StreamRegistry) {
    loop {
        let frame = match inbound.message().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(status) => {
                debug!(%status, "control channel receive error");
                break;
            }
        };

        match frame.message {
            Some(client_to_server::Message::Data(data)) => {
                if let Some(queue) = streams.lookup(&data.connection_id) {
                    if queue.send(data.chunk).await.is_err() {
                        debug!(connection_id = %data.connection_id, "stream queue closed before data delivered");
                    }
                }
            }
            Some(client_to_server::Message::Register(_)) => {
                warn!("ignoring duplicate Register frame on an already-registered channel");
            }
            None => {}
        }
    }
}
