//! # Control-Channel Wire Protocol
//!
//! Defines the typed frames exchanged between the tunnel server and a
//! connected agent over the control-channel RPC (§6.1), plus small
//! constructor helpers so callers don't have to spell out the generated
//! `oneof` wrapper at every call site.
//!
//! The frame shapes mirror a tagged-union design (one variant per message
//! kind) the same way a hand-rolled JSON protocol would, except the tag and
//! length-prefixing are handled by the gRPC/HTTP2 transport instead of a
//! custom envelope.

pub mod pb {
    tonic::include_proto!("tunnel");
}

pub use pb::tunnel_control_client::TunnelControlClient;
pub use pb::tunnel_control_server::{TunnelControl, TunnelControlServer};
pub use pb::{client_to_server, server_to_client, ClientToServer, Data, NewConnection, Register, ServerToClient};

/// Builds the frame that must be the first message an agent sends.
pub fn register(tunnel_id: impl Into<String>) -> ClientToServer {
    ClientToServer {
        message: Some(client_to_server::Message::Register(Register {
            tunnel_id: tunnel_id.into(),
        })),
    }
}

/// Builds an agent → server data frame for `connection_id`.
pub fn client_data(connection_id: impl Into<String>, chunk: Vec<u8>) -> ClientToServer {
    ClientToServer {
        message: Some(client_to_server::Message::Data(Data {
            connection_id: connection_id.into(),
            chunk,
        })),
    }
}

/// Builds the server → agent announcement that a new stream was admitted.
pub fn new_connection(connection_id: impl Into<String>) -> ServerToClient {
    ServerToClient {
        message: Some(server_to_client::Message::NewConnection(NewConnection {
            connection_id: connection_id.into(),
        })),
    }
}

/// Builds a server → agent data frame for `connection_id`.
pub fn server_data(connection_id: impl Into<String>, chunk: Vec<u8>) -> ServerToClient {
    ServerToClient {
        message: Some(server_to_client::Message::Data(Data {
            connection_id: connection_id.into(),
            chunk,
        })),
    }
}
