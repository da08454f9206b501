//! # Tunnel Core — the Data Plane
//!
//! Implements the hard part of a reverse-tunneling relay: admitting a
//! public TCP connection, resolving it to a registered agent session by
//! subdomain, multiplexing it as a logical stream over that agent's
//! control channel, and tearing the stream down cleanly from either end.
//!
//! - [`session`] — Session Registry: tunnel id → live control-channel handle
//! - [`stream`] — Stream Registry: stream id → bounded inbound byte-queue
//! - [`http`] — admission-time HTTP request parsing
//! - [`proxy`] — the Proxy Engine: public listener, admission, pumps
//! - [`control`] — the control-channel handler (agent-facing gRPC service)

pub mod control;
pub mod error;
pub mod http;
pub mod proxy;
pub mod session;
pub mod stream;

pub use control::ControlChannelService;
pub use error::CoreError;
pub use proxy::{ProxyEngine, DEFAULT_IDLE_TIMEOUT};
pub use session::{SessionHandle, SessionRegistry};
pub use stream::{StreamInbound, StreamRegistry};
