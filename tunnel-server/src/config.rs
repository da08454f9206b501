//! Command-line configuration for the relay server.
//!
//! Mirrors the original `serve` command's flags (`--port`, `--idle-timeout`
//! and friends in the Go CLI's `cobra`/`viper` setup) as a `clap` derive
//! struct, matching how the teacher configures its binaries.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "tunnel-server", about = "Reverse-tunnel relay server")]
pub struct Config {
    /// Address the public-facing proxy listener binds to.
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub public_addr: SocketAddr,

    /// Address the agent-facing gRPC control channel binds to.
    #[arg(long, default_value = "0.0.0.0:50051")]
    pub control_addr: SocketAddr,

    /// Address the admin/status HTTP API binds to.
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub admin_addr: SocketAddr,

    /// Read-idle deadline applied to the public→agent pump, in seconds.
    #[arg(long, default_value_t = 2)]
    pub idle_timeout_secs: u64,
}

impl Config {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
