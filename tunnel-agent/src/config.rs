//! Command-line configuration for the agent, translating the original Go
//! CLI's `connect` command flags (`--server`, `--tunnel-id`, `--local` in
//! `cli/connect.go`) into a `clap` derive struct.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "tunnel-agent", about = "Connects a local service to a registered tunnel")]
pub struct Config {
    /// Address of the relay's control channel, e.g. "http://localhost:50051".
    #[arg(long, short = 's', default_value = "http://localhost:50051")]
    pub server: String,

    /// Tunnel id to register under.
    #[arg(long, short = 't')]
    pub tunnel_id: String,

    /// Local target to forward streams to, "host:port".
    #[arg(long, short = 'l', default_value = "localhost:8080")]
    pub local: String,
}
