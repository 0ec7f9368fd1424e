//! Command-line configuration.

use clap::Parser;

/// WebSocket-over-HTTP gateway: terminates client WebSockets and reports
/// them to an HTTP backend as websocket-events batches.
#[derive(Debug, Clone, Parser)]
#[command(name = "gateway", version)]
pub struct Config {
    /// Address to bind the client listener to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// I/O operation timeout in milliseconds. Reserved; parsed and carried
    /// but not yet enforced on socket operations.
    #[arg(long = "io_timeout", default_value_t = 100)]
    pub io_timeout_ms: u64,

    /// Backend endpoint that receives websocket-events POSTs and proxied
    /// requests.
    #[arg(long, default_value = "http://localhost:12345")]
    pub backend: String,

    /// Optional address for the publish HTTP listener. Publishing is
    /// disabled when unset.
    #[arg(long)]
    pub publish_listen: Option<String>,

    /// JWT issuer claim for the Grip-Sig header.
    #[arg(long, requires = "sig_key")]
    pub sig_iss: Option<String>,

    /// HMAC secret used to sign Grip-Sig tokens.
    #[arg(long, requires = "sig_iss")]
    pub sig_key: Option<String>,
}
