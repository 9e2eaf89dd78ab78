//! murmur relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Any token, any room
//! murmur-relay --bind 127.0.0.1:8000
//!
//! # Fixed rooms and tokens, slow switch acknowledgements
//! murmur-relay --room general --room random --token alice --switch-ack-delay-ms 250
//! ```

use std::time::Duration;

use clap::Parser;
use murmur_relay::{RelayConfig, RelayServer};

/// murmur chat relay
#[derive(Parser, Debug)]
#[command(name = "murmur-relay")]
#[command(about = "Loopback WebSocket relay for murmur chat sessions")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, env = "MURMUR_RELAY_ADDR", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Allowed room id (repeatable; omit to allow any)
    #[arg(long = "room")]
    rooms: Vec<String>,

    /// Accepted auth token (repeatable; omit to accept any)
    #[arg(long = "token")]
    tokens: Vec<String>,

    /// Delay before acknowledging a room switch
    #[arg(long)]
    switch_ack_delay_ms: Option<u64>,

    /// Broadcast buffer per room
    #[arg(long, default_value = "256")]
    broadcast_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = RelayConfig {
        bind_addr: args.bind,
        rooms: (!args.rooms.is_empty()).then(|| args.rooms.into_iter().collect()),
        tokens: (!args.tokens.is_empty()).then(|| args.tokens.into_iter().collect()),
        switch_ack_delay: args.switch_ack_delay_ms.map(Duration::from_millis),
        broadcast_capacity: args.broadcast_capacity,
    };

    log::info!("murmur relay starting");
    RelayServer::new(config).run().await?;
    Ok(())
}
