//! Standalone relay for local collaboration.

use clap::Parser;
use log::info;
use ovio_sync::server::{RelayConfig, RelayServer, DEFAULT_RELAY_ADDR};

#[derive(Parser, Debug)]
#[command(name = "ovio-relay")]
#[command(about = "Relay canvas updates and presence between Ovio sessions")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_RELAY_ADDR)]
    bind: String,

    /// Frames buffered per member before it starts skipping
    #[arg(long, default_value_t = 256)]
    capacity: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting relay on {}", args.bind);
    let relay = RelayServer::new(RelayConfig {
        bind_addr: args.bind,
        broadcast_capacity: args.capacity,
    });
    relay.run().await
}
