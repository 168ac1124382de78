//! CLI for Stockings
//!
//! Subcommands:
//! - `server`: run the WebSocket session server with the subscribe/publish relay

use clap::Parser;
use stockings::config::load_config;
use stockings::transport::relay::attach_relay;
use stockings::transport::start_websocket_server;
use stockings::utils::logging;
use stockings::{ServerOptions, SessionServer};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stockings")]
enum Command {
    /// Start the WebSocket server
    Server {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    match cmd {
        Command::Server { host, port } => {
            if let Err(e) = run_server(host, port).await {
                error!("Server failed: {}", e);
                eprintln!("Server failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.logging.level);

    let host = host.unwrap_or(config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let options = ServerOptions::from_settings(&config.session).with_on_connection(
        |server, connection| {
            attach_relay(server, connection);
        },
    );
    let server = SessionServer::new(options)?;

    tokio::select! {
        result = start_websocket_server(&addr, server) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}
