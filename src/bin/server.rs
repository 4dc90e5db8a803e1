use std::sync::Arc;

use clap::Parser;
use respd::config::{ServerConfig, DEFAULT_ADDRESS, DEFAULT_MAX_DEPTH, DEFAULT_MAX_LINE_LENGTH};
use respd::{Connection, Error, Request, Server};
use tracing::debug;

#[derive(Parser, Debug)]
struct Args {
    /// The address to listen on
    #[arg(short, long, env = "RESPD_ADDRESS", default_value = DEFAULT_ADDRESS)]
    address: String,

    /// The longest protocol line accepted from a client, in bytes
    #[arg(long, env = "RESPD_MAX_LINE_LENGTH", default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    max_line_length: usize,

    /// How deeply arrays from a client may nest
    #[arg(long, env = "RESPD_MAX_DEPTH", default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

/// Returns PONG if no argument is provided, otherwise return a copy of the argument as a bulk.
async fn ping(conn: Arc<Connection>, request: Request) -> Result<(), Error> {
    match request.args.into_iter().next() {
        Some(payload) => conn.write_bulk(payload).await,
        None => conn.write_status("PONG").await,
    }
}

/// Returns the single argument as a bulk.
async fn echo(conn: Arc<Connection>, request: Request) -> Result<(), Error> {
    let mut args = request.args.into_iter();
    match (args.next(), args.next()) {
        (Some(message), None) => conn.write_bulk(message).await,
        _ => {
            conn.write_error("ERR wrong number of arguments for 'echo' command")
                .await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let args = Args::parse();

    let mut server = Server::new(ServerConfig {
        address: args.address,
        max_line_length: args.max_line_length,
        max_depth: args.max_depth,
    });
    server.add_handler("ping", ping)?;
    server.add_handler("echo", echo)?;

    Arc::new(server).listen_and_serve().await
}
