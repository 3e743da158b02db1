//! gatehouse binary: proxy on a fixed port with the operator console on
//! stdin.

use gatehouse::{console, server, BlocklistStore, ProxyConfig};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        eprintln!("gatehouse: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> gatehouse::Result<()> {
    let store = Arc::new(BlocklistStore::new());
    let handle = server::start(ProxyConfig::default(), Arc::clone(&store)).await?;
    info!("proxy activated on port {}", handle.port);

    // Operator console over stdin; stops with the server.
    let console_task = tokio::spawn(console::run(
        BufReader::new(tokio::io::stdin()),
        store,
        handle.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown();
    let _ = console_task.await;
    Ok(())
}
