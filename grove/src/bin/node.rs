//! # Grove Node
//!
//! Thin wrapper binary that boots a bare `grove` node: the local actor
//! runtime, an empty root supervisor, and the cluster transport listening
//! for peers. Application code spawns its own supervised servers and
//! registers its own behaviors against the `Node` this binary bootstraps;
//! this binary itself carries none.
//!
//! ## Usage
//!
//! ```bash
//! GROVE__NODE_NAME=alpha GROVE__PORT=4369 cargo run --bin grove-node
//! ```

use tokio::signal;
use tracing::info;

use grove::bootstrap::Node;
use grove::shared::NodeConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::load(Some("grove"), None).unwrap_or_else(|err| {
        eprintln!("grove-node: no config file found ({err}), using defaults");
        NodeConfig::default()
    });

    let node = Node::bootstrap(config).await?;

    info!("grove node running, press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("shutdown signal received");

    node.stop().await;
    info!("grove node shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
