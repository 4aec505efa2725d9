//! Shared plumbing for spinning up loopback `Cluster` pairs in the
//! distribution-layer integration tests.

use std::sync::Arc;
use std::time::Duration;

use grove_cluster::{BehaviorRegistry, Cluster, ServerDirectory};
use grove_runtime::Runtime;
use grove_shared::{GroveResult, NodeConfig, NodeId};

pub struct Node {
    pub runtime: Arc<Runtime>,
    pub directory: Arc<ServerDirectory>,
    pub behaviors: Arc<BehaviorRegistry>,
    pub cluster: Arc<Cluster>,
}

pub async fn start_node(name: &str, port: u16, seeds: Vec<String>) -> GroveResult<Node> {
    let mut config = NodeConfig::new(name);
    config.host = "127.0.0.1".to_string();
    config.port = port;
    config.seeds = seeds;
    config.heartbeat_interval_ms = 50;
    config.heartbeat_miss_threshold = 2;
    config.reconnect_delay_ms = 20;
    config.max_reconnect_delay_ms = 100;

    let runtime = Runtime::new();
    let directory = Arc::new(ServerDirectory::new());
    let behaviors = Arc::new(BehaviorRegistry::new());
    let cluster = Cluster::start(config, runtime.clone(), directory.clone(), behaviors.clone()).await?;

    Ok(Node {
        runtime,
        directory,
        behaviors,
        cluster,
    })
}

pub fn node_id(name: &str, port: u16) -> NodeId {
    NodeId::new(name, "127.0.0.1", port)
}

/// Block until `node`'s cluster reports `other` connected, or panic.
pub async fn wait_connected(node: &Node, other: &NodeId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if node.cluster.is_connected(other) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("nodes did not connect in time");
}
