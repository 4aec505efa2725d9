//! Node bootstrap: bring up a local runtime, an empty root supervisor, and
//! (if configured) the distribution layer, as one unit.
//!
//! A single entry point that owns every subsystem's handle and a `stop()`
//! that tears them down in reverse order, wrapped in a timeout so a stuck
//! shutdown cannot hang the process forever.

use std::sync::Arc;
use std::time::Duration;

use grove_cluster::{BehaviorRegistry, Cluster, ServerDirectory};
use grove_runtime::Runtime;
use grove_shared::{ExitReason, GroveResult, NodeConfig};
use grove_supervisor::{start_supervisor, ChildSpec, RestartStrategy, SupervisorRef};

/// Default budget for graceful shutdown before `Node::stop` gives up on the
/// root supervisor and returns anyway.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully bootstrapped node: the local actor runtime, the root
/// supervision tree, and (since `NodeConfig` always describes a listen
/// address) the cluster's transport and membership.
pub struct Node {
    pub runtime: Arc<Runtime>,
    pub cluster: Arc<Cluster>,
    pub directory: Arc<ServerDirectory>,
    pub behaviors: Arc<BehaviorRegistry>,
    pub root_supervisor: SupervisorRef,
    pub config: NodeConfig,
}

impl Node {
    /// Start a node: the runtime, an empty `OneForOne` root supervisor
    /// (callers add children via `root_supervisor.start_child`), and the
    /// cluster transport listening on `config.host:config.port`.
    pub async fn bootstrap(config: NodeConfig) -> GroveResult<Self> {
        grove_shared::logging::init_tracing();

        tracing::info!(
            node = %config.node_name,
            host = %config.host,
            port = config.port,
            "bootstrapping grove node"
        );

        let runtime = Runtime::new();
        let directory = Arc::new(ServerDirectory::new());
        let behaviors = Arc::new(BehaviorRegistry::new());

        let root_supervisor = start_supervisor(
            runtime.clone(),
            RestartStrategy::OneForOne,
            Vec::<ChildSpec>::new(),
            10,
            Duration::from_secs(60),
        )
        .await?;

        let cluster = Cluster::start(config.clone(), runtime.clone(), directory.clone(), behaviors.clone())
            .await?;

        tracing::info!("grove node started");

        Ok(Self {
            runtime,
            cluster,
            directory,
            behaviors,
            root_supervisor,
            config,
        })
    }

    /// Shut the root supervisor down (which shuts its children down in
    /// reverse declaration order), bounded by `shutdown_timeout` so a
    /// misbehaving child cannot block process exit.
    pub async fn stop(self) {
        self.stop_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    pub async fn stop_with_timeout(self, shutdown_timeout: Duration) {
        tracing::info!("stopping grove node");
        match tokio::time::timeout(
            shutdown_timeout,
            self.root_supervisor.stop(ExitReason::Shutdown),
        )
        .await
        {
            Ok(()) => tracing::info!("root supervisor stopped cleanly"),
            Err(_) => tracing::warn!(
                timeout_ms = shutdown_timeout.as_millis() as u64,
                "root supervisor shutdown timed out, forcing exit"
            ),
        }
    }
}
