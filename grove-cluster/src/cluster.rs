//! The `Cluster`: wires membership, transport, the behavior registry, the
//! directory and the global registry together into one node-wide handle.
//!
//! Every other module in this crate is a passive data structure or a pure
//! protocol function; `Cluster` is the only thing that owns background
//! tasks. It is built the same way `grove-runtime::server` and
//! `grove-supervisor::supervisor` are: a handful of long-lived tasks, each
//! driven by a single `tokio::select!`, communicating over channels rather
//! than shared locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use grove_runtime::{LifecycleEvent, Observer, Runtime};
use grove_shared::{
    CorrelationId, ExitReason, GroveError, GroveResult, MonitorId, NodeConfig, NodeId, ServerId,
    ServerRef,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::behavior_registry::BehaviorRegistry;
use crate::directory::ServerDirectory;
use crate::global_registry::GlobalRegistry;
use crate::membership::{DownReason, Membership};
use crate::peer::{dial, handshake, now_ms, spawn_peer_tasks, PeerConnection};
use crate::wire::{Frame, GlobalEntryWire, RegistrationKind, SpawnOptions};

/// `nodeUp`/`nodeDown` events, published to anything that subscribes via
/// `Cluster::subscribe_node_events`.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Up(NodeId),
    Down(NodeId, DownReason),
}

struct PendingCall {
    node: NodeId,
    reply: oneshot::Sender<GroveResult<Value>>,
}

struct PendingSpawn {
    node: NodeId,
    reply: oneshot::Sender<GroveResult<ServerId>>,
}

struct PendingMonitorInstall {
    node: NodeId,
    reply: oneshot::Sender<MonitorId>,
}

/// An outgoing `monitor()` call this node made against a server on another
/// node; tracked so a `process_down` frame (or that node going down) can be
/// delivered to the right local watcher.
struct OutgoingRemoteMonitor {
    watcher: ServerId,
    target: ServerId,
    node: NodeId,
}

/// One node's worth of distribution state: transport, membership, the
/// gossiped global registry, the behavior registry and remote spawn, and
/// remote call/cast/monitor plumbing.
pub struct Cluster {
    pub here: NodeId,
    pub runtime: Arc<Runtime>,
    pub directory: Arc<ServerDirectory>,
    pub behaviors: Arc<BehaviorRegistry>,
    pub globals: Arc<GlobalRegistry>,
    config: Arc<NodeConfig>,
    membership: Arc<Membership>,
    peers: Arc<DashMap<NodeId, PeerConnection>>,
    pending_calls: Arc<DashMap<CorrelationId, PendingCall>>,
    pending_spawns: Arc<DashMap<CorrelationId, PendingSpawn>>,
    pending_monitor_installs: Arc<DashMap<CorrelationId, PendingMonitorInstall>>,
    outgoing_remote_monitors: Arc<DashMap<MonitorId, OutgoingRemoteMonitor>>,
    inbound_tx: mpsc::UnboundedSender<(NodeId, Frame)>,
    disconnect_tx: mpsc::UnboundedSender<NodeId>,
    node_events: broadcast::Sender<NodeEvent>,
    next_epoch: AtomicU64,
}

impl Cluster {
    /// Bring up a node: bind the listener, dial configured seeds, and start
    /// the heartbeat, dispatch and disconnect-handling background tasks.
    pub async fn start(
        config: NodeConfig,
        runtime: Arc<Runtime>,
        directory: Arc<ServerDirectory>,
        behaviors: Arc<BehaviorRegistry>,
    ) -> GroveResult<Arc<Cluster>> {
        let here = NodeId::new(config.node_name.clone(), config.host.clone(), config.port);
        let config = Arc::new(config);

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(GroveError::from)?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let (node_events, _) = broadcast::channel(256);

        let cluster = Arc::new(Cluster {
            here,
            runtime,
            directory,
            behaviors,
            globals: Arc::new(GlobalRegistry::new()),
            config,
            membership: Arc::new(Membership::new()),
            peers: Arc::new(DashMap::new()),
            pending_calls: Arc::new(DashMap::new()),
            pending_spawns: Arc::new(DashMap::new()),
            pending_monitor_installs: Arc::new(DashMap::new()),
            outgoing_remote_monitors: Arc::new(DashMap::new()),
            inbound_tx,
            disconnect_tx,
            node_events,
            next_epoch: AtomicU64::new(0),
        });

        tokio::spawn(cluster.clone().run_accept_loop(listener));
        tokio::spawn(cluster.clone().run_dispatch_loop(inbound_rx));
        tokio::spawn(cluster.clone().run_disconnect_loop(disconnect_rx));
        tokio::spawn(cluster.clone().run_heartbeat_loop());
        tokio::spawn(cluster.clone().run_remote_death_forwarder());

        for seed in cluster.config.seeds.clone() {
            match seed.parse::<NodeId>() {
                Ok(node_id) => {
                    let cluster = cluster.clone();
                    tokio::spawn(async move { cluster.dial_with_backoff(node_id).await });
                }
                Err(err) => {
                    tracing::warn!(seed = %seed, error = %err, "ignoring unparseable seed");
                }
            }
        }

        Ok(cluster)
    }

    pub fn subscribe_node_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.node_events.subscribe()
    }

    pub fn known_nodes(&self) -> Vec<NodeId> {
        self.membership.known_nodes()
    }

    pub fn is_connected(&self, node: &NodeId) -> bool {
        self.membership.is_connected(node)
    }

    // ---- outbound: dialing & accepting ----

    async fn run_accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let cluster = self.clone();
            tokio::spawn(async move {
                cluster.accept_one(stream, addr).await;
            });
        }
    }

    async fn accept_one(self: Arc<Self>, mut stream: TcpStream, addr: std::net::SocketAddr) {
        match handshake(&mut stream, &self.config, &self.here, false).await {
            Ok(node_id) => self.register_peer(node_id, stream).await,
            Err(err) => {
                tracing::warn!(peer = %addr, error = %err, "inbound handshake failed");
            }
        }
    }

    /// Keep dialing `node_id` with exponential backoff until connected;
    /// called once per configured seed, and re-entered whenever that seed
    /// disconnects.
    async fn dial_with_backoff(self: Arc<Self>, node_id: NodeId) {
        if self.here == node_id || self.membership.is_connected(&node_id) {
            return;
        }
        let mut backoff = grove_shared::resilience::Backoff::new(
            self.config.reconnect_delay(),
            self.config.max_reconnect_delay(),
            self.config.reconnect_backoff_multiplier,
        );
        self.membership.mark_connecting(&node_id);
        loop {
            match dial(
                node_id.clone(),
                &self.here,
                self.config.clone(),
                self.inbound_tx.clone(),
                self.disconnect_tx.clone(),
            )
            .await
            {
                Ok(conn) => {
                    self.peers.insert(node_id.clone(), conn);
                    self.membership.mark_connected(&node_id, now_ms());
                    let _ = self.node_events.send(NodeEvent::Up(node_id.clone()));
                    tracing::info!(node = %node_id, "connected to peer");
                    self.send_gossip(&node_id);
                    return;
                }
                Err(err) => {
                    tracing::warn!(node = %node_id, error = %err, "dial failed, backing off");
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    /// Register a freshly handshaken connection, rejecting a duplicate
    /// node id that is already connected.
    async fn register_peer(self: Arc<Self>, node_id: NodeId, stream: TcpStream) {
        if self.peers.contains_key(&node_id) {
            tracing::warn!(node = %node_id, "rejecting duplicate connection from already-connected node");
            return;
        }
        let conn = spawn_peer_tasks(
            node_id.clone(),
            stream,
            self.inbound_tx.clone(),
            self.disconnect_tx.clone(),
        );
        self.peers.insert(node_id.clone(), conn);
        self.membership.mark_connected(&node_id, now_ms());
        let _ = self.node_events.send(NodeEvent::Up(node_id.clone()));
        tracing::info!(node = %node_id, "accepted peer connection");
        self.send_gossip(&node_id);
        self.send_full_registry_sync(&node_id);
    }

    fn send_gossip(&self, to: &NodeId) {
        let mut peers = self.membership.known_nodes();
        peers.push(self.here.clone());
        self.send_to(to, Frame::PeerList { peers });
    }

    fn send_full_registry_sync(&self, to: &NodeId) {
        let entries = self.globals.owned_snapshot(&self.here);
        self.send_to(
            to,
            Frame::RegistrySync {
                entries,
                full_sync: true,
            },
        );
    }

    fn send_to(&self, node: &NodeId, frame: Frame) -> bool {
        match self.peers.get(node) {
            Some(peer) => peer.outbound.send(frame).is_ok(),
            None => false,
        }
    }

    // ---- heartbeats & failure detection ----

    async fn run_heartbeat_loop(self: Arc<Self>) {
        let interval = self.config.heartbeat_interval();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            for node in self.membership.known_nodes() {
                if self.membership.is_connected(&node) {
                    self.send_to(
                        &node,
                        Frame::Heartbeat {
                            node_id: self.here.clone(),
                            epoch_ms: epoch,
                        },
                    );
                }
            }
            let newly_down = self.membership.sweep_missed_heartbeats(
                now_ms(),
                self.config.heartbeat_interval_ms,
                self.config.heartbeat_miss_threshold,
            );
            for node in newly_down {
                self.handle_node_down(node, DownReason::Timeout).await;
            }
        }
    }

    async fn run_disconnect_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<NodeId>) {
        while let Some(node) = rx.recv().await {
            self.handle_node_down(node, DownReason::Disconnect).await;
        }
    }

    /// Tear down everything this node tracked about `node`: fail pending
    /// calls/spawns, fire outstanding remote monitors with `NoConnection`,
    /// evict its global registry entries, drop the peer connection, emit
    /// `nodeDown`, and reconnect if it is a configured seed.
    async fn handle_node_down(self: Arc<Self>, node: NodeId, reason: DownReason) {
        if self.peers.remove(&node).is_none() && !self.membership.is_connected(&node) {
            return;
        }
        self.membership.mark_disconnected(&node);
        tracing::warn!(node = %node, reason = ?reason, "node down");
        let _ = self.node_events.send(NodeEvent::Down(node.clone(), reason));

        let dead_calls: Vec<CorrelationId> = self
            .pending_calls
            .iter()
            .filter(|e| e.value().node == node)
            .map(|e| *e.key())
            .collect();
        for id in dead_calls {
            if let Some((_, pending)) = self.pending_calls.remove(&id) {
                let _ = pending.reply.send(Err(GroveError::NoConnection(node.clone())));
            }
        }

        let dead_spawns: Vec<CorrelationId> = self
            .pending_spawns
            .iter()
            .filter(|e| e.value().node == node)
            .map(|e| *e.key())
            .collect();
        for id in dead_spawns {
            if let Some((_, pending)) = self.pending_spawns.remove(&id) {
                let _ = pending.reply.send(Err(GroveError::NoConnection(node.clone())));
            }
        }

        let orphaned_monitors: Vec<MonitorId> = self
            .outgoing_remote_monitors
            .iter()
            .filter(|e| e.value().node == node)
            .map(|e| *e.key())
            .collect();
        for monitor in orphaned_monitors {
            if let Some((_, pending)) = self.outgoing_remote_monitors.remove(&monitor) {
                self.runtime.deliver_process_down(
                    monitor,
                    ServerRef::local(pending.watcher),
                    ServerRef::remote(pending.target, node.clone()),
                    ExitReason::NoConnection,
                );
            }
        }

        self.globals.evict_node(&node);

        if self
            .config
            .seeds
            .iter()
            .any(|s| s.parse::<NodeId>().ok().as_ref() == Some(&node))
        {
            let cluster = self.clone();
            tokio::spawn(async move { cluster.dial_with_backoff(node).await });
        }
    }

    /// Forward a local server's death to any remote watcher, by noticing
    /// `ProcessDown` lifecycle events whose recorded watcher lives on
    /// another node. Reuses the same monitor graph and lifecycle bus the
    /// local runtime already maintains; no separate remote-monitor
    /// bookkeeping is needed on the target side.
    async fn run_remote_death_forwarder(self: Arc<Self>) {
        let observer = Observer::new(self.runtime.clone());
        let mut events = observer.subscribe();
        loop {
            match events.recv().await {
                Ok(LifecycleEvent::ProcessDown {
                    monitor,
                    watcher,
                    reason,
                    ..
                }) => {
                    if let Some(node) = watcher.node() {
                        if node != &self.here {
                            self.send_to(node, Frame::ProcessDown { monitor, reason });
                        }
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    // ---- inbound dispatch ----

    async fn run_dispatch_loop(
        self: Arc<Self>,
        mut inbound_rx: mpsc::UnboundedReceiver<(NodeId, Frame)>,
    ) {
        while let Some((from, frame)) = inbound_rx.recv().await {
            let cluster = self.clone();
            tokio::spawn(async move { cluster.dispatch_frame(from, frame).await });
        }
    }

    async fn dispatch_frame(self: Arc<Self>, from: NodeId, frame: Frame) {
        match frame {
            Frame::Handshake { .. } => {
                tracing::warn!(node = %from, "unexpected handshake frame after connection established");
            }
            Frame::PeerList { peers } => {
                for peer in peers {
                    if peer != self.here
                        && !self.membership.contains(&peer)
                        && !self.peers.contains_key(&peer)
                    {
                        let cluster = self.clone();
                        tokio::spawn(async move { cluster.dial_with_backoff(peer).await });
                    }
                }
            }
            Frame::Heartbeat { epoch_ms, .. } => {
                self.membership.record_heartbeat(&from, now_ms());
                let _ = epoch_ms;
            }
            Frame::Call {
                correlation,
                target,
                payload,
            } => {
                let result = match self.directory.get(target) {
                    Some(handle) => handle
                        .call_json(payload, self.config.default_call_timeout())
                        .await
                        .map_err(|e| e.to_string()),
                    None => Err(GroveError::NoProcess(target).to_string()),
                };
                self.send_to(&from, Frame::CallReply { correlation, result });
            }
            Frame::CallReply { correlation, result } => {
                if let Some((_, pending)) = self.pending_calls.remove(&correlation) {
                    let _ = pending.reply.send(result.map_err(GroveError::CalleeError));
                }
            }
            Frame::Cast { target, payload } => {
                if let Some(handle) = self.directory.get(target) {
                    let _ = handle.cast_json(payload);
                }
            }
            Frame::Spawn {
                correlation,
                behavior_name,
                options,
            } => {
                let result = self
                    .behaviors
                    .spawn(
                        &behavior_name,
                        self.runtime.clone(),
                        self.directory.clone(),
                        &self.globals,
                        &self.here,
                        options,
                    )
                    .await
                    .map_err(|e| e.to_string());
                self.send_to(&from, Frame::SpawnReply { correlation, result });
            }
            Frame::SpawnReply { correlation, result } => {
                if let Some((_, pending)) = self.pending_spawns.remove(&correlation) {
                    let _ = pending.reply.send(result.map_err(GroveError::CalleeError));
                }
            }
            Frame::MonitorInstall {
                correlation,
                watcher,
                target,
            } => {
                let monitor = self
                    .runtime
                    .monitor(ServerRef::remote(watcher, from.clone()), target);
                self.send_to(&from, Frame::MonitorReply { correlation, monitor });
            }
            Frame::MonitorReply { correlation, monitor } => {
                if let Some((_, pending)) = self.pending_monitor_installs.remove(&correlation) {
                    let _ = pending.reply.send(monitor);
                }
            }
            Frame::ProcessDown { monitor, reason } => {
                if let Some((_, pending)) = self.outgoing_remote_monitors.remove(&monitor) {
                    self.runtime.deliver_process_down(
                        monitor,
                        ServerRef::local(pending.watcher),
                        ServerRef::remote(pending.target, pending.node),
                        reason,
                    );
                }
            }
            Frame::Demonitor { monitor } => {
                self.runtime.demonitor(monitor);
            }
            Frame::RegistrySync { entries, full_sync } => {
                if full_sync {
                    self.globals.apply_full_sync(&from, &entries);
                } else {
                    for entry in &entries {
                        self.globals.apply_incoming(entry);
                    }
                }
            }
            Frame::RegistryUnregister { name } => {
                self.globals.unregister(&name, &from);
            }
        }
    }

    // ---- public remote operations ----

    /// Correlated remote call. `target` must carry a `NodeId`.
    pub async fn remote_call<M: Serialize, R: DeserializeOwned>(
        &self,
        target: &ServerRef,
        msg: M,
        timeout: Duration,
    ) -> GroveResult<R> {
        let node = target
            .node()
            .cloned()
            .ok_or_else(|| GroveError::UnknownNode(self.here.clone()))?;
        if !self.membership.is_connected(&node) {
            return Err(GroveError::NoConnection(node));
        }
        let payload = serde_json::to_value(msg)?;
        let correlation = CorrelationId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending_calls.insert(
            correlation,
            PendingCall {
                node: node.clone(),
                reply: reply_tx,
            },
        );

        if !self.send_to(
            &node,
            Frame::Call {
                correlation,
                target: target.id(),
                payload,
            },
        ) {
            self.pending_calls.remove(&correlation);
            return Err(GroveError::NoConnection(node));
        }

        let value = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(GroveError::NoConnection(node)),
            Err(_) => {
                self.pending_calls.remove(&correlation);
                return Err(GroveError::Timeout);
            }
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Fire-and-forget remote cast. Silently dropped if the target node is
    /// unreachable.
    pub fn remote_cast<M: Serialize>(&self, target: &ServerRef, msg: M) -> GroveResult<()> {
        let node = target
            .node()
            .cloned()
            .ok_or_else(|| GroveError::UnknownNode(self.here.clone()))?;
        let payload = serde_json::to_value(msg)?;
        self.send_to(
            &node,
            Frame::Cast {
                target: target.id(),
                payload,
            },
        );
        Ok(())
    }

    /// Spawn a server on `node` by behavior name.
    pub async fn remote_spawn(
        &self,
        behavior_name: &str,
        node: NodeId,
        name: Option<String>,
        registration: Option<RegistrationKind>,
        init_args: Value,
    ) -> GroveResult<ServerRef> {
        if !self.membership.is_connected(&node) {
            return Err(GroveError::NoConnection(node));
        }
        let correlation = CorrelationId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending_spawns.insert(
            correlation,
            PendingSpawn {
                node: node.clone(),
                reply: reply_tx,
            },
        );
        self.send_to(
            &node,
            Frame::Spawn {
                correlation,
                behavior_name: behavior_name.to_string(),
                options: SpawnOptions {
                    name,
                    registration,
                    init_args,
                },
            },
        );
        match reply_rx.await {
            Ok(Ok(id)) => Ok(ServerRef::remote(id, node)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(GroveError::NoConnection(node)),
        }
    }

    /// Monitor a server on another node.
    pub async fn remote_monitor(&self, watcher: ServerId, target: &ServerRef) -> GroveResult<MonitorId> {
        let node = target
            .node()
            .cloned()
            .ok_or_else(|| GroveError::UnknownNode(self.here.clone()))?;
        if !self.membership.is_connected(&node) {
            return Err(GroveError::NoConnection(node));
        }
        let correlation = CorrelationId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending_monitor_installs.insert(
            correlation,
            PendingMonitorInstall {
                node: node.clone(),
                reply: reply_tx,
            },
        );
        self.send_to(
            &node,
            Frame::MonitorInstall {
                correlation,
                watcher,
                target: target.id(),
            },
        );
        let monitor = reply_rx
            .await
            .map_err(|_| GroveError::NoConnection(node.clone()))?;
        self.outgoing_remote_monitors.insert(
            monitor,
            OutgoingRemoteMonitor {
                watcher,
                target: target.id(),
                node: node.clone(),
            },
        );
        Ok(monitor)
    }

    /// Cancel a remote monitor. Best-effort: if the socket is down the
    /// monitor is still removed locally so no stale watcher is left around.
    pub fn remote_demonitor(&self, monitor: MonitorId) {
        if let Some((_, pending)) = self.outgoing_remote_monitors.remove(&monitor) {
            self.send_to(&pending.node, Frame::Demonitor { monitor });
        }
    }

    /// Register a global name for a locally running server.
    pub fn register_global(&self, name: &str, server_id: ServerId) -> GroveResult<()> {
        self.globals.register(name, server_id, self.here.clone())?;
        if let Some(entry) = self.globals.owned_entries(&self.here, name) {
            self.broadcast(Frame::RegistrySync {
                entries: vec![entry],
                full_sync: false,
            });
        }
        Ok(())
    }

    /// Release a global name this node owns, broadcasting an explicit
    /// `registry_unregister` frame rather than relying solely on
    /// `nodeDown` cleanup.
    pub fn unregister_global(&self, name: &str) {
        self.globals.unregister(name, &self.here);
        self.broadcast(Frame::RegistryUnregister {
            name: name.to_string(),
        });
    }

    pub fn whereis(&self, name: &str) -> Option<ServerRef> {
        self.globals.whereis(name)
    }

    fn broadcast(&self, frame: Frame) {
        for entry in self.peers.iter() {
            let _ = entry.value().outbound.send(frame.clone());
        }
    }
}
