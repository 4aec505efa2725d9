//! The supervisor engine itself.
//!
//! Modeled the same way a server is: one background task owns all mutable
//! state (the children list, the intensity tracker) and is driven by a
//! single `tokio::select!` over two inputs — the node's lifecycle bus (to
//! notice a child exit) and a command queue (`startChild`/`terminateChild`/
//! `restartChild`/`processTree`/`stop`). No locks are needed because
//! nothing outside the task ever touches the state directly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use grove_runtime::{LifecycleEvent, Observer, Runtime};
use grove_shared::{ExitReason, GroveError, GroveResult, ServerId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::child::{ChildHandle, ChildInfo, ChildSpec};
use crate::intensity::RestartIntensity;
use crate::strategy::RestartStrategy;
use crate::tree::{build_tree, SupervisorTree};

enum Command {
    StartChild(ChildSpec, oneshot::Sender<GroveResult<ServerId>>),
    TerminateChild(String, oneshot::Sender<GroveResult<()>>),
    RestartChild(String, oneshot::Sender<GroveResult<ServerId>>),
    Tree(oneshot::Sender<SupervisorTree>),
    Stop(ExitReason, oneshot::Sender<()>),
}

/// A handle to a running supervisor. Cheap to clone.
#[derive(Clone)]
pub struct SupervisorRef {
    commands: mpsc::UnboundedSender<Command>,
    failure: watch::Receiver<Option<GroveError>>,
}

impl SupervisorRef {
    /// Resolves once the supervisor itself fails with `MaxRestartsExceeded`,
    /// after it has already shut every child down. Never resolves if the
    /// supervisor instead shuts down cleanly via `stop()`.
    pub async fn wait_for_failure(&self) -> GroveError {
        let mut rx = self.failure.clone();
        loop {
            if let Some(err) = rx.borrow().clone() {
                return err;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub async fn start_child(&self, spec: ChildSpec) -> GroveResult<ServerId> {
        self.request(|reply| Command::StartChild(spec, reply)).await
    }

    pub async fn terminate_child(&self, id: impl Into<String>) -> GroveResult<()> {
        self.request(|reply| Command::TerminateChild(id.into(), reply))
            .await
    }

    pub async fn restart_child(&self, id: impl Into<String>) -> GroveResult<ServerId> {
        self.request(|reply| Command::RestartChild(id.into(), reply))
            .await
    }

    pub async fn process_tree(&self) -> SupervisorTree {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Tree(tx)).is_err() {
            return SupervisorTree { children: vec![] };
        }
        rx.await.unwrap_or(SupervisorTree { children: vec![] })
    }

    pub async fn stop(&self, reason: ExitReason) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Stop(reason, tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn request<T, F>(&self, make: F) -> GroveResult<T>
    where
        F: FnOnce(oneshot::Sender<GroveResult<T>>) -> Command,
    {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| GroveError::Terminated(ServerId::new()))?;
        rx.await.map_err(|_| GroveError::Terminated(ServerId::new()))?
    }
}

/// Start a supervisor over `children`, in declaration order. If any child
/// fails to start, the ones already started are shut down in reverse order
/// and the whole supervisor fails to start.
pub async fn start_supervisor(
    runtime: Arc<Runtime>,
    strategy: RestartStrategy,
    children: Vec<ChildSpec>,
    max_restarts: u32,
    within: Duration,
) -> GroveResult<SupervisorRef> {
    let mut infos: Vec<ChildInfo> = children.into_iter().map(ChildInfo::new).collect();
    let observer = Observer::new(runtime.clone());
    let mut lifecycle_rx = observer.subscribe();

    for idx in 0..infos.len() {
        match (infos[idx].spec.start)(runtime.clone()).await {
            Ok(handle) => infos[idx].handle = Some(handle),
            Err(err) => {
                for prior in (0..idx).rev() {
                    shutdown_child(&mut infos[prior], &mut lifecycle_rx).await;
                }
                return Err(err);
            }
        }
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (failure_tx, failure_rx) = watch::channel(None);
    let intensity = RestartIntensity::new(max_restarts, within);
    tokio::spawn(run_supervisor(
        runtime, strategy, infos, intensity, lifecycle_rx, cmd_rx, failure_tx,
    ));

    Ok(SupervisorRef {
        commands: cmd_tx,
        failure: failure_rx,
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_supervisor(
    runtime: Arc<Runtime>,
    strategy: RestartStrategy,
    mut children: Vec<ChildInfo>,
    intensity: RestartIntensity,
    mut lifecycle_rx: broadcast::Receiver<LifecycleEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    failure_tx: watch::Sender<Option<GroveError>>,
) {
    // Terminations the supervisor itself requested (teardown as part of a
    // group restart, a dynamic `terminateChild`, or shutdown); these must
    // not be mistaken for a crash and re-trigger a restart.
    let mut expected_exits: HashSet<ServerId> = HashSet::new();

    loop {
        tokio::select! {
            biased;
            event = lifecycle_rx.recv() => {
                match event {
                    Ok(LifecycleEvent::Terminated { id, reason }) => {
                        if expected_exits.remove(&id) {
                            continue;
                        }
                        let Some(idx) = find_by_server_id(&children, id) else { continue };
                        let abnormal = reason.is_abnormal();
                        if !handle_child_exit(
                            &runtime,
                            strategy,
                            &mut children,
                            &intensity,
                            &mut lifecycle_rx,
                            &mut expected_exits,
                            idx,
                            abnormal,
                        ).await {
                            shutdown_all(&mut children, &mut lifecycle_rx, &mut expected_exits).await;
                            tracing::error!("supervisor exceeded restart intensity, shutting down");
                            let _ = failure_tx.send(Some(GroveError::MaxRestartsExceeded {
                                restarts: intensity.max_restarts(),
                                within_ms: intensity.within().as_millis() as u64,
                            }));
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::StartChild(spec, reply)) => {
                        let result = do_start_child(&runtime, &mut children, spec).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::TerminateChild(id, reply)) => {
                        let result = do_terminate_child(&mut children, &mut lifecycle_rx, &mut expected_exits, &id).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::RestartChild(id, reply)) => {
                        let result = do_restart_child(&runtime, &mut children, &id).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Tree(reply)) => {
                        let observer = Observer::new(runtime.clone());
                        let snapshot = observer.snapshot();
                        let rows: Vec<(String, Option<ServerId>, u32)> = children
                            .iter()
                            .map(|c| (c.spec.id.clone(), c.handle.as_ref().map(|h| h.id()), c.restart_count))
                            .collect();
                        let _ = reply.send(build_tree(&rows, &snapshot.processes));
                    }
                    Some(Command::Stop(_reason, reply)) => {
                        shutdown_all(&mut children, &mut lifecycle_rx, &mut expected_exits).await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        shutdown_all(&mut children, &mut lifecycle_rx, &mut expected_exits).await;
                        return;
                    }
                }
            }
        }
    }
}

fn find_by_server_id(children: &[ChildInfo], id: ServerId) -> Option<usize> {
    children
        .iter()
        .position(|c| c.handle.as_ref().map(|h| h.id()) == Some(id))
}

fn find_by_child_id<'a>(children: &'a [ChildInfo], id: &str) -> Option<usize> {
    children.iter().position(|c| c.spec.id == id)
}

/// Returns `false` if the supervisor has exceeded its restart intensity and
/// must shut everything down.
#[allow(clippy::too_many_arguments)]
async fn handle_child_exit(
    runtime: &Arc<Runtime>,
    strategy: RestartStrategy,
    children: &mut Vec<ChildInfo>,
    intensity: &RestartIntensity,
    lifecycle_rx: &mut broadcast::Receiver<LifecycleEvent>,
    expected_exits: &mut HashSet<ServerId>,
    idx: usize,
    abnormal: bool,
) -> bool {
    if !children[idx].spec.should_restart(abnormal) {
        children[idx].handle = None;
        if children[idx].spec.restart == crate::child::RestartPolicy::Temporary {
            children.remove(idx);
        }
        return true;
    }

    let group = match strategy {
        RestartStrategy::OneForOne => vec![idx],
        RestartStrategy::OneForAll => (0..children.len()).collect::<Vec<_>>(),
        RestartStrategy::RestForOne => (idx..children.len()).collect::<Vec<_>>(),
    };

    // Tear down the rest of the group in reverse order (the exited child is
    // already dead and needs no teardown of its own).
    for &i in group.iter().rev() {
        if i == idx {
            continue;
        }
        if let Some(handle) = &children[i].handle {
            if handle.is_alive() {
                expected_exits.insert(handle.id());
            }
        }
        shutdown_child(&mut children[i], lifecycle_rx).await;
    }

    if intensity.record_restart() {
        return false;
    }

    // Restart the group in declaration order. Temporary members of the
    // group are dropped instead of restarted, matching the policy they'd
    // get if they had exited on their own.
    let mut removed = Vec::new();
    for &i in &group {
        if children[i].spec.restart == crate::child::RestartPolicy::Temporary {
            removed.push(i);
            continue;
        }
        match (children[i].spec.start)(runtime.clone()).await {
            Ok(handle) => {
                children[i].handle = Some(handle);
                children[i].restart_count += 1;
                runtime.record_restart();
            }
            Err(err) => {
                tracing::warn!(child = %children[i].spec.id, error = %err, "child failed to restart");
            }
        }
    }
    for i in removed.into_iter().rev() {
        children.remove(i);
    }
    true
}

async fn do_start_child(
    runtime: &Arc<Runtime>,
    children: &mut Vec<ChildInfo>,
    spec: ChildSpec,
) -> GroveResult<ServerId> {
    if find_by_child_id(children, &spec.id).is_some() {
        return Err(GroveError::DuplicateChild(spec.id));
    }
    let mut info = ChildInfo::new(spec);
    let handle = (info.spec.start)(runtime.clone()).await?;
    let id = handle.id();
    info.handle = Some(handle);
    children.push(info);
    Ok(id)
}

async fn do_terminate_child(
    children: &mut Vec<ChildInfo>,
    lifecycle_rx: &mut broadcast::Receiver<LifecycleEvent>,
    expected_exits: &mut HashSet<ServerId>,
    id: &str,
) -> GroveResult<()> {
    let idx = find_by_child_id(children, id).ok_or_else(|| GroveError::ChildNotFound(id.to_string()))?;
    if let Some(handle) = &children[idx].handle {
        if handle.is_alive() {
            expected_exits.insert(handle.id());
        }
    }
    shutdown_child(&mut children[idx], lifecycle_rx).await;
    if children[idx].spec.restart == crate::child::RestartPolicy::Temporary {
        children.remove(idx);
    }
    Ok(())
}

async fn do_restart_child(
    runtime: &Arc<Runtime>,
    children: &mut [ChildInfo],
    id: &str,
) -> GroveResult<ServerId> {
    let idx = find_by_child_id(children, id).ok_or_else(|| GroveError::ChildNotFound(id.to_string()))?;
    let handle = (children[idx].spec.start)(runtime.clone()).await?;
    let new_id = handle.id();
    children[idx].handle = Some(handle);
    children[idx].restart_count += 1;
    Ok(new_id)
}

async fn shutdown_all(
    children: &mut [ChildInfo],
    lifecycle_rx: &mut broadcast::Receiver<LifecycleEvent>,
    expected_exits: &mut HashSet<ServerId>,
) {
    for info in children.iter_mut().rev() {
        if let Some(handle) = &info.handle {
            if handle.is_alive() {
                expected_exits.insert(handle.id());
            }
        }
        shutdown_child(info, lifecycle_rx).await;
    }
}

/// Stop one child and wait (up to its `shutdownTimeout`) for its
/// `terminated` lifecycle event. On expiry the child is simply treated as
/// terminated from the supervisor's point of view, forcibly.
async fn shutdown_child(
    info: &mut ChildInfo,
    lifecycle_rx: &mut broadcast::Receiver<LifecycleEvent>,
) {
    let Some(handle) = info.handle.take() else {
        return;
    };
    if !handle.is_alive() {
        return;
    }
    let id = handle.id();
    let _ = handle.stop();

    let deadline = Instant::now() + info.spec.shutdown_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::warn!(child = %info.spec.id, "shutdown_timeout elapsed, treating child as terminated");
            return;
        }
        match tokio::time::timeout(remaining, lifecycle_rx.recv()).await {
            Ok(Ok(LifecycleEvent::Terminated { id: died, .. })) if died == id => return,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => return,
            Err(_) => {
                tracing::warn!(child = %info.spec.id, "shutdown_timeout elapsed, treating child as terminated");
                return;
            }
        }
    }
}
