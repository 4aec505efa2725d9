//! Spawning and driving a server task: `start`, the init/loop cycle,
//! call/cast dispatch, and exit handling.
//!
//! Each server is one tokio task running `run_server`, owned exclusively by
//! that task (no `Mutex<State>`): the task pulls from its control queue and
//! its typed user queue with a single `tokio::select!`, so every callback
//! invocation is already serialized by construction — a single-writer event
//! loop rather than a lock.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use grove_shared::{
    CorrelationId, ExitReason, GroveError, GroveResult, MonitorId, ServerId, ServerRef as RawRef,
};
use tokio::sync::{mpsc, oneshot};

use crate::behavior::Behavior;
use crate::lifecycle_bus::LifecycleEvent;
use crate::mailbox::{ControlMsg, UserEnvelope};
use crate::process_table::{LifecycleState, ProcessEntry};
use crate::runtime::Runtime;

/// Options accepted by `start`.
pub struct StartOpts<Arg> {
    pub init_arg: Arg,
    pub name: Option<String>,
    pub behavior_name: &'static str,
    pub link_to: Option<ServerId>,
}

impl<Arg> StartOpts<Arg> {
    pub fn new(init_arg: Arg, behavior_name: &'static str) -> Self {
        Self {
            init_arg,
            name: None,
            behavior_name,
            link_to: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn linked_to(mut self, target: ServerId) -> Self {
        self.link_to = Some(target);
        self
    }
}

/// A strongly-typed handle to a running server. Cheap to clone; every clone
/// shares the same underlying queues.
pub struct ServerRef<B: Behavior> {
    id: ServerId,
    user_tx: mpsc::UnboundedSender<UserEnvelope<B>>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    runtime: Arc<Runtime>,
}

impl<B: Behavior> Clone for ServerRef<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            user_tx: self.user_tx.clone(),
            control_tx: self.control_tx.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<B: Behavior> ServerRef<B> {
    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn raw(&self) -> RawRef {
        RawRef::local(self.id)
    }

    /// Synchronous request/reply. Waits for the reply or `timeout`,
    /// whichever comes first.
    pub async fn call(
        &self,
        msg: B::CallMsg,
        timeout: std::time::Duration,
    ) -> GroveResult<B::Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let correlation = CorrelationId::new();
        self.user_tx
            .send(UserEnvelope::Call {
                correlation,
                msg,
                reply: reply_tx,
            })
            .map_err(|_| GroveError::Terminated(self.id))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GroveError::Terminated(self.id)),
            Err(_) => Err(GroveError::Timeout),
        }
    }

    /// Fire-and-forget. Never blocks on the callee.
    pub fn cast(&self, msg: B::CastMsg) -> GroveResult<()> {
        self.user_tx
            .send(UserEnvelope::Cast { msg })
            .map_err(|_| GroveError::Terminated(self.id))
    }

    /// Requests shutdown with `ExitReason::Shutdown`. The server finishes
    /// whatever it is currently handling first.
    pub fn stop(&self) -> GroveResult<()> {
        self.control_tx
            .send(ControlMsg::Stop(ExitReason::Shutdown))
            .map_err(|_| GroveError::Terminated(self.id))
    }

    pub fn monitor(&self, watcher: RawRef) -> MonitorId {
        self.runtime.monitor(watcher, self.id)
    }

    pub fn link(&self, other: ServerId) {
        self.runtime.link(self.id, other);
    }

    pub fn is_alive(&self) -> bool {
        self.runtime.is_alive(self.id)
    }
}

/// Start a new server running `behavior`.
///
/// The process table entry is inserted *before* `init` runs, in the
/// `Starting` state, so a concurrent `snapshot()` can observe a server that
/// is still initializing. If `init` fails the entry is removed again and
/// the caller gets `InitializationError`; nothing is ever registered under
/// a name for a server that never became `Running`.
pub async fn start<B: Behavior>(
    runtime: &Arc<Runtime>,
    behavior: B,
    opts: StartOpts<B::InitArg>,
) -> GroveResult<ServerRef<B>> {
    let id = ServerId::new();
    let (user_tx, user_rx) = mpsc::unbounded_channel::<UserEnvelope<B>>();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<ControlMsg>();

    let entry = Arc::new(ProcessEntry::new(opts.behavior_name, control_tx.clone()));
    runtime.processes.insert(id, entry.clone());

    if let Some(target) = opts.link_to {
        runtime.link(id, target);
    }

    let (ready_tx, ready_rx) = oneshot::channel::<GroveResult<()>>();

    let runtime_for_task = runtime.clone();
    tokio::spawn(run_server::<B>(
        runtime_for_task,
        id,
        entry,
        behavior,
        opts.init_arg,
        user_rx,
        control_rx,
        ready_tx,
    ));

    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err),
        Err(_) => return Err(GroveError::InitializationError("init task dropped".into())),
    }

    if let Some(name) = opts.name {
        if let Err(err) = runtime.registry.register(&name, id) {
            // Name collision after a successful init: tear the server back
            // down rather than leave an unreachable, unnamed orphan.
            let _ = control_tx.send(ControlMsg::Stop(ExitReason::Error(
                "name registration failed".into(),
            )));
            return Err(err);
        }
        if let Some(live) = runtime.processes.get(id) {
            live.set_name(Some(name.clone()));
        }
        runtime.lifecycle_bus().publish(LifecycleEvent::Started {
            id,
            name: Some(name),
        });
    } else {
        runtime
            .lifecycle_bus()
            .publish(LifecycleEvent::Started { id, name: None });
    }

    Ok(ServerRef {
        id,
        user_tx,
        control_tx,
        runtime: runtime.clone(),
    })
}

/// The task loop itself: run `init`, signal readiness, then alternate
/// between the control queue and the user queue until told to stop or the
/// user queue closes (every `ServerRef` dropped).
#[allow(clippy::too_many_arguments)]
async fn run_server<B: Behavior>(
    runtime: Arc<Runtime>,
    id: ServerId,
    entry: Arc<ProcessEntry>,
    mut behavior: B,
    init_arg: B::InitArg,
    mut user_rx: mpsc::UnboundedReceiver<UserEnvelope<B>>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
    ready_tx: oneshot::Sender<GroveResult<()>>,
) {
    let mut state = match run_init(&mut behavior, init_arg).await {
        Ok(state) => {
            let _ = ready_tx.send(Ok(()));
            state
        }
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            runtime.processes.remove(id);
            return;
        }
    };

    entry.set_lifecycle_state(LifecycleState::Running);

    let exit_reason = loop {
        tokio::select! {
            biased;
            control = control_rx.recv() => {
                match control {
                    Some(ControlMsg::Stop(reason)) => break reason,
                    Some(ControlMsg::LinkExit(from, reason)) => {
                        if behavior.traps_exits() {
                            match run_link_exit(&mut behavior, from, reason, state).await {
                                Ok(next_state) => state = next_state,
                                Err(err) => break ExitReason::Error(err),
                            }
                        } else {
                            break reason;
                        }
                    }
                    Some(ControlMsg::ProcessDown(monitor, target, reason)) => {
                        match run_process_down(&mut behavior, monitor, target, reason, state).await {
                            Ok(next_state) => state = next_state,
                            Err(err) => break ExitReason::Error(err),
                        }
                    }
                    None => break ExitReason::Shutdown,
                }
            }
            envelope = user_rx.recv() => {
                match envelope {
                    Some(UserEnvelope::Call { msg, reply, .. }) => {
                        entry.record_message();
                        runtime.record_message();
                        match run_call(&mut behavior, msg, state).await {
                            Ok((response, next_state)) => {
                                state = next_state;
                                let _ = reply.send(Ok(response));
                            }
                            Err(err) => {
                                let _ = reply.send(Err(GroveError::CalleeError(err.clone())));
                                break ExitReason::Error(err);
                            }
                        }
                    }
                    Some(UserEnvelope::Cast { msg }) => {
                        entry.record_message();
                        runtime.record_message();
                        match run_cast(&mut behavior, msg, state).await {
                            Ok(next_state) => state = next_state,
                            Err(err) => break ExitReason::Error(err),
                        }
                    }
                    None => break ExitReason::Normal,
                }
            }
        }
    };

    entry.set_lifecycle_state(LifecycleState::Terminating);
    run_terminate(&mut behavior, exit_reason.clone(), state).await;
    runtime.finalize_termination(id, exit_reason);
}

/// Every callback invocation below is wrapped in `catch_unwind`: a panic
/// inside a behavior's callback is treated as an abnormal exit (the closest
/// Rust analogue to an uncaught exception unwinding a callback), rather
/// than taking the whole process down with it.

async fn run_init<B: Behavior>(behavior: &mut B, arg: B::InitArg) -> GroveResult<B::State> {
    match AssertUnwindSafe(behavior.init(arg)).catch_unwind().await {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(msg)) => Err(GroveError::InitializationError(msg)),
        Err(payload) => Err(GroveError::InitializationError(panic_message(payload))),
    }
}

async fn run_call<B: Behavior>(
    behavior: &mut B,
    msg: B::CallMsg,
    state: B::State,
) -> Result<(B::Reply, B::State), String> {
    match AssertUnwindSafe(behavior.handle_call(msg, state))
        .catch_unwind()
        .await
    {
        Ok(result) => Ok(result),
        Err(payload) => Err(panic_message(payload)),
    }
}

async fn run_cast<B: Behavior>(
    behavior: &mut B,
    msg: B::CastMsg,
    state: B::State,
) -> Result<B::State, String> {
    match AssertUnwindSafe(behavior.handle_cast(msg, state))
        .catch_unwind()
        .await
    {
        Ok(state) => Ok(state),
        Err(payload) => Err(panic_message(payload)),
    }
}

async fn run_link_exit<B: Behavior>(
    behavior: &mut B,
    from: RawRef,
    reason: ExitReason,
    state: B::State,
) -> Result<B::State, String> {
    match AssertUnwindSafe(behavior.handle_link_exit(from, reason, state))
        .catch_unwind()
        .await
    {
        Ok(state) => Ok(state),
        Err(payload) => Err(panic_message(payload)),
    }
}

async fn run_process_down<B: Behavior>(
    behavior: &mut B,
    monitor: MonitorId,
    target: RawRef,
    reason: ExitReason,
    state: B::State,
) -> Result<B::State, String> {
    match AssertUnwindSafe(behavior.handle_process_down(monitor, target, reason, state))
        .catch_unwind()
        .await
    {
        Ok(state) => Ok(state),
        Err(payload) => Err(panic_message(payload)),
    }
}

async fn run_terminate<B: Behavior>(behavior: &mut B, reason: ExitReason, state: B::State) {
    let _ = AssertUnwindSafe(behavior.terminate(reason, state))
        .catch_unwind()
        .await;
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}
