//! Child specs and the type-erased handle a supervisor holds onto.
//!
//! A supervisor's children can each run a different `Behavior`, so the
//! supervisor cannot hold a `ServerRef<B>` directly — it holds a
//! `Box<dyn ChildHandle>` plus a boxed "start thunk" that knows how to
//! (re)create that specific child.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use grove_runtime::{start, Behavior, Runtime, ServerRef, StartOpts};
use grove_shared::{GroveResult, ServerId, ServerRef as RawRef};

/// How a child's exit should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart on every exit, including a normal one.
    Permanent,
    /// Restart only if the exit reason was abnormal.
    Transient,
    /// Never restart; removed from the supervisor's children on exit.
    Temporary,
}

/// Uniform, behavior-agnostic view of a running child.
pub trait ChildHandle: Send + Sync {
    fn id(&self) -> ServerId;
    fn raw(&self) -> RawRef;
    fn stop(&self) -> GroveResult<()>;
    fn is_alive(&self) -> bool;
}

impl<B: Behavior> ChildHandle for ServerRef<B> {
    fn id(&self) -> ServerId {
        ServerRef::id(self)
    }

    fn raw(&self) -> RawRef {
        ServerRef::raw(self)
    }

    fn stop(&self) -> GroveResult<()> {
        ServerRef::stop(self)
    }

    fn is_alive(&self) -> bool {
        ServerRef::is_alive(self)
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A "start-thunk": something a supervisor can call, and call again on
/// restart, to bring a child to life against a given `Runtime`.
pub type StartThunk =
    Arc<dyn Fn(Arc<Runtime>) -> BoxFuture<'static, GroveResult<Box<dyn ChildHandle>>> + Send + Sync>;

/// Build a `StartThunk` for a concrete `Behavior`. `make` is called once per
/// (re)start and must produce a fresh behavior instance and its init
/// argument; behaviors are not `Clone`, since they usually carry unique
/// collaborators (channels, clients) set up in `init`.
pub fn child_of<B, F>(behavior_name: &'static str, name: Option<String>, make: F) -> StartThunk
where
    B: Behavior,
    F: Fn() -> (B, B::InitArg) + Send + Sync + 'static,
{
    Arc::new(move |runtime: Arc<Runtime>| {
        let (behavior, init_arg) = make();
        let name = name.clone();
        Box::pin(async move {
            let mut opts = StartOpts::new(init_arg, behavior_name);
            if let Some(name) = name {
                opts = opts.named(name);
            }
            let server_ref = start(&runtime, behavior, opts).await?;
            Ok(Box::new(server_ref) as Box<dyn ChildHandle>)
        })
    })
}

/// Declarative description of one supervised child.
#[derive(Clone)]
pub struct ChildSpec {
    pub id: String,
    pub start: StartThunk,
    pub restart: RestartPolicy,
    pub shutdown_timeout: Duration,
}

impl ChildSpec {
    pub fn new(id: impl Into<String>, restart: RestartPolicy, start: StartThunk) -> Self {
        Self {
            id: id.into(),
            start,
            restart,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn should_restart(&self, abnormal: bool) -> bool {
        match self.restart {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => abnormal,
            RestartPolicy::Temporary => false,
        }
    }
}

/// Runtime record for one child.
pub(crate) struct ChildInfo {
    pub spec: ChildSpec,
    pub handle: Option<Box<dyn ChildHandle>>,
    pub restart_count: u32,
}

impl ChildInfo {
    pub fn new(spec: ChildSpec) -> Self {
        Self {
            spec,
            handle: None,
            restart_count: 0,
        }
    }
}
