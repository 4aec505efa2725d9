//! The `Behavior` trait: a server's callbacks.

use async_trait::async_trait;
use grove_shared::{ExitReason, ServerRef};

/// A server's behavior: the callbacks that define how it responds to
/// `init`, `call`, `cast`, link exits, and termination.
///
/// Implementors own their state type; the runtime never inspects it. This
/// mirrors Erlang's `gen_server` callback module, adapted to Rust's type
/// system: instead of one dynamically-typed mailbox, each behavior gets its
/// own strongly-typed `ServerRef<B>`.
#[async_trait]
pub trait Behavior: Send + 'static {
    type State: Send + 'static;
    type InitArg: Send + 'static;
    type CallMsg: Send + 'static;
    type CastMsg: Send + 'static;
    type Reply: Send + 'static;

    /// Runs once at startup. Failure here never registers the server and is
    /// reported to the caller of `start` as `InitializationError` (§4.2).
    async fn init(&mut self, arg: Self::InitArg) -> Result<Self::State, String>;

    /// Handle a synchronous call. Returns the reply and the new state.
    async fn handle_call(
        &mut self,
        msg: Self::CallMsg,
        state: Self::State,
    ) -> (Self::Reply, Self::State);

    /// Handle a fire-and-forget cast. Returns the new state.
    async fn handle_cast(&mut self, msg: Self::CastMsg, state: Self::State) -> Self::State;

    /// Runs once during shutdown, with the same serialization guarantee as
    /// `handle_call`/`handle_cast`. Any panic here is swallowed (§4.2).
    async fn terminate(&mut self, _reason: ExitReason, _state: Self::State) {}

    /// Whether this server wants link exits delivered as a normal callback
    /// (`handle_link_exit`) instead of dying with the peer (§4.4 `trapExits`).
    fn traps_exits(&self) -> bool {
        false
    }

    /// Only called when `traps_exits()` is true. Default behavior for a
    /// server that opts in without overriding this is to ignore the exit
    /// and keep running.
    async fn handle_link_exit(
        &mut self,
        _from: ServerRef,
        _reason: ExitReason,
        state: Self::State,
    ) -> Self::State {
        state
    }

    /// Called when a process this server `monitor()`-ed goes down. Default
    /// is a no-op; override to react to a watched peer's death in-band.
    async fn handle_process_down(
        &mut self,
        _monitor: grove_shared::MonitorId,
        _target: ServerRef,
        _reason: ExitReason,
        state: Self::State,
    ) -> Self::State {
        state
    }
}
