//! Envelope types for a server's mailbox.
//!
//! A server's mailbox is really two FIFO queues: a typed "user" queue
//! (`Call`/`Cast`, specific to the server's `Behavior`) and an untyped
//! "control" queue (`Stop`/`LinkExit`/`ProcessDown`, common to every
//! server). FIFO ordering only needs to hold *within one mechanism* (two
//! casts from the same sender, or two calls), so two queues drained by a
//! single `select!` loop are sufficient while keeping the system-message
//! path free of the behavior's message types.

use grove_shared::{CorrelationId, ExitReason, GroveResult, MonitorId, ServerRef};
use tokio::sync::oneshot;

use crate::behavior::Behavior;

/// A message in the typed, per-behavior user queue.
pub(crate) enum UserEnvelope<B: Behavior> {
    Call {
        correlation: CorrelationId,
        msg: B::CallMsg,
        reply: oneshot::Sender<GroveResult<B::Reply>>,
    },
    Cast {
        msg: B::CastMsg,
    },
}

/// A message in the untyped control queue, common to every server
/// regardless of behavior.
#[derive(Debug)]
pub(crate) enum ControlMsg {
    Stop(ExitReason),
    LinkExit(ServerRef, ExitReason),
    ProcessDown(MonitorId, ServerRef, ExitReason),
}
