//! Type-erased dynamic dispatch onto local servers.
//!
//! A remote `call`/`cast` frame only carries a `ServerId` and an opaque
//! JSON payload — the receiving node has no compile-time knowledge of that
//! server's `Behavior`. Every server spawned through this crate (via
//! `spawn_local` or in response to a remote `spawn` frame) is therefore
//! also registered here behind an object-safe trait, the same erasure
//! `grove-supervisor` uses for heterogeneous children.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use grove_runtime::{Behavior, ServerRef};
use grove_shared::{GroveError, GroveResult, ServerId};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[async_trait]
pub trait DynServerHandle: Send + Sync {
    fn id(&self) -> ServerId;
    async fn call_json(&self, payload: serde_json::Value, timeout: Duration) -> GroveResult<serde_json::Value>;
    fn cast_json(&self, payload: serde_json::Value) -> GroveResult<()>;
    fn is_alive(&self) -> bool;
}

struct TypedHandle<B: Behavior>(ServerRef<B>);

#[async_trait]
impl<B> DynServerHandle for TypedHandle<B>
where
    B: Behavior,
    B::CallMsg: DeserializeOwned,
    B::Reply: Serialize,
    B::CastMsg: DeserializeOwned,
{
    fn id(&self) -> ServerId {
        self.0.id()
    }

    async fn call_json(
        &self,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> GroveResult<serde_json::Value> {
        let msg: B::CallMsg = serde_json::from_value(payload)
            .map_err(|e| GroveError::CalleeError(format!("bad call payload: {e}")))?;
        let reply = self.0.call(msg, timeout).await?;
        serde_json::to_value(reply)
            .map_err(|e| GroveError::CalleeError(format!("unserializable reply: {e}")))
    }

    fn cast_json(&self, payload: serde_json::Value) -> GroveResult<()> {
        let msg: B::CastMsg = serde_json::from_value(payload)
            .map_err(|e| GroveError::CalleeError(format!("bad cast payload: {e}")))?;
        self.0.cast(msg)
    }

    fn is_alive(&self) -> bool {
        self.0.is_alive()
    }
}

/// Node-wide directory of every dynamically-dispatchable server.
#[derive(Default)]
pub struct ServerDirectory {
    entries: DashMap<ServerId, Arc<dyn DynServerHandle>>,
}

impl ServerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<B>(&self, server_ref: ServerRef<B>)
    where
        B: Behavior,
        B::CallMsg: DeserializeOwned,
        B::Reply: Serialize,
        B::CastMsg: DeserializeOwned,
    {
        let id = server_ref.id();
        self.entries.insert(id, Arc::new(TypedHandle(server_ref)));
    }

    pub fn get(&self, id: ServerId) -> Option<Arc<dyn DynServerHandle>> {
        let entry = self.entries.get(&id)?;
        if entry.is_alive() {
            Some(entry.value().clone())
        } else {
            drop(entry);
            self.entries.remove(&id);
            None
        }
    }

    pub fn remove(&self, id: ServerId) {
        self.entries.remove(&id);
    }
}
