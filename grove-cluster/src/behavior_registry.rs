//! Behavior registry: the node-wide table of spawnable behaviors.
//!
//! Maps a process-wide behavior name to a factory that can start a fresh
//! instance of it from JSON init args, the shape `remoteSpawn` needs since
//! the spawning node only knows the behavior by name.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use grove_runtime::{start, Behavior, Runtime, StartOpts};
use grove_shared::{GroveError, GroveResult, ServerId};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::directory::ServerDirectory;
use crate::wire::{RegistrationKind, SpawnOptions};
use crate::global_registry::GlobalRegistry;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type SpawnFactory = Arc<
    dyn Fn(Arc<Runtime>, Arc<ServerDirectory>, SpawnOptions) -> BoxFuture<'static, GroveResult<ServerId>>
        + Send
        + Sync,
>;

struct BehaviorEntry {
    factory: SpawnFactory,
    active: AtomicU32,
}

/// Node-wide table of spawnable behaviors.
#[derive(Default)]
pub struct BehaviorRegistry {
    behaviors: DashMap<String, BehaviorEntry>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`. Replacing an existing registration is only allowed
    /// while no server started under the old registration is still alive.
    pub fn register<B, F>(&self, name: impl Into<String>, make: F) -> GroveResult<()>
    where
        B: Behavior,
        B::InitArg: DeserializeOwned,
        B::CallMsg: DeserializeOwned,
        B::Reply: Serialize,
        B::CastMsg: DeserializeOwned,
        F: Fn() -> B + Send + Sync + 'static,
    {
        let name = name.into();
        if let Some(existing) = self.behaviors.get(&name) {
            if existing.active.load(Ordering::Acquire) > 0 {
                return Err(GroveError::ConfigError(format!(
                    "behavior '{name}' has active instances, cannot replace"
                )));
            }
        }

        let behavior_name: &'static str = Box::leak(name.clone().into_boxed_str());
        let factory: SpawnFactory = Arc::new(move |runtime, directory, options| {
            let init_arg: Result<B::InitArg, _> = serde_json::from_value(options.init_args.clone());
            let behavior = make();
            Box::pin(async move {
                let init_arg = init_arg
                    .map_err(|e| GroveError::InitializationError(format!("bad init args: {e}")))?;
                let mut opts = StartOpts::new(init_arg, behavior_name);
                if let Some(given_name) = options.name.clone() {
                    opts = opts.named(given_name);
                }
                let server_ref = start(&runtime, behavior, opts).await?;
                let id = server_ref.id();
                directory.insert(server_ref);
                Ok(id)
            })
        });

        self.behaviors.insert(
            name,
            BehaviorEntry {
                factory,
                active: AtomicU32::new(0),
            },
        );
        Ok(())
    }

    /// Spawn an instance of `name`. `global_registry` is consulted when
    /// `options.registration == Some(Global)`.
    pub async fn spawn(
        &self,
        name: &str,
        runtime: Arc<Runtime>,
        directory: Arc<ServerDirectory>,
        global_registry: &GlobalRegistry,
        here: &grove_shared::NodeId,
        options: SpawnOptions,
    ) -> GroveResult<ServerId> {
        let entry_factory = {
            let entry = self
                .behaviors
                .get(name)
                .ok_or_else(|| GroveError::BehaviorNotFound(name.to_string()))?;
            entry.active.fetch_add(1, Ordering::AcqRel);
            entry.factory.clone()
        };

        let wants_global = options.registration == Some(RegistrationKind::Global);
        let global_name = options.name.clone();
        let result = (entry_factory)(runtime, directory, options).await;

        if let Some(entry) = self.behaviors.get(name) {
            entry.active.fetch_sub(1, Ordering::AcqRel);
        }

        let id = result?;
        if wants_global {
            if let Some(global_name) = global_name {
                global_registry.register(&global_name, id, here.clone())?;
            }
        }
        Ok(id)
    }
}
