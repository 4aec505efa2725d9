//! Local name registry: a total map from a registered name to a server.

use dashmap::DashMap;
use grove_shared::{GroveError, GroveResult, ServerId};

/// Total map of unique names to server ids. De-registration happens as part
/// of the termination protocol (`Runtime::finalize_termination`), strictly
/// before monitors fire, so a name never dangles.
#[derive(Default)]
pub struct LocalRegistry {
    names: DashMap<String, ServerId>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for `id`. Fails with `NameInUse` if already taken.
    pub fn register(&self, name: &str, id: ServerId) -> GroveResult<()> {
        match self.names.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(GroveError::NameInUse(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ServerId> {
        self.names.get(name).map(|e| *e.value())
    }

    /// Remove `name` only if it still maps to `id` (guards against a new
    /// server reusing the name between this server's termination decision
    /// and the actual de-registration).
    pub fn unregister_if_owner(&self, name: &str, id: ServerId) {
        if let Some(entry) = self.names.get(name) {
            if *entry.value() != id {
                return;
            }
        } else {
            return;
        }
        self.names.remove_if(name, |_, v| *v == id);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
