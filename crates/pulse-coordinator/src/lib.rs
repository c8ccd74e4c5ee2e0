pub mod auth;
pub mod chat;
pub mod connection;
pub mod error;
pub mod locks;
pub mod notify;
pub mod polls;
pub mod registry;
pub mod rooms;

use std::sync::Arc;

use pulse_store::Store;

use crate::error::{CoordinatorError, Result};
use crate::locks::KeyedLocks;
use crate::registry::PresenceRegistry;

/// Number of persisted messages replayed to a session joining a room.
pub const HISTORY_WINDOW: u32 = 50;

/// The live-interaction coordinator: presence, room-scoped fan-out, and the
/// stateful chat/poll/notification mutations. One instance per process;
/// cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Coordinator {
    registry: PresenceRegistry,
    store: Arc<Store>,
    /// Per-room serialization for chat-thread mutations.
    thread_locks: KeyedLocks,
    /// Per-poll serialization for the vote read-modify-write cycle.
    poll_locks: KeyedLocks,
}

impl Coordinator {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            registry: PresenceRegistry::new(),
            store,
            thread_locks: KeyedLocks::new(),
            poll_locks: KeyedLocks::new(),
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run a store call off the async runtime. rusqlite is blocking, so every
    /// persistence touch from a connection handler goes through here.
    pub(crate) async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| {
                CoordinatorError::Storage(anyhow::anyhow!("blocking task join error: {e}"))
            })?
            .map_err(CoordinatorError::from)
    }
}
