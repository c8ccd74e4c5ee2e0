pub mod auth;
pub mod chat;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod polls;

use std::sync::Arc;

use pulse_coordinator::Coordinator;
use pulse_coordinator::error::CoordinatorError;
use pulse_store::Store;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Store>,
    pub jwt_secret: String,
    pub coordinator: Coordinator,
}

/// Run a read-only store query off the async runtime.
pub(crate) async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Store) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            ApiError(CoordinatorError::Storage(anyhow::anyhow!(
                "blocking task join error: {e}"
            )))
        })?
        .map_err(|e| ApiError(CoordinatorError::Storage(e)))
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
    Arc::new(AppStateInner {
        db: store.clone(),
        jwt_secret: "test-secret".into(),
        coordinator: Coordinator::new(store),
    })
}
