use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode};

use pulse_store::Store;
use pulse_types::api::Claims;

use crate::error::{CoordinatorError, Result};
use crate::registry::SessionUser;

/// The connection gate's credential check: resolve an opaque token to a user
/// identity, or fail before any session exists.
///
/// The token scheme (HS256 JWT) is an interchangeable detail; the coordinator
/// only depends on the resolve-or-fail contract.
#[derive(Clone)]
pub struct TokenValidator {
    secret: String,
    store: Arc<Store>,
}

impl TokenValidator {
    pub fn new(secret: String, store: Arc<Store>) -> Self {
        Self { secret, store }
    }

    /// Validate a credential and resolve the user it references. Fails with
    /// `AuthError` on a missing/malformed/expired token, and also when the
    /// token is valid but the user no longer exists.
    pub async fn validate(&self, token: &str) -> Result<SessionUser> {
        if token.is_empty() {
            return Err(CoordinatorError::Auth("missing token".into()));
        }

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| CoordinatorError::Auth(e.to_string()))?;

        let user_id = data.claims.sub;
        let store = self.store.clone();
        let user = tokio::task::spawn_blocking(move || store.get_user_by_id(&user_id.to_string()))
            .await
            .map_err(|e| {
                CoordinatorError::Storage(anyhow::anyhow!("blocking task join error: {e}"))
            })??
            .ok_or_else(|| CoordinatorError::Auth("user no longer exists".into()))?;

        Ok(SessionUser {
            user_id,
            username: user.username,
        })
    }
}
