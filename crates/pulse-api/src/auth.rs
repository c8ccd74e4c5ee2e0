use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use pulse_coordinator::error::CoordinatorError;
use pulse_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiResult;
use crate::{AppState, run_blocking};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    let name_len = username.chars().count();
    if !(3..=32).contains(&name_len) {
        return Err(CoordinatorError::Validation(
            "username must be between 3 and 32 characters".into(),
        )
        .into());
    }
    if req.password.chars().count() < 8 {
        return Err(
            CoordinatorError::Validation("password must be at least 8 characters".into()).into(),
        );
    }

    let name = username.clone();
    let taken = run_blocking(&state, move |store| {
        Ok(store.get_user_by_username(&name)?.is_some())
    })
    .await?;
    if taken {
        return Err(CoordinatorError::Validation("username is already taken".into()).into());
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| CoordinatorError::Storage(anyhow::anyhow!("password hashing failed: {e}")))?
        .to_string();

    let user_id = Uuid::new_v4();
    let name = username.clone();
    run_blocking(&state, move |store| {
        store.create_user(&user_id.to_string(), &name, &password_hash)
    })
    .await?;

    let token =
        create_token(&state.jwt_secret, user_id, &username).map_err(CoordinatorError::Storage)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.username.clone();
    let user = run_blocking(&state, move |store| store.get_user_by_username(&name))
        .await?
        .ok_or_else(|| CoordinatorError::Auth("invalid username or password".into()))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| CoordinatorError::Storage(anyhow::anyhow!("stored hash is unreadable: {e}")))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| CoordinatorError::Auth("invalid username or password".into()))?;

    let user_id: Uuid = user.id.parse().map_err(|e| {
        CoordinatorError::Storage(anyhow::anyhow!("stored user id is not a uuid: {e}"))
    })?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)
        .map_err(CoordinatorError::Storage)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// 30-day HS256 session token.
pub(crate) fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
