use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use pulse_coordinator::error::CoordinatorError;
use pulse_types::api::{ChatHistoryResponse, ChatSettingsUpdate, Claims, EditMessageRequest};

use crate::error::ApiResult;
use crate::{AppState, run_blocking};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

/// Paged history, newest page first but each page in chronological order,
/// so clients can prepend older pages while rendering top-to-bottom.
pub async fn get_history(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 200);
    let offset = (page - 1).saturating_mul(limit);

    let rid = room_id.to_string();
    let (mut messages, total, active_users) = run_blocking(&state, move |store| {
        let messages = store.page_messages(&rid, limit, offset)?;
        let total = store.count_messages(&rid)?;
        let active_users = store.active_users(&rid)?;
        Ok((messages, total, active_users))
    })
    .await?;
    messages.reverse();

    Ok(Json(ChatHistoryResponse {
        messages,
        active_users,
        total_messages: total,
        has_more: u64::from(page) * u64::from(limit) < total,
    }))
}

/// Room-owner-only settings update. Rooms without a recorded owner accept
/// updates from any authenticated user.
pub async fn update_settings(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ChatSettingsUpdate>,
) -> ApiResult<impl IntoResponse> {
    if let Some(len) = req.max_message_length {
        if len == 0 || len > 10_000 {
            return Err(CoordinatorError::Validation(
                "max_message_length must be between 1 and 10000".into(),
            )
            .into());
        }
    }

    let rid = room_id.to_string();
    let owner = run_blocking(&state, move |store| store.room_owner(&rid)).await?;
    if let Some(owner) = owner {
        if owner != claims.sub.to_string() {
            return Err(CoordinatorError::Authorization(
                "only the room owner can change chat settings".into(),
            )
            .into());
        }
    }

    let rid = room_id.to_string();
    let settings = run_blocking(&state, move |store| {
        store.update_chat_settings(
            &rid,
            req.allow_anonymous,
            req.moderation_enabled,
            req.max_message_length,
        )
    })
    .await?;

    Ok(Json(settings))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .coordinator
        .edit_message(claims.sub, room_id, message_id, &req.content)
        .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    state
        .coordinator
        .delete_message(claims.sub, room_id, message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_state;

    fn claims() -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            username: "reader".into(),
            exp: 0,
        }
    }

    #[tokio::test]
    async fn history_page_far_past_the_end_returns_an_empty_page() {
        let state = test_state();
        let query = HistoryQuery {
            page: u32::MAX,
            limit: 200,
        };

        let resp = get_history(
            State(state),
            Path(Uuid::new_v4()),
            Query(query),
            Extension(claims()),
        )
        .await
        .map_err(|e| e.0.to_string())
        .unwrap()
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
