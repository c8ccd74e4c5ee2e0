use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use pulse_coordinator::error::CoordinatorError;
use pulse_types::api::{Claims, CreateNotificationRequest, NotificationListResponse};

use crate::error::ApiResult;
use crate::{AppState, run_blocking};

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub unread_only: bool,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);
    let offset = (page - 1).saturating_mul(limit);

    let uid = claims.sub.to_string();
    let unread_only = query.unread_only;
    let (notifications, total, unread_count) = run_blocking(&state, move |store| {
        let notifications = store.list_notifications(&uid, unread_only, limit, offset)?;
        let total = store.count_notifications(&uid, unread_only)?;
        let unread_count = store.count_notifications(&uid, true)?;
        Ok((notifications, total, unread_count))
    })
    .await?;

    let total_pages = (total as u32).div_ceil(limit).max(1);

    Ok(Json(NotificationListResponse {
        notifications,
        total,
        unread_count,
        page,
        total_pages,
    }))
}

pub async fn create_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateNotificationRequest>,
) -> ApiResult<impl IntoResponse> {
    let notification = state
        .coordinator
        .notify(
            req.recipient_id,
            req.sender_id.or(Some(claims.sub)),
            req.kind,
            &req.title,
            &req.message,
            req.data,
            req.priority,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// Mark one notification read. Scoped to the caller, so one user can never
/// flip another user's notifications.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let nid = notification_id.to_string();
    let uid = claims.sub.to_string();
    let updated = run_blocking(&state, move |store| {
        store.mark_notification_read(&nid, &uid, Utc::now())
    })
    .await?;

    if !updated {
        return Err(CoordinatorError::NotFound("notification").into());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let uid = claims.sub.to_string();
    run_blocking(&state, move |store| {
        store.mark_all_notifications_read(&uid, Utc::now())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let nid = notification_id.to_string();
    let uid = claims.sub.to_string();
    let deleted =
        run_blocking(&state, move |store| store.delete_notification(&nid, &uid)).await?;

    if !deleted {
        return Err(CoordinatorError::NotFound("notification").into());
    }
    Ok(StatusCode::NO_CONTENT)
}
