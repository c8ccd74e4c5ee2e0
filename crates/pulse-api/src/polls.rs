use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use pulse_coordinator::error::CoordinatorError;
use pulse_coordinator::registry::SessionUser;
use pulse_types::api::{
    AddOptionRequest, Claims, CreatePollRequest, PollResponse, UpdatePollRequest, VoteRequest,
};
use pulse_types::models::PollStatus;

use crate::error::ApiResult;
use crate::{AppState, run_blocking};

pub async fn create_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePollRequest>,
) -> ApiResult<impl IntoResponse> {
    let creator = SessionUser {
        user_id: claims.sub,
        username: claims.username,
    };
    let poll = state.coordinator.create_poll(&creator, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(PollResponse {
            poll,
            voted_options: vec![],
        }),
    ))
}

pub async fn get_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let pid = poll_id.to_string();
    let uid = claims.sub.to_string();
    let (poll, voted_options) = run_blocking(&state, move |store| {
        let poll = store.get_poll(&pid)?;
        let voted = store.user_voted_options(&pid, &uid)?;
        Ok((poll, voted))
    })
    .await?;

    let poll = poll.ok_or(CoordinatorError::NotFound("poll"))?;
    Ok(Json(PollResponse {
        poll,
        voted_options,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PollListQuery {
    pub status: Option<PollStatus>,
}

pub async fn list_room_polls(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<PollListQuery>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let rid = room_id.to_string();
    let polls = run_blocking(&state, move |store| {
        store.polls_for_room(&rid, query.status.map(|s| s.as_str()))
    })
    .await?;
    Ok(Json(polls))
}

pub async fn vote(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<impl IntoResponse> {
    let poll = state
        .coordinator
        .vote(claims.sub, poll_id, req.option_index)
        .await?;

    let pid = poll_id.to_string();
    let uid = claims.sub.to_string();
    let voted_options =
        run_blocking(&state, move |store| store.user_voted_options(&pid, &uid)).await?;

    Ok(Json(PollResponse {
        poll,
        voted_options,
    }))
}

pub async fn add_option(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<AddOptionRequest>,
) -> ApiResult<impl IntoResponse> {
    let poll = state
        .coordinator
        .add_option(poll_id, &req.text, req.color)
        .await?;
    Ok(Json(poll))
}

pub async fn update_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePollRequest>,
) -> ApiResult<impl IntoResponse> {
    let poll = state.coordinator.update_poll(claims.sub, poll_id, req).await?;
    Ok(Json(poll))
}

pub async fn delete_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    state.coordinator.delete_poll(claims.sub, poll_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
