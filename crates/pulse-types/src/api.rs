use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ActiveUser, ChatMessage, Notification, Poll, PollSettings, PollStatus};

// -- JWT Claims --

/// JWT claims shared between pulse-api (REST middleware) and
/// pulse-coordinator (WebSocket connection gate). Canonical definition lives
/// here to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Chat --

#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    pub messages: Vec<ChatMessage>,
    pub active_users: Vec<ActiveUser>,
    pub total_messages: u64,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatSettingsUpdate {
    pub allow_anonymous: Option<bool>,
    pub moderation_enabled: Option<bool>,
    pub max_message_length: Option<usize>,
}

// -- Polls --

#[derive(Debug, Deserialize)]
pub struct NewPollOption {
    pub text: String,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<NewPollOption>,
    pub room_id: Option<Uuid>,
    #[serde(default)]
    pub settings: PollSettings,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePollRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ends_at: Option<DateTime<Utc>>,
    pub status: Option<PollStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoteRequest {
    pub option_index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddOptionRequest {
    pub text: String,
    pub color: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub poll: Poll,
    /// Option indices the calling user has voted for.
    pub voted_options: Vec<usize>,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub kind: crate::models::NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub priority: crate::models::Priority,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
    pub total: u64,
    pub unread_count: u64,
    pub page: u32,
    pub total_pages: u32,
}
