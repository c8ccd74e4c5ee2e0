use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

// -- Chat --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Emoji,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Emoji => "emoji",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "emoji" => Self::Emoji,
            "image" => Self::Image,
            "file" => Self::File,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
}

/// A chat message with its sender identity already resolved. This is what
/// goes out over the wire, so clients never have to do a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub reactions: Vec<Reaction>,
}

/// Persisted mirror of who is active in a room. The in-memory presence
/// registry is authoritative for "currently connected"; this list exists so
/// clients reading history over REST see roughly who is around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveUser {
    pub user_id: Uuid,
    pub username: String,
    pub last_seen: DateTime<Utc>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    pub allow_anonymous: bool,
    pub moderation_enabled: bool,
    pub max_message_length: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            allow_anonymous: false,
            moderation_enabled: true,
            max_message_length: 1000,
        }
    }
}

// -- Polls --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Active,
    Ended,
    Draft,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Draft => "draft",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ended" => Self::Ended,
            "draft" => Self::Draft,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowResults {
    Always,
    #[default]
    AfterVote,
    AfterEnd,
}

impl ShowResults {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::AfterVote => "after_vote",
            Self::AfterEnd => "after_end",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "always" => Self::Always,
            "after_end" => Self::AfterEnd,
            _ => Self::AfterVote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    pub color: String,
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default)]
    pub allow_multiple_votes: bool,
    #[serde(default)]
    pub show_results: ShowResults,
    #[serde(default)]
    pub allow_add_options: bool,
    #[serde(default = "default_true")]
    pub require_auth: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            allow_multiple_votes: false,
            show_results: ShowResults::AfterVote,
            allow_add_options: false,
            require_auth: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<PollOption>,
    pub creator_id: Uuid,
    pub creator_name: String,
    pub room_id: Option<Uuid>,
    pub settings: PollSettings,
    pub status: PollStatus,
    pub ends_at: Option<DateTime<Utc>>,
    /// Always recomputed as the sum of per-option vote counts, never
    /// incremented in place.
    pub total_votes: u64,
    pub created_at: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    Mention,
    BlogPublished,
    PollCreated,
    PollEnded,
    ChatMessage,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Follow => "follow",
            Self::Mention => "mention",
            Self::BlogPublished => "blog_published",
            Self::PollCreated => "poll_created",
            Self::PollEnded => "poll_ended",
            Self::ChatMessage => "chat_message",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "like" => Self::Like,
            "comment" => Self::Comment,
            "follow" => Self::Follow,
            "mention" => Self::Mention,
            "blog_published" => Self::BlogPublished,
            "poll_created" => Self::PollCreated,
            "poll_ended" => Self::PollEnded,
            "chat_message" => Self::ChatMessage,
            _ => Self::System,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "high" => Self::High,
            "urgent" => Self::Urgent,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Arbitrary structured payload (blog id, poll id, url, ...).
    pub data: serde_json::Value,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}
