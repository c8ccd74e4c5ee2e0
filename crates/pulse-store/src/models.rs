//! Database row types and the TEXT-column parsing helpers the query modules
//! share. Rows keep raw strings; conversion into `pulse-types` domain models
//! happens once, after the statement has run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use pulse_types::models::{ChatMessage, MessageKind, Reaction};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub kind: String,
    pub created_at: String,
    pub edited: bool,
    pub edited_at: Option<String>,
}

impl MessageRow {
    pub fn into_message(self, reactions: Vec<Reaction>) -> Result<ChatMessage> {
        Ok(ChatMessage {
            id: parse_uuid(&self.id, "message id")?,
            sender_id: parse_uuid(&self.sender_id, "sender id")?,
            sender_name: self.sender_name,
            content: self.content,
            kind: MessageKind::parse(&self.kind),
            timestamp: parse_ts(&self.created_at, "message timestamp")?,
            edited: self.edited,
            edited_at: parse_opt_ts(self.edited_at.as_deref(), "edit timestamp")?,
            reactions,
        })
    }
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

impl ReactionRow {
    pub fn into_reaction(self) -> Result<Reaction> {
        Ok(Reaction {
            user_id: parse_uuid(&self.user_id, "reaction user id")?,
            emoji: self.emoji,
            timestamp: parse_ts(&self.created_at, "reaction timestamp")?,
        })
    }
}

pub fn parse_uuid(s: &str, what: &str) -> Result<Uuid> {
    s.parse::<Uuid>().with_context(|| format!("corrupt {what}: {s}"))
}

pub fn parse_ts(s: &str, what: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("corrupt {what}: {s}"))
}

pub fn parse_opt_ts(s: Option<&str>, what: &str) -> Result<Option<DateTime<Utc>>> {
    s.map(|v| parse_ts(v, what)).transpose()
}
