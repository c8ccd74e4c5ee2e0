use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ActiveUser, ChatMessage, MessageKind, Notification, Poll, Reaction};

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Join the live room attached to a blog article. Implicitly leaves the
    /// previous room, if any.
    JoinBlog { room_id: Uuid },

    /// Post a chat message into a room.
    SendMessage {
        room_id: Uuid,
        content: String,
        #[serde(default)]
        kind: MessageKind,
    },

    /// Indicate typing in a room. Ephemeral, never persisted.
    TypingStart { room_id: Uuid },

    /// Stop the typing indicator.
    TypingStop { room_id: Uuid },

    /// Toggle an emoji reaction on a message.
    AddReaction {
        room_id: Uuid,
        message_id: Uuid,
        emoji: String,
    },

    /// Cast a vote on a live poll.
    VotePoll { poll_id: Uuid, option_index: usize },

    /// Share cursor position/selection with the room. Pass-through only.
    CursorUpdate {
        room_id: Uuid,
        position: serde_json::Value,
        selection: serde_json::Value,
    },
}

/// Events sent FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, username: String },

    /// Recent message window + active-user list, sent to a joining session only.
    ChatHistory {
        room_id: Uuid,
        messages: Vec<ChatMessage>,
        active_users: Vec<ActiveUser>,
    },

    /// A new message was posted in a room.
    NewMessage { room_id: Uuid, message: ChatMessage },

    UserTyping {
        room_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    UserStopTyping { room_id: Uuid, user_id: Uuid },

    /// A user became present in a room.
    UserJoinedBlog {
        room_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// A user is no longer present in a room.
    UserLeftBlog { room_id: Uuid, user_id: Uuid },

    /// Global presence: a user connected anywhere.
    UserOnline { user_id: Uuid, username: String },

    /// Global presence: a user's last session disconnected.
    UserOffline { user_id: Uuid },

    /// The complete current reaction list for a message. Always the full
    /// list, never a delta, so concurrent reactors can't observe partial state.
    MessageReactionUpdated {
        room_id: Uuid,
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },

    /// A poll's tally changed (vote or new option).
    PollUpdated { poll_id: Uuid, poll: Poll },

    UserCursorUpdate {
        room_id: Uuid,
        user_id: Uuid,
        username: String,
        position: serde_json::Value,
        selection: serde_json::Value,
    },

    /// Targeted fanout to a specific recipient's sessions.
    NewNotification { notification: Notification },

    /// Structured error reported to the originating session only.
    Error { code: String, message: String },
}
