use chrono::Utc;
use uuid::Uuid;

use pulse_types::events::ServerEvent;
use pulse_types::models::{ChatMessage, MessageKind, Reaction};

use crate::Coordinator;
use crate::error::{CoordinatorError, Result};
use crate::registry::SessionUser;

/// Chat Pipeline: validate, persist, then broadcast. Mutations on one room's
/// thread serialize through that room's lock so the broadcast order matches
/// the persistence order.
impl Coordinator {
    /// Post a message to a room's thread, creating the thread if absent, and
    /// fan the resolved message out to every session in the room, including
    /// the sender's own other connections.
    pub async fn send_message(
        &self,
        sender: &SessionUser,
        room_id: Uuid,
        content: &str,
        kind: MessageKind,
    ) -> Result<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoordinatorError::Validation(
                "message content is required".into(),
            ));
        }

        let _guard = self.thread_locks.acquire(room_id).await;

        let rid = room_id.to_string();
        let settings = self.run_blocking(move |store| store.chat_settings(&rid)).await?;
        if content.chars().count() > settings.max_message_length {
            return Err(CoordinatorError::Validation(format!(
                "message exceeds the maximum length of {} characters",
                settings.max_message_length
            )));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender_id: sender.user_id,
            sender_name: sender.username.clone(),
            content: content.to_string(),
            kind,
            timestamp: Utc::now(),
            edited: false,
            edited_at: None,
            reactions: vec![],
        };

        let rid = room_id.to_string();
        let persisted = message.clone();
        self.run_blocking(move |store| {
            store.ensure_room(&rid)?;
            store.insert_message(
                &persisted.id.to_string(),
                &rid,
                &persisted.sender_id.to_string(),
                &persisted.content,
                persisted.kind.as_str(),
                persisted.timestamp,
            )
        })
        .await?;

        self.registry
            .broadcast_to_room(
                room_id,
                &ServerEvent::NewMessage {
                    room_id,
                    message: message.clone(),
                },
                None,
            )
            .await;

        Ok(message)
    }

    /// Edit a message's content. Sender-only. Returns the updated message;
    /// broadcasting is the caller's concern (the REST layer does not emit).
    pub async fn edit_message(
        &self,
        caller: Uuid,
        room_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> Result<ChatMessage> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(CoordinatorError::Validation(
                "message content is required".into(),
            ));
        }

        let _guard = self.thread_locks.acquire(room_id).await;

        let existing = self.get_message(room_id, message_id).await?;
        if existing.sender_id != caller {
            return Err(CoordinatorError::Authorization(
                "only the sender can edit a message".into(),
            ));
        }

        let mid = message_id.to_string();
        let edited_at = Utc::now();
        self.run_blocking(move |store| store.set_message_content(&mid, &content, edited_at))
            .await?;

        self.get_message(room_id, message_id).await
    }

    /// Delete a message. Permitted for the sender or the room owner.
    pub async fn delete_message(&self, caller: Uuid, room_id: Uuid, message_id: Uuid) -> Result<()> {
        let _guard = self.thread_locks.acquire(room_id).await;

        let existing = self.get_message(room_id, message_id).await?;
        if existing.sender_id != caller {
            let rid = room_id.to_string();
            let owner = self.run_blocking(move |store| store.room_owner(&rid)).await?;
            let is_owner = owner
                .and_then(|o| o.parse::<Uuid>().ok())
                .is_some_and(|o| o == caller);
            if !is_owner {
                return Err(CoordinatorError::Authorization(
                    "not authorized to delete this message".into(),
                ));
            }
        }

        let mid = message_id.to_string();
        self.run_blocking(move |store| store.delete_message(&mid)).await
    }

    /// Toggle a (user, emoji) reaction on a message, then broadcast the
    /// message's complete reaction list rather than a delta, so concurrent
    /// reactors cannot observe partial state.
    pub async fn toggle_reaction(
        &self,
        caller: &SessionUser,
        room_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<Vec<Reaction>> {
        let _guard = self.thread_locks.acquire(room_id).await;

        // Existence check before mutating anything.
        self.get_message(room_id, message_id).await?;

        let mid = message_id.to_string();
        let uid = caller.user_id.to_string();
        let emoji_owned = emoji.to_string();
        let reaction_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let reactions = self
            .run_blocking(move |store| {
                store.toggle_reaction(&reaction_id, &mid, &uid, &emoji_owned, now)?;
                store.reactions_for_message(&mid)
            })
            .await?;

        self.registry
            .broadcast_to_room(
                room_id,
                &ServerEvent::MessageReactionUpdated {
                    room_id,
                    message_id,
                    reactions: reactions.clone(),
                },
                None,
            )
            .await;

        Ok(reactions)
    }

    async fn get_message(&self, room_id: Uuid, message_id: Uuid) -> Result<ChatMessage> {
        let rid = room_id.to_string();
        let mid = message_id.to_string();
        self.run_blocking(move |store| store.get_message(&rid, &mid))
            .await?
            .ok_or(CoordinatorError::NotFound("message"))
    }
}
