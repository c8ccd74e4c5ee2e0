use chrono::Utc;
use uuid::Uuid;

use pulse_types::events::ServerEvent;

use crate::error::{CoordinatorError, Result};
use crate::registry::SessionId;
use crate::{Coordinator, HISTORY_WINDOW};

/// Room Router: membership transitions and room-scoped ephemeral broadcast.
impl Coordinator {
    /// Join a session to a room, implicitly leaving its previous one. The
    /// joiner alone receives the recent message window and the active-user
    /// list; everyone else in the room sees a join event.
    pub async fn join_room(&self, session_id: SessionId, room_id: Uuid) -> Result<()> {
        let joined = self
            .registry
            .join_room(session_id, room_id)
            .await
            .ok_or(CoordinatorError::NotFound("session"))?;

        if let Some((prev_room, user_gone)) = joined.previous {
            if user_gone {
                self.reconcile_leave(prev_room, joined.user_id).await?;
            }
        }

        // Persisted mirror: refresh-or-insert, never duplicate.
        let rid = room_id.to_string();
        let uid = joined.user_id.to_string();
        let now = Utc::now();
        self.run_blocking(move |store| {
            store.ensure_room(&rid)?;
            store.upsert_active_user(&rid, &uid, now)
        })
        .await?;

        let rid = room_id.to_string();
        let (messages, active_users) = self
            .run_blocking(move |store| {
                let messages = store.recent_messages(&rid, HISTORY_WINDOW)?;
                let active_users = store.active_users(&rid)?;
                Ok((messages, active_users))
            })
            .await?;

        self.registry
            .send_to_session(
                session_id,
                ServerEvent::ChatHistory {
                    room_id,
                    messages,
                    active_users,
                },
            )
            .await;

        self.registry
            .broadcast_to_room(
                room_id,
                &ServerEvent::UserJoinedBlog {
                    room_id,
                    user_id: joined.user_id,
                    username: joined.username,
                },
                Some(session_id),
            )
            .await;

        Ok(())
    }

    /// Tear down a session. Presence is updated immediately; nothing already
    /// persisted is rolled back.
    pub async fn disconnect_session(&self, session_id: SessionId) -> Result<()> {
        let Some(gone) = self.registry.disconnect(session_id).await else {
            return Ok(());
        };

        if let Some((room_id, user_gone)) = gone.left_room {
            if user_gone {
                self.reconcile_leave(room_id, gone.user_id).await?;
            }
        }

        // Global presence is independent of room presence: offline only when
        // the last session anywhere is gone.
        if gone.last_session {
            self.registry
                .broadcast_global(
                    &ServerEvent::UserOffline {
                        user_id: gone.user_id,
                    },
                    None,
                )
                .await;
        }

        Ok(())
    }

    /// Typing indicators: in-memory only, broadcast to the rest of the room,
    /// never persisted and never replayed.
    pub async fn typing(&self, session_id: SessionId, room_id: Uuid, typing: bool) -> Result<()> {
        let user = self
            .registry
            .session_user(session_id)
            .await
            .ok_or(CoordinatorError::NotFound("session"))?;

        self.registry.set_typing(room_id, user.user_id, typing).await;

        let event = if typing {
            ServerEvent::UserTyping {
                room_id,
                user_id: user.user_id,
                username: user.username,
            }
        } else {
            ServerEvent::UserStopTyping {
                room_id,
                user_id: user.user_id,
            }
        };

        self.registry
            .broadcast_to_room(room_id, &event, Some(session_id))
            .await;
        Ok(())
    }

    /// Cursor/selection sharing: pass-through broadcast, no persistence.
    pub async fn cursor_update(
        &self,
        session_id: SessionId,
        room_id: Uuid,
        position: serde_json::Value,
        selection: serde_json::Value,
    ) -> Result<()> {
        let user = self
            .registry
            .session_user(session_id)
            .await
            .ok_or(CoordinatorError::NotFound("session"))?;

        self.registry
            .broadcast_to_room(
                room_id,
                &ServerEvent::UserCursorUpdate {
                    room_id,
                    user_id: user.user_id,
                    username: user.username,
                    position,
                    selection,
                },
                Some(session_id),
            )
            .await;
        Ok(())
    }

    /// Remove a user who is no longer present in a room from the persisted
    /// active list and tell the room.
    async fn reconcile_leave(&self, room_id: Uuid, user_id: Uuid) -> Result<()> {
        let rid = room_id.to_string();
        let uid = user_id.to_string();
        self.run_blocking(move |store| store.remove_active_user(&rid, &uid))
            .await?;

        self.registry
            .broadcast_to_room(
                room_id,
                &ServerEvent::UserLeftBlog { room_id, user_id },
                None,
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pulse_store::Store;
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::SessionUser;

    async fn setup() -> (Coordinator, Uuid) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let user_id = Uuid::new_v4();
        store
            .create_user(&user_id.to_string(), "ada", "hash")
            .unwrap();
        (Coordinator::new(store), user_id)
    }

    async fn connect(
        coordinator: &Coordinator,
        user_id: Uuid,
        username: &str,
    ) -> (SessionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let connected = coordinator
            .registry()
            .connect(&SessionUser {
                user_id,
                username: username.to_string(),
            })
            .await;
        (connected.session_id, connected.rx)
    }

    #[tokio::test]
    async fn joining_second_room_leaves_first() {
        let (coordinator, user_id) = setup().await;
        let (sid, _rx) = connect(&coordinator, user_id, "ada").await;

        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();

        coordinator.join_room(sid, room_a).await.unwrap();
        assert!(coordinator.registry().is_user_in_room(room_a, user_id).await);

        coordinator.join_room(sid, room_b).await.unwrap();
        assert!(!coordinator.registry().is_user_in_room(room_a, user_id).await);
        assert!(coordinator.registry().is_user_in_room(room_b, user_id).await);

        // Persisted mirror reconciled on the implicit leave.
        let a = coordinator
            .store()
            .active_users(&room_a.to_string())
            .unwrap();
        assert!(a.is_empty());
        let b = coordinator
            .store()
            .active_users(&room_b.to_string())
            .unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].user_id, user_id);
    }

    #[tokio::test]
    async fn joiner_receives_history_others_receive_join_event() {
        let (coordinator, ada) = setup().await;
        let bob = Uuid::new_v4();
        coordinator
            .store()
            .create_user(&bob.to_string(), "bob", "hash")
            .unwrap();

        let room = Uuid::new_v4();
        let (ada_sid, mut ada_rx) = connect(&coordinator, ada, "ada").await;
        coordinator.join_room(ada_sid, room).await.unwrap();
        // Ada's own join: history event first.
        match ada_rx.recv().await.unwrap() {
            ServerEvent::ChatHistory { messages, active_users, .. } => {
                assert!(messages.is_empty());
                assert_eq!(active_users.len(), 1);
            }
            other => panic!("expected chat history, got {other:?}"),
        }

        let (bob_sid, mut bob_rx) = connect(&coordinator, bob, "bob").await;
        coordinator.join_room(bob_sid, room).await.unwrap();

        // Ada sees Bob join; Bob sees history including both active users.
        match ada_rx.recv().await.unwrap() {
            ServerEvent::UserJoinedBlog { user_id, .. } => assert_eq!(user_id, bob),
            other => panic!("expected join event, got {other:?}"),
        }
        match bob_rx.recv().await.unwrap() {
            ServerEvent::ChatHistory { active_users, .. } => {
                assert_eq!(active_users.len(), 2);
            }
            other => panic!("expected chat history, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn two_sessions_one_disconnect_keeps_user_present() {
        let (coordinator, user_id) = setup().await;
        let room = Uuid::new_v4();

        let (sid1, _rx1) = connect(&coordinator, user_id, "ada").await;
        let (sid2, _rx2) = connect(&coordinator, user_id, "ada").await;
        coordinator.join_room(sid1, room).await.unwrap();
        coordinator.join_room(sid2, room).await.unwrap();

        coordinator.disconnect_session(sid1).await.unwrap();

        // Still present in the room and still online globally.
        assert!(coordinator.registry().is_user_in_room(room, user_id).await);
        assert!(coordinator.registry().is_online(user_id).await);
        let active = coordinator.store().active_users(&room.to_string()).unwrap();
        assert_eq!(active.len(), 1);

        coordinator.disconnect_session(sid2).await.unwrap();
        assert!(!coordinator.registry().is_user_in_room(room, user_id).await);
        assert!(!coordinator.registry().is_online(user_id).await);
        assert!(coordinator.store().active_users(&room.to_string()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn typing_is_ephemeral_and_scoped_to_others() {
        let (coordinator, ada) = setup().await;
        let bob = Uuid::new_v4();
        coordinator
            .store()
            .create_user(&bob.to_string(), "bob", "hash")
            .unwrap();
        let room = Uuid::new_v4();

        let (ada_sid, mut ada_rx) = connect(&coordinator, ada, "ada").await;
        let (bob_sid, mut bob_rx) = connect(&coordinator, bob, "bob").await;
        coordinator.join_room(ada_sid, room).await.unwrap();
        coordinator.join_room(bob_sid, room).await.unwrap();
        // Drain join traffic.
        while ada_rx.try_recv().is_ok() {}
        while bob_rx.try_recv().is_ok() {}

        coordinator.typing(ada_sid, room, true).await.unwrap();

        match bob_rx.recv().await.unwrap() {
            ServerEvent::UserTyping { user_id, .. } => assert_eq!(user_id, ada),
            other => panic!("expected typing event, got {other:?}"),
        }
        // The typer does not hear their own indicator.
        assert!(ada_rx.try_recv().is_err());

        // Nothing persisted: the active-user mirror never flips is_typing.
        let active = coordinator.store().active_users(&room.to_string()).unwrap();
        assert!(active.iter().all(|a| !a.is_typing));

        coordinator.typing(ada_sid, room, false).await.unwrap();
        match bob_rx.recv().await.unwrap() {
            ServerEvent::UserStopTyping { user_id, .. } => assert_eq!(user_id, ada),
            other => panic!("expected stop-typing event, got {other:?}"),
        }
    }
}
