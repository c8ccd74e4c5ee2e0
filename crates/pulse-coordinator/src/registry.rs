use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use pulse_types::events::ServerEvent;

pub type SessionId = Uuid;

/// Identity resolved by the connection gate.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub username: String,
}

struct SessionEntry {
    user_id: Uuid,
    username: String,
    room: Option<Uuid>,
    last_seen: DateTime<Utc>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct RoomState {
    /// Sessions currently joined to this room.
    sessions: HashSet<SessionId>,
    /// Users with an active typing indicator. Ephemeral: never persisted,
    /// never replayed to a joining session.
    typing: HashSet<Uuid>,
}

struct OnlineEntry {
    username: String,
    sessions: usize,
}

/// The only process-wide mutable state: who is connected, and which room each
/// session is in. Rooms form an arena keyed by room id, each behind its own
/// lock, so activity in unrelated rooms never serializes.
///
/// Lock order is sessions -> rooms map -> individual room; every method
/// follows it.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    online: RwLock<HashMap<Uuid, OnlineEntry>>,
    rooms: RwLock<HashMap<Uuid, Arc<RwLock<RoomState>>>>,
}

/// What `connect` handed back: the session id, the event receiver feeding the
/// socket's send loop, and whether this was the user's first live session.
pub struct Connected {
    pub session_id: SessionId,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
    pub newly_online: bool,
}

/// Result of removing a session, with the facts the room router needs to
/// reconcile persisted state and broadcast presence changes.
pub struct Disconnected {
    pub user_id: Uuid,
    pub username: String,
    /// Room the session was joined to, and whether the user has no remaining
    /// session there (room presence is per-user, not per-session).
    pub left_room: Option<(Uuid, bool)>,
    /// True when this was the user's last session anywhere.
    pub last_session: bool,
}

pub struct Joined {
    pub user_id: Uuid,
    pub username: String,
    /// Previous room, and whether the user vanished from it.
    pub previous: Option<(Uuid, bool)>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                online: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a freshly authenticated connection.
    pub async fn connect(&self, user: &SessionUser) -> Connected {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner.sessions.write().await.insert(
            session_id,
            SessionEntry {
                user_id: user.user_id,
                username: user.username.clone(),
                room: None,
                last_seen: Utc::now(),
                tx,
            },
        );

        let mut online = self.inner.online.write().await;
        let entry = online.entry(user.user_id).or_insert_with(|| OnlineEntry {
            username: user.username.clone(),
            sessions: 0,
        });
        entry.sessions += 1;
        let newly_online = entry.sessions == 1;

        Connected {
            session_id,
            rx,
            newly_online,
        }
    }

    /// Remove a session entirely. Best-effort reachability fact: nothing
    /// already committed downstream is rolled back.
    pub async fn disconnect(&self, session_id: SessionId) -> Option<Disconnected> {
        let entry = self.inner.sessions.write().await.remove(&session_id)?;

        let left_room = match entry.room {
            Some(room_id) => {
                let still_present = self
                    .remove_session_from_room(room_id, session_id, entry.user_id)
                    .await;
                Some((room_id, !still_present))
            }
            None => None,
        };

        let mut online = self.inner.online.write().await;
        let last_session = match online.get_mut(&entry.user_id) {
            Some(o) => {
                o.sessions -= 1;
                o.sessions == 0
            }
            None => false,
        };
        if last_session {
            online.remove(&entry.user_id);
        }

        Some(Disconnected {
            user_id: entry.user_id,
            username: entry.username,
            left_room,
            last_session,
        })
    }

    /// Move a session into a room, implicitly leaving its previous one.
    /// A session is in at most one room at a time, by construction.
    pub async fn join_room(&self, session_id: SessionId, room_id: Uuid) -> Option<Joined> {
        let (user_id, username, previous_room) = {
            let mut sessions = self.inner.sessions.write().await;
            let entry = sessions.get_mut(&session_id)?;
            let previous = entry.room.replace(room_id);
            entry.last_seen = Utc::now();
            (entry.user_id, entry.username.clone(), previous)
        };

        let previous = match previous_room {
            Some(prev_id) => {
                let still_present = self
                    .remove_session_from_room(prev_id, session_id, user_id)
                    .await;
                Some((prev_id, !still_present))
            }
            None => None,
        };

        let room = self.room_handle(room_id).await;
        room.write().await.sessions.insert(session_id);

        Some(Joined {
            user_id,
            username,
            previous,
        })
    }

    /// Flip a user's typing indicator in a room. Returns false if the state
    /// was already what was asked for.
    pub async fn set_typing(&self, room_id: Uuid, user_id: Uuid, typing: bool) -> bool {
        let Some(room) = self.existing_room(room_id).await else {
            return false;
        };
        let mut state = room.write().await;
        if typing {
            state.typing.insert(user_id)
        } else {
            state.typing.remove(&user_id)
        }
    }

    /// Deliver an event to every session currently in a room, in processing
    /// order (the per-session channels preserve send order).
    pub async fn broadcast_to_room(
        &self,
        room_id: Uuid,
        event: &ServerEvent,
        exclude: Option<SessionId>,
    ) {
        let Some(room) = self.existing_room(room_id).await else {
            return;
        };
        let targets: Vec<SessionId> = room.read().await.sessions.iter().copied().collect();

        let sessions = self.inner.sessions.read().await;
        for sid in targets {
            if Some(sid) == exclude {
                continue;
            }
            if let Some(entry) = sessions.get(&sid) {
                let _ = entry.tx.send(event.clone());
            }
        }
    }

    /// Deliver an event to every connected session.
    pub async fn broadcast_global(&self, event: &ServerEvent, exclude: Option<SessionId>) {
        let sessions = self.inner.sessions.read().await;
        for (sid, entry) in sessions.iter() {
            if Some(*sid) == exclude {
                continue;
            }
            let _ = entry.tx.send(event.clone());
        }
    }

    /// Deliver an event to one session.
    pub async fn send_to_session(&self, session_id: SessionId, event: ServerEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(entry) = sessions.get(&session_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Deliver an event to every live session of one user, wherever they are.
    /// Returns the number of sessions reached.
    pub async fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let sessions = self.inner.sessions.read().await;
        let mut delivered = 0;
        for entry in sessions.values() {
            if entry.user_id == user_id && entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Currently online users, for the presence snapshot a new connection gets.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online
            .read()
            .await
            .iter()
            .map(|(id, o)| (*id, o.username.clone()))
            .collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.online.read().await.contains_key(&user_id)
    }

    /// Room-scoped presence: does the user have any session in this room?
    pub async fn is_user_in_room(&self, room_id: Uuid, user_id: Uuid) -> bool {
        let Some(room) = self.existing_room(room_id).await else {
            return false;
        };
        let sids: Vec<SessionId> = room.read().await.sessions.iter().copied().collect();
        let sessions = self.inner.sessions.read().await;
        sids.iter()
            .any(|sid| sessions.get(sid).is_some_and(|e| e.user_id == user_id))
    }

    pub async fn session_user(&self, session_id: SessionId) -> Option<SessionUser> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(&session_id).map(|e| SessionUser {
            user_id: e.user_id,
            username: e.username.clone(),
        })
    }

    pub async fn session_room(&self, session_id: SessionId) -> Option<Uuid> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(&session_id).and_then(|e| e.room)
    }

    /// Refresh a session's last-seen timestamp on inbound activity.
    pub async fn touch(&self, session_id: SessionId) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(entry) = sessions.get_mut(&session_id) {
            entry.last_seen = Utc::now();
        }
    }

    /// Rooms are created lazily on first join and never destroyed; an empty
    /// room just sits there.
    async fn room_handle(&self, room_id: Uuid) -> Arc<RwLock<RoomState>> {
        let mut rooms = self.inner.rooms.write().await;
        rooms.entry(room_id).or_default().clone()
    }

    async fn existing_room(&self, room_id: Uuid) -> Option<Arc<RwLock<RoomState>>> {
        self.inner.rooms.read().await.get(&room_id).cloned()
    }

    /// Drop a session from a room; returns whether the user still has another
    /// session present there. Clears the typing flag when the last session of
    /// that user leaves.
    async fn remove_session_from_room(
        &self,
        room_id: Uuid,
        session_id: SessionId,
        user_id: Uuid,
    ) -> bool {
        let Some(room) = self.existing_room(room_id).await else {
            return false;
        };

        let remaining: Vec<SessionId> = {
            let mut state = room.write().await;
            state.sessions.remove(&session_id);
            state.sessions.iter().copied().collect()
        };

        let still_present = {
            let sessions = self.inner.sessions.read().await;
            remaining
                .iter()
                .any(|sid| sessions.get(sid).is_some_and(|e| e.user_id == user_id))
        };

        if !still_present {
            room.write().await.typing.remove(&user_id);
        }
        still_present
    }
}
