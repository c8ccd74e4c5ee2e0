use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use pulse_types::models::{ActiveUser, ChatMessage, ChatSettings, Reaction};

use super::OptionalExt;
use crate::Store;
use crate::models::{MessageRow, ReactionRow, parse_ts, parse_uuid};

impl Store {
    // -- Rooms (ChatThread heads) --

    /// Create the thread row for a room if it does not exist yet. Rooms are
    /// created lazily on first join and never destroyed.
    pub fn ensure_room(&self, room_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("INSERT OR IGNORE INTO rooms (id) VALUES (?1)", [room_id])?;
            Ok(())
        })
    }

    /// Register a room with its owning user. The blog service owns this
    /// mapping; tests and fixtures call it directly.
    pub fn create_room(&self, room_id: &str, owner_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, owner_id) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET owner_id = excluded.owner_id",
                (room_id, owner_id),
            )?;
            Ok(())
        })
    }

    pub fn room_owner(&self, room_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let owner: Option<Option<String>> = conn
                .query_row(
                    "SELECT owner_id FROM rooms WHERE id = ?1",
                    [room_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(owner.flatten())
        })
    }

    /// Per-room chat settings; defaults apply when the room row is absent.
    pub fn chat_settings(&self, room_id: &str) -> Result<ChatSettings> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT allow_anonymous, moderation_enabled, max_message_length
                     FROM rooms WHERE id = ?1",
                    [room_id],
                    |row| {
                        Ok(ChatSettings {
                            allow_anonymous: row.get(0)?,
                            moderation_enabled: row.get(1)?,
                            max_message_length: row.get::<_, i64>(2)? as usize,
                        })
                    },
                )
                .optional()?;
            Ok(row.unwrap_or_default())
        })
    }

    pub fn update_chat_settings(
        &self,
        room_id: &str,
        allow_anonymous: Option<bool>,
        moderation_enabled: Option<bool>,
        max_message_length: Option<usize>,
    ) -> Result<ChatSettings> {
        self.with_conn(|conn| {
            conn.execute("INSERT OR IGNORE INTO rooms (id) VALUES (?1)", [room_id])?;
            conn.execute(
                "UPDATE rooms SET
                    allow_anonymous    = COALESCE(?2, allow_anonymous),
                    moderation_enabled = COALESCE(?3, moderation_enabled),
                    max_message_length = COALESCE(?4, max_message_length)
                 WHERE id = ?1",
                rusqlite::params![
                    room_id,
                    allow_anonymous,
                    moderation_enabled,
                    max_message_length.map(|n| n as i64)
                ],
            )?;
            Ok(())
        })?;
        self.chat_settings(room_id)
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        sender_id: &str,
        content: &str,
        kind: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, room_id, sender_id, content, kind, created_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, room_id: &str, message_id: &str) -> Result<Option<ChatMessage>> {
        self.with_conn(|conn| {
            let row = query_message_row(
                conn,
                "WHERE m.room_id = ?1 AND m.id = ?2",
                rusqlite::params![room_id, message_id],
            )?;
            match row {
                Some(row) => {
                    let reactions = query_reactions(conn, message_id)?;
                    Ok(Some(row.into_message(reactions)?))
                }
                None => Ok(None),
            }
        })
    }

    /// Most recent `limit` messages in a room, oldest first, reactions attached.
    pub fn recent_messages(&self, room_id: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let mut rows = query_message_page(conn, room_id, limit, 0)?;
            rows.reverse();
            assemble_messages(conn, rows)
        })
    }

    /// One page of messages, newest first, for the REST history endpoint.
    pub fn page_messages(&self, room_id: &str, limit: u32, offset: u32) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let rows = query_message_page(conn, room_id, limit, offset)?;
            assemble_messages(conn, rows)
        })
    }

    pub fn count_messages(&self, room_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE room_id = ?1",
                [room_id],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    pub fn set_message_content(
        &self,
        message_id: &str,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, edited = 1, edited_at = ?3 WHERE id = ?1",
                rusqlite::params![message_id, content, edited_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn delete_message(&self, message_id: &str) -> Result<()> {
        // Reactions go with the message via ON DELETE CASCADE.
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
            Ok(())
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if the (message, user, emoji) tuple exists,
    /// inserts otherwise. Returns true if the reaction was added.
    pub fn toggle_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, message_id, user_id, emoji, created_at.to_rfc3339()],
                )?;
                Ok(true)
            }
        })
    }

    /// The complete current reaction list for one message.
    pub fn reactions_for_message(&self, message_id: &str) -> Result<Vec<Reaction>> {
        self.with_conn(|conn| query_reactions(conn, message_id))
    }

    // -- Active-user mirror --

    /// Add a user to a room's persisted active list, or refresh their
    /// last-seen timestamp if already present. Never duplicates.
    pub fn upsert_active_user(
        &self,
        room_id: &str,
        user_id: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO active_users (room_id, user_id, last_seen) VALUES (?1, ?2, ?3)
                 ON CONFLICT(room_id, user_id) DO UPDATE SET last_seen = excluded.last_seen",
                rusqlite::params![room_id, user_id, last_seen.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn remove_active_user(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM active_users WHERE room_id = ?1 AND user_id = ?2",
                (room_id, user_id),
            )?;
            Ok(())
        })
    }

    pub fn active_users(&self, room_id: &str) -> Result<Vec<ActiveUser>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.user_id, u.username, a.last_seen, a.is_typing
                 FROM active_users a
                 LEFT JOIN users u ON a.user_id = u.id
                 WHERE a.room_id = ?1
                 ORDER BY a.last_seen DESC",
            )?;

            let rows = stmt
                .query_map([room_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(user_id, username, last_seen, is_typing)| {
                    Ok(ActiveUser {
                        user_id: parse_uuid(&user_id, "active user id")?,
                        username: username.unwrap_or_else(|| "unknown".to_string()),
                        last_seen: parse_ts(&last_seen, "active user last seen")?,
                        is_typing,
                    })
                })
                .collect()
        })
    }
}

const MESSAGE_SELECT: &str =
    "SELECT m.id, m.room_id, m.sender_id, u.username, m.content, m.kind, m.created_at,
            m.edited, m.edited_at
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        kind: row.get(5)?,
        created_at: row.get(6)?,
        edited: row.get(7)?,
        edited_at: row.get(8)?,
    })
}

fn query_message_row(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Option<MessageRow>> {
    let sql = format!("{MESSAGE_SELECT} {where_clause}");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row(params, map_message_row).optional()?;
    Ok(row)
}

fn query_message_page(
    conn: &Connection,
    room_id: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "{MESSAGE_SELECT}
         WHERE m.room_id = ?1
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![room_id, limit, offset], map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_reactions(conn: &Connection, message_id: &str) -> Result<Vec<Reaction>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, user_id, emoji, created_at FROM reactions
         WHERE message_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt
        .query_map([message_id], |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(|r| r.into_reaction()).collect()
}

/// Batch-fetch reactions for a page of messages and attach them.
fn assemble_messages(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<ChatMessage>> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=rows.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji, created_at FROM reactions
         WHERE message_id IN ({}) ORDER BY created_at",
        placeholders.join(", ")
    );

    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let reaction_rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_message: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in reaction_rows {
        let message_id = r.message_id.clone();
        by_message.entry(message_id).or_default().push(r.into_reaction()?);
    }

    rows.into_iter()
        .map(|row| {
            let reactions = by_message.remove(&row.id).unwrap_or_default();
            row.into_message(reactions)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn store_with_user() -> (Store, String, String) {
        let store = Store::open_in_memory().unwrap();
        let user_id = Uuid::new_v4().to_string();
        store.create_user(&user_id, "ada", "hash").unwrap();
        let room_id = Uuid::new_v4().to_string();
        store.ensure_room(&room_id).unwrap();
        (store, user_id, room_id)
    }

    fn seed_messages(store: &Store, room_id: &str, sender: &str, n: usize) -> Vec<String> {
        let base = Utc::now() - Duration::minutes(n as i64);
        (0..n)
            .map(|i| {
                let id = Uuid::new_v4().to_string();
                store
                    .insert_message(
                        &id,
                        room_id,
                        sender,
                        &format!("message {i}"),
                        "text",
                        base + Duration::minutes(i as i64),
                    )
                    .unwrap();
                id
            })
            .collect()
    }

    #[test]
    fn recent_messages_are_oldest_first_and_windowed() {
        let (store, user, room) = store_with_user();
        seed_messages(&store, &room, &user, 5);

        let recent = store.recent_messages(&room, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "message 2");
        assert_eq!(recent[2].content, "message 4");
        assert!(recent[0].timestamp < recent[2].timestamp);
    }

    #[test]
    fn paging_walks_backwards_through_history() {
        let (store, user, room) = store_with_user();
        seed_messages(&store, &room, &user, 5);

        // Newest first, two per page.
        let first = store.page_messages(&room, 2, 0).unwrap();
        assert_eq!(first[0].content, "message 4");
        assert_eq!(first[1].content, "message 3");

        let third = store.page_messages(&room, 2, 4).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].content, "message 0");

        assert_eq!(store.count_messages(&room).unwrap(), 5);
    }

    #[test]
    fn reaction_toggle_round_trip() {
        let (store, user, room) = store_with_user();
        let ids = seed_messages(&store, &room, &user, 1);
        let mid = &ids[0];

        let added = store
            .toggle_reaction(&Uuid::new_v4().to_string(), mid, &user, "🔥", Utc::now())
            .unwrap();
        assert!(added);
        assert_eq!(store.reactions_for_message(mid).unwrap().len(), 1);

        // Same tuple toggles off, even with a fresh reaction id.
        let added = store
            .toggle_reaction(&Uuid::new_v4().to_string(), mid, &user, "🔥", Utc::now())
            .unwrap();
        assert!(!added);
        assert!(store.reactions_for_message(mid).unwrap().is_empty());
    }

    #[test]
    fn reactions_cascade_on_message_delete() {
        let (store, user, room) = store_with_user();
        let ids = seed_messages(&store, &room, &user, 1);
        store
            .toggle_reaction(&Uuid::new_v4().to_string(), &ids[0], &user, "👍", Utc::now())
            .unwrap();

        store.delete_message(&ids[0]).unwrap();
        assert!(store.reactions_for_message(&ids[0]).unwrap().is_empty());
    }

    #[test]
    fn active_user_upsert_never_duplicates() {
        let (store, user, room) = store_with_user();

        store.upsert_active_user(&room, &user, Utc::now()).unwrap();
        let later = Utc::now() + Duration::seconds(30);
        store.upsert_active_user(&room, &user, later).unwrap();

        let active = store.active_users(&room).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].last_seen, later);
        assert_eq!(active[0].username, "ada");
    }

    #[test]
    fn settings_default_and_partial_update() {
        let (store, _user, room) = store_with_user();

        let settings = store.chat_settings(&room).unwrap();
        assert_eq!(settings.max_message_length, 1000);
        assert!(settings.moderation_enabled);

        let updated = store
            .update_chat_settings(&room, None, None, Some(500))
            .unwrap();
        assert_eq!(updated.max_message_length, 500);
        // Untouched fields keep their values.
        assert!(updated.moderation_enabled);

        // Unknown rooms read as defaults rather than an error.
        let missing = store.chat_settings(&Uuid::new_v4().to_string()).unwrap();
        assert_eq!(missing.max_message_length, 1000);
    }
}
