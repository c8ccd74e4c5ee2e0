use anyhow::Result;
use chrono::{DateTime, Utc};

use pulse_types::models::{Notification, NotificationKind, Priority};

use crate::Store;
use crate::models::{parse_opt_ts, parse_ts, parse_uuid};

impl Store {
    pub fn insert_notification(&self, n: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, recipient_id, sender_id, kind, title,
                    message, data, read, read_at, priority, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    n.id.to_string(),
                    n.recipient_id.to_string(),
                    n.sender_id.map(|id| id.to_string()),
                    n.kind.as_str(),
                    n.title,
                    n.message,
                    n.data.to_string(),
                    n.read,
                    n.read_at.map(|t| t.to_rfc3339()),
                    n.priority.as_str(),
                    n.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, recipient_id, sender_id, kind, title, message, data,
                        read, read_at, priority, created_at
                 FROM notifications
                 WHERE recipient_id = ?1 {}
                 ORDER BY created_at DESC
                 LIMIT ?2 OFFSET ?3",
                if unread_only { "AND read = 0" } else { "" }
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![recipient_id, limit, offset], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, bool>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(
                    |(id, recipient, sender, kind, title, message, data, read, read_at, priority, created_at)| {
                        Ok(Notification {
                            id: parse_uuid(&id, "notification id")?,
                            recipient_id: parse_uuid(&recipient, "notification recipient")?,
                            sender_id: sender
                                .as_deref()
                                .map(|s| parse_uuid(s, "notification sender"))
                                .transpose()?,
                            kind: NotificationKind::parse(&kind),
                            title,
                            message,
                            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                            read,
                            read_at: parse_opt_ts(read_at.as_deref(), "notification read timestamp")?,
                            priority: Priority::parse(&priority),
                            created_at: parse_ts(&created_at, "notification created timestamp")?,
                        })
                    },
                )
                .collect()
        })
    }

    pub fn count_notifications(&self, recipient_id: &str, unread_only: bool) -> Result<u64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 {}",
                if unread_only { "AND read = 0" } else { "" }
            );
            let n: i64 = conn.query_row(&sql, [recipient_id], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    /// Mark one notification read, scoped to its recipient. Returns false if
    /// no such notification exists for that recipient.
    pub fn mark_notification_read(
        &self,
        notification_id: &str,
        recipient_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1, read_at = ?3
                 WHERE id = ?1 AND recipient_id = ?2",
                rusqlite::params![notification_id, recipient_id, read_at.to_rfc3339()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_all_notifications_read(
        &self,
        recipient_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE notifications SET read = 1, read_at = ?2
                 WHERE recipient_id = ?1 AND read = 0",
                rusqlite::params![recipient_id, read_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn delete_notification(&self, notification_id: &str, recipient_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
                (notification_id, recipient_id),
            )?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::Store;

    use super::*;

    fn notification_for(recipient: Uuid) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            sender_id: None,
            kind: NotificationKind::Comment,
            title: "New comment".into(),
            message: "someone replied".into(),
            data: serde_json::json!({"blog_id": "abc"}),
            read: false,
            read_at: None,
            priority: Priority::Medium,
            created_at: Utc::now(),
        }
    }

    fn store_with_recipient() -> (Store, Uuid) {
        let store = Store::open_in_memory().unwrap();
        let recipient = Uuid::new_v4();
        store
            .create_user(&recipient.to_string(), "ada", "hash")
            .unwrap();
        (store, recipient)
    }

    #[test]
    fn unread_filter_and_counts() {
        let (store, recipient) = store_with_recipient();
        let a = notification_for(recipient);
        let b = notification_for(recipient);
        store.insert_notification(&a).unwrap();
        store.insert_notification(&b).unwrap();

        store
            .mark_notification_read(&a.id.to_string(), &recipient.to_string(), Utc::now())
            .unwrap();

        let unread = store
            .list_notifications(&recipient.to_string(), true, 20, 0)
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, b.id);
        assert_eq!(store.count_notifications(&recipient.to_string(), true).unwrap(), 1);
        assert_eq!(store.count_notifications(&recipient.to_string(), false).unwrap(), 2);
    }

    #[test]
    fn mark_read_is_scoped_to_the_recipient() {
        let (store, recipient) = store_with_recipient();
        let n = notification_for(recipient);
        store.insert_notification(&n).unwrap();

        // A different user cannot flip someone else's notification.
        let updated = store
            .mark_notification_read(&n.id.to_string(), &Uuid::new_v4().to_string(), Utc::now())
            .unwrap();
        assert!(!updated);

        let updated = store
            .mark_notification_read(&n.id.to_string(), &recipient.to_string(), Utc::now())
            .unwrap();
        assert!(updated);

        let listed = store
            .list_notifications(&recipient.to_string(), false, 20, 0)
            .unwrap();
        assert!(listed[0].read);
        assert!(listed[0].read_at.is_some());
    }

    #[test]
    fn mark_all_and_delete() {
        let (store, recipient) = store_with_recipient();
        for _ in 0..3 {
            store.insert_notification(&notification_for(recipient)).unwrap();
        }

        store
            .mark_all_notifications_read(&recipient.to_string(), Utc::now())
            .unwrap();
        assert_eq!(store.count_notifications(&recipient.to_string(), true).unwrap(), 0);

        let listed = store
            .list_notifications(&recipient.to_string(), false, 20, 0)
            .unwrap();
        let deleted = store
            .delete_notification(&listed[0].id.to_string(), &recipient.to_string())
            .unwrap();
        assert!(deleted);
        assert_eq!(store.count_notifications(&recipient.to_string(), false).unwrap(), 2);
    }
}
