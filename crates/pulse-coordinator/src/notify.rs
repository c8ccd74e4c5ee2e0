use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use pulse_types::events::ServerEvent;
use pulse_types::models::{Notification, NotificationKind, Priority};

use crate::Coordinator;
use crate::error::{CoordinatorError, Result};

/// Notification fanout: persist first, then push to whichever of the
/// recipient's sessions happen to be live. Offline recipients find the
/// notification in their list on next fetch.
impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub async fn notify(
        &self,
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        kind: NotificationKind,
        title: &str,
        message: &str,
        data: serde_json::Value,
        priority: Priority,
    ) -> Result<Notification> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(CoordinatorError::Validation(
                "notification title is required".into(),
            ));
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id,
            sender_id,
            kind,
            title,
            message: message.to_string(),
            data,
            read: false,
            read_at: None,
            priority,
            created_at: Utc::now(),
        };

        let recipient = recipient_id.to_string();
        let exists = self
            .run_blocking(move |store| Ok(store.get_user_by_id(&recipient)?.is_some()))
            .await?;
        if !exists {
            return Err(CoordinatorError::NotFound("recipient"));
        }

        let stored = notification.clone();
        self.run_blocking(move |store| store.insert_notification(&stored))
            .await?;

        let delivered = self
            .registry
            .send_to_user(
                recipient_id,
                &ServerEvent::NewNotification {
                    notification: notification.clone(),
                },
            )
            .await;
        debug!(%recipient_id, delivered, "notification dispatched");

        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pulse_store::Store;

    use super::*;
    use crate::registry::SessionUser;

    async fn setup() -> (Coordinator, Uuid) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let recipient = Uuid::new_v4();
        store
            .create_user(&recipient.to_string(), "ada", "hash")
            .unwrap();
        (Coordinator::new(store), recipient)
    }

    #[tokio::test]
    async fn delivered_live_and_persisted_unread() {
        let (coordinator, recipient) = setup().await;
        let mut connected = coordinator
            .registry()
            .connect(&SessionUser {
                user_id: recipient,
                username: "ada".into(),
            })
            .await;

        let sent = coordinator
            .notify(
                recipient,
                None,
                NotificationKind::Comment,
                "New comment",
                "someone replied to your article",
                serde_json::json!({"blog_id": "abc"}),
                Priority::Medium,
            )
            .await
            .unwrap();

        match connected.rx.recv().await.unwrap() {
            ServerEvent::NewNotification { notification } => {
                assert_eq!(notification.id, sent.id);
                assert!(!notification.read);
            }
            other => panic!("expected notification, got {other:?}"),
        }

        // Delivery does not mark it read; only an explicit call does.
        let listed = coordinator
            .store()
            .list_notifications(&recipient.to_string(), true, 20, 0)
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_a_persisted_copy() {
        let (coordinator, recipient) = setup().await;

        coordinator
            .notify(
                recipient,
                None,
                NotificationKind::System,
                "Welcome",
                "hello",
                serde_json::Value::Null,
                Priority::Low,
            )
            .await
            .unwrap();

        let listed = coordinator
            .store()
            .list_notifications(&recipient.to_string(), false, 20, 0)
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Welcome");
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_found() {
        let (coordinator, _) = setup().await;
        let err = coordinator
            .notify(
                Uuid::new_v4(),
                None,
                NotificationKind::System,
                "Hi",
                "body",
                serde_json::Value::Null,
                Priority::Medium,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }
}
