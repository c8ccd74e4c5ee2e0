use chrono::Utc;
use uuid::Uuid;

use pulse_types::api::{CreatePollRequest, UpdatePollRequest};
use pulse_types::events::ServerEvent;
use pulse_types::models::{Poll, PollOption, PollStatus};

use crate::Coordinator;
use crate::error::{CoordinatorError, Result};
use crate::registry::SessionUser;

const DEFAULT_OPTION_COLOR: &str = "#3b82f6";

/// Poll lifecycle and voting. Every mutation of one poll serializes through
/// that poll's lock, so the read-modify-write of a vote can never interleave
/// with another vote or a status flip.
impl Coordinator {
    pub async fn create_poll(&self, creator: &SessionUser, req: CreatePollRequest) -> Result<Poll> {
        let title = req.title.trim().to_string();
        if title.is_empty() {
            return Err(CoordinatorError::Validation("poll title is required".into()));
        }
        if req.options.len() < 2 {
            return Err(CoordinatorError::Validation(
                "a poll needs at least two options".into(),
            ));
        }

        let options = req
            .options
            .into_iter()
            .map(|o| {
                let text = o.text.trim().to_string();
                if text.is_empty() {
                    return Err(CoordinatorError::Validation(
                        "poll option text is required".into(),
                    ));
                }
                Ok(PollOption {
                    text,
                    color: o.color.unwrap_or_else(|| DEFAULT_OPTION_COLOR.to_string()),
                    votes: vec![],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let poll = Poll {
            id: Uuid::new_v4(),
            title,
            description: req.description,
            options,
            creator_id: creator.user_id,
            creator_name: creator.username.clone(),
            room_id: req.room_id,
            settings: req.settings,
            status: PollStatus::Active,
            ends_at: req.ends_at,
            total_votes: 0,
            created_at: Utc::now(),
        };

        let stored = poll.clone();
        self.run_blocking(move |store| {
            if let Some(room_id) = stored.room_id {
                store.ensure_room(&room_id.to_string())?;
            }
            store.insert_poll(&stored)
        })
        .await?;

        self.broadcast_poll(&poll).await;
        Ok(poll)
    }

    /// Cast a vote and return the refreshed poll aggregate.
    ///
    /// Single-vote polls treat a vote for a different option as switching:
    /// the previous votes are cleared in the same transaction, and re-voting
    /// the option the user already holds is rejected without mutating
    /// anything. Multi-vote polls accept every vote, repeats included.
    /// A poll past its end date is marked ended lazily, on the first vote
    /// that observes the expiry.
    pub async fn vote(&self, user_id: Uuid, poll_id: Uuid, option_index: usize) -> Result<Poll> {
        let _guard = self.poll_locks.acquire(poll_id).await;

        let poll = self.get_poll(poll_id).await?;

        if poll.status != PollStatus::Active {
            return Err(CoordinatorError::State("poll is not active".into()));
        }
        if let Some(ends_at) = poll.ends_at {
            if Utc::now() >= ends_at {
                let pid = poll_id.to_string();
                self.run_blocking(move |store| store.set_poll_status(&pid, PollStatus::Ended))
                    .await?;
                return Err(CoordinatorError::State("poll has ended".into()));
            }
        }
        if option_index >= poll.options.len() {
            return Err(CoordinatorError::Validation(format!(
                "option index {option_index} is out of range"
            )));
        }
        if !poll.settings.allow_multiple_votes
            && poll.options[option_index]
                .votes
                .iter()
                .any(|v| v.user_id == user_id)
        {
            return Err(CoordinatorError::DuplicateVote);
        }

        let pid = poll_id.to_string();
        let uid = user_id.to_string();
        let clear_previous = !poll.settings.allow_multiple_votes;
        let now = Utc::now();
        self.run_blocking(move |store| {
            store.record_vote(&pid, option_index, &uid, clear_previous, now)
        })
        .await?;

        let poll = self.get_poll(poll_id).await?;
        self.broadcast_poll(&poll).await;
        Ok(poll)
    }

    /// Append an option to an open poll, when the poll allows it.
    pub async fn add_option(&self, poll_id: Uuid, text: &str, color: Option<String>) -> Result<Poll> {
        let _guard = self.poll_locks.acquire(poll_id).await;

        let poll = self.get_poll(poll_id).await?;
        if !poll.settings.allow_add_options {
            return Err(CoordinatorError::Authorization(
                "this poll does not accept new options".into(),
            ));
        }
        if poll.status != PollStatus::Active {
            return Err(CoordinatorError::State("poll is not active".into()));
        }
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(CoordinatorError::Validation(
                "poll option text is required".into(),
            ));
        }

        let pid = poll_id.to_string();
        let color = color.unwrap_or_else(|| DEFAULT_OPTION_COLOR.to_string());
        self.run_blocking(move |store| store.add_poll_option(&pid, &text, &color))
            .await?;

        let poll = self.get_poll(poll_id).await?;
        self.broadcast_poll(&poll).await;
        Ok(poll)
    }

    /// Partial update of a poll's metadata or status. Creator-only.
    pub async fn update_poll(
        &self,
        caller: Uuid,
        poll_id: Uuid,
        req: UpdatePollRequest,
    ) -> Result<Poll> {
        let _guard = self.poll_locks.acquire(poll_id).await;

        let poll = self.get_poll(poll_id).await?;
        if poll.creator_id != caller {
            return Err(CoordinatorError::Authorization(
                "only the creator can update a poll".into(),
            ));
        }

        let pid = poll_id.to_string();
        self.run_blocking(move |store| {
            store.update_poll(
                &pid,
                req.title.as_deref(),
                req.description.as_deref(),
                req.ends_at,
                req.status,
            )
        })
        .await?;

        let poll = self.get_poll(poll_id).await?;
        self.broadcast_poll(&poll).await;
        Ok(poll)
    }

    /// Delete a poll. Permitted for the creator or the owner of the poll's
    /// room.
    pub async fn delete_poll(&self, caller: Uuid, poll_id: Uuid) -> Result<()> {
        let _guard = self.poll_locks.acquire(poll_id).await;

        let poll = self.get_poll(poll_id).await?;
        if poll.creator_id != caller {
            let owner = match poll.room_id {
                Some(room_id) => {
                    let rid = room_id.to_string();
                    self.run_blocking(move |store| store.room_owner(&rid)).await?
                }
                None => None,
            };
            let is_owner = owner
                .and_then(|o| o.parse::<Uuid>().ok())
                .is_some_and(|o| o == caller);
            if !is_owner {
                return Err(CoordinatorError::Authorization(
                    "not authorized to delete this poll".into(),
                ));
            }
        }

        let pid = poll_id.to_string();
        self.run_blocking(move |store| store.delete_poll(&pid)).await
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Poll> {
        let pid = poll_id.to_string();
        self.run_blocking(move |store| store.get_poll(&pid))
            .await?
            .ok_or(CoordinatorError::NotFound("poll"))
    }

    async fn broadcast_poll(&self, poll: &Poll) {
        if let Some(room_id) = poll.room_id {
            self.registry
                .broadcast_to_room(
                    room_id,
                    &ServerEvent::PollUpdated {
                        poll_id: poll.id,
                        poll: poll.clone(),
                    },
                    None,
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use pulse_store::Store;
    use pulse_types::api::NewPollOption;
    use pulse_types::models::PollSettings;

    use super::*;

    struct Fixture {
        coordinator: Coordinator,
        creator: SessionUser,
        voter: Uuid,
        room: Uuid,
    }

    async fn setup() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let creator = SessionUser {
            user_id: Uuid::new_v4(),
            username: "ada".into(),
        };
        let voter = Uuid::new_v4();
        store
            .create_user(&creator.user_id.to_string(), "ada", "hash")
            .unwrap();
        store.create_user(&voter.to_string(), "bob", "hash").unwrap();

        let room = Uuid::new_v4();
        store
            .create_room(&room.to_string(), &creator.user_id.to_string())
            .unwrap();

        Fixture {
            coordinator: Coordinator::new(store),
            creator,
            voter,
            room,
        }
    }

    fn request(f: &Fixture, settings: PollSettings) -> CreatePollRequest {
        CreatePollRequest {
            title: "Favorite language?".into(),
            description: None,
            options: vec![
                NewPollOption { text: "Rust".into(), color: None },
                NewPollOption { text: "Go".into(), color: Some("#ef4444".into()) },
            ],
            room_id: Some(f.room),
            settings,
            ends_at: None,
        }
    }

    #[tokio::test]
    async fn create_validates_title_and_option_count() {
        let f = setup().await;

        let mut req = request(&f, PollSettings::default());
        req.title = "  ".into();
        let err = f.coordinator.create_poll(&f.creator, req).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));

        let mut req = request(&f, PollSettings::default());
        req.options.truncate(1);
        let err = f.coordinator.create_poll(&f.creator, req).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));

        let poll = f
            .coordinator
            .create_poll(&f.creator, request(&f, PollSettings::default()))
            .await
            .unwrap();
        assert_eq!(poll.status, PollStatus::Active);
        assert_eq!(poll.options[0].color, DEFAULT_OPTION_COLOR);
        assert_eq!(poll.options[1].color, "#ef4444");
        assert_eq!(poll.creator_name, "ada");
    }

    #[tokio::test]
    async fn single_vote_poll_switches_instead_of_accumulating() {
        let f = setup().await;
        let poll = f
            .coordinator
            .create_poll(&f.creator, request(&f, PollSettings::default()))
            .await
            .unwrap();

        // Vote B, then switch to A: one vote total, on A.
        let after_b = f.coordinator.vote(f.voter, poll.id, 1).await.unwrap();
        assert_eq!(after_b.total_votes, 1);
        assert_eq!(after_b.options[1].votes.len(), 1);

        let after_a = f.coordinator.vote(f.voter, poll.id, 0).await.unwrap();
        assert_eq!(after_a.total_votes, 1);
        assert_eq!(after_a.options[0].votes.len(), 1);
        assert!(after_a.options[1].votes.is_empty());

        // total_votes equals the sum of per-option vote counts.
        let summed: usize = after_a.options.iter().map(|o| o.votes.len()).sum();
        assert_eq!(after_a.total_votes as usize, summed);
    }

    #[tokio::test]
    async fn revoting_the_same_option_is_rejected() {
        let f = setup().await;
        let poll = f
            .coordinator
            .create_poll(&f.creator, request(&f, PollSettings::default()))
            .await
            .unwrap();

        f.coordinator.vote(f.voter, poll.id, 0).await.unwrap();
        let err = f.coordinator.vote(f.voter, poll.id, 0).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateVote));

        let current = f
            .coordinator
            .store()
            .get_poll(&poll.id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(current.total_votes, 1);
    }

    #[tokio::test]
    async fn multi_vote_poll_accumulates_across_options() {
        let f = setup().await;
        let settings = PollSettings {
            allow_multiple_votes: true,
            ..PollSettings::default()
        };
        let poll = f
            .coordinator
            .create_poll(&f.creator, request(&f, settings))
            .await
            .unwrap();

        f.coordinator.vote(f.voter, poll.id, 0).await.unwrap();
        let after = f.coordinator.vote(f.voter, poll.id, 1).await.unwrap();
        assert_eq!(after.total_votes, 2);
        assert_eq!(after.options[0].votes.len(), 1);
        assert_eq!(after.options[1].votes.len(), 1);

        // Repeating an option the voter already holds stacks another vote.
        let after = f.coordinator.vote(f.voter, poll.id, 0).await.unwrap();
        assert_eq!(after.total_votes, 3);
        assert_eq!(after.options[0].votes.len(), 2);
    }

    #[tokio::test]
    async fn out_of_range_option_is_a_validation_error() {
        let f = setup().await;
        let poll = f
            .coordinator
            .create_poll(&f.creator, request(&f, PollSettings::default()))
            .await
            .unwrap();

        let err = f.coordinator.vote(f.voter, poll.id, 2).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[tokio::test]
    async fn expired_poll_is_ended_lazily_on_vote() {
        let f = setup().await;
        let mut req = request(&f, PollSettings::default());
        req.ends_at = Some(Utc::now() - Duration::minutes(1));
        let poll = f.coordinator.create_poll(&f.creator, req).await.unwrap();

        let err = f.coordinator.vote(f.voter, poll.id, 0).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::State(_)));

        // The expiry is persisted, so the next attempt fails on status alone.
        let current = f
            .coordinator
            .store()
            .get_poll(&poll.id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(current.status, PollStatus::Ended);

        let err = f.coordinator.vote(f.voter, poll.id, 0).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::State(_)));
    }

    #[tokio::test]
    async fn add_option_respects_settings_and_status() {
        let f = setup().await;

        // Default settings forbid adding options.
        let poll = f
            .coordinator
            .create_poll(&f.creator, request(&f, PollSettings::default()))
            .await
            .unwrap();
        let err = f
            .coordinator
            .add_option(poll.id, "Zig", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Authorization(_)));

        let settings = PollSettings {
            allow_add_options: true,
            ..PollSettings::default()
        };
        let poll = f
            .coordinator
            .create_poll(&f.creator, request(&f, settings))
            .await
            .unwrap();
        let updated = f.coordinator.add_option(poll.id, "Zig", None).await.unwrap();
        assert_eq!(updated.options.len(), 3);
        assert_eq!(updated.options[2].text, "Zig");

        // Ended polls accept no new options.
        f.coordinator
            .store()
            .set_poll_status(&poll.id.to_string(), PollStatus::Ended)
            .unwrap();
        let err = f
            .coordinator
            .add_option(poll.id, "Hare", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::State(_)));
    }

    #[tokio::test]
    async fn update_is_creator_only_and_delete_allows_room_owner() {
        let f = setup().await;
        let stranger = Uuid::new_v4();
        f.coordinator
            .store()
            .create_user(&stranger.to_string(), "carol", "hash")
            .unwrap();

        let bob = SessionUser {
            user_id: f.voter,
            username: "bob".into(),
        };
        let poll = f
            .coordinator
            .create_poll(&bob, request(&f, PollSettings::default()))
            .await
            .unwrap();

        let err = f
            .coordinator
            .update_poll(
                stranger,
                poll.id,
                UpdatePollRequest {
                    title: Some("hijacked".into()),
                    description: None,
                    ends_at: None,
                    status: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Authorization(_)));

        let updated = f
            .coordinator
            .update_poll(
                bob.user_id,
                poll.id,
                UpdatePollRequest {
                    title: None,
                    description: None,
                    ends_at: None,
                    status: Some(PollStatus::Ended),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, PollStatus::Ended);

        // Strangers cannot delete; the room owner (ada) can.
        let err = f.coordinator.delete_poll(stranger, poll.id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Authorization(_)));

        f.coordinator
            .delete_poll(f.creator.user_id, poll.id)
            .await
            .unwrap();
        assert!(f
            .coordinator
            .store()
            .get_poll(&poll.id.to_string())
            .unwrap()
            .is_none());
    }
}
