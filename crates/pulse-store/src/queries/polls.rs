use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use pulse_types::models::{Poll, PollOption, PollSettings, PollStatus, ShowResults, Vote};

use super::OptionalExt;
use crate::Store;
use crate::models::{parse_opt_ts, parse_ts, parse_uuid};

impl Store {
    pub fn insert_poll(&self, poll: &Poll) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO polls (id, title, description, creator_id, room_id,
                    allow_multiple_votes, show_results, allow_add_options, require_auth,
                    status, ends_at, total_votes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    poll.id.to_string(),
                    poll.title,
                    poll.description,
                    poll.creator_id.to_string(),
                    poll.room_id.map(|id| id.to_string()),
                    poll.settings.allow_multiple_votes,
                    poll.settings.show_results.as_str(),
                    poll.settings.allow_add_options,
                    poll.settings.require_auth,
                    poll.status.as_str(),
                    poll.ends_at.map(|t| t.to_rfc3339()),
                    poll.total_votes as i64,
                    poll.created_at.to_rfc3339(),
                ],
            )?;

            for (idx, option) in poll.options.iter().enumerate() {
                tx.execute(
                    "INSERT INTO poll_options (poll_id, idx, text, color) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![poll.id.to_string(), idx as i64, option.text, option.color],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Load one poll as a whole aggregate: options in order, votes attached,
    /// creator identity resolved.
    pub fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>> {
        self.with_conn(|conn| query_poll(conn, poll_id))
    }

    pub fn polls_for_room(&self, room_id: &str, status: Option<&str>) -> Result<Vec<Poll>> {
        self.with_conn(|conn| {
            let ids: Vec<String> = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(
                        "SELECT id FROM polls WHERE room_id = ?1 AND status = ?2
                         ORDER BY created_at DESC",
                    )?;
                    let rows = stmt.query_map((room_id, status), |row| row.get(0))?;
                    rows.collect::<std::result::Result<_, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id FROM polls WHERE room_id = ?1 ORDER BY created_at DESC",
                    )?;
                    let rows = stmt.query_map([room_id], |row| row.get(0))?;
                    rows.collect::<std::result::Result<_, _>>()?
                }
            };

            let mut polls = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(poll) = query_poll(conn, &id)? {
                    polls.push(poll);
                }
            }
            Ok(polls)
        })
    }

    /// Record a vote as one atomic read-modify-write against the poll
    /// aggregate: optionally clear the user's previous votes, append the new
    /// one, and recompute `total_votes` from scratch.
    pub fn record_vote(
        &self,
        poll_id: &str,
        option_idx: usize,
        user_id: &str,
        clear_previous: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if clear_previous {
                tx.execute(
                    "DELETE FROM poll_votes WHERE poll_id = ?1 AND user_id = ?2",
                    (poll_id, user_id),
                )?;
            }

            tx.execute(
                "INSERT INTO poll_votes (poll_id, option_idx, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![poll_id, option_idx as i64, user_id, now.to_rfc3339()],
            )?;

            tx.execute(
                "UPDATE polls SET total_votes =
                    (SELECT COUNT(*) FROM poll_votes WHERE poll_id = ?1)
                 WHERE id = ?1",
                [poll_id],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    pub fn set_poll_status(&self, poll_id: &str, status: PollStatus) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE polls SET status = ?2 WHERE id = ?1",
                (poll_id, status.as_str()),
            )?;
            Ok(())
        })
    }

    pub fn update_poll(
        &self,
        poll_id: &str,
        title: Option<&str>,
        description: Option<&str>,
        ends_at: Option<DateTime<Utc>>,
        status: Option<PollStatus>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE polls SET
                    title       = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    ends_at     = COALESCE(?4, ends_at),
                    status      = COALESCE(?5, status)
                 WHERE id = ?1",
                rusqlite::params![
                    poll_id,
                    title,
                    description,
                    ends_at.map(|t| t.to_rfc3339()),
                    status.map(|s| s.as_str()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn delete_poll(&self, poll_id: &str) -> Result<()> {
        // Options and votes cascade.
        self.with_conn(|conn| {
            conn.execute("DELETE FROM polls WHERE id = ?1", [poll_id])?;
            Ok(())
        })
    }

    pub fn add_poll_option(&self, poll_id: &str, text: &str, color: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO poll_options (poll_id, idx, text, color)
                 VALUES (?1,
                    (SELECT COALESCE(MAX(idx) + 1, 0) FROM poll_options WHERE poll_id = ?1),
                    ?2, ?3)",
                (poll_id, text, color),
            )?;
            Ok(())
        })
    }

    /// Option indices a user has voted for in a poll.
    pub fn user_voted_options(&self, poll_id: &str, user_id: &str) -> Result<Vec<usize>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT option_idx FROM poll_votes
                 WHERE poll_id = ?1 AND user_id = ?2 ORDER BY option_idx",
            )?;
            let rows = stmt
                .query_map((poll_id, user_id), |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(|n| n as usize).collect())
        })
    }
}

fn query_poll(conn: &Connection, poll_id: &str) -> Result<Option<Poll>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.title, p.description, p.creator_id, u.username, p.room_id,
                p.allow_multiple_votes, p.show_results, p.allow_add_options, p.require_auth,
                p.status, p.ends_at, p.total_votes, p.created_at
         FROM polls p
         LEFT JOIN users u ON p.creator_id = u.id
         WHERE p.id = ?1",
    )?;

    let head = stmt
        .query_row([poll_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, bool>(8)?,
                row.get::<_, bool>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, i64>(12)?,
                row.get::<_, String>(13)?,
            ))
        })
        .optional()?;

    let Some((
        id,
        title,
        description,
        creator_id,
        creator_name,
        room_id,
        allow_multiple_votes,
        show_results,
        allow_add_options,
        require_auth,
        status,
        ends_at,
        total_votes,
        created_at,
    )) = head
    else {
        return Ok(None);
    };

    let mut opt_stmt = conn.prepare(
        "SELECT idx, text, color FROM poll_options WHERE poll_id = ?1 ORDER BY idx",
    )?;
    let option_rows = opt_stmt
        .query_map([poll_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut vote_stmt = conn.prepare(
        "SELECT option_idx, user_id, created_at FROM poll_votes
         WHERE poll_id = ?1 ORDER BY created_at",
    )?;
    let vote_rows = vote_stmt
        .query_map([poll_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut options: Vec<PollOption> = option_rows
        .into_iter()
        .map(|(_, text, color)| PollOption { text, color, votes: vec![] })
        .collect();

    for (idx, user_id, created_at) in vote_rows {
        let idx = idx as usize;
        if let Some(option) = options.get_mut(idx) {
            option.votes.push(Vote {
                user_id: parse_uuid(&user_id, "vote user id")?,
                timestamp: parse_ts(&created_at, "vote timestamp")?,
            });
        }
    }

    Ok(Some(Poll {
        id: parse_uuid(&id, "poll id")?,
        title,
        description,
        options,
        creator_id: parse_uuid(&creator_id, "poll creator id")?,
        creator_name: creator_name.unwrap_or_else(|| "unknown".to_string()),
        room_id: room_id.as_deref().map(|id| parse_uuid(id, "poll room id")).transpose()?,
        settings: PollSettings {
            allow_multiple_votes,
            show_results: ShowResults::parse(&show_results),
            allow_add_options,
            require_auth,
        },
        status: PollStatus::parse(&status),
        ends_at: parse_opt_ts(ends_at.as_deref(), "poll end timestamp")?,
        total_votes: total_votes as u64,
        created_at: parse_ts(&created_at, "poll created timestamp")?,
    }))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn seed_poll(store: &Store, allow_multiple: bool) -> (Poll, String) {
        let creator = Uuid::new_v4();
        store
            .create_user(&creator.to_string(), "ada", "hash")
            .unwrap();

        let poll = Poll {
            id: Uuid::new_v4(),
            title: "Favorite language?".into(),
            description: None,
            options: vec![
                PollOption { text: "Rust".into(), color: "#3b82f6".into(), votes: vec![] },
                PollOption { text: "Go".into(), color: "#3b82f6".into(), votes: vec![] },
            ],
            creator_id: creator,
            creator_name: "ada".into(),
            room_id: None,
            settings: PollSettings {
                allow_multiple_votes: allow_multiple,
                ..PollSettings::default()
            },
            status: PollStatus::Active,
            ends_at: None,
            total_votes: 0,
            created_at: Utc::now(),
        };
        store.insert_poll(&poll).unwrap();

        let voter = Uuid::new_v4().to_string();
        store.create_user(&voter, "bob", "hash").unwrap();
        (poll, voter)
    }

    #[test]
    fn poll_round_trips_as_an_aggregate() {
        let store = Store::open_in_memory().unwrap();
        let (poll, _) = seed_poll(&store, false);

        let loaded = store.get_poll(&poll.id.to_string()).unwrap().unwrap();
        assert_eq!(loaded.title, poll.title);
        assert_eq!(loaded.options.len(), 2);
        assert_eq!(loaded.options[0].text, "Rust");
        assert_eq!(loaded.creator_name, "ada");
        assert_eq!(loaded.status, PollStatus::Active);
        assert_eq!(loaded.total_votes, 0);
    }

    #[test]
    fn vote_with_clear_previous_recomputes_total() {
        let store = Store::open_in_memory().unwrap();
        let (poll, voter) = seed_poll(&store, false);
        let pid = poll.id.to_string();

        store.record_vote(&pid, 1, &voter, true, Utc::now()).unwrap();
        store.record_vote(&pid, 0, &voter, true, Utc::now()).unwrap();

        let loaded = store.get_poll(&pid).unwrap().unwrap();
        assert_eq!(loaded.total_votes, 1);
        assert_eq!(loaded.options[0].votes.len(), 1);
        assert!(loaded.options[1].votes.is_empty());
        assert_eq!(store.user_voted_options(&pid, &voter).unwrap(), vec![0]);
    }

    #[test]
    fn vote_without_clearing_accumulates() {
        let store = Store::open_in_memory().unwrap();
        let (poll, voter) = seed_poll(&store, true);
        let pid = poll.id.to_string();

        store.record_vote(&pid, 0, &voter, false, Utc::now()).unwrap();
        store.record_vote(&pid, 1, &voter, false, Utc::now()).unwrap();

        let loaded = store.get_poll(&pid).unwrap().unwrap();
        assert_eq!(loaded.total_votes, 2);
        assert_eq!(store.user_voted_options(&pid, &voter).unwrap(), vec![0, 1]);
    }

    #[test]
    fn added_option_lands_at_the_end() {
        let store = Store::open_in_memory().unwrap();
        let (poll, _) = seed_poll(&store, false);
        let pid = poll.id.to_string();

        store.add_poll_option(&pid, "Zig", "#22c55e").unwrap();
        let loaded = store.get_poll(&pid).unwrap().unwrap();
        assert_eq!(loaded.options.len(), 3);
        assert_eq!(loaded.options[2].text, "Zig");
    }

    #[test]
    fn delete_cascades_options_and_votes() {
        let store = Store::open_in_memory().unwrap();
        let (poll, voter) = seed_poll(&store, false);
        let pid = poll.id.to_string();
        store.record_vote(&pid, 0, &voter, true, Utc::now()).unwrap();

        store.delete_poll(&pid).unwrap();
        assert!(store.get_poll(&pid).unwrap().is_none());
        assert!(store.user_voted_options(&pid, &voter).unwrap().is_empty());
    }
}
