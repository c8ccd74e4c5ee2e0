use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per blog article's live room: the ChatThread head.
        -- owner_id mirrors the blog owner and is maintained by the blog
        -- service; it may be NULL for rooms created lazily on first join.
        CREATE TABLE IF NOT EXISTS rooms (
            id                  TEXT PRIMARY KEY,
            owner_id            TEXT REFERENCES users(id),
            allow_anonymous     INTEGER NOT NULL DEFAULT 0,
            moderation_enabled  INTEGER NOT NULL DEFAULT 1,
            max_message_length  INTEGER NOT NULL DEFAULT 1000,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            sender_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'text',
            created_at  TEXT NOT NULL,
            edited      INTEGER NOT NULL DEFAULT 0,
            edited_at   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        -- Best-effort mirror of who is present in a room, for clients that
        -- read history without a live connection. The in-memory registry is
        -- authoritative.
        CREATE TABLE IF NOT EXISTS active_users (
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            last_seen   TEXT NOT NULL,
            is_typing   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS polls (
            id                   TEXT PRIMARY KEY,
            title                TEXT NOT NULL,
            description          TEXT,
            creator_id           TEXT NOT NULL REFERENCES users(id),
            room_id              TEXT,
            allow_multiple_votes INTEGER NOT NULL DEFAULT 0,
            show_results         TEXT NOT NULL DEFAULT 'after_vote',
            allow_add_options    INTEGER NOT NULL DEFAULT 0,
            require_auth         INTEGER NOT NULL DEFAULT 1,
            status               TEXT NOT NULL DEFAULT 'active',
            ends_at              TEXT,
            total_votes          INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_polls_room ON polls(room_id);
        CREATE INDEX IF NOT EXISTS idx_polls_status ON polls(status);

        CREATE TABLE IF NOT EXISTS poll_options (
            poll_id     TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            idx         INTEGER NOT NULL,
            text        TEXT NOT NULL,
            color       TEXT NOT NULL DEFAULT '#3b82f6',
            PRIMARY KEY (poll_id, idx)
        );

        CREATE TABLE IF NOT EXISTS poll_votes (
            poll_id     TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            option_idx  INTEGER NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_poll_votes_poll
            ON poll_votes(poll_id, user_id);

        CREATE TABLE IF NOT EXISTS notifications (
            id            TEXT PRIMARY KEY,
            recipient_id  TEXT NOT NULL REFERENCES users(id),
            sender_id     TEXT REFERENCES users(id),
            kind          TEXT NOT NULL,
            title         TEXT NOT NULL,
            message       TEXT NOT NULL,
            data          TEXT NOT NULL DEFAULT '{}',
            read          INTEGER NOT NULL DEFAULT 0,
            read_at       TEXT,
            priority      TEXT NOT NULL DEFAULT 'medium',
            created_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id, read);
        ",
    )?;

    info!("Store migrations complete");
    Ok(())
}
