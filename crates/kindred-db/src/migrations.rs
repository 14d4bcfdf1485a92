use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            image       TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS match_actions (
            actor_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            target_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            action      TEXT NOT NULL CHECK (action IN ('like', 'reject', 'skip')),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (actor_id, target_id)
        );

        CREATE INDEX IF NOT EXISTS idx_match_actions_target
            ON match_actions(target_id, action);

        CREATE TABLE IF NOT EXISTS mutual_matches (
            id               TEXT PRIMARY KEY,
            user_low_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            user_high_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            matched_at       TEXT NOT NULL,
            is_active        INTEGER NOT NULL DEFAULT 1,
            last_message_at  TEXT,
            user_low_seen    INTEGER NOT NULL DEFAULT 0,
            user_high_seen   INTEGER NOT NULL DEFAULT 0,
            CHECK (user_low_id < user_high_id)
        );

        -- One active match per canonical pair. INSERT OR IGNORE against this
        -- index is the create-if-absent primitive.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_mutual_matches_pair
            ON mutual_matches(user_low_id, user_high_id) WHERE is_active = 1;

        CREATE INDEX IF NOT EXISTS idx_mutual_matches_high
            ON mutual_matches(user_high_id, is_active);

        CREATE TABLE IF NOT EXISTS messages (
            id            TEXT PRIMARY KEY,
            match_id      TEXT NOT NULL REFERENCES mutual_matches(id) ON DELETE CASCADE,
            sender_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            receiver_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content       TEXT NOT NULL,
            message_type  TEXT NOT NULL DEFAULT 'text',
            is_read       INTEGER NOT NULL DEFAULT 0,
            read_at       TEXT,
            created_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_match
            ON messages(match_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, is_read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
