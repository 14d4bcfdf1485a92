use crate::Database;
use crate::models::{MatchActionRow, MessageRow, MutualMatchRow, UserRow};
use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use kindred_types::models::{ActionKind, canonical_pair};
use rusqlite::{Connection, Row, TransactionBehavior};
use uuid::Uuid;

const MATCH_COLUMNS: &str = "id, user_low_id, user_high_id, matched_at, is_active, last_message_at, user_low_seen, user_high_seen";

const MESSAGE_COLUMNS: &str =
    "id, match_id, sender_id, receiver_id, content, message_type, is_read, read_at, created_at";

/// Result of recording a like/reject/skip.
pub enum RecordOutcome {
    /// The actor already made a final decision about this target. Nothing was written.
    AlreadyActed(ActionKind),
    /// The action was stored. `mutual` is the active match for the pair if
    /// one exists after this action; `created` is true only when this call
    /// inserted it.
    Recorded {
        mutual: Option<MutualMatchRow>,
        created: bool,
    },
}

impl Database {
    // -- Users --

    /// Insert or refresh a user's public summary.
    pub fn upsert_user(&self, id: &str, name: &str, image: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, image, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, image = excluded.image",
                rusqlite::params![id, name, image, now()],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, image, created_at FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        image: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Delete a user. Actions, matches and messages go with it by cascade.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id])? > 0))
    }

    // -- Match actions --

    /// Record `actor`'s action toward `target` and, for a reciprocated like,
    /// create the mutual match. Runs as one IMMEDIATE transaction so two
    /// concurrent likes of the same pair cannot both miss each other.
    pub fn record_action(&self, actor_id: &str, target_id: &str, action: ActionKind) -> Result<RecordOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let prev: Option<String> = tx
                .query_row(
                    "SELECT action FROM match_actions WHERE actor_id = ?1 AND target_id = ?2",
                    [actor_id, target_id],
                    |row| row.get(0),
                )
                .optional()?;
            let prev = prev
                .map(|s| ActionKind::parse(&s).ok_or_else(|| anyhow!("Corrupt action '{}'", s)))
                .transpose()?;

            if let Some(prev) = prev.filter(|p| !action.may_follow(Some(*p))) {
                return Ok(RecordOutcome::AlreadyActed(prev));
            }

            let ts = now();
            tx.execute(
                "INSERT INTO match_actions (actor_id, target_id, action, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(actor_id, target_id)
                 DO UPDATE SET action = excluded.action, updated_at = excluded.updated_at",
                rusqlite::params![actor_id, target_id, action.as_str(), ts],
            )?;

            if action != ActionKind::Like {
                tx.commit()?;
                return Ok(RecordOutcome::Recorded { mutual: None, created: false });
            }

            let reciprocated = tx
                .query_row(
                    "SELECT 1 FROM match_actions WHERE actor_id = ?1 AND target_id = ?2 AND action = 'like'",
                    [target_id, actor_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            if !reciprocated {
                tx.commit()?;
                return Ok(RecordOutcome::Recorded { mutual: None, created: false });
            }

            let (low, high) = pair_key(actor_id, target_id)?;
            // The second liker has just seen the match; the first liker has not.
            let low_seen = low == actor_id;
            let created = tx.execute(
                "INSERT OR IGNORE INTO mutual_matches
                    (id, user_low_id, user_high_id, matched_at, is_active, user_low_seen, user_high_seen)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
                rusqlite::params![Uuid::new_v4().to_string(), low, high, ts, low_seen, !low_seen],
            )? == 1;

            let mutual = query_active_match_by_pair(&tx, &low, &high)?;
            tx.commit()?;

            Ok(RecordOutcome::Recorded { mutual, created })
        })
    }

    #[cfg(test)]
    pub fn get_action(&self, actor_id: &str, target_id: &str) -> Result<Option<MatchActionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT actor_id, target_id, action, created_at, updated_at
                 FROM match_actions WHERE actor_id = ?1 AND target_id = ?2",
                [actor_id, target_id],
                map_action_row,
            )
            .optional()
        })
    }

    /// Outgoing likes of `user_id` that have never become a mutual match.
    pub fn get_pending_likes(&self, user_id: &str) -> Result<Vec<MatchActionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.actor_id, a.target_id, a.action, a.created_at, a.updated_at
                 FROM match_actions a
                 WHERE a.actor_id = ?1 AND a.action = 'like'
                   AND NOT EXISTS (
                       SELECT 1 FROM mutual_matches m
                       WHERE (m.user_low_id = a.actor_id AND m.user_high_id = a.target_id)
                          OR (m.user_low_id = a.target_id AND m.user_high_id = a.actor_id)
                   )
                 ORDER BY a.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_action_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Mutual matches --

    /// Active match for an unordered pair.
    pub fn find_active_match(&self, a: &str, b: &str) -> Result<Option<MutualMatchRow>> {
        let (low, high) = pair_key(a, b)?;
        self.with_conn(|conn| query_active_match_by_pair(conn, &low, &high))
    }

    /// Match by id, active or not.
    pub fn get_match(&self, id: &str) -> Result<Option<MutualMatchRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MATCH_COLUMNS} FROM mutual_matches WHERE id = ?1"),
                [id],
                map_match_row,
            )
            .optional()
        })
    }

    pub fn get_active_matches(&self, user_id: &str) -> Result<Vec<MutualMatchRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MATCH_COLUMNS} FROM mutual_matches
                 WHERE is_active = 1 AND (user_low_id = ?1 OR user_high_id = ?1)
                 ORDER BY matched_at DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_match_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Set `user_id`'s side of the seen flag. False if the match is not
    /// active or the user is not a participant.
    pub fn mark_match_seen(&self, match_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE mutual_matches SET
                    user_low_seen  = CASE WHEN user_low_id  = ?2 THEN 1 ELSE user_low_seen  END,
                    user_high_seen = CASE WHEN user_high_id = ?2 THEN 1 ELSE user_high_seen END
                 WHERE id = ?1 AND is_active = 1 AND (user_low_id = ?2 OR user_high_id = ?2)",
                [match_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Soft-delete (unmatch). The row stays for audit.
    pub fn deactivate_match(&self, match_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE mutual_matches SET is_active = 0 WHERE id = ?1 AND is_active = 1",
                [match_id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Persist a message and bump the match's `last_message_at` in one
    /// transaction. Returns `None` without writing anything if the match is
    /// not active or does not contain both parties.
    pub fn insert_message(
        &self,
        id: &str,
        match_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        message_type: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let ts = now();

            let touched = tx.execute(
                "UPDATE mutual_matches SET last_message_at = ?2
                 WHERE id = ?1 AND is_active = 1
                   AND user_low_id = min(?3, ?4) AND user_high_id = max(?3, ?4)",
                rusqlite::params![match_id, ts, sender_id, receiver_id],
            )?;
            if touched == 0 {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO messages (id, match_id, sender_id, receiver_id, content, message_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, match_id, sender_id, receiver_id, content, message_type, ts],
            )?;
            tx.commit()?;

            Ok(Some(MessageRow {
                id: id.to_string(),
                match_id: match_id.to_string(),
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                content: content.to_string(),
                message_type: message_type.to_string(),
                is_read: false,
                read_at: None,
                created_at: ts,
            }))
        })
    }

    /// One page of a conversation, newest first.
    pub fn get_messages(&self, match_id: &str, limit: u32, offset: u64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE match_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![match_id, limit, offset as i64], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages(&self, match_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages WHERE match_id = ?1", [match_id], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        })
    }

    pub fn get_latest_message(&self, match_id: &str) -> Result<Option<MessageRow>> {
        Ok(self.get_messages(match_id, 1, 0)?.pop())
    }

    pub fn count_unread(&self, match_id: &str, receiver_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE match_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                [match_id, receiver_id],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    /// Mark every unread message in the conversation addressed to
    /// `receiver_id` as read. Messages the receiver sent are untouched.
    pub fn mark_read(&self, match_id: &str, receiver_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1, read_at = ?3
                 WHERE match_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                rusqlite::params![match_id, receiver_id, now()],
            )?;
            Ok(changed as u64)
        })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_active_match_by_pair(conn: &Connection, low: &str, high: &str) -> Result<Option<MutualMatchRow>> {
    conn.query_row(
        &format!(
            "SELECT {MATCH_COLUMNS} FROM mutual_matches
             WHERE user_low_id = ?1 AND user_high_id = ?2 AND is_active = 1"
        ),
        [low, high],
        map_match_row,
    )
    .optional()
}

fn map_action_row(row: &Row<'_>) -> rusqlite::Result<MatchActionRow> {
    Ok(MatchActionRow {
        actor_id: row.get(0)?,
        target_id: row.get(1)?,
        action: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_match_row(row: &Row<'_>) -> rusqlite::Result<MutualMatchRow> {
    Ok(MutualMatchRow {
        id: row.get(0)?,
        user_low_id: row.get(1)?,
        user_high_id: row.get(2)?,
        matched_at: row.get(3)?,
        is_active: row.get(4)?,
        last_message_at: row.get(5)?,
        user_low_seen: row.get(6)?,
        user_high_seen: row.get(7)?,
    })
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        match_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        message_type: row.get(5)?,
        is_read: row.get(6)?,
        read_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Stored form of an unordered user pair, low id first.
fn pair_key(a: &str, b: &str) -> Result<(String, String)> {
    let (low, high) = canonical_pair(a.parse()?, b.parse()?);
    Ok((low.to_string(), high.to_string()))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
