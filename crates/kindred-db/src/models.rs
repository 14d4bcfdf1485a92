/// Database row types. These map directly to SQLite rows.
/// Distinct from kindred-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub created_at: String,
}

pub struct MatchActionRow {
    pub actor_id: String,
    pub target_id: String,
    pub action: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MutualMatchRow {
    pub id: String,
    pub user_low_id: String,
    pub user_high_id: String,
    pub matched_at: String,
    pub is_active: bool,
    pub last_message_at: Option<String>,
    pub user_low_seen: bool,
    pub user_high_seen: bool,
}

pub struct MessageRow {
    pub id: String,
    pub match_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub message_type: String,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
}
