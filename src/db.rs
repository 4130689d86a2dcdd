use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::AppResult;

/// Create all tables if they don't already exist. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            email           TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS password_resets (
            token           TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS profiles (
            id              TEXT PRIMARY KEY,
            display_name    TEXT NOT NULL,
            full_name       TEXT NOT NULL DEFAULT '',
            email           TEXT NOT NULL DEFAULT '',
            avatar          TEXT,
            cover           TEXT,
            bio             TEXT,
            age             INTEGER,
            push_token      TEXT
        );

        CREATE TABLE IF NOT EXISTS friend_requests (
            id              TEXT PRIMARY KEY,
            from_user       TEXT NOT NULL,
            to_user         TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending',
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            room_id         TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            text            TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room ON messages (room_id, created_at DESC, id DESC);

        CREATE TABLE IF NOT EXISTS room_reads (
            room_id         TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            last_read_at    INTEGER NOT NULL,
            PRIMARY KEY (room_id, user_id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Server clock, unix milliseconds. All persisted timestamps come from here
/// so that client clock skew never orders messages or receipts.
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub full_name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub cover: Option<String>,
    pub bio: Option<String>,
    pub age: Option<i64>,
    #[serde(skip_serializing, default)]
    pub push_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FriendRequest {
    pub id: String,
    pub from_user: String,
    pub to_user: String,
    pub status: String,
    pub created_at: i64,
}

/// A chat message. Immutable once written; the only delete is the bulk
/// cascade when a friendship is removed. `display_name` is a snapshot of the
/// sender's name at send time and is never back-filled on rename.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub display_name: String,
    pub text: String,
    pub created_at: i64,
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;

    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}

#[cfg(test)]
pub(crate) async fn insert_message_at(
    pool: &SqlitePool,
    room_id: &str,
    user_id: &str,
    text: &str,
    created_at: i64,
) -> Message {
    let msg = Message {
        id: uuid::Uuid::now_v7().to_string(),
        room_id: room_id.to_owned(),
        user_id: user_id.to_owned(),
        display_name: user_id.to_owned(),
        text: text.to_owned(),
        created_at,
    };
    sqlx::query(
        "INSERT INTO messages (id,room_id,user_id,display_name,text,created_at) VALUES (?,?,?,?,?,?)",
    )
    .bind(&msg.id)
    .bind(&msg.room_id)
    .bind(&msg.user_id)
    .bind(&msg.display_name)
    .bind(&msg.text)
    .bind(msg.created_at)
    .execute(pool)
    .await
    .unwrap();
    msg
}
