use sqlx::SqlitePool;

use crate::{AppResult, db};

/// Advance the caller's read watermark for a room to "now". Idempotent
/// upsert, last writer wins; safe to retry.
pub async fn mark_read(pool: &SqlitePool, room_id: &str, user_id: &str) -> AppResult<i64> {
    let now = db::now_ms();
    sqlx::query(
        "INSERT INTO room_reads (room_id, user_id, last_read_at) VALUES (?, ?, ?)
         ON CONFLICT(room_id, user_id) DO UPDATE SET last_read_at = excluded.last_read_at",
    )
    .bind(room_id)
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(now)
}

/// `None` means the user has never read this room.
pub async fn last_read_at(
    pool: &SqlitePool,
    room_id: &str,
    user_id: &str,
) -> AppResult<Option<i64>> {
    let ts = sqlx::query_scalar::<_, i64>(
        "SELECT last_read_at FROM room_reads WHERE room_id = ? AND user_id = ?",
    )
    .bind(room_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(ts)
}
