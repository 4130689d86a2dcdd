use std::collections::HashMap;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::{AppResult, db::Message};

/// Per-room summary for the friend list: newest message, unread count, and
/// the activity timestamp used to order the list.
#[derive(Debug, Default, Serialize)]
pub struct RoomDigest {
    pub last_message: Option<Message>,
    pub unread: i64,
    pub latest_activity: i64,
}

/// Batch unread computation for a friend list. Two fetches (receipts for
/// `self_id`, messages for all rooms newest-first) and a single pass over
/// the messages. Unread counts only messages from the other party strictly
/// newer than the watermark; no watermark counts them all. Best-effort by
/// design: a receipt written concurrently with a send may or may not cover
/// it.
pub async fn compute(
    pool: &SqlitePool,
    rooms: &[String],
    self_id: &str,
) -> AppResult<HashMap<String, RoomDigest>> {
    let mut digests: HashMap<String, RoomDigest> = rooms
        .iter()
        .map(|room| (room.clone(), RoomDigest::default()))
        .collect();
    if rooms.is_empty() {
        return Ok(digests);
    }

    let placeholders = vec!["?"; rooms.len()].join(",");

    let sql = format!(
        "SELECT room_id, last_read_at FROM room_reads WHERE user_id = ? AND room_id IN ({placeholders})"
    );
    let mut query = sqlx::query_as::<_, (String, i64)>(&sql).bind(self_id);
    for room in rooms {
        query = query.bind(room);
    }
    let receipts: HashMap<String, i64> = query.fetch_all(pool).await?.into_iter().collect();

    let sql = format!(
        "SELECT * FROM messages WHERE room_id IN ({placeholders}) ORDER BY created_at DESC, id DESC"
    );
    let mut query = sqlx::query_as::<_, Message>(&sql);
    for room in rooms {
        query = query.bind(room);
    }
    let messages = query.fetch_all(pool).await?;

    for message in messages {
        let Some(digest) = digests.get_mut(&message.room_id) else {
            continue;
        };

        let last_read = receipts.get(&message.room_id).copied();
        if message.user_id != self_id && last_read.is_none_or(|t| message.created_at > t) {
            digest.unread += 1;
        }

        // newest-first, so the first message seen for a room is its latest
        if digest.last_message.is_none() {
            digest.latest_activity = message.created_at;
            digest.last_message = Some(message);
        }
    }

    Ok(digests)
}

/// Order rooms for the list view: most recent activity first, rooms with no
/// activity last (epoch 0), ties broken by room id so the order is stable.
pub fn order_rooms(rooms: &mut [String], digests: &HashMap<String, RoomDigest>) {
    rooms.sort_by(|a, b| {
        let la = digests.get(a).map_or(0, |d| d.latest_activity);
        let lb = digests.get(b).map_or(0, |d| d.latest_activity);
        lb.cmp(&la).then_with(|| a.cmp(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, reads};

    fn rooms(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn unread_counts_messages_after_the_watermark() {
        let pool = db::test_pool().await;
        db::insert_message_at(&pool, "a:b", "a", "hi", 1_000).await;

        // scenario 3: unread before mark_read, zero after
        let digests = compute(&pool, &rooms(&["a:b"]), "b").await.unwrap();
        assert_eq!(digests["a:b"].unread, 1);

        reads::mark_read(&pool, "a:b", "b").await.unwrap();
        let digests = compute(&pool, &rooms(&["a:b"]), "b").await.unwrap();
        assert_eq!(digests["a:b"].unread, 0);
    }

    #[tokio::test]
    async fn self_authored_messages_never_count() {
        let pool = db::test_pool().await;
        db::insert_message_at(&pool, "a:b", "b", "mine", 1_000).await;
        db::insert_message_at(&pool, "a:b", "a", "theirs", 2_000).await;

        let digests = compute(&pool, &rooms(&["a:b"]), "b").await.unwrap();
        assert_eq!(digests["a:b"].unread, 1);
        assert_eq!(digests["a:b"].last_message.as_ref().unwrap().text, "theirs");
    }

    #[tokio::test]
    async fn messages_at_or_before_the_watermark_are_read() {
        let pool = db::test_pool().await;
        db::insert_message_at(&pool, "a:b", "a", "old", 1_000).await;
        db::insert_message_at(&pool, "a:b", "a", "boundary", 5_000).await;
        db::insert_message_at(&pool, "a:b", "a", "new", 9_000).await;

        sqlx::query("INSERT INTO room_reads (room_id,user_id,last_read_at) VALUES (?,?,?)")
            .bind("a:b")
            .bind("b")
            .bind(5_000i64)
            .execute(&pool)
            .await
            .unwrap();

        let digests = compute(&pool, &rooms(&["a:b"]), "b").await.unwrap();
        assert_eq!(digests["a:b"].unread, 1);
        assert_eq!(digests["a:b"].latest_activity, 9_000);
    }

    #[tokio::test]
    async fn batch_covers_every_requested_room() {
        let pool = db::test_pool().await;
        db::insert_message_at(&pool, "a:b", "a", "hi", 1_000).await;

        let digests = compute(&pool, &rooms(&["a:b", "b:c"]), "b").await.unwrap();
        assert_eq!(digests.len(), 2);
        assert_eq!(digests["a:b"].unread, 1);
        assert_eq!(digests["b:c"].unread, 0);
        assert!(digests["b:c"].last_message.is_none());
        assert_eq!(digests["b:c"].latest_activity, 0);
    }

    #[tokio::test]
    async fn empty_room_list_is_a_no_op() {
        let pool = db::test_pool().await;
        let digests = compute(&pool, &[], "b").await.unwrap();
        assert!(digests.is_empty());
    }

    #[tokio::test]
    async fn ordering_is_by_activity_then_room_id() {
        let pool = db::test_pool().await;
        db::insert_message_at(&pool, "b:c", "c", "newer", 2_000).await;
        db::insert_message_at(&pool, "a:b", "a", "older", 1_000).await;
        // d:e and b:e share a timestamp; the id tie-break keeps order stable
        db::insert_message_at(&pool, "d:e", "d", "tie", 1_500).await;
        db::insert_message_at(&pool, "b:e", "e", "tie", 1_500).await;

        let mut all = rooms(&["a:b", "b:c", "d:e", "b:e", "b:z"]);
        let digests = compute(&pool, &all, "b").await.unwrap();
        order_rooms(&mut all, &digests);

        assert_eq!(all, rooms(&["b:c", "b:e", "d:e", "a:b", "b:z"]));
    }
}
