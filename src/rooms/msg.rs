use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    AppError, AppResult,
    db::{self, Message},
    presence::Presence,
    profiles,
    rooms::feed::{FeedEvent, FeedEventKind, RoomFeeds},
    rooms::room,
};

/// Append a message to a room. The id and timestamp are server-assigned and
/// `display_name` is captured from the author's profile at send time.
pub async fn send(
    pool: &SqlitePool,
    feeds: &RoomFeeds,
    presence: &Presence,
    room_id: &str,
    author_id: &str,
    text: &str,
) -> AppResult<Message> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::validation("message text cannot be empty"));
    }

    let author = profiles::ensure(pool, author_id).await?;
    let display_name = if author.display_name.is_empty() {
        author.email.clone()
    } else {
        author.display_name.clone()
    };

    let message = Message {
        id: Uuid::now_v7().to_string(),
        room_id: room_id.to_owned(),
        user_id: author_id.to_owned(),
        display_name,
        text: text.to_owned(),
        created_at: db::now_ms(),
    };

    sqlx::query(
        "INSERT INTO messages (id,room_id,user_id,display_name,text,created_at) VALUES (?,?,?,?,?,?)",
    )
    .bind(&message.id)
    .bind(&message.room_id)
    .bind(&message.user_id)
    .bind(&message.display_name)
    .bind(&message.text)
    .bind(message.created_at)
    .execute(pool)
    .await?;

    feeds.publish(room_id, FeedEvent { kind: FeedEventKind::Insert, message: message.clone() });
    notify_recipient(pool, presence, &message).await;

    Ok(message)
}

/// The most recent `limit` messages, newest first. Ties on the server
/// timestamp are broken by id so the order is stable.
pub async fn fetch_recent(
    pool: &SqlitePool,
    room_id: &str,
    limit: i64,
) -> AppResult<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE room_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(room_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

/// Hand the message to notification dispatch unless the recipient is
/// actively viewing the room. Delivery transport is external; here we only
/// resolve the token and log the decision. Failures never fail the send.
async fn notify_recipient(pool: &SqlitePool, presence: &Presence, message: &Message) {
    let Some((a, b)) = room::participants(&message.room_id) else {
        return;
    };
    let recipient = if a == message.user_id { b } else { a };

    if presence.is_viewing(recipient, &message.room_id) {
        tracing::debug!(recipient, room_id = %message.room_id, "push suppressed: room active");
        return;
    }

    match profiles::fetch(pool, recipient).await {
        Ok(Some(profile)) => {
            if let Some(push_token) = profile.push_token.as_deref() {
                tracing::info!(
                    recipient,
                    push_token,
                    room_id = %message.room_id,
                    from = %message.display_name,
                    "push dispatch"
                );
            }
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "push lookup failed"),
    }
}
